//! The tree: construction, lookup and read accessors.

use canopy_types::{
    Action, ActionKind, BucketSpec, Check, CheckInstance, ClusterSpec, EntityId, EntityKind,
    EntityState, GroupSpec, NodeSpec, Property, RepositorySpec, TeamId, TreeSpec,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::arena::Arena;
use crate::config::TreeConfig;
use crate::entity::{Details, Entity, EntityInfo};
use crate::error::TreeError;
use crate::sink::Sinks;

type Result<T> = std::result::Result<T, TreeError>;

/// An in-memory configuration tree rooted at a single root entity.
///
/// Structural, property and check mutation takes `&mut self`; callers
/// serialize writers. [`compute_check_instances`](Tree::compute_check_instances)
/// takes `&self` and fans out across entities and checks.
#[derive(Debug)]
pub struct Tree {
    pub(crate) arena: Arena,
    pub(crate) root: EntityId,
    pub(crate) config: TreeConfig,
    pub(crate) sinks: Sinks,
    pub(crate) snapshot: Option<Arena>,
}

/// Lookup criteria for [`Tree::find`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindRequest {
    pub id: Option<EntityId>,
    pub kind: Option<EntityKind>,
    pub name: Option<String>,
    /// Restrict the search to one repository; failures are then routed
    /// through that repository's fault sentinel.
    pub repository: Option<EntityId>,
}

impl FindRequest {
    pub fn by_id(id: EntityId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_name(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn in_repository(mut self, repository: EntityId) -> Self {
        self.repository = Some(repository);
        self
    }

    fn matches(&self, entity: &Entity) -> bool {
        entity.kind != EntityKind::Fault
            && self.id.is_none_or(|id| id == entity.id)
            && self.kind.is_none_or(|kind| kind == entity.kind)
            && self.name.as_deref().is_none_or(|name| name == entity.name)
            && self
                .repository
                .is_none_or(|repo| repo == entity.repository_id)
    }
}

impl std::fmt::Display for FindRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "find(")?;
        if let Some(id) = self.id {
            write!(f, "id={id} ")?;
        }
        if let Some(kind) = self.kind {
            write!(f, "kind={kind} ")?;
        }
        if let Some(name) = &self.name {
            write!(f, "name={name} ")?;
        }
        write!(f, ")")
    }
}

/// One line of [`Tree::structure`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StructureEntry {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub team_id: TeamId,
    pub parent: Option<EntityId>,
}

impl Tree {
    /// Create a tree with its root entity.
    pub fn new(spec: &TreeSpec, config: TreeConfig, sinks: Sinks) -> Result<Self> {
        let id = spec.id()?;
        let mut root = Entity::new(
            id,
            EntityKind::Root,
            spec.name.clone(),
            TeamId::nil(),
            Details::Root,
        );
        root.state = EntityState::Attached;
        let mut arena = Arena::default();
        arena.insert(root);
        info!(root_id = %id, deterministic = config.deterministic_inheritance_order, "tree created");
        Ok(Self {
            arena,
            root: id,
            config,
            sinks,
            snapshot: None,
        })
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    fn insert_floating(&mut self, entity: Entity) -> Result<EntityId> {
        let id = entity.id;
        if self.arena.contains(id) {
            return Err(TreeError::AlreadyAttached {
                id,
                kind: entity.kind,
            });
        }
        debug!(entity_id = %id, kind = %entity.kind, "entity created");
        self.arena.insert(entity);
        Ok(id)
    }

    /// Create a floating repository.
    pub fn create_repository(&mut self, spec: &RepositorySpec) -> Result<EntityId> {
        let (id, team) = spec.validate()?;
        let mut entity = Entity::new(
            id,
            EntityKind::Repository,
            spec.name.clone(),
            team,
            Details::Repository {
                active: spec.active,
                deleted: spec.deleted,
            },
        );
        entity.repository_id = id;
        self.insert_floating(entity)
    }

    /// Create a floating bucket. It may only attach to `spec.repository`.
    pub fn create_bucket(&mut self, spec: &BucketSpec) -> Result<EntityId> {
        let (id, team, repository) = spec.validate()?;
        let mut entity = Entity::new(
            id,
            EntityKind::Bucket,
            spec.name.clone(),
            team,
            Details::Bucket {
                frozen: spec.frozen,
                deleted: spec.deleted,
            },
        );
        entity.repository_id = repository;
        entity.bucket_id = id;
        entity.environment = spec.environment.clone();
        self.insert_floating(entity)
    }

    pub fn create_group(&mut self, spec: &GroupSpec) -> Result<EntityId> {
        let (id, team) = spec.validate()?;
        self.insert_floating(Entity::new(
            id,
            EntityKind::Group,
            spec.name.clone(),
            team,
            Details::Group,
        ))
    }

    pub fn create_cluster(&mut self, spec: &ClusterSpec) -> Result<EntityId> {
        let (id, team) = spec.validate()?;
        self.insert_floating(Entity::new(
            id,
            EntityKind::Cluster,
            spec.name.clone(),
            team,
            Details::Cluster,
        ))
    }

    pub fn create_node(&mut self, spec: &NodeSpec) -> Result<EntityId> {
        let (id, team, server_id) = spec.validate()?;
        self.insert_floating(Entity::new(
            id,
            EntityKind::Node,
            spec.name.clone(),
            team,
            Details::Node {
                asset_id: spec.asset_id,
                server_id,
                online: spec.online,
                deleted: spec.deleted,
            },
        ))
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    pub(crate) fn emit(&self, action: Action) {
        self.sinks.emit(action);
    }

    /// Emit an entity-level action carrying the entity's current record.
    pub(crate) fn emit_entity(&self, action: ActionKind, id: EntityId) -> Result<()> {
        let record = {
            let entity = self.arena.read(id)?;
            Action::new(action, entity.kind, entity.record())
        };
        self.emit(record);
        Ok(())
    }

    /// Kind of `id`, rejecting fault sentinels as mutation targets.
    pub(crate) fn mutable_kind(&self, id: EntityId) -> Result<EntityKind> {
        let kind = self.arena.read(id)?.kind;
        if kind == EntityKind::Fault {
            return Err(TreeError::FaultTarget(id));
        }
        Ok(kind)
    }

    /// Report `error` to the error sink when its class is routed there, and
    /// hand it back for the caller to return.
    pub(crate) fn fail(&self, action: &str, error: TreeError) -> TreeError {
        match error {
            TreeError::FaultTarget(fault) => self.report_via_fault(fault, action, error),
            _ if error.routes_to_sink() => {
                self.sinks.report(action, error.clone());
                error
            }
            _ => error,
        }
    }

    /// Pre-order ids of the sub-tree rooted at `id`, in attach order.
    pub(crate) fn subtree(&self, id: EntityId) -> Result<Vec<EntityId>> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.arena.read(next)?.child_ids();
            stack.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Resolve a single entity.
    ///
    /// No match yields `Ok(None)` when `allow_nil`, otherwise
    /// [`TreeError::NotFound`]. Several matches always yield
    /// [`TreeError::Ambiguous`]. Failures are reported to the error sink,
    /// through the fault sentinel of `request.repository` when set.
    pub fn find(&self, request: &FindRequest, allow_nil: bool) -> Result<Option<EntityId>> {
        let mut found = Vec::new();
        for id in self.arena.ids() {
            if self.arena.read(id).is_ok_and(|e| request.matches(&e)) {
                found.push(id);
            }
        }
        match found.as_slice() {
            [id] => Ok(Some(*id)),
            [] if allow_nil => Ok(None),
            [] => Err(self.lookup_failed(request, TreeError::NotFound(request.to_string()))),
            _ => Err(self.lookup_failed(request, TreeError::Ambiguous(request.to_string()))),
        }
    }

    fn lookup_failed(&self, request: &FindRequest, error: TreeError) -> TreeError {
        match request.repository.and_then(|repo| self.fault_of(repo)) {
            Some(fault) => self.report_via_fault(fault, "tree.find", error),
            None => self.fail("tree.find", error),
        }
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub fn root_id(&self) -> EntityId {
        self.root
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.arena.contains(id)
    }

    pub fn entity(&self, id: EntityId) -> Result<EntityInfo> {
        Ok(self.arena.read(id)?.info())
    }

    /// Every entity, fault sentinels included, ordered by id.
    pub fn entities(&self) -> Vec<EntityInfo> {
        self.arena
            .ids()
            .into_iter()
            .filter_map(|id| self.arena.read(id).ok().map(|e| e.info()))
            .collect()
    }

    /// Child ids in attach order: groups, clusters, nodes, then the rest.
    pub fn children(&self, id: EntityId) -> Result<Vec<EntityId>> {
        Ok(self.arena.read(id)?.child_ids())
    }

    pub fn properties(&self, id: EntityId) -> Result<Vec<Property>> {
        Ok(self.arena.read(id)?.properties.sorted())
    }

    pub fn checks(&self, id: EntityId) -> Result<Vec<Check>> {
        Ok(self.arena.read(id)?.checks.sorted())
    }

    /// Current check instances, ordered by check id then instance id.
    pub fn instances(&self, id: EntityId) -> Result<Vec<CheckInstance>> {
        let entity = self.arena.read(id)?;
        let mut out: Vec<CheckInstance> = entity.checks.instances.values().cloned().collect();
        out.sort_by_key(|ci| (ci.check_id, ci.instance_id));
        Ok(out)
    }

    /// Loaded instances still waiting to be matched.
    pub fn loaded_instances(&self, id: EntityId) -> Result<Vec<CheckInstance>> {
        let entity = self.arena.read(id)?;
        let mut out: Vec<CheckInstance> = entity
            .checks
            .loaded
            .values()
            .flat_map(|m| m.values().cloned())
            .collect();
        out.sort_by_key(|ci| (ci.check_id, ci.instance_id));
        Ok(out)
    }

    /// Structure of the tree without fault sentinels, ordered by id.
    pub fn structure(&self) -> Vec<StructureEntry> {
        self.entities()
            .into_iter()
            .filter(|e| e.kind != EntityKind::Fault)
            .map(|e| StructureEntry {
                id: e.id,
                kind: e.kind,
                name: e.name,
                team_id: e.team_id,
                parent: e.parent.map(|p| p.id),
            })
            .collect()
    }

    /// Number of entities in the arena, fault sentinels included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.len() <= 1
    }
}
