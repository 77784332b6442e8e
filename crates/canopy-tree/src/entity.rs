//! Tree entities and their per-entity stores.

use std::collections::{BTreeMap, HashMap};

use canopy_types::{
    BucketRecord, Check, CheckId, CheckInstance, ClusterRecord, EntityId, EntityKind,
    EntityState, FaultRecord, GroupRecord, InstanceId, NodeRecord, ObjectRef, ParentRef,
    Payload, Property, PropertyId, PropertyKind, RepositoryRecord, TeamId,
};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Ordered child index
// ---------------------------------------------------------------------------

/// Position-ordered child ids, partitioned by kind.
///
/// Positions come from one counter per parent, so attach order is preserved
/// within each partition. Repositories and buckets go to `others`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct OrderedChildren {
    next: u64,
    groups: BTreeMap<u64, EntityId>,
    clusters: BTreeMap<u64, EntityId>,
    nodes: BTreeMap<u64, EntityId>,
    others: BTreeMap<u64, EntityId>,
}

impl OrderedChildren {
    fn partition(&mut self, kind: EntityKind) -> &mut BTreeMap<u64, EntityId> {
        match kind {
            EntityKind::Group => &mut self.groups,
            EntityKind::Cluster => &mut self.clusters,
            EntityKind::Node => &mut self.nodes,
            _ => &mut self.others,
        }
    }

    pub(crate) fn push(&mut self, kind: EntityKind, id: EntityId) {
        self.next += 1;
        let position = self.next;
        self.partition(kind).insert(position, id);
    }

    pub(crate) fn remove(&mut self, kind: EntityKind, id: EntityId) {
        self.partition(kind).retain(|_, child| *child != id);
    }

    /// Groups, then clusters, then nodes, then everything else.
    pub(crate) fn ids(&self) -> Vec<EntityId> {
        self.groups
            .values()
            .chain(self.clusters.values())
            .chain(self.nodes.values())
            .chain(self.others.values())
            .copied()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.groups.len() + self.clusters.len() + self.nodes.len() + self.others.len()
    }
}

// ---------------------------------------------------------------------------
// Property and check stores
// ---------------------------------------------------------------------------

/// The four property maps of an entity, keyed by local instance id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PropertyStore {
    custom: HashMap<PropertyId, Property>,
    system: HashMap<PropertyId, Property>,
    service: HashMap<PropertyId, Property>,
    oncall: HashMap<PropertyId, Property>,
}

impl PropertyStore {
    pub(crate) fn of(&self, kind: PropertyKind) -> &HashMap<PropertyId, Property> {
        match kind {
            PropertyKind::Custom => &self.custom,
            PropertyKind::System => &self.system,
            PropertyKind::Service => &self.service,
            PropertyKind::Oncall => &self.oncall,
        }
    }

    fn of_mut(&mut self, kind: PropertyKind) -> &mut HashMap<PropertyId, Property> {
        match kind {
            PropertyKind::Custom => &mut self.custom,
            PropertyKind::System => &mut self.system,
            PropertyKind::Service => &mut self.service,
            PropertyKind::Oncall => &mut self.oncall,
        }
    }

    pub(crate) fn insert(&mut self, property: Property) {
        self.of_mut(property.kind())
            .insert(property.instance_id, property);
    }

    pub(crate) fn get(&self, id: PropertyId) -> Option<&Property> {
        PropertyKind::ALL
            .iter()
            .find_map(|kind| self.of(*kind).get(&id))
    }

    pub(crate) fn remove(&mut self, id: PropertyId) -> Option<Property> {
        PropertyKind::ALL
            .iter()
            .find_map(|kind| self.of_mut(*kind).remove(&id))
    }

    /// The local copy of the property sourced at `source_id`.
    pub(crate) fn by_source(&self, source_id: PropertyId) -> Option<&Property> {
        self.iter().find(|p| p.source_id == source_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Property> {
        self.custom
            .values()
            .chain(self.system.values())
            .chain(self.service.values())
            .chain(self.oncall.values())
    }

    /// All properties in a stable order: kind, key, view, source id.
    pub(crate) fn sorted(&self) -> Vec<Property> {
        let mut all: Vec<Property> = self.iter().cloned().collect();
        all.sort_by(|a, b| {
            (a.kind(), a.key(), &a.view, a.source_id).cmp(&(b.kind(), b.key(), &b.view, b.source_id))
        });
        all
    }

    /// Properties that take effect on this entity: everything except
    /// `children_only` properties set here.
    pub(crate) fn effective(&self, kind: PropertyKind) -> impl Iterator<Item = &Property> {
        self.of(kind)
            .values()
            .filter(|p| p.inherited || !p.children_only)
    }
}

/// Checks, their computed instances and loaded instances awaiting matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CheckStore {
    pub(crate) checks: HashMap<CheckId, Check>,
    pub(crate) check_instances: HashMap<CheckId, Vec<InstanceId>>,
    pub(crate) instances: HashMap<InstanceId, CheckInstance>,
    pub(crate) loaded: HashMap<CheckId, HashMap<InstanceId, CheckInstance>>,
}

impl CheckStore {
    pub(crate) fn by_source(&self, source_id: CheckId) -> Option<&Check> {
        self.checks.values().find(|c| c.source_id == source_id)
    }

    pub(crate) fn sorted(&self) -> Vec<Check> {
        let mut all: Vec<Check> = self.checks.values().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Install `instance`, keeping `check_instances` in step.
    pub(crate) fn put_instance(&mut self, instance: CheckInstance) {
        let ids = self.check_instances.entry(instance.check_id).or_default();
        if !ids.contains(&instance.instance_id) {
            ids.push(instance.instance_id);
        }
        self.instances.insert(instance.instance_id, instance);
    }

    /// Remove one instance, keeping `check_instances` in step.
    pub(crate) fn remove_instance(&mut self, id: InstanceId) -> Option<CheckInstance> {
        let instance = self.instances.remove(&id)?;
        if let Some(ids) = self.check_instances.get_mut(&instance.check_id) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.check_instances.remove(&instance.check_id);
            }
        }
        Some(instance)
    }

    /// Remove every instance of `check`, returning them in id order.
    pub(crate) fn take_instances(&mut self, check: CheckId) -> Vec<CheckInstance> {
        let mut removed: Vec<CheckInstance> = self
            .check_instances
            .remove(&check)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.instances.remove(&id))
            .collect();
        removed.sort_by_key(|ci| ci.instance_id);
        removed
    }

    pub(crate) fn instances_of(&self, check: CheckId) -> Vec<&CheckInstance> {
        self.check_instances
            .get(&check)
            .map(|ids| ids.iter().filter_map(|id| self.instances.get(id)).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Kind-specific fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Details {
    Root,
    Repository {
        active: bool,
        deleted: bool,
    },
    Bucket {
        frozen: bool,
        deleted: bool,
    },
    Group,
    Cluster,
    Node {
        asset_id: u64,
        server_id: EntityId,
        online: bool,
        deleted: bool,
    },
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entity {
    pub(crate) id: EntityId,
    pub(crate) kind: EntityKind,
    pub(crate) name: String,
    pub(crate) state: EntityState,
    pub(crate) team_id: TeamId,
    pub(crate) parent: Option<ParentRef>,
    /// Containing repository; nil above and on floating entities below it.
    pub(crate) repository_id: EntityId,
    /// Containing bucket; nil above buckets and on floating entities.
    pub(crate) bucket_id: EntityId,
    /// Environment of the containing bucket.
    pub(crate) environment: String,
    pub(crate) children: HashMap<EntityId, EntityKind>,
    pub(crate) ordered: OrderedChildren,
    pub(crate) properties: PropertyStore,
    pub(crate) checks: CheckStore,
    /// Fault sentinel of a repository.
    pub(crate) fault: Option<EntityId>,
    pub(crate) details: Details,
}

impl Entity {
    pub(crate) fn new(id: EntityId, kind: EntityKind, name: String, team_id: TeamId, details: Details) -> Self {
        Self {
            id,
            kind,
            name,
            state: EntityState::Floating,
            team_id,
            parent: None,
            repository_id: EntityId::nil(),
            bucket_id: EntityId::nil(),
            environment: String::new(),
            children: HashMap::new(),
            ordered: OrderedChildren::default(),
            properties: PropertyStore::default(),
            checks: CheckStore::default(),
            fault: None,
            details,
        }
    }

    /// Children in attach order.
    pub(crate) fn child_ids(&self) -> Vec<EntityId> {
        self.ordered.ids()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.kind == EntityKind::Root || self.parent.is_some()
    }

    pub(crate) fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            id: self.id,
            kind: self.kind,
            repository_id: self.repository_id,
            bucket_id: self.bucket_id,
        }
    }

    /// Owned record of this entity, as carried by action payloads.
    pub(crate) fn record(&self) -> Payload {
        match &self.details {
            Details::Repository { active, deleted } => Payload::Repository(RepositoryRecord {
                id: self.id,
                name: self.name.clone(),
                team_id: self.team_id,
                state: self.state,
                active: *active,
                deleted: *deleted,
            }),
            Details::Bucket { frozen, deleted } => Payload::Bucket(BucketRecord {
                id: self.id,
                name: self.name.clone(),
                team_id: self.team_id,
                state: self.state,
                environment: self.environment.clone(),
                repository_id: self.repository_id,
                frozen: *frozen,
                deleted: *deleted,
            }),
            Details::Group => Payload::Group(GroupRecord {
                id: self.id,
                name: self.name.clone(),
                team_id: self.team_id,
                state: self.state,
                repository_id: self.repository_id,
                bucket_id: self.bucket_id,
                parent: self.parent,
            }),
            Details::Cluster => Payload::Cluster(ClusterRecord {
                id: self.id,
                name: self.name.clone(),
                team_id: self.team_id,
                state: self.state,
                repository_id: self.repository_id,
                bucket_id: self.bucket_id,
                parent: self.parent,
            }),
            Details::Node {
                asset_id,
                server_id,
                online,
                deleted,
            } => Payload::Node(NodeRecord {
                id: self.id,
                asset_id: *asset_id,
                name: self.name.clone(),
                team_id: self.team_id,
                server_id: *server_id,
                state: self.state,
                online: *online,
                deleted: *deleted,
                repository_id: self.repository_id,
                bucket_id: self.bucket_id,
                group_id: self
                    .parent
                    .filter(|p| p.kind == EntityKind::Group)
                    .map(|p| p.id),
                cluster_id: self
                    .parent
                    .filter(|p| p.kind == EntityKind::Cluster)
                    .map(|p| p.id),
            }),
            Details::Root | Details::Fault => Payload::Fault(FaultRecord {
                id: self.id,
                repository_id: self.repository_id,
            }),
        }
    }

    pub(crate) fn info(&self) -> EntityInfo {
        EntityInfo {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            state: self.state,
            team_id: self.team_id,
            parent: self.parent,
            repository_id: self.repository_id,
            bucket_id: self.bucket_id,
            environment: self.environment.clone(),
        }
    }
}

/// Read-only view of an entity returned by [`Tree`](crate::Tree) accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityInfo {
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub state: EntityState,
    pub team_id: TeamId,
    pub parent: Option<ParentRef>,
    pub repository_id: EntityId,
    pub bucket_id: EntityId,
    pub environment: String,
}
