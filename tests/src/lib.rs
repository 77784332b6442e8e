//! Shared test harness for canopy integration tests.
//!
//! Provides [`Harness`]: a tree with deterministic ordering, its drained
//! action and error channels, and builders that create and attach entities
//! from literal ids.

use canopy_tree::{
    AttachRequest, EntityInfo, ErrorRecord, Receivers, Tree, TreeConfig, channels,
};
use canopy_types::{
    Action, BucketSpec, Check, CheckInstance, ClusterSpec, EntityId, EntityKind, GroupSpec,
    NodeSpec, Property, RepositorySpec, TreeSpec,
};

pub const ROOT: &str = "3f6c1a2e-9b47-4d85-a0e1-6c2b7d9f4a10";
pub const TEAM: &str = "0b9f2c4e-7a51-4d2b-8f0e-3c6d9a1b2e47";
pub const REPOSITORY: &str = "8d3c1f0a-2b4e-4c6d-9e8f-0a1b2c3d4e5f";
pub const BUCKET: &str = "1e2d3c4b-5a69-4788-9a0b-1c2d3e4f5a6b";

/// Parse a literal id.
pub fn id(literal: &str) -> EntityId {
    literal.parse().expect("literal ids are valid")
}

/// Install a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn tree_spec() -> TreeSpec {
    TreeSpec {
        id: ROOT.to_string(),
        name: "root".to_string(),
    }
}

// =========================================================================
// Harness
// =========================================================================

pub struct Harness {
    pub tree: Tree,
    pub rx: Receivers,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// A tree with `deterministic_inheritance_order` switched on.
    pub fn new() -> Self {
        Self::with_config(TreeConfig::deterministic())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        init_tracing();
        let (sinks, rx) = channels(&config);
        let tree = Tree::new(&tree_spec(), config, sinks).unwrap();
        Self { tree, rx }
    }

    pub fn repository(&mut self, literal: &str, name: &str) -> EntityId {
        let spec = RepositorySpec {
            id: literal.to_string(),
            name: name.to_string(),
            team: TEAM.to_string(),
            deleted: false,
            active: true,
        };
        let id = self.tree.create_repository(&spec).unwrap();
        let root = self.tree.root_id();
        self.tree
            .attach(id, &AttachRequest::new(EntityKind::Root, root, "root"))
            .unwrap();
        id
    }

    pub fn bucket(&mut self, literal: &str, repository: EntityId, name: &str) -> EntityId {
        let spec = BucketSpec {
            id: literal.to_string(),
            name: name.to_string(),
            environment: "production".to_string(),
            team: TEAM.to_string(),
            repository: repository.to_string(),
            deleted: false,
            frozen: false,
        };
        let id = self.tree.create_bucket(&spec).unwrap();
        self.tree
            .attach(id, &AttachRequest::new(EntityKind::Repository, repository, ""))
            .unwrap();
        id
    }

    pub fn group(&mut self, literal: &str, parent: (EntityKind, EntityId), name: &str) -> EntityId {
        let spec = GroupSpec {
            id: literal.to_string(),
            name: name.to_string(),
            team: TEAM.to_string(),
        };
        let id = self.tree.create_group(&spec).unwrap();
        self.tree
            .attach(id, &AttachRequest::new(parent.0, parent.1, ""))
            .unwrap();
        id
    }

    pub fn cluster(&mut self, literal: &str, parent: (EntityKind, EntityId), name: &str) -> EntityId {
        let spec = ClusterSpec {
            id: literal.to_string(),
            name: name.to_string(),
            team: TEAM.to_string(),
        };
        let id = self.tree.create_cluster(&spec).unwrap();
        self.tree
            .attach(id, &AttachRequest::new(parent.0, parent.1, ""))
            .unwrap();
        id
    }

    pub fn node(&mut self, literal: &str, parent: (EntityKind, EntityId), name: &str) -> EntityId {
        let spec = NodeSpec {
            id: literal.to_string(),
            asset_id: 1,
            name: name.to_string(),
            team: TEAM.to_string(),
            server_id: "5a7d2b1e-0c4f-4f5e-9d8a-1b2c3d4e5f60".to_string(),
            online: true,
            deleted: false,
        };
        let id = self.tree.create_node(&spec).unwrap();
        self.tree
            .attach(id, &AttachRequest::new(parent.0, parent.1, ""))
            .unwrap();
        id
    }

    /// Drain queued actions.
    pub fn actions(&mut self) -> Vec<Action> {
        self.rx.drain_actions()
    }

    /// Drain queued actions as `kind.action` labels.
    pub fn labels(&mut self) -> Vec<String> {
        self.actions().iter().map(Action::label).collect()
    }

    pub fn errors(&mut self) -> Vec<ErrorRecord> {
        self.rx.drain_errors()
    }
}

// =========================================================================
// Tree views
// =========================================================================

/// Everything observable about one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub info: EntityInfo,
    pub children: Vec<EntityId>,
    pub properties: Vec<Property>,
    pub checks: Vec<Check>,
    pub instances: Vec<CheckInstance>,
}

/// Observable state of the whole tree, for deep comparisons.
pub fn view(tree: &Tree) -> Vec<EntityView> {
    tree.entities()
        .into_iter()
        .map(|info| EntityView {
            children: tree.children(info.id).unwrap(),
            properties: tree.properties(info.id).unwrap(),
            checks: tree.checks(info.id).unwrap(),
            instances: tree.instances(info.id).unwrap(),
            info,
        })
        .collect()
}

/// Check parent/child symmetry and property sourcing through the public
/// accessors.
pub fn assert_consistent(tree: &Tree) {
    for entity in tree.entities() {
        if let Some(parent) = entity.parent {
            assert!(
                tree.children(parent.id).unwrap().contains(&entity.id),
                "{} {} missing from its parent",
                entity.kind,
                entity.id
            );
        }
        for child in tree.children(entity.id).unwrap() {
            assert_eq!(
                tree.entity(child).unwrap().parent.map(|p| p.id),
                Some(entity.id)
            );
        }
        for property in tree.properties(entity.id).unwrap() {
            if property.inherited {
                let source = tree
                    .properties(property.inherited_from)
                    .unwrap()
                    .into_iter()
                    .find(|p| p.instance_id == property.source_id);
                assert!(
                    source.is_some_and(|p| !p.inherited),
                    "property {} on {} has no source",
                    property.instance_id,
                    entity.id
                );
            }
        }
        for check in tree.checks(entity.id).unwrap() {
            if !check.inherited {
                assert_eq!(check.source_id, check.id);
            }
        }
    }
}
