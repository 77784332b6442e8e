//! Tests for the tree engine.


use std::collections::HashSet;

use canopy_types::{
    Action, BucketSpec, ClusterSpec, EntityId, EntityKind, GroupSpec, NodeSpec, RepositorySpec,
    TeamId, TreeSpec,
};

use crate::attach::AttachRequest;
use crate::config::TreeConfig;
use crate::sink::{Receivers, channels};
use crate::tree::Tree;

const ROOT_ID: &str = "3f6c1a2e-9b47-4d85-a0e1-6c2b7d9f4a10";
const TEAM_ID: &str = "0b9f2c4e-7a51-4d2b-8f0e-3c6d9a1b2e47";

fn team() -> TeamId {
    TEAM_ID.parse().unwrap()
}

fn tree_spec() -> TreeSpec {
    TreeSpec {
        id: ROOT_ID.to_string(),
        name: "root".to_string(),
    }
}

/// Create a tree with deterministic ordering and drained-on-demand channels.
fn test_tree() -> (Tree, Receivers) {
    let config = TreeConfig::deterministic();
    let (sinks, receivers) = channels(&config);
    let tree = Tree::new(&tree_spec(), config, sinks).unwrap();
    (tree, receivers)
}

/// Create a tree that fans out across threads.
fn parallel_tree() -> (Tree, Receivers) {
    let config = TreeConfig::default();
    let (sinks, receivers) = channels(&config);
    let tree = Tree::new(&tree_spec(), config, sinks).unwrap();
    (tree, receivers)
}

fn repository_spec(id: EntityId, name: &str) -> RepositorySpec {
    RepositorySpec {
        id: id.to_string(),
        name: name.to_string(),
        team: TEAM_ID.to_string(),
        deleted: false,
        active: true,
    }
}

fn bucket_spec(id: EntityId, repository: EntityId, name: &str) -> BucketSpec {
    BucketSpec {
        id: id.to_string(),
        name: name.to_string(),
        environment: "production".to_string(),
        team: TEAM_ID.to_string(),
        repository: repository.to_string(),
        deleted: false,
        frozen: false,
    }
}

fn node_spec(id: EntityId, name: &str) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        asset_id: 42,
        name: name.to_string(),
        team: TEAM_ID.to_string(),
        server_id: EntityId::generate().to_string(),
        online: true,
        deleted: false,
    }
}

/// Create a repository and attach it to the root.
fn add_repository(tree: &mut Tree, name: &str) -> EntityId {
    let id = tree
        .create_repository(&repository_spec(EntityId::generate(), name))
        .unwrap();
    let root = tree.root_id();
    tree.attach(id, &AttachRequest::new(EntityKind::Root, root, ""))
        .unwrap();
    id
}

fn add_bucket(tree: &mut Tree, repository: EntityId, name: &str) -> EntityId {
    let id = tree
        .create_bucket(&bucket_spec(EntityId::generate(), repository, name))
        .unwrap();
    tree.attach(id, &AttachRequest::new(EntityKind::Repository, repository, ""))
        .unwrap();
    id
}

fn add_group(tree: &mut Tree, parent_kind: EntityKind, parent: EntityId, name: &str) -> EntityId {
    let spec = GroupSpec {
        id: EntityId::generate().to_string(),
        name: name.to_string(),
        team: TEAM_ID.to_string(),
    };
    let id = tree.create_group(&spec).unwrap();
    tree.attach(id, &AttachRequest::new(parent_kind, parent, ""))
        .unwrap();
    id
}

fn add_cluster(tree: &mut Tree, parent_kind: EntityKind, parent: EntityId, name: &str) -> EntityId {
    let spec = ClusterSpec {
        id: EntityId::generate().to_string(),
        name: name.to_string(),
        team: TEAM_ID.to_string(),
    };
    let id = tree.create_cluster(&spec).unwrap();
    tree.attach(id, &AttachRequest::new(parent_kind, parent, ""))
        .unwrap();
    id
}

fn add_node(tree: &mut Tree, parent_kind: EntityKind, parent: EntityId, name: &str) -> EntityId {
    let id = tree
        .create_node(&node_spec(EntityId::generate(), name))
        .unwrap();
    tree.attach(id, &AttachRequest::new(parent_kind, parent, ""))
        .unwrap();
    id
}

/// Repository, bucket and one node directly below the bucket.
fn small_tree(tree: &mut Tree) -> (EntityId, EntityId, EntityId) {
    let repo = add_repository(tree, "repo");
    let bucket = add_bucket(tree, repo, "bucket");
    let node = add_node(tree, EntityKind::Bucket, bucket, "node");
    (repo, bucket, node)
}

/// `kind.action` labels of `actions`, in order.
fn labels(actions: &[Action]) -> Vec<String> {
    actions.iter().map(Action::label).collect()
}

/// Check the structural and inheritance invariants on every entity.
fn assert_invariants(tree: &Tree) {
    let mut sources = HashSet::new();
    for id in tree.arena.ids() {
        let entity = tree.arena.read(id).unwrap();

        if let Some(parent) = entity.parent {
            let parent = tree.arena.read(parent.id).unwrap();
            assert_eq!(parent.children.get(&id), Some(&entity.kind));
        }
        assert_eq!(entity.children.len(), entity.ordered.len());

        for property in entity.properties.iter() {
            if property.inherited {
                assert!(
                    has_source_above(tree, id, property.source_id),
                    "inherited property {} on {id} has no source above",
                    property.instance_id
                );
            } else {
                assert!(sources.insert(property.instance_id));
            }
        }

        for check in entity.checks.checks.values() {
            if !check.inherited {
                assert_eq!(check.source_id, check.id);
            }
        }
        for (check, instances) in &entity.checks.check_instances {
            let count = entity
                .checks
                .instances
                .values()
                .filter(|ci| ci.check_id == *check)
                .count();
            assert_eq!(instances.len(), count);
        }
    }
}

fn has_source_above(tree: &Tree, id: EntityId, source_id: canopy_types::PropertyId) -> bool {
    let mut cursor = tree.arena.read(id).unwrap().parent;
    while let Some(parent) = cursor {
        let entity = tree.arena.read(parent.id).unwrap();
        if entity
            .properties
            .by_source(source_id)
            .is_some_and(|p| !p.inherited)
        {
            return true;
        }
        cursor = entity.parent;
    }
    false
}
