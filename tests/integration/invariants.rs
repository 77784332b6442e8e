//! Tree-wide invariants under a mixed sequence of operations.

use std::collections::HashSet;

use canopy_integration_tests::{Harness, assert_consistent};
use canopy_tree::{AttachRequest, TreeConfig};
use canopy_types::{
    ActionKind, CapabilityId, Check, ConfigId, EntityId, EntityKind, Property, ServiceAttribute,
};

fn literal(prefix: u32, index: u32) -> String {
    format!("{prefix:08x}-0000-4000-8000-{index:012x}")
}

/// Two repositories, each with two buckets holding groups, clusters and
/// nodes, configured and computed.
fn build(h: &mut Harness) -> Vec<EntityId> {
    let mut nodes = Vec::new();
    for r in 0..2 {
        let repo = h.repository(&literal(1, r), &format!("repo-{r}"));
        h.tree
            .set_property(repo, Property::system("location", format!("dc{r}")))
            .unwrap();
        h.tree
            .set_check(
                repo,
                Check::new(ConfigId::generate(), CapabilityId::generate(), 60),
            )
            .unwrap();
        for b in 0..2 {
            let index = r * 2 + b;
            let bucket = h.bucket(&literal(2, index), repo, &format!("bucket-{index}"));
            let group = h.group(&literal(3, index), (EntityKind::Bucket, bucket), "web");
            let cluster = h.cluster(&literal(4, index), (EntityKind::Group, group), "db");
            for n in 0..3 {
                let parent = match n {
                    0 => (EntityKind::Bucket, bucket),
                    1 => (EntityKind::Group, group),
                    _ => (EntityKind::Cluster, cluster),
                };
                let node = h.node(&literal(5, index * 3 + n), parent, &format!("node-{n}"));
                h.tree
                    .set_property(
                        node,
                        Property::service("http", vec![ServiceAttribute::new("port", "80")]),
                    )
                    .unwrap();
                nodes.push(node);
            }
        }
    }
    h.tree.compute_check_instances();
    nodes
}

fn shuffle(h: &mut Harness, nodes: &[EntityId]) {
    for node in nodes {
        let info = h.tree.entity(*node).unwrap();
        match info.parent.map(|p| p.kind) {
            Some(EntityKind::Cluster) => h.tree.detach(*node).unwrap(),
            Some(EntityKind::Bucket) => {
                let group = h
                    .tree
                    .children(info.bucket_id)
                    .unwrap()
                    .into_iter()
                    .find(|c| h.tree.entity(*c).unwrap().kind == EntityKind::Group)
                    .unwrap();
                h.tree
                    .reattach(*node, &AttachRequest::new(EntityKind::Group, group, "web"))
                    .unwrap();
            }
            _ => {}
        }
    }
    h.tree.compute_check_instances();
}

#[test]
fn test_structure_stays_consistent() {
    let mut h = Harness::new();
    let nodes = build(&mut h);
    assert_consistent(&h.tree);

    shuffle(&mut h, &nodes);
    assert_consistent(&h.tree);
    for node in &nodes {
        let properties = h.tree.properties(*node).unwrap();
        assert_eq!(properties.iter().filter(|p| p.key() == "location").count(), 1);
        assert_eq!(h.tree.instances(*node).unwrap().len(), 1);
    }
    assert!(h.errors().is_empty());
}

#[test]
fn test_parallel_and_sequential_fan_out_agree() {
    let mut sequential = Harness::new();
    let mut parallel = Harness::with_config(TreeConfig::default());
    let nodes = build(&mut sequential);
    assert_eq!(build(&mut parallel), nodes);

    for node in &nodes {
        let left = sequential.tree.instances(*node).unwrap();
        let right = parallel.tree.instances(*node).unwrap();
        assert_eq!(left.len(), right.len());
        let keys = |instances: &[canopy_types::CheckInstance]| {
            let mut keys: Vec<_> = instances
                .iter()
                .map(|ci| ci.legacy.constraint_hash.clone())
                .collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&left), keys(&right));
    }
    assert_consistent(&parallel.tree);
}

#[test]
fn test_destroy_deletes_each_entity_once() {
    let mut h = Harness::new();
    build(&mut h);
    h.actions();

    let repositories = h.tree.children(h.tree.root_id()).unwrap();
    for repo in repositories {
        h.tree.destroy(repo).unwrap();
    }

    let mut deleted = HashSet::new();
    for action in h.actions() {
        if action.action == ActionKind::Delete {
            assert!(
                deleted.insert(action.payload.entity_id()),
                "{} deleted twice",
                action.label()
            );
        }
    }
    // Two repositories, four buckets, groups and clusters, twelve nodes.
    assert_eq!(deleted.len(), 2 + 4 * 3 + 12);
    assert!(h.tree.is_empty());
    assert!(h.tree.children(h.tree.root_id()).unwrap().is_empty());
    assert!(h.errors().is_empty());
}
