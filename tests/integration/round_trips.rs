//! Snapshot rollback and action-log replay.

use canopy_integration_tests::{BUCKET, Harness, REPOSITORY, tree_spec, view};
use canopy_tree::{AttachRequest, TreeConfig, TreeError, channels, replay};
use canopy_types::{CapabilityId, Check, ConfigId, EntityKind, Property, TeamId};

const GROUP: &str = "4b6d8f0a-2c4e-4f6a-8b0d-2f4a6c8e0b2d";
const CLUSTER: &str = "2c4e6a8b-0d1f-4a3c-9e5b-7d9f1a3c5e7b";
const NODE: &str = "7a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";
const MEMBER: &str = "7b2c3d4e-5f6a-4b7c-9d8e-0f1a2b3c4d5e";

fn populated() -> Harness {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let group = h.group(GROUP, (EntityKind::Bucket, bucket), "group");
    let cluster = h.cluster(CLUSTER, (EntityKind::Group, group), "cluster");
    h.node(NODE, (EntityKind::Bucket, bucket), "node");
    h.node(MEMBER, (EntityKind::Cluster, cluster), "member");
    h.tree
        .set_property(repo, Property::system("location", "dc1"))
        .unwrap();
    h.tree
        .set_check(
            bucket,
            Check::new(ConfigId::generate(), CapabilityId::generate(), 30),
        )
        .unwrap();
    h.tree.compute_check_instances();
    h.actions();
    h
}

#[test]
fn test_rollback_restores_every_entity() {
    let mut h = populated();
    let before = view(&h.tree);
    let repo = before
        .iter()
        .find(|e| e.info.kind == EntityKind::Repository)
        .map(|e| e.info.id)
        .unwrap();
    let group = GROUP.parse().unwrap();
    let node = NODE.parse().unwrap();

    h.tree.begin();
    assert!(h.tree.in_transaction());
    h.tree
        .reattach(node, &AttachRequest::new(EntityKind::Group, group, "group"))
        .unwrap();
    h.tree
        .set_property(group, Property::system("tier", "web"))
        .unwrap();
    h.tree.repossess(repo, TeamId::generate()).unwrap();
    h.tree.compute_check_instances();
    assert_ne!(view(&h.tree), before);

    h.tree.rollback().unwrap();
    assert!(!h.tree.in_transaction());
    assert_eq!(view(&h.tree), before);
    assert_eq!(h.tree.rollback(), Err(TreeError::NoTransaction));
    canopy_integration_tests::assert_consistent(&h.tree);
}

#[test]
fn test_commit_keeps_changes() {
    let mut h = populated();
    let group = GROUP.parse().unwrap();

    h.tree.begin();
    h.tree.set_name(group, "frontend").unwrap();
    h.tree.commit().unwrap();
    assert_eq!(h.tree.entity(group).unwrap().name, "frontend");
    assert_eq!(h.tree.commit(), Err(TreeError::NoTransaction));
}

#[test]
fn test_replay_rebuilds_structure() {
    let mut h = Harness::new();
    let mut log = Vec::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let group = h.group(GROUP, (EntityKind::Bucket, bucket), "group");
    let cluster = h.cluster(CLUSTER, (EntityKind::Bucket, bucket), "cluster");
    let node = h.node(NODE, (EntityKind::Group, group), "node");
    let member = h.node(MEMBER, (EntityKind::Cluster, cluster), "member");
    log.extend(h.actions());

    h.tree
        .set_property(bucket, Property::system("location", "dc1"))
        .unwrap();
    h.tree
        .reattach(cluster, &AttachRequest::new(EntityKind::Group, group, ""))
        .unwrap();
    h.tree.detach(node).unwrap();
    h.tree.set_name(group, "frontend").unwrap();
    h.tree.destroy(member).unwrap();
    log.extend(h.actions());

    let config = TreeConfig::deterministic();
    let (sinks, _rx) = channels(&config);
    let rebuilt = replay(&log, &tree_spec(), config, sinks).unwrap();
    assert_eq!(rebuilt.structure(), h.tree.structure());
    assert!(!rebuilt.contains(member));
    assert_eq!(rebuilt.children(group).unwrap(), vec![cluster]);
    assert_eq!(rebuilt.entity(node).unwrap().parent.map(|p| p.id), Some(bucket));
    canopy_integration_tests::assert_consistent(&rebuilt);
}
