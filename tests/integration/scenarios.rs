//! End-to-end scenarios driven through the public tree API.
//!
//! Every entity is created from a literal id so action payloads and check
//! instance hashes are reproducible between runs.

use canopy_integration_tests::{BUCKET, Harness, REPOSITORY, id};
use canopy_types::{
    Check, CheckId, CheckInstance, CheckItem, ConfigId, Constraint, ConstraintKind,
    EntityId, EntityKind, EntityState, InstanceId, Payload, Property, ServiceAttribute, TeamId,
    keys,
};

const CLUSTER: &str = "2c4e6a8b-0d1f-4a3c-9e5b-7d9f1a3c5e7b";
const GROUP: &str = "4b6d8f0a-2c4e-4f6a-8b0d-2f4a6c8e0b2d";
const NESTED: &str = "6e8a0c2e-4a6c-4e8a-9c2e-4b6d8f0a2c4e";
const NODES: [&str; 4] = [
    "7a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d",
    "7b2c3d4e-5f6a-4b7c-9d8e-0f1a2b3c4d5e",
    "7c3d4e5f-6a7b-4c8d-8e9f-1a2b3c4d5e6f",
    "7d4e5f6a-7b8c-4d9e-9f0a-2b3c4d5e6f7a",
];

const CONFIG: &str = "9a0b1c2d-3e4f-4a5b-8c6d-7e8f9a0b1c2d";
const CAPABILITY: &str = "9b1c2d3e-4f5a-4b6c-9d7e-8f9a0b1c2d3e";
const NODE_CHECKS: [&str; 2] = [
    "9c2d3e4f-5a6b-4c7d-8e8f-9a0b1c2d3e4f",
    "9d3e4f5a-6b7c-4d8e-9f9a-0b1c2d3e4f5a",
];

fn http(ports: &[&str]) -> Property {
    Property::service(
        "http",
        ports
            .iter()
            .map(|port| ServiceAttribute::new("port", *port))
            .collect(),
    )
}

/// A check bound to the `http` service with any `port` attribute.
fn http_check() -> Check {
    Check::new(
        CONFIG.parse().unwrap(),
        CAPABILITY.parse().unwrap(),
        60,
    )
    .with_constraint(Constraint::new(ConstraintKind::Service, "name", "http"))
    .with_constraint(Constraint::new(ConstraintKind::Attribute, "port", keys::DEFINED))
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[test]
fn test_attach_bucket_under_repository() {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");

    assert_eq!(
        h.labels(),
        vec![
            "repository.create",
            "fault.create",
            "errorchannel.attached",
            "bucket.create"
        ]
    );
    let info = h.tree.entity(bucket).unwrap();
    assert_eq!(info.parent.map(|p| p.id), Some(repo));
    assert_eq!(info.parent.map(|p| p.kind), Some(EntityKind::Repository));
    assert_eq!(repo, id(REPOSITORY));
    assert!(h.errors().is_empty());
}

#[test]
fn test_move_node_from_bucket_to_cluster() {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let node = h.node(NODES[0], (EntityKind::Bucket, bucket), "node");
    let cluster = h.cluster(CLUSTER, (EntityKind::Bucket, bucket), "cluster");
    h.tree
        .reattach(
            node,
            &canopy_tree::AttachRequest::new(EntityKind::Cluster, cluster, "cluster"),
        )
        .unwrap();

    let actions = h.actions();
    assert_eq!(actions.len(), 9);
    let last = actions.last().unwrap();
    assert_eq!(last.label(), "node.update");
    match &last.payload {
        Payload::Node(record) => {
            assert_eq!(record.id, node);
            assert_eq!(record.bucket_id, bucket);
            assert_eq!(record.cluster_id, Some(cluster));
            assert_eq!(record.state, EntityState::Clustered);
        }
        other => panic!("unexpected payload {other:?}"),
    }
    canopy_integration_tests::assert_consistent(&h.tree);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn test_override_then_delete_restores_repository_value() {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let group = h.group(GROUP, (EntityKind::Bucket, bucket), "group");
    let nodes: Vec<EntityId> = NODES[..2]
        .iter()
        .map(|literal| h.node(literal, (EntityKind::Group, group), literal))
        .collect();

    let a = h
        .tree
        .set_property(repo, Property::system("testkey", "A").with_view("testview"))
        .unwrap();
    let b = h
        .tree
        .set_property(group, Property::system("testkey", "B").with_view("testview"))
        .unwrap();
    for node in &nodes {
        let properties = h.tree.properties(*node).unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].value(), "B");
        assert_eq!(properties[0].source_id, b);
    }

    h.tree.delete_property(group, b).unwrap();
    for node in &nodes {
        let properties = h.tree.properties(*node).unwrap();
        assert_eq!(properties.len(), 1, "node {node} lost its property");
        assert_eq!(properties[0].value(), "A");
        assert_eq!(properties[0].source_id, a);
        assert_eq!(properties[0].inherited_from, repo);
    }
    canopy_integration_tests::assert_consistent(&h.tree);
    assert!(h.errors().is_empty());
}

/// Builds the service/attribute tree and returns its two nodes.
fn service_tree(h: &mut Harness) -> [EntityId; 2] {
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let nodes = [
        h.node(NODES[0], (EntityKind::Bucket, bucket), "first"),
        h.node(NODES[1], (EntityKind::Bucket, bucket), "second"),
    ];
    let mut check = http_check();
    for (node, item) in nodes.iter().zip(NODE_CHECKS) {
        check = check.with_item(CheckItem {
            object_id: *node,
            object_type: EntityKind::Node,
            item_id: item.parse().unwrap(),
        });
    }
    h.tree.set_check(repo, check).unwrap();
    for node in nodes {
        h.tree.set_property(node, http(&["80", "443"])).unwrap();
    }
    nodes
}

fn hashes(h: &Harness, node: EntityId) -> Vec<(String, String, String)> {
    let mut hashes: Vec<_> = h
        .tree
        .instances(node)
        .unwrap()
        .into_iter()
        .map(|ci| {
            (
                ci.constraint_hash,
                ci.constraint_val_hash,
                ci.instance_svc_cfg_hash,
            )
        })
        .collect();
    hashes.sort();
    hashes
}

#[test]
fn test_service_attribute_instances_are_deterministic() {
    let mut first = Harness::new();
    let nodes = service_tree(&mut first);
    first.tree.compute_check_instances();

    for (node, item) in nodes.iter().zip(NODE_CHECKS) {
        let instances = first.tree.instances(*node).unwrap();
        assert_eq!(instances.len(), 2);
        let check: CheckId = item.parse().unwrap();
        assert!(instances.iter().all(|ci| ci.check_id == check));
        let mut ports: Vec<String> = instances
            .iter()
            .map(|ci| ci.instance_service_config["port"].clone())
            .collect();
        ports.sort();
        assert_eq!(ports, vec!["443", "80"]);
    }

    let mut second = Harness::new();
    assert_eq!(service_tree(&mut second), nodes);
    second.tree.compute_check_instances();
    for node in nodes {
        assert_eq!(hashes(&first, node), hashes(&second, node));
    }
}

// ---------------------------------------------------------------------------
// Startup matching
// ---------------------------------------------------------------------------

fn persisted_instance(h: &mut Harness, node: EntityId) -> CheckInstance {
    h.tree.begin();
    h.tree.compute_check_instances();
    let mut instance = h.tree.instances(node).unwrap().remove(0);
    h.tree.rollback().unwrap();
    instance.instance_id = "5e1f2a3b-4c5d-4e6f-8a7b-9c0d1e2f3a4b".parse().unwrap();
    instance.instance_config_id = "5f2a3b4c-5d6e-4f7a-9b8c-0d1e2f3a4b5c".parse().unwrap();
    instance.version = 3;
    instance
}

#[test]
fn test_startup_match_adopts_loaded_identity() {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let node = h.node(NODES[0], (EntityKind::Bucket, bucket), "node");
    h.tree.set_check(repo, http_check()).unwrap();
    h.tree.set_property(node, http(&["80"])).unwrap();
    let persisted = persisted_instance(&mut h, node);
    h.actions();

    // First startup: the loaded instance matches.
    h.tree.begin();
    h.tree.load_instance(node, persisted.clone()).unwrap();
    h.tree.compute_check_instances();
    let instances = h.tree.instances(node).unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id, persisted.instance_id);
    assert_eq!(instances[0].version, persisted.version);
    assert!(h.tree.loaded_instances(node).unwrap().is_empty());
    assert!(h.actions().is_empty());
    assert!(h.errors().is_empty());
    h.tree.rollback().unwrap();

    // Second startup: an extra persisted instance matches nothing.
    let mut extra = persisted.clone();
    extra.instance_id = InstanceId::generate();
    extra.instance_config_id = ConfigId::generate();
    extra
        .instance_service_config
        .insert("port".to_string(), "8080".to_string());
    extra.calculate_hashes();
    h.tree.load_instance(node, persisted.clone()).unwrap();
    h.tree.load_instance(node, extra.clone()).unwrap();
    h.tree.compute_check_instances();

    let instances = h.tree.instances(node).unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id, persisted.instance_id);
    assert!(h.tree.loaded_instances(node).unwrap().is_empty());
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action, "check_instance.match");
    assert_eq!(
        errors[0].error,
        canopy_tree::TreeError::LeftoverLoadedInstance {
            id: node,
            check: persisted.check_id,
            instance: extra.instance_id,
        }
    );
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[test]
fn test_repossess_repository_leaves_first() {
    let mut h = Harness::new();
    let repo = h.repository(REPOSITORY, "repo");
    let bucket = h.bucket(BUCKET, repo, "bucket");
    let group = h.group(GROUP, (EntityKind::Bucket, bucket), "group");
    let nested = h.group(NESTED, (EntityKind::Group, group), "nested");
    let cluster = h.cluster(CLUSTER, (EntityKind::Group, group), "cluster");
    let loose = h.node(NODES[0], (EntityKind::Bucket, bucket), "loose");
    let grouped = h.node(NODES[1], (EntityKind::Group, group), "grouped");
    let deep = h.node(NODES[2], (EntityKind::Group, nested), "deep");
    let clustered = h.node(NODES[3], (EntityKind::Cluster, cluster), "clustered");
    h.actions();

    let team: TeamId = "0c1d2e3f-4a5b-4c6d-8e7f-9a0b1c2d3e4f".parse().unwrap();
    h.tree.repossess(repo, team).unwrap();

    let actions = h.actions();
    assert!(actions.iter().all(|a| a.action.as_str() == "repossess"));
    let order: Vec<EntityId> = actions.iter().map(|a| a.payload.entity_id()).collect();
    assert_eq!(
        order,
        vec![deep, nested, clustered, cluster, grouped, group, loose, bucket, repo]
    );
    for entity in h.tree.entities() {
        if entity.kind != EntityKind::Root && entity.kind != EntityKind::Fault {
            assert_eq!(entity.team_id, team, "{} {}", entity.kind, entity.id);
        }
    }
    assert!(h.errors().is_empty());
}
