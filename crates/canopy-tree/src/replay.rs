//! Structure replay from an action log.
//!
//! Rebuilds repositories, buckets, groups, clusters and nodes with their
//! parents, names and teams from the structure-affecting actions of a log.
//! Property, check and check-instance actions are ignored, as are fault and
//! error-channel records: attaching a repository creates a new sentinel.

use canopy_types::{
    Action, ActionKind, BucketRecord, BucketSpec, ClusterSpec, EntityId, EntityKind, GroupSpec,
    NodeRecord, NodeSpec, ParentRef, Payload, RepositoryRecord, RepositorySpec, TeamId, TreeSpec,
};
use tracing::{debug, info};

use crate::attach::AttachRequest;
use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::sink::Sinks;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

/// Build a fresh tree from `spec` and apply `actions` in order.
///
/// The rebuilt tree emits its own actions on `sinks` as it goes.
pub fn replay(actions: &[Action], spec: &TreeSpec, config: TreeConfig, sinks: Sinks) -> Result<Tree> {
    let mut tree = Tree::new(spec, config, sinks)?;
    let mut applied = 0usize;
    for action in actions {
        if tree.apply(action)? {
            applied += 1;
        }
    }
    info!(applied, total = actions.len(), "replay finished");
    Ok(tree)
}

impl Tree {
    /// Apply one logged action. Returns whether it changed the structure.
    fn apply(&mut self, action: &Action) -> Result<bool> {
        match (action.action, &action.payload) {
            (ActionKind::Create, Payload::Repository(record)) => self.replay_repository(record),
            (ActionKind::Create, Payload::Bucket(record)) => self.replay_bucket(record),
            (ActionKind::Create, Payload::Group(record)) => {
                let spec = GroupSpec {
                    id: record.id.to_string(),
                    name: record.name.clone(),
                    team: record.team_id.to_string(),
                };
                self.create_group(&spec)?;
                self.replay_parent(record.id, record.parent)
            }
            (ActionKind::Create, Payload::Cluster(record)) => {
                let spec = ClusterSpec {
                    id: record.id.to_string(),
                    name: record.name.clone(),
                    team: record.team_id.to_string(),
                };
                self.create_cluster(&spec)?;
                self.replay_parent(record.id, record.parent)
            }
            (ActionKind::Update, Payload::Node(record)) => self.replay_node(record),
            (ActionKind::Update, Payload::Group(record)) => self.replay_parent(record.id, record.parent),
            (ActionKind::Update, Payload::Cluster(record)) => {
                self.replay_parent(record.id, record.parent)
            }
            (ActionKind::Delete, payload) if !matches!(payload, Payload::Fault(_)) => {
                let id = payload.entity_id();
                if !self.contains(id) {
                    return Ok(false);
                }
                self.destroy(id)?;
                Ok(true)
            }
            (ActionKind::Rename, payload) => {
                let Some((id, name)) = entity_name(payload) else {
                    return Ok(false);
                };
                self.set_name(id, name)?;
                Ok(true)
            }
            (ActionKind::Repossess, payload) => {
                let Some(team) = entity_team(payload) else {
                    return Ok(false);
                };
                self.set_team(payload.entity_id(), team)?;
                Ok(true)
            }
            _ => {
                debug!(action = %action.label(), "replay skipped");
                Ok(false)
            }
        }
    }

    fn replay_repository(&mut self, record: &RepositoryRecord) -> Result<bool> {
        let spec = RepositorySpec {
            id: record.id.to_string(),
            name: record.name.clone(),
            team: record.team_id.to_string(),
            deleted: record.deleted,
            active: record.active,
        };
        let id = self.create_repository(&spec)?;
        let root = self.root;
        self.attach(id, &AttachRequest::new(EntityKind::Root, root, ""))?;
        Ok(true)
    }

    fn replay_bucket(&mut self, record: &BucketRecord) -> Result<bool> {
        let spec = BucketSpec {
            id: record.id.to_string(),
            name: record.name.clone(),
            environment: record.environment.clone(),
            team: record.team_id.to_string(),
            repository: record.repository_id.to_string(),
            deleted: record.deleted,
            frozen: record.frozen,
        };
        let id = self.create_bucket(&spec)?;
        self.attach(
            id,
            &AttachRequest::new(EntityKind::Repository, record.repository_id, ""),
        )?;
        Ok(true)
    }

    fn replay_node(&mut self, record: &NodeRecord) -> Result<bool> {
        if !self.contains(record.id) {
            let spec = NodeSpec {
                id: record.id.to_string(),
                asset_id: record.asset_id,
                name: record.name.clone(),
                team: record.team_id.to_string(),
                server_id: record.server_id.to_string(),
                online: record.online,
                deleted: record.deleted,
            };
            self.create_node(&spec)?;
        }
        let parent = match (record.cluster_id, record.group_id) {
            (Some(id), _) => ParentRef {
                kind: EntityKind::Cluster,
                id,
            },
            (None, Some(id)) => ParentRef {
                kind: EntityKind::Group,
                id,
            },
            (None, None) => ParentRef {
                kind: EntityKind::Bucket,
                id: record.bucket_id,
            },
        };
        self.replay_parent(record.id, Some(parent))
    }

    /// Attach `id` below `parent`, or move it there if it sits elsewhere.
    fn replay_parent(&mut self, id: EntityId, parent: Option<ParentRef>) -> Result<bool> {
        let Some(parent) = parent else {
            let kind = self.arena.read(id)?.kind;
            return Err(TreeError::NotAttached { id, kind });
        };
        let current = self.arena.read(id)?.parent;
        let request = AttachRequest::new(parent.kind, parent.id, "");
        match current {
            None => self.attach(id, &request)?,
            Some(existing) if existing.id == parent.id => return Ok(false),
            Some(_) => self.reattach(id, &request)?,
        }
        Ok(true)
    }
}

fn entity_name(payload: &Payload) -> Option<(EntityId, &str)> {
    match payload {
        Payload::Repository(r) => Some((r.id, r.name.as_str())),
        Payload::Bucket(r) => Some((r.id, r.name.as_str())),
        Payload::Group(r) => Some((r.id, r.name.as_str())),
        Payload::Cluster(r) => Some((r.id, r.name.as_str())),
        Payload::Node(r) => Some((r.id, r.name.as_str())),
        _ => None,
    }
}

fn entity_team(payload: &Payload) -> Option<TeamId> {
    match payload {
        Payload::Repository(r) => Some(r.team_id),
        Payload::Bucket(r) => Some(r.team_id),
        Payload::Group(r) => Some(r.team_id),
        Payload::Cluster(r) => Some(r.team_id),
        Payload::Node(r) => Some(r.team_id),
        _ => None,
    }
}
