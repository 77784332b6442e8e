//! Action records emitted on the action channel.
//!
//! Consumers persist these as the authoritative change log. Every record is
//! owned: it carries a snapshot of the entity (or of the property, check or
//! check instance and the object holding it) at emission time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    Check, CheckInstance, EntityId, EntityKind, EntityState, Property, TeamId,
};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Rename,
    Repossess,
    MemberNew,
    MemberRemoved,
    NodeAssignment,
    PropertyNew,
    PropertyUpdate,
    PropertyDelete,
    CheckNew,
    CheckRemoved,
    CheckInstanceCreate,
    CheckInstanceUpdate,
    CheckInstanceDelete,
    /// Fault sentinel wired as a repository's error channel.
    Attached,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Repossess => "repossess",
            Self::MemberNew => "member_new",
            Self::MemberRemoved => "member_removed",
            Self::NodeAssignment => "node_assignment",
            Self::PropertyNew => "property_new",
            Self::PropertyUpdate => "property_update",
            Self::PropertyDelete => "property_delete",
            Self::CheckNew => "check_new",
            Self::CheckRemoved => "check_removed",
            Self::CheckInstanceCreate => "check_instance_create",
            Self::CheckInstanceUpdate => "check_instance_update",
            Self::CheckInstanceDelete => "check_instance_delete",
            Self::Attached => "attached",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: EntityId,
    pub name: String,
    pub team_id: TeamId,
    pub state: EntityState,
    pub active: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub id: EntityId,
    pub name: String,
    pub team_id: TeamId,
    pub state: EntityState,
    pub environment: String,
    pub repository_id: EntityId,
    pub frozen: bool,
    pub deleted: bool,
}

/// Reference to the parent of a group, cluster or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: EntityId,
    pub name: String,
    pub team_id: TeamId,
    pub state: EntityState,
    pub repository_id: EntityId,
    pub bucket_id: EntityId,
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: EntityId,
    pub name: String,
    pub team_id: TeamId,
    pub state: EntityState,
    pub repository_id: EntityId,
    pub bucket_id: EntityId,
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: EntityId,
    pub asset_id: u64,
    pub name: String,
    pub team_id: TeamId,
    pub server_id: EntityId,
    pub state: EntityState,
    pub online: bool,
    pub deleted: bool,
    pub repository_id: EntityId,
    pub bucket_id: EntityId,
    pub group_id: Option<EntityId>,
    pub cluster_id: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: EntityId,
    pub repository_id: EntityId,
}

/// The object a property, check or check instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: EntityId,
    pub kind: EntityKind,
    pub repository_id: EntityId,
    pub bucket_id: EntityId,
}

/// Typed payload of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Repository(RepositoryRecord),
    Bucket(BucketRecord),
    Group(GroupRecord),
    Cluster(ClusterRecord),
    Node(NodeRecord),
    Fault(FaultRecord),
    Property { object: ObjectRef, property: Property },
    Check { object: ObjectRef, check: Check },
    CheckInstance { object: ObjectRef, instance: CheckInstance },
}

impl Payload {
    /// Id of the entity the payload describes or belongs to.
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::Repository(r) => r.id,
            Self::Bucket(r) => r.id,
            Self::Group(r) => r.id,
            Self::Cluster(r) => r.id,
            Self::Node(r) => r.id,
            Self::Fault(r) => r.id,
            Self::Property { object, .. }
            | Self::Check { object, .. }
            | Self::CheckInstance { object, .. } => object.id,
        }
    }
}

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action: ActionKind,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub payload: Payload,
    /// The member added or removed, for `member_new`, `member_removed` and
    /// `node_assignment`.
    pub member: Option<ObjectRef>,
}

impl Action {
    pub fn new(action: ActionKind, kind: EntityKind, payload: Payload) -> Self {
        Self {
            action,
            kind,
            payload,
            member: None,
        }
    }

    pub fn with_member(mut self, member: ObjectRef) -> Self {
        self.member = Some(member);
        self
    }

    /// `kind.action`, e.g. `bucket.create`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.kind, self.action)
    }
}
