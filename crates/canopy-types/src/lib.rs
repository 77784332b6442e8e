//! Shared types and identifiers for the canopy configuration tree.
//!
//! This crate defines the data that flows in and out of the tree engine:
//! identifiers ([`EntityId`], [`PropertyId`], [`CheckId`], [`InstanceId`]),
//! entity classification ([`EntityKind`], [`EntityState`]), constructor specs
//! ([`RepositorySpec`], [`BucketSpec`], ...), configuration records
//! ([`Property`], [`Check`], [`CheckInstance`]) and the outbound [`Action`]
//! stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod action;
mod check;
mod error;
mod instance;
mod property;
mod spec;

pub use action::{
    Action, ActionKind, BucketRecord, ClusterRecord, FaultRecord, GroupRecord, NodeRecord,
    ObjectRef, ParentRef, Payload, RepositoryRecord,
};
pub use check::{Check, CheckItem, Constraint, ConstraintKind, Threshold};
pub use error::SpecError;
pub use instance::{CheckInstance, LegacyHashes};
pub use property::{Property, PropertyKind, PropertyValue, ServiceAttribute};
pub use spec::{BucketSpec, ClusterSpec, GroupSpec, NodeSpec, RepositorySpec, TreeSpec};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random (v4) identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// The all-zero identifier, used as "not yet assigned".
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the nil identifier.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Return the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a tree entity (root, repository, bucket, group, cluster,
    /// node or fault sentinel). Assigned at creation, never regenerated.
    EntityId
);

define_id!(
    /// Identifier of the team owning an entity.
    TeamId
);

define_id!(
    /// Identifier of a property instance; also used for property source ids.
    PropertyId
);

define_id!(
    /// Identifier of a check on one object; also used for check source ids.
    CheckId
);

define_id!(
    /// Stable identifier of a check instance across its versions.
    InstanceId
);

define_id!(
    /// Identifier of a check configuration or of one check-instance version.
    ConfigId
);

define_id!(
    /// Identifier of a monitoring capability.
    CapabilityId
);

// ---------------------------------------------------------------------------
// Entity classification
// ---------------------------------------------------------------------------

/// Kind of a tree entity.
///
/// `ErrorChannel` never lives in the tree; it only labels the action emitted
/// when a fault sentinel is wired to a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Root,
    Repository,
    Bucket,
    Group,
    Cluster,
    Node,
    Fault,
    ErrorChannel,
}

impl EntityKind {
    /// Stable lowercase name, as used in action records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Repository => "repository",
            Self::Bucket => "bucket",
            Self::Group => "group",
            Self::Cluster => "cluster",
            Self::Node => "node",
            Self::Fault => "fault",
            Self::ErrorChannel => "errorchannel",
        }
    }

    /// Whether entities of this kind carry check instances.
    pub fn computes_instances(&self) -> bool {
        matches!(self, Self::Group | Self::Cluster | Self::Node)
    }

    /// Parent kinds an entity of this kind may be attached to.
    pub fn allowed_parents(&self) -> &'static [EntityKind] {
        match self {
            Self::Repository => &[Self::Root],
            Self::Bucket => &[Self::Repository],
            Self::Group | Self::Cluster => &[Self::Bucket, Self::Group],
            Self::Node => &[Self::Bucket, Self::Group, Self::Cluster],
            Self::Root | Self::Fault | Self::ErrorChannel => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Created, not attached to any parent.
    Floating,
    /// Attached (repositories, buckets, fault sentinels).
    Attached,
    /// Group, cluster or node directly below a bucket.
    Standalone,
    /// Group, cluster or node below a group.
    Grouped,
    /// Node below a cluster.
    Clustered,
    /// Node pending destruction.
    Unassigned,
}

impl EntityState {
    /// Stable lowercase name, as matched by the `object_state` constraint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Floating => "floating",
            Self::Attached => "attached",
            Self::Standalone => "standalone",
            Self::Grouped => "grouped",
            Self::Clustered => "clustered",
            Self::Unassigned => "unassigned",
        }
    }

    /// State an entity of `child` kind takes once received by a `parent`.
    pub fn after_attach(child: EntityKind, parent: EntityKind) -> Self {
        match (child, parent) {
            (EntityKind::Group | EntityKind::Cluster | EntityKind::Node, EntityKind::Bucket) => {
                Self::Standalone
            }
            (EntityKind::Group | EntityKind::Cluster | EntityKind::Node, EntityKind::Group) => {
                Self::Grouped
            }
            (EntityKind::Node, EntityKind::Cluster) => Self::Clustered,
            _ => Self::Attached,
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Views and well-known keys
// ---------------------------------------------------------------------------

/// Views partition properties and checks by observation perspective.
pub mod view {
    /// Matches every other view.
    pub const ANY: &str = "any";
    pub const INTERNAL: &str = "internal";
    pub const EXTERNAL: &str = "external";
    /// Only evaluated on nodes.
    pub const LOCAL: &str = "local";

    /// Whether a property in `property_view` is visible to a check in
    /// `check_view`.
    pub fn matches(property_view: &str, check_view: &str) -> bool {
        property_view == ANY || check_view == ANY || property_view == check_view
    }
}

/// Well-known system property and native constraint keys.
pub mod keys {
    pub const ENVIRONMENT: &str = "environment";
    pub const OBJECT_TYPE: &str = "object_type";
    pub const OBJECT_STATE: &str = "object_state";
    pub const HARDWARE_NODE: &str = "hardware_node";
    pub const DISABLE_ALL_MONITORING: &str = "disable_all_monitoring";
    pub const DISABLE_CHECK_CONFIGURATION: &str = "disable_check_configuration";
    pub const TAG: &str = "tag";

    /// Attribute constraint value accepting any attribute value.
    pub const DEFINED: &str = "@defined";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
