//! Error types for the tree engine.

use canopy_types::{
    CheckId, EntityId, EntityKind, InstanceId, PropertyId, PropertyKind, SpecError,
};

/// Errors returned by [`Tree`](crate::Tree) operations and routed to the
/// error sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    // ----- structural -----
    /// Attach called on an entity that already has a parent.
    #[error("{kind} {id} is already attached")]
    AlreadyAttached { id: EntityId, kind: EntityKind },

    /// Operation requires an attached entity.
    #[error("{kind} {id} is not attached")]
    NotAttached { id: EntityId, kind: EntityKind },

    /// Child kind may not live below the requested parent kind.
    #[error("{child} cannot be attached below {parent}")]
    IllegalParent {
        child: EntityKind,
        parent: EntityKind,
    },

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The entity exists but has a different kind than requested.
    #[error("entity {id} is a {actual}, expected {expected}")]
    WrongKind {
        id: EntityId,
        expected: EntityKind,
        actual: EntityKind,
    },

    /// Re-parenting would cross a repository or bucket boundary, or create
    /// a cycle.
    #[error("{id} cannot move below {parent}")]
    RepositoryMismatch { id: EntityId, parent: EntityId },

    #[error("{kind} {id} has no containing bucket")]
    NoBucket { id: EntityId, kind: EntityKind },

    #[error("{operation} is not supported on {kind}")]
    Unsupported {
        operation: &'static str,
        kind: EntityKind,
    },

    /// An `any`-view and a specific-view property with the same key would
    /// coexist.
    #[error("{kind} property {key} in view {view} conflicts with view {existing} on {id}")]
    AmbiguousView {
        id: EntityId,
        kind: PropertyKind,
        key: String,
        view: String,
        existing: String,
    },

    /// Mutation aimed at a fault sentinel.
    #[error("fault sentinel {0} cannot be modified")]
    FaultTarget(EntityId),

    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),

    // ----- semantic -----
    #[error("duplicate {kind} property {key} on {id}")]
    DuplicateSetProperty {
        id: EntityId,
        kind: PropertyKind,
        key: String,
    },

    #[error("property {property} is not sourced on {id}")]
    UpdateOnNonSource { id: EntityId, property: PropertyId },

    #[error("property {property} is not sourced on {id}")]
    DeleteOnNonSource { id: EntityId, property: PropertyId },

    #[error("check {check} is not sourced on {id}")]
    CheckDeleteOnNonSource { id: EntityId, check: CheckId },

    #[error("unknown property {property} on {id}")]
    UnknownProperty { id: EntityId, property: PropertyId },

    #[error("unknown check {check} on {id}")]
    UnknownCheck { id: EntityId, check: CheckId },

    #[error("check {check} already exists on {id}")]
    DuplicateCheck { id: EntityId, check: CheckId },

    // ----- reconciliation -----
    /// A computed instance matched no loaded instance.
    #[error("no loaded instance matches computed instance of check {check} on {id}")]
    UnmatchedInstance { id: EntityId, check: CheckId },

    /// Loaded instances remained after matching.
    #[error("loaded instance {instance} of check {check} on {id} was not matched")]
    LeftoverLoadedInstance {
        id: EntityId,
        check: CheckId,
        instance: InstanceId,
    },

    /// Evaluating a check panicked; its instances were left as they were.
    #[error("computing instances of check {check} on {id} failed")]
    ComputeFailed { id: EntityId, check: CheckId },

    // ----- lookup -----
    #[error("no entity matches {0}")]
    NotFound(String),

    #[error("several entities match {0}")]
    Ambiguous(String),

    // ----- snapshot -----
    #[error("no open transaction")]
    NoTransaction,
}

impl TreeError {
    /// Whether this error is also written to the error sink. Structural
    /// precondition failures are only returned to the caller.
    pub fn routes_to_sink(&self) -> bool {
        matches!(
            self,
            Self::FaultTarget(_)
                | Self::DuplicateSetProperty { .. }
                | Self::UpdateOnNonSource { .. }
                | Self::DeleteOnNonSource { .. }
                | Self::CheckDeleteOnNonSource { .. }
                | Self::UnknownProperty { .. }
                | Self::UnknownCheck { .. }
                | Self::DuplicateCheck { .. }
                | Self::UnmatchedInstance { .. }
                | Self::LeftoverLoadedInstance { .. }
                | Self::ComputeFailed { .. }
                | Self::NotFound(_)
                | Self::Ambiguous(_)
        )
    }
}

/// Errors loading a [`TreeConfig`](crate::TreeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
