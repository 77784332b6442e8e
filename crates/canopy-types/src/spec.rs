//! Constructor specs for tree entities.
//!
//! Specs carry the raw (string) identifiers supplied by external callers.
//! Every spec validates before the tree creates an entity from it: all
//! identifiers must be non-empty, valid, non-nil UUIDs and names must be
//! non-empty.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpecError;
use crate::{EntityId, TeamId};

fn non_empty(kind: &'static str, field: &'static str, value: &str) -> Result<(), SpecError> {
    if value.trim().is_empty() {
        return Err(SpecError::Empty { kind, field });
    }
    Ok(())
}

fn parse_uuid<T: From<Uuid>>(
    kind: &'static str,
    field: &'static str,
    value: &str,
) -> Result<T, SpecError> {
    non_empty(kind, field, value)?;
    let uuid = Uuid::parse_str(value).map_err(|_| SpecError::InvalidUuid {
        kind,
        field,
        value: value.to_string(),
    })?;
    if uuid.is_nil() {
        return Err(SpecError::NilUuid { kind, field });
    }
    Ok(T::from(uuid))
}

/// Spec for the tree root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSpec {
    pub id: String,
    pub name: String,
}

impl TreeSpec {
    /// Validate and return the root id.
    pub fn id(&self) -> Result<EntityId, SpecError> {
        non_empty("tree", "name", &self.name)?;
        parse_uuid("tree", "id", &self.id)
    }
}

/// Spec for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub id: String,
    pub name: String,
    pub team: String,
    pub deleted: bool,
    pub active: bool,
}

impl RepositorySpec {
    /// Validate and return `(id, team)`.
    pub fn validate(&self) -> Result<(EntityId, TeamId), SpecError> {
        non_empty("repository", "name", &self.name)?;
        Ok((
            parse_uuid("repository", "id", &self.id)?,
            parse_uuid("repository", "team", &self.team)?,
        ))
    }
}

/// Spec for a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub team: String,
    pub repository: String,
    pub deleted: bool,
    pub frozen: bool,
}

impl BucketSpec {
    /// Validate and return `(id, team, repository)`.
    pub fn validate(&self) -> Result<(EntityId, TeamId, EntityId), SpecError> {
        non_empty("bucket", "name", &self.name)?;
        non_empty("bucket", "environment", &self.environment)?;
        Ok((
            parse_uuid("bucket", "id", &self.id)?,
            parse_uuid("bucket", "team", &self.team)?,
            parse_uuid("bucket", "repository", &self.repository)?,
        ))
    }
}

/// Spec for a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub id: String,
    pub name: String,
    pub team: String,
}

impl GroupSpec {
    /// Validate and return `(id, team)`.
    pub fn validate(&self) -> Result<(EntityId, TeamId), SpecError> {
        non_empty("group", "name", &self.name)?;
        Ok((
            parse_uuid("group", "id", &self.id)?,
            parse_uuid("group", "team", &self.team)?,
        ))
    }
}

/// Spec for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub id: String,
    pub name: String,
    pub team: String,
}

impl ClusterSpec {
    /// Validate and return `(id, team)`.
    pub fn validate(&self) -> Result<(EntityId, TeamId), SpecError> {
        non_empty("cluster", "name", &self.name)?;
        Ok((
            parse_uuid("cluster", "id", &self.id)?,
            parse_uuid("cluster", "team", &self.team)?,
        ))
    }
}

/// Spec for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub asset_id: u64,
    pub name: String,
    pub team: String,
    pub server_id: String,
    pub online: bool,
    pub deleted: bool,
}

impl NodeSpec {
    /// Validate and return `(id, team, server_id)`.
    pub fn validate(&self) -> Result<(EntityId, TeamId, EntityId), SpecError> {
        non_empty("node", "name", &self.name)?;
        Ok((
            parse_uuid("node", "id", &self.id)?,
            parse_uuid("node", "team", &self.team)?,
            parse_uuid("node", "server_id", &self.server_id)?,
        ))
    }
}
