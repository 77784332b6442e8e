//! In-memory configuration tree for monitoring.
//!
//! A [`Tree`] holds one root, repositories below it, buckets below those and
//! groups, clusters and nodes inside buckets. Properties and checks set on
//! any entity are inherited by its descendants unless overridden; the
//! configurator turns the checks visible on each group, cluster and node into
//! versioned check instances. Every change is published as an
//! [`Action`](canopy_types::Action) on the action channel, and failures that
//! callers may not watch for are mirrored on the error channel.
//!
//! Structural and configuration changes take `&mut Tree`. Check-instance
//! computation takes `&Tree` and fans out over entities and checks.

mod arena;
mod attach;
mod check;
mod config;
mod configurator;
mod entity;
mod error;
mod fault;
mod property;
mod replay;
mod sink;
mod snapshot;
mod tree;

#[cfg(test)]
mod tests;

pub use attach::AttachRequest;
pub use config::TreeConfig;
pub use entity::EntityInfo;
pub use error::{ConfigError, TreeError};
pub use replay::replay;
pub use sink::{ErrorRecord, Receivers, Sinks, channels};
pub use tree::{FindRequest, StructureEntry, Tree};
