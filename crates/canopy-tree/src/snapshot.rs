//! Snapshot and rollback.
//!
//! `begin` deep-clones every entity below the root (properties, checks,
//! instances, ordered indexes); `rollback` swaps the clone back in and
//! `commit` drops it. There is no partial rollback. Actions emitted between
//! `begin` and `rollback` are not retracted.

use tracing::info;

use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

impl Tree {
    /// Take a snapshot. An open snapshot is replaced.
    pub fn begin(&mut self) {
        if self.snapshot.is_some() {
            info!("replacing open snapshot");
        }
        self.snapshot = Some(self.arena.clone());
        info!(entities = self.arena.len(), "snapshot taken");
    }

    /// Restore the tree to the last snapshot.
    pub fn rollback(&mut self) -> Result<()> {
        let snapshot = self.snapshot.take().ok_or(TreeError::NoTransaction)?;
        self.arena = snapshot;
        info!(entities = self.arena.len(), "rolled back");
        Ok(())
    }

    /// Drop the last snapshot.
    pub fn commit(&mut self) -> Result<()> {
        self.snapshot.take().ok_or(TreeError::NoTransaction)?;
        info!("committed");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}
