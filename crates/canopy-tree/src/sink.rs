//! Outbound action and error channels.
//!
//! Both sinks are bounded tokio mpsc channels supplied by the caller. The tree
//! sends synchronously, so tree operations must run on plain threads (or
//! inside `spawn_blocking`), never directly on an async worker.

use canopy_types::Action;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::TreeConfig;
use crate::error::TreeError;

/// One entry on the error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Operation that failed, e.g. `property.set` or `check_instance.match`.
    pub action: String,
    pub error: TreeError,
}

/// Sending halves held by the tree.
#[derive(Debug, Clone)]
pub struct Sinks {
    actions: mpsc::Sender<Action>,
    errors: mpsc::Sender<ErrorRecord>,
}

/// Receiving halves handed to the consumer.
#[derive(Debug)]
pub struct Receivers {
    pub actions: mpsc::Receiver<Action>,
    pub errors: mpsc::Receiver<ErrorRecord>,
}

/// Create both channels with the capacities from `config`.
pub fn channels(config: &TreeConfig) -> (Sinks, Receivers) {
    let (action_tx, action_rx) = mpsc::channel(config.action_channel_capacity);
    let (error_tx, error_rx) = mpsc::channel(config.error_channel_capacity);
    (
        Sinks::new(action_tx, error_tx),
        Receivers {
            actions: action_rx,
            errors: error_rx,
        },
    )
}

impl Sinks {
    pub fn new(actions: mpsc::Sender<Action>, errors: mpsc::Sender<ErrorRecord>) -> Self {
        Self { actions, errors }
    }

    /// Send an action record. Blocks while the channel is full.
    pub(crate) fn emit(&self, action: Action) {
        debug!(
            action = %action.action,
            kind = %action.kind,
            entity_id = %action.payload.entity_id(),
            "emit"
        );
        if self.actions.blocking_send(action).is_err() {
            warn!("action receiver closed, dropping record");
        }
    }

    /// Send an error record. Blocks while the channel is full.
    pub(crate) fn report(&self, action: &str, error: TreeError) {
        warn!(action, %error, "operation failed");
        let record = ErrorRecord {
            action: action.to_string(),
            error,
        };
        if self.errors.blocking_send(record).is_err() {
            warn!("error receiver closed, dropping record");
        }
    }
}

impl Receivers {
    /// Drain every action currently queued.
    pub fn drain_actions(&mut self) -> Vec<Action> {
        let mut out = Vec::new();
        while let Ok(action) = self.actions.try_recv() {
            out.push(action);
        }
        out
    }

    /// Drain every error currently queued.
    pub fn drain_errors(&mut self) -> Vec<ErrorRecord> {
        let mut out = Vec::new();
        while let Ok(record) = self.errors.try_recv() {
            out.push(record);
        }
        out
    }
}
