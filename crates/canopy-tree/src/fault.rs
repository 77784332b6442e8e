//! Fault sentinel.
//!
//! Every repository gets a fault sentinel when it attaches. The sentinel is
//! the repository's error channel: lookup failures scoped to the repository
//! and writes aimed at the sentinel itself are reported through it to the
//! error sink. It has no parent link and is not one of the repository's
//! children; the repository reaches it through `Entity::fault` and the
//! sentinel names its repository in `repository_id`.

use canopy_types::{Action, ActionKind, EntityId, EntityKind, EntityState, TeamId};
use tracing::{debug, warn};

use crate::entity::{Details, Entity};
use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

impl Tree {
    /// Create the sentinel for `repository` and wire it as its error channel.
    pub(crate) fn attach_fault(&mut self, repository: EntityId) -> Result<()> {
        let id = EntityId::generate();
        let mut fault = Entity::new(
            id,
            EntityKind::Fault,
            "fault".to_string(),
            TeamId::nil(),
            Details::Fault,
        );
        fault.state = EntityState::Attached;
        fault.repository_id = repository;
        let record = fault.record();
        self.arena.insert(fault);
        self.arena.get_mut(repository)?.fault = Some(id);

        debug!(fault_id = %id, repository_id = %repository, "fault sentinel attached");
        self.emit(Action::new(ActionKind::Create, EntityKind::Fault, record.clone()));
        self.emit(Action::new(
            ActionKind::Attached,
            EntityKind::ErrorChannel,
            record,
        ));
        Ok(())
    }

    /// Remove the sentinel of `repository`, if any. Emits nothing.
    pub(crate) fn detach_fault(&mut self, repository: EntityId) -> Result<()> {
        if let Some(fault) = self.arena.get_mut(repository)?.fault.take() {
            self.arena.remove(fault);
            debug!(fault_id = %fault, repository_id = %repository, "fault sentinel removed");
        }
        Ok(())
    }

    /// Fault sentinel of `repository`.
    pub fn fault_of(&self, repository: EntityId) -> Option<EntityId> {
        self.arena.read(repository).ok().and_then(|e| e.fault)
    }

    /// Route `error` through the sentinel `fault` to the error sink.
    pub(crate) fn report_via_fault(&self, fault: EntityId, action: &str, error: TreeError) -> TreeError {
        warn!(fault_id = %fault, action, "error routed through fault sentinel");
        self.sinks.report(action, error.clone());
        error
    }
}
