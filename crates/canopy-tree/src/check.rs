//! Check inheritance.
//!
//! Checks propagate like properties but never override each other: every
//! descendant holds its own copy of every heritable check above it, matched
//! by `source_id`.

use canopy_types::{
    Action, ActionKind, Check, CheckId, CheckInstance, EntityId, Payload,
};
use tracing::debug;

use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

impl Tree {
    /// Set a check on `id`, which becomes its source.
    ///
    /// The local id is, in order of preference: the preset `check.id`, the
    /// id hint listed in `check.items` for this entity, a fresh id.
    pub fn set_check(&mut self, id: EntityId, check: Check) -> Result<CheckId> {
        self.try_set_check(id, check)
            .map_err(|error| self.fail("check.set", error))
    }

    fn try_set_check(&mut self, id: EntityId, mut check: Check) -> Result<CheckId> {
        let kind = self.mutable_kind(id)?;
        let check_id = if check.id.is_nil() {
            check.item_for(id).unwrap_or_else(CheckId::generate)
        } else {
            check.id
        };
        if self.arena.read(id)?.checks.checks.contains_key(&check_id) {
            return Err(TreeError::DuplicateCheck {
                id,
                check: check_id,
            });
        }
        check.id = check_id;
        check.source_id = check_id;
        check.inherited = false;
        check.inherited_from = id;
        check.source_type = kind;
        debug!(entity_id = %id, %check_id, config_id = %check.config_id, "check set");
        self.install_check(id, check.clone())?;

        if check.inheritance {
            let children = self.arena.read(id)?.child_ids();
            for child in children {
                self.set_check_inherited(child, &check)?;
            }
        }
        Ok(check_id)
    }

    /// Delete a check at its source and every copy below. Check instances
    /// are removed by the next configurator pass.
    pub fn delete_check(&mut self, id: EntityId, check_id: CheckId) -> Result<()> {
        self.try_delete_check(id, check_id)
            .map_err(|error| self.fail("check.delete", error))
    }

    fn try_delete_check(&mut self, id: EntityId, check_id: CheckId) -> Result<()> {
        self.mutable_kind(id)?;
        let existing = self
            .arena
            .read(id)?
            .checks
            .checks
            .get(&check_id)
            .cloned()
            .ok_or(TreeError::UnknownCheck {
                id,
                check: check_id,
            })?;
        if existing.inherited {
            return Err(TreeError::CheckDeleteOnNonSource {
                id,
                check: check_id,
            });
        }
        self.drop_check(id, check_id)?;
        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.delete_check_inherited(child, existing.source_id)?;
        }
        debug!(entity_id = %id, %check_id, "check deleted");
        Ok(())
    }

    /// Push a loaded check instance into `id` ahead of a startup
    /// configurator pass.
    pub fn load_instance(&mut self, id: EntityId, instance: CheckInstance) -> Result<()> {
        let kind = self.mutable_kind(id).map_err(|error| self.fail("check_instance.load", error))?;
        if !kind.computes_instances() {
            return Err(TreeError::Unsupported {
                operation: "load_instance",
                kind,
            });
        }
        debug!(entity_id = %id, instance_id = %instance.instance_id, check_id = %instance.check_id, "instance loaded");
        self.arena
            .get_mut(id)?
            .checks
            .loaded
            .entry(instance.check_id)
            .or_default()
            .insert(instance.instance_id, instance);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    pub(crate) fn set_check_inherited(&mut self, id: EntityId, source: &Check) -> Result<()> {
        let (present, taken) = {
            let entity = self.arena.read(id)?;
            let hint = source.item_for(id);
            (
                entity.checks.by_source(source.source_id).is_some(),
                hint.is_some_and(|h| entity.checks.checks.contains_key(&h)),
            )
        };
        if !present {
            let mut copy = source.inherited_copy();
            copy.children_only = false;
            copy.id = match source.item_for(id) {
                Some(hint) if !taken => hint,
                _ => CheckId::generate(),
            };
            self.install_check(id, copy)?;
        }

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.set_check_inherited(child, source)?;
        }
        Ok(())
    }

    fn delete_check_inherited(&mut self, id: EntityId, source_id: CheckId) -> Result<()> {
        let local = self
            .arena
            .read(id)?
            .checks
            .by_source(source_id)
            .filter(|c| c.inherited)
            .map(|c| c.id);
        if let Some(local_id) = local {
            self.drop_check(id, local_id)?;
        }

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.delete_check_inherited(child, source_id)?;
        }
        Ok(())
    }

    /// Hand every heritable check of `parent` to the newly linked `child`.
    pub(crate) fn sync_check(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        let heritable: Vec<Check> = self
            .arena
            .read(parent)?
            .checks
            .sorted()
            .into_iter()
            .filter(|c| c.inheritance)
            .collect();
        for check in &heritable {
            self.set_check_inherited(child, check)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Local store
    // -----------------------------------------------------------------------

    fn install_check(&mut self, id: EntityId, check: Check) -> Result<()> {
        let object = {
            let entity = self.arena.get_mut(id)?;
            entity.checks.checks.insert(check.id, check.clone());
            entity.object_ref()
        };
        self.emit(Action::new(
            ActionKind::CheckNew,
            object.kind,
            Payload::Check { object, check },
        ));
        Ok(())
    }

    /// Remove one check definition from `id` only. Emits `check_removed`.
    pub(crate) fn drop_check(&mut self, id: EntityId, check_id: CheckId) -> Result<Option<Check>> {
        let (removed, object) = {
            let entity = self.arena.get_mut(id)?;
            (entity.checks.checks.remove(&check_id), entity.object_ref())
        };
        if let Some(check) = &removed {
            self.emit(Action::new(
                ActionKind::CheckRemoved,
                object.kind,
                Payload::Check {
                    object,
                    check: check.clone(),
                },
            ));
        }
        Ok(removed)
    }

    /// Remove every instance of `check_id` from `id`. Emits
    /// `check_instance_delete` for each.
    pub(crate) fn drop_instances(&mut self, id: EntityId, check_id: CheckId) -> Result<()> {
        let (removed, object) = {
            let entity = self.arena.get_mut(id)?;
            (entity.checks.take_instances(check_id), entity.object_ref())
        };
        for instance in removed {
            self.emit(Action::new(
                ActionKind::CheckInstanceDelete,
                object.kind,
                Payload::CheckInstance { object, instance },
            ));
        }
        Ok(())
    }
}
