//! Property inheritance.
//!
//! A property set on an entity becomes the source; when `inheritance` is on,
//! every descendant receives a copy with its own instance id and the
//! source's `source_id`. A locally set property overrides an inherited one
//! with the same key and view and blocks that copy for its whole sub-tree.
//! Deleting an override re-inherits the hidden property from the nearest
//! ancestor that hands it down.

use canopy_types::{
    Action, ActionKind, EntityId, Payload, Property, PropertyId, PropertyKind, keys, view,
};
use tracing::debug;

use crate::entity::Entity;
use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

/// Outcome of comparing an incoming property against an entity's store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Duplicate {
    None,
    /// An inherited duplicate exists and may be replaced.
    Replaceable(PropertyId),
    /// A locally set duplicate exists.
    Conflict(PropertyId),
    /// Same key, one side in the `any` view, the other in a specific view.
    AmbiguousView(String),
}

/// Whether two properties of the same kind and key compete for one slot.
/// Tags and check-configuration switches only do when their values match.
fn same_slot(existing: &Property, incoming: &Property) -> bool {
    if existing.kind() != incoming.kind() || existing.key() != incoming.key() {
        return false;
    }
    let multi_valued = incoming.kind() == PropertyKind::System
        && matches!(
            incoming.key(),
            keys::TAG | keys::DISABLE_CHECK_CONFIGURATION
        );
    !multi_valued || existing.value() == incoming.value()
}

fn check_duplicate(entity: &Entity, incoming: &Property) -> Duplicate {
    let mut found = Duplicate::None;
    for existing in entity.properties.of(incoming.kind()).values() {
        if !incoming.instance_id.is_nil() && existing.instance_id == incoming.instance_id {
            continue;
        }
        if !same_slot(existing, incoming) {
            continue;
        }
        if existing.view == incoming.view {
            if !existing.inherited {
                return Duplicate::Conflict(existing.instance_id);
            }
            found = Duplicate::Replaceable(existing.instance_id);
        } else if existing.view == view::ANY || incoming.view == view::ANY {
            return Duplicate::AmbiguousView(existing.view.clone());
        }
    }
    found
}

impl Tree {
    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Set a property on `id`, which becomes its source.
    ///
    /// A nil `instance_id` is replaced by a fresh one; a preset id is kept
    /// (restore from storage). An inherited duplicate is replaced, a local
    /// one rejects the call with [`TreeError::DuplicateSetProperty`].
    pub fn set_property(&mut self, id: EntityId, property: Property) -> Result<PropertyId> {
        self.try_set_property(id, property)
            .map_err(|error| self.fail("property.set", error))
    }

    fn try_set_property(&mut self, id: EntityId, mut property: Property) -> Result<PropertyId> {
        let kind = self.mutable_kind(id)?;
        property.inherited = false;
        let duplicate = check_duplicate(&*self.arena.read(id)?, &property);
        match duplicate {
            Duplicate::Conflict(_) => {
                return Err(TreeError::DuplicateSetProperty {
                    id,
                    kind: property.kind(),
                    key: property.key().to_string(),
                });
            }
            Duplicate::AmbiguousView(existing) => {
                return Err(ambiguous(id, &property, existing));
            }
            Duplicate::Replaceable(old) => {
                self.drop_property(id, old)?;
            }
            Duplicate::None => {}
        }

        if property.instance_id.is_nil() {
            property.instance_id = PropertyId::generate();
        }
        property.source_id = property.instance_id;
        property.inherited_from = id;
        property.source_type = kind;
        let property_id = property.instance_id;
        debug!(entity_id = %id, %property_id, key = property.key(), "property set");
        self.install_property(id, property.clone())?;

        if property.inheritance {
            let children = self.arena.read(id)?.child_ids();
            for child in children {
                self.set_property_inherited(child, &property)?;
            }
        }
        Ok(property_id)
    }

    /// Update a property at its source and propagate the change.
    ///
    /// Turning inheritance off removes the copies below and hands down the
    /// property it was hiding; turning it on hands copies down.
    pub fn update_property(&mut self, id: EntityId, property: Property) -> Result<()> {
        self.try_update_property(id, property)
            .map_err(|error| self.fail("property.update", error))
    }

    fn try_update_property(&mut self, id: EntityId, mut property: Property) -> Result<()> {
        self.mutable_kind(id)?;
        let property_id = property.instance_id;
        let existing = self
            .arena
            .read(id)?
            .properties
            .get(property_id)
            .cloned()
            .ok_or(TreeError::UnknownProperty {
                id,
                property: property_id,
            })?;
        if existing.inherited {
            return Err(TreeError::UpdateOnNonSource {
                id,
                property: property_id,
            });
        }
        if existing.kind() != property.kind() {
            return Err(TreeError::UnknownProperty {
                id,
                property: property_id,
            });
        }

        property.inherited = false;
        property.source_id = existing.source_id;
        property.source_type = existing.source_type;
        property.inherited_from = id;
        let duplicate = check_duplicate(&*self.arena.read(id)?, &property);
        match duplicate {
            Duplicate::Conflict(_) => {
                return Err(TreeError::DuplicateSetProperty {
                    id,
                    kind: property.kind(),
                    key: property.key().to_string(),
                });
            }
            Duplicate::AmbiguousView(existing) => return Err(ambiguous(id, &property, existing)),
            Duplicate::Replaceable(other) => {
                self.drop_property(id, other)?;
            }
            Duplicate::None => {}
        }

        let object = {
            let entity = self.arena.get_mut(id)?;
            entity.properties.remove(property_id);
            entity.properties.insert(property.clone());
            entity.object_ref()
        };
        self.emit(Action::new(
            ActionKind::PropertyUpdate,
            object.kind,
            Payload::Property {
                object,
                property: property.clone(),
            },
        ));
        debug!(entity_id = %id, %property_id, "property updated");

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            match (existing.inheritance, property.inheritance) {
                (true, true) => self.update_property_inherited(child, &property)?,
                (true, false) => {
                    self.delete_property_inherited(child, existing.source_id)?;
                    self.resync_property(child, &existing)?;
                }
                (false, true) => self.set_property_inherited(child, &property)?,
                (false, false) => {}
            }
        }
        Ok(())
    }

    /// Delete a property at its source, remove its copies below and
    /// re-inherit whatever it was hiding.
    pub fn delete_property(&mut self, id: EntityId, property_id: PropertyId) -> Result<()> {
        self.try_delete_property(id, property_id)
            .map_err(|error| self.fail("property.delete", error))
    }

    fn try_delete_property(&mut self, id: EntityId, property_id: PropertyId) -> Result<()> {
        self.mutable_kind(id)?;
        let existing = self
            .arena
            .read(id)?
            .properties
            .get(property_id)
            .cloned()
            .ok_or(TreeError::UnknownProperty {
                id,
                property: property_id,
            })?;
        if existing.inherited {
            return Err(TreeError::DeleteOnNonSource {
                id,
                property: property_id,
            });
        }

        self.drop_property(id, property_id)?;
        if existing.inheritance {
            let children = self.arena.read(id)?.child_ids();
            for child in children {
                self.delete_property_inherited(child, existing.source_id)?;
            }
        }
        debug!(entity_id = %id, %property_id, "property deleted");
        self.resync_property(id, &existing)
    }

    // -----------------------------------------------------------------------
    // Propagation
    // -----------------------------------------------------------------------

    /// Install a copy of `source` on `id` and below. Stops at a local
    /// override; an existing copy of the same source is kept.
    pub(crate) fn set_property_inherited(&mut self, id: EntityId, source: &Property) -> Result<()> {
        let mut copy = source.inherited_copy();
        copy.children_only = false;

        let (present, duplicate) = {
            let entity = self.arena.read(id)?;
            (
                entity.properties.by_source(copy.source_id).is_some(),
                check_duplicate(&entity, &copy),
            )
        };
        if !present {
            match duplicate {
                Duplicate::Conflict(local) => {
                    debug!(entity_id = %id, property_id = %local, "inheritance stopped by local override");
                    return Ok(());
                }
                Duplicate::AmbiguousView(existing) => {
                    let error = ambiguous(id, &copy, existing);
                    self.sinks.report("property.inherit", error);
                    return Ok(());
                }
                Duplicate::Replaceable(old) => {
                    self.drop_property(id, old)?;
                    copy.instance_id = PropertyId::generate();
                    self.install_property(id, copy)?;
                }
                Duplicate::None => {
                    copy.instance_id = PropertyId::generate();
                    self.install_property(id, copy)?;
                }
            }
        }

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.set_property_inherited(child, source)?;
        }
        Ok(())
    }

    /// Replace the local copy of `source` on `id` and below, keeping local ids.
    fn update_property_inherited(&mut self, id: EntityId, source: &Property) -> Result<()> {
        let local = self
            .arena
            .read(id)?
            .properties
            .by_source(source.source_id)
            .map(|p| p.instance_id);
        if let Some(local_id) = local {
            let mut copy = source.inherited_copy();
            copy.children_only = false;
            copy.instance_id = local_id;
            let object = {
                let entity = self.arena.get_mut(id)?;
                entity.properties.remove(local_id);
                entity.properties.insert(copy.clone());
                entity.object_ref()
            };
            self.emit(Action::new(
                ActionKind::PropertyUpdate,
                object.kind,
                Payload::Property {
                    object,
                    property: copy,
                },
            ));
        }

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.update_property_inherited(child, source)?;
        }
        Ok(())
    }

    /// Remove copies of `source_id` on `id` and below. Keeps descending past
    /// entities without a copy so no orphaned copy survives an override.
    pub(crate) fn delete_property_inherited(&mut self, id: EntityId, source_id: PropertyId) -> Result<()> {
        let local = self
            .arena
            .read(id)?
            .properties
            .by_source(source_id)
            .filter(|p| p.inherited)
            .map(|p| p.instance_id);
        if let Some(local_id) = local {
            self.drop_property(id, local_id)?;
        }

        let children = self.arena.read(id)?.child_ids();
        for child in children {
            self.delete_property_inherited(child, source_id)?;
        }
        Ok(())
    }

    /// After `deleted` left `id`, re-inherit the property it was hiding, if
    /// any.
    fn resync_property(&mut self, id: EntityId, deleted: &Property) -> Result<()> {
        let Some(parent) = self.arena.read(id)?.parent else {
            return Ok(());
        };
        let hidden = self
            .heritable_from(parent.id)?
            .into_iter()
            .find(|p| p.view == deleted.view && same_slot(p, deleted));
        if let Some(source) = hidden {
            debug!(entity_id = %id, source_id = %source.source_id, "property resynced from ancestors");
            self.set_property_inherited(id, &source)?;
        }
        Ok(())
    }

    /// Hand every heritable property reaching `parent` to the newly linked
    /// `child`.
    pub(crate) fn sync_property(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        for property in &self.heritable_from(parent)? {
            self.set_property_inherited(child, property)?;
        }
        Ok(())
    }

    /// Properties a child of `id` inherits, walking up from `id`. Each slot
    /// is taken by its nearest heritable holder. A local override without
    /// inheritance does not take the slot, so the property it hides still
    /// reaches below it.
    fn heritable_from(&self, id: EntityId) -> Result<Vec<Property>> {
        let mut seen: Vec<Property> = Vec::new();
        let mut heritable = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let entity = self.arena.read(current)?;
            let properties = entity.properties.sorted();
            for property in &properties {
                if property.inheritance && !seen.iter().any(|lower| blocks(lower, property)) {
                    heritable.push(property.clone());
                }
            }
            seen.extend(properties);
            cursor = entity.parent.map(|p| p.id);
        }
        Ok(heritable)
    }

    // -----------------------------------------------------------------------
    // Local store
    // -----------------------------------------------------------------------

    fn install_property(&mut self, id: EntityId, property: Property) -> Result<()> {
        let object = {
            let entity = self.arena.get_mut(id)?;
            entity.properties.insert(property.clone());
            entity.object_ref()
        };
        self.emit(Action::new(
            ActionKind::PropertyNew,
            object.kind,
            Payload::Property { object, property },
        ));
        Ok(())
    }

    /// Remove one property from `id` only. Emits `property_delete`.
    pub(crate) fn drop_property(&mut self, id: EntityId, property_id: PropertyId) -> Result<Option<Property>> {
        let (removed, object) = {
            let entity = self.arena.get_mut(id)?;
            (entity.properties.remove(property_id), entity.object_ref())
        };
        if let Some(property) = &removed {
            self.emit(Action::new(
                ActionKind::PropertyDelete,
                object.kind,
                Payload::Property {
                    object,
                    property: property.clone(),
                },
            ));
        }
        Ok(removed)
    }
}

/// Whether `lower`, held closer to the child, keeps `upper` from being
/// inherited.
fn blocks(lower: &Property, upper: &Property) -> bool {
    if !same_slot(lower, upper) {
        return false;
    }
    if lower.view == upper.view {
        lower.inheritance
    } else {
        lower.view == view::ANY || upper.view == view::ANY
    }
}

fn ambiguous(id: EntityId, property: &Property, existing: String) -> TreeError {
    TreeError::AmbiguousView {
        id,
        kind: property.kind(),
        key: property.key().to_string(),
        view: property.view.clone(),
        existing,
    }
}
