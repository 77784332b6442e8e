//! Entity arena.
//!
//! Every entity of a tree lives in one arena, keyed by id. Parents and
//! children refer to each other by id; ownership is the arena's. Each entity
//! sits behind its own read-write lock so the configurator can evaluate
//! entities in parallel through a shared reference, while structural
//! mutation goes through `&mut` access without locking.

use std::collections::HashMap;

use canopy_types::EntityId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};

use crate::entity::Entity;
use crate::error::TreeError;

type Result<T> = std::result::Result<T, TreeError>;

#[derive(Debug, Default)]
pub(crate) struct Arena {
    entities: HashMap<EntityId, RwLock<Entity>>,
}

impl Arena {
    pub(crate) fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, RwLock::new(entity));
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id).map(|lock| lock.into_inner())
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub(crate) fn read(&self, id: EntityId) -> Result<RwLockReadGuard<'_, Entity>> {
        self.entities
            .get(&id)
            .map(|lock| lock.read())
            .ok_or(TreeError::UnknownEntity(id))
    }

    /// Read access that may later be upgraded to write access.
    pub(crate) fn upgradable(&self, id: EntityId) -> Result<RwLockUpgradableReadGuard<'_, Entity>> {
        self.entities
            .get(&id)
            .map(|lock| lock.upgradable_read())
            .ok_or(TreeError::UnknownEntity(id))
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.entities
            .get_mut(&id)
            .map(|lock| lock.get_mut())
            .ok_or(TreeError::UnknownEntity(id))
    }

    pub(crate) fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.len()
    }
}

impl Clone for Arena {
    /// Deep clone: every entity with its stores, indexes and instances.
    fn clone(&self) -> Self {
        Self {
            entities: self
                .entities
                .iter()
                .map(|(id, entity)| (*id, RwLock::new(entity.read().clone())))
                .collect(),
        }
    }
}

impl PartialEq for Arena {
    fn eq(&self, other: &Self) -> bool {
        self.entities.len() == other.entities.len()
            && self.entities.iter().all(|(id, entity)| {
                other
                    .entities
                    .get(id)
                    .is_some_and(|o| *entity.read() == *o.read())
            })
    }
}
