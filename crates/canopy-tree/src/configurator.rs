//! Check-instance configurator.
//!
//! For every check on a group, cluster or node the configurator evaluates
//! the check's constraints against the entity's own properties, materializes
//! one instance per binding (one per service attribute combination for
//! service-bound checks) and reconciles them with the instances already
//! present: stable `instance_id`s are kept across versions, stale instances
//! are deleted. On startup, computed instances are matched against loaded
//! ones instead and no actions are emitted.
//!
//! Entities are processed after their children. Each entity takes an
//! upgradable read lock, evaluates its checks in parallel, then upgrades to
//! a write lock to install the results.

use std::collections::{BTreeMap, HashSet};
use std::thread;

use canopy_types::{
    Action, ActionKind, Check, CheckId, CheckInstance, ConfigId, Constraint, ConstraintKind,
    EntityId, EntityKind, InstanceId, Payload, Property, PropertyKind, PropertyValue, keys, view,
};
use parking_lot::RwLockUpgradableReadGuard;
use tracing::{debug, warn};

use crate::entity::{CheckStore, Entity};
use crate::error::TreeError;
use crate::tree::Tree;

type Result<T> = std::result::Result<T, TreeError>;

/// Result of evaluating one check on one entity.
#[derive(Debug)]
pub(crate) enum Evaluation {
    /// Not evaluated here; existing instances are removed.
    Skipped(&'static str),
    /// A constraint did not hold; existing instances are removed.
    Broken,
    Instances(Vec<CheckInstance>),
}

/// Effects of reconciling one entity, applied once its lock is released.
#[derive(Default)]
struct Effects {
    actions: Vec<(ActionKind, CheckInstance)>,
    errors: Vec<TreeError>,
}

impl Tree {
    /// Compute check instances for the whole tree.
    ///
    /// Children are visited before their parents: in parallel, or one by one
    /// in attach order when `deterministic_inheritance_order` is set.
    /// Reconciliation failures go to the error sink.
    pub fn compute_check_instances(&self) {
        self.compute_subtree(self.root);
    }

    /// Compute check instances for the sub-tree rooted at `id`.
    pub fn compute_check_instances_for(&self, id: EntityId) -> Result<()> {
        if !self.arena.contains(id) {
            return Err(TreeError::UnknownEntity(id));
        }
        self.compute_subtree(id);
        Ok(())
    }

    fn compute_subtree(&self, id: EntityId) {
        let (kind, children) = match self.arena.read(id) {
            Ok(entity) => (entity.kind, entity.child_ids()),
            Err(error) => {
                warn!(entity_id = %id, %error, "entity vanished during compute");
                return;
            }
        };
        if self.config.deterministic_inheritance_order {
            for child in children {
                self.compute_subtree(child);
            }
        } else {
            thread::scope(|scope| {
                for child in children {
                    scope.spawn(move || self.compute_subtree(child));
                }
            });
        }
        if kind.computes_instances()
            && let Err(error) = self.compute_entity(id)
        {
            self.sinks.report("check_instance.compute", error);
        }
    }

    fn compute_entity(&self, id: EntityId) -> Result<()> {
        let guard = self.arena.upgradable(id)?;
        let (evaluated, failed) = {
            let entity: &Entity = &guard;
            let checks = entity.checks.sorted();
            if self.config.deterministic_inheritance_order || checks.len() < 2 {
                let evaluated = checks
                    .iter()
                    .map(|check| (check.id, evaluate(entity, check)))
                    .collect::<Vec<_>>();
                (evaluated, Vec::new())
            } else {
                thread::scope(|scope| {
                    let handles: Vec<_> = checks
                        .iter()
                        .map(|check| (check.id, scope.spawn(move || evaluate(entity, check))))
                        .collect();
                    let mut evaluated = Vec::with_capacity(handles.len());
                    let mut failed = Vec::new();
                    for (check, handle) in handles {
                        match handle.join() {
                            Ok(evaluation) => evaluated.push((check, evaluation)),
                            Err(_) => {
                                warn!(entity_id = %id, check_id = %check, "check evaluation panicked");
                                failed.push(check);
                            }
                        }
                    }
                    (evaluated, failed)
                })
            }
        };
        self.settle(id, guard, evaluated, failed);
        Ok(())
    }

    /// Install evaluated checks on `id` under the upgraded lock, then emit.
    /// A check in `failed` keeps its instances and is reported as a compute
    /// failure.
    pub(crate) fn settle(
        &self,
        id: EntityId,
        guard: RwLockUpgradableReadGuard<'_, Entity>,
        evaluated: Vec<(CheckId, Evaluation)>,
        failed: Vec<CheckId>,
    ) {
        let mut entity = RwLockUpgradableReadGuard::upgrade(guard);
        let object = entity.object_ref();
        let mut effects = Effects::default();

        // Instances whose check is gone.
        let mut orphaned: Vec<CheckId> = entity
            .checks
            .check_instances
            .keys()
            .filter(|check| !entity.checks.checks.contains_key(*check))
            .copied()
            .collect();
        orphaned.sort();
        for check in orphaned {
            for instance in entity.checks.take_instances(check) {
                effects
                    .actions
                    .push((ActionKind::CheckInstanceDelete, instance));
            }
        }

        for (check, evaluation) in evaluated {
            reconcile(id, &mut entity.checks, check, evaluation, &mut effects);
        }

        // Loaded instances of checks that do not exist here.
        let mut stale: Vec<CheckId> = entity
            .checks
            .loaded
            .keys()
            .filter(|check| !entity.checks.checks.contains_key(*check))
            .copied()
            .collect();
        stale.sort();
        for check in stale {
            if let Some(loaded) = entity.checks.loaded.remove(&check) {
                leftovers(id, check, loaded.into_values().collect(), &mut effects);
            }
        }
        drop(entity);

        for (action, instance) in effects.actions {
            self.emit(Action::new(
                action,
                object.kind,
                Payload::CheckInstance { object, instance },
            ));
        }
        for error in effects.errors {
            self.sinks.report("check_instance.match", error);
        }
        for check in failed {
            self.sinks
                .report("check_instance.compute", TreeError::ComputeFailed { id, check });
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn reconcile(
    id: EntityId,
    store: &mut CheckStore,
    check: CheckId,
    evaluation: Evaluation,
    effects: &mut Effects,
) {
    let computed = match evaluation {
        Evaluation::Instances(computed) => computed,
        Evaluation::Skipped(reason) => {
            debug!(entity_id = %id, check_id = %check, reason, "check skipped");
            remove_all(id, store, check, effects);
            return;
        }
        Evaluation::Broken => {
            debug!(entity_id = %id, check_id = %check, "check constraints not met");
            remove_all(id, store, check, effects);
            return;
        }
    };

    if store.loaded.get(&check).is_some_and(|loaded| !loaded.is_empty()) {
        match_loaded(id, store, check, computed, effects);
        return;
    }

    let mut previous: Vec<CheckInstance> = store.instances_of(check).into_iter().cloned().collect();
    previous.sort_by_key(|ci| ci.instance_id);
    let mut claimed: HashSet<InstanceId> = HashSet::new();
    let mut next = Vec::with_capacity(computed.len());
    for mut instance in computed {
        let reuse = previous.iter().find(|old| {
            !claimed.contains(&old.instance_id)
                && old.instance_svc_cfg_hash == instance.instance_svc_cfg_hash
                && old.constraint_hash == instance.constraint_hash
        });
        match reuse {
            Some(old) => {
                instance.instance_id = old.instance_id;
                instance.version = old.version + 1;
                claimed.insert(old.instance_id);
            }
            None => {
                instance.instance_id = InstanceId::generate();
                instance.version = 0;
            }
        }
        instance.instance_config_id = ConfigId::generate();
        next.push(instance);
    }

    for old in previous {
        if !claimed.contains(&old.instance_id) {
            if let Some(removed) = store.remove_instance(old.instance_id) {
                effects
                    .actions
                    .push((ActionKind::CheckInstanceDelete, removed));
            }
        }
    }
    for instance in next {
        let action = if claimed.contains(&instance.instance_id) {
            ActionKind::CheckInstanceUpdate
        } else {
            ActionKind::CheckInstanceCreate
        };
        store.put_instance(instance.clone());
        effects.actions.push((action, instance));
    }
    debug!(entity_id = %id, check_id = %check, instances = store.instances_of(check).len(), "check configured");
}

/// Startup: adopt identities of loaded instances, emit nothing.
fn match_loaded(
    id: EntityId,
    store: &mut CheckStore,
    check: CheckId,
    computed: Vec<CheckInstance>,
    effects: &mut Effects,
) {
    let mut loaded = store.loaded.remove(&check).unwrap_or_default();
    for mut instance in computed {
        let mut candidates: Vec<InstanceId> = loaded.keys().copied().collect();
        candidates.sort();
        let matched = candidates.into_iter().find(|candidate| {
            loaded.get(candidate).is_some_and(|persisted| {
                if instance.is_service_bound() {
                    instance.match_service_constraints(persisted)
                } else {
                    instance.match_constraints(persisted)
                }
            })
        });
        match matched.and_then(|candidate| loaded.remove(&candidate)) {
            Some(persisted) => {
                instance.instance_id = persisted.instance_id;
                instance.instance_config_id = persisted.instance_config_id;
                instance.version = persisted.version;
                debug!(entity_id = %id, check_id = %check, instance_id = %instance.instance_id, "loaded instance matched");
                store.put_instance(instance);
            }
            None => {
                warn!(entity_id = %id, check_id = %check, "computed instance matches no loaded instance");
                effects
                    .errors
                    .push(TreeError::UnmatchedInstance { id, check });
            }
        }
    }
    leftovers(id, check, loaded.into_values().collect(), effects);
}

fn leftovers(id: EntityId, check: CheckId, mut loaded: Vec<CheckInstance>, effects: &mut Effects) {
    loaded.sort_by_key(|ci| ci.instance_id);
    for instance in loaded {
        warn!(entity_id = %id, check_id = %check, instance_id = %instance.instance_id, "loaded instance left unmatched");
        effects.errors.push(TreeError::LeftoverLoadedInstance {
            id,
            check,
            instance: instance.instance_id,
        });
    }
}

fn remove_all(id: EntityId, store: &mut CheckStore, check: CheckId, effects: &mut Effects) {
    for instance in store.take_instances(check) {
        effects
            .actions
            .push((ActionKind::CheckInstanceDelete, instance));
    }
    if let Some(loaded) = store.loaded.remove(&check) {
        leftovers(id, check, loaded.into_values().collect(), effects);
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Properties of `kind` that take effect on `entity` and are visible in
/// `check_view`, in a stable order.
fn visible<'a>(entity: &'a Entity, kind: PropertyKind, check_view: &str) -> Vec<&'a Property> {
    let mut out: Vec<&Property> = entity
        .properties
        .effective(kind)
        .filter(|p| p.visible_in(check_view))
        .collect();
    out.sort_by(|a, b| (a.key(), &a.view, a.source_id).cmp(&(b.key(), &b.view, b.source_id)));
    out
}

/// Intrinsic facts matched by native constraints.
fn native_fact(entity: &Entity, key: &str) -> Option<String> {
    match key {
        keys::ENVIRONMENT => Some(entity.environment.clone()),
        keys::OBJECT_TYPE => Some(entity.kind.as_str().to_string()),
        keys::OBJECT_STATE => Some(entity.state.as_str().to_string()),
        keys::HARDWARE_NODE => Some((entity.kind == EntityKind::Node).to_string()),
        _ => None,
    }
}

/// Whether `service` satisfies every attribute constraint.
fn binds_all(service: &Property, attributes: &[&Constraint]) -> bool {
    attributes.iter().all(|constraint| {
        service.attributes().iter().any(|attribute| {
            attribute.name == constraint.key
                && (constraint.value == keys::DEFINED || attribute.value == constraint.value)
        })
    })
}

fn attribute_matches(constraint: &Constraint, value: &str) -> bool {
    constraint.value == keys::DEFINED || constraint.value == value
}

/// Every combination of one value per attribute name of `service`, with
/// constrained attributes limited to accepted values.
fn combinations(service: &Property, attributes: &[&Constraint]) -> Vec<BTreeMap<String, String>> {
    let mut values: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for attribute in service.attributes() {
        values
            .entry(attribute.name.as_str())
            .or_default()
            .push(attribute.value.as_str());
    }
    let mut combos = vec![BTreeMap::new()];
    for (name, mut accepted) in values {
        accepted.sort_unstable();
        accepted.dedup();
        accepted.retain(|value| {
            attributes
                .iter()
                .filter(|c| c.key == name)
                .all(|c| attribute_matches(c, value))
        });
        let mut next = Vec::with_capacity(combos.len() * accepted.len());
        for combo in &combos {
            for value in &accepted {
                let mut extended = combo.clone();
                extended.insert(name.to_string(), value.to_string());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn evaluate(entity: &Entity, check: &Check) -> Evaluation {
    if !check.inherited && check.children_only {
        return Evaluation::Skipped("children only");
    }
    // Groups and clusters have no local view.
    if check.view == view::LOCAL && entity.kind != EntityKind::Node {
        return Evaluation::Skipped("local view");
    }
    let system = visible(entity, PropertyKind::System, &check.view);
    if system
        .iter()
        .any(|p| p.key() == keys::DISABLE_ALL_MONITORING && p.value() == "true")
    {
        return Evaluation::Skipped("monitoring disabled");
    }
    let config_id = check.config_id.to_string();
    if system
        .iter()
        .any(|p| p.key() == keys::DISABLE_CHECK_CONFIGURATION && p.value() == config_id)
    {
        return Evaluation::Skipped("check configuration disabled");
    }

    let mut base = CheckInstance::new(check.id, check.config_id);
    let mut services: Vec<&str> = Vec::new();
    let mut attributes: Vec<&Constraint> = Vec::new();
    for constraint in &check.constraints {
        match constraint.kind {
            ConstraintKind::Native => {
                if native_fact(entity, &constraint.key).as_deref() != Some(constraint.value.as_str()) {
                    return Evaluation::Broken;
                }
                base.constraint_native
                    .insert(constraint.key.clone(), constraint.value.clone());
            }
            ConstraintKind::System | ConstraintKind::Custom => {
                let kind = if constraint.kind == ConstraintKind::System {
                    PropertyKind::System
                } else {
                    PropertyKind::Custom
                };
                let found = visible(entity, kind, &check.view)
                    .into_iter()
                    .any(|p| p.key() == constraint.key && p.value() == constraint.value);
                if !found {
                    return Evaluation::Broken;
                }
                let bindings = if kind == PropertyKind::System {
                    &mut base.constraint_system
                } else {
                    &mut base.constraint_custom
                };
                bindings.insert(constraint.key.clone(), constraint.value.clone());
            }
            ConstraintKind::Oncall => {
                let duty = visible(entity, PropertyKind::Oncall, &check.view)
                    .into_iter()
                    .find_map(|p| match &p.value {
                        PropertyValue::Oncall {
                            oncall_id, name, ..
                        } if oncall_id.to_string() == constraint.value
                            || *name == constraint.value =>
                        {
                            Some(oncall_id.to_string())
                        }
                        _ => None,
                    });
                match duty {
                    Some(oncall_id) => base.constraint_oncall = oncall_id,
                    None => return Evaluation::Broken,
                }
            }
            ConstraintKind::Service => services.push(constraint.value.as_str()),
            ConstraintKind::Attribute => attributes.push(constraint),
        }
    }

    let available = visible(entity, PropertyKind::Service, &check.view);
    let bound: Vec<&Property> = if !services.is_empty() {
        let mut bound = Vec::with_capacity(services.len());
        for name in services {
            let Some(service) = available.iter().find(|p| p.key() == name) else {
                return Evaluation::Broken;
            };
            if !binds_all(service, &attributes) {
                return Evaluation::Broken;
            }
            if !bound.iter().any(|b: &&Property| b.key() == name) {
                bound.push(*service);
            }
        }
        bound
    } else if !attributes.is_empty() {
        let bound: Vec<&Property> = available
            .iter()
            .filter(|service| binds_all(service, &attributes))
            .copied()
            .collect();
        if bound.is_empty() {
            return Evaluation::Broken;
        }
        bound
    } else {
        base.calculate_hashes();
        return Evaluation::Instances(vec![base]);
    };

    let mut instances = Vec::new();
    for service in bound {
        let name = service.key().to_string();
        let mut per_service = base.clone();
        per_service.constraint_service.insert(name.clone(), name.clone());
        for constraint in &attributes {
            let values = per_service
                .constraint_attribute
                .entry(constraint.key.clone())
                .or_default();
            for attribute in service.attributes() {
                if attribute.name == constraint.key && attribute_matches(constraint, &attribute.value) {
                    values.push(attribute.value.clone());
                }
            }
            values.sort();
            values.dedup();
        }
        for combo in combinations(service, &attributes) {
            let mut instance = per_service.clone();
            instance.instance_service = name.clone();
            instance.instance_service_config = combo;
            instance.calculate_hashes();
            instances.push(instance);
        }
    }
    Evaluation::Instances(instances)
}
