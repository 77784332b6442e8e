//! Check instances and their content hashes.
//!
//! A check instance is the concrete binding of one check to the property
//! values found on one object. Three BLAKE3 content hashes identify the
//! binding across recomputations and restarts:
//!
//! - `constraint_hash`: bindings, then `config_id` and `check_id`;
//! - `constraint_val_hash`: bindings and the sorted service-config values,
//!   then `config_id`, `check_id` and `instance_service`;
//! - `instance_svc_cfg_hash`: the service config, then `config_id`,
//!   `check_id` and `instance_service`.
//!
//! Each hash also exists in a legacy form that stops before the tail fields.
//! Both forms come out of a single pass: the hasher is cloned right before
//! the tail is appended. Legacy hashes are only used for matching instances
//! persisted without the tail and are never serialized.

use std::collections::BTreeMap;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::{CheckId, ConfigId, InstanceId};

/// Hashes in their pre-tail form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyHashes {
    pub constraint_hash: String,
    pub constraint_val_hash: String,
    pub instance_svc_cfg_hash: String,
}

/// One schedulable monitoring unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInstance {
    /// Stable across versions of the same logical binding.
    pub instance_id: InstanceId,
    pub check_id: CheckId,
    pub config_id: ConfigId,
    /// Changes with every version.
    pub instance_config_id: ConfigId,
    pub version: u64,
    pub constraint_hash: String,
    pub constraint_val_hash: String,
    pub instance_svc_cfg_hash: String,
    pub constraint_oncall: String,
    pub constraint_service: BTreeMap<String, String>,
    pub constraint_system: BTreeMap<String, String>,
    pub constraint_custom: BTreeMap<String, String>,
    pub constraint_native: BTreeMap<String, String>,
    pub constraint_attribute: BTreeMap<String, Vec<String>>,
    /// Name of the bound service; empty when not service-bound.
    pub instance_service: String,
    /// Attribute name to value for this combination.
    pub instance_service_config: BTreeMap<String, String>,
    #[serde(skip)]
    pub legacy: LegacyHashes,
}

fn write_field(hasher: &mut Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

fn write_map(hasher: &mut Hasher, label: &str, map: &BTreeMap<String, String>) {
    write_field(hasher, label);
    hasher.update(&(map.len() as u64).to_le_bytes());
    for (key, value) in map {
        write_field(hasher, key);
        write_field(hasher, value);
    }
}

impl CheckInstance {
    /// An empty, unhashed instance of `check_id`.
    pub fn new(check_id: CheckId, config_id: ConfigId) -> Self {
        Self {
            instance_id: InstanceId::nil(),
            check_id,
            config_id,
            instance_config_id: ConfigId::nil(),
            version: 0,
            constraint_hash: String::new(),
            constraint_val_hash: String::new(),
            instance_svc_cfg_hash: String::new(),
            constraint_oncall: String::new(),
            constraint_service: BTreeMap::new(),
            constraint_system: BTreeMap::new(),
            constraint_custom: BTreeMap::new(),
            constraint_native: BTreeMap::new(),
            constraint_attribute: BTreeMap::new(),
            instance_service: String::new(),
            instance_service_config: BTreeMap::new(),
            legacy: LegacyHashes::default(),
        }
    }

    /// Whether this instance binds a service.
    pub fn is_service_bound(&self) -> bool {
        !self.instance_service.is_empty()
    }

    fn write_tail(&self, hasher: &mut Hasher, with_service: bool) {
        write_field(hasher, &self.config_id.to_string());
        write_field(hasher, &self.check_id.to_string());
        if with_service {
            write_field(hasher, &self.instance_service);
        }
    }

    fn bindings_hasher(&self) -> Hasher {
        let mut hasher = Hasher::new();
        write_field(&mut hasher, "oncall");
        write_field(&mut hasher, &self.constraint_oncall);
        write_map(&mut hasher, "service", &self.constraint_service);
        write_map(&mut hasher, "system", &self.constraint_system);
        write_map(&mut hasher, "custom", &self.constraint_custom);
        write_map(&mut hasher, "native", &self.constraint_native);
        write_field(&mut hasher, "attribute");
        for (name, values) in &self.constraint_attribute {
            let mut values = values.clone();
            values.sort();
            write_field(&mut hasher, name);
            hasher.update(&(values.len() as u64).to_le_bytes());
            for value in &values {
                write_field(&mut hasher, value);
            }
        }
        hasher
    }

    /// Compute all three hashes and their legacy forms.
    pub fn calculate_hashes(&mut self) {
        let bindings = self.bindings_hasher();

        let mut constraint = bindings.clone();
        self.legacy.constraint_hash = constraint.finalize().to_hex().to_string();
        self.write_tail(&mut constraint, false);
        self.constraint_hash = constraint.finalize().to_hex().to_string();

        let mut values: Vec<&str> = self
            .instance_service_config
            .values()
            .map(String::as_str)
            .collect();
        values.sort_unstable();
        let mut val = bindings;
        write_field(&mut val, "values");
        for value in values {
            write_field(&mut val, value);
        }
        self.legacy.constraint_val_hash = val.finalize().to_hex().to_string();
        self.write_tail(&mut val, true);
        self.constraint_val_hash = val.finalize().to_hex().to_string();

        let mut svc = Hasher::new();
        write_map(&mut svc, "service_config", &self.instance_service_config);
        self.legacy.instance_svc_cfg_hash = svc.finalize().to_hex().to_string();
        self.write_tail(&mut svc, true);
        self.instance_svc_cfg_hash = svc.finalize().to_hex().to_string();
    }

    /// Whether the constraint hashes of a persisted instance match this one,
    /// in either the current or the legacy form.
    pub fn match_constraints(&self, loaded: &CheckInstance) -> bool {
        (loaded.constraint_hash == self.constraint_hash
            || loaded.constraint_hash == self.legacy.constraint_hash)
            && (loaded.constraint_val_hash == self.constraint_val_hash
                || loaded.constraint_val_hash == self.legacy.constraint_val_hash)
    }

    /// [`match_constraints`](Self::match_constraints) plus the service
    /// configuration hash.
    pub fn match_service_constraints(&self, loaded: &CheckInstance) -> bool {
        self.match_constraints(loaded)
            && (loaded.instance_svc_cfg_hash == self.instance_svc_cfg_hash
                || loaded.instance_svc_cfg_hash == self.legacy.instance_svc_cfg_hash)
    }
}
