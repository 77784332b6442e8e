//! Check definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{CapabilityId, CheckId, ConfigId, EntityId, EntityKind, view};

/// Kind of a check constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Intrinsic facts of the object (`environment`, `object_type`,
    /// `object_state`, `hardware_node`).
    Native,
    System,
    Oncall,
    Custom,
    Service,
    /// Acts on the attributes of service properties.
    Attribute,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::System => "system",
            Self::Oncall => "oncall",
            Self::Custom => "custom",
            Self::Service => "service",
            Self::Attribute => "attribute",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One constraint of a check.
///
/// The meaning of `key` and `value` depends on the kind:
/// - native / system / custom: property key and required value;
/// - oncall: `value` is the oncall duty id or name;
/// - service: `value` is the service name;
/// - attribute: `key` is the attribute name, `value` the required value or
///   [`keys::DEFINED`](crate::keys::DEFINED).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub key: String,
    pub value: String,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Alerting threshold, kept in definition order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub predicate: String,
    pub level: u16,
    pub value: i64,
}

/// Restore-time id hint: on object `object_id` the check copy uses `item_id`
/// as its local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckItem {
    pub object_id: EntityId,
    pub object_type: EntityKind,
    pub item_id: CheckId,
}

/// A check as stored on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Local id on this entity.
    pub id: CheckId,
    /// Id of the check on its source entity.
    pub source_id: CheckId,
    pub source_type: EntityKind,
    pub inherited: bool,
    pub inherited_from: EntityId,
    pub config_id: ConfigId,
    pub capability_id: CapabilityId,
    pub inheritance: bool,
    pub children_only: bool,
    pub view: String,
    pub interval: u64,
    pub thresholds: Vec<Threshold>,
    pub constraints: Vec<Constraint>,
    pub items: Vec<CheckItem>,
}

impl Check {
    /// A fresh check definition for `config_id` in the `any` view.
    pub fn new(config_id: ConfigId, capability_id: CapabilityId, interval: u64) -> Self {
        Self {
            id: CheckId::nil(),
            source_id: CheckId::nil(),
            source_type: EntityKind::Root,
            inherited: false,
            inherited_from: EntityId::nil(),
            config_id,
            capability_id,
            inheritance: true,
            children_only: false,
            view: view::ANY.to_string(),
            interval,
            thresholds: Vec::new(),
            constraints: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    pub fn with_inheritance(mut self, inheritance: bool) -> Self {
        self.inheritance = inheritance;
        self
    }

    pub fn with_children_only(mut self, children_only: bool) -> Self {
        self.children_only = children_only;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    pub fn with_item(mut self, item: CheckItem) -> Self {
        self.items.push(item);
        self
    }

    /// Id hint for `object`, if one was supplied.
    pub fn item_for(&self, object: EntityId) -> Option<CheckId> {
        self.items
            .iter()
            .find(|item| item.object_id == object && !item.item_id.is_nil())
            .map(|item| item.item_id)
    }

    /// Copy handed to a descendant: nil local id, marked inherited.
    pub fn inherited_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.id = CheckId::nil();
        copy.inherited = true;
        copy
    }

    pub fn has_constraint(&self, kind: ConstraintKind) -> bool {
        self.constraints.iter().any(|c| c.kind == kind)
    }
}
