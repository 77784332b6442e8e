//! Property records.
//!
//! A property is a typed key/value attached to a tree entity. The entity where
//! a property is set is its *source*; copies handed down the tree carry
//! `inherited = true` and the source's `source_id`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EntityId, EntityKind, PropertyId, view};

/// The four property stores of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Custom,
    System,
    Service,
    Oncall,
}

impl PropertyKind {
    pub const ALL: [PropertyKind; 4] = [Self::Custom, Self::System, Self::Service, Self::Oncall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::System => "system",
            Self::Service => "service",
            Self::Oncall => "oncall",
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attribute of a service property. Multi-valued attributes appear as
/// several entries with the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceAttribute {
    pub name: String,
    pub value: String,
}

impl ServiceAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Type-specific payload of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Custom {
        custom_id: Uuid,
        key: String,
        value: String,
    },
    System {
        key: String,
        value: String,
    },
    Service {
        name: String,
        attributes: Vec<ServiceAttribute>,
    },
    Oncall {
        oncall_id: Uuid,
        name: String,
        number: String,
    },
}

/// A property as stored on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Local id on this entity. Nil until the entity assigns one, unless the
    /// property is being restored from storage.
    pub instance_id: PropertyId,
    /// Instance id of the property on its source entity.
    pub source_id: PropertyId,
    /// Kind of the source entity.
    pub source_type: EntityKind,
    /// Id of the source entity.
    pub inherited_from: EntityId,
    pub inherited: bool,
    /// Whether the property propagates to descendants.
    pub inheritance: bool,
    /// Whether the property only takes effect on descendants.
    pub children_only: bool,
    pub view: String,
    pub value: PropertyValue,
}

impl Property {
    fn with_value(value: PropertyValue) -> Self {
        Self {
            instance_id: PropertyId::nil(),
            source_id: PropertyId::nil(),
            source_type: EntityKind::Root,
            inherited_from: EntityId::nil(),
            inherited: false,
            inheritance: true,
            children_only: false,
            view: view::ANY.to_string(),
            value,
        }
    }

    /// A system property in the `any` view, inherited by default.
    pub fn system(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_value(PropertyValue::System {
            key: key.into(),
            value: value.into(),
        })
    }

    /// A custom property.
    pub fn custom(custom_id: Uuid, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_value(PropertyValue::Custom {
            custom_id,
            key: key.into(),
            value: value.into(),
        })
    }

    /// A service property with its attributes.
    pub fn service(name: impl Into<String>, attributes: Vec<ServiceAttribute>) -> Self {
        Self::with_value(PropertyValue::Service {
            name: name.into(),
            attributes,
        })
    }

    /// An oncall duty property.
    pub fn oncall(oncall_id: Uuid, name: impl Into<String>, number: impl Into<String>) -> Self {
        Self::with_value(PropertyValue::Oncall {
            oncall_id,
            name: name.into(),
            number: number.into(),
        })
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

    /// Restore with a known instance id.
    pub fn with_instance_id(mut self, id: PropertyId) -> Self {
        self.instance_id = id;
        self
    }

    pub fn kind(&self) -> PropertyKind {
        match self.value {
            PropertyValue::Custom { .. } => PropertyKind::Custom,
            PropertyValue::System { .. } => PropertyKind::System,
            PropertyValue::Service { .. } => PropertyKind::Service,
            PropertyValue::Oncall { .. } => PropertyKind::Oncall,
        }
    }

    /// Key used for duplicate detection: the key of custom and system
    /// properties, the name of services and oncall duties.
    pub fn key(&self) -> &str {
        match &self.value {
            PropertyValue::Custom { key, .. } | PropertyValue::System { key, .. } => key,
            PropertyValue::Service { name, .. } | PropertyValue::Oncall { name, .. } => name,
        }
    }

    /// Scalar value; the number of oncall duties, empty for services.
    pub fn value(&self) -> &str {
        match &self.value {
            PropertyValue::Custom { value, .. } | PropertyValue::System { value, .. } => value,
            PropertyValue::Oncall { number, .. } => number,
            PropertyValue::Service { .. } => "",
        }
    }

    /// Service attributes, empty for other kinds.
    pub fn attributes(&self) -> &[ServiceAttribute] {
        match &self.value {
            PropertyValue::Service { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Whether this property is visible to a check in `check_view`.
    pub fn visible_in(&self, check_view: &str) -> bool {
        view::matches(&self.view, check_view)
    }

    /// Copy handed to a descendant: fresh (nil) local id, marked inherited,
    /// source fields preserved.
    pub fn inherited_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.instance_id = PropertyId::nil();
        copy.inherited = true;
        copy
    }
}
