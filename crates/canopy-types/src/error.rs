//! Error types for the types crate.

/// Validation failures of constructor specs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// A required field is empty.
    #[error("{kind} spec: field `{field}` is empty")]
    Empty {
        /// Spec being validated.
        kind: &'static str,
        /// Offending field.
        field: &'static str,
    },

    /// A field that must hold a UUID does not parse.
    #[error("{kind} spec: field `{field}` is not a valid UUID: {value}")]
    InvalidUuid {
        /// Spec being validated.
        kind: &'static str,
        /// Offending field.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A field holds the nil UUID.
    #[error("{kind} spec: field `{field}` is the nil UUID")]
    NilUuid {
        /// Spec being validated.
        kind: &'static str,
        /// Offending field.
        field: &'static str,
    },
}
