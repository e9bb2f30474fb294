use std::fmt;

use crate::kv::KvError;

/// Error type for every record-store operation.
///
/// Write-path variants (`NullNotAllowed`, `InvalidChoice`, `TypeMismatch`,
/// `RelationResolution`) always propagate. `UnregisteredModel`,
/// `UnknownField` and `Deserialization` are downgraded to logged diagnostics
/// on the read path when the store runs with permissive strictness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A non-nullable field resolved to no value during cleaning
    NullNotAllowed(String),
    /// A cleaned value fell outside the field's enumerated choices
    InvalidChoice(String),
    /// A value failed a field kind's type contract
    TypeMismatch(String),
    /// A filter or update referenced a field absent from the schema
    UnknownField(String),
    /// An operation referenced a model that was never registered
    UnregisteredModel(String),
    /// A reference value was neither an id nor an `{id: ...}`-shaped record
    RelationResolution(String),
    /// A stored string could not be parsed per its field kind
    Deserialization(String),
    /// The advisory busy flag never cleared within the configured timeout
    ReservationTimeout(String),
    /// A model declaration failed validation
    InvalidSchema(String),
    /// The underlying key-value service failed
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NullNotAllowed(msg) => write!(f, "null is not allowed: {msg}"),
            Self::InvalidChoice(msg) => write!(f, "invalid choice: {msg}"),
            Self::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Self::UnknownField(msg) => write!(f, "unknown field: {msg}"),
            Self::UnregisteredModel(msg) => write!(f, "unregistered model: {msg}"),
            Self::RelationResolution(msg) => write!(f, "relation resolution failed: {msg}"),
            Self::Deserialization(msg) => write!(f, "deserialization failed: {msg}"),
            Self::ReservationTimeout(msg) => write!(f, "id reservation timed out: {msg}"),
            Self::InvalidSchema(msg) => write!(f, "invalid schema: {msg}"),
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<KvError> for StoreError {
    fn from(error: KvError) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Rewraps the error with `(Model -> field)` context, preserving the variant.
    pub(crate) fn at(self, model: &str, field: &str) -> StoreError {
        let tag = |msg: String| format!("{msg} ({model} -> {field})");
        match self {
            Self::NullNotAllowed(m) => Self::NullNotAllowed(tag(m)),
            Self::InvalidChoice(m) => Self::InvalidChoice(tag(m)),
            Self::TypeMismatch(m) => Self::TypeMismatch(tag(m)),
            Self::UnknownField(m) => Self::UnknownField(tag(m)),
            Self::UnregisteredModel(m) => Self::UnregisteredModel(tag(m)),
            Self::RelationResolution(m) => Self::RelationResolution(tag(m)),
            Self::Deserialization(m) => Self::Deserialization(tag(m)),
            Self::ReservationTimeout(m) => Self::ReservationTimeout(tag(m)),
            Self::InvalidSchema(m) => Self::InvalidSchema(tag(m)),
            Self::Backend(m) => Self::Backend(tag(m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_variant() {
        let err = StoreError::NullNotAllowed("status".to_string());
        assert_eq!(err.to_string(), "null is not allowed: status");
    }

    #[test]
    fn field_context_keeps_variant() {
        let err = StoreError::InvalidChoice("bruh".to_string()).at("TaskChallenge", "status");
        assert!(matches!(err, StoreError::InvalidChoice(_)));
        assert!(err.to_string().contains("(TaskChallenge -> status)"));
    }

    #[test]
    fn kv_error_converts_to_backend() {
        let kv = KvError::Poisoned("map lock".to_string());
        let err: StoreError = kv.into();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
