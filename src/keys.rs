//! Key grammar: `{prefix}:{model}:{id}:{field}`.
//!
//! One stored pair per field per record. The codec is the only place that
//! builds or splits keys, so the grammar lives here and nowhere else.

use crate::error::{StoreError, StoreResult};

/// Advisory busy-flag namespace, outside every store prefix.
const CREATING_NAMESPACE: &str = "__creating__";

/// Builds and parses record keys for one store prefix.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

/// Borrowed view of a split record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub model: &'a str,
    pub id: i64,
    pub field: &'a str,
}

impl KeyCodec {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding one field of one record.
    pub fn record_key(&self, model: &str, id: i64, field: &str) -> String {
        format!("{}:{model}:{id}:{field}", self.prefix)
    }

    /// Pattern matching every field key of one record.
    pub fn record_pattern(&self, model: &str, id: i64) -> String {
        format!("{}:{model}:{id}:*", self.prefix)
    }

    /// Pattern matching every key of one model.
    pub fn model_pattern(&self, model: &str) -> String {
        format!("{}:{model}:*", self.prefix)
    }

    /// Pattern matching one field across all records of a model.
    pub fn field_pattern(&self, model: &str, field: &str) -> String {
        format!("{}:{model}:*:{field}", self.prefix)
    }

    /// Pattern matching the entire keyspace of this prefix.
    pub fn prefix_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }

    /// The advisory busy flag writers poll before allocating an id.
    pub fn creating_flag(&self) -> String {
        format!("{CREATING_NAMESPACE}:{}", self.prefix)
    }

    /// Splits a key back into its model, id and field parts.
    ///
    /// Fails with [`StoreError::Deserialization`] on anything that does not
    /// follow the four-segment grammar under this prefix; scans treat such
    /// keys as foreign data.
    pub fn parse<'a>(&self, key: &'a str) -> StoreResult<ParsedKey<'a>> {
        let malformed =
            || StoreError::Deserialization(format!("key {key:?} does not follow the grammar"));

        let rest = key
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(malformed)?;

        let mut segments = rest.split(':');
        let model = segments.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let id_text = segments.next().ok_or_else(malformed)?;
        let field = segments.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        if segments.next().is_some() {
            return Err(malformed());
        }

        let id = id_text.parse::<i64>().map_err(|_| malformed())?;
        Ok(ParsedKey { model, id, field })
    }
}
