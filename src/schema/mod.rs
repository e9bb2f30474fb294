//! Model schemas: field kinds, typed values, and the registered catalog.

pub mod catalog;
pub mod field;
pub mod value;

pub use catalog::ModelSchema;
pub use field::{DefaultValue, FieldDef, FieldKind, RecordResolver};
pub use value::{record_id, FieldValue, Record, Values};

pub(crate) use catalog::SchemaCatalog;
