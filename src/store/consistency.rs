//! Missing-field consistency.
//!
//! When a schema gains fields after records were written, those records
//! lack keys for the new fields. With `save_consistency` enabled every
//! read-side projection passes through here and absent fields are filled
//! with their cleaned defaults, so old records present the same shape as
//! new ones. The store never writes the filled values back; the fill is
//! recomputed per read.

use log::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::schema::value::FieldValue;
use crate::schema::{ModelSchema, Record};
use crate::store::StoreInner;

impl StoreInner {
    /// Fills fields the stored record lacks with their cleaned defaults,
    /// deserialized into typed values like any stored data.
    ///
    /// A generator default runs once per missing field per record, exactly
    /// as it would have at create time. A non-nullable field without a
    /// default cannot be filled and fails the read.
    pub(crate) fn fill_missing(
        &self,
        schema: &ModelSchema,
        record: &mut Record,
    ) -> StoreResult<()> {
        for (name, def) in schema.fields() {
            if record.contains_key(name) {
                continue;
            }
            let cleaned = def.clean(None).map_err(|e| e.at(schema.name(), name))?;
            let value = match def.deserialize(&cleaned, self) {
                Ok(value) => value,
                Err(e @ StoreError::Deserialization(_)) if !self.strict() => {
                    warn!(
                        "filling {}:{name} degraded to the raw default: {e}",
                        schema.name()
                    );
                    FieldValue::Str(cleaned)
                }
                Err(e) => return Err(e.at(schema.name(), name)),
            };
            debug!("filled missing field {name} on a {} record", schema.name());
            record.insert(name.to_string(), value);
        }
        Ok(())
    }
}
