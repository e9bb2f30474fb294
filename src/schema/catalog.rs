//! Model declarations and the registered-schema catalog.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;

use crate::error::{StoreError, StoreResult};
use crate::schema::field::{FieldDef, FieldKind};

/// A model declaration: an ordered set of named fields plus an optional
/// model-wide expiry.
///
/// Every registered model carries an integer `id` field; declare one to
/// customize it (it must be a non-nullable number) or let registration
/// inject it in front of the declared fields.
///
/// ```
/// use kvmodel::{FieldDef, ModelSchema};
///
/// let schema = ModelSchema::new("TaskChallenge")
///     .field("status", FieldDef::string().not_null().with_default("created"))
///     .field("attempts", FieldDef::number().with_default(0));
/// ```
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    fields: Vec<(String, FieldDef)>,
    default_ttl: Option<u64>,
}

impl ModelSchema {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            default_ttl: None,
        }
    }

    /// Appends a field declaration. Declaration order is preserved and
    /// drives iteration everywhere fields are walked.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.push((name.into(), def));
        self
    }

    /// Expiry applied to every field key of this model unless the field
    /// declares its own.
    #[must_use]
    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl = Some(secs);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, def)| def)
    }

    /// Effective expiry for one field of this model.
    pub fn field_ttl(&self, def: &FieldDef) -> Option<u64> {
        def.ttl().or(self.default_ttl)
    }

    fn validate(&self) -> StoreResult<()> {
        validate_name(&self.name, "model name")?;
        let mut seen = std::collections::BTreeSet::new();
        for (name, def) in &self.fields {
            validate_name(name, "field name")?;
            if name.contains("__") {
                return Err(StoreError::InvalidSchema(format!(
                    "field name {name:?} may not contain '__' (reserved for filter paths)"
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "field {name:?} declared twice on {}",
                    self.name
                )));
            }
            if let Some(target) = def.kind().referenced_model() {
                validate_name(target, "referenced model name")?;
            }
            if name == "id" && !matches!(def.kind(), FieldKind::Number) {
                return Err(StoreError::InvalidSchema(format!(
                    "the id field of {} must be a number",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Injects the implicit id field when the declaration omits it.
    fn ensure_id(mut self) -> Self {
        if self.field_def("id").is_none() {
            self.fields
                .insert(0, ("id".to_string(), FieldDef::number().not_null()));
        }
        self
    }
}

fn validate_name(name: &str, what: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::InvalidSchema(format!("{what} is empty")));
    }
    if name.contains([':', '*', '?']) {
        return Err(StoreError::InvalidSchema(format!(
            "{what} {name:?} may not contain ':', '*' or '?'"
        )));
    }
    Ok(())
}

/// Registered models, shared across store clones.
pub(crate) struct SchemaCatalog {
    models: RwLock<HashMap<String, Arc<ModelSchema>>>,
}

impl SchemaCatalog {
    pub(crate) fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Validates and installs a schema. Registering a name again replaces
    /// the previous declaration, which is how schema migrations land.
    pub(crate) fn register(&self, schema: ModelSchema) -> StoreResult<()> {
        schema.validate()?;
        let schema = schema.ensure_id();
        let mut models = self
            .models
            .write()
            .map_err(|_| StoreError::Backend("schema catalog lock poisoned".to_string()))?;
        if models
            .insert(schema.name().to_string(), Arc::new(schema))
            .is_some()
        {
            debug!("schema catalog replaced an existing model declaration");
        }
        Ok(())
    }

    pub(crate) fn get(&self, model: &str) -> StoreResult<Option<Arc<ModelSchema>>> {
        let models = self
            .models
            .read()
            .map_err(|_| StoreError::Backend("schema catalog lock poisoned".to_string()))?;
        Ok(models.get(model).cloned())
    }

    pub(crate) fn require(&self, model: &str) -> StoreResult<Arc<ModelSchema>> {
        self.get(model)?.ok_or_else(|| {
            StoreError::UnregisteredModel(format!("{model} was never registered"))
        })
    }

    pub(crate) fn names(&self) -> StoreResult<Vec<String>> {
        let models = self
            .models
            .read()
            .map_err(|_| StoreError::Backend("schema catalog lock poisoned".to_string()))?;
        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_injected_in_front() {
        let catalog = SchemaCatalog::new();
        catalog
            .register(ModelSchema::new("Task").field("status", FieldDef::string()))
            .unwrap();
        let schema = catalog.require("Task").unwrap();
        let names: Vec<&str> = schema.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "status"]);
        assert!(!schema.field_def("id").unwrap().nullable());
    }

    #[test]
    fn declared_id_must_be_number() {
        let catalog = SchemaCatalog::new();
        let bad = ModelSchema::new("Task").field("id", FieldDef::string());
        assert!(matches!(
            catalog.register(bad),
            Err(StoreError::InvalidSchema(_))
        ));
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let catalog = SchemaCatalog::new();
        assert!(catalog.register(ModelSchema::new("a:b")).is_err());
        assert!(catalog
            .register(ModelSchema::new("Task").field("a:b", FieldDef::string()))
            .is_err());
        assert!(catalog
            .register(ModelSchema::new("Task").field("a__b", FieldDef::string()))
            .is_err());
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let catalog = SchemaCatalog::new();
        let bad = ModelSchema::new("Task")
            .field("status", FieldDef::string())
            .field("status", FieldDef::number());
        assert!(matches!(
            catalog.register(bad),
            Err(StoreError::InvalidSchema(_))
        ));
    }

    #[test]
    fn reregistration_replaces() {
        let catalog = SchemaCatalog::new();
        catalog
            .register(ModelSchema::new("Task").field("status", FieldDef::string()))
            .unwrap();
        catalog
            .register(
                ModelSchema::new("Task")
                    .field("status", FieldDef::string())
                    .field("attempts", FieldDef::number()),
            )
            .unwrap();
        let schema = catalog.require("Task").unwrap();
        assert!(schema.field_def("attempts").is_some());
    }

    #[test]
    fn require_names_the_missing_model() {
        let catalog = SchemaCatalog::new();
        let err = catalog.require("Ghost").unwrap_err();
        assert!(matches!(err, StoreError::UnregisteredModel(_)));
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn ttl_prefers_field_over_model() {
        let schema = ModelSchema::new("Session")
            .field("token", FieldDef::string().with_ttl(30))
            .field("note", FieldDef::string())
            .with_default_ttl(300);
        let token = schema.field_def("token").unwrap();
        let note = schema.field_def("note").unwrap();
        assert_eq!(schema.field_ttl(token), Some(30));
        assert_eq!(schema.field_ttl(note), Some(300));
    }
}
