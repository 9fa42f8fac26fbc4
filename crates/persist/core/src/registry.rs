use crate::{Formatter, FormatterConfig, FormatterFactory, Persistable, PropertySetFormatter};
use persist_types::{PersistError, PersistResult, PropertySet};
use std::any::TypeId;
use std::collections::HashMap;
use tracing::warn;

/// Canonical name of the built-in property-set persistable.
pub const PROPERTY_SET_NAME: &str = "PropertySet";

/// Maps persistable types and their canonical names to formatter factories.
///
/// Built once at startup and shared read-only afterwards (wrap it in an
/// `Arc`); registration needs `&mut self`, so it cannot race with lookups.
#[derive(Default)]
pub struct FormatterRegistry {
    by_name: HashMap<String, FormatterFactory>,
    names: HashMap<TypeId, String>,
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the formatters shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<PropertySet>(PROPERTY_SET_NAME, PropertySetFormatter::factory);
        registry
    }

    pub fn register<P: Persistable>(&mut self, name: &str, factory: FormatterFactory) {
        self.register_type_id(name, TypeId::of::<P>(), factory);
    }

    /// Register `factory` under both `name` and `type_id`.
    ///
    /// The first registration of a name or type wins; later ones are
    /// ignored so name and identity lookups keep agreeing.
    pub fn register_type_id(&mut self, name: &str, type_id: TypeId, factory: FormatterFactory) {
        if let Some(existing) = self.names.get(&type_id) {
            warn!(name, existing = %existing, "type already has a formatter; registration ignored");
            return;
        }
        if self.by_name.contains_key(name) {
            warn!(name, "formatter name already registered; registration ignored");
            return;
        }
        self.by_name.insert(name.to_string(), factory);
        self.names.insert(type_id, name.to_string());
    }

    pub fn name_for_type(&self, type_id: TypeId) -> PersistResult<&str> {
        self.names
            .get(&type_id)
            .map(String::as_str)
            .ok_or_else(|| PersistError::not_found(format!("no formatter for type {type_id:?}")))
    }

    pub fn lookup_by_name(
        &self,
        name: &str,
        config: Option<&FormatterConfig>,
    ) -> PersistResult<Box<dyn Formatter>> {
        let factory = self
            .by_name
            .get(name)
            .ok_or_else(|| PersistError::not_found(format!("no formatter named {name}")))?;
        Ok(factory(config))
    }

    pub fn lookup_by_type(
        &self,
        type_id: TypeId,
        config: Option<&FormatterConfig>,
    ) -> PersistResult<Box<dyn Formatter>> {
        let name = self.name_for_type(type_id)?;
        self.lookup_by_name(name, config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("FormatterRegistry")
            .field("formatters", &names)
            .finish()
    }
}
