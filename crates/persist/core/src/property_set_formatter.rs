//! Formatter for [`PropertySet`] persistables.
//!
//! Archive storages carry the whole set. Database storages map one set to
//! one table row, using the item mapping selected by the `itemName` entry
//! of the additional data.

use crate::{Formatter, FormatterConfig, ItemConfig, Persistable};
use persist_storage::archive::{read_property_set, write_property_set};
use persist_storage::db::sql::quote_identifier;
use persist_storage::db::{BoundVar, FieldType};
use persist_storage::{Storage, TableStorage};
use persist_types::{AdditionalData, PersistError, PersistResult, PropertySet, PropertyValue};
use std::any::Any;
use tracing::trace;

/// Additional-data key naming the item mapping to use.
pub const ITEM_NAME_KEY: &str = "itemName";

#[derive(Debug, Clone, Default)]
pub struct PropertySetFormatter {
    config: Option<FormatterConfig>,
}

impl PropertySetFormatter {
    pub fn new(config: Option<FormatterConfig>) -> Self {
        Self { config }
    }

    pub fn factory(config: Option<&FormatterConfig>) -> Box<dyn Formatter> {
        Box::new(Self::new(config.cloned()))
    }

    fn mapping(&self, additional: &AdditionalData) -> PersistResult<(String, ItemConfig)> {
        let item_name = additional.get_as_string(ITEM_NAME_KEY)?;
        let item = self
            .config
            .as_ref()
            .and_then(|c| c.item(&item_name))
            .cloned()
            .unwrap_or_default();
        Ok((item_name, item))
    }

    fn insert_row(
        &self,
        set: &PropertySet,
        table: &mut dyn TableStorage,
        additional: &AdditionalData,
    ) -> PersistResult<()> {
        let (item_name, item) = self.mapping(additional)?;
        let columns: Vec<(String, String)> = match &item.key_list {
            Some(keys) => keys.iter().map(|k| split_key(k)).collect(),
            None => set.names().map(|n| (n.to_string(), n.to_string())).collect(),
        };

        table.set_table_for_insert(item.table_name(&item_name))?;
        for (column, key) in &columns {
            match set.last(key) {
                Some(value) => assign(table.input_var(column), value)
                    .map_err(|e| PersistError::invalid(format!("property {key}: {e}")))?,
                None => table.set_column_to_null(column)?,
            }
        }
        trace!(table = item.table_name(&item_name), columns = columns.len(), "insert");
        table.insert_row()
    }

    fn select_row(
        &self,
        table: &mut dyn TableStorage,
        additional: &AdditionalData,
    ) -> PersistResult<PropertySet> {
        let (item_name, item) = self.mapping(additional)?;
        let keys = item.key_list.as_ref().ok_or_else(|| {
            PersistError::invalid(format!("item {item_name} has no key_list to read"))
        })?;
        let columns: Vec<(String, String)> = keys.iter().map(|k| split_key(k)).collect();

        table.set_table_for_query(item.table_name(&item_name), false)?;
        for (column, _) in &columns {
            table.out_column(column, false)?;
        }

        let mut terms = Vec::with_capacity(item.query_keys.len());
        for (i, entry) in item.query_keys.iter().enumerate() {
            let (column, key) = split_key(entry);
            let value = additional.last(&key).ok_or_else(|| {
                PersistError::not_found(format!("additional data lacks query key {key}"))
            })?;
            let var_name = format!("qk{i}");
            assign(table.cond_var(&var_name), value)?;
            terms.push(format!("{} = :{var_name}", quote_identifier(&column)));
        }
        table.set_query_where(&terms.join(" AND "));

        table.query()?;
        if !table.next()? {
            table.finish_query()?;
            return Err(PersistError::not_found(format!(
                "no row in {} for item {item_name}",
                item.table_name(&item_name)
            )));
        }
        let mut set = PropertySet::new();
        for (pos, (_, key)) in columns.iter().enumerate() {
            if let Some(value) = to_property(table.column_var(pos)?)? {
                set.set(key.as_str(), value);
            }
        }
        table.finish_query()?;
        Ok(set)
    }

    fn read_set(
        &self,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<PropertySet> {
        let kind = storage.kind();
        if let Some(archive) = storage.as_archive_mut() {
            return read_property_set(archive.reader()?);
        }
        if let Some(table) = storage.as_table_mut() {
            return self.select_row(table, additional);
        }
        Err(PersistError::invalid(format!(
            "PropertySet cannot be read from {kind} storage"
        )))
    }
}

impl Formatter for PropertySetFormatter {
    fn write(
        &mut self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<()> {
        let set = object
            .downcast_ref::<PropertySet>()
            .ok_or_else(|| PersistError::invalid(format!("expected a PropertySet, got {object:?}")))?;
        let kind = storage.kind();
        if let Some(archive) = storage.as_archive_mut() {
            return write_property_set(archive.writer()?, set);
        }
        if let Some(table) = storage.as_table_mut() {
            return self.insert_row(set, table, additional);
        }
        Err(PersistError::invalid(format!(
            "PropertySet cannot be written to {kind} storage"
        )))
    }

    fn read(
        &mut self,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<Box<dyn Persistable>> {
        Ok(Box::new(self.read_set(storage, additional)?))
    }

    fn update(
        &mut self,
        object: &mut dyn Persistable,
        storage: &mut dyn Storage,
        additional: &AdditionalData,
    ) -> PersistResult<()> {
        let overlay = self.read_set(storage, additional)?;
        let set = object
            .downcast_mut::<PropertySet>()
            .ok_or_else(|| PersistError::invalid("update target is not a PropertySet"))?;
        set.merge_from(&overlay);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `column=key` maps a column to a differently named key; a bare `key`
/// uses the same name for both.
fn split_key(entry: &str) -> (String, String) {
    match entry.split_once('=') {
        Some((column, key)) => (column.trim().to_string(), key.trim().to_string()),
        None => (entry.trim().to_string(), entry.trim().to_string()),
    }
}

fn assign(var: &mut BoundVar, value: &PropertyValue) -> PersistResult<()> {
    match value {
        PropertyValue::Bool(v) => var.assign(v),
        PropertyValue::Int8(v) => var.assign(v),
        PropertyValue::UInt8(v) => var.assign(v),
        PropertyValue::Int16(v) => var.assign(v),
        PropertyValue::UInt16(v) => var.assign(v),
        PropertyValue::Int32(v) => var.assign(v),
        PropertyValue::UInt32(v) => var.assign(v),
        PropertyValue::Int64(v) => var.assign(v),
        PropertyValue::UInt64(v) => var.assign(v),
        PropertyValue::Float32(v) => var.assign(v),
        PropertyValue::Float64(v) => var.assign(v),
        PropertyValue::Text(v) => var.assign(v),
        PropertyValue::Temporal(v) => var.assign(v),
        PropertyValue::Set(_) => {
            return Err(PersistError::invalid(
                "nested property sets have no column representation",
            ))
        }
    }
    Ok(())
}

/// Property value for a fetched column; `None` for NULL.
fn to_property(var: &BoundVar) -> PersistResult<Option<PropertyValue>> {
    if var.is_null() {
        return Ok(None);
    }
    let unsigned = var.is_unsigned();
    let value = match var.field_type() {
        FieldType::Null => return Ok(None),
        FieldType::Bool => PropertyValue::Bool(var.decode()?),
        FieldType::Tiny if unsigned => PropertyValue::UInt8(var.decode()?),
        FieldType::Tiny => PropertyValue::Int8(var.decode()?),
        FieldType::Short if unsigned => PropertyValue::UInt16(var.decode()?),
        FieldType::Short => PropertyValue::Int16(var.decode()?),
        FieldType::Long if unsigned => PropertyValue::UInt32(var.decode()?),
        FieldType::Long => PropertyValue::Int32(var.decode()?),
        FieldType::LongLong if unsigned => PropertyValue::UInt64(var.decode()?),
        FieldType::LongLong => PropertyValue::Int64(var.decode()?),
        FieldType::Float => PropertyValue::Float32(var.decode()?),
        FieldType::Double => PropertyValue::Float64(var.decode()?),
        FieldType::DateTime => PropertyValue::Temporal(var.decode()?),
        FieldType::VarString => PropertyValue::Text(var.decode()?),
    };
    Ok(Some(value))
}
