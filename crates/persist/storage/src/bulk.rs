//! Bulk-load database storage.
//!
//! While persisting, rows are staged per table in tab-separated files and
//! loaded in one statement per table when the transaction ends. Constraint
//! violations therefore surface at `end_transaction`. While retrieving, every
//! call is forwarded to an ordinary [`DbStorage`].

use crate::db::{tsv, BoundVar, DbStorage, FieldType, OutSpec, SqlxConnection, TableStorage};
use crate::{DbAuth, DbLocation, LogicalLocation, Storage, StorageConfig, StorageKind};
use persist_types::{PersistError, PersistResult};
use std::any::Any;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

struct StagedTable {
    name: String,
    /// Row buffer in first-seen column order; values persist between rows.
    row: Vec<(String, BoundVar)>,
    /// Column count fixed by the first staged row.
    width: Option<usize>,
    rows: u64,
    file: BufWriter<NamedTempFile>,
}

impl StagedTable {
    fn create(name: &str, config: &StorageConfig) -> PersistResult<Self> {
        let prefix = format!(
            "{}.",
            name.replace(|c: char| !c.is_ascii_alphanumeric() && c != '_', "_")
        );
        let dir = config.staging_dir();
        std::fs::create_dir_all(&dir)?;
        let file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tsv")
            .tempfile_in(&dir)
            .map_err(|e| {
                PersistError::backend(format!(
                    "cannot create staging file in {}: {e}",
                    dir.display()
                ))
            })?;
        debug!(table = name, path = %file.path().display(), "staging file created");
        Ok(Self {
            name: name.to_string(),
            row: Vec::new(),
            width: None,
            rows: 0,
            file: BufWriter::new(file),
        })
    }

    fn var(&mut self, column: &str) -> &mut BoundVar {
        let pos = match self.row.iter().position(|(name, _)| name == column) {
            Some(pos) => pos,
            None => {
                self.row.push((column.to_string(), BoundVar::null()));
                self.row.len() - 1
            }
        };
        &mut self.row[pos].1
    }

    fn columns(&self) -> Vec<String> {
        self.row.iter().map(|(name, _)| name.clone()).collect()
    }

    fn write_row(&mut self) -> PersistResult<()> {
        if self.row.is_empty() {
            return Err(PersistError::invalid(format!(
                "no values set for insert into {}",
                self.name
            )));
        }
        if let Some(width) = self.width {
            if let Some((column, _)) = self.row.get(width) {
                let err = PersistError::invalid(format!(
                    "column {column} first set after rows were staged for {}",
                    self.name
                ));
                self.row.truncate(width);
                return Err(err);
            }
        }
        let rendered = self
            .row
            .iter()
            .map(|(_, var)| {
                if var.is_null() || var.field_type() == FieldType::Null {
                    Ok(None)
                } else {
                    var.render().map(Some)
                }
            })
            .collect::<PersistResult<Vec<_>>>()?;
        let line = tsv::format_row(rendered.iter().map(Option::as_deref));
        self.file.write_all(line.as_bytes())?;
        self.width = Some(self.row.len());
        self.rows += 1;
        Ok(())
    }

    fn into_file(self) -> PersistResult<NamedTempFile> {
        self.file
            .into_inner()
            .map_err(|e| PersistError::backend(format!("cannot flush staging file: {}", e.error())))
    }
}

enum Mode {
    Unset,
    Persist {
        location: LogicalLocation,
        parsed: DbLocation,
    },
    Retrieve(Box<DbStorage>),
}

pub struct BulkLoadStorage {
    auth: Arc<DbAuth>,
    config: StorageConfig,
    mode: Mode,
    tables: Vec<StagedTable>,
    current: Option<usize>,
    scratch: BoundVar,
    /// First query-building call made while persisting; reported by the
    /// next `insert_row` or `query`.
    misused: Option<&'static str>,
}

impl BulkLoadStorage {
    pub fn new(auth: Arc<DbAuth>) -> Self {
        Self {
            auth,
            config: StorageConfig::default(),
            mode: Mode::Unset,
            tables: Vec::new(),
            current: None,
            scratch: BoundVar::null(),
            misused: None,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn retrieving(&mut self) -> PersistResult<&mut DbStorage> {
        match &mut self.mode {
            Mode::Retrieve(db) => Ok(&mut **db),
            Mode::Persist { .. } => Err(PersistError::invalid(
                "bulk-load storage is persisting; queries need a retrieve location",
            )),
            Mode::Unset => Err(PersistError::invalid("bulk-load storage has no location")),
        }
    }

    /// One-off database storage for DDL while persisting.
    fn transient(&self) -> PersistResult<DbStorage> {
        match &self.mode {
            Mode::Persist { location, .. } => {
                let mut db = DbStorage::new(Arc::clone(&self.auth));
                db.set_persist_location(location)?;
                Ok(db)
            }
            _ => Err(PersistError::invalid(
                "bulk-load storage is not configured for persisting",
            )),
        }
    }

    fn discard_staged(&mut self) {
        if !self.tables.is_empty() {
            debug!(tables = self.tables.len(), "discarding staged rows");
        }
        self.tables.clear();
        self.current = None;
        self.misused = None;
    }

    fn misuse(&mut self, call: &'static str) {
        warn!(call, "query builder used while bulk-load storage is persisting");
        self.misused.get_or_insert(call);
    }

    fn check_misuse(&mut self) -> PersistResult<()> {
        match self.misused.take() {
            Some(call) => Err(PersistError::invalid(format!(
                "{call} is not available while bulk-load storage is persisting"
            ))),
            None => Ok(()),
        }
    }

    fn load_staged(&mut self, parsed: &DbLocation) -> PersistResult<()> {
        let staged = std::mem::take(&mut self.tables);
        self.current = None;
        if staged.iter().all(|t| t.rows == 0) {
            return Ok(());
        }
        let mut conn = SqlxConnection::open(parsed, &self.auth, true)?;
        for table in staged {
            if table.rows == 0 {
                continue;
            }
            let name = table.name.clone();
            let columns = table.columns();
            let expected = table.rows;
            let file = table.into_file()?;
            let loaded = conn.bulk_load(&name, &columns, file.path())?;
            info!(table = %name, rows = loaded, staged = expected, "bulk load complete");
            if self.config.keep_staging_file {
                let (_, path) = file.keep().map_err(|e| {
                    PersistError::backend(format!("cannot keep staging file: {}", e.error))
                })?;
                info!(path = %path.display(), "staging file kept");
            }
        }
        Ok(())
    }
}

impl Storage for BulkLoadStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::BulkLoadDatabase
    }

    fn set_configuration(&mut self, config: &StorageConfig) -> PersistResult<()> {
        self.config = config.clone();
        Ok(())
    }

    fn set_persist_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        let parsed = DbLocation::parse(location)?;
        if parsed.is_in_memory() {
            return Err(PersistError::invalid(
                "bulk load needs a persistent database, not :memory:",
            ));
        }
        self.discard_staged();
        self.mode = Mode::Persist {
            location: location.clone(),
            parsed,
        };
        Ok(())
    }

    fn set_retrieve_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.discard_staged();
        let mut db = DbStorage::new(Arc::clone(&self.auth));
        db.set_retrieve_location(location)?;
        self.mode = Mode::Retrieve(Box::new(db));
        Ok(())
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        match &mut self.mode {
            Mode::Retrieve(db) => db.start_transaction(),
            Mode::Persist { .. } => {
                self.discard_staged();
                Ok(())
            }
            Mode::Unset => Err(PersistError::invalid("bulk-load storage has no location")),
        }
    }

    fn end_transaction(&mut self) -> PersistResult<()> {
        match &mut self.mode {
            Mode::Retrieve(db) => db.end_transaction(),
            Mode::Persist { parsed, .. } => {
                let parsed = parsed.clone();
                self.load_staged(&parsed)
            }
            Mode::Unset => Err(PersistError::invalid("bulk-load storage has no location")),
        }
    }

    fn as_table_mut(&mut self) -> Option<&mut dyn TableStorage> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl TableStorage for BulkLoadStorage {
    fn create_table_from_template(
        &mut self,
        table: &str,
        template: &str,
        may_already_exist: bool,
    ) -> PersistResult<()> {
        self.transient()?
            .create_table_from_template(table, template, may_already_exist)
    }

    fn drop_table(&mut self, table: &str) -> PersistResult<()> {
        self.transient()?.drop_table(table)
    }

    fn truncate_table(&mut self, table: &str) -> PersistResult<()> {
        self.transient()?.truncate_table(table)
    }

    fn execute_sql(&mut self, sql: &str) -> PersistResult<()> {
        if let Mode::Retrieve(db) = &mut self.mode {
            return db.execute_sql(sql);
        }
        self.transient()?.execute_sql(sql)
    }

    fn set_table_for_insert(&mut self, table: &str) -> PersistResult<()> {
        if !matches!(self.mode, Mode::Persist { .. }) {
            return Err(PersistError::invalid(format!(
                "cannot insert into {table}: bulk-load storage is not persisting"
            )));
        }
        let index = match self.tables.iter().position(|t| t.name == table) {
            Some(index) => index,
            None => {
                self.tables.push(StagedTable::create(table, &self.config)?);
                self.tables.len() - 1
            }
        };
        self.current = Some(index);
        Ok(())
    }

    fn input_var(&mut self, column: &str) -> &mut BoundVar {
        if let Mode::Retrieve(db) = &mut self.mode {
            return db.input_var(column);
        }
        match self.current.and_then(|i| self.tables.get_mut(i)) {
            Some(table) => table.var(column),
            None => {
                warn!(column, "value set with no insert table selected");
                &mut self.scratch
            }
        }
    }

    fn set_column_to_null(&mut self, column: &str) -> PersistResult<()> {
        self.input_var(column).set_null();
        Ok(())
    }

    fn insert_row(&mut self) -> PersistResult<()> {
        if let Mode::Retrieve(db) = &mut self.mode {
            return db.insert_row();
        }
        self.check_misuse()?;
        let table = self
            .current
            .and_then(|i| self.tables.get_mut(i))
            .ok_or_else(|| PersistError::invalid("no table set for insert"))?;
        table.write_row()
    }

    fn set_table_for_query(&mut self, table: &str, is_expr: bool) -> PersistResult<()> {
        self.retrieving()?.set_table_for_query(table, is_expr)
    }

    fn set_table_list_for_query(&mut self, tables: &[&str]) -> PersistResult<()> {
        self.retrieving()?.set_table_list_for_query(tables)
    }

    fn out_column(&mut self, column: &str, is_expr: bool) -> PersistResult<()> {
        self.retrieving()?.out_column(column, is_expr)
    }

    fn out_param_spec(&mut self, column: &str, spec: OutSpec, is_expr: bool) -> PersistResult<usize> {
        self.retrieving()?.out_param_spec(column, spec, is_expr)
    }

    fn cond_var(&mut self, name: &str) -> &mut BoundVar {
        if let Mode::Retrieve(db) = &mut self.mode {
            return db.cond_var(name);
        }
        warn!(call = "cond_var", "query builder used while bulk-load storage is persisting");
        self.misused.get_or_insert("cond_var");
        &mut self.scratch
    }

    fn order_by(&mut self, expression: &str) {
        match &mut self.mode {
            Mode::Retrieve(db) => db.order_by(expression),
            _ => self.misuse("order_by"),
        }
    }

    fn group_by(&mut self, expression: &str) {
        match &mut self.mode {
            Mode::Retrieve(db) => db.group_by(expression),
            _ => self.misuse("group_by"),
        }
    }

    fn set_query_where(&mut self, clause: &str) {
        match &mut self.mode {
            Mode::Retrieve(db) => db.set_query_where(clause),
            _ => self.misuse("set_query_where"),
        }
    }

    fn query(&mut self) -> PersistResult<()> {
        if !matches!(self.mode, Mode::Retrieve(_)) {
            self.check_misuse()?;
        }
        self.retrieving()?.query()
    }

    fn next(&mut self) -> PersistResult<bool> {
        self.retrieving()?.next()
    }

    fn column_var(&self, pos: usize) -> PersistResult<&BoundVar> {
        match &self.mode {
            Mode::Retrieve(db) => db.column_var(pos),
            _ => Err(PersistError::invalid("bulk-load storage is not retrieving")),
        }
    }

    fn out_var(&self, index: usize) -> PersistResult<&BoundVar> {
        match &self.mode {
            Mode::Retrieve(db) => db.out_var(index),
            _ => Err(PersistError::invalid("bulk-load storage is not retrieving")),
        }
    }

    fn finish_query(&mut self) -> PersistResult<()> {
        self.retrieving()?.finish_query()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableStorageExt;
    use persist_types::TemporalValue;

    fn setup(dir: &tempfile::TempDir, keep: bool) -> (BulkLoadStorage, LogicalLocation) {
        let location = LogicalLocation::new(format!(
            "sqlite://{}",
            dir.path().join("bulk.db").display()
        ));
        let mut storage = BulkLoadStorage::new(Arc::new(DbAuth::from_entries(Vec::new())));
        storage
            .set_configuration(&StorageConfig {
                staging_dir: Some(dir.path().join("staging")),
                keep_staging_file: keep,
            })
            .unwrap();
        storage.set_persist_location(&location).unwrap();
        storage
            .execute_sql("CREATE TABLE visits (id INTEGER, label TEXT, flux REAL)")
            .unwrap();
        (storage, location)
    }

    fn staged_files(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path().join("staging"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn rows_load_at_end_of_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, location) = setup(&dir, false);
        storage.start_transaction().unwrap();
        storage.set_table_for_insert("visits").unwrap();
        storage.set_column("label", &"tab\there".to_string()).unwrap();
        for id in 1..=3i64 {
            storage.set_column("id", &id).unwrap();
            storage.set_column("flux", &(id as f64 * 0.5)).unwrap();
            storage.insert_row().unwrap();
        }
        storage.set_column_to_null("label").unwrap();
        storage.set_column("id", &4i64).unwrap();
        storage.insert_row().unwrap();
        assert!(storage.query().is_err());
        storage.end_transaction().unwrap();
        assert!(staged_files(&dir).is_empty());

        storage.set_retrieve_location(&location).unwrap();
        storage.set_table_for_query("visits", false).unwrap();
        let id = storage.out_param::<i64>("id", false).unwrap();
        let label = storage.out_param::<String>("label", false).unwrap();
        storage.order_by("id");
        storage.query().unwrap();
        let mut seen = Vec::new();
        while storage.next().unwrap() {
            seen.push((storage.get(&id).unwrap(), storage.get_opt(&label).unwrap()));
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].1.as_deref(), Some("tab\there"));
        assert_eq!(seen[3], (4, None));
    }

    #[test]
    fn staging_file_can_be_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, _) = setup(&dir, true);
        storage.start_transaction().unwrap();
        storage.set_table_for_insert("visits").unwrap();
        storage.set_column("id", &1i64).unwrap();
        storage.insert_row().unwrap();
        storage.end_transaction().unwrap();

        let files = staged_files(&dir);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("visits."));
        assert!(files[0].ends_with(".tsv"));
    }

    #[test]
    fn late_columns_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, _) = setup(&dir, false);
        storage.start_transaction().unwrap();
        storage.set_table_for_insert("visits").unwrap();
        storage.set_column("id", &1i64).unwrap();
        storage.insert_row().unwrap();
        storage.set_column("flux", &1.0f64).unwrap();
        assert!(matches!(
            storage.insert_row(),
            Err(PersistError::InvalidArgument(_))
        ));

        storage.set_column("id", &2i64).unwrap();
        storage.insert_row().unwrap();
        storage.end_transaction().unwrap();
    }

    #[test]
    fn query_calls_while_persisting_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, _) = setup(&dir, false);
        storage.start_transaction().unwrap();
        storage.set_table_for_insert("visits").unwrap();
        storage.cond_var("id").assign(&1i64);
        storage.set_query_where("id = :id");
        storage.set_column("id", &1i64).unwrap();
        assert!(matches!(
            storage.insert_row(),
            Err(PersistError::InvalidArgument(_))
        ));
        storage.insert_row().unwrap();

        storage.order_by("id");
        assert!(matches!(storage.query(), Err(PersistError::InvalidArgument(_))));
    }

    #[test]
    fn every_scalar_kind_survives_a_bulk_load() {
        let dir = tempfile::tempdir().unwrap();
        let (mut storage, location) = setup(&dir, false);
        storage
            .execute_sql(
                "CREATE TABLE scalars (b BOOLEAN, i8v INTEGER, u8v INTEGER, i16v INTEGER, \
                 u16v INTEGER, i32v INTEGER, u32v INTEGER, i64v INTEGER, u64v INTEGER, \
                 f32v REAL, big REAL, tiny REAL, at TIMESTAMP, label TEXT)",
            )
            .unwrap();
        let when = TemporalValue::from_nsecs(-1_500_000_001);
        let tiny = 5e-324f64;

        storage.start_transaction().unwrap();
        storage.set_table_for_insert("scalars").unwrap();
        storage.set_column("b", &true).unwrap();
        storage.set_column("i8v", &i8::MIN).unwrap();
        storage.set_column("u8v", &u8::MAX).unwrap();
        storage.set_column("i16v", &i16::MIN).unwrap();
        storage.set_column("u16v", &u16::MAX).unwrap();
        storage.set_column("i32v", &i32::MIN).unwrap();
        storage.set_column("u32v", &u32::MAX).unwrap();
        storage.set_column("i64v", &i64::MIN).unwrap();
        storage.set_column("u64v", &(i64::MAX as u64)).unwrap();
        storage.set_column("f32v", &0.1f32).unwrap();
        storage.set_column("big", &f64::MAX).unwrap();
        storage.set_column("tiny", &tiny).unwrap();
        storage.set_column("at", &when).unwrap();
        storage.set_column("label", &"naïve\tvalue".to_string()).unwrap();
        storage.insert_row().unwrap();
        storage.end_transaction().unwrap();

        storage.set_retrieve_location(&location).unwrap();
        storage.set_table_for_query("scalars", false).unwrap();
        let b = storage.out_param::<bool>("b", false).unwrap();
        let i8v = storage.out_param::<i8>("i8v", false).unwrap();
        let u8v = storage.out_param::<u8>("u8v", false).unwrap();
        let i16v = storage.out_param::<i16>("i16v", false).unwrap();
        let u16v = storage.out_param::<u16>("u16v", false).unwrap();
        let i32v = storage.out_param::<i32>("i32v", false).unwrap();
        let u32v = storage.out_param::<u32>("u32v", false).unwrap();
        let i64v = storage.out_param::<i64>("i64v", false).unwrap();
        let u64v = storage.out_param::<u64>("u64v", false).unwrap();
        let f32v = storage.out_param::<f32>("f32v", false).unwrap();
        let big = storage.out_param::<f64>("big", false).unwrap();
        let small = storage.out_param::<f64>("tiny", false).unwrap();
        let at = storage.out_param::<TemporalValue>("at", false).unwrap();
        let label = storage.out_param::<String>("label", false).unwrap();
        storage.query().unwrap();
        assert!(storage.next().unwrap());

        assert!(storage.get(&b).unwrap());
        assert_eq!(storage.get(&i8v).unwrap(), i8::MIN);
        assert_eq!(storage.get(&u8v).unwrap(), u8::MAX);
        assert_eq!(storage.get(&i16v).unwrap(), i16::MIN);
        assert_eq!(storage.get(&u16v).unwrap(), u16::MAX);
        assert_eq!(storage.get(&i32v).unwrap(), i32::MIN);
        assert_eq!(storage.get(&u32v).unwrap(), u32::MAX);
        assert_eq!(storage.get(&i64v).unwrap(), i64::MIN);
        assert_eq!(storage.get(&u64v).unwrap(), i64::MAX as u64);
        assert_eq!(storage.get(&f32v).unwrap().to_bits(), 0.1f32.to_bits());
        assert_eq!(storage.get(&big).unwrap().to_bits(), f64::MAX.to_bits());
        assert_eq!(storage.get(&small).unwrap().to_bits(), tiny.to_bits());
        assert_eq!(storage.get(&at).unwrap(), when);
        assert_eq!(storage.get(&label).unwrap(), "naïve\tvalue");
        assert!(!storage.next().unwrap());
        storage.finish_query().unwrap();
    }
}
