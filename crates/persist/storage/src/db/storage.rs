use super::binding::{BoundVar, OutSpec};
use super::connection::SqlxConnection;
use super::sql::{insert_statement, quote_identifier, rewrite_where, select_statement, SelectParts};
use super::table::TableStorage;
use crate::{DbAuth, DbLocation, LogicalLocation, Storage, StorageKind};
use persist_types::{PersistError, PersistResult};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct OutColumn {
    expr: String,
    binding: Option<(OutSpec, BoundVar)>,
}

struct Cursor {
    rows: std::vec::IntoIter<Vec<BoundVar>>,
    current: Option<Vec<BoundVar>>,
}

/// Relational database storage.
///
/// Statements are built from accumulated column bindings. Rows for a query
/// are fetched when it executes and walked with [`TableStorage::next`].
pub struct DbStorage {
    auth: Arc<DbAuth>,
    location: Option<DbLocation>,
    conn: Option<SqlxConnection>,
    read_only: bool,
    insert_table: Option<String>,
    inputs: BTreeMap<String, BoundVar>,
    query_tables: Vec<String>,
    out_columns: Vec<OutColumn>,
    where_clause: String,
    group_by: String,
    order_by: String,
    cursor: Option<Cursor>,
}

impl DbStorage {
    pub fn new(auth: Arc<DbAuth>) -> Self {
        Self {
            auth,
            location: None,
            conn: None,
            read_only: true,
            insert_table: None,
            inputs: BTreeMap::new(),
            query_tables: Vec::new(),
            out_columns: Vec::new(),
            where_clause: String::new(),
            group_by: String::new(),
            order_by: String::new(),
            cursor: None,
        }
    }

    pub fn location(&self) -> Option<&DbLocation> {
        self.location.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn connect(&mut self, location: &LogicalLocation, read_only: bool) -> PersistResult<()> {
        let parsed = DbLocation::parse(location)?;
        self.reset();
        self.read_only = read_only;
        if self.conn.is_some() && self.location.as_ref() == Some(&parsed) {
            debug!(location = %parsed.conn_string(), read_only, "reusing database connection");
            return Ok(());
        }
        self.conn = None;
        self.conn = Some(SqlxConnection::open(&parsed, &self.auth, !read_only)?);
        self.location = Some(parsed);
        Ok(())
    }

    fn reset(&mut self) {
        self.insert_table = None;
        self.inputs.clear();
        self.clear_query();
    }

    fn clear_query(&mut self) {
        self.query_tables.clear();
        self.out_columns.clear();
        self.where_clause.clear();
        self.group_by.clear();
        self.order_by.clear();
        self.cursor = None;
    }

    fn conn(&mut self) -> PersistResult<&mut SqlxConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| PersistError::invalid("database storage has no location"))
    }

    fn writable(&mut self) -> PersistResult<&mut SqlxConnection> {
        if self.read_only {
            return Err(PersistError::invalid(
                "database storage is configured for retrieval",
            ));
        }
        self.conn()
    }

    fn current_row(&self) -> PersistResult<&[BoundVar]> {
        self.cursor
            .as_ref()
            .and_then(|cursor| cursor.current.as_deref())
            .ok_or_else(|| PersistError::invalid("no current row"))
    }
}

impl Storage for DbStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::RelationalDatabase
    }

    fn set_persist_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.connect(location, false)
    }

    fn set_retrieve_location(&mut self, location: &LogicalLocation) -> PersistResult<()> {
        self.connect(location, true)
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        self.conn()?.begin()
    }

    fn end_transaction(&mut self) -> PersistResult<()> {
        self.cursor = None;
        self.conn()?.commit()
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

impl TableStorage for DbStorage {
    fn create_table_from_template(
        &mut self,
        table: &str,
        template: &str,
        may_already_exist: bool,
    ) -> PersistResult<()> {
        let conn = self.writable()?;
        let sql = conn
            .dialect()
            .create_table_like(table, template, may_already_exist);
        conn.execute_sql(&sql)
    }

    fn drop_table(&mut self, table: &str) -> PersistResult<()> {
        let conn = self.writable()?;
        let sql = conn.dialect().drop_table(table);
        conn.execute_sql(&sql)
    }

    fn truncate_table(&mut self, table: &str) -> PersistResult<()> {
        let conn = self.writable()?;
        let sql = conn.dialect().truncate_table(table);
        conn.execute_sql(&sql)
    }

    fn execute_sql(&mut self, sql: &str) -> PersistResult<()> {
        self.conn()?.execute_sql(sql)
    }

    fn set_table_for_insert(&mut self, table: &str) -> PersistResult<()> {
        if self.read_only {
            return Err(PersistError::invalid(format!(
                "cannot insert into {table}: storage is configured for retrieval"
            )));
        }
        self.insert_table = Some(table.to_string());
        self.inputs.clear();
        Ok(())
    }

    fn input_var(&mut self, column: &str) -> &mut BoundVar {
        self.inputs.entry(column.to_string()).or_default()
    }

    fn set_column_to_null(&mut self, column: &str) -> PersistResult<()> {
        self.input_var(column).set_null();
        Ok(())
    }

    fn insert_row(&mut self) -> PersistResult<()> {
        let table = self
            .insert_table
            .clone()
            .ok_or_else(|| PersistError::invalid("no table set for insert"))?;
        let Some(conn) = self.conn.as_mut() else {
            return Err(PersistError::invalid("database storage has no location"));
        };
        if self.read_only {
            return Err(PersistError::invalid(format!(
                "cannot insert into {table}: storage is configured for retrieval"
            )));
        }
        let (sql, params) = insert_statement(conn.dialect(), &table, &self.inputs)?;
        let info = conn.prepare(&sql)?;
        if let Some(expected) = info.param_count {
            if expected != params.len() {
                return Err(PersistError::invalid(format!(
                    "insert into {table} expects {expected} parameters, have {}",
                    params.len()
                )));
            }
        }
        conn.execute(&sql, &params)?;
        Ok(())
    }

    fn set_table_for_query(&mut self, table: &str, is_expr: bool) -> PersistResult<()> {
        self.clear_query();
        self.inputs.clear();
        self.query_tables.push(if is_expr {
            table.to_string()
        } else {
            quote_identifier(table)
        });
        Ok(())
    }

    fn set_table_list_for_query(&mut self, tables: &[&str]) -> PersistResult<()> {
        if tables.is_empty() {
            return Err(PersistError::invalid("empty table list for query"));
        }
        self.clear_query();
        self.inputs.clear();
        self.query_tables = tables.iter().map(|t| quote_identifier(t)).collect();
        Ok(())
    }

    fn out_column(&mut self, column: &str, is_expr: bool) -> PersistResult<()> {
        self.out_columns.push(OutColumn {
            expr: if is_expr {
                column.to_string()
            } else {
                quote_identifier(column)
            },
            binding: None,
        });
        Ok(())
    }

    fn out_param_spec(&mut self, column: &str, spec: OutSpec, is_expr: bool) -> PersistResult<usize> {
        let expr = if is_expr {
            column.to_string()
        } else {
            quote_identifier(column)
        };
        if self
            .out_columns
            .iter()
            .any(|c| c.binding.is_some() && c.expr == expr)
        {
            return Err(PersistError::invalid(format!(
                "duplicate output column requested: {column}"
            )));
        }
        self.out_columns.push(OutColumn {
            expr,
            binding: Some((spec, BoundVar::null())),
        });
        Ok(self.out_columns.len() - 1)
    }

    fn cond_var(&mut self, name: &str) -> &mut BoundVar {
        self.input_var(name)
    }

    fn order_by(&mut self, expression: &str) {
        self.order_by = expression.to_string();
    }

    fn group_by(&mut self, expression: &str) {
        self.group_by = expression.to_string();
    }

    fn set_query_where(&mut self, clause: &str) {
        self.where_clause = clause.to_string();
    }

    fn query(&mut self) -> PersistResult<()> {
        self.cursor = None;
        if self.query_tables.is_empty() {
            return Err(PersistError::invalid("no table set for query"));
        }
        if self.out_columns.is_empty() {
            return Err(PersistError::invalid("no output columns for query"));
        }
        let any_bound = self.out_columns.iter().any(|c| c.binding.is_some());
        if let Some(unbound) = self
            .out_columns
            .iter()
            .find(|c| any_bound && c.binding.is_none())
        {
            return Err(PersistError::invalid(format!(
                "unbound output column {} mixed with bound output columns",
                unbound.expr
            )));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(PersistError::invalid("database storage has no location"));
        };

        let (where_sql, names) = rewrite_where(conn.dialect(), &self.where_clause, 1);
        let params = names
            .iter()
            .map(|name| {
                self.inputs.get(name).ok_or_else(|| {
                    PersistError::invalid(format!("unbound variable :{name} in WHERE clause"))
                })
            })
            .collect::<PersistResult<Vec<_>>>()?;

        let columns = self
            .out_columns
            .iter()
            .map(|c| c.expr.clone())
            .collect::<Vec<_>>();
        let sql = select_statement(&SelectParts {
            columns: &columns,
            tables: &self.query_tables,
            where_clause: &where_sql,
            group_by: &self.group_by,
            order_by: &self.order_by,
        });

        let info = conn.prepare(&sql)?;
        if let Some(expected) = info.param_count {
            if expected != params.len() {
                return Err(PersistError::invalid(format!(
                    "query expects {expected} parameters, WHERE clause binds {}",
                    params.len()
                )));
            }
        }
        if info.column_count != columns.len() {
            return Err(PersistError::invalid(format!(
                "query returns {} columns, {} requested",
                info.column_count,
                columns.len()
            )));
        }

        let rows = conn.fetch_all(&sql, &params)?;
        debug!(rows = rows.len(), "query fetched");
        self.cursor = Some(Cursor {
            rows: rows.into_iter(),
            current: None,
        });
        Ok(())
    }

    fn next(&mut self) -> PersistResult<bool> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(PersistError::invalid("next() called with no query in progress"));
        };
        cursor.current = cursor.rows.next();
        let Some(row) = cursor.current.as_ref() else {
            return Ok(false);
        };
        for (pos, column) in self.out_columns.iter_mut().enumerate() {
            if let Some((spec, var)) = column.binding.as_mut() {
                let wire = row.get(pos).ok_or_else(|| {
                    PersistError::backend(format!("row is missing output column {pos}"))
                })?;
                if spec.fill(wire, var)? {
                    warn!(
                        column = %column.expr,
                        capacity = spec.capacity,
                        "text value truncated to output capacity"
                    );
                }
            }
        }
        Ok(true)
    }

    fn column_var(&self, pos: usize) -> PersistResult<&BoundVar> {
        let row = self.current_row()?;
        row.get(pos).ok_or_else(|| {
            PersistError::invalid(format!(
                "column position {pos} out of range for {} columns",
                row.len()
            ))
        })
    }

    fn out_var(&self, index: usize) -> PersistResult<&BoundVar> {
        self.current_row()?;
        match self.out_columns.get(index).and_then(|c| c.binding.as_ref()) {
            Some((_, var)) => Ok(var),
            None => Err(PersistError::invalid(format!(
                "no output binding with index {index}"
            ))),
        }
    }

    fn finish_query(&mut self) -> PersistResult<()> {
        self.cursor = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{FieldType, TableStorageExt};
    use persist_types::{CivilTime, TemporalValue};

    fn storage_at(dir: &tempfile::TempDir) -> (DbStorage, LogicalLocation) {
        let location = LogicalLocation::new(format!(
            "sqlite://{}",
            dir.path().join("test.db").display()
        ));
        let mut db = DbStorage::new(Arc::new(DbAuth::from_entries(Vec::new())));
        db.set_persist_location(&location).unwrap();
        (db, location)
    }

    #[test]
    fn where_binding_follows_token_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, location) = storage_at(&dir);
        db.execute_sql("CREATE TABLE pairs (a INTEGER, b INTEGER, tag TEXT)").unwrap();
        db.set_table_for_insert("pairs").unwrap();
        for (a, b, tag) in [(1i32, 2i32, "match"), (2, 1, "swapped")] {
            db.set_column("a", &a).unwrap();
            db.set_column("b", &b).unwrap();
            db.set_column("tag", &tag.to_string()).unwrap();
            db.insert_row().unwrap();
        }

        db.set_retrieve_location(&location).unwrap();
        db.set_table_for_query("pairs", false).unwrap();
        let tag = db.out_param::<String>("tag", false).unwrap();
        db.set_query_where("b = :y AND a = :x");
        db.cond_param("x", &1i32).unwrap();
        db.cond_param("y", &2i32).unwrap();
        db.query().unwrap();
        assert!(db.next().unwrap());
        assert_eq!(db.get(&tag).unwrap(), "match");
        assert!(!db.next().unwrap());
        db.finish_query().unwrap();
    }

    #[test]
    fn null_columns_report_null() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, _) = storage_at(&dir);
        db.execute_sql("CREATE TABLE t (id INTEGER, note TEXT)").unwrap();
        db.set_table_for_insert("t").unwrap();
        db.set_column("id", &7i64).unwrap();
        db.set_column_to_null("note").unwrap();
        db.insert_row().unwrap();

        db.set_table_for_query("t", false).unwrap();
        db.out_column("id", false).unwrap();
        db.out_column("note", false).unwrap();
        db.query().unwrap();
        assert!(db.next().unwrap());
        assert_eq!(db.get_column_by_pos::<i64>(0).unwrap(), 7);
        assert!(db.column_is_null(1).unwrap());
        assert_eq!(db.column_field_type(0).unwrap(), FieldType::LongLong);
        assert!(db.get_column_by_pos::<String>(1).is_err());
        assert!(db.column_var(2).is_err());
    }

    #[test]
    fn inputs_are_retained_between_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, _) = storage_at(&dir);
        db.execute_sql("CREATE TABLE t (id INTEGER, kind TEXT)").unwrap();
        db.set_table_for_insert("t").unwrap();
        db.set_column("kind", &"fixed".to_string()).unwrap();
        for id in 1..=3i64 {
            db.set_column("id", &id).unwrap();
            db.insert_row().unwrap();
        }

        db.set_table_for_query("t", false).unwrap();
        db.out_column("count(*)", true).unwrap();
        db.set_query_where("kind = :k");
        db.cond_param("k", &"fixed".to_string()).unwrap();
        db.query().unwrap();
        assert!(db.next().unwrap());
        assert_eq!(db.get_column_by_pos::<i64>(0).unwrap(), 3);
    }

    #[test]
    fn query_shape_errors_are_invalid_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, _) = storage_at(&dir);
        db.execute_sql("CREATE TABLE t (a INTEGER, b INTEGER)").unwrap();

        db.set_table_for_query("t", false).unwrap();
        assert!(matches!(db.query(), Err(PersistError::InvalidArgument(_))));

        db.set_table_for_query("t", false).unwrap();
        db.out_param::<i32>("a", false).unwrap();
        assert!(db.out_param::<i32>("a", false).is_err());
        db.out_column("b", false).unwrap();
        assert!(matches!(db.query(), Err(PersistError::InvalidArgument(_))));

        db.set_table_for_query("t", false).unwrap();
        db.out_column("a", false).unwrap();
        db.set_query_where("a = :missing");
        let err = db.query().unwrap_err();
        assert!(err.to_string().contains(":missing"));

        db.set_table_for_query("t", false).unwrap();
        db.out_column("*", true).unwrap();
        assert!(matches!(db.query(), Err(PersistError::InvalidArgument(_))));

        db.finish_query().unwrap();
        assert!(db.next().is_err());
    }

    #[test]
    fn retrieval_storage_refuses_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, location) = storage_at(&dir);
        db.set_retrieve_location(&location).unwrap();
        assert!(matches!(
            db.set_table_for_insert("t"),
            Err(PersistError::InvalidArgument(_))
        ));
    }

    #[test]
    fn temporal_and_unsigned_columns_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, _) = storage_at(&dir);
        db.execute_sql("CREATE TABLE t (at TEXT, n INTEGER, ok INTEGER, f REAL)").unwrap();
        let when = TemporalValue::from_civil(
            CivilTime::new(2003, 7, 1, 12, 0, 0).with_nanosecond(123_456_789),
        )
        .unwrap();
        db.start_transaction().unwrap();
        db.set_table_for_insert("t").unwrap();
        db.set_column("at", &when).unwrap();
        db.set_column("n", &u32::MAX).unwrap();
        db.set_column("ok", &true).unwrap();
        db.set_column("f", &1.5f32).unwrap();
        db.insert_row().unwrap();
        db.end_transaction().unwrap();

        db.set_table_for_query("t", false).unwrap();
        let at = db.out_param::<TemporalValue>("at", false).unwrap();
        let n = db.out_param::<u32>("n", false).unwrap();
        let ok = db.out_param::<bool>("ok", false).unwrap();
        let f = db.out_param::<f32>("f", false).unwrap();
        db.query().unwrap();
        assert!(db.next().unwrap());
        assert_eq!(db.get(&at).unwrap(), when);
        assert_eq!(db.get(&n).unwrap(), u32::MAX);
        assert!(db.get(&ok).unwrap());
        assert_eq!(db.get(&f).unwrap(), 1.5);
        assert_eq!(db.get_opt(&n).unwrap(), Some(u32::MAX));
    }

    #[test]
    fn template_tables_copy_structure() {
        let dir = tempfile::tempdir().unwrap();
        let (mut db, _) = storage_at(&dir);
        db.execute_sql("CREATE TABLE tpl (id INTEGER, v REAL)").unwrap();
        db.create_table_from_template("copy", "tpl", false).unwrap();
        db.create_table_from_template("copy", "tpl", true).unwrap();
        assert!(db.create_table_from_template("copy", "tpl", false).is_err());

        db.set_table_for_insert("copy").unwrap();
        db.set_column("id", &1i64).unwrap();
        db.insert_row().unwrap();
        db.truncate_table("copy").unwrap();

        db.set_table_for_query("copy", false).unwrap();
        db.out_column("id", false).unwrap();
        db.query().unwrap();
        assert!(!db.next().unwrap());

        db.drop_table("copy").unwrap();
        assert!(db.drop_table("copy").is_err());
    }
}
