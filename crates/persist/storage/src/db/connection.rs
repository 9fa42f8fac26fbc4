//! Blocking connection over sqlx.
//!
//! Each connection owns a current-thread runtime and drives the driver's
//! futures with `block_on`, so it must not be used from inside another
//! runtime's worker thread.

use super::binding::{BoundVar, FieldType};
use super::sql::{quote_identifier, Dialect};
use super::tsv;
use crate::{DbAuth, DbLocation};
use persist_types::{CivilTime, PersistError, PersistResult, TemporalValue};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column, Connection, Either, Executor, Postgres, Row, Sqlite, Statement, TypeInfo, ValueRef,
};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tokio::runtime::Runtime;
use tracing::{debug, info};

const COPY_CHUNK: usize = 64 * 1024;

/// Shape of a prepared statement as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementInfo {
    /// `None` when the driver cannot tell.
    pub param_count: Option<usize>,
    pub column_count: usize,
}

enum Backend {
    Sqlite(SqliteConnection),
    Postgres(PgConnection),
}

/// Owned parameter value in a form both drivers can encode.
#[derive(Debug, Clone, PartialEq)]
enum SqlParam {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    DateTime(chrono::NaiveDateTime),
}

impl SqlParam {
    fn from_var(var: &BoundVar) -> PersistResult<Self> {
        if var.is_null() {
            return Ok(SqlParam::Null);
        }
        let unsigned = var.is_unsigned();
        Ok(match var.field_type() {
            FieldType::Null => SqlParam::Null,
            FieldType::Bool => SqlParam::Bool(var.decode()?),
            FieldType::Tiny => SqlParam::Int16(var.decode()?),
            FieldType::Short if unsigned => SqlParam::Int32(var.decode()?),
            FieldType::Short => SqlParam::Int16(var.decode()?),
            FieldType::Long if unsigned => SqlParam::Int64(var.decode()?),
            FieldType::Long => SqlParam::Int32(var.decode()?),
            FieldType::LongLong => SqlParam::Int64(var.decode()?),
            FieldType::Float => SqlParam::Float32(var.decode()?),
            FieldType::Double => SqlParam::Float64(var.decode()?),
            FieldType::VarString => SqlParam::Text(var.decode()?),
            FieldType::DateTime => {
                let civil = var
                    .civil()
                    .ok_or_else(|| PersistError::invalid("malformed civil time binding"))?;
                SqlParam::DateTime(civil.to_naive()?)
            }
        })
    }
}

macro_rules! bind_params {
    ($db:ty, $sql:expr, $params:expr) => {{
        let mut query = sqlx::query::<$db>($sql);
        for param in $params {
            query = match param {
                SqlParam::Null => query.bind(None::<String>),
                SqlParam::Bool(v) => query.bind(v),
                SqlParam::Int16(v) => query.bind(v),
                SqlParam::Int32(v) => query.bind(v),
                SqlParam::Int64(v) => query.bind(v),
                SqlParam::Float32(v) => query.bind(v),
                SqlParam::Float64(v) => query.bind(v),
                SqlParam::Text(v) => query.bind(v),
                SqlParam::DateTime(v) => query.bind(v),
            };
        }
        query
    }};
}

fn driver_error(action: &str, err: sqlx::Error) -> PersistError {
    PersistError::backend(format!("{action} failed: {err}"))
}

fn to_params(params: &[&BoundVar]) -> PersistResult<Vec<SqlParam>> {
    params.iter().map(|var| SqlParam::from_var(var)).collect()
}

pub struct SqlxConnection {
    runtime: Runtime,
    backend: Option<Backend>,
    description: String,
}

impl SqlxConnection {
    /// Connect to `location`. SQLite files are created only when `create`.
    pub fn open(location: &DbLocation, auth: &DbAuth, create: bool) -> PersistResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PersistError::backend(format!("cannot start database runtime: {e}")))?;
        let description = location.conn_string();

        let backend = match location {
            DbLocation::Sqlite { .. } if location.is_in_memory() => {
                let options = "sqlite::memory:"
                    .parse::<SqliteConnectOptions>()
                    .map_err(|e| driver_error("sqlite options", e))?;
                Backend::Sqlite(
                    runtime
                        .block_on(SqliteConnection::connect_with(&options))
                        .map_err(|e| driver_error("connect", e))?,
                )
            }
            DbLocation::Sqlite { path } => {
                if create {
                    crate::location::ensure_parent_dir(path)?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(create);
                Backend::Sqlite(
                    runtime
                        .block_on(SqliteConnection::connect_with(&options))
                        .map_err(|e| driver_error(&format!("connect to {description}"), e))?,
                )
            }
            DbLocation::Network {
                db_type,
                host,
                port,
                db_name,
            } => match db_type.as_str() {
                "postgres" | "postgresql" => {
                    let credentials = auth.credentials(host, *port)?;
                    let options = PgConnectOptions::new()
                        .host(host)
                        .port(*port)
                        .database(db_name)
                        .username(&credentials.username)
                        .password(&credentials.password);
                    Backend::Postgres(
                        runtime
                            .block_on(PgConnection::connect_with(&options))
                            .map_err(|e| driver_error(&format!("connect to {description}"), e))?,
                    )
                }
                other => {
                    return Err(PersistError::invalid(format!(
                        "unsupported database type: {other}"
                    )))
                }
            },
        };
        info!(location = %description, "database connection opened");
        Ok(Self {
            runtime,
            backend: Some(backend),
            description,
        })
    }

    pub fn dialect(&self) -> Dialect {
        match self.backend {
            Some(Backend::Postgres(_)) => Dialect::Postgres,
            _ => Dialect::Sqlite,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn parts(&mut self) -> PersistResult<(&Runtime, &mut Backend)> {
        match &mut self.backend {
            Some(backend) => Ok((&self.runtime, backend)),
            None => Err(PersistError::backend("database connection is closed")),
        }
    }

    pub fn prepare(&mut self, sql: &str) -> PersistResult<StatementInfo> {
        debug!(sql, "prepare");
        let (runtime, backend) = self.parts()?;
        runtime.block_on(async {
            let info = match backend {
                Backend::Sqlite(conn) => {
                    let statement = conn
                        .prepare(sql)
                        .await
                        .map_err(|e| driver_error("prepare", e))?;
                    statement_info(statement.parameters(), statement.columns().len())
                }
                Backend::Postgres(conn) => {
                    let statement = conn
                        .prepare(sql)
                        .await
                        .map_err(|e| driver_error("prepare", e))?;
                    statement_info(statement.parameters(), statement.columns().len())
                }
            };
            Ok(info)
        })
    }

    /// Run a statement with positional parameters; returns rows affected.
    pub fn execute(&mut self, sql: &str, params: &[&BoundVar]) -> PersistResult<u64> {
        let params = to_params(params)?;
        debug!(sql, params = params.len(), "execute");
        let (runtime, backend) = self.parts()?;
        runtime.block_on(async {
            let affected = match backend {
                Backend::Sqlite(conn) => bind_params!(Sqlite, sql, params)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| driver_error("execute", e))?
                    .rows_affected(),
                Backend::Postgres(conn) => bind_params!(Postgres, sql, params)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| driver_error("execute", e))?
                    .rows_affected(),
            };
            Ok(affected)
        })
    }

    /// Run a query and materialize every row as wire-typed bindings.
    pub fn fetch_all(&mut self, sql: &str, params: &[&BoundVar]) -> PersistResult<Vec<Vec<BoundVar>>> {
        let params = to_params(params)?;
        debug!(sql, params = params.len(), "query");
        let (runtime, backend) = self.parts()?;
        runtime.block_on(async {
            match backend {
                Backend::Sqlite(conn) => bind_params!(Sqlite, sql, params)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| driver_error("query", e))?
                    .iter()
                    .map(sqlite_row)
                    .collect(),
                Backend::Postgres(conn) => bind_params!(Postgres, sql, params)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| driver_error("query", e))?
                    .iter()
                    .map(postgres_row)
                    .collect(),
            }
        })
    }

    /// Run literal SQL with no parameters; may hold several statements.
    pub fn execute_sql(&mut self, sql: &str) -> PersistResult<()> {
        debug!(sql, "execute_sql");
        let (runtime, backend) = self.parts()?;
        runtime.block_on(async {
            match backend {
                Backend::Sqlite(conn) => sqlx::raw_sql(sql).execute(&mut *conn).await.map(drop),
                Backend::Postgres(conn) => sqlx::raw_sql(sql).execute(&mut *conn).await.map(drop),
            }
            .map_err(|e| driver_error("execute_sql", e))
        })
    }

    pub fn begin(&mut self) -> PersistResult<()> {
        self.execute_sql("BEGIN")
    }

    pub fn commit(&mut self) -> PersistResult<()> {
        self.execute_sql("COMMIT")
    }

    pub fn rollback(&mut self) -> PersistResult<()> {
        self.execute_sql("ROLLBACK")
    }

    /// Load a staging file of tab-separated rows into `table` in one
    /// operation. Returns rows loaded.
    pub fn bulk_load(&mut self, table: &str, columns: &[String], staging: &Path) -> PersistResult<u64> {
        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let file = std::fs::File::open(staging).map_err(|e| {
            PersistError::backend(format!("cannot open staging file {}: {e}", staging.display()))
        })?;

        match self.dialect() {
            Dialect::Postgres => {
                let statement = format!(
                    "COPY {} ({column_list}) FROM STDIN",
                    quote_identifier(table)
                );
                self.copy_in(&statement, file)
            }
            Dialect::Sqlite => {
                let placeholders = vec!["?"; columns.len()].join(", ");
                let statement = format!(
                    "INSERT INTO {} ({column_list}) VALUES ({placeholders})",
                    quote_identifier(table)
                );
                self.begin()?;
                match self.insert_staged(&statement, columns.len(), file) {
                    Ok(rows) => {
                        self.commit()?;
                        Ok(rows)
                    }
                    Err(err) => {
                        let _ = self.rollback();
                        Err(err)
                    }
                }
            }
        }
    }

    fn copy_in(&mut self, statement: &str, mut file: std::fs::File) -> PersistResult<u64> {
        debug!(sql = statement, "copy in");
        let (runtime, backend) = self.parts()?;
        let Backend::Postgres(conn) = backend else {
            return Err(PersistError::invalid("COPY requires a PostgreSQL connection"));
        };
        runtime.block_on(async {
            let mut copy = conn
                .copy_in_raw(statement)
                .await
                .map_err(|e| driver_error("copy", e))?;
            let mut chunk = vec![0u8; COPY_CHUNK];
            loop {
                let n = match file.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        let _ = copy.abort(err.to_string()).await;
                        return Err(PersistError::from(err));
                    }
                };
                copy.send(&chunk[..n])
                    .await
                    .map_err(|e| driver_error("copy", e))?;
            }
            copy.finish().await.map_err(|e| driver_error("copy", e))
        })
    }

    fn insert_staged(&mut self, statement: &str, width: usize, file: std::fs::File) -> PersistResult<u64> {
        let mut rows = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let fields = tsv::parse_row(&line)?;
            if fields.len() != width {
                return Err(PersistError::invalid(format!(
                    "staging row {} has {} fields, expected {width}",
                    rows + 1,
                    fields.len()
                )));
            }
            let (runtime, backend) = self.parts()?;
            let Backend::Sqlite(conn) = backend else {
                return Err(PersistError::invalid("staged inserts require a SQLite connection"));
            };
            runtime.block_on(async {
                let mut query = sqlx::query::<Sqlite>(statement);
                for field in fields {
                    query = query.bind(field);
                }
                query
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| driver_error("staged insert", e))
            })?;
            rows += 1;
        }
        Ok(rows)
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        let closed = match backend {
            Backend::Sqlite(conn) => self.runtime.block_on(conn.close()),
            Backend::Postgres(conn) => self.runtime.block_on(conn.close()),
        };
        match closed {
            Ok(()) => debug!(location = %self.description, "database connection closed"),
            Err(err) => debug!(location = %self.description, error = %err, "database close failed"),
        }
    }
}

fn statement_info<T>(params: Option<Either<&[T], usize>>, column_count: usize) -> StatementInfo {
    StatementInfo {
        param_count: params.map(|p| match p {
            Either::Left(types) => types.len(),
            Either::Right(count) => count,
        }),
        column_count,
    }
}

/// Decode by the column's declared type where it names a boolean or a
/// date/time, since SQLite stores those as plain integers and text; fall
/// back to the value's runtime storage class otherwise.
fn sqlite_row(row: &SqliteRow) -> PersistResult<Vec<BoundVar>> {
    fn get<'r, T>(row: &'r SqliteRow, i: usize) -> PersistResult<T>
    where
        T: sqlx::Decode<'r, Sqlite>,
    {
        row.try_get_unchecked::<T, _>(i)
            .map_err(|e| driver_error("fetch", e))
    }

    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i).map_err(|e| driver_error("fetch", e))?;
            if raw.is_null() {
                return Ok(BoundVar::null());
            }
            let declared = row.column(i).type_info().name().to_ascii_uppercase();
            match declared.as_str() {
                "BOOLEAN" => return Ok(BoundVar::from_value(&get::<bool>(row, i)?)),
                "DATETIME" => return temporal_var(&get::<chrono::NaiveDateTime>(row, i)?),
                "DATE" => {
                    let date = get::<chrono::NaiveDate>(row, i)?;
                    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                        PersistError::invalid(format!("date {date} has no midnight"))
                    })?;
                    return temporal_var(&midnight);
                }
                _ => {}
            }
            let type_name = raw.type_info().name().to_ascii_uppercase();
            let var = match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => BoundVar::from_value(&get::<i64>(row, i)?),
                "REAL" | "NUMERIC" => BoundVar::from_value(&get::<f64>(row, i)?),
                "BLOB" => BoundVar::from_text_bytes(get::<Vec<u8>>(row, i)?),
                _ => BoundVar::from_value(&get::<String>(row, i)?),
            };
            Ok(var)
        })
        .collect()
}

fn postgres_row(row: &PgRow) -> PersistResult<Vec<BoundVar>> {
    fn get<'r, T>(row: &'r PgRow, i: usize) -> PersistResult<T>
    where
        T: sqlx::Decode<'r, Postgres>,
    {
        row.try_get_unchecked::<T, _>(i)
            .map_err(|e| driver_error("fetch", e))
    }

    (0..row.len())
        .map(|i| {
            let raw = row.try_get_raw(i).map_err(|e| driver_error("fetch", e))?;
            if raw.is_null() {
                return Ok(BoundVar::null());
            }
            let type_name = raw.type_info().name().to_ascii_uppercase();
            let var = match type_name.as_str() {
                "BOOL" => BoundVar::from_value(&get::<bool>(row, i)?),
                "INT2" => BoundVar::from_value(&get::<i16>(row, i)?),
                "INT4" => BoundVar::from_value(&get::<i32>(row, i)?),
                "INT8" => BoundVar::from_value(&get::<i64>(row, i)?),
                "FLOAT4" => BoundVar::from_value(&get::<f32>(row, i)?),
                "FLOAT8" => BoundVar::from_value(&get::<f64>(row, i)?),
                "TIMESTAMP" => temporal_var(&get::<chrono::NaiveDateTime>(row, i)?)?,
                "TIMESTAMPTZ" => {
                    let utc = get::<chrono::DateTime<chrono::Utc>>(row, i)?;
                    temporal_var(&utc.naive_utc())?
                }
                "DATE" => {
                    let date = get::<chrono::NaiveDate>(row, i)?;
                    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                        PersistError::invalid(format!("date {date} has no midnight"))
                    })?;
                    temporal_var(&midnight)?
                }
                "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                    BoundVar::from_value(&get::<String>(row, i)?)
                }
                other => {
                    return Err(PersistError::backend(format!(
                        "unsupported column type {other} at position {i}"
                    )))
                }
            };
            Ok(var)
        })
        .collect()
}

fn temporal_var(naive: &chrono::NaiveDateTime) -> PersistResult<BoundVar> {
    let value = TemporalValue::from_civil(CivilTime::from_naive(naive))?;
    Ok(BoundVar::from_value(&value))
}
