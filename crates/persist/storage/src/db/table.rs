use super::binding::{BoundVar, DbType, FieldType, OutParam, OutSpec};
use persist_types::{PersistError, PersistResult};

/// Table-level operations shared by the database backends.
///
/// Input bindings accumulate under column names and are retained after
/// each insert or query, so later rows overwrite them in place. Output
/// columns are either plain (read with [`TableStorage::column_var`]) or
/// bound (read with [`TableStorage::out_var`]); once one column is bound,
/// all of them must be.
pub trait TableStorage {
    fn create_table_from_template(
        &mut self,
        table: &str,
        template: &str,
        may_already_exist: bool,
    ) -> PersistResult<()>;
    fn drop_table(&mut self, table: &str) -> PersistResult<()>;
    fn truncate_table(&mut self, table: &str) -> PersistResult<()>;
    fn execute_sql(&mut self, sql: &str) -> PersistResult<()>;

    /// Choose the insert target; clears the input bindings.
    fn set_table_for_insert(&mut self, table: &str) -> PersistResult<()>;
    /// Input binding for `column`, created empty on first use.
    fn input_var(&mut self, column: &str) -> &mut BoundVar;
    fn set_column_to_null(&mut self, column: &str) -> PersistResult<()>;
    fn insert_row(&mut self) -> PersistResult<()>;

    /// Start a new query against one table (or table expression).
    fn set_table_for_query(&mut self, table: &str, is_expr: bool) -> PersistResult<()>;
    fn set_table_list_for_query(&mut self, tables: &[&str]) -> PersistResult<()>;
    fn out_column(&mut self, column: &str, is_expr: bool) -> PersistResult<()>;
    /// Request a bound output column; returns its binding index.
    fn out_param_spec(&mut self, column: &str, spec: OutSpec, is_expr: bool) -> PersistResult<usize>;
    /// Binding substituted for `:name` in the WHERE text.
    fn cond_var(&mut self, name: &str) -> &mut BoundVar;
    fn order_by(&mut self, expression: &str);
    fn group_by(&mut self, expression: &str);
    fn set_query_where(&mut self, clause: &str);
    fn query(&mut self) -> PersistResult<()>;
    /// Advance to the next row; `false` once the rows are exhausted.
    fn next(&mut self) -> PersistResult<bool>;
    /// Current row's value at output position `pos`, as fetched.
    fn column_var(&self, pos: usize) -> PersistResult<&BoundVar>;
    fn column_is_null(&self, pos: usize) -> PersistResult<bool> {
        Ok(self.column_var(pos)?.is_null())
    }
    fn column_field_type(&self, pos: usize) -> PersistResult<FieldType> {
        Ok(self.column_var(pos)?.field_type())
    }
    fn out_var(&self, index: usize) -> PersistResult<&BoundVar>;
    fn finish_query(&mut self) -> PersistResult<()>;
}

/// Typed conveniences over [`TableStorage`].
pub trait TableStorageExt: TableStorage {
    fn set_column<T: DbType>(&mut self, column: &str, value: &T) -> PersistResult<()> {
        self.input_var(column).assign(value);
        Ok(())
    }

    fn cond_param<T: DbType>(&mut self, name: &str, value: &T) -> PersistResult<()> {
        self.cond_var(name).assign(value);
        Ok(())
    }

    fn out_param<T: DbType>(&mut self, column: &str, is_expr: bool) -> PersistResult<OutParam<T>> {
        self.out_param_spec(column, OutSpec::of::<T>(), is_expr)
            .map(OutParam::new)
    }

    /// Value of a bound output column in the current row.
    fn get<T: DbType>(&self, param: &OutParam<T>) -> PersistResult<T> {
        let var = self.out_var(param.index())?;
        if var.is_null() {
            return Err(PersistError::invalid(format!(
                "output column {} is NULL",
                param.index()
            )));
        }
        var.decode()
    }

    fn get_opt<T: DbType>(&self, param: &OutParam<T>) -> PersistResult<Option<T>> {
        let var = self.out_var(param.index())?;
        if var.is_null() {
            return Ok(None);
        }
        var.decode().map(Some)
    }

    fn get_column_by_pos<T: DbType>(&self, pos: usize) -> PersistResult<T> {
        let var = self.column_var(pos)?;
        if var.is_null() {
            return Err(PersistError::invalid(format!("column {pos} is NULL")));
        }
        var.decode()
    }
}

impl<S: TableStorage + ?Sized> TableStorageExt for S {}
