//! SQL text construction.

use super::binding::BoundVar;
use persist_types::{PersistError, PersistResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `::` is matched first so PostgreSQL casts pass through untouched.
static WHERE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"::|:([A-Za-z_][A-Za-z0-9_]*)").expect("where-token regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Placeholder for the 1-based parameter `position`.
    pub fn placeholder(self, position: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
        }
    }

    /// Whether NULL inserts are rendered as literals instead of bound.
    pub fn inline_nulls(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn create_table_like(self, table: &str, template: &str, may_already_exist: bool) -> String {
        let exists = if may_already_exist { "IF NOT EXISTS " } else { "" };
        let table = quote_identifier(table);
        let template = quote_identifier(template);
        match self {
            Dialect::Postgres => {
                format!("CREATE TABLE {exists}{table} (LIKE {template} INCLUDING ALL)")
            }
            Dialect::Sqlite => {
                format!("CREATE TABLE {exists}{table} AS SELECT * FROM {template} WHERE 0")
            }
        }
    }

    pub fn drop_table(self, table: &str) -> String {
        format!("DROP TABLE {}", quote_identifier(table))
    }

    pub fn truncate_table(self, table: &str) -> String {
        match self {
            Dialect::Postgres => format!("TRUNCATE TABLE {}", quote_identifier(table)),
            Dialect::Sqlite => format!("DELETE FROM {}", quote_identifier(table)),
        }
    }
}

/// Quote each dot-separated part, ANSI style.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build an INSERT over every input binding, in name order.
///
/// Returns the statement and the bindings that became parameters.
pub fn insert_statement<'a>(
    dialect: Dialect,
    table: &str,
    inputs: &'a BTreeMap<String, BoundVar>,
) -> PersistResult<(String, Vec<&'a BoundVar>)> {
    if inputs.is_empty() {
        return Err(PersistError::invalid(format!(
            "no values set for insert into {table}"
        )));
    }
    let mut columns = Vec::with_capacity(inputs.len());
    let mut values = Vec::with_capacity(inputs.len());
    let mut params = Vec::new();
    for (name, var) in inputs {
        columns.push(quote_identifier(name));
        if var.is_null() && dialect.inline_nulls() {
            values.push("NULL".to_string());
        } else {
            params.push(var);
            values.push(dialect.placeholder(params.len()));
        }
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    );
    Ok((sql, params))
}

/// Parts of a SELECT, already rendered.
#[derive(Debug, Default)]
pub struct SelectParts<'a> {
    pub columns: &'a [String],
    pub tables: &'a [String],
    pub where_clause: &'a str,
    pub group_by: &'a str,
    pub order_by: &'a str,
}

pub fn select_statement(parts: &SelectParts<'_>) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        parts.columns.join(", "),
        parts.tables.join(", ")
    );
    for (keyword, text) in [
        ("WHERE", parts.where_clause),
        ("GROUP BY", parts.group_by),
        ("ORDER BY", parts.order_by),
    ] {
        if !text.trim().is_empty() {
            sql.push(' ');
            sql.push_str(keyword);
            sql.push(' ');
            sql.push_str(text);
        }
    }
    sql
}

/// Replace `:name` tokens with positional placeholders starting at
/// `first_position`.
///
/// The returned names are in token order, one per placeholder, so a name
/// used twice is bound twice.
pub fn rewrite_where(dialect: Dialect, clause: &str, first_position: usize) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let rewritten = WHERE_TOKEN.replace_all(clause, |caps: &regex::Captures<'_>| {
        match caps.get(1) {
            Some(name) => {
                names.push(name.as_str().to_string());
                dialect.placeholder(first_position + names.len() - 1)
            }
            None => "::".to_string(),
        }
    });
    (rewritten.into_owned(), names)
}
