//! Query result types.

use serde::Serialize;
use serde_json::{Map, Value};

/// A result row keyed by column name.
pub type Row = Map<String, Value>;

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Server type name, e.g. `int4` or `text`.
    pub type_name: String,
    /// Server type OID.
    pub type_oid: u32,
}

impl Column {
    /// Create a column description.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_oid,
        }
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Command tag, e.g. `SELECT` or `UPDATE`.
    pub command: String,
    /// Rows returned or affected.
    pub row_count: u64,
    /// Result columns in order.
    pub fields: Vec<Column>,
    /// Returned rows in order.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Result of a statement that returned rows.
    #[must_use]
    pub fn with_rows(command: impl Into<String>, fields: Vec<Column>, rows: Vec<Row>) -> Self {
        Self {
            command: command.into(),
            row_count: rows.len() as u64,
            fields,
            rows,
        }
    }

    /// Result of a statement that only reports an affected row count.
    #[must_use]
    pub fn affected(command: impl Into<String>, row_count: u64) -> Self {
        Self {
            command: command.into(),
            row_count,
            fields: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// First row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Whether no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Derive the command tag from statement text.
///
/// This is the first keyword, upper-cased. Leading whitespace, line comments
/// and block comments are skipped. Statements that start with `WITH` report
/// `WITH` since the real command is only known to the server.
#[must_use]
pub fn command_tag(sql: &str) -> String {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase()
}
