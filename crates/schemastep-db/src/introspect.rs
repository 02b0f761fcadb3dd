use rusqlite::{Connection, params};
use schemastep_common::{Error, Result};

use crate::state::FieldSpec;

/// A column as it currently exists in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    /// Covered by a single-column index created with `CREATE INDEX`.
    pub indexed: bool,
}

impl ColumnInfo {
    /// Whether the live column has the storage properties `field` declares.
    pub fn matches(&self, field: &FieldSpec) -> bool {
        if !self
            .declared_type
            .eq_ignore_ascii_case(field.field_type.sql_type())
        {
            return false;
        }
        if self.primary_key != field.primary_key {
            return false;
        }
        if field.primary_key {
            return true;
        }
        self.not_null == !field.null && self.indexed == field.db_index
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.primary_key {
            parts.push("primary key");
        }
        parts.push(if self.not_null { "not null" } else { "nullable" });
        if self.indexed && !self.primary_key {
            parts.push("indexed");
        }
        let mut out = parts.join(" ");
        out.push(' ');
        out.push_str(&self.declared_type.to_lowercase());
        out
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))
}

/// Columns of `table` in declaration order. Empty if the table does not exist.
pub fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let indexed: Vec<String> = single_column_indexes(conn, table)?
        .into_iter()
        .map(|(_, column)| column)
        .collect();

    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| Error::Database(format!("failed to prepare table_info: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| {
            let name: String = row.get(0)?;
            Ok(ColumnInfo {
                indexed: indexed.contains(&name),
                name,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })
        .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read column row: {e}")))
}

pub fn column(conn: &Connection, table: &str, name: &str) -> Result<Option<ColumnInfo>> {
    Ok(columns(conn, table)?.into_iter().find(|c| c.name == name))
}

/// Explicitly created single-column indexes covering `column`, whatever
/// they are named.
pub fn indexes_on(conn: &Connection, table: &str, column: &str) -> Result<Vec<String>> {
    Ok(single_column_indexes(conn, table)?
        .into_iter()
        .filter(|(_, c)| c == column)
        .map(|(index, _)| index)
        .collect())
}

/// `(index, column)` for every index created with `CREATE INDEX` that
/// covers exactly one column.
fn single_column_indexes(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'c'")
        .map_err(|e| Error::Database(format!("failed to prepare index_list: {e}")))?;
    let indexes = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Database(format!("failed to list indexes of {table}: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read index row: {e}")))?;

    let mut info = conn
        .prepare("SELECT name FROM pragma_index_info(?1)")
        .map_err(|e| Error::Database(format!("failed to prepare index_info: {e}")))?;

    let mut columns = Vec::new();
    for index in indexes {
        let mut names = info
            .query_map(params![index], |row| row.get::<_, Option<String>>(0))
            .map_err(|e| Error::Database(format!("failed to read index {index}: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read index column: {e}")))?;
        if names.len() == 1
            && let Some(Some(name)) = names.pop()
        {
            columns.push((index, name));
        }
    }
    Ok(columns)
}
