use rusqlite::Connection;
use schemastep_common::{Error, Result};
use tracing::debug;

use crate::introspect;
use crate::state::{FieldSpec, FieldType, ModelState};

/// Name of the single-column index maintained for a `db_index` field.
pub fn index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_sql(name: &str, field: &FieldSpec) -> String {
    let mut sql = format!("{} {}", quote(name), field.field_type.sql_type());
    if !field.null {
        sql.push_str(" NOT NULL");
    }
    if field.primary_key {
        sql.push_str(" PRIMARY KEY");
        if field.field_type == FieldType::AutoField {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    sql
}

/// Translates model changes into DDL.
///
/// An executing editor runs every statement on its connection as it is
/// produced; a collecting editor only records them (used to preview SQL).
pub struct SchemaEditor<'conn> {
    conn: Option<&'conn Connection>,
    statements: Vec<String>,
}

impl<'conn> SchemaEditor<'conn> {
    pub fn executing(conn: &'conn Connection) -> Self {
        Self {
            conn: Some(conn),
            statements: Vec::new(),
        }
    }

    pub fn collecting() -> Self {
        Self {
            conn: None,
            statements: Vec::new(),
        }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    fn execute(&mut self, sql: String) -> Result<()> {
        debug!("{sql}");
        if let Some(conn) = self.conn {
            conn.execute_batch(&sql)
                .map_err(|e| Error::Database(format!("failed to execute `{sql}`: {e}")))?;
        }
        self.statements.push(sql);
        Ok(())
    }

    pub fn create_model(&mut self, model: &ModelState) -> Result<()> {
        self.create_table(&model.db_table(), model)?;
        self.create_indexes(model)
    }

    pub fn delete_model(&mut self, model: &ModelState) -> Result<()> {
        self.execute(format!("DROP TABLE {}", quote(&model.db_table())))
    }

    /// Add `field_name` (as declared in `model`) to the existing table.
    /// Only valid for nullable, non-key columns.
    pub fn add_column(&mut self, model: &ModelState, field_name: &str) -> Result<()> {
        let field = model.require_field(field_name)?;
        let table = model.db_table();
        self.execute(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote(&table),
            column_sql(field_name, field)
        ))?;
        if field.db_index && !field.primary_key {
            self.create_index(&table, field_name)?;
        }
        Ok(())
    }

    pub fn alter_field(
        &mut self,
        from: &ModelState,
        to: &ModelState,
        field_name: &str,
    ) -> Result<()> {
        let old = from.require_field(field_name)?;
        let new = to.require_field(field_name)?;
        let table = to.db_table();

        if old.column_differs(new) {
            return self.remake_table(from, to);
        }

        match (old.db_index, new.db_index) {
            (false, true) => self.create_index(&table, field_name),
            (true, false) => self.drop_index(&table, field_name),
            _ => {
                debug!("{table}.{field_name} unchanged, nothing to alter");
                Ok(())
            }
        }
    }

    /// Rebuild `from`'s table with `to`'s definition, carrying over every
    /// column present in both. SQLite cannot change a column's type or
    /// nullability in place.
    pub fn remake_table(&mut self, from: &ModelState, to: &ModelState) -> Result<()> {
        let table = to.db_table();
        let temp = format!("new__{table}");

        self.create_table(&temp, to)?;

        let shared: Vec<String> = to
            .fields
            .iter()
            .filter(|(name, _)| from.field(name).is_some())
            .map(|(name, _)| quote(name))
            .collect();
        if !shared.is_empty() {
            let columns = shared.join(", ");
            self.execute(format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quote(&temp),
                quote(&from.db_table())
            ))?;
        }

        self.execute(format!("DROP TABLE {}", quote(&from.db_table())))?;
        self.execute(format!(
            "ALTER TABLE {} RENAME TO {}",
            quote(&temp),
            quote(&table)
        ))?;
        self.create_indexes(to)
    }

    fn create_table(&mut self, table: &str, model: &ModelState) -> Result<()> {
        let columns: Vec<String> = model
            .fields
            .iter()
            .map(|(name, field)| column_sql(name, field))
            .collect();
        self.execute(format!(
            "CREATE TABLE {} ({})",
            quote(table),
            columns.join(", ")
        ))
    }

    fn create_indexes(&mut self, model: &ModelState) -> Result<()> {
        let table = model.db_table();
        for (name, field) in &model.fields {
            if field.db_index && !field.primary_key {
                self.create_index(&table, name)?;
            }
        }
        Ok(())
    }

    fn create_index(&mut self, table: &str, column: &str) -> Result<()> {
        self.execute(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(&index_name(table, column)),
            quote(table),
            quote(column)
        ))
    }

    /// Drop every single-column index on `column`. Indexes created out of
    /// band count as `db_index` too, so they go as well. A collecting editor
    /// has no schema to look at and assumes the canonical name.
    fn drop_index(&mut self, table: &str, column: &str) -> Result<()> {
        let names = match self.conn {
            Some(conn) => introspect::indexes_on(conn, table, column)?,
            None => vec![index_name(table, column)],
        };
        for name in names {
            self.execute(format!("DROP INDEX IF EXISTS {}", quote(&name)))?;
        }
        Ok(())
    }
}
