use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use schemastep_common::{Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::editor::SchemaEditor;
use crate::graph::MigrationGraph;
use crate::introspect::{self, ColumnInfo};
use crate::ledger;
use crate::migration::{Migration, MigrationKey};
use crate::state::ProjectState;

/// Result of asking the executor to apply one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// DDL ran and the ledger was updated.
    Applied,
    /// The ledger already recorded the migration; nothing ran.
    AlreadyApplied,
    /// The live schema already matched the migration's result; only the
    /// ledger was updated.
    DetectedApplied,
}

/// A migration and whether (and when) it was applied.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub key: MigrationKey,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applies migrations from a [`MigrationGraph`] to one SQLite database,
/// keeping the `_migrations` ledger in step with the schema.
pub struct MigrationExecutor {
    conn: Mutex<Connection>,
    graph: MigrationGraph,
}

impl MigrationExecutor {
    pub fn open(db_path: &Path, graph: MigrationGraph) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, graph)
    }

    pub fn in_memory(graph: MigrationGraph) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn, graph)
    }

    fn with_connection(conn: Connection, graph: MigrationGraph) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
        ledger::ensure_table(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            graph,
        })
    }

    pub fn set_foreign_keys(&self, enabled: bool) -> Result<()> {
        let conn = self.connection()?;
        let sql = if enabled {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA foreign_keys=OFF;"
        };
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("failed to set foreign_keys: {e}")))
    }

    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("migration executor lock poisoned".into()))
    }

    pub fn is_applied(&self, key: &MigrationKey) -> Result<bool> {
        let conn = self.connection()?;
        ledger::is_applied(&conn, key)
    }

    /// Live columns of `table`, for inspection.
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let conn = self.connection()?;
        introspect::columns(&conn, table)
    }

    /// Every known migration in plan order with its ledger status.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let applied: BTreeMap<MigrationKey, DateTime<Utc>> = {
            let conn = self.connection()?;
            ledger::applied(&conn)?
                .into_iter()
                .map(|row| (row.key, row.applied_at))
                .collect()
        };
        Ok(self
            .graph
            .full_plan()
            .into_iter()
            .map(|m| MigrationStatus {
                key: m.key.clone(),
                applied_at: applied.get(&m.key).copied(),
            })
            .collect())
    }

    /// Unapplied migrations needed to reach `target` (or every leaf), in the
    /// order they would run.
    pub fn plan(&self, target: Option<&MigrationKey>) -> Result<Vec<MigrationKey>> {
        let candidates = match target {
            Some(key) => self.graph.forwards_plan(key)?,
            None => self.graph.full_plan(),
        };
        let conn = self.connection()?;
        let mut plan = Vec::new();
        for migration in candidates {
            if !ledger::is_applied(&conn, &migration.key)? {
                plan.push(migration.key.clone());
            }
        }
        Ok(plan)
    }

    /// Apply everything needed to reach `target` (or every leaf). The first
    /// failure aborts the run; migrations applied before it stay applied.
    pub fn migrate(
        &self,
        target: Option<&MigrationKey>,
    ) -> Result<Vec<(MigrationKey, ApplyOutcome)>> {
        let plan = self.plan(target)?;
        if plan.is_empty() {
            info!("no migrations to apply");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(plan.len());
        for key in plan {
            let outcome = self.apply(&key)?;
            outcomes.push((key, outcome));
        }
        info!("applied {} migration(s)", outcomes.len());
        Ok(outcomes)
    }

    /// Apply a single migration.
    ///
    /// Fails with `DependencyNotApplied` if a predecessor is missing from the
    /// ledger and with `SchemaConflict` if the live schema matches neither the
    /// migration's expected starting state nor its result. In both cases
    /// nothing is changed.
    pub fn apply(&self, key: &MigrationKey) -> Result<ApplyOutcome> {
        let migration = self.graph.get(key)?;
        let mut conn = self.connection()?;

        if ledger::is_applied(&conn, key)? {
            info!("{key} already applied, skipping");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        for dep in &migration.dependencies {
            if !ledger::is_applied(&conn, dep)? {
                return Err(Error::DependencyNotApplied {
                    migration: key.to_string(),
                    dependency: dep.to_string(),
                });
            }
        }

        let pre = self.graph.pre_state(key)?;
        let mut post = pre.clone();
        migration.mutate_state(&mut post)?;

        let off_pre = schema_mismatches(&conn, migration, &pre, &post)?;
        if !off_pre.is_empty() {
            if schema_mismatches(&conn, migration, &post, &post)?.is_empty() {
                info!("{key} detected as applied, recording in ledger");
                ledger::record_applied(&conn, key)?;
                return Ok(ApplyOutcome::DetectedApplied);
            }
            warn!("{key} does not match the live schema");
            return Err(Error::SchemaConflict {
                migration: key.to_string(),
                detail: off_pre.join("; "),
            });
        }

        info!("applying {key}");
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        {
            let mut editor = SchemaEditor::executing(&tx);
            run_forwards(migration, &pre, &mut editor)?;
            debug!("{key}: {} statement(s)", editor.statements().len());
        }
        ledger::record_applied(&tx, key)?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit {key}: {e}")))?;

        Ok(ApplyOutcome::Applied)
    }

    /// Revert an applied migration that no applied migration depends on.
    ///
    /// The live schema must be back at the migration's starting state before
    /// the ledger row is removed; otherwise the transaction is rolled back and
    /// `SchemaConflict` is returned.
    pub fn unapply(&self, key: &MigrationKey) -> Result<()> {
        let migration = self.graph.get(key)?;
        let mut conn = self.connection()?;

        if !ledger::is_applied(&conn, key)? {
            return Err(Error::NotApplied(key.to_string()));
        }
        for dependant in self.graph.dependants(key) {
            if ledger::is_applied(&conn, dependant)? {
                return Err(Error::DependantApplied {
                    migration: key.to_string(),
                    dependant: dependant.to_string(),
                });
            }
        }

        let pre = self.graph.pre_state(key)?;
        let states = intermediate_states(migration, &pre)?;
        let post = states.last().unwrap_or(&pre);

        let off_post = schema_mismatches(&conn, migration, post, post)?;
        if !off_post.is_empty() {
            return Err(Error::SchemaConflict {
                migration: key.to_string(),
                detail: off_post.join("; "),
            });
        }

        info!("unapplying {key}");
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        {
            let mut editor = SchemaEditor::executing(&tx);
            let app_label = migration.app_label();
            for (i, op) in migration.operations.iter().enumerate().rev() {
                let before = if i == 0 { &pre } else { &states[i - 1] };
                op.database_backwards(app_label, &mut editor, &states[i], before)?;
            }
        }

        let off_pre = schema_mismatches(&tx, migration, &pre, post)?;
        if !off_pre.is_empty() {
            warn!("{key} did not revert cleanly, rolling back");
            return Err(Error::SchemaConflict {
                migration: key.to_string(),
                detail: off_pre.join("; "),
            });
        }
        ledger::record_unapplied(&tx, key)?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit {key}: {e}")))?;
        Ok(())
    }

    /// SQL `key` would run against its expected starting state, without
    /// touching the database.
    pub fn sql_for(&self, key: &MigrationKey) -> Result<Vec<String>> {
        let migration = self.graph.get(key)?;
        let pre = self.graph.pre_state(key)?;
        let mut editor = SchemaEditor::collecting();
        run_forwards(migration, &pre, &mut editor)?;
        Ok(editor.into_statements())
    }
}

/// States after each operation of `migration`, starting from `pre`.
fn intermediate_states(migration: &Migration, pre: &ProjectState) -> Result<Vec<ProjectState>> {
    let mut states = Vec::with_capacity(migration.operations.len());
    let mut state = pre.clone();
    for op in &migration.operations {
        op.state_forwards(migration.app_label(), &mut state)?;
        states.push(state.clone());
    }
    Ok(states)
}

fn run_forwards(
    migration: &Migration,
    pre: &ProjectState,
    editor: &mut SchemaEditor<'_>,
) -> Result<()> {
    let app_label = migration.app_label();
    let mut from = pre.clone();
    for op in &migration.operations {
        let mut to = from.clone();
        op.state_forwards(app_label, &mut to)?;
        debug!("{}: {}", migration.key, op.describe());
        op.database_forwards(app_label, editor, &from, &to)?;
        from = to;
    }
    Ok(())
}

/// Compare every column `migration` touches against `expected`. Returns one
/// description per mismatch. `post` locates the table for each touched model.
fn schema_mismatches(
    conn: &Connection,
    migration: &Migration,
    expected: &ProjectState,
    post: &ProjectState,
) -> Result<Vec<String>> {
    let app_label = migration.app_label();
    let mut checked: Vec<(&str, &str)> = Vec::new();
    let mut mismatches = Vec::new();

    for op in &migration.operations {
        let model_name = op.model_name();
        let table = post.model(app_label, model_name)?.db_table();
        for field_name in op.touched_fields() {
            if checked.contains(&(model_name, field_name)) {
                continue;
            }
            checked.push((model_name, field_name));

            let want = expected
                .get_model(app_label, model_name)
                .and_then(|m| m.field(field_name));
            let live = introspect::column(conn, &table, field_name)?;

            let ok = match (&live, want) {
                (None, None) => true,
                (Some(col), Some(field)) => col.matches(field),
                _ => false,
            };
            if !ok {
                let want = want.map_or_else(|| "no column".to_string(), |f| f.describe());
                let found = live.map_or_else(|| "no column".to_string(), |c| c.describe());
                debug!("{table}.{field_name}: expected {want}, found {found}");
                mismatches.push(format!(
                    "{table}.{field_name}: expected {want}, found {found}"
                ));
            }
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::state::FieldSpec;

    fn graph() -> MigrationGraph {
        MigrationGraph::new([
            Migration::new("questions", "0001_initial").operation(Operation::create_model(
                "question",
                [
                    ("id", FieldSpec::auto()),
                    ("closed_at", FieldSpec::datetime().nullable()),
                ],
            )),
            Migration::new("questions", "0002_index_closed_at")
                .depends_on("questions", "0001_initial")
                .operation(Operation::alter_field(
                    "question",
                    "closed_at",
                    FieldSpec::datetime().nullable().indexed(),
                )),
        ])
        .unwrap()
    }

    #[test]
    fn in_memory_creates_ledger_table() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        let conn = executor.connection().unwrap();
        assert!(introspect::table_exists(&conn, "_migrations").unwrap());
    }

    #[test]
    fn migrate_runs_plan_in_order() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        let outcomes = executor.migrate(None).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| *o == ApplyOutcome::Applied));
        assert!(executor.plan(None).unwrap().is_empty());

        let closed = executor
            .columns("questions_question")
            .unwrap()
            .into_iter()
            .find(|c| c.name == "closed_at")
            .unwrap();
        assert!(closed.indexed);
    }

    #[test]
    fn status_reports_applied_at() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        executor
            .apply(&MigrationKey::new("questions", "0001_initial"))
            .unwrap();

        let status = executor.status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[0].is_applied());
        assert!(!status[1].is_applied());
    }

    #[test]
    fn sql_for_does_not_touch_database() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        let sql = executor
            .sql_for(&MigrationKey::new("questions", "0001_initial"))
            .unwrap();
        assert_eq!(sql.len(), 1);
        assert!(executor.columns("questions_question").unwrap().is_empty());
    }

    #[test]
    fn unapply_refuses_when_dependant_is_applied() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        executor.migrate(None).unwrap();
        let err = executor
            .unapply(&MigrationKey::new("questions", "0001_initial"))
            .unwrap_err();
        assert!(matches!(err, Error::DependantApplied { .. }));
    }

    #[test]
    fn unapply_unknown_or_unapplied_fails() {
        let executor = MigrationExecutor::in_memory(graph()).unwrap();
        let err = executor
            .unapply(&MigrationKey::new("questions", "0001_initial"))
            .unwrap_err();
        assert!(matches!(err, Error::NotApplied(_)));

        let err = executor
            .apply(&MigrationKey::new("questions", "0099_missing"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMigration(_)));
    }
}
