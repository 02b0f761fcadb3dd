use std::fmt;

use schemastep_common::Result;
use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::state::ProjectState;

/// Identifies a migration: the app it belongs to plus its name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationKey {
    pub app_label: String,
    pub name: String,
}

impl MigrationKey {
    pub fn new(app_label: &str, name: &str) -> Self {
        Self {
            app_label: app_label.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

/// A versioned, declarative schema change.
///
/// Migrations form a DAG through `dependencies` and are tracked in the
/// `_migrations` ledger once applied. An applied migration is never edited;
/// later changes go in a new migration that depends on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub key: MigrationKey,
    pub dependencies: Vec<MigrationKey>,
    pub operations: Vec<Operation>,
}

impl Migration {
    pub fn new(app_label: &str, name: &str) -> Self {
        Self {
            key: MigrationKey::new(app_label, name),
            dependencies: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn depends_on(mut self, app_label: &str, name: &str) -> Self {
        self.dependencies.push(MigrationKey::new(app_label, name));
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn app_label(&self) -> &str {
        &self.key.app_label
    }

    /// Apply every operation to `state` in order.
    pub fn mutate_state(&self, state: &mut ProjectState) -> Result<()> {
        for op in &self.operations {
            op.state_forwards(self.app_label(), state)?;
        }
        Ok(())
    }
}
