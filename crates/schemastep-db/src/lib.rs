pub mod editor;
pub mod executor;
pub mod graph;
pub mod introspect;
pub mod ledger;
pub mod migration;
pub mod operation;
pub mod questions;
pub mod state;

pub use executor::{ApplyOutcome, MigrationExecutor, MigrationStatus};
pub use graph::MigrationGraph;
pub use introspect::ColumnInfo;
pub use ledger::AppliedMigration;
pub use migration::{Migration, MigrationKey};
pub use operation::Operation;
pub use state::{FieldSpec, FieldType, ModelState, ProjectState};
