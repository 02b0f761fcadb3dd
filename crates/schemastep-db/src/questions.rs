//! Migration history of the `questions` app.

use schemastep_common::Result;

use crate::graph::MigrationGraph;
use crate::migration::Migration;
use crate::operation::Operation;
use crate::state::FieldSpec;

pub const APP_LABEL: &str = "questions";

pub const INITIAL: &str = "0001_initial";
pub const ALTER_CLOSED_AT_MAX_AND_MORE: &str =
    "0011_alter_question_closed_at_alter_question_max_and_more";
pub const ALTER_CLOSED_AT_RESOLVED_AT: &str =
    "0012_alter_question_closed_at_alter_question_resolved_at";

/// Table backing the `question` model.
pub const QUESTION_TABLE: &str = "questions_question";

pub fn migrations() -> Vec<Migration> {
    vec![
        initial(),
        alter_closed_at_max_and_more(),
        alter_closed_at_resolved_at(),
    ]
}

pub fn graph() -> Result<MigrationGraph> {
    MigrationGraph::new(migrations())
}

fn initial() -> Migration {
    Migration::new(APP_LABEL, INITIAL).operation(Operation::create_model(
        "question",
        [
            ("id", FieldSpec::auto()),
            ("title", FieldSpec::text()),
            ("max", FieldSpec::float()),
            ("created_at", FieldSpec::datetime()),
            ("closed_at", FieldSpec::datetime()),
            ("resolved_at", FieldSpec::datetime()),
        ],
    ))
}

fn alter_closed_at_max_and_more() -> Migration {
    Migration::new(APP_LABEL, ALTER_CLOSED_AT_MAX_AND_MORE)
        .depends_on(APP_LABEL, INITIAL)
        .operation(Operation::alter_field(
            "question",
            "closed_at",
            FieldSpec::datetime().nullable(),
        ))
        .operation(Operation::alter_field(
            "question",
            "max",
            FieldSpec::float().nullable(),
        ))
        .operation(Operation::alter_field(
            "question",
            "resolved_at",
            FieldSpec::datetime().nullable(),
        ))
}

/// Index both closing timestamps so range lookups on them stay cheap.
fn alter_closed_at_resolved_at() -> Migration {
    Migration::new(APP_LABEL, ALTER_CLOSED_AT_RESOLVED_AT)
        .depends_on(APP_LABEL, ALTER_CLOSED_AT_MAX_AND_MORE)
        .operation(Operation::alter_field(
            "question",
            "closed_at",
            FieldSpec::datetime().nullable().indexed(),
        ))
        .operation(Operation::alter_field(
            "question",
            "resolved_at",
            FieldSpec::datetime().nullable().indexed(),
        ))
}
