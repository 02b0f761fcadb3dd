use schemastep_common::{Error, Result};

use crate::editor::SchemaEditor;
use crate::state::{FieldSpec, ModelState, ProjectState};

/// A single declarative schema change inside a migration.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateModel {
        name: String,
        fields: Vec<(String, FieldSpec)>,
    },
    AddField {
        model_name: String,
        name: String,
        field: FieldSpec,
    },
    /// Change a column's storage properties without renaming it.
    AlterField {
        model_name: String,
        name: String,
        field: FieldSpec,
    },
}

impl Operation {
    pub fn create_model<'a>(
        name: &str,
        fields: impl IntoIterator<Item = (&'a str, FieldSpec)>,
    ) -> Self {
        Operation::CreateModel {
            name: name.to_lowercase(),
            fields: fields
                .into_iter()
                .map(|(n, f)| (n.to_string(), f))
                .collect(),
        }
    }

    pub fn add_field(model_name: &str, name: &str, field: FieldSpec) -> Self {
        Operation::AddField {
            model_name: model_name.to_lowercase(),
            name: name.to_string(),
            field,
        }
    }

    pub fn alter_field(model_name: &str, name: &str, field: FieldSpec) -> Self {
        Operation::AlterField {
            model_name: model_name.to_lowercase(),
            name: name.to_string(),
            field,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateModel { name, .. } => format!("Create model {name}"),
            Operation::AddField {
                model_name, name, ..
            } => format!("Add field {name} to {model_name}"),
            Operation::AlterField {
                model_name, name, ..
            } => format!("Alter field {name} on {model_name}"),
        }
    }

    /// Model this operation acts on.
    pub fn model_name(&self) -> &str {
        match self {
            Operation::CreateModel { name, .. } => name,
            Operation::AddField { model_name, .. } | Operation::AlterField { model_name, .. } => {
                model_name
            }
        }
    }

    /// Fields whose live definition this operation determines.
    pub fn touched_fields(&self) -> Vec<&str> {
        match self {
            Operation::CreateModel { fields, .. } => fields.iter().map(|(n, _)| n.as_str()).collect(),
            Operation::AddField { name, .. } | Operation::AlterField { name, .. } => {
                vec![name.as_str()]
            }
        }
    }

    pub fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> Result<()> {
        match self {
            Operation::CreateModel { name, fields } => {
                state.add_model(ModelState::new(app_label, name, fields.clone()))
            }
            Operation::AddField {
                model_name,
                name,
                field,
            } => {
                // existing rows have no value to fill the new column with
                if !field.null || field.primary_key {
                    return Err(Error::Other(format!(
                        "field {model_name}.{name} is NOT NULL and has no default; add it as nullable"
                    )));
                }
                state.add_field(app_label, model_name, name, *field)
            }
            Operation::AlterField {
                model_name,
                name,
                field,
            } => state.alter_field(app_label, model_name, name, *field),
        }
    }

    /// Emit the DDL moving the database from `from` to `to`, where `to` is
    /// `from` with this operation applied.
    pub fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<()> {
        match self {
            Operation::CreateModel { name, .. } => {
                editor.create_model(to.model(app_label, name)?)
            }
            Operation::AddField {
                model_name, name, ..
            } => editor.add_column(to.model(app_label, model_name)?, name),
            Operation::AlterField {
                model_name, name, ..
            } => editor.alter_field(
                from.model(app_label, model_name)?,
                to.model(app_label, model_name)?,
                name,
            ),
        }
    }

    /// Emit the DDL reverting this operation. `from` is the state with the
    /// operation applied, `to` the state before it.
    pub fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from: &ProjectState,
        to: &ProjectState,
    ) -> Result<()> {
        match self {
            Operation::CreateModel { name, .. } => {
                editor.delete_model(from.model(app_label, name)?)
            }
            Operation::AddField { model_name, .. } => editor.remake_table(
                from.model(app_label, model_name)?,
                to.model(app_label, model_name)?,
            ),
            Operation::AlterField {
                model_name, name, ..
            } => editor.alter_field(
                from.model(app_label, model_name)?,
                to.model(app_label, model_name)?,
                name,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FieldType;

    fn initial_state() -> ProjectState {
        let mut state = ProjectState::new();
        Operation::create_model(
            "Question",
            [
                ("id", FieldSpec::auto()),
                ("closed_at", FieldSpec::datetime().nullable()),
            ],
        )
        .state_forwards("questions", &mut state)
        .unwrap();
        state
    }

    #[test]
    fn alter_field_forwards_and_backwards_are_symmetric() {
        let op = Operation::alter_field(
            "question",
            "closed_at",
            FieldSpec::datetime().nullable().indexed(),
        );
        let from = initial_state();
        let mut to = from.clone();
        op.state_forwards("questions", &mut to).unwrap();

        let mut forwards = SchemaEditor::collecting();
        op.database_forwards("questions", &mut forwards, &from, &to)
            .unwrap();
        assert_eq!(
            forwards.statements(),
            ["CREATE INDEX IF NOT EXISTS \"idx_questions_question_closed_at\" \
              ON \"questions_question\" (\"closed_at\")"]
        );

        let mut backwards = SchemaEditor::collecting();
        op.database_backwards("questions", &mut backwards, &to, &from)
            .unwrap();
        assert_eq!(
            backwards.statements(),
            ["DROP INDEX IF EXISTS \"idx_questions_question_closed_at\""]
        );
    }

    #[test]
    fn nullable_add_field_uses_add_column() {
        let op = Operation::add_field("question", "resolved_at", FieldSpec::datetime().nullable());
        let from = initial_state();
        let mut to = from.clone();
        op.state_forwards("questions", &mut to).unwrap();

        let mut editor = SchemaEditor::collecting();
        op.database_forwards("questions", &mut editor, &from, &to)
            .unwrap();
        assert_eq!(
            editor.statements(),
            ["ALTER TABLE \"questions_question\" ADD COLUMN \"resolved_at\" datetime"]
        );
    }

    #[test]
    fn not_null_add_field_is_rejected() {
        let mut state = initial_state();
        let before = state.clone();

        let op = Operation::add_field("question", "votes", FieldSpec::new(FieldType::Integer));
        let err = op.state_forwards("questions", &mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "field question.votes is NOT NULL and has no default; add it as nullable"
        );
        assert_eq!(state, before);

        let op = Operation::add_field(
            "question",
            "votes",
            FieldSpec::new(FieldType::Integer).nullable(),
        );
        op.state_forwards("questions", &mut state).unwrap();
        let question = state.model("questions", "question").unwrap();
        assert!(question.field("votes").is_some());
    }

    #[test]
    fn alter_unknown_field_fails_in_state() {
        let op = Operation::alter_field("question", "opened_at", FieldSpec::datetime());
        let mut state = initial_state();
        let err = op.state_forwards("questions", &mut state).unwrap_err();
        assert!(matches!(
            err,
            schemastep_common::Error::UnknownField { .. }
        ));
    }

    #[test]
    fn touched_fields_cover_created_columns() {
        let op = Operation::create_model(
            "question",
            [("id", FieldSpec::auto()), ("title", FieldSpec::text())],
        );
        assert_eq!(op.touched_fields(), ["id", "title"]);
        assert_eq!(op.model_name(), "question");
        assert_eq!(op.describe(), "Create model question");
    }
}
