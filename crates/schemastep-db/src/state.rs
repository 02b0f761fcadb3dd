use std::collections::BTreeMap;

use schemastep_common::{Error, Result};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    AutoField,
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
}

impl FieldType {
    /// Declared SQLite column type.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::AutoField | FieldType::Integer => "integer",
            FieldType::Text => "text",
            FieldType::Float => "real",
            FieldType::Boolean => "bool",
            FieldType::DateTime => "datetime",
        }
    }
}

/// Storage properties of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub null: bool,
    pub db_index: bool,
    pub primary_key: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            null: false,
            db_index: false,
            primary_key: false,
        }
    }

    pub fn auto() -> Self {
        Self::new(FieldType::AutoField).primary_key()
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    pub fn datetime() -> Self {
        Self::new(FieldType::DateTime)
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.db_index = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Whether moving from `self` to `other` changes the column definition
    /// itself, as opposed to just its index.
    pub fn column_differs(&self, other: &FieldSpec) -> bool {
        self.field_type != other.field_type
            || self.null != other.null
            || self.primary_key != other.primary_key
    }

    /// Short human description, e.g. `nullable indexed datetime`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.primary_key {
            parts.push("primary key");
        }
        parts.push(if self.null { "nullable" } else { "not null" });
        if self.db_index && !self.primary_key {
            parts.push("indexed");
        }
        parts.push(self.field_type.sql_type());
        parts.join(" ")
    }
}

/// A model (table) as known to the migration history.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub app_label: String,
    pub name: String,
    /// Fields in declaration order; this is also the column order.
    pub fields: Vec<(String, FieldSpec)>,
}

impl ModelState {
    pub fn new(app_label: &str, name: &str, fields: Vec<(String, FieldSpec)>) -> Self {
        Self {
            app_label: app_label.to_string(),
            name: name.to_lowercase(),
            fields,
        }
    }

    pub fn db_table(&self) -> String {
        format!("{}_{}", self.app_label, self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldSpec> {
        self.field(name).ok_or_else(|| Error::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut FieldSpec> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }
}

/// The schema implied by a sequence of applied migrations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    models: BTreeMap<String, ModelState>,
}

fn model_key(app_label: &str, name: &str) -> String {
    format!("{app_label}.{}", name.to_lowercase())
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, model: ModelState) -> Result<()> {
        let key = model_key(&model.app_label, &model.name);
        if self.models.contains_key(&key) {
            return Err(Error::Other(format!("model {key} already exists")));
        }
        self.models.insert(key, model);
        Ok(())
    }

    pub fn model(&self, app_label: &str, name: &str) -> Result<&ModelState> {
        self.models
            .get(&model_key(app_label, name))
            .ok_or_else(|| Error::UnknownModel(model_key(app_label, name)))
    }

    pub fn get_model(&self, app_label: &str, name: &str) -> Option<&ModelState> {
        self.models.get(&model_key(app_label, name))
    }

    pub fn add_field(
        &mut self,
        app_label: &str,
        model: &str,
        name: &str,
        field: FieldSpec,
    ) -> Result<()> {
        let state = self.model_mut(app_label, model)?;
        if state.field(name).is_some() {
            return Err(Error::Other(format!(
                "field {}.{name} already exists",
                state.name
            )));
        }
        state.fields.push((name.to_string(), field));
        Ok(())
    }

    pub fn alter_field(
        &mut self,
        app_label: &str,
        model: &str,
        name: &str,
        field: FieldSpec,
    ) -> Result<()> {
        let state = self.model_mut(app_label, model)?;
        let model_name = state.name.clone();
        let existing = state.field_mut(name).ok_or_else(|| Error::UnknownField {
            model: model_name,
            field: name.to_string(),
        })?;
        *existing = field;
        Ok(())
    }

    fn model_mut(&mut self, app_label: &str, name: &str) -> Result<&mut ModelState> {
        self.models
            .get_mut(&model_key(app_label, name))
            .ok_or_else(|| Error::UnknownModel(model_key(app_label, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> ModelState {
        ModelState::new(
            "questions",
            "Question",
            vec![
                ("id".into(), FieldSpec::auto()),
                ("closed_at".into(), FieldSpec::datetime().nullable()),
            ],
        )
    }

    #[test]
    fn model_names_are_lowercased_into_table_name() {
        let model = question();
        assert_eq!(model.name, "question");
        assert_eq!(model.db_table(), "questions_question");
    }

    #[test]
    fn alter_field_replaces_spec() {
        let mut state = ProjectState::new();
        state.add_model(question()).unwrap();
        state
            .alter_field(
                "questions",
                "question",
                "closed_at",
                FieldSpec::datetime().nullable().indexed(),
            )
            .unwrap();

        let field = *state
            .model("questions", "question")
            .unwrap()
            .field("closed_at")
            .unwrap();
        assert!(field.null);
        assert!(field.db_index);
    }

    #[test]
    fn alter_missing_field_is_unknown_field() {
        let mut state = ProjectState::new();
        state.add_model(question()).unwrap();
        let err = state
            .alter_field("questions", "question", "opened_at", FieldSpec::datetime())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field, .. } if field == "opened_at"));
    }

    #[test]
    fn alter_on_missing_model_is_unknown_model() {
        let mut state = ProjectState::new();
        let err = state
            .alter_field("questions", "question", "closed_at", FieldSpec::datetime())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[test]
    fn duplicate_model_is_rejected() {
        let mut state = ProjectState::new();
        state.add_model(question()).unwrap();
        assert!(state.add_model(question()).is_err());
    }

    #[test]
    fn describe_reads_naturally() {
        assert_eq!(
            FieldSpec::datetime().nullable().indexed().describe(),
            "nullable indexed datetime"
        );
        assert_eq!(FieldSpec::text().describe(), "not null text");
    }
}
