use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration {migration} depends on {dependency}, which has not been applied")]
    DependencyNotApplied {
        migration: String,
        dependency: String,
    },

    #[error("schema conflict in {migration}: {detail}")]
    SchemaConflict { migration: String, detail: String },

    #[error("unknown field {model}.{field}")]
    UnknownField { model: String, field: String },

    #[error("unknown model {0}")]
    UnknownModel(String),

    #[error("unknown migration {0}")]
    UnknownMigration(String),

    #[error("circular dependency involving {0}")]
    CircularDependency(String),

    #[error("migration {0} has not been applied")]
    NotApplied(String),

    #[error("cannot unapply {migration}: {dependant} depends on it and is applied")]
    DependantApplied {
        migration: String,
        dependant: String,
    },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::DependencyNotApplied {
            migration: "questions.0012".into(),
            dependency: "questions.0011".into(),
        };
        assert_eq!(
            e.to_string(),
            "migration questions.0012 depends on questions.0011, which has not been applied"
        );

        let e = Error::UnknownField {
            model: "question".into(),
            field: "opened_at".into(),
        };
        assert_eq!(e.to_string(), "unknown field question.opened_at");

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }
}
