use std::path::{Path, PathBuf};

use schemastep_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_CANDIDATES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

/// Locates and parses the runner configuration.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at the platform config directory (`~/.config/schemastep`
    /// on Linux).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("schemastep");
        Self { config_dir }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load from an explicit file if given, otherwise from the first candidate
    /// file in the config directory. Falls back to defaults when nothing exists.
    pub fn load(&self, explicit: Option<&Path>) -> Result<AppConfig> {
        if let Some(path) = explicit {
            return load_file(path);
        }

        for name in CONFIG_CANDIDATES {
            let path = self.config_dir.join(name);
            if path.is_file() {
                return load_file(&path);
            }
        }

        debug!(
            "no config file in {}, using defaults",
            self.config_dir.display()
        );
        Ok(AppConfig::default())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
        other => {
            return Err(Error::Config(format!(
                "unsupported config extension: {other}"
            )));
        }
    };

    info!("loaded config from {}", path.display());
    Ok(config)
}
