//! Application configuration.
//!
//! Stored as JSON in `<config dir>/thesisflow/config.json`. A few values can be
//! overridden from the environment:
//! - `THESISFLOW_PROJECTS` - directory holding projects
//! - `THESISFLOW_CONVERTER` - markdown converter executable (default: `pandoc`)
//! - `THESISFLOW_COMPILER` - typesetting compiler executable (default: `typst`)

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "thesisflow";
const CONFIG_FILE: &str = "config.json";
const PROJECTS_DIR_NAME: &str = "ThesisFlow_Projects";

/// How to launch one external tool. `args` go before the contract arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where new projects are created and listed from.
    pub projects_root: PathBuf,
    /// Markdown -> typesetting markup converter.
    pub converter: ToolConfig,
    /// Typesetting markup -> PDF compiler.
    pub compiler: ToolConfig,
    /// Value for the converter's `--from`.
    pub converter_from: String,
    /// Value for the converter's `--to`.
    pub converter_to: String,
    /// File name of the final artifact, written at the project root.
    pub output_name: String,
    /// Maximum number of chapters converted concurrently.
    pub parallelism: usize,
    pub autosave_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            converter: ToolConfig::new("pandoc"),
            compiler: ToolConfig::new("typst"),
            converter_from: "markdown+tex_math_dollars".to_string(),
            converter_to: "typst".to_string(),
            output_name: "thesis.pdf".to_string(),
            parallelism: 4,
            autosave_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from the user's config directory, then apply
    /// environment overrides. Returns defaults if the file doesn't exist or
    /// fails to parse.
    pub fn load() -> Self {
        let config = match Self::try_load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    fn try_load() -> Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config = serde_json::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        thesisflow_core::write_atomic(&config_path, content.as_bytes())
            .context("Failed to write config file")?;

        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("THESISFLOW_PROJECTS") {
            self.projects_root = PathBuf::from(root);
        }
        if let Ok(program) = std::env::var("THESISFLOW_CONVERTER") {
            self.converter = ToolConfig::new(program);
        }
        if let Ok(program) = std::env::var("THESISFLOW_COMPILER") {
            self.compiler = ToolConfig::new(program);
        }
        self
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

fn default_projects_root() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| {
            dirs.document_dir()
                .map(|d| d.to_path_buf())
                .unwrap_or_else(|| dirs.home_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PROJECTS_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"output_name": "Tesi_Finale.pdf", "compiler": {"program": "/opt/typst"}}"#)
                .unwrap();
        assert_eq!(config.output_name, "Tesi_Finale.pdf");
        assert_eq!(config.compiler.program, PathBuf::from("/opt/typst"));
        assert!(config.compiler.args.is_empty());
        assert_eq!(config.converter.program, PathBuf::from("pandoc"));
        assert_eq!(config.autosave_interval(), Duration::from_secs(60));
    }

    #[test]
    fn parallelism_is_at_least_one() {
        let config = AppConfig {
            parallelism: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.parallelism(), 1);
    }
}
