//! YAML settings for the map pipeline.
//!
//! Loaded once per invocation from `config/settings.yaml` (or `--config`) and
//! treated as read-only afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{Substation, Workspace};

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub options: OptionsConfig,
    pub substations: Vec<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub workspace: PathBuf,
    pub mxd_input_dir: PathBuf,
    pub aprx_input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub transformer_layer: String,
    pub conductor_layer: String,
    pub mcd_layer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    #[serde(deserialize_with = "year_string")]
    pub default_year: String,
    pub resolution: u32,
    #[serde(default = "default_attempts")]
    pub intersection_attempts: u32,
}

fn default_attempts() -> u32 {
    3
}

/// Accept `default_year: 2024` as well as `default_year: "2024"`.
fn year_string<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Int(u32),
        Str(String),
    }
    Ok(match Year::deserialize(de)? {
        Year::Int(y) => y.to_string(),
        Year::Str(s) => s,
    })
}

/// How to launch the external engine process.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_lock_codes")]
    pub lock_error_codes: Vec<u32>,
}

fn default_program() -> String {
    "gis-engine".to_string()
}

fn default_lock_codes() -> Vec<u32> {
    vec![464]
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            program: default_program(),
            args: Vec::new(),
            lock_error_codes: default_lock_codes(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.substations.iter().all(|s| s.trim().is_empty()) {
            return Err(Error::Config("substations list is empty".into()));
        }
        if self.options.resolution == 0 {
            return Err(Error::Config("options.resolution must be positive".into()));
        }
        if self.options.intersection_attempts == 0 {
            return Err(Error::Config(
                "options.intersection_attempts must be at least 1".into(),
            ));
        }
        if self.options.default_year.trim().is_empty() {
            return Err(Error::Config("options.default_year is empty".into()));
        }
        for (key, value) in [
            ("paths.transformer_layer", &self.paths.transformer_layer),
            ("paths.conductor_layer", &self.paths.conductor_layer),
            ("paths.mcd_layer", &self.paths.mcd_layer),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} is empty", key)));
            }
        }
        Ok(())
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.paths.workspace)
    }

    pub fn substation(&self, name: &str) -> Result<Substation> {
        Substation::resolve(name, &self.substations)
    }

    /// Directories the pipeline writes into or reads documents from.
    pub fn required_dirs(&self) -> [&Path; 4] {
        [
            self.paths.mxd_input_dir.as_path(),
            self.paths.aprx_input_dir.as_path(),
            self.paths.output_dir.as_path(),
            self.paths.logs_dir.as_path(),
        ]
    }

    /// Create any missing input/output/log directory.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in self.required_dirs() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_YAML: &str = r#"
paths:
  workspace: /data/veg/Workspace.gdb
  mxd_input_dir: data/input/mxd
  aprx_input_dir: data/input/aprx
  output_dir: data/output/pdf
  logs_dir: data/output/logs
  transformer_layer: /data/source.gdb/Transformer
  conductor_layer: /data/source.gdb/PriCond
  mcd_layer: /data/source.gdb/MCD
options:
  default_year: 2024
  resolution: 300
substations:
  - ALPHA
  - BETA
"#;
