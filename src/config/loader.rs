//! Config file discovery and parsing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Settings a config file may provide. Every field is optional; absent
/// fields fall back to the CLI defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileConfig {
    pub output: Option<PathBuf>,
    pub top: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_logins")]
    pub exclude: Option<Vec<String>>,
}

/// Load the config file, explicit or discovered.
///
/// An explicitly passed path that is missing or malformed is fatal. An
/// auto-discovered file that fails to parse logs a warning and is
/// otherwise ignored.
pub fn load_config(working_dir: &Path, config_path: Option<&Path>) -> Result<FileConfig> {
    let config_path_provided = config_path.is_some();

    let discovered = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config(working_dir),
    };

    let Some(config_file) = discovered else {
        return Ok(FileConfig::default());
    };

    let content = fs::read_to_string(&config_file)
        .with_context(|| format!("Failed reading config file: {}", config_file.display()))?;

    let ext = config_file.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "toml" => parse_toml_config(&content, &config_file),
        "yaml" | "yml" => parse_yaml_config(&content, &config_file),
        other => Err(anyhow::anyhow!(
            "Unsupported config extension '.{}' for file {}",
            other,
            config_file.display()
        )),
    };

    match parsed {
        Ok(config) => Ok(config),
        Err(err) if config_path_provided => Err(err),
        Err(err) => {
            warn!("Failed to parse auto-discovered config {}: {}", config_file.display(), err);
            Ok(FileConfig::default())
        }
    }
}

/// Split a comma-separated login list, trimming whitespace and dropping
/// empty entries.
pub fn split_logins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|login| !login.is_empty())
        .map(String::from)
        .collect()
}

fn deserialize_logins<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Csv(String),
        List(Vec<String>),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(raw.map(|raw| match raw {
        Raw::Csv(csv) => split_logins(&csv),
        Raw::List(items) => items.iter().flat_map(|item| split_logins(item)).collect(),
    }))
}

/// Parse TOML config, supporting a nested [review-pulse] section.
fn parse_toml_config(content: &str, config_file: &Path) -> Result<FileConfig> {
    let raw: toml::Value = toml::from_str(content)
        .with_context(|| format!("Invalid TOML syntax: {}", config_file.display()))?;

    let config_val = match raw.get("review-pulse") {
        Some(nested) => nested.clone(),
        None => raw,
    };

    config_val.try_into().with_context(|| format!("Invalid TOML config: {}", config_file.display()))
}

/// Parse YAML config, supporting a nested review-pulse section.
fn parse_yaml_config(content: &str, config_file: &Path) -> Result<FileConfig> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)
        .with_context(|| format!("Invalid YAML syntax: {}", config_file.display()))?;

    let config_val = match raw.get("review-pulse") {
        Some(nested) => nested.clone(),
        None => raw,
    };

    serde_yaml::from_value(config_val)
        .with_context(|| format!("Invalid YAML config: {}", config_file.display()))
}

fn discover_config(working_dir: &Path) -> Option<PathBuf> {
    let candidates = [
        "review-pulse.toml",
        ".review-pulse.toml",
        "review-pulse.yml",
        ".review-pulse.yml",
        "review-pulse.yaml",
        ".review-pulse.yaml",
    ];

    for candidate in candidates {
        let path = working_dir.join(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    None
}
