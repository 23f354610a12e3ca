//! Configuration loading and data folder resolution
//!
//! Resolution priority for every setting: environment variable → TOML
//! config file → compiled default. Tunables are deploy-static; there is no
//! database tier for configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the data folder (database + uploads)
pub const ENV_DATA_FOLDER: &str = "ECGX_DATA_FOLDER";

/// Environment variable naming the TOML config file path
pub const ENV_CONFIG_FILE: &str = "ECGX_CONFIG";

/// Top-level TOML configuration for the analysis pipeline service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Data folder holding the SQLite database and uploaded recordings
    pub data_folder: Option<String>,

    /// Bind address for the HTTP API (default 127.0.0.1:5910)
    pub bind_addr: Option<String>,

    /// Pipeline tunables
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Inference model endpoints, keyed by model name
    #[serde(default)]
    pub models: Vec<ModelEndpoint>,

    /// Outbound notification channel webhooks (email/sms/push gateways)
    #[serde(default)]
    pub channels: ChannelConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_folder: None,
            bind_addr: None,
            pipeline: PipelineConfig::default(),
            models: Vec::new(),
            channels: ChannelConfig::default(),
        }
    }
}

/// Pipeline tunables with clinical-safety defaults
///
/// Every value is configurable but the defaults match the validated
/// production behavior; change with care.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum automatic retries after a failed processing run
    pub max_retries: u32,

    /// Cool-down before a failed analysis is re-queued (seconds)
    pub retry_cooldown_secs: u64,

    /// Overall deadline for the model inference fan-out (seconds)
    pub inference_deadline_secs: u64,

    /// Per-model minimum confidence; results below this are excluded
    /// from consolidation
    pub min_model_confidence: f64,

    /// Quality score below which a quality-issue alert is raised
    pub quality_alert_threshold: f64,

    /// Years of experience that make a physician "senior" for
    /// critical-analysis validation
    pub senior_experience_years: u32,

    /// Maximum dispatch attempts for an all-channels-failed notification
    pub notification_max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_cooldown_secs: 60,
            inference_deadline_secs: 120,
            min_model_confidence: 0.7,
            quality_alert_threshold: 0.5,
            senior_experience_years: 5,
            notification_max_retries: 3,
        }
    }
}

/// One remote inference model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Model name used in result maps and provenance (e.g., "rhythmnet-v2")
    pub name: String,
    /// Base URL of the inference service
    pub url: String,
}

/// Outbound channel gateway configuration
///
/// A channel with no URL configured is treated as unavailable and filtered
/// out before dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub email_webhook: Option<String>,
    pub sms_webhook: Option<String>,
    pub push_webhook: Option<String>,
}

/// Load configuration from the resolved TOML path, falling back to defaults
///
/// A missing file is not an error (defaults apply); an unparsable file is.
pub fn load_config() -> Result<TomlConfig> {
    let path = config_file_path();
    load_config_from(&path)
}

/// Load configuration from an explicit path
pub fn load_config_from(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

/// Resolve the TOML config file path (env override → default location)
pub fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
        return PathBuf::from(path);
    }
    PathBuf::from("ecgx.toml")
}

/// Resolve the data folder (env → TOML → compiled default)
pub fn resolve_data_folder(config: &TomlConfig) -> PathBuf {
    if let Ok(path) = std::env::var(ENV_DATA_FOLDER) {
        return PathBuf::from(path);
    }
    if let Some(folder) = &config.data_folder {
        return PathBuf::from(folder);
    }
    PathBuf::from("./ecgx_data")
}

/// Create the data folder if missing and return the database path inside it
pub fn ensure_data_folder(data_folder: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_folder)
        .map_err(|e| Error::Config(format!("Create data folder failed: {}", e)))?;
    Ok(data_folder.join("ecgx.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_validated_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_cooldown_secs, 60);
        assert_eq!(cfg.inference_deadline_secs, 120);
        assert!((cfg.min_model_confidence - 0.7).abs() < f64::EPSILON);
        assert!((cfg.quality_alert_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.senior_experience_years, 5);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let cfg = load_config_from(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(cfg.models.is_empty());
        assert_eq!(cfg.pipeline.max_retries, 3);
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecgx.toml");
        std::fs::write(
            &path,
            r#"
bind_addr = "0.0.0.0:5910"

[pipeline]
retry_cooldown_secs = 5

[[models]]
name = "rhythmnet-v2"
url = "http://localhost:9000"
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.bind_addr.as_deref(), Some("0.0.0.0:5910"));
        assert_eq!(cfg.pipeline.retry_cooldown_secs, 5);
        // Unspecified values keep defaults
        assert_eq!(cfg.pipeline.max_retries, 3);
        assert_eq!(cfg.models.len(), 1);
        assert_eq!(cfg.models[0].name, "rhythmnet-v2");
    }
}
