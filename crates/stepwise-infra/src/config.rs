//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.stepwise/` unless
//! `STEPWISE_DATA_DIR` is set) and deserializes it into [`EngineConfig`].
//! Falls back to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use stepwise_types::config::EngineConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "STEPWISE_DATA_DIR";

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory: `STEPWISE_DATA_DIR`, else `~/.stepwise`.
pub fn resolve_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".stepwise")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
/// - Values that cannot work (zero attempts, threshold outside 0..=1) are
///   clamped with a warning.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

fn sanitize(mut config: EngineConfig) -> EngineConfig {
    if config.max_attempts == 0 {
        tracing::warn!("max_attempts = 0 is not usable, using 1");
        config.max_attempts = 1;
    }
    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        let clamped = config.confidence_threshold.clamp(0.0, 1.0);
        tracing::warn!(
            "confidence_threshold {} is outside 0..=1, using {clamped}",
            config.confidence_threshold
        );
        config.confidence_threshold = clamped;
    }
    config
}
