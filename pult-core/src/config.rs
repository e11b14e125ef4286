//! Application configuration.
//!
//! Settings are deserialized from TOML with every field defaulted, so a
//! missing or partial config file always yields a usable configuration.
//! Secrets (the embedding API key) come from the environment, never from
//! the config file.

use std::env;
use std::path::Path;

mod knowledge;
mod memory;

pub use knowledge::{KnowledgeSettings, SearchDefaults, SegmenterDefaults};
pub use memory::MemorySettings;

/// Load .env file if it exists (called automatically by `Settings::from_env`).
pub fn load_dotenv() {
    // Silently ignore errors (file might not exist)
    let _ = dotenvy::dotenv();
}

/// Resolved application settings.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub knowledge: KnowledgeSettings,
    #[serde(default)]
    pub memory: MemorySettings,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Load settings from `PULT_CONFIG` (if set) and apply environment
    /// overrides for secrets.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();

        let mut settings = match env::var("PULT_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(key) = env::var("PULT_EMBEDDING_API_KEY") {
            settings.knowledge.embedding_api_key = Some(key);
        }
        if let Ok(url) = env::var("PULT_EMBEDDING_URL") {
            settings.knowledge.embedding_url = url;
        }

        Ok(settings)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_config() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.knowledge.segmenter.target_size, 1500);
        assert_eq!(settings.knowledge.segmenter.overlap, 200);
        assert_eq!(settings.knowledge.search.top_k, 5);
        assert_eq!(settings.memory.consolidation_cooldown_seconds, 600);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("nicht-da.toml")).unwrap();
        assert_eq!(settings.knowledge.embedding_batch, 100);

        let path = tmp.path().join("pult.toml");
        std::fs::write(&path, "[memory]\narchive_after_days = 30\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.memory.archive_after_days, 30);
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml_str(
            r#"
            [knowledge]
            embedding_model = "custom-embed"

            [knowledge.search]
            top_k = 8
            "#,
        )
        .unwrap();
        assert_eq!(settings.knowledge.embedding_model, "custom-embed");
        assert_eq!(settings.knowledge.search.top_k, 8);
        // untouched sections keep their defaults
        assert!((settings.knowledge.search.similarity_threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(settings.memory.extraction_window_turns, 6);
    }
}
