use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DropwatchError, Result};
use crate::models::MAX_LOCK_TTL_MINUTES;
use crate::text::normalize::{DEFAULT_BRAND_WORDS, DEFAULT_STOP_WORDS};

/// Root application configuration, loaded from `~/.config/dropwatch/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub dedup: DedupConfig,
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub database_path: String,
}

/// Matching thresholds and the domain vocabulary stripped from titles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub similarity_threshold: f64,
    pub word_overlap_threshold: f64,
    /// Image URLs containing this marker never take part in image matching.
    pub placeholder_marker: String,
    pub stop_words: Vec<String>,
    pub brand_words: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_minutes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_holder: Option<String>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("dropwatch");

        Self {
            database_path: data_dir.join("dropwatch.db").to_string_lossy().to_string(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            word_overlap_threshold: 0.7,
            placeholder_marker: "placeholder".to_string(),
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            brand_words: DEFAULT_BRAND_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            default_holder: None,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/dropwatch/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DROPWATCH_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("dropwatch")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("dedup.similarity_threshold", self.dedup.similarity_threshold),
            ("dedup.word_overlap_threshold", self.dedup.word_overlap_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DropwatchError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if !(1..=MAX_LOCK_TTL_MINUTES).contains(&self.lock.ttl_minutes) {
            return Err(DropwatchError::Config(format!(
                "lock.ttl_minutes must be within [1, {MAX_LOCK_TTL_MINUTES}], got {}",
                self.lock.ttl_minutes
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.database_path)
    }

    /// Lock lease length. Unvalidated values above the maximum are capped.
    pub fn lock_ttl(&self) -> chrono::Duration {
        let minutes = self.lock.ttl_minutes.min(MAX_LOCK_TTL_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }

    /// Holder tag recorded against locks taken by this process.
    pub fn lock_holder(&self) -> String {
        self.lock
            .default_holder
            .clone()
            .unwrap_or_else(|| format!("dropwatch-{}", std::process::id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.dedup.similarity_threshold, 0.7);
        assert_eq!(cfg.dedup.word_overlap_threshold, 0.7);
        assert_eq!(cfg.lock.ttl_minutes, 30);
        assert!(cfg.dedup.stop_words.iter().any(|w| w == "available"));
        assert!(cfg.dedup.brand_words.iter().any(|w| w == "seaworld"));
        assert!(cfg.database_path().to_string_lossy().contains("dropwatch.db"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.dedup.similarity_threshold = 0.8;
        cfg.lock.default_holder = Some("cron-a".to_string());
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.similarity_threshold, 0.8);
        assert_eq!(loaded.lock_holder(), "cron-a");
        assert_eq!(loaded.dedup.stop_words, cfg.dedup.stop_words);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nbrand_words = [\"universal\"]\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.brand_words, vec!["universal".to_string()]);
        assert_eq!(loaded.dedup.word_overlap_threshold, 0.7);
        assert_eq!(loaded.lock.ttl_minutes, 30);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nsimilarity_threshold = 1.5\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, DropwatchError::Config(_)));
    }

    #[test]
    fn test_ttl_bounds_enforced() {
        let mut cfg = AppConfig::default();
        cfg.lock.ttl_minutes = 0;
        assert!(matches!(cfg.validate(), Err(DropwatchError::Config(_))));

        cfg.lock.ttl_minutes = 10_000_000_000_000;
        assert!(matches!(cfg.validate(), Err(DropwatchError::Config(_))));
        assert_eq!(
            cfg.lock_ttl(),
            chrono::Duration::minutes(MAX_LOCK_TTL_MINUTES as i64)
        );

        cfg.lock.ttl_minutes = MAX_LOCK_TTL_MINUTES;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg =
            AppConfig::load_from(Path::new("/tmp/nonexistent_dropwatch_config.toml")).unwrap();
        assert_eq!(cfg.lock.ttl_minutes, 30);
    }
}
