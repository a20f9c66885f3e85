use headcount_core::gallery::DEFAULT_NEIGHBORS;
use headcount_core::resolver::DEFAULT_SIMILARITY_THRESHOLD;
use headcount_core::retention::RetentionPolicy;
use headcount_core::types::DEFAULT_EMBEDDING_DIM;
use headcount_core::{IdentityResolver, ResolverConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration.
///
/// Resolution order: defaults, then the TOML file named by `HEADCOUNT_CONFIG` (if any),
/// then `HEADCOUNT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite gallery.
    pub db_path: PathBuf,
    /// Width of stored embeddings.
    pub embedding_dim: usize,
    /// Minimum dot-product similarity for a match. Read through [`Config::resolver`] by
    /// whatever spawns the frame engines.
    pub similarity_threshold: f32,
    /// Candidates ranked per lookup. See `similarity_threshold`.
    pub neighbors: usize,
    pub retention_horizon_secs: u64,
    pub sweep_interval_secs: u64,
    pub report_interval_secs: u64,
    /// Report window length, ending at each tick.
    pub report_window_secs: u64,
    /// Include ledger persons absent from the window.
    pub report_fallback: bool,
    pub cameras: Vec<String>,
    /// When set, every report is also written here as one JSON file per tick.
    pub report_spool_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: headcount_store::default_db_path(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            neighbors: DEFAULT_NEIGHBORS,
            retention_horizon_secs: 60 * 60,
            sweep_interval_secs: 15 * 60,
            report_interval_secs: 60,
            report_window_secs: 60,
            report_fallback: true,
            cameras: vec!["camera1".to_string()],
            report_spool_dir: None,
        }
    }
}

impl Config {
    /// Load from `HEADCOUNT_CONFIG` (optional) and `HEADCOUNT_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var_os("HEADCOUNT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `HEADCOUNT_*` environment variables. Unparseable values keep the current setting.
    pub fn with_env_overrides(self) -> Self {
        Self {
            db_path: std::env::var("HEADCOUNT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(self.db_path),
            embedding_dim: env_usize("HEADCOUNT_EMBEDDING_DIM", self.embedding_dim),
            similarity_threshold: env_f32(
                "HEADCOUNT_SIMILARITY_THRESHOLD",
                self.similarity_threshold,
            ),
            neighbors: env_usize("HEADCOUNT_NEIGHBORS", self.neighbors),
            retention_horizon_secs: env_u64(
                "HEADCOUNT_RETENTION_HORIZON_SECS",
                self.retention_horizon_secs,
            ),
            sweep_interval_secs: env_u64("HEADCOUNT_SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
            report_interval_secs: env_u64(
                "HEADCOUNT_REPORT_INTERVAL_SECS",
                self.report_interval_secs,
            ),
            report_window_secs: env_u64("HEADCOUNT_REPORT_WINDOW_SECS", self.report_window_secs),
            report_fallback: std::env::var("HEADCOUNT_REPORT_FALLBACK")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(self.report_fallback),
            cameras: std::env::var("HEADCOUNT_CAMERAS")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or(self.cameras),
            report_spool_dir: std::env::var("HEADCOUNT_REPORT_SPOOL_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or(self.report_spool_dir),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be positive".into()));
        }
        if !self.similarity_threshold.is_finite() || !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must lie in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.neighbors == 0 {
            return Err(ConfigError::Invalid("neighbors must be positive".into()));
        }
        for (name, secs) in [
            ("retention_horizon_secs", self.retention_horizon_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("report_interval_secs", self.report_interval_secs),
            ("report_window_secs", self.report_window_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid("at least one camera id is required".into()));
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            similarity_threshold: self.similarity_threshold,
            neighbors: self.neighbors,
        }
    }

    /// The resolver to hand to [`crate::spawn_engine`].
    pub fn resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.resolver_config())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            horizon: Duration::from_secs(self.retention_horizon_secs),
            interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.embedding_dim, 512);
        assert_eq!(config.similarity_threshold, 0.6);
        assert_eq!(config.neighbors, 10);
        assert_eq!(config.retention_policy(), RetentionPolicy::default());
        assert_eq!(config.report_interval_secs, 60);
        assert_eq!(config.report_window_secs, 60);
        assert!(config.report_fallback);
        assert_eq!(config.cameras, vec!["camera1".to_string()]);
        assert!(config.db_path.ends_with("headcount/gallery.db"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            similarity_threshold = 0.7
            cameras = ["lobby", "gate"]
            report_spool_dir = "/var/spool/headcount"
            "#,
        )
        .unwrap();
        assert_eq!(config.similarity_threshold, 0.7);
        assert_eq!(config.cameras, vec!["lobby".to_string(), "gate".to_string()]);
        assert_eq!(config.report_spool_dir, Some(PathBuf::from("/var/spool/headcount")));
        assert_eq!(config.neighbors, 10);
        assert_eq!(config.resolver_config().similarity_threshold, 0.7);
    }

    #[test]
    fn test_configured_threshold_reaches_resolver() {
        use headcount_core::{Embedding, FaceAttributes, ManualClock, MemoryGallery};
        use std::sync::Arc;

        let strict = Config::from_toml("similarity_threshold = 0.9\nneighbors = 3").unwrap();
        let resolver = strict.resolver();
        assert_eq!(resolver.config().similarity_threshold, 0.9);
        assert_eq!(resolver.config().neighbors, 3);

        let mut gallery = MemoryGallery::new(2, Arc::new(ManualClock::new(0)));
        let attrs = FaceAttributes::default();
        let first = Embedding::new(vec![1.0, 0.0]);
        let near = Embedding::new(vec![0.8, 0.6]);

        resolver.resolve(&mut gallery, &first, &attrs).unwrap();
        // 0.8 similarity matches at the default threshold but not at 0.9.
        assert!(resolver.resolve(&mut gallery, &near, &attrs).unwrap().is_new_identity);

        let lenient = Config::default().resolver();
        let mut gallery = MemoryGallery::new(2, Arc::new(ManualClock::new(0)));
        lenient.resolve(&mut gallery, &first, &attrs).unwrap();
        assert!(!lenient.resolve(&mut gallery, &near, &attrs).unwrap().is_new_identity);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::from_toml("similarity = 0.5").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            Config { embedding_dim: 0, ..Config::default() },
            Config { similarity_threshold: 1.5, ..Config::default() },
            Config { similarity_threshold: f32::NAN, ..Config::default() },
            Config { neighbors: 0, ..Config::default() },
            Config { sweep_interval_secs: 0, ..Config::default() },
            Config { cameras: Vec::new(), ..Config::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }
}
