//! Configuration management for Prospector.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Prefix of environment variables that append keys to a credential pool.
const KEYS_ENV_PREFIX: &str = "PROSPECTOR_KEYS_";

/// Main application configuration.
///
/// This is loaded from `~/.config/prospector/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Search loop and racer settings
    pub search: SearchConfig,
    /// Email discovery and verification fallback chains
    pub enrichment: EnrichmentConfig,
    /// Credential pools keyed by service name
    #[serde(skip_serializing)]
    pub credentials: BTreeMap<String, Vec<String>>,
    /// Text generation settings
    pub llm: LlmConfig,
    /// Local storage settings
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `PROSPECTOR_MAX_ROUNDS`: Override the expansion round cap
    /// - `PROSPECTOR_SOURCE_TIMEOUT_SECS`: Override the per-source call timeout
    /// - `PROSPECTOR_LLM_ENABLED`: Override text generation enabled status (true/false)
    /// - `PROSPECTOR_KEYS_<SERVICE>`: Comma-separated keys appended to a pool
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `(name, value)` pairs.
    ///
    /// Unparseable values are ignored. Service names in `PROSPECTOR_KEYS_*`
    /// are lowercased with `_` mapped to `-`.
    pub fn apply_env_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in vars {
            match name.as_str() {
                "PROSPECTOR_MAX_ROUNDS" => {
                    if let Ok(rounds) = value.parse() {
                        self.search.max_rounds = rounds;
                        tracing::debug!("Override search.max_rounds from env: {}", rounds);
                    }
                }
                "PROSPECTOR_SOURCE_TIMEOUT_SECS" => {
                    if let Ok(secs) = value.parse() {
                        self.search.source_timeout_secs = secs;
                        tracing::debug!("Override search.source_timeout_secs from env: {}", secs);
                    }
                }
                "PROSPECTOR_LLM_ENABLED" => {
                    if let Ok(enabled) = value.parse() {
                        self.llm.enabled = enabled;
                        tracing::debug!("Override llm.enabled from env: {}", enabled);
                    }
                }
                other => {
                    if let Some(service) = other.strip_prefix(KEYS_ENV_PREFIX) {
                        let service = service.to_lowercase().replace('_', "-");
                        let keys: Vec<String> = value
                            .split(',')
                            .map(str::trim)
                            .filter(|k| !k.is_empty())
                            .map(ToString::to_string)
                            .collect();
                        tracing::debug!("Adding {} key(s) for {} from env", keys.len(), service);
                        self.credentials.entry(service).or_default().extend(keys);
                    }
                }
            }
        }
    }

    /// Check values that would make a run impossible or ambiguous.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.search.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_rounds".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.search.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_concurrent_tasks".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, chain) in [
            ("enrichment.discovery_chain", &self.enrichment.discovery_chain),
            (
                "enrichment.verification_chain",
                &self.enrichment.verification_chain,
            ),
        ] {
            let mut seen = HashSet::new();
            for step in chain {
                if !seen.insert(step.service.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("service '{}' listed more than once", step.service),
                    });
                }
            }
        }
        Ok(())
    }

    /// Keys configured for a service (empty if none).
    #[must_use]
    pub fn keys_for(&self, service: &str) -> &[String] {
        self.credentials
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist. Credentials are
    /// never written.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/prospector/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/prospector`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Resolve the database path, defaulting to the data directory.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("prospector.db")),
        }
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("com", "prospector", "prospector").ok_or(ConfigError::NoConfigDir)
}

/// Search loop, racer and expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hard cap on expansion rounds per run
    pub max_rounds: u32,
    /// Maximum source calls in flight at once
    pub max_concurrent_tasks: usize,
    /// Timeout for a single source call in seconds
    pub source_timeout_secs: u64,
    /// Base delay between task dispatches in milliseconds
    pub task_stagger_ms: u64,
    /// Interval of "still working" heartbeat logs in seconds
    pub heartbeat_secs: u64,
    /// Result count requested from each source per task
    pub per_task_limit: u32,
    /// Cities taken from location research per country
    pub cities_per_country: usize,
    /// Already-searched cities that query variations are applied to
    pub variation_city_count: usize,
    /// Nearby cities requested per expansion
    pub nearby_city_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_concurrent_tasks: 8,
            source_timeout_secs: 45,
            task_stagger_ms: 250,
            heartbeat_secs: 15,
            per_task_limit: 20,
            cities_per_country: 5,
            variation_city_count: 3,
            nearby_city_count: 5,
        }
    }
}

/// One step of a service fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStepConfig {
    /// Service name; must match a credential pool
    pub service: String,
    /// Re-probe this service's first key once after every later step is exhausted
    #[serde(default)]
    pub probe_on_exhaustion: bool,
}

/// Email discovery and verification chains.
///
/// ```toml
/// [[enrichment.discovery_chain]]
/// service = "primary-finder"
/// probe_on_exhaustion = true
///
/// [[enrichment.discovery_chain]]
/// service = "secondary-finder"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Ordered email discovery services
    pub discovery_chain: Vec<ChainStepConfig>,
    /// Ordered email verification services
    pub verification_chain: Vec<ChainStepConfig>,
}

/// Text generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Whether text generation is used at all
    pub enabled: bool,
    /// Provider order tried by the router: `openai`, `ollama`
    pub providers: Vec<String>,
    /// Base URL of the OpenAI-compatible API
    pub openai_base_url: String,
    /// Model used with the OpenAI-compatible API
    pub openai_model: String,
    /// Ollama server URL
    pub ollama_url: String,
    /// Ollama model
    pub ollama_model: String,
    /// Maximum tokens for completions
    pub max_tokens: u32,
    /// Temperature for completions
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            providers: vec!["openai".to_string(), "ollama".to_string()],
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            max_tokens: 512,
            temperature: 0.4,
            timeout_secs: 60,
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; defaults to `<data dir>/prospector.db`
    pub database_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.search.max_rounds, 10);
        assert_eq!(config.search.max_concurrent_tasks, 8);
        assert!(config.enrichment.discovery_chain.is_empty());
        assert!(config.credentials.is_empty());
        assert!(!config.llm.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_omits_credentials() {
        let mut config = AppConfig::default();
        config
            .credentials
            .insert("primary-finder".to_string(), vec!["secret".to_string()]);

        let toml_str = toml::to_string_pretty(&config).expect("serialize config");
        assert!(toml_str.contains("[search]"));
        assert!(toml_str.contains("[llm]"));
        assert!(!toml_str.contains("secret"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.search.max_rounds, config.search.max_rounds);
        assert!(parsed.credentials.is_empty());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.search.max_rounds = 4;
        config.llm.enabled = true;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.search.max_rounds, 4);
        assert!(loaded.llm.enabled);
    }

    #[test]
    fn test_partial_config_with_chains_and_credentials() {
        let toml_str = r#"
[search]
max_rounds = 3

[[enrichment.discovery_chain]]
service = "primary-finder"
probe_on_exhaustion = true

[[enrichment.discovery_chain]]
service = "secondary-finder"

[credentials]
primary-finder = ["k1", "k2"]
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.search.max_rounds, 3);
        assert_eq!(config.search.per_task_limit, 20);
        assert_eq!(config.enrichment.discovery_chain.len(), 2);
        assert!(config.enrichment.discovery_chain[0].probe_on_exhaustion);
        assert!(!config.enrichment.discovery_chain[1].probe_on_exhaustion);
        assert_eq!(config.keys_for("primary-finder"), ["k1", "k2"]);
        assert!(config.keys_for("secondary-finder").is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(vars(&[
            ("PROSPECTOR_MAX_ROUNDS", "6"),
            ("PROSPECTOR_SOURCE_TIMEOUT_SECS", "not-a-number"),
            ("PROSPECTOR_LLM_ENABLED", "true"),
            ("PROSPECTOR_KEYS_PRIMARY_FINDER", "a, b,,c"),
            ("UNRELATED", "1"),
        ]));

        assert_eq!(config.search.max_rounds, 6);
        assert_eq!(config.search.source_timeout_secs, 45);
        assert!(config.llm.enabled);
        assert_eq!(config.keys_for("primary-finder"), ["a", "b", "c"]);
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut config = AppConfig::default();
        config.search.max_rounds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_chain_step() {
        let mut config = AppConfig::default();
        let step = ChainStepConfig {
            service: "verifier".to_string(),
            probe_on_exhaustion: false,
        };
        config.enrichment.verification_chain = vec![step.clone(), step];
        let err = config.validate().expect_err("duplicate step rejected");
        assert!(err.to_string().contains("verifier"));
    }

    #[test]
    fn test_database_path_override() {
        let mut config = AppConfig::default();
        config.storage.database_path = Some(PathBuf::from("/tmp/leads.db"));
        assert_eq!(
            config.database_path().expect("resolve path"),
            PathBuf::from("/tmp/leads.db")
        );
    }
}
