use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidatorConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub linking: LinkingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub sessions_folder: String,
    pub roster_path: String,
}

impl PathsConfig {
    /// Sessions folder with `~` and `$VAR` expanded.
    pub fn sessions_folder(&self) -> PathBuf {
        expand(&self.sessions_folder)
    }

    /// Roster snapshot path with `~` and `$VAR` expanded.
    pub fn roster_path(&self) -> PathBuf {
        expand(&self.roster_path)
    }
}

fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!(path, error = %e, "Path expansion failed, using path as written");
            PathBuf::from(path)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    pub max_gap_minutes: i64,
    #[serde(default)]
    pub grouping_keys: Vec<String>,
    #[serde(default = "default_customer_key")]
    pub customer_key: String,
    #[serde(default = "default_contact_key")]
    pub contact_key: String,
    #[serde(default = "default_title_key")]
    pub title_key: String,
}

fn default_customer_key() -> String {
    "customer_name".to_string()
}

fn default_contact_key() -> String {
    "contact_name".to_string()
}

fn default_title_key() -> String {
    "title".to_string()
}

impl AggregationConfig {
    /// The configured gap as a duration. Negative or out-of-range values are
    /// rejected.
    pub fn max_gap(&self) -> Result<chrono::Duration, ConfigError> {
        let minutes = self.max_gap_minutes;
        if minutes < 0 {
            return Err(ConfigError::Message(format!(
                "aggregation.max_gap_minutes must not be negative (got {minutes})"
            )));
        }
        chrono::Duration::try_minutes(minutes).ok_or_else(|| {
            ConfigError::Message(format!(
                "aggregation.max_gap_minutes is out of range (got {minutes})"
            ))
        })
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_gap_minutes: 30,
            grouping_keys: Vec::new(),
            customer_key: default_customer_key(),
            contact_key: default_contact_key(),
            title_key: default_title_key(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinkingConfig {
    pub fuzzy_match_threshold: u8,
    pub unlinkable_sources: Vec<String>,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            fuzzy_match_threshold: 85,
            unlinkable_sources: vec!["SillyTavern".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gemini-2.0-flash-lite".to_string(),
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_retries: 3,
            retry_delay_ms: 1000,
            timeout_seconds: 30,
        }
    }
}

impl ConsolidatorConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CONSOLIDATOR").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document directly, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that deserialize but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.aggregation.max_gap()?;
        Ok(())
    }
}
