use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const ENV_PREFIX: &str = "PRODUCT_AGG";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// Process settings, read once from `PRODUCT_AGG_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log_level: String,
    pub db_path: PathBuf,
    pub webdriver_url: String,
    pub http_timeout_secs: u64,
    /// Per-source wall-clock limit; 0 disables it.
    pub source_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            db_path: PathBuf::from("data/products.db"),
            webdriver_url: "http://localhost:9515".to_string(),
            http_timeout_secs: 10,
            source_timeout_secs: 120,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_env(env: Environment) -> Result<Self> {
        let d = Self::default();
        let settings = Config::builder()
            .set_default("log_level", d.log_level)?
            .set_default("db_path", d.db_path.to_string_lossy().to_string())?
            .set_default("webdriver_url", d.webdriver_url)?
            .set_default("http_timeout_secs", d.http_timeout_secs)?
            .set_default("source_timeout_secs", d.source_timeout_secs)?
            .set_default("user_agent", d.user_agent)?
            .add_source(env)
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn source_timeout(&self) -> Option<Duration> {
        (self.source_timeout_secs > 0).then(|| Duration::from_secs(self.source_timeout_secs))
    }
}

/// Map a severity name to a filter. Unknown names mean `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => LevelFilter::TRACE,
        "DEBUG" => LevelFilter::DEBUG,
        "INFO" => LevelFilter::INFO,
        "WARN" | "WARNING" => LevelFilter::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => LevelFilter::ERROR,
        "OFF" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Filter used when `RUST_LOG` is unset.
pub fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::default().add_directive(parse_level(level).into())
}

/// Install the fmt subscriber. `RUST_LOG` wins when set.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(level)))
        .with_writer(std::io::stderr)
        .try_init();
}
