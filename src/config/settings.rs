use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::bulk::BulkConfig;
use crate::cache::CacheConfig;
use crate::render::{MissingVariablePolicy, Renderer};
use crate::tracker::ExportFormat;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub bulk: BulkSettings,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of parsed templates kept in memory
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Seconds an entry may stay cached after it was parsed
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
}

fn default_max_entries() -> usize {
    1024
}

fn default_max_age_seconds() -> u64 {
    3600 // 1 hour
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSettings {
    /// Worker count for runs that do not request one
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Hard ceiling for requested worker counts
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_concurrency() -> usize {
    32
}

fn default_max_concurrency() -> usize {
    256
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub missing_variable: MissingVariablePolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerSettings {
    #[serde(default)]
    pub export_format: ExportFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("cache.max_entries", default_max_entries() as u64)?
            .set_default("cache.max_age_seconds", default_max_age_seconds())?
            .set_default("bulk.concurrency", default_concurrency() as u64)?
            .set_default("bulk.max_concurrency", default_max_concurrency() as u64)?
            .set_default("render.missing_variable", "strict")?
            .set_default("tracker.export_format", "json")?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // VARIATION__CACHE__MAX_ENTRIES, VARIATION__LOGGING__FORMAT, etc.
            .add_source(
                Environment::with_prefix("VARIATION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            max_age: Duration::from_secs(self.max_age_seconds),
        }
    }
}

impl BulkSettings {
    pub fn to_bulk_config(&self) -> BulkConfig {
        BulkConfig {
            default_concurrency: self.concurrency,
            max_concurrency: self.max_concurrency,
        }
    }
}

impl RenderSettings {
    pub fn renderer(&self) -> Renderer {
        Renderer::new(self.missing_variable)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_age_seconds: default_max_age_seconds(),
        }
    }
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.cache.max_entries, 1024);
        assert_eq!(settings.cache.max_age_seconds, 3600);
        assert_eq!(settings.bulk.concurrency, 32);
        assert_eq!(settings.bulk.max_concurrency, 256);
        assert_eq!(settings.render.missing_variable, MissingVariablePolicy::Strict);
        assert_eq!(settings.tracker.export_format, ExportFormat::Json);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(
                r#"
                [cache]
                max_entries = 10

                [render]
                missing_variable = "lenient"

                [logging]
                format = "json"
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.cache.max_entries, 10);
        assert_eq!(settings.cache.max_age_seconds, 3600);
        assert_eq!(settings.render.missing_variable, MissingVariablePolicy::Lenient);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.bulk.concurrency, 32);
    }

    #[test]
    fn test_conversions() {
        let settings = Settings::default();
        let cache = settings.cache.to_cache_config();
        assert_eq!(cache.max_age, Duration::from_secs(3600));
        assert!(cache.validate().is_ok());

        let bulk = settings.bulk.to_bulk_config();
        assert_eq!(bulk.resolve(None).unwrap(), 32);
        assert_eq!(settings.render.renderer().policy(), MissingVariablePolicy::Strict);
    }
}
