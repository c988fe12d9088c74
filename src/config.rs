//! Cache settings.
//!
//! Settings come from built-in defaults overlaid with `BGCACHE_`-prefixed
//! environment variables (nested keys split on `__`), then validated.
//!
//! ```text
//! BGCACHE_INDEX_NAME=breakglass
//! BGCACHE_PAGE_SIZE=10000
//! BGCACHE_ENVIRONMENT=production
//! BGCACHE_LOGGING__FORMAT=pretty
//! ```

use figment::providers::{Env, Serialized};
use figment::Figment;
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::BgCacheError;
use crate::index::{DEFAULT_INDEX, MAX_PAGE_SIZE};
use crate::keys::MASTER_KEY_SECRET;
use crate::report::SENTINEL;

/// Environment prefix for settings.
pub const ENV_PREFIX: &str = "BGCACHE_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct CacheSettings {
    #[garde(length(min = 1))]
    #[serde(default = "default_index_name")]
    pub index_name: String,

    #[garde(range(min = 1, max = 10_000))]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[garde(length(min = 1))]
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    #[garde(skip)]
    #[serde(default = "default_label")]
    pub environment: String,

    #[garde(skip)]
    #[serde(default = "default_label")]
    pub region: String,

    #[garde(skip)]
    #[serde(default = "default_label")]
    pub service_name: String,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct LoggingSettings {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String,

    #[garde(custom(validate_log_format))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_index_name() -> String {
    DEFAULT_INDEX.to_string()
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_secret_name() -> String {
    MASTER_KEY_SECRET.to_string()
}

fn default_label() -> String {
    SENTINEL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn validate_log_format(value: &str, _ctx: &()) -> garde::Result {
    match value {
        "json" | "pretty" => Ok(()),
        _ => Err(garde::Error::new("format must be 'json' or 'pretty'")),
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            index_name: default_index_name(),
            page_size: default_page_size(),
            secret_name: default_secret_name(),
            environment: default_label(),
            region: default_label(),
            service_name: default_label(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CacheSettings {
    /// Defaults overlaid with the process environment.
    pub fn load() -> Result<Self, BgCacheError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate from a host-assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, BgCacheError> {
        let settings: Self = figment
            .extract()
            .map_err(|err| BgCacheError::Config(err.to_string()))?;
        settings
            .validate()
            .map_err(|err| BgCacheError::Config(err.to_string()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::{Format, Toml};

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::from_figment(
            Figment::new().merge(Serialized::defaults(CacheSettings::default())),
        )
        .unwrap();
        assert_eq!(settings.index_name, "breakglass");
        assert_eq!(settings.page_size, 10_000);
        assert_eq!(settings.secret_name, "BGCACHE_MASTER_KEY");
        assert_eq!(settings.environment, "none");
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn test_toml_overrides() {
        let settings = CacheSettings::from_figment(Figment::new().merge(Toml::string(
            r#"
            index_name = "breakglass-test"
            page_size = 500
            region = "us-south"

            [logging]
            format = "pretty"
            "#,
        )))
        .unwrap();
        assert_eq!(settings.index_name, "breakglass-test");
        assert_eq!(settings.page_size, 500);
        assert_eq!(settings.region, "us-south");
        assert_eq!(settings.service_name, "none");
        assert_eq!(settings.logging.format, "pretty");
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let err = CacheSettings::from_figment(Figment::new().merge(Toml::string("page_size = 20000")))
            .unwrap_err();
        assert!(err.to_string().contains("page_size"));

        let err = CacheSettings::from_figment(
            Figment::new().merge(Toml::string("[logging]\nformat = \"xml\"")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BGCACHE_INDEX_NAME", "bg-from-env");
            jail.set_env("BGCACHE_LOGGING__LEVEL", "debug");
            let settings = CacheSettings::load().expect("settings should load");
            assert_eq!(settings.index_name, "bg-from-env");
            assert_eq!(settings.logging.level, "debug");
            Ok(())
        });
    }
}
