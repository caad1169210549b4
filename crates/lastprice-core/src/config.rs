use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_PAID_API_BASE_URL: &str = "https://api.paid.ai/v1";
pub const DEFAULT_STRIPE_API_BASE_URL: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub environment: Environment,
    /// Default share of users bucketed into the control variant.
    pub control_weight: f64,
    pub cors_origins: Vec<String>,
    /// Raw JSON overriding the built-in per-variant pricing catalog.
    pub pricing_catalog: Option<String>,
    pub paid_api_base_url: String,
    pub stripe_api_base_url: String,
    pub encryption_key: Option<String>,
    pub paid_api_key: Option<String>,
    pub stripe_secret_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Staging and production refuse to start without a real encryption key.
    pub fn requires_encryption_key(self) -> bool {
        matches!(self, Self::Staging | Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(CoreError::Configuration(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

impl Config {
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match var("LASTPRICE_ENV").or_else(|| var("NODE_ENV")) {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let control_weight = match var("LASTPRICE_CONTROL_WEIGHT") {
            Some(raw) => {
                let weight: f64 = raw.trim().parse().map_err(|e| {
                    CoreError::Configuration(format!("invalid LASTPRICE_CONTROL_WEIGHT: {e}"))
                })?;
                if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
                    return Err(CoreError::Configuration(format!(
                        "LASTPRICE_CONTROL_WEIGHT must be within [0, 1], got {weight}"
                    )));
                }
                weight
            }
            None => 0.5,
        };

        Ok(Self {
            port: var("LASTPRICE_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .trim()
                .parse()
                .map_err(|e| CoreError::Configuration(format!("invalid port: {e}")))?,
            data_dir: var("LASTPRICE_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
            duckdb_memory_limit: var("LASTPRICE_DUCKDB_MEMORY")
                .unwrap_or_else(|| "1GB".to_string()),
            environment,
            control_weight,
            cors_origins: var("LASTPRICE_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            pricing_catalog: var("LASTPRICE_PRICING_CATALOG"),
            paid_api_base_url: var("LASTPRICE_PAID_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PAID_API_BASE_URL.to_string()),
            stripe_api_base_url: var("LASTPRICE_STRIPE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE_URL.to_string()),
            encryption_key: var("API_KEY_ENCRYPTION_KEY"),
            paid_api_key: var("PAID_API_KEY"),
            stripe_secret_key: var("STRIPE_SECRET_KEY"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> CoreResult<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.port, 3000);
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.duckdb_memory_limit, "1GB");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.control_weight, 0.5);
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.paid_api_base_url, DEFAULT_PAID_API_BASE_URL);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn node_env_is_used_when_lastprice_env_is_missing() {
        let config = config_from(&[("NODE_ENV", "production")]).expect("config");
        assert_eq!(config.environment, Environment::Production);

        let config = config_from(&[("NODE_ENV", "production"), ("LASTPRICE_ENV", "test")])
            .expect("config");
        assert_eq!(config.environment, Environment::Test);
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let err = config_from(&[("LASTPRICE_ENV", "qa")]).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn control_weight_outside_unit_interval_is_rejected() {
        assert!(config_from(&[("LASTPRICE_CONTROL_WEIGHT", "1.5")]).is_err());
        assert!(config_from(&[("LASTPRICE_CONTROL_WEIGHT", "NaN")]).is_err());
        let config = config_from(&[("LASTPRICE_CONTROL_WEIGHT", "0.25")]).expect("config");
        assert_eq!(config.control_weight, 0.25);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = config_from(&[(
            "LASTPRICE_CORS_ORIGINS",
            "https://a.example, https://b.example,,",
        )])
        .expect("config");
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn blank_secrets_count_as_missing() {
        let config = config_from(&[("API_KEY_ENCRYPTION_KEY", "   ")]).expect("config");
        assert!(config.encryption_key.is_none());
    }
}
