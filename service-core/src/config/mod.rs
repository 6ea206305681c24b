use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use std::str::FromStr;

/// Listener settings shared by every service binary.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// Reads `configuration.{toml,yaml,json}` if present, then `APP__*` env vars.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Fetch an env var. In production a missing var is an error even when a
/// development default exists.
pub fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match std::env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production",
                    key
                )))
            } else {
                default.map(|d| d.to_string()).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("{} is required", key))
                })
            }
        }
    }
}

/// Fetch and parse an env var, falling back to `default` when unset.
pub fn get_env_parse<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_uses_default_outside_production() {
        let val = get_env("SERVICE_CORE_TEST_UNSET_VAR", Some("fallback"), false).unwrap();
        assert_eq!(val, "fallback");
    }

    #[test]
    fn missing_var_is_fatal_in_production() {
        assert!(get_env("SERVICE_CORE_TEST_UNSET_VAR", Some("fallback"), true).is_err());
    }

    #[test]
    fn parse_falls_back_when_unset() {
        let val: u32 = get_env_parse("SERVICE_CORE_TEST_UNSET_NUM", 7).unwrap();
        assert_eq!(val, 7);
    }
}
