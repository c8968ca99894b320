// config.rs
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

/// Longest escrow hold the release job accepts, about ten years.
pub const MAX_ESCROW_HOLD_DAYS: i64 = 3650;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub log_level: LevelFilter,
    /// Take client addresses from `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header.
    pub trust_proxy: bool,
    // Payment gateway
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    // Escrow
    pub escrow_hold_days: i64,
    pub escrow_release_interval_secs: u64,
    pub escrow_max_release_attempts: i32,
    pub platform_fee_percent: f64,
    pub default_currency: String,
}

impl Config {
    pub fn init() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `init` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET_KEY")?;

        let jwt_maxage = parse_or(&lookup, "JWT_MAXAGE", 60i64)?;
        let port = parse_or(&lookup, "PORT", 8000u16)?;
        let escrow_hold_days = parse_or(&lookup, "ESCROW_HOLD_DAYS", 7i64)?;
        let escrow_release_interval_secs =
            parse_or(&lookup, "ESCROW_RELEASE_INTERVAL_SECS", 86_400u64)?;
        let escrow_max_release_attempts = parse_or(&lookup, "ESCROW_MAX_RELEASE_ATTEMPTS", 3i32)?;
        let platform_fee_percent = parse_or(&lookup, "PLATFORM_FEE_PERCENT", 10.0f64)?;
        let log_level = parse_or(&lookup, "LOG_LEVEL", LevelFilter::INFO)?;
        let trust_proxy = parse_or(&lookup, "TRUST_PROXY", false)?;

        if !(0..=MAX_ESCROW_HOLD_DAYS).contains(&escrow_hold_days) {
            return Err(ConfigError::Invalid {
                key: "ESCROW_HOLD_DAYS",
                value: escrow_hold_days.to_string(),
            });
        }
        if escrow_release_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "ESCROW_RELEASE_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        if !(0.0..100.0).contains(&platform_fee_percent) {
            return Err(ConfigError::Invalid {
                key: "PLATFORM_FEE_PERCENT",
                value: platform_fee_percent.to_string(),
            });
        }

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        // Gateway keys default to empty so the API can boot without payments wired up
        let stripe_secret_key = lookup("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = lookup("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let stripe_api_base = lookup("STRIPE_API_BASE")
            .unwrap_or_else(|| "https://api.stripe.com/v1".to_string());

        let default_currency = lookup("DEFAULT_CURRENCY")
            .unwrap_or_else(|| "usd".to_string())
            .to_lowercase();

        Ok(Config {
            database_url,
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            jwt_secret,
            jwt_maxage,
            port,
            cors_origins,
            log_level,
            trust_proxy,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base,
            escrow_hold_days,
            escrow_release_interval_secs,
            escrow_max_release_attempts,
            platform_fee_percent,
            default_currency,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/talenthive"),
            ("JWT_SECRET_KEY", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.jwt_maxage, 60);
        assert_eq!(config.escrow_hold_days, 7);
        assert_eq!(config.escrow_release_interval_secs, 86_400);
        assert_eq!(config.escrow_max_release_attempts, 3);
        assert_eq!(config.default_currency, "usd");
        assert_eq!(config.cors_origins, vec!["http://localhost:5173".to_string()]);
        assert!(config.redis_url.is_none());
        assert_eq!(config.log_level, LevelFilter::INFO);
        assert!(!config.trust_proxy);
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_lookup(lookup_from(&[("JWT_SECRET_KEY", "secret")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_hold_days() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/talenthive"),
            ("JWT_SECRET_KEY", "secret"),
            ("ESCROW_HOLD_DAYS", "seven"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ESCROW_HOLD_DAYS", .. }));
    }

    #[test]
    fn test_hold_days_bounds() {
        let with_hold = |days: &str| {
            Config::from_lookup(lookup_from(&[
                ("DATABASE_URL", "postgres://localhost/talenthive"),
                ("JWT_SECRET_KEY", "secret"),
                ("ESCROW_HOLD_DAYS", days),
            ]))
        };

        assert_eq!(with_hold("3650").unwrap().escrow_hold_days, MAX_ESCROW_HOLD_DAYS);
        assert_eq!(with_hold("0").unwrap().escrow_hold_days, 0);
        for bad in ["3651", "100000000", "-1"] {
            let err = with_hold(bad).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "ESCROW_HOLD_DAYS", .. }));
        }
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/talenthive"),
            ("JWT_SECRET_KEY", "secret"),
            ("ESCROW_HOLD_DAYS", "14"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("CORS_ORIGINS", "https://talenthive.app, http://localhost:3000"),
            ("DEFAULT_CURRENCY", "EUR"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.escrow_hold_days, 14);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.cors_origins.len(), 2);
        assert_eq!(config.default_currency, "eur");
        assert_eq!(config.log_level, LevelFilter::DEBUG);
    }
}
