pub mod admin;
pub mod feature_toggles;

pub use admin::AdminPolicy;
pub use feature_toggles::{FeatureToggles, ToggleHandle};

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3011 }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Without a URL the service falls back to the in-process store
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub api_url: Option<String>,
    pub api_key: String,
    pub secret_key: Option<String>,
    pub timeout: Duration,
    /// Where `bonus_days` codes provision a fresh subscription
    pub bonus_server_id: i32,
    pub bonus_plan_id: i32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: String::new(),
            secret_key: None,
            timeout: Duration::from_secs(15),
            bonus_server_id: 1,
            bonus_plan_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub duration_days: i64,
    /// 0 = unlimited
    pub traffic_limit_gb: i32,
    pub traffic_strategy: String,
    pub server_id: i32,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            duration_days: 5,
            traffic_limit_gb: 0,
            traffic_strategy: "NO_RESET".to_string(),
            server_id: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferralConfig {
    pub referrer_bonus: Decimal,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            referrer_bonus: Decimal::from(50),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromoCodeConfig {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PromoCodeConfig {
    fn default() -> Self {
        Self {
            min_length: 3,
            max_length: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub sweep_interval: Duration,
    pub expiring_notice_days: i64,
    pub max_conflict_retries: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            expiring_notice_days: 3,
            max_conflict_retries: 3,
        }
    }
}

/// Every tunable of the storefront core, read once at start-up.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseSettings,
    pub provisioning: ProvisioningConfig,
    pub trial: TrialConfig,
    pub referral: ReferralConfig,
    pub promo_codes: PromoCodeConfig,
    pub maintenance: MaintenanceConfig,
    pub admin: AdminPolicy,
    pub feature_toggles: ToggleHandle,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = AppConfig::default();

        let server = ServerConfig {
            port: env_or("SERVER_PORT", defaults.server.port)?,
        };

        let database = DatabaseSettings {
            url: env_opt("DATABASE_URL"),
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.database.max_connections)?,
        };

        let provisioning = ProvisioningConfig {
            api_url: env_opt("REMNAWAVE_API_URL"),
            api_key: env_opt("REMNAWAVE_API_KEY").unwrap_or_default(),
            secret_key: env_opt("REMNAWAVE_SECRET_KEY"),
            timeout: Duration::from_secs(env_or(
                "PROVISIONING_TIMEOUT_SECS",
                defaults.provisioning.timeout.as_secs(),
            )?),
            bonus_server_id: env_or("BONUS_SERVER_ID", defaults.provisioning.bonus_server_id)?,
            bonus_plan_id: env_or("BONUS_PLAN_ID", defaults.provisioning.bonus_plan_id)?,
        };

        let trial = TrialConfig {
            duration_days: env_or("TRIAL_DURATION_DAYS", defaults.trial.duration_days)?,
            traffic_limit_gb: env_or("TRIAL_TRAFFIC_LIMIT_GB", defaults.trial.traffic_limit_gb)?,
            traffic_strategy: env_opt("TRIAL_TRAFFIC_STRATEGY").unwrap_or(defaults.trial.traffic_strategy),
            server_id: env_or("TRIAL_SERVER_ID", defaults.trial.server_id)?,
        };

        let referral = ReferralConfig {
            referrer_bonus: env_or("REFERRAL_REFERRER_BONUS", defaults.referral.referrer_bonus)?,
        };

        let promo_codes = PromoCodeConfig {
            min_length: env_or("PROMO_CODES_MIN_LENGTH", defaults.promo_codes.min_length)?,
            max_length: env_or("PROMO_CODES_MAX_LENGTH", defaults.promo_codes.max_length)?,
        };
        if promo_codes.min_length == 0 || promo_codes.min_length > promo_codes.max_length {
            return Err(ConfigError::Invalid {
                key: "PROMO_CODES_MIN_LENGTH",
                value: promo_codes.min_length.to_string(),
            });
        }

        let maintenance = MaintenanceConfig {
            sweep_interval: Duration::from_secs(env_or(
                "MAINTENANCE_SWEEP_INTERVAL_SECS",
                defaults.maintenance.sweep_interval.as_secs(),
            )?),
            expiring_notice_days: env_or("EXPIRING_NOTICE_DAYS", defaults.maintenance.expiring_notice_days)?,
            max_conflict_retries: env_or("MAX_CONFLICT_RETRIES", defaults.maintenance.max_conflict_retries)?,
        };

        let admin_raw = env_opt("ADMIN_TELEGRAM_IDS").unwrap_or_default();
        let admin = AdminPolicy::parse(&admin_raw).map_err(|_| ConfigError::Invalid {
            key: "ADMIN_TELEGRAM_IDS",
            value: admin_raw.clone(),
        })?;

        let toggles = FeatureToggles::from_env_path();
        tracing::debug!(enabled = ?toggles.enabled_features(), "Feature toggles loaded");

        Ok(Self {
            server,
            database,
            provisioning,
            trial,
            referral,
            promo_codes,
            maintenance,
            admin,
            feature_toggles: ToggleHandle::new(toggles),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_when_env_is_empty() {
        std::env::remove_var("TRIAL_DURATION_DAYS");
        std::env::remove_var("REFERRAL_REFERRER_BONUS");
        std::env::remove_var("ADMIN_TELEGRAM_IDS");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.trial.duration_days, 5);
        assert_eq!(config.referral.referrer_bonus, Decimal::from(50));
        assert_eq!(config.maintenance.max_conflict_retries, 3);
    }

    #[test]
    #[serial]
    fn test_env_overrides_and_malformed_values() {
        std::env::set_var("TRIAL_DURATION_DAYS", "7");
        std::env::set_var("REFERRAL_REFERRER_BONUS", "25.50");
        std::env::set_var("ADMIN_TELEGRAM_IDS", "1,2");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.trial.duration_days, 7);
        assert_eq!(config.referral.referrer_bonus, Decimal::new(2550, 2));
        assert!(config.admin.is_admin(2));

        std::env::set_var("TRIAL_DURATION_DAYS", "seven");
        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TRIAL_DURATION_DAYS", .. }));

        std::env::remove_var("TRIAL_DURATION_DAYS");
        std::env::remove_var("REFERRAL_REFERRER_BONUS");
        std::env::remove_var("ADMIN_TELEGRAM_IDS");
    }
}
