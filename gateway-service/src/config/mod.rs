use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::models::{SubscriptionTier, TierLimits};

/// Development-only signing secret. Never accepted in production: the
/// production check requires an explicit secret of at least 64 characters.
const DEV_SIGNING_SECRET: &str =
    "insecure-dev-signing-secret-insecure-dev-signing-secret-insecure-dev-signing-secret";

pub const MIN_SIGNING_SECRET_LEN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub security: SecurityConfig,
    pub bot: BotConfig,
    pub rate_limit: RateLimitConfig,
    pub tiers: TierTable,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub signing_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub issuer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub session_cookie_name: String,
}

/// What to do with a request the suspicion scorer flags as a likely bot.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BotPolicy {
    /// Reject outright with 400
    Block,
    /// Let it through under the strict rate-limit tier
    Throttle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub score_threshold: u32,
    pub policy: BotPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: i64,
    pub signup_attempts: u32,
    pub signup_window_seconds: i64,
    pub refresh_attempts: u32,
    pub refresh_window_seconds: i64,
    /// Attempts allowed per window for requests flagged suspicious when the
    /// bot policy is `throttle`
    pub suspect_attempts: u32,
    pub session_requests_per_minute: u32,
}

/// Static tier table; values overridable from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct TierTable {
    pub free: TierLimits,
    pub pro: TierLimits,
    pub business: TierLimits,
}

impl TierTable {
    pub fn limits_for(&self, tier: SubscriptionTier) -> TierLimits {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Pro => self.pro,
            SubscriptionTier::Business => self.business,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = GatewayConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("gateway-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("linktome"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                signing_secret: get_env("JWT_SIGNING_SECRET", Some(DEV_SIGNING_SECRET), is_prod)?,
                access_token_ttl_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_TTL_MINUTES",
                    "15",
                    is_prod,
                )?,
                refresh_token_ttl_days: parse_env("JWT_REFRESH_TOKEN_TTL_DAYS", "30", is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("linktome"), is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                session_cookie_name: get_env("SESSION_COOKIE_NAME", Some("ltm_session"), is_prod)?,
            },
            bot: BotConfig {
                score_threshold: parse_env("BOT_SCORE_THRESHOLD", "200", is_prod)?,
                policy: get_env("BOT_POLICY", Some("block"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                signup_attempts: parse_env("RATE_LIMIT_SIGNUP_ATTEMPTS", "5", is_prod)?,
                signup_window_seconds: parse_env(
                    "RATE_LIMIT_SIGNUP_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
                refresh_attempts: parse_env("RATE_LIMIT_REFRESH_ATTEMPTS", "60", is_prod)?,
                refresh_window_seconds: parse_env(
                    "RATE_LIMIT_REFRESH_WINDOW_SECONDS",
                    "900",
                    is_prod,
                )?,
                suspect_attempts: parse_env("RATE_LIMIT_SUSPECT_ATTEMPTS", "2", is_prod)?,
                session_requests_per_minute: parse_env(
                    "RATE_LIMIT_SESSION_PER_MINUTE",
                    "240",
                    is_prod,
                )?,
            },
            tiers: TierTable {
                free: TierLimits {
                    requests_per_minute: parse_env("TIER_FREE_PER_MINUTE", "60", is_prod)?,
                    requests_per_day: parse_env("TIER_FREE_PER_DAY", "1000", is_prod)?,
                },
                pro: TierLimits {
                    requests_per_minute: parse_env("TIER_PRO_PER_MINUTE", "300", is_prod)?,
                    requests_per_day: parse_env("TIER_PRO_PER_DAY", "50000", is_prod)?,
                },
                business: TierLimits {
                    requests_per_minute: parse_env("TIER_BUSINESS_PER_MINUTE", "1000", is_prod)?,
                    requests_per_day: parse_env("TIER_BUSINESS_PER_DAY", "-1", is_prod)?,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_ttl_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_TTL_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_ttl_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_TTL_DAYS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.jwt.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SIGNING_SECRET must be at least {} characters in production",
                    MIN_SIGNING_SECRET_LEN
                )));
            }

            if self.jwt.signing_secret == DEV_SIGNING_SECRET {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_SIGNING_SECRET must not use the development fallback in production"
                )));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?.parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for BotPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(BotPolicy::Block),
            "throttle" => Ok(BotPolicy::Throttle),
            _ => Err(format!("Invalid bot policy: {}", s)),
        }
    }
}
