use crate::error::{Result, RewardsError};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the burst-spam lookback
const MAX_SPAM_WINDOW_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server configuration
    pub http_port: u16,
    pub service_name: String,
    pub environment: String,

    // Storage; in-memory adapters are used when unset
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,

    pub rate_limit: RateLimitConfig,
    pub spam: SpamConfig,
    pub rewards: RewardsConfig,
    pub content: ContentConfig,
    pub payout: PayoutConfig,
}

/// Submission throttling per user and per client IP
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub user_limit: u32,
    pub ip_limit: u32,
    pub window_seconds: u64,
    /// Counter store operation timeout in milliseconds
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_limit: 3,
            ip_limit: 10,
            window_seconds: 60,
            store_timeout_ms: 100,
        }
    }
}

/// Burst-spam clustering of a single user's submissions
#[derive(Debug, Clone, Deserialize)]
pub struct SpamConfig {
    pub radius_meters: f64,
    pub window_seconds: i64,
    pub nearby_threshold: usize,
    /// Maximum Hamming distance (bits) for two fingerprints to count as the same image
    pub duplicate_max_distance: u32,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            radius_meters: 100.0,
            window_seconds: 300,
            nearby_threshold: 3,
            duplicate_max_distance: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardsConfig {
    pub report_award_points: i64,
    pub redemption_unit_points: i64,
    pub redemption_unit_value: i64,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            report_award_points: 50,
            redemption_unit_points: 500,
            redemption_unit_value: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    pub validation_timeout_ms: u64,
    pub ai_bypass: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            validation_timeout_ms: 3000,
            ai_bypass: false,
        }
    }
}

impl ContentConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }
}

#[derive(Clone, Deserialize)]
pub struct PayoutConfig {
    pub api_url: String,
    pub username: String,
    pub api_key: String,
    pub currency: String,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for PayoutConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayoutConfig")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("api_key", &"[REDACTED]")
            .field("currency", &self.currency)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.africastalking.com/version1/airtime/send".to_string(),
            username: "sandbox".to_string(),
            api_key: String::new(),
            currency: "GHS".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl PayoutConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            service_name: "pothole-rewards-service".to_string(),
            environment: "development".to_string(),
            database_url: None,
            db_max_connections: 10,
            redis_url: None,
            rate_limit: RateLimitConfig::default(),
            spam: SpamConfig::default(),
            rewards: RewardsConfig::default(),
            content: ContentConfig::default(),
            payout: PayoutConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let rate_defaults = RateLimitConfig::default();
        let spam_defaults = SpamConfig::default();
        let rewards_defaults = RewardsConfig::default();
        let content_defaults = ContentConfig::default();
        let payout_defaults = PayoutConfig::default();

        let config = Self {
            http_port: parse_var("HTTP_PORT", 8080)?,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "pothole-rewards-service".to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url: optional_var("DATABASE_URL"),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 10)?,
            redis_url: optional_var("REDIS_URL"),
            rate_limit: RateLimitConfig {
                user_limit: parse_var("USER_SUBMIT_LIMIT", rate_defaults.user_limit)?,
                ip_limit: parse_var("IP_SUBMIT_LIMIT", rate_defaults.ip_limit)?,
                window_seconds: parse_var("SUBMIT_WINDOW_SECS", rate_defaults.window_seconds)?,
                store_timeout_ms: parse_var(
                    "RATE_LIMIT_STORE_TIMEOUT_MS",
                    rate_defaults.store_timeout_ms,
                )?,
            },
            spam: SpamConfig {
                radius_meters: parse_var("SPAM_RADIUS_METERS", spam_defaults.radius_meters)?,
                window_seconds: parse_var("SPAM_WINDOW_SECS", spam_defaults.window_seconds)?,
                nearby_threshold: parse_var(
                    "SPAM_NEARBY_THRESHOLD",
                    spam_defaults.nearby_threshold,
                )?,
                duplicate_max_distance: parse_var(
                    "DUPLICATE_MAX_DISTANCE",
                    spam_defaults.duplicate_max_distance,
                )?,
            },
            rewards: RewardsConfig {
                report_award_points: parse_var(
                    "REPORT_AWARD_POINTS",
                    rewards_defaults.report_award_points,
                )?,
                redemption_unit_points: parse_var(
                    "REDEMPTION_UNIT_POINTS",
                    rewards_defaults.redemption_unit_points,
                )?,
                redemption_unit_value: parse_var(
                    "REDEMPTION_UNIT_VALUE",
                    rewards_defaults.redemption_unit_value,
                )?,
            },
            content: ContentConfig {
                validation_timeout_ms: parse_var(
                    "CONTENT_VALIDATION_TIMEOUT_MS",
                    content_defaults.validation_timeout_ms,
                )?,
                ai_bypass: parse_var("AI_BYPASS", content_defaults.ai_bypass)?,
            },
            payout: PayoutConfig {
                api_url: env::var("PAYOUT_API_URL").unwrap_or(payout_defaults.api_url),
                username: env::var("PAYOUT_USERNAME").unwrap_or(payout_defaults.username),
                api_key: env::var("PAYOUT_API_KEY").unwrap_or(payout_defaults.api_key),
                currency: env::var("PAYOUT_CURRENCY").unwrap_or(payout_defaults.currency),
                timeout_ms: parse_var("PAYOUT_TIMEOUT_MS", payout_defaults.timeout_ms)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rewards.redemption_unit_points <= 0 {
            return Err(RewardsError::Config(
                "REDEMPTION_UNIT_POINTS must be positive".to_string(),
            ));
        }
        if self.rewards.report_award_points <= 0 {
            return Err(RewardsError::Config(
                "REPORT_AWARD_POINTS must be positive".to_string(),
            ));
        }
        if !(1..=MAX_SPAM_WINDOW_SECONDS).contains(&self.spam.window_seconds) {
            return Err(RewardsError::Config(format!(
                "SPAM_WINDOW_SECS must be between 1 and {}",
                MAX_SPAM_WINDOW_SECONDS
            )));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(RewardsError::Config(
                "SUBMIT_WINDOW_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RewardsError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
