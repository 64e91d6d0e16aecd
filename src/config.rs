//! Configuration for the deal watcher

use crate::retry::RetryPolicy;
use anyhow::Result;
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://prod.api.piepay.in/v1";
const DEFAULT_SESSION_FILE: &str = ".session.json";

/// Watcher configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the vendor API
    pub api_base_url: String,

    /// Where the session record is persisted
    pub session_file: PathBuf,

    /// Offer filters
    pub thresholds: Thresholds,

    /// Poll delays and the consecutive-error ceiling
    pub retry: RetryPolicy,

    /// Push notification settings
    pub notify: NotifyConfig,
}

/// Economic thresholds an offer must clear to be surfaced
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Minimum cashback for an offer to be interesting
    pub min_earn: Decimal,
    /// Maximum outlay, to avoid large transactions
    pub max_pay: Decimal,
    /// Minimum cashback earned per unit paid
    pub min_earn_per_pay: Decimal,
}

/// Telegram notification settings
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let api_base_url =
            env::var("API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let session_file = env::var("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SESSION_FILE));

        let min_earn = decimal_var("MIN_EARN", Decimal::from(100));
        let max_pay = decimal_var("MAX_PAY", Decimal::from(100_000));
        let min_earn_per_pay = decimal_var("MIN_EARN_PER_PAY", Decimal::new(3, 2));

        let min_delay = secs_var("MIN_DELAY_SECS", 1.0);
        let max_delay = secs_var("MAX_DELAY_SECS", 5.0);
        let error_delay_increment = secs_var("ERROR_DELAY_INCREMENT_SECS", 1.0);

        let max_consecutive_errors = env::var("MAX_CONSECUTIVE_ERRORS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let enabled = env::var("NOTIFY_ENABLE")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        let bot_token = env::var("NOTIFY_BOT_TOKEN").ok().filter(|s| !s.is_empty());
        let chat_id = env::var("NOTIFY_CHAT_ID").ok().filter(|s| !s.is_empty());

        // Validate configuration
        if min_delay > max_delay {
            anyhow::bail!("MIN_DELAY_SECS must not exceed MAX_DELAY_SECS");
        }
        if max_consecutive_errors == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_ERRORS must be at least 1");
        }

        Ok(Self {
            api_base_url,
            session_file,
            thresholds: Thresholds {
                min_earn,
                max_pay,
                min_earn_per_pay,
            },
            retry: RetryPolicy {
                min_delay,
                max_delay,
                error_delay_increment,
                max_consecutive_errors,
            },
            notify: NotifyConfig {
                enabled,
                bot_token,
                chat_id,
            },
        })
    }
}

fn decimal_var(name: &str, default: Decimal) -> Decimal {
    env::var(name)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or(default)
}

fn secs_var(name: &str, default_secs: f64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(default_secs);

    Duration::from_secs_f64(secs)
}
