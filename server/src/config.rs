//! Configuration management for the server.

use crate::executor::UpdateMode;
use crate::exports::ExportKind;
use crate::retry::RetryPolicy;
use sheetsync_engine::DuplicatePolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Telegram bot credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory holding one JSON sheet per export
    pub data_dir: PathBuf,
    /// Directory the export files are downloaded into
    pub downloads_dir: PathBuf,
    /// Bearer token required by mutating routes, if set
    pub trigger_token: Option<String>,
    /// Telegram credentials; `None` logs notifications instead
    pub telegram: Option<TelegramConfig>,
    pub notifications_enabled: bool,
    /// Allow-list of exports; `None` enables all of them
    pub enabled_exports: Option<Vec<ExportKind>>,
    pub duplicate_policy: DuplicatePolicy,
    pub update_mode: UpdateMode,
    pub retry: RetryPolicy,
    /// Spare rows requested on top of what a run needs
    pub capacity_buffer: usize,
    /// Run summaries kept for `GET /runs`
    pub run_history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            data_dir: PathBuf::from("data"),
            downloads_dir: PathBuf::from("downloads"),
            trigger_token: None,
            telegram: None,
            notifications_enabled: true,
            enabled_exports: None,
            duplicate_policy: DuplicatePolicy::default(),
            update_mode: UpdateMode::default(),
            retry: RetryPolicy::default(),
            capacity_buffer: 100,
            run_history_limit: 100,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or(defaults.host);
        let port = match var("PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let data_dir = var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let downloads_dir = var("DOWNLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.downloads_dir);

        let trigger_token = var("TRIGGER_TOKEN");
        let telegram = match (var("TELEGRAM_TOKEN"), var("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };
        let notifications_enabled =
            !parse_or("DISABLE_NOTIFICATIONS", var("DISABLE_NOTIFICATIONS"), false)?;

        let enabled_exports = match var("ENABLED_EXPORTS") {
            Some(list) => Some(
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<ExportKind>()
                            .map_err(|_| ConfigError::UnknownExport(s.to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        let duplicate_policy = parse_or(
            "DUPLICATE_POLICY",
            var("DUPLICATE_POLICY"),
            defaults.duplicate_policy,
        )?;
        let update_mode = parse_or("UPDATE_MODE", var("UPDATE_MODE"), defaults.update_mode)?;

        let base = defaults.retry;
        let retry = RetryPolicy {
            max_attempts: parse_or(
                "RETRY_MAX_ATTEMPTS",
                var("RETRY_MAX_ATTEMPTS"),
                base.max_attempts,
            )?,
            base_delay: millis_or(
                "RETRY_BASE_DELAY_MS",
                var("RETRY_BASE_DELAY_MS"),
                base.base_delay,
            )?,
            multiplier: parse_or("RETRY_MULTIPLIER", var("RETRY_MULTIPLIER"), base.multiplier)?,
            max_delay: millis_or("RETRY_MAX_DELAY_MS", var("RETRY_MAX_DELAY_MS"), base.max_delay)?,
            jitter: parse_or("RETRY_JITTER", var("RETRY_JITTER"), base.jitter)?,
            min_call_interval: millis_or(
                "MIN_CALL_INTERVAL_MS",
                var("MIN_CALL_INTERVAL_MS"),
                base.min_call_interval,
            )?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MULTIPLIER",
                value: retry.multiplier.to_string(),
            });
        }

        let capacity_buffer = parse_or(
            "CAPACITY_BUFFER",
            var("CAPACITY_BUFFER"),
            defaults.capacity_buffer,
        )?;
        let run_history_limit = parse_or(
            "RUN_HISTORY_LIMIT",
            var("RUN_HISTORY_LIMIT"),
            defaults.run_history_limit,
        )?;

        Ok(Self {
            host,
            port,
            data_dir,
            downloads_dir,
            trigger_token,
            telegram,
            notifications_enabled,
            enabled_exports,
            duplicate_policy,
            update_mode,
            retry,
            capacity_buffer,
            run_history_limit,
        })
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn millis_or(
    name: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(value
        .map(|raw| parse_or::<u64>(name, Some(raw), 0))
        .transpose()?
        .map(Duration::from_millis)
        .unwrap_or(default))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("Unknown export type: '{0}'")]
    UnknownExport(String),

    #[error("Invalid export definition: {0}")]
    InvalidExport(String),
}
