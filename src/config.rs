use std::env;
use std::time::Duration;

use anyhow::Context;
use chrono_tz::Tz;

use crate::alerts::{BatchSettings, DEFAULT_BATCH_THRESHOLD, DEFAULT_BATCH_WINDOW};

const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Settings for the outbound alert path.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub batch: BatchSettings,
    pub timezone: Tz,
}

impl AlertConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bot_token: required_env("TELEGRAM_BOT_TOKEN")?,
            chat_id: required_env("TELEGRAM_CHAT_ID")?,
            batch: BatchSettings {
                window: optional_env("ALERT_BATCH_WINDOW_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_BATCH_WINDOW),
                threshold: optional_env("ALERT_BATCH_THRESHOLD")?
                    .unwrap_or(DEFAULT_BATCH_THRESHOLD),
            },
            timezone: timezone()?,
        })
    }
}

/// Reference zone for every rendered timestamp.
pub fn timezone() -> anyhow::Result<Tz> {
    Ok(optional_env::<Tz>("ALERT_TIMEZONE")?.unwrap_or(DEFAULT_TIMEZONE))
}

/// Settings for the `serve` command.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub webhook_secret: String,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            webhook_secret: required_env("ALERT_WEBHOOK_SECRET")?,
        })
    }
}

pub fn database_url() -> anyhow::Result<String> {
    required_env("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")
}

fn required_env(key: &str) -> anyhow::Result<String> {
    let value = env::var(key).with_context(|| format!("{key} must be set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{key} must not be empty");
    }
    Ok(value)
}

fn optional_env<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{key} is invalid: {err}")),
        _ => Ok(None),
    }
}
