use crate::poll_coordinator::{PollSettings, DEFAULT_TICK_TIMEOUT, DEFAULT_UPDATE_INTERVAL};
use crate::powerwall::{DEFAULT_EMAIL, DEFAULT_TIMEZONE};
use anyhow::{bail, Context};
use std::env;
use std::time::Duration;

const DEFAULT_DEVICE_ID: &str = "powerwall";

/// Runtime configuration, read once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub password: String,
    pub device_id: String,
    pub email: String,
    pub timezone: String,
    pub poll: PollSettings,
    /// Empty when entities should only be logged
    pub ha_url: String,
    pub ha_token: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = value("POWERWALL_HOST").context("POWERWALL_HOST must be set")?;
        let password =
            value("POWERWALL_PASSWORD").context("POWERWALL_PASSWORD must be set")?;

        let poll = PollSettings {
            update_interval: parse_secs(value("POLL_INTERVAL_SECS"), "POLL_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_UPDATE_INTERVAL),
            tick_timeout: parse_secs(value("POLL_TIMEOUT_SECS"), "POLL_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_TICK_TIMEOUT),
        };

        Ok(Self {
            host,
            password,
            device_id: value("POWERWALL_ID").unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            email: value("POWERWALL_EMAIL").unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
            timezone: value("POWERWALL_TIMEZONE")
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            poll,
            ha_url: value("HA_URL").unwrap_or_default(),
            ha_token: value("HA_TOKEN").unwrap_or_default(),
        })
    }
}

fn parse_secs(raw: Option<String>, key: &str) -> anyhow::Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got `{raw}`"))?;
    if secs == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Some(Duration::from_secs(secs)))
}
