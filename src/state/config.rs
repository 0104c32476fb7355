use std::{path::PathBuf, sync::{Arc, OnceLock}, time::Duration};

use anyhow::Context;
use ring::hmac;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    auth::SubscribeAuthorizer, channel::ChannelSettings, ApiError, ApiResult,
    DEFAULT_HEARTBEAT, DEFAULT_QUEUE_CAPACITY, DEFAULT_TOKEN_TTL, DEFAULT_WS_PATH,
};

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub listen: String,
    /// Producer API token
    pub token: Option<String>,
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub subscribe: SubscribeConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Seconds
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeConfig {
    /// When set, `subscribe` must carry a token signed with it
    #[serde(default)]
    pub secret: Option<String>,
    /// Seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    /// Built on first use, a reload brings a fresh config and so a fresh key
    #[serde(skip)]
    authorizer: OnceLock<Option<Arc<SubscribeAuthorizer>>>,
}

impl PartialEq for SubscribeConfig {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret && self.token_ttl == other.token_ttl
    }
}

fn default_ws_path() -> String { DEFAULT_WS_PATH.to_string() }
fn default_heartbeat() -> u64 { DEFAULT_HEARTBEAT.as_secs() }
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_token_ttl() -> u64 { DEFAULT_TOKEN_TTL }

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            heartbeat_interval: default_heartbeat(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self { secret: None, token_ttl: default_token_ttl(), authorizer: OnceLock::new() }
    }
}

impl ChannelConfig {
    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            path: self.path.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            queue_capacity: self.queue_capacity,
        }
    }
}

impl SubscribeConfig {
    /// `None` means subscriptions are open to anyone.
    pub fn authorizer(&self) -> Option<Arc<SubscribeAuthorizer>> {
        self.authorizer
            .get_or_init(|| {
                self.secret
                    .as_deref()
                    .filter(|secret| !secret.is_empty())
                    .map(|secret| Arc::new(SubscribeAuthorizer::new(secret.as_bytes(), Duration::from_secs(self.token_ttl))))
            })
            .clone()
    }

    pub fn log_policy(&self) {
        if self.authorizer().is_some() {
            tracing::info!(ttl = self.token_ttl, "Subscriptions require a job token");
        } else {
            tracing::warn!("No subscribe secret configured! Any client can watch any job's events");
        }
    }
}

impl Config {
    pub fn parse(path: PathBuf) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("Access denied or file doesn't exists: {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Can't parse {}", path.display()))
    }

    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn verify_token(&self, suspicious: &str) -> ApiResult<()> {
        match &self.token {
            Some(token) => {
                if tokens_match(token, suspicious) {
                    debug!("Producer token passed!");
                    Ok(())
                } else {
                    warn!("Unknown tryed to use producer functions, but use wrong token!");
                    Err(ApiError::Unauthorized)
                }
            },
            None => {
                warn!("Unknown tryed to use producer functions, but token is not defined!");
                Err(ApiError::BadRequest)
            },
        }
    }
}

/// Constant time: compares HMAC tags, never the raw strings.
fn tokens_match(expected: &str, suspicious: &str) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, b"jobcast producer token");
    let tag = hmac::sign(&key, expected.as_bytes());
    hmac::verify(&key, suspicious.as_bytes(), tag.as_ref()).is_ok()
}
