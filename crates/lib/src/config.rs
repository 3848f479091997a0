//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.convsync/config.json`) and environment.
//! Covers the conversation service location, the reconnect policy, and the user identity.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ReconnectPolicy;

/// Top-level client config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Conversation service location.
    #[serde(default)]
    pub server: ServerConfig,

    /// Streaming channel reconnect policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// User identity settings.
    #[serde(default)]
    pub user: UserConfig,
}

/// Where the conversation service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Origin of the service (default "http://127.0.0.1:8000"). Overridden by CONVSYNC_SERVER_ORIGIN env.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Prefix of the conversation CRUD endpoints (default "/api").
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Path of the streaming endpoint on the same origin (default "/api/chat").
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

fn default_origin() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

fn default_chat_path() -> String {
    "/api/chat".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            api_prefix: default_api_prefix(),
            chat_path: default_chat_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    /// Wait `delayMs` before every attempt.
    #[default]
    Fixed,

    /// Double the delay after every failed attempt, starting at `delayMs`, capped at `maxDelayMs`.
    Exponential,
}

/// Reconnect settings for the streaming channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: ReconnectStrategy,

    /// Delay before a reconnection attempt (default 10000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound for the exponential strategy (default 60000). Ignored by the fixed strategy.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    10_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            delay_ms: default_reconnect_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::Fixed(delay),
            ReconnectStrategy::Exponential => ReconnectPolicy::Exponential {
                initial: delay,
                max: Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
            },
        }
    }
}

/// User identity. When no username is set, the service's userinfo endpoint is asked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// Display name used as `from` on outbound messages. Overridden by CONVSYNC_USERNAME env.
    pub username: Option<String>,
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the service origin: env CONVSYNC_SERVER_ORIGIN overrides config.
pub fn resolve_origin(config: &Config) -> String {
    non_empty_env("CONVSYNC_SERVER_ORIGIN")
        .unwrap_or_else(|| config.server.origin.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the configured username: env CONVSYNC_USERNAME overrides config.
pub fn resolve_username(config: &Config) -> Option<String> {
    non_empty_env("CONVSYNC_USERNAME").or_else(|| {
        config
            .user
            .username
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Derive the streaming endpoint from an HTTP origin: `http` becomes `ws`, `https` becomes `wss`.
pub fn chat_ws_url(origin: &str, chat_path: &str) -> String {
    let origin = origin.trim().trim_end_matches('/');
    let ws_origin = match origin.strip_prefix("http") {
        Some(rest) => format!("ws{}", rest),
        None => origin.to_string(),
    };
    if chat_path.starts_with('/') {
        format!("{}{}", ws_origin, chat_path)
    } else {
        format!("{}/{}", ws_origin, chat_path)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CONVSYNC_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".convsync").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or CONVSYNC_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_layout() {
        let c = Config::default();
        assert_eq!(c.server.origin, "http://127.0.0.1:8000");
        assert_eq!(c.server.api_prefix, "/api");
        assert_eq!(c.server.chat_path, "/api/chat");
        assert_eq!(
            c.reconnect.policy(),
            ReconnectPolicy::Fixed(Duration::from_secs(10))
        );
    }

    #[test]
    fn ws_url_from_http_origin() {
        assert_eq!(
            chat_ws_url("http://localhost:8000", "/api/chat"),
            "ws://localhost:8000/api/chat"
        );
        assert_eq!(
            chat_ws_url("https://chat.example.com/", "api/chat"),
            "wss://chat.example.com/api/chat"
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(
            r#"{ "reconnect": { "strategy": "exponential", "delayMs": 500 } }"#,
        )
        .unwrap();
        assert_eq!(c.server.chat_path, "/api/chat");
        assert_eq!(
            c.reconnect.policy(),
            ReconnectPolicy::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!(
            "convsync-missing-{}.json",
            uuid::Uuid::new_v4()
        ));
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(c.user.username.is_none());
    }
}
