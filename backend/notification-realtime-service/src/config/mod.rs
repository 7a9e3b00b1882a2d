use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub read_receipts: ReadReceiptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// The only path upgrades are accepted on
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_ack_channel")]
    pub ack_channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HS256 secret used by the token issuance endpoint
    pub secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Pings a peer may leave unanswered before it is considered dead
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    /// Frames queued per connection before writes count as failed
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default)]
    pub max_connections_per_user: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadReceiptConfig {
    /// Republish client read receipts on the ack channel
    #[serde(default = "default_publish_receipts")]
    pub publish: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_path() -> String {
    "/ws/notifications".to_string()
}

fn default_channel() -> String {
    event_schema::NOTIFICATION_CHANNEL.to_string()
}

fn default_ack_channel() -> String {
    event_schema::ACK_CHANNEL.to_string()
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_max_missed_pongs() -> u32 {
    2
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_publish_receipts() -> bool {
    true
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            max_missed_pongs: default_max_missed_pongs(),
            outbound_buffer: default_outbound_buffer(),
            max_connections_per_user: None,
        }
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

impl Default for ReadReceiptConfig {
    fn default() -> Self {
        Self {
            publish: default_publish_receipts(),
        }
    }
}

impl Config {
    /// Load from the process environment (`SERVER__PORT`, `REDIS__URL`, `AUTH__SECRET`, ...)
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_environment(config::Environment::default())
    }

    pub fn from_environment(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.separator("__").try_parsing(true))
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("server.ws_path", default_ws_path())?
            .set_default("redis.channel", default_channel())?
            .set_default("redis.ack_channel", default_ack_channel())?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.redis.url.trim().is_empty() {
            return Err(AppError::Config("REDIS__URL must be set".into()));
        }
        if self.auth.secret.trim().is_empty() {
            return Err(AppError::Config("AUTH__SECRET must be set".into()));
        }
        if !self.server.ws_path.starts_with('/') {
            return Err(AppError::Config(format!(
                "SERVER__WS_PATH must start with '/', got {}",
                self.server.ws_path
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn test_defaults() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 0,
                ws_path: default_ws_path(),
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".into(),
                channel: default_channel(),
                ack_channel: default_ack_channel(),
            },
            auth: AuthConfig {
                secret: "test-secret".into(),
                issuer: None,
                leeway_secs: 0,
            },
            websocket: WebSocketConfig::default(),
            read_receipts: ReadReceiptConfig { publish: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default().source(Some(map))
    }

    #[test]
    fn test_load_with_required_values() {
        let config = Config::from_environment(env(&[
            ("REDIS__URL", "redis://cache:6379"),
            ("AUTH__SECRET", "s3cret"),
            ("SERVER__PORT", "9001"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.ws_path, "/ws/notifications");
        assert_eq!(config.redis.channel, "notifications");
        assert_eq!(config.websocket.ping_interval_secs, 30);
        assert!(config.websocket.max_connections_per_user.is_none());
        assert!(config.read_receipts.publish);
    }

    #[test]
    fn test_missing_secret_fails() {
        let result = Config::from_environment(env(&[("REDIS__URL", "redis://cache:6379")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_missing_redis_url_fails() {
        let result = Config::from_environment(env(&[("AUTH__SECRET", "s3cret")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_empty_secret_fails() {
        let result = Config::from_environment(env(&[
            ("REDIS__URL", "redis://cache:6379"),
            ("AUTH__SECRET", "  "),
        ]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_ping_interval_never_zero() {
        let ws = WebSocketConfig {
            ping_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(ws.ping_interval(), Duration::from_secs(1));
    }
}
