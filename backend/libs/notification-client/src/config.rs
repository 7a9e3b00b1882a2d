use std::time::Duration;
use url::Url;

use crate::backoff::BackoffConfig;
use crate::error::ClientError;

pub const DEFAULT_TOKEN_PATH: &str = "/api/notifications/ws-token";
pub const DEFAULT_LIST_PATH: &str = "/api/notifications";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the platform API, e.g. `https://api.example.com`
    pub api_base: String,
    /// Realtime endpoint, e.g. `wss://rt.example.com/ws/notifications`
    pub ws_url: String,
    /// Issues short-lived WebSocket tokens
    pub token_path: String,
    /// Paginated notification list used while polling
    pub list_path: String,
    /// Bearer credential for API calls
    pub session_token: Option<String>,
    pub page_size: usize,
    pub poll_interval: Duration,
    /// How long the live connection may be down before polling starts
    pub fallback_after: Duration,
    pub keepalive_interval: Duration,
    /// Silence from the server longer than this drops the connection
    pub idle_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    pub fn new(api_base: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            ws_url: ws_url.into(),
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            list_path: DEFAULT_LIST_PATH.to_string(),
            session_token: None,
            page_size: 20,
            poll_interval: Duration::from_secs(30),
            fallback_after: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Live endpoint URL carrying `token` as a query parameter
    pub fn ws_url_with_token(&self, token: &str) -> Result<String, ClientError> {
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url.into())
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_appended_as_query_parameter() {
        let config = ClientConfig::new("http://api", "ws://rt/ws/notifications");
        assert_eq!(
            config.ws_url_with_token("abc.def").unwrap(),
            "ws://rt/ws/notifications?token=abc.def"
        );

        let config = ClientConfig::new("http://api", "ws://rt/ws/notifications?v=2");
        assert_eq!(
            config.ws_url_with_token("abc").unwrap(),
            "ws://rt/ws/notifications?v=2&token=abc"
        );
    }

    #[test]
    fn test_opaque_token_is_percent_encoded() {
        let config = ClientConfig::new("http://api", "ws://rt/ws/notifications");
        assert_eq!(
            config.ws_url_with_token("a+b&c#d=e").unwrap(),
            "ws://rt/ws/notifications?token=a%2Bb%26c%23d%3De"
        );
    }

    #[test]
    fn test_unparseable_ws_url_is_an_error() {
        let config = ClientConfig::new("http://api", "not a url");
        assert!(matches!(
            config.ws_url_with_token("abc"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_api_url_joins_cleanly() {
        let config = ClientConfig::new("http://api/", "ws://rt");
        assert_eq!(
            config.api_url(DEFAULT_TOKEN_PATH),
            "http://api/api/notifications/ws-token"
        );
    }
}
