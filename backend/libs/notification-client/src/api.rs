use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::feed::NotificationItem;

/// HTTP calls the agent makes against the platform API
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Short-lived token for the live endpoint
    async fn fetch_ws_token(&self) -> Result<String, ClientError>;

    /// Newest `limit` notifications
    async fn fetch_notifications(&self, limit: usize) -> Result<Vec<NotificationItem>, ClientError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// The list endpoint answers with either a bare array or a wrapped page
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Page { notifications: Vec<NotificationItem> },
    Items(Vec<NotificationItem>),
}

impl ListResponse {
    fn into_items(self) -> Vec<NotificationItem> {
        match self {
            ListResponse::Page { notifications } => notifications,
            ListResponse::Items(items) => items,
        }
    }
}

pub struct HttpNotificationApi {
    http: reqwest::Client,
    token_url: String,
    list_url: String,
    session_token: Option<String>,
}

impl HttpNotificationApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            token_url: config.api_url(&config.token_path),
            list_url: config.api_url(&config.list_path),
            session_token: config.session_token.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.session_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_ws_token(&self) -> Result<String, ClientError> {
        let response = self
            .authorized(self.http.post(&self.token_url))
            .send()
            .await?;
        let body: TokenResponse = ensure_success(response)?.json().await?;
        Ok(body.token)
    }

    async fn fetch_notifications(&self, limit: usize) -> Result<Vec<NotificationItem>, ClientError> {
        let response = self
            .authorized(self.http.get(&self.list_url))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let body: ListResponse = ensure_success(response)?.json().await?;
        Ok(body.into_items())
    }
}
