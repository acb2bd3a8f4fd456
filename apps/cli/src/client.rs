//! HTTP client for the daemon's control server

use std::time::Duration;

use librarian_shared_config::ControlConfig;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::models::{
    DaemonStatus, EnqueueRequest, JobView, KillSummary, ReloadSummary, StopSummary,
};

/// Control server client
///
/// Every request carries the configured token as `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct ControlClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> ClientResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self::with_client(http_client, base_url, token))
    }

    /// Create a client with a custom HTTP client (for testing)
    pub fn with_client(
        http_client: Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn from_config(config: &ControlConfig) -> ClientResult<Self> {
        Self::new(config.base_url(), config.client_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Control request");
        let builder = self.http_client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClientResult<T> {
        let response = builder.send().await.map_err(|e| {
            if e.is_connect() {
                ClientError::NotRunning(self.base_url.clone())
            } else {
                ClientError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Check whether the daemon answers its liveness probe
    pub async fn is_alive(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/health/live", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn status(&self) -> ClientResult<DaemonStatus> {
        self.send(self.request(Method::GET, "/status")).await
    }

    pub async fn reload(&self) -> ClientResult<ReloadSummary> {
        self.send(self.request(Method::POST, "/reload")).await
    }

    pub async fn stop(&self) -> ClientResult<StopSummary> {
        self.send(self.request(Method::POST, "/stop")).await
    }

    /// Cancel one job, or every job with `"all"`
    pub async fn kill(&self, id: &str) -> ClientResult<KillSummary> {
        self.send(self.request(Method::POST, "/kill").json(&json!({ "id": id })))
            .await
    }

    pub async fn enqueue(&self, request: &EnqueueRequest) -> ClientResult<JobView> {
        self.send(self.request(Method::POST, "/enqueue").json(request))
            .await
    }

    pub async fn job(&self, id: &str) -> ClientResult<JobView> {
        self.send(self.request(Method::GET, &format!("/jobs/{}", id)))
            .await
    }
}
