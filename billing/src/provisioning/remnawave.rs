use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use vpnshop_observability::log_external_call;

use super::{CreateRemoteSubscription, Provisioner, ProvisioningError, RemotePlan, RemoteServer, RemoteSubscription};

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    fn failure_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "request rejected".to_string())
    }
}

/// REST client for the Remnawave panel API
#[derive(Clone)]
pub struct RemnawaveClient {
    base_url: String,
    api_key: String,
    secret_key: Option<String>,
    client: Client,
}

impl RemnawaveClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProvisioningError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.filter(|s| !s.is_empty()),
            client,
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiEnvelope<T>, ProvisioningError> {
        let url = format!("{}{}", self.base_url, path);
        log_external_call!("remnawave", path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("X-API-Key", &self.api_key);

        if let Some(secret) = &self.secret_key {
            request = request.header("X-Secret-Key", secret);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let start = std::time::Instant::now();
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        log_external_call!("remnawave", path, start.elapsed().as_millis() as u64, status.as_u16());

        let envelope: ApiEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            ProvisioningError::Api(format!("unexpected response (HTTP {}): {}", status.as_u16(), e))
        })?;

        if !envelope.success || !status.is_success() {
            return Err(ProvisioningError::Api(envelope.failure_text()));
        }

        Ok(envelope)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ProvisioningError> {
        self.send::<T>(method, path, body)
            .await?
            .data
            .ok_or_else(|| ProvisioningError::Api(format!("empty response from {}", path)))
    }
}

#[async_trait]
impl Provisioner for RemnawaveClient {
    async fn list_servers(&self) -> Result<Vec<RemoteServer>, ProvisioningError> {
        self.fetch(Method::GET, "/servers", None).await
    }

    async fn list_plans(&self, server_id: i32) -> Result<Vec<RemotePlan>, ProvisioningError> {
        self.fetch(Method::GET, &format!("/servers/{}/plans", server_id), None).await
    }

    async fn create_subscription(
        &self,
        request: &CreateRemoteSubscription,
    ) -> Result<RemoteSubscription, ProvisioningError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ProvisioningError::Api(format!("cannot encode request: {}", e)))?;
        self.fetch(Method::POST, "/subscriptions", Some(body)).await
    }

    async fn extend_subscription(
        &self,
        handle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RemoteSubscription, ProvisioningError> {
        let body = serde_json::json!({ "expires_at": expires_at });
        self.fetch(Method::PUT, &format!("/subscriptions/{}", handle), Some(body))
            .await
    }

    async fn delete_subscription(&self, handle: &str) -> Result<(), ProvisioningError> {
        self.send::<serde_json::Value>(Method::DELETE, &format!("/subscriptions/{}", handle), None)
            .await?;
        Ok(())
    }
}
