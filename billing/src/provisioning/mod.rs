//! Calls into the remote subscription-provisioning service.

pub mod offline;
pub mod remnawave;

pub use offline::OfflineProvisioner;
pub use remnawave::RemnawaveClient;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vpnshop_observability::log_provisioning_call;

use crate::SERVICE_NAME;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote error: {0}")]
    Api(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteServer {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemotePlan {
    pub id: i32,
    pub server_id: i32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    /// Months
    pub duration: i32,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateRemoteSubscription {
    /// Telegram id of the owner
    pub user_id: i64,
    pub server_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<i32>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_limit_gb: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteSubscription {
    pub id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub server_id: i32,
    #[serde(default)]
    pub plan_id: Option<i32>,
    #[serde(default)]
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

impl RemoteSubscription {
    /// Handle persisted on the local subscription row
    pub fn handle(&self) -> String {
        self.id.to_string()
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<RemoteServer>, ProvisioningError>;

    async fn list_plans(&self, server_id: i32) -> Result<Vec<RemotePlan>, ProvisioningError>;

    async fn create_subscription(
        &self,
        request: &CreateRemoteSubscription,
    ) -> Result<RemoteSubscription, ProvisioningError>;

    async fn extend_subscription(
        &self,
        handle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RemoteSubscription, ProvisioningError>;

    async fn delete_subscription(&self, handle: &str) -> Result<(), ProvisioningError>;
}

/// Wraps a [`Provisioner`] so that every call is bounded by a timeout and
/// leaves a domain event behind.
#[derive(Clone)]
pub struct ProvisioningGateway {
    provisioner: Arc<dyn Provisioner>,
    timeout: Duration,
}

impl ProvisioningGateway {
    pub fn new(provisioner: Arc<dyn Provisioner>, timeout: Duration) -> Self {
        Self { provisioner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ProvisioningError>
    where
        F: Future<Output = Result<T, ProvisioningError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProvisioningError::Timeout(self.timeout)),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let error = result.as_ref().err().map(|e| e.to_string());
        log_provisioning_call(SERVICE_NAME, operation, duration_ms, error.as_deref());

        result
    }

    pub async fn list_servers(&self) -> Result<Vec<RemoteServer>, ProvisioningError> {
        self.bounded("list_servers", self.provisioner.list_servers()).await
    }

    pub async fn list_plans(&self, server_id: i32) -> Result<Vec<RemotePlan>, ProvisioningError> {
        self.bounded("list_plans", self.provisioner.list_plans(server_id)).await
    }

    pub async fn create(&self, request: &CreateRemoteSubscription) -> Result<RemoteSubscription, ProvisioningError> {
        self.bounded("create_subscription", self.provisioner.create_subscription(request))
            .await
    }

    pub async fn extend(&self, handle: &str, expires_at: DateTime<Utc>) -> Result<RemoteSubscription, ProvisioningError> {
        self.bounded("extend_subscription", self.provisioner.extend_subscription(handle, expires_at))
            .await
    }

    pub async fn delete(&self, handle: &str) -> Result<(), ProvisioningError> {
        self.bounded("delete_subscription", self.provisioner.delete_subscription(handle))
            .await
    }

    /// Undo of a creation whose local transaction did not commit
    pub async fn compensate(&self, handle: &str) {
        if let Err(e) = self.delete(handle).await {
            tracing::error!(
                remote_id = %handle,
                error = %e,
                "Failed to remove remote subscription after local rollback"
            );
        }
    }
}
