use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

use super::{CreateRemoteSubscription, Provisioner, ProvisioningError, RemotePlan, RemoteServer, RemoteSubscription};

/// Stand-in used when no provisioning endpoint is configured. Hands out
/// sequential handles and keeps nothing.
#[derive(Debug, Default)]
pub struct OfflineProvisioner {
    next_id: AtomicI64,
}

impl OfflineProvisioner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provisioner for OfflineProvisioner {
    async fn list_servers(&self) -> Result<Vec<RemoteServer>, ProvisioningError> {
        Ok(vec![])
    }

    async fn list_plans(&self, _server_id: i32) -> Result<Vec<RemotePlan>, ProvisioningError> {
        Ok(vec![])
    }

    async fn create_subscription(
        &self,
        request: &CreateRemoteSubscription,
    ) -> Result<RemoteSubscription, ProvisioningError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(remote_id = id, user_id = request.user_id, "Provisioning endpoint not configured, issuing local handle");

        Ok(RemoteSubscription {
            id,
            user_id: request.user_id,
            server_id: request.server_id,
            plan_id: request.plan_id,
            status: "active".to_string(),
            expires_at: request.expires_at,
        })
    }

    async fn extend_subscription(
        &self,
        handle: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RemoteSubscription, ProvisioningError> {
        let id = handle
            .parse()
            .map_err(|_| ProvisioningError::Api(format!("unknown handle {}", handle)))?;

        Ok(RemoteSubscription {
            id,
            user_id: 0,
            server_id: 0,
            plan_id: None,
            status: "active".to_string(),
            expires_at,
        })
    }

    async fn delete_subscription(&self, _handle: &str) -> Result<(), ProvisioningError> {
        Ok(())
    }
}
