#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use vpnshop_billing::provisioning::{
    CreateRemoteSubscription, Provisioner, ProvisioningError, ProvisioningGateway, RemotePlan, RemoteServer,
    RemoteSubscription,
};
use vpnshop_billing::services::PurchaseRequest;
use vpnshop_billing::Services;
use vpnshop_config::AppConfig;
use vpnshop_database::models::{User, UserProfile};
use vpnshop_database::{LedgerStore, MemoryLedgerStore};

/// Records every call and fails on demand.
#[derive(Default)]
pub struct FakeProvisioner {
    next_id: AtomicI64,
    pub created: AtomicUsize,
    pub extended: AtomicUsize,
    pub deleted: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Milliseconds a create call stalls before answering
    pub create_delay_ms: AtomicU64,
    /// Hands out this id on every create when non-zero
    pub fixed_id: AtomicI64,
}

impl FakeProvisioner {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn extended(&self) -> usize {
        self.extended.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_fixed_id(&self, id: i64) {
        self.fixed_id.store(id, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
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
        let delay_ms = self.create_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProvisioningError::Api("no free slots".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = match self.fixed_id.load(Ordering::SeqCst) {
            0 => self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            fixed => fixed,
        };

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
        self.extended.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteSubscription {
            id: handle.parse().unwrap_or_default(),
            user_id: 0,
            server_id: 0,
            plan_id: None,
            status: "active".to_string(),
            expires_at,
        })
    }

    async fn delete_subscription(&self, _handle: &str) -> Result<(), ProvisioningError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(ProvisioningError::Api("panel unreachable".to_string()));
        }
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryLedgerStore>,
    pub provisioner: Arc<FakeProvisioner>,
    pub config: Arc<AppConfig>,
    pub services: Services,
}

pub fn harness() -> Harness {
    harness_with(AppConfig::default())
}

pub fn harness_with(config: AppConfig) -> Harness {
    harness_with_timeout(config, Duration::from_secs(2))
}

pub fn harness_with_timeout(config: AppConfig, provisioning_timeout: Duration) -> Harness {
    let store = Arc::new(MemoryLedgerStore::new());
    let provisioner = Arc::new(FakeProvisioner::default());
    let config = Arc::new(config);

    let gateway = ProvisioningGateway::new(provisioner.clone(), provisioning_timeout);
    let services = Services::new(store.clone() as Arc<dyn LedgerStore>, gateway, config.clone());

    Harness {
        store,
        provisioner,
        config,
        services,
    }
}

impl Harness {
    pub async fn user(&self, telegram_id: i64) -> User {
        self.services
            .users
            .get_or_create_user(telegram_id, &UserProfile::default())
            .await
            .unwrap()
    }

    pub async fn user_with_balance(&self, telegram_id: i64, balance: i64) -> User {
        let user = self.user(telegram_id).await;
        if balance > 0 {
            return self
                .services
                .ledger
                .credit(user.id, Decimal::from(balance), "test top-up")
                .await
                .unwrap();
        }
        user
    }

    pub async fn balance(&self, user: &User) -> Decimal {
        self.services.ledger.balance(user.id).await.unwrap()
    }
}

pub fn plan(price: i64, months: u32) -> PurchaseRequest {
    PurchaseRequest {
        server_id: 3,
        server_name: "nl-amsterdam".to_string(),
        plan_id: 12,
        plan_name: format!("{} month(s)", months),
        duration_months: months,
        price: Decimal::from(price),
    }
}
