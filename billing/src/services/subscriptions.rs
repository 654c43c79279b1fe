use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vpnshop_config::feature_toggles::TRIAL;
use vpnshop_config::{AppConfig, TrialConfig};
use vpnshop_database::models::{NewSubscription, Subscription, SubscriptionKind, SubscriptionStatus};
use vpnshop_database::{constraints, LedgerStore, LedgerTx, StoreResult};
use vpnshop_observability::{log_balance_changed, log_feature, log_rule, log_subscription_event};

use crate::errors::ServiceError;
use crate::provisioning::{CreateRemoteSubscription, ProvisioningGateway, RemoteSubscription};
use crate::services::ledger::debit_in;
use crate::services::retry::with_conflict_retry;
use crate::SERVICE_NAME;

/// Rows handled per deprovisioning pass
const DEPROVISION_BATCH: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialParams {
    pub duration_days: i64,
    /// 0 = unlimited
    pub traffic_limit_gb: i32,
    pub traffic_strategy: String,
    pub server_id: i32,
}

impl From<&TrialConfig> for TrialParams {
    fn from(config: &TrialConfig) -> Self {
        Self {
            duration_days: config.duration_days,
            traffic_limit_gb: config.traffic_limit_gb,
            traffic_strategy: config.traffic_strategy.clone(),
            server_id: config.server_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub server_id: i32,
    pub server_name: String,
    pub plan_id: i32,
    pub plan_name: String,
    pub duration_months: u32,
    pub price: Decimal,
}

/// Price after a pending percentage discount, rounded to cents.
pub(crate) fn apply_discount(price: Decimal, percent: Decimal) -> Decimal {
    let hundred = Decimal::ONE_HUNDRED;
    (price * (hundred - percent.min(hundred)) / hundred)
        .round_dp(2)
        .max(Decimal::ZERO)
}

/// `at` moved forward by `days`; out-of-range dates are a validation error.
pub(crate) fn days_after(at: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, ServiceError> {
    Duration::try_days(days)
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or_else(|| ServiceError::ValidationError(format!("{} days is out of range", days)))
}

/// Stores the remote handle and commits. A failure here leaves a remote
/// subscription nobody owns, so it is deleted again before returning.
pub(crate) async fn commit_provisioned(
    gateway: &ProvisioningGateway,
    tx: Box<dyn LedgerTx>,
    subscription_id: Uuid,
    remote: &RemoteSubscription,
) -> Result<Subscription, ServiceError> {
    let handle = remote.handle();

    match attach_and_commit(tx, subscription_id, &handle).await {
        Ok(subscription) => Ok(subscription),
        Err(e) => {
            tracing::warn!(subscription_id = %subscription_id, remote_id = %handle, error = %e, "Local commit failed after provisioning");
            gateway.compensate(&handle).await;
            Err(e.into())
        }
    }
}

async fn attach_and_commit(mut tx: Box<dyn LedgerTx>, subscription_id: Uuid, handle: &str) -> StoreResult<Subscription> {
    let subscription = tx.attach_remote_id(subscription_id, handle).await?;
    tx.commit().await?;
    Ok(subscription)
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn LedgerStore>,
    gateway: ProvisioningGateway,
    config: Arc<AppConfig>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: ProvisioningGateway, config: Arc<AppConfig>) -> Self {
        Self { store, gateway, config }
    }

    fn max_retries(&self) -> u32 {
        self.config.maintenance.max_conflict_retries
    }

    /// Claims the one free trial of `user_id`. The row and the remote
    /// subscription appear together or not at all.
    pub async fn create_trial(&self, user_id: Uuid, params: &TrialParams) -> Result<Subscription, ServiceError> {
        let enabled = self.config.feature_toggles.current().trial_enabled();
        log_feature!(TRIAL, enabled);
        if !enabled {
            return Err(ServiceError::FeatureDisabled(TRIAL));
        }
        if params.duration_days <= 0 {
            return Err(ServiceError::ValidationError("trial duration must be positive".to_string()));
        }

        let subscription = with_conflict_retry("create_trial", self.max_retries(), move || {
            self.create_trial_once(user_id, params)
        })
        .await?;

        log_subscription_event(
            SERVICE_NAME,
            "trial_created",
            subscription.id,
            user_id,
            serde_json::json!({
                "expires_at": subscription.expires_at,
                "server_id": subscription.server_id,
                "traffic_limit_gb": subscription.traffic_limit_gb,
            }),
        );
        Ok(subscription)
    }

    async fn create_trial_once(&self, user_id: Uuid, params: &TrialParams) -> Result<Subscription, ServiceError> {
        let expires_at = days_after(Utc::now(), params.duration_days)?;
        let mut tx = self.store.begin().await?;

        let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
        if user.is_blocked {
            return Err(ServiceError::UserBlocked);
        }
        if tx.has_trial(user_id).await? {
            log_rule!("trial_once_per_user", fail, "trial already claimed");
            return Err(ServiceError::TrialAlreadyUsed);
        }

        let traffic_limit_gb = (params.traffic_limit_gb > 0).then_some(params.traffic_limit_gb);

        let subscription = tx
            .insert_subscription(&NewSubscription {
                user_id,
                kind: SubscriptionKind::Trial,
                server_id: params.server_id,
                server_name: format!("server-{}", params.server_id),
                plan_id: 0,
                plan_name: "Trial".to_string(),
                price: Decimal::ZERO,
                traffic_limit_gb,
                traffic_strategy: Some(params.traffic_strategy.clone()),
                expires_at,
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation_of(constraints::ONE_TRIAL_PER_USER) {
                    ServiceError::TrialAlreadyUsed
                } else {
                    e.into()
                }
            })?;

        let remote = self
            .gateway
            .create(&CreateRemoteSubscription {
                user_id: user.telegram_id,
                server_id: params.server_id,
                plan_id: None,
                expires_at,
                traffic_limit_gb,
                traffic_strategy: Some(params.traffic_strategy.clone()),
            })
            .await
            .map_err(ServiceError::provisioning)?;

        commit_provisioned(&self.gateway, tx, subscription.id, &remote).await
    }

    /// Debits `request.price` (less any pending discount) and creates a new
    /// paid subscription in the same transaction.
    pub async fn purchase(&self, user_id: Uuid, request: &PurchaseRequest) -> Result<Subscription, ServiceError> {
        if request.price <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(request.price));
        }
        if request.duration_months == 0 {
            return Err(ServiceError::ValidationError("duration must be at least one month".to_string()));
        }

        let (subscription, balance_after) = with_conflict_retry("purchase", self.max_retries(), move || {
            self.purchase_once(user_id, request)
        })
        .await?;

        if subscription.price > Decimal::ZERO {
            log_balance_changed(
                SERVICE_NAME,
                "balance_debited",
                user_id,
                subscription.price,
                balance_after,
                &format!("purchase of plan {}", request.plan_id),
            );
        }
        log_subscription_event(
            SERVICE_NAME,
            "subscription_purchased",
            subscription.id,
            user_id,
            serde_json::json!({
                "plan_id": subscription.plan_id,
                "price": subscription.price,
                "expires_at": subscription.expires_at,
            }),
        );
        Ok(subscription)
    }

    async fn purchase_once(&self, user_id: Uuid, request: &PurchaseRequest) -> Result<(Subscription, Decimal), ServiceError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_months(Months::new(request.duration_months))
            .ok_or_else(|| ServiceError::ValidationError("duration is out of range".to_string()))?;

        let mut tx = self.store.begin().await?;

        let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
        if user.is_blocked {
            return Err(ServiceError::UserBlocked);
        }

        let price = match user.pending_discount_percent {
            Some(percent) => {
                tx.set_pending_discount(user_id, None).await?;
                apply_discount(request.price, percent)
            }
            None => request.price,
        };

        let balance_after = if price > Decimal::ZERO {
            debit_in(tx.as_mut(), user_id, price).await?.balance
        } else {
            user.balance
        };

        let subscription = tx
            .insert_subscription(&NewSubscription {
                user_id,
                kind: SubscriptionKind::Paid,
                server_id: request.server_id,
                server_name: request.server_name.clone(),
                plan_id: request.plan_id,
                plan_name: request.plan_name.clone(),
                price,
                traffic_limit_gb: None,
                traffic_strategy: None,
                expires_at,
            })
            .await?;

        let remote = self
            .gateway
            .create(&CreateRemoteSubscription {
                user_id: user.telegram_id,
                server_id: request.server_id,
                plan_id: Some(request.plan_id),
                expires_at,
                traffic_limit_gb: None,
                traffic_strategy: None,
            })
            .await
            .map_err(ServiceError::provisioning)?;

        let subscription = commit_provisioned(&self.gateway, tx, subscription.id, &remote).await?;
        Ok((subscription, balance_after))
    }

    pub async fn expire(&self) -> Result<Vec<Subscription>, ServiceError> {
        self.expire_at(Utc::now()).await
    }

    /// Moves every active row with `expires_at <= now` to `expired`. Rows
    /// already expired are left alone, so repeated runs are no-ops.
    pub async fn expire_at(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, ServiceError> {
        let expired = with_conflict_retry("expire_subscriptions", self.max_retries(), move || {
            self.expire_once(now)
        })
        .await?;

        for subscription in &expired {
            log_subscription_event(
                SERVICE_NAME,
                "subscription_expired",
                subscription.id,
                subscription.user_id,
                serde_json::json!({ "expires_at": subscription.expires_at }),
            );
        }
        Ok(expired)
    }

    async fn expire_once(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let expired = tx.expire_due_subscriptions(now).await?;
        tx.commit().await?;
        Ok(expired)
    }

    /// Local cancellation always stands; the remote delete is retried later
    /// if it fails now.
    pub async fn cancel(&self, subscription_id: Uuid) -> Result<Subscription, ServiceError> {
        self.finish(subscription_id, SubscriptionStatus::Cancelled, "subscription_cancelled")
            .await
    }

    /// Admin action, same remote handling as [`Self::cancel`].
    pub async fn suspend(&self, subscription_id: Uuid) -> Result<Subscription, ServiceError> {
        self.finish(subscription_id, SubscriptionStatus::Suspended, "subscription_suspended")
            .await
    }

    async fn finish(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
        event_type: &str,
    ) -> Result<Subscription, ServiceError> {
        let subscription = with_conflict_retry("transition_subscription", self.max_retries(), move || {
            self.transition_once(subscription_id, status)
        })
        .await?;

        log_subscription_event(
            SERVICE_NAME,
            event_type,
            subscription.id,
            subscription.user_id,
            serde_json::json!({ "remote_id": subscription.remote_id }),
        );

        Ok(self.release_remote(subscription).await)
    }

    async fn transition_once(&self, subscription_id: Uuid, status: SubscriptionStatus) -> Result<Subscription, ServiceError> {
        let invalid = |from: SubscriptionStatus| ServiceError::InvalidTransition {
            entity: "subscription",
            from: from.to_string(),
            to: status.to_string(),
        };

        let mut tx = self.store.begin().await?;
        let current = tx
            .lock_subscription(subscription_id)
            .await?
            .ok_or(ServiceError::SubscriptionNotFound)?;

        if !current.status.can_transition_to(status) {
            return Err(invalid(current.status));
        }

        let updated = tx
            .transition_subscription(subscription_id, status, Utc::now())
            .await?
            .ok_or_else(|| invalid(current.status))?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Deletes the remote side of a terminal subscription. Returns the row as
    /// it stands afterwards.
    async fn release_remote(&self, mut subscription: Subscription) -> Subscription {
        let Some(handle) = subscription.remote_id.clone().filter(|_| subscription.deprovision_pending) else {
            return subscription;
        };

        match self.gateway.delete(&handle).await {
            Ok(()) => match self.store.clear_deprovision_pending(subscription.id).await {
                Ok(()) => subscription.deprovision_pending = false,
                Err(e) => {
                    tracing::warn!(subscription_id = %subscription.id, error = %e, "Could not clear deprovision flag")
                }
            },
            Err(e) => tracing::warn!(
                subscription_id = %subscription.id,
                remote_id = %handle,
                error = %e,
                "Remote delete failed, left for the maintenance sweep"
            ),
        }
        subscription
    }

    /// One pass over terminal subscriptions whose remote side still exists.
    /// Returns how many were cleaned up.
    pub async fn retry_deprovisioning(&self) -> Result<usize, ServiceError> {
        let pending = self.store.list_pending_deprovision(DEPROVISION_BATCH).await?;
        let mut released = 0;

        for subscription in pending {
            if !self.release_remote(subscription).await.deprovision_pending {
                released += 1;
            }
        }

        if released > 0 {
            tracing::info!(released, "Deprovisioned remote subscriptions");
        }
        Ok(released)
    }

    pub async fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError> {
        Ok(self.store.list_user_subscriptions(user_id).await?)
    }

    pub async fn get_active(&self, user_id: Uuid) -> Result<Vec<Subscription>, ServiceError> {
        Ok(self.store.list_active_subscriptions(user_id, Utc::now()).await?)
    }

    pub async fn get_expiring_within(&self, days: i64) -> Result<Vec<Subscription>, ServiceError> {
        let now = Utc::now();
        let until = days_after(now, days.max(0))?;
        Ok(self.store.list_expiring_between(now, until).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_rounds_to_cents() {
        assert_eq!(apply_discount(Decimal::from(150), Decimal::from(10)), Decimal::from(135));
        assert_eq!(
            apply_discount(Decimal::new(9999, 2), Decimal::from(33)),
            Decimal::new(6699, 2)
        );
    }

    #[test]
    fn test_full_discount_is_free() {
        assert_eq!(apply_discount(Decimal::from(150), Decimal::ONE_HUNDRED), Decimal::ZERO);
    }

    #[test]
    fn test_days_after_rejects_overflow() {
        let now = Utc::now();
        assert_eq!(days_after(now, 3).unwrap(), now + Duration::days(3));
        assert!(matches!(days_after(now, 100_000_000), Err(ServiceError::ValidationError(_))));
        assert!(matches!(days_after(now, i64::MAX), Err(ServiceError::ValidationError(_))));
    }

    #[test]
    fn test_trial_params_follow_config() {
        let params = TrialParams::from(&TrialConfig::default());
        assert_eq!(params.duration_days, 5);
        assert_eq!(params.traffic_strategy, "NO_RESET");
    }
}
