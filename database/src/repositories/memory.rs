use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::error::{constraints, StoreError, StoreResult};
use crate::models::{
    NewPayment, NewPromoCode, NewSubscription, NewUser, PaginatedResult, Pagination, Payment, PaymentStatus,
    PromoCode, PromoCodeUsage, Subscription, SubscriptionKind, SubscriptionStatus, User,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    subscriptions: HashMap<Uuid, Subscription>,
    promo_codes: HashMap<Uuid, PromoCode>,
    deleted_promo_codes: HashSet<Uuid>,
    promo_usages: Vec<PromoCodeUsage>,
    payments: HashMap<Uuid, Payment>,
}

/// Single-writer in-process store. A transaction owns the writer lock for its
/// whole lifetime and mutates a private copy of the state that replaces the
/// committed state on `commit`.
///
/// Do not call the mutating [`LedgerStore`] methods from a task that still
/// holds an open transaction; they wait for the same writer lock.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    committed: Arc<RwLock<MemoryState>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.committed.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.committed.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemoryLedgerTx {
    store: MemoryLedgerStore,
    working: MemoryState,
    _writer: OwnedMutexGuard<()>,
}

fn newest_first<T, F>(mut items: Vec<T>, created_at: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

impl MemoryState {
    fn upsert_user(&mut self, input: &NewUser) -> StoreResult<User> {
        let now = Utc::now();
        let existing = self.users.values().find(|u| u.telegram_id == input.telegram_id).map(|u| u.id);

        if let Some(id) = existing {
            let user = self.users.get_mut(&id).ok_or(StoreError::not_found("user"))?;
            user.username = input.profile.username.clone();
            user.first_name = input.profile.first_name.clone();
            user.last_name = input.profile.last_name.clone();
            if let Some(language_code) = &input.profile.language_code {
                user.language_code = language_code.clone();
            }
            user.is_admin = user.is_admin || input.is_admin;
            user.updated_at = now;
            return Ok(user.clone());
        }

        if self.users.values().any(|u| u.referral_code == input.referral_code) {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::REFERRAL_CODE.to_string(),
            });
        }

        let user = User {
            id: Uuid::new_v4(),
            telegram_id: input.telegram_id,
            username: input.profile.username.clone(),
            first_name: input.profile.first_name.clone(),
            last_name: input.profile.last_name.clone(),
            language_code: input.profile.language_code.clone().unwrap_or_else(|| "ru".to_string()),
            balance: Decimal::ZERO,
            pending_discount_percent: None,
            referral_code: input.referral_code.clone(),
            referred_by: None,
            is_blocked: false,
            is_admin: input.is_admin,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn user_mut(&mut self, id: Uuid) -> StoreResult<&mut User> {
        self.users.get_mut(&id).ok_or(StoreError::not_found("user"))
    }

    fn subscription_mut(&mut self, id: Uuid) -> StoreResult<&mut Subscription> {
        self.subscriptions.get_mut(&id).ok_or(StoreError::not_found("subscription"))
    }

    fn live_promo_code(&self, code: &str) -> Option<PromoCode> {
        self.promo_codes
            .values()
            .find(|p| p.code == code && !self.deleted_promo_codes.contains(&p.id))
            .cloned()
    }

    fn insert_promo_code(&mut self, input: &NewPromoCode) -> StoreResult<PromoCode> {
        if self.promo_codes.values().any(|p| p.code == input.code) {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::PROMO_CODE.to_string(),
            });
        }

        let now = Utc::now();
        let promo = PromoCode {
            id: Uuid::new_v4(),
            code: input.code.clone(),
            promo_type: input.promo_type,
            value: input.value,
            max_uses: input.max_uses,
            used_count: 0,
            is_active: true,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            description: input.description.clone(),
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
        };
        self.promo_codes.insert(promo.id, promo.clone());
        Ok(promo)
    }

    fn insert_payment(&mut self, input: &NewPayment) -> StoreResult<Payment> {
        if let Some(external_id) = &input.external_id {
            if self.payments.values().any(|p| p.external_id.as_ref() == Some(external_id)) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraints::PAYMENT_EXTERNAL_ID.to_string(),
                });
            }
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            amount: input.amount,
            currency: input.currency.clone(),
            method: input.method,
            status: PaymentStatus::Pending,
            external_id: input.external_id.clone(),
            description: input.description.clone(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    fn attach_payment_external_id(&mut self, id: Uuid, external_id: &str) -> StoreResult<Option<Payment>> {
        if self
            .payments
            .values()
            .any(|p| p.id != id && p.external_id.as_deref() == Some(external_id))
        {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::PAYMENT_EXTERNAL_ID.to_string(),
            });
        }

        match self.payments.get_mut(&id) {
            Some(payment) if payment.external_id.is_none() => {
                payment.external_id = Some(external_id.to_string());
                payment.updated_at = Utc::now();
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    fn end_subscription(subscription: &mut Subscription, status: SubscriptionStatus, now: DateTime<Utc>) {
        subscription.status = status;
        if status == SubscriptionStatus::Cancelled {
            subscription.cancelled_at = Some(now);
        }
        subscription.deprovision_pending = subscription.remote_id.is_some();
        subscription.updated_at = now;
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let writer = self.writer.clone().lock_owned().await;
        let working = self.read().clone();
        Ok(Box::new(MemoryLedgerTx {
            store: self.clone(),
            working,
            _writer: writer,
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn find_user_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<User>> {
        Ok(self.read().users.values().find(|u| u.telegram_id == telegram_id).cloned())
    }

    async fn upsert_user(&self, input: &NewUser) -> StoreResult<User> {
        let _writer = self.writer.lock().await;
        self.write().upsert_user(input)
    }

    async fn set_user_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<User> {
        let _writer = self.writer.lock().await;
        let mut state = self.write();
        let user = state.user_mut(id)?;
        user.is_blocked = blocked;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn list_referrals(&self, referrer_id: Uuid) -> StoreResult<Vec<User>> {
        let users = self
            .read()
            .users
            .values()
            .filter(|u| u.referred_by == Some(referrer_id))
            .cloned()
            .collect();
        Ok(newest_first(users, |u: &User| u.created_at))
    }

    async fn find_subscription(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.read().subscriptions.get(&id).cloned())
    }

    async fn list_user_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>> {
        let subscriptions = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(subscriptions, |s: &Subscription| s.created_at))
    }

    async fn list_active_subscriptions(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_live_at(now))
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.expires_at);
        Ok(subscriptions)
    }

    async fn list_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.status == SubscriptionStatus::Active && s.expires_at > from && s.expires_at <= until)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.expires_at);
        Ok(subscriptions)
    }

    async fn list_pending_deprovision(&self, limit: i64) -> StoreResult<Vec<Subscription>> {
        let mut subscriptions: Vec<Subscription> = self
            .read()
            .subscriptions
            .values()
            .filter(|s| s.deprovision_pending)
            .cloned()
            .collect();
        subscriptions.sort_by_key(|s| s.updated_at);
        subscriptions.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(subscriptions)
    }

    async fn clear_deprovision_pending(&self, id: Uuid) -> StoreResult<()> {
        let _writer = self.writer.lock().await;
        let mut state = self.write();
        if let Some(subscription) = state.subscriptions.get_mut(&id) {
            subscription.deprovision_pending = false;
            subscription.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_promo_code(&self, code: &str) -> StoreResult<Option<PromoCode>> {
        Ok(self.read().live_promo_code(code))
    }

    async fn insert_promo_code(&self, input: &NewPromoCode) -> StoreResult<PromoCode> {
        let _writer = self.writer.lock().await;
        self.write().insert_promo_code(input)
    }

    async fn list_promo_codes(&self, pagination: &Pagination) -> StoreResult<PaginatedResult<PromoCode>> {
        let state = self.read();
        let live: Vec<PromoCode> = state
            .promo_codes
            .values()
            .filter(|p| !state.deleted_promo_codes.contains(&p.id))
            .cloned()
            .collect();
        let total = live.len() as i64;
        let items = newest_first(live, |p: &PromoCode| p.created_at)
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Ok(PaginatedResult::new(items, total, pagination))
    }

    async fn list_redeemable_promo_codes(&self, now: DateTime<Utc>) -> StoreResult<Vec<PromoCode>> {
        let state = self.read();
        let codes = state
            .promo_codes
            .values()
            .filter(|p| !state.deleted_promo_codes.contains(&p.id) && p.is_redeemable_at(now))
            .cloned()
            .collect();
        Ok(newest_first(codes, |p: &PromoCode| p.created_at))
    }

    async fn deactivate_promo_code(&self, id: Uuid) -> StoreResult<Option<PromoCode>> {
        let _writer = self.writer.lock().await;
        let mut state = self.write();
        if state.deleted_promo_codes.contains(&id) {
            return Ok(None);
        }
        let Some(promo) = state.promo_codes.get_mut(&id) else {
            return Ok(None);
        };
        promo.is_active = false;
        promo.updated_at = Utc::now();
        let promo = promo.clone();
        state.deleted_promo_codes.insert(id);
        Ok(Some(promo))
    }

    async fn count_promo_usages(&self, promo_code_id: Uuid) -> StoreResult<i64> {
        let count = self
            .read()
            .promo_usages
            .iter()
            .filter(|u| u.promo_code_id == promo_code_id)
            .count();
        Ok(count as i64)
    }

    async fn insert_payment(&self, input: &NewPayment) -> StoreResult<Payment> {
        let _writer = self.writer.lock().await;
        self.write().insert_payment(input)
    }

    async fn find_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.read().payments.get(&id).cloned())
    }

    async fn find_payment_by_external_id(&self, external_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .read()
            .payments
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn attach_payment_external_id(&self, id: Uuid, external_id: &str) -> StoreResult<Option<Payment>> {
        let _writer = self.writer.lock().await;
        self.write().attach_payment_external_id(id, external_id)
    }

    async fn list_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let payments = self
            .read()
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(payments, |p: &Payment| p.created_at))
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.working.users.get(&id).cloned())
    }

    async fn find_user_by_referral_code(&mut self, referral_code: &str) -> StoreResult<Option<User>> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.referral_code == referral_code)
            .cloned())
    }

    async fn update_balance(&mut self, id: Uuid, balance: Decimal) -> StoreResult<User> {
        if balance < Decimal::ZERO {
            return Err(StoreError::CheckViolation {
                constraint: constraints::NON_NEGATIVE_BALANCE.to_string(),
            });
        }
        let user = self.working.user_mut(id)?;
        user.balance = balance;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_pending_discount(&mut self, id: Uuid, percent: Option<Decimal>) -> StoreResult<User> {
        let user = self.working.user_mut(id)?;
        user.pending_discount_percent = percent;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_referred_by(&mut self, id: Uuid, referrer_id: Uuid) -> StoreResult<bool> {
        if id == referrer_id {
            return Ok(false);
        }
        let user = self.working.user_mut(id)?;
        if user.referred_by.is_some() {
            return Ok(false);
        }
        user.referred_by = Some(referrer_id);
        user.updated_at = Utc::now();
        Ok(true)
    }

    async fn has_trial(&mut self, user_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .working
            .subscriptions
            .values()
            .any(|s| s.user_id == user_id && s.is_trial()))
    }

    async fn insert_subscription(&mut self, input: &NewSubscription) -> StoreResult<Subscription> {
        if input.kind == SubscriptionKind::Trial && self.has_trial(input.user_id).await? {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::ONE_TRIAL_PER_USER.to_string(),
            });
        }

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            kind: input.kind,
            server_id: input.server_id,
            server_name: input.server_name.clone(),
            plan_id: input.plan_id,
            plan_name: input.plan_name.clone(),
            status: SubscriptionStatus::Active,
            price: input.price,
            traffic_limit_gb: input.traffic_limit_gb,
            traffic_strategy: input.traffic_strategy.clone(),
            remote_id: None,
            deprovision_pending: false,
            expires_at: input.expires_at,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.working.subscriptions.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn lock_subscription(&mut self, id: Uuid) -> StoreResult<Option<Subscription>> {
        Ok(self.working.subscriptions.get(&id).cloned())
    }

    async fn lock_latest_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        Ok(self
            .working
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_live_at(now))
            .max_by_key(|s| s.expires_at)
            .cloned())
    }

    async fn attach_remote_id(&mut self, id: Uuid, remote_id: &str) -> StoreResult<Subscription> {
        let taken = self
            .working
            .subscriptions
            .values()
            .any(|s| s.id != id && s.remote_id.as_deref() == Some(remote_id));
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::REMOTE_ID.to_string(),
            });
        }

        let subscription = self.working.subscription_mut(id)?;
        subscription.remote_id = Some(remote_id.to_string());
        subscription.updated_at = Utc::now();
        Ok(subscription.clone())
    }

    async fn extend_subscription(&mut self, id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<Subscription> {
        let subscription = self.working.subscription_mut(id)?;
        if subscription.status != SubscriptionStatus::Active {
            return Err(StoreError::not_found("subscription"));
        }
        subscription.expires_at = expires_at;
        subscription.updated_at = Utc::now();
        Ok(subscription.clone())
    }

    async fn transition_subscription(
        &mut self,
        id: Uuid,
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        match self.working.subscriptions.get_mut(&id) {
            Some(subscription) if subscription.status == SubscriptionStatus::Active => {
                MemoryState::end_subscription(subscription, status, now);
                Ok(Some(subscription.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_due_subscriptions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        let mut expired = Vec::new();
        for subscription in self.working.subscriptions.values_mut() {
            if subscription.status == SubscriptionStatus::Active && subscription.expires_at <= now {
                MemoryState::end_subscription(subscription, SubscriptionStatus::Expired, now);
                expired.push(subscription.clone());
            }
        }
        Ok(expired)
    }

    async fn lock_promo_code(&mut self, code: &str) -> StoreResult<Option<PromoCode>> {
        Ok(self.working.live_promo_code(code))
    }

    async fn has_promo_usage(&mut self, promo_code_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .working
            .promo_usages
            .iter()
            .any(|u| u.promo_code_id == promo_code_id && u.user_id == user_id))
    }

    async fn insert_promo_usage(
        &mut self,
        promo_code_id: Uuid,
        user_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<PromoCodeUsage> {
        if self.has_promo_usage(promo_code_id, user_id).await? {
            return Err(StoreError::UniqueViolation {
                constraint: constraints::PROMO_USAGE_PER_USER.to_string(),
            });
        }
        let usage = PromoCodeUsage {
            id: Uuid::new_v4(),
            promo_code_id,
            user_id,
            used_at,
        };
        self.working.promo_usages.push(usage.clone());
        Ok(usage)
    }

    async fn increment_promo_usage(&mut self, promo_code_id: Uuid) -> StoreResult<Option<PromoCode>> {
        match self.working.promo_codes.get_mut(&promo_code_id) {
            Some(promo) if !promo.is_exhausted() => {
                promo.used_count += 1;
                promo.updated_at = Utc::now();
                Ok(Some(promo.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn update_payment_status(
        &mut self,
        id: Uuid,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment> {
        let payment = self
            .working
            .payments
            .get_mut(&id)
            .ok_or(StoreError::not_found("payment"))?;
        payment.status = status;
        payment.completed_at = completed_at;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryLedgerTx { store, working, _writer } = *self;
        *store.write() = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PromoCodeType, UserProfile};
    use chrono::Duration;

    fn new_user(telegram_id: i64, referral_code: &str) -> NewUser {
        NewUser {
            telegram_id,
            profile: UserProfile::default(),
            referral_code: referral_code.to_string(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = MemoryLedgerStore::new();
        let user = store.upsert_user(&new_user(1, "AAAA1111")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_balance(user.id, Decimal::from(100)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().balance, Decimal::ZERO);

        let mut tx = store.begin().await.unwrap();
        tx.update_balance(user.id, Decimal::from(100)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().balance, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_writer() {
        let store = MemoryLedgerStore::new();
        let user = store.upsert_user(&new_user(1, "AAAA1111")).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.update_balance(user.id, Decimal::from(5)).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.lock_user(user.id).await.unwrap().unwrap().balance, Decimal::ZERO);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_refreshes_profile_and_rejects_code_collision() {
        let store = MemoryLedgerStore::new();
        let first = store.upsert_user(&new_user(1, "AAAA1111")).await.unwrap();

        let mut again = new_user(1, "BBBB2222");
        again.profile.username = Some("alice".to_string());
        let refreshed = store.upsert_user(&again).await.unwrap();
        assert_eq!(refreshed.id, first.id);
        assert_eq!(refreshed.referral_code, "AAAA1111");
        assert_eq!(refreshed.username.as_deref(), Some("alice"));

        let err = store.upsert_user(&new_user(2, "AAAA1111")).await.unwrap_err();
        assert!(err.is_unique_violation_of(constraints::REFERRAL_CODE));
    }

    #[tokio::test]
    async fn test_store_constraints_are_emulated() {
        let store = MemoryLedgerStore::new();
        let user = store.upsert_user(&new_user(1, "AAAA1111")).await.unwrap();
        let now = Utc::now();

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_balance(user.id, Decimal::from(-1)).await.unwrap_err();
        assert!(matches!(err, StoreError::CheckViolation { .. }));

        let trial = NewSubscription {
            user_id: user.id,
            kind: SubscriptionKind::Trial,
            server_id: 1,
            server_name: String::new(),
            plan_id: 1,
            plan_name: String::new(),
            price: Decimal::ZERO,
            traffic_limit_gb: None,
            traffic_strategy: None,
            expires_at: now + Duration::days(5),
        };
        tx.insert_subscription(&trial).await.unwrap();
        let err = tx.insert_subscription(&trial).await.unwrap_err();
        assert!(err.is_unique_violation_of(constraints::ONE_TRIAL_PER_USER));
        tx.commit().await.unwrap();

        let promo = store
            .insert_promo_code(&NewPromoCode {
                code: "ONCE".to_string(),
                promo_type: PromoCodeType::DiscountAmount,
                value: Decimal::from(10),
                max_uses: 1,
                valid_from: now - Duration::hours(1),
                valid_until: None,
                description: String::new(),
                created_by: None,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.increment_promo_usage(promo.id).await.unwrap().is_some());
        assert!(tx.increment_promo_usage(promo.id).await.unwrap().is_none());
        tx.insert_promo_usage(promo.id, user.id, now).await.unwrap();
        let err = tx.insert_promo_usage(promo.id, user.id, now).await.unwrap_err();
        assert!(err.is_unique_violation_of(constraints::PROMO_USAGE_PER_USER));
        tx.commit().await.unwrap();

        assert_eq!(store.count_promo_usages(promo.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deactivated_code_is_hidden() {
        let store = MemoryLedgerStore::new();
        let promo = store
            .insert_promo_code(&NewPromoCode {
                code: "GONE".to_string(),
                promo_type: PromoCodeType::BonusDays,
                value: Decimal::from(3),
                max_uses: 0,
                valid_from: Utc::now(),
                valid_until: None,
                description: String::new(),
                created_by: None,
            })
            .await
            .unwrap();

        assert!(store.deactivate_promo_code(promo.id).await.unwrap().is_some());
        assert!(store.deactivate_promo_code(promo.id).await.unwrap().is_none());
        assert!(store.find_promo_code("GONE").await.unwrap().is_none());
        assert_eq!(store.list_promo_codes(&Pagination::default()).await.unwrap().total, 0);
    }
}
