use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    LedgerStore, LedgerTx, PaymentRepository, PromoCodeRepository, SubscriptionRepository, UserRepository,
};
use crate::error::StoreResult;
use crate::models::{
    NewPayment, NewPromoCode, NewSubscription, NewUser, PaginatedResult, Pagination, Payment, PaymentStatus,
    PromoCode, PromoCodeUsage, Subscription, SubscriptionStatus, User,
};

/// PostgreSQL-backed store. Mutual exclusion comes from `SELECT ... FOR UPDATE`
/// inside the transaction handed out by [`LedgerStore::begin`].
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        UserRepository::find_by_id(&self.pool, id).await
    }

    async fn find_user_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<User>> {
        UserRepository::find_by_telegram_id(&self.pool, telegram_id).await
    }

    async fn upsert_user(&self, input: &NewUser) -> StoreResult<User> {
        UserRepository::upsert(&self.pool, input).await
    }

    async fn set_user_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<User> {
        UserRepository::set_blocked(&self.pool, id, blocked).await
    }

    async fn list_referrals(&self, referrer_id: Uuid) -> StoreResult<Vec<User>> {
        UserRepository::list_referrals(&self.pool, referrer_id).await
    }

    async fn find_subscription(&self, id: Uuid) -> StoreResult<Option<Subscription>> {
        SubscriptionRepository::find_by_id(&self.pool, id).await
    }

    async fn list_user_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>> {
        SubscriptionRepository::list_by_user(&self.pool, user_id).await
    }

    async fn list_active_subscriptions(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        SubscriptionRepository::list_active_by_user(&self.pool, user_id, now).await
    }

    async fn list_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        SubscriptionRepository::list_expiring_between(&self.pool, from, until).await
    }

    async fn list_pending_deprovision(&self, limit: i64) -> StoreResult<Vec<Subscription>> {
        SubscriptionRepository::list_pending_deprovision(&self.pool, limit).await
    }

    async fn clear_deprovision_pending(&self, id: Uuid) -> StoreResult<()> {
        SubscriptionRepository::clear_deprovision_pending(&self.pool, id).await
    }

    async fn find_promo_code(&self, code: &str) -> StoreResult<Option<PromoCode>> {
        PromoCodeRepository::find_by_code(&self.pool, code).await
    }

    async fn insert_promo_code(&self, input: &NewPromoCode) -> StoreResult<PromoCode> {
        PromoCodeRepository::insert(&self.pool, input).await
    }

    async fn list_promo_codes(&self, pagination: &Pagination) -> StoreResult<PaginatedResult<PromoCode>> {
        let total = PromoCodeRepository::count(&self.pool).await?;
        let items = PromoCodeRepository::list(&self.pool, pagination).await?;
        Ok(PaginatedResult::new(items, total, pagination))
    }

    async fn list_redeemable_promo_codes(&self, now: DateTime<Utc>) -> StoreResult<Vec<PromoCode>> {
        PromoCodeRepository::list_redeemable(&self.pool, now).await
    }

    async fn deactivate_promo_code(&self, id: Uuid) -> StoreResult<Option<PromoCode>> {
        PromoCodeRepository::deactivate(&self.pool, id).await
    }

    async fn count_promo_usages(&self, promo_code_id: Uuid) -> StoreResult<i64> {
        PromoCodeRepository::count_usages(&self.pool, promo_code_id).await
    }

    async fn insert_payment(&self, input: &NewPayment) -> StoreResult<Payment> {
        PaymentRepository::insert(&self.pool, input).await
    }

    async fn find_payment(&self, id: Uuid) -> StoreResult<Option<Payment>> {
        PaymentRepository::find_by_id(&self.pool, id).await
    }

    async fn find_payment_by_external_id(&self, external_id: &str) -> StoreResult<Option<Payment>> {
        PaymentRepository::find_by_external_id(&self.pool, external_id).await
    }

    async fn attach_payment_external_id(&self, id: Uuid, external_id: &str) -> StoreResult<Option<Payment>> {
        PaymentRepository::attach_external_id(&self.pool, id, external_id).await
    }

    async fn list_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        PaymentRepository::list_by_user(&self.pool, user_id).await
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        UserRepository::lock_by_id(&mut *self.tx, id).await
    }

    async fn find_user_by_referral_code(&mut self, referral_code: &str) -> StoreResult<Option<User>> {
        UserRepository::find_by_referral_code(&mut *self.tx, referral_code).await
    }

    async fn update_balance(&mut self, id: Uuid, balance: Decimal) -> StoreResult<User> {
        UserRepository::update_balance(&mut *self.tx, id, balance).await
    }

    async fn set_pending_discount(&mut self, id: Uuid, percent: Option<Decimal>) -> StoreResult<User> {
        UserRepository::set_pending_discount(&mut *self.tx, id, percent).await
    }

    async fn set_referred_by(&mut self, id: Uuid, referrer_id: Uuid) -> StoreResult<bool> {
        UserRepository::set_referred_by(&mut *self.tx, id, referrer_id).await
    }

    async fn has_trial(&mut self, user_id: Uuid) -> StoreResult<bool> {
        SubscriptionRepository::has_trial(&mut *self.tx, user_id).await
    }

    async fn insert_subscription(&mut self, input: &NewSubscription) -> StoreResult<Subscription> {
        SubscriptionRepository::insert(&mut *self.tx, input).await
    }

    async fn lock_subscription(&mut self, id: Uuid) -> StoreResult<Option<Subscription>> {
        SubscriptionRepository::lock_by_id(&mut *self.tx, id).await
    }

    async fn lock_latest_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        SubscriptionRepository::lock_latest_active(&mut *self.tx, user_id, now).await
    }

    async fn attach_remote_id(&mut self, id: Uuid, remote_id: &str) -> StoreResult<Subscription> {
        SubscriptionRepository::attach_remote_id(&mut *self.tx, id, remote_id).await
    }

    async fn extend_subscription(&mut self, id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<Subscription> {
        SubscriptionRepository::extend(&mut *self.tx, id, expires_at).await
    }

    async fn transition_subscription(
        &mut self,
        id: Uuid,
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        SubscriptionRepository::transition(&mut *self.tx, id, status, now).await
    }

    async fn expire_due_subscriptions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        SubscriptionRepository::expire_due(&mut *self.tx, now).await
    }

    async fn lock_promo_code(&mut self, code: &str) -> StoreResult<Option<PromoCode>> {
        PromoCodeRepository::lock_by_code(&mut *self.tx, code).await
    }

    async fn has_promo_usage(&mut self, promo_code_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        PromoCodeRepository::has_usage(&mut *self.tx, promo_code_id, user_id).await
    }

    async fn insert_promo_usage(
        &mut self,
        promo_code_id: Uuid,
        user_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<PromoCodeUsage> {
        PromoCodeRepository::insert_usage(&mut *self.tx, promo_code_id, user_id, used_at).await
    }

    async fn increment_promo_usage(&mut self, promo_code_id: Uuid) -> StoreResult<Option<PromoCode>> {
        PromoCodeRepository::increment_usage(&mut *self.tx, promo_code_id).await
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>> {
        PaymentRepository::lock_by_id(&mut *self.tx, id).await
    }

    async fn update_payment_status(
        &mut self,
        id: Uuid,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment> {
        PaymentRepository::update_status(&mut *self.tx, id, status, completed_at).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
