// Persistence seam shared by the PostgreSQL store and the in-process store

pub mod user;
pub mod subscription;
pub mod promo_code;
pub mod payment;
pub mod postgres;
#[cfg(feature = "memory")]
pub mod memory;

pub use user::UserRepository;
pub use subscription::SubscriptionRepository;
pub use promo_code::PromoCodeRepository;
pub use payment::PaymentRepository;
pub use postgres::{PgLedgerStore, PgLedgerTx};
#[cfg(feature = "memory")]
pub use memory::MemoryLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    NewPayment, NewPromoCode, NewSubscription, NewUser, PaginatedResult, Pagination, Payment, PaymentStatus,
    PromoCode, PromoCodeUsage, Subscription, SubscriptionStatus, User,
};

/// Entry point to the persistent state: opens transactions and serves
/// read-only projections that need no lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerTx>>;

    async fn health_check(&self) -> StoreResult<()>;

    // Users
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<User>>;
    /// Insert-or-refresh by telegram id
    async fn upsert_user(&self, input: &NewUser) -> StoreResult<User>;
    async fn set_user_blocked(&self, id: Uuid, blocked: bool) -> StoreResult<User>;
    async fn list_referrals(&self, referrer_id: Uuid) -> StoreResult<Vec<User>>;

    // Subscriptions
    async fn find_subscription(&self, id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn list_user_subscriptions(&self, user_id: Uuid) -> StoreResult<Vec<Subscription>>;
    async fn list_active_subscriptions(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>>;
    async fn list_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> StoreResult<Vec<Subscription>>;
    async fn list_pending_deprovision(&self, limit: i64) -> StoreResult<Vec<Subscription>>;
    async fn clear_deprovision_pending(&self, id: Uuid) -> StoreResult<()>;

    // Promo codes
    async fn find_promo_code(&self, code: &str) -> StoreResult<Option<PromoCode>>;
    async fn insert_promo_code(&self, input: &NewPromoCode) -> StoreResult<PromoCode>;
    async fn list_promo_codes(&self, pagination: &Pagination) -> StoreResult<PaginatedResult<PromoCode>>;
    async fn list_redeemable_promo_codes(&self, now: DateTime<Utc>) -> StoreResult<Vec<PromoCode>>;
    /// `None` when the code does not exist or is already deleted
    async fn deactivate_promo_code(&self, id: Uuid) -> StoreResult<Option<PromoCode>>;
    async fn count_promo_usages(&self, promo_code_id: Uuid) -> StoreResult<i64>;

    // Payments
    async fn insert_payment(&self, input: &NewPayment) -> StoreResult<Payment>;
    async fn find_payment(&self, id: Uuid) -> StoreResult<Option<Payment>>;
    async fn find_payment_by_external_id(&self, external_id: &str) -> StoreResult<Option<Payment>>;
    /// `None` when the payment already carries a correlation id
    async fn attach_payment_external_id(&self, id: Uuid, external_id: &str) -> StoreResult<Option<Payment>>;
    async fn list_user_payments(&self, user_id: Uuid) -> StoreResult<Vec<Payment>>;
}

/// One unit of work. Every `lock_*` read keeps the row exclusive to this
/// transaction until `commit` or `rollback`; dropping without either rolls back.
#[async_trait]
pub trait LedgerTx: Send {
    // Users
    async fn lock_user(&mut self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_referral_code(&mut self, referral_code: &str) -> StoreResult<Option<User>>;
    async fn update_balance(&mut self, id: Uuid, balance: Decimal) -> StoreResult<User>;
    async fn set_pending_discount(&mut self, id: Uuid, percent: Option<Decimal>) -> StoreResult<User>;
    /// Returns false when a referrer is already recorded
    async fn set_referred_by(&mut self, id: Uuid, referrer_id: Uuid) -> StoreResult<bool>;

    // Subscriptions
    async fn has_trial(&mut self, user_id: Uuid) -> StoreResult<bool>;
    async fn insert_subscription(&mut self, input: &NewSubscription) -> StoreResult<Subscription>;
    async fn lock_subscription(&mut self, id: Uuid) -> StoreResult<Option<Subscription>>;
    async fn lock_latest_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>>;
    async fn attach_remote_id(&mut self, id: Uuid, remote_id: &str) -> StoreResult<Subscription>;
    async fn extend_subscription(&mut self, id: Uuid, expires_at: DateTime<Utc>) -> StoreResult<Subscription>;
    /// `None` when the row is no longer active
    async fn transition_subscription(
        &mut self,
        id: Uuid,
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>>;
    async fn expire_due_subscriptions(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>>;

    // Promo codes
    async fn lock_promo_code(&mut self, code: &str) -> StoreResult<Option<PromoCode>>;
    async fn has_promo_usage(&mut self, promo_code_id: Uuid, user_id: Uuid) -> StoreResult<bool>;
    async fn insert_promo_usage(
        &mut self,
        promo_code_id: Uuid,
        user_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<PromoCodeUsage>;
    /// `None` when the usage cap is already reached
    async fn increment_promo_usage(&mut self, promo_code_id: Uuid) -> StoreResult<Option<PromoCode>>;

    // Payments
    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Option<Payment>>;
    async fn update_payment_status(
        &mut self,
        id: Uuid,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
