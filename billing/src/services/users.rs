use std::sync::Arc;

use uuid::Uuid;
use vpnshop_config::AppConfig;
use vpnshop_database::models::{NewUser, User, UserProfile};
use vpnshop_database::utils::generate_referral_code;
use vpnshop_database::{constraints, LedgerStore};
use vpnshop_observability::log_security;

use crate::errors::ServiceError;

const REFERRAL_CODE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn LedgerStore>,
    config: Arc<AppConfig>,
}

impl UserService {
    pub fn new(store: Arc<dyn LedgerStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Idempotent on `telegram_id`. Profile fields are refreshed on every
    /// call; the referral code is generated only for a new account.
    pub async fn get_or_create_user(&self, telegram_id: i64, profile: &UserProfile) -> Result<User, ServiceError> {
        let is_admin = self.config.admin.is_admin(telegram_id);

        for attempt in 1..=REFERRAL_CODE_ATTEMPTS {
            let input = NewUser {
                telegram_id,
                profile: profile.clone(),
                referral_code: generate_referral_code(),
                is_admin,
            };

            match self.store.upsert_user(&input).await {
                Ok(user) => return Ok(user),
                Err(e) if e.is_unique_violation_of(constraints::REFERRAL_CODE) => {
                    tracing::debug!(telegram_id, attempt, "Referral code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::ValidationError("could not allocate a referral code".to_string()))
    }

    pub async fn find_by_telegram_id(&self, telegram_id: i64) -> Result<User, ServiceError> {
        self.store
            .find_user_by_telegram_id(telegram_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.store.find_user(user_id).await?.ok_or(ServiceError::UserNotFound)
    }

    pub fn is_admin(&self, telegram_id: i64) -> bool {
        self.config.admin.is_admin(telegram_id)
    }

    pub async fn block_user(&self, telegram_id: i64) -> Result<User, ServiceError> {
        self.set_blocked(telegram_id, true).await
    }

    pub async fn unblock_user(&self, telegram_id: i64) -> Result<User, ServiceError> {
        self.set_blocked(telegram_id, false).await
    }

    async fn set_blocked(&self, telegram_id: i64, blocked: bool) -> Result<User, ServiceError> {
        let user = self.find_by_telegram_id(telegram_id).await?;
        if user.is_admin && blocked {
            log_security!("block_admin_refused", telegram_id = telegram_id);
            return Err(ServiceError::Forbidden);
        }

        let user = self.store.set_user_blocked(user.id, blocked).await?;
        tracing::info!(user_id = %user.id, telegram_id, blocked, "User block flag changed");
        Ok(user)
    }

    pub async fn list_referrals(&self, user_id: Uuid) -> Result<Vec<User>, ServiceError> {
        Ok(self.store.list_referrals(user_id).await?)
    }
}
