use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vpnshop_config::feature_toggles::PROMO_CODES;
use vpnshop_config::AppConfig;
use vpnshop_database::models::{
    NewPromoCode, NewSubscription, PaginatedResult, Pagination, PromoCode, PromoCodeType, Subscription, SubscriptionKind,
    User,
};
use vpnshop_database::utils::{generate_code, normalize_code};
use vpnshop_database::{constraints, LedgerStore, LedgerTx};
use vpnshop_observability::{log_balance_changed, log_feature, log_promo_redeemed, log_rule, log_subscription_event};

use crate::errors::ServiceError;
use crate::provisioning::{CreateRemoteSubscription, ProvisioningGateway};
use crate::services::ledger::credit_in;
use crate::services::retry::with_conflict_retry;
use crate::services::subscriptions::{commit_provisioned, days_after};
use crate::SERVICE_NAME;

const GENERATED_CODE_LENGTH: usize = 8;
const GENERATE_ATTEMPTS: usize = 5;
/// Upper bound for a `bonus_days` code, ten years
pub const MAX_BONUS_DAYS: i64 = 3650;

/// What a redemption did besides consuming the code
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum RedemptionEffect {
    BalanceCredited { amount: Decimal, balance_after: Decimal },
    DiscountPending { percent: Decimal },
    SubscriptionExtended { subscription: Subscription, days: i64 },
    SubscriptionCreated { subscription: Subscription, days: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub promo_code: PromoCode,
    #[serde(flatten)]
    pub effect: RedemptionEffect,
}

/// Admin input for a new code. `code` is optional for generated codes.
#[derive(Debug, Clone, Deserialize)]
pub struct PromoCodeDraft {
    pub code: Option<String>,
    pub promo_type: PromoCodeType,
    pub value: Decimal,
    #[serde(default)]
    pub max_uses: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
}

fn bonus_days(promo: &PromoCode) -> Result<i64, ServiceError> {
    promo
        .value
        .trunc()
        .to_i64()
        .filter(|days| *days > 0)
        .ok_or_else(|| ServiceError::ValidationError(format!("promo code {} has no usable day count", promo.code)))
}

#[derive(Clone)]
pub struct PromoCodeService {
    store: Arc<dyn LedgerStore>,
    gateway: ProvisioningGateway,
    config: Arc<AppConfig>,
}

impl PromoCodeService {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: ProvisioningGateway, config: Arc<AppConfig>) -> Self {
        Self { store, gateway, config }
    }

    /// Consumes `code` for `user_id` and applies its effect, all in one
    /// transaction. Codes are matched case-insensitively.
    pub async fn redeem(&self, user_id: Uuid, code: &str) -> Result<Redemption, ServiceError> {
        let enabled = self.config.feature_toggles.current().promo_codes_enabled();
        log_feature!(PROMO_CODES, enabled);
        if !enabled {
            return Err(ServiceError::FeatureDisabled(PROMO_CODES));
        }

        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::CodeNotFound);
        }
        let code = code.as_str();

        let redemption = with_conflict_retry("redeem_promo_code", self.config.maintenance.max_conflict_retries, move || {
            self.redeem_once(user_id, code)
        })
        .await?;

        let promo = &redemption.promo_code;
        log_promo_redeemed(SERVICE_NAME, &promo.code, &promo.promo_type.to_string(), user_id, promo.used_count);

        match &redemption.effect {
            RedemptionEffect::BalanceCredited { amount, balance_after } => log_balance_changed(
                SERVICE_NAME,
                "balance_credited",
                user_id,
                *amount,
                *balance_after,
                &format!("promo code {}", promo.code),
            ),
            RedemptionEffect::DiscountPending { percent } => {
                tracing::info!(user_id = %user_id, percent = %percent, "Discount stored for next purchase")
            }
            RedemptionEffect::SubscriptionExtended { subscription, days }
            | RedemptionEffect::SubscriptionCreated { subscription, days } => log_subscription_event(
                SERVICE_NAME,
                "bonus_days_granted",
                subscription.id,
                user_id,
                serde_json::json!({ "days": days, "expires_at": subscription.expires_at, "code": promo.code }),
            ),
        }

        Ok(redemption)
    }

    async fn redeem_once(&self, user_id: Uuid, code: &str) -> Result<Redemption, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
        if user.is_blocked {
            return Err(ServiceError::UserBlocked);
        }

        let promo = tx.lock_promo_code(code).await?.ok_or(ServiceError::CodeNotFound)?;
        if !promo.is_redeemable_at(now) {
            log_rule!("promo_code_redeemable", fail, format!("{} is not redeemable", promo.code));
            return Err(ServiceError::CodeExpiredOrInactive);
        }
        if tx.has_promo_usage(promo.id, user_id).await? {
            log_rule!("promo_code_once_per_user", fail, format!("{} already used", promo.code));
            return Err(ServiceError::AlreadyRedeemed);
        }

        tx.insert_promo_usage(promo.id, user_id, now).await.map_err(|e| {
            if e.is_unique_violation_of(constraints::PROMO_USAGE_PER_USER) {
                ServiceError::AlreadyRedeemed
            } else {
                e.into()
            }
        })?;

        let promo = tx
            .increment_promo_usage(promo.id)
            .await?
            .ok_or(ServiceError::CodeExpiredOrInactive)?;

        let effect = match promo.promo_type {
            PromoCodeType::DiscountAmount => {
                let credited = credit_in(tx.as_mut(), user_id, promo.value).await?;
                tx.commit().await?;
                RedemptionEffect::BalanceCredited {
                    amount: promo.value,
                    balance_after: credited.balance,
                }
            }
            PromoCodeType::DiscountPercent => {
                let percent = user
                    .pending_discount_percent
                    .map_or(promo.value, |existing| existing.max(promo.value));
                tx.set_pending_discount(user_id, Some(percent)).await?;
                tx.commit().await?;
                RedemptionEffect::DiscountPending { percent }
            }
            PromoCodeType::BonusDays => self.grant_bonus_days(tx, &user, &promo, now).await?,
        };

        Ok(Redemption { promo_code: promo, effect })
    }

    /// Extends the newest live subscription, or provisions a bonus one when
    /// the user has none. Commits `tx`.
    async fn grant_bonus_days(
        &self,
        mut tx: Box<dyn LedgerTx>,
        user: &User,
        promo: &PromoCode,
        now: DateTime<Utc>,
    ) -> Result<RedemptionEffect, ServiceError> {
        let days = bonus_days(promo)?;

        if let Some(current) = tx.lock_latest_active_subscription(user.id, now).await? {
            let expires_at = days_after(current.expires_at, days)?;
            let subscription = tx.extend_subscription(current.id, expires_at).await?;

            if let Some(handle) = subscription.remote_id.as_deref() {
                self.gateway
                    .extend(handle, expires_at)
                    .await
                    .map_err(ServiceError::provisioning)?;
            }
            tx.commit().await?;

            return Ok(RedemptionEffect::SubscriptionExtended { subscription, days });
        }

        let provisioning = &self.config.provisioning;
        let expires_at = days_after(now, days)?;
        let subscription = tx
            .insert_subscription(&NewSubscription {
                user_id: user.id,
                kind: SubscriptionKind::Bonus,
                server_id: provisioning.bonus_server_id,
                server_name: format!("server-{}", provisioning.bonus_server_id),
                plan_id: provisioning.bonus_plan_id,
                plan_name: format!("Bonus {} days", days),
                price: Decimal::ZERO,
                traffic_limit_gb: None,
                traffic_strategy: None,
                expires_at,
            })
            .await?;

        let remote = self
            .gateway
            .create(&CreateRemoteSubscription {
                user_id: user.telegram_id,
                server_id: provisioning.bonus_server_id,
                plan_id: Some(provisioning.bonus_plan_id),
                expires_at,
                traffic_limit_gb: None,
                traffic_strategy: None,
            })
            .await
            .map_err(ServiceError::provisioning)?;

        let subscription = commit_provisioned(&self.gateway, tx, subscription.id, &remote).await?;
        Ok(RedemptionEffect::SubscriptionCreated { subscription, days })
    }

    fn validate(&self, code: &str, draft: &PromoCodeDraft) -> Result<(), ServiceError> {
        let limits = &self.config.promo_codes;
        let length = code.chars().count();

        if length < limits.min_length || length > limits.max_length {
            return Err(ServiceError::ValidationError(format!(
                "code must be {}-{} characters long",
                limits.min_length, limits.max_length
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(ServiceError::ValidationError(
                "code may contain only letters, digits, '-' and '_'".to_string(),
            ));
        }
        if draft.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError("value must be positive".to_string()));
        }
        match draft.promo_type {
            PromoCodeType::DiscountPercent if draft.value > Decimal::ONE_HUNDRED => {
                return Err(ServiceError::ValidationError("discount cannot exceed 100%".to_string()));
            }
            PromoCodeType::BonusDays if !draft.value.fract().is_zero() => {
                return Err(ServiceError::ValidationError("bonus days must be a whole number".to_string()));
            }
            PromoCodeType::BonusDays if draft.value > Decimal::from(MAX_BONUS_DAYS) => {
                return Err(ServiceError::ValidationError(format!(
                    "bonus days cannot exceed {}",
                    MAX_BONUS_DAYS
                )));
            }
            _ => {}
        }
        if draft.max_uses < 0 {
            return Err(ServiceError::ValidationError("max_uses cannot be negative".to_string()));
        }
        if let (Some(from), Some(until)) = (draft.valid_from, draft.valid_until) {
            if until <= from {
                return Err(ServiceError::ValidationError("valid_until must be after valid_from".to_string()));
            }
        }
        Ok(())
    }

    fn to_new(code: String, draft: &PromoCodeDraft, created_by: Option<Uuid>) -> NewPromoCode {
        NewPromoCode {
            code,
            promo_type: draft.promo_type,
            value: draft.value,
            max_uses: draft.max_uses,
            valid_from: draft.valid_from.unwrap_or_else(Utc::now),
            valid_until: draft.valid_until,
            description: draft.description.clone(),
            created_by,
        }
    }

    pub async fn create_promo_code(&self, draft: &PromoCodeDraft, created_by: Option<Uuid>) -> Result<PromoCode, ServiceError> {
        let code = normalize_code(draft.code.as_deref().unwrap_or_default());
        self.validate(&code, draft)?;

        let promo = self
            .store
            .insert_promo_code(&Self::to_new(code, draft, created_by))
            .await
            .map_err(|e| {
                if e.is_unique_violation_of(constraints::PROMO_CODE) {
                    ServiceError::ValidationError("a promo code with this name already exists".to_string())
                } else {
                    e.into()
                }
            })?;

        tracing::info!(code = %promo.code, promo_type = %promo.promo_type, value = %promo.value, "Promo code created");
        Ok(promo)
    }

    /// Same as [`Self::create_promo_code`] with a random name; `draft.code` is ignored.
    pub async fn generate_promo_code(&self, draft: &PromoCodeDraft, created_by: Option<Uuid>) -> Result<PromoCode, ServiceError> {
        let limits = &self.config.promo_codes;
        let length = GENERATED_CODE_LENGTH.clamp(limits.min_length, limits.max_length);

        for attempt in 1..=GENERATE_ATTEMPTS {
            let code = generate_code(length);
            self.validate(&code, draft)?;

            match self.store.insert_promo_code(&Self::to_new(code, draft, created_by)).await {
                Ok(promo) => {
                    tracing::info!(code = %promo.code, attempt, "Promo code generated");
                    return Ok(promo);
                }
                Err(e) if e.is_unique_violation_of(constraints::PROMO_CODE) => {
                    tracing::debug!(attempt, "Generated promo code collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::ValidationError(
            "could not generate a unique code, try a longer length".to_string(),
        ))
    }

    pub async fn list_promo_codes(&self, pagination: &Pagination) -> Result<PaginatedResult<PromoCode>, ServiceError> {
        Ok(self.store.list_promo_codes(pagination).await?)
    }

    pub async fn list_valid_promo_codes(&self) -> Result<Vec<PromoCode>, ServiceError> {
        Ok(self.store.list_redeemable_promo_codes(Utc::now()).await?)
    }

    pub async fn deactivate_promo_code(&self, id: Uuid) -> Result<PromoCode, ServiceError> {
        let promo = self
            .store
            .deactivate_promo_code(id)
            .await?
            .ok_or(ServiceError::CodeNotFound)?;
        tracing::info!(code = %promo.code, "Promo code deactivated");
        Ok(promo)
    }

    pub async fn usage_count(&self, promo_code_id: Uuid) -> Result<i64, ServiceError> {
        Ok(self.store.count_promo_usages(promo_code_id).await?)
    }
}
