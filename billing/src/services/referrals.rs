use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;
use vpnshop_config::feature_toggles::REFERRAL;
use vpnshop_config::AppConfig;
use vpnshop_database::models::User;
use vpnshop_database::utils::normalize_code;
use vpnshop_database::LedgerStore;
use vpnshop_observability::{log_balance_changed, log_feature, log_referral_linked, log_rule};

use crate::errors::ServiceError;
use crate::services::ledger::credit_in;
use crate::services::retry::with_conflict_retry;
use crate::SERVICE_NAME;

struct Linked {
    referrer: User,
    bonus: Decimal,
}

#[derive(Clone)]
pub struct ReferralService {
    store: Arc<dyn LedgerStore>,
    config: Arc<AppConfig>,
}

impl ReferralService {
    pub fn new(store: Arc<dyn LedgerStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    /// Links `user_id` to the owner of `referral_code` and pays the referrer.
    ///
    /// Unknown codes, self-referral and users that already have a referrer are
    /// not errors: nothing happens and `Ok(false)` is returned. Duplicate
    /// start payloads therefore credit the referrer only once.
    pub async fn link_referral(&self, user_id: Uuid, referral_code: &str) -> Result<bool, ServiceError> {
        let enabled = self.config.feature_toggles.current().referral_enabled();
        log_feature!(REFERRAL, enabled);
        if !enabled {
            return Ok(false);
        }

        let code = normalize_code(referral_code);
        if code.is_empty() {
            return Ok(false);
        }
        let code = code.as_str();

        let linked = with_conflict_retry("link_referral", self.config.maintenance.max_conflict_retries, move || {
            self.link_once(user_id, code)
        })
        .await?;

        match linked {
            Some(Linked { referrer, bonus }) => {
                log_referral_linked(SERVICE_NAME, user_id, referrer.id, bonus);
                if bonus > Decimal::ZERO {
                    log_balance_changed(SERVICE_NAME, "balance_credited", referrer.id, bonus, referrer.balance, "referral bonus");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn link_once(&self, user_id: Uuid, code: &str) -> Result<Option<Linked>, ServiceError> {
        let mut tx = self.store.begin().await?;

        let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
        if user.referred_by.is_some() {
            log_rule!("referrer_set_once", fail, "referrer already recorded");
            return Ok(None);
        }

        let Some(referrer) = tx.find_user_by_referral_code(code).await? else {
            log_rule!("referral_code_known", fail, format!("no user owns {}", code));
            return Ok(None);
        };
        if referrer.id == user_id {
            log_rule!("no_self_referral", fail, "user presented own code");
            return Ok(None);
        }

        if !tx.set_referred_by(user_id, referrer.id).await? {
            return Ok(None);
        }

        let bonus = self.config.referral.referrer_bonus;
        let referrer = if bonus > Decimal::ZERO {
            credit_in(tx.as_mut(), referrer.id, bonus).await?
        } else {
            referrer
        };
        tx.commit().await?;

        Ok(Some(Linked { referrer, bonus }))
    }
}
