use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;
use vpnshop_database::models::User;
use vpnshop_database::{LedgerStore, LedgerTx};
use vpnshop_observability::{log_balance_changed, log_rule};

use crate::errors::ServiceError;
use crate::services::retry::with_conflict_retry;
use crate::SERVICE_NAME;

fn ensure_positive(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::InvalidAmount(amount));
    }
    Ok(())
}

/// Adds `amount` to the locked balance of `user_id` inside `tx`.
pub(crate) async fn credit_in(tx: &mut dyn LedgerTx, user_id: Uuid, amount: Decimal) -> Result<User, ServiceError> {
    ensure_positive(amount)?;
    let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
    Ok(tx.update_balance(user_id, user.balance + amount).await?)
}

/// Takes `amount` from the locked balance of `user_id` inside `tx`; all or nothing.
pub(crate) async fn debit_in(tx: &mut dyn LedgerTx, user_id: Uuid, amount: Decimal) -> Result<User, ServiceError> {
    ensure_positive(amount)?;
    let user = tx.lock_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;

    if user.balance < amount {
        log_rule!("balance_covers_amount", fail, format!("short by {}", amount - user.balance));
        return Err(ServiceError::InsufficientBalance {
            balance: user.balance,
            required: amount,
        });
    }

    Ok(tx.update_balance(user_id, user.balance - amount).await?)
}

/// Per-user prepaid balance. Every mutation re-reads the row under lock in its
/// own transaction.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    max_retries: u32,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    pub async fn credit(&self, user_id: Uuid, amount: Decimal, reason: &str) -> Result<User, ServiceError> {
        let user = with_conflict_retry("ledger_credit", self.max_retries, move || {
            self.credit_once(user_id, amount)
        })
        .await?;

        log_balance_changed(SERVICE_NAME, "balance_credited", user_id, amount, user.balance, reason);
        Ok(user)
    }

    pub async fn debit(&self, user_id: Uuid, amount: Decimal, reason: &str) -> Result<User, ServiceError> {
        let user = with_conflict_retry("ledger_debit", self.max_retries, move || {
            self.debit_once(user_id, amount)
        })
        .await?;

        log_balance_changed(SERVICE_NAME, "balance_debited", user_id, amount, user.balance, reason);
        Ok(user)
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal, ServiceError> {
        let user = self.store.find_user(user_id).await?.ok_or(ServiceError::UserNotFound)?;
        Ok(user.balance)
    }

    async fn credit_once(&self, user_id: Uuid, amount: Decimal) -> Result<User, ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = credit_in(tx.as_mut(), user_id, amount).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn debit_once(&self, user_id: Uuid, amount: Decimal) -> Result<User, ServiceError> {
        let mut tx = self.store.begin().await?;
        let user = debit_in(tx.as_mut(), user_id, amount).await?;
        tx.commit().await?;
        Ok(user)
    }
}
