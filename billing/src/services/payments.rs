use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use vpnshop_config::AppConfig;
use vpnshop_database::models::{NewPayment, Payment, PaymentMethod, PaymentStatus};
use vpnshop_database::{constraints, LedgerStore, StoreError};
use vpnshop_observability::{log_balance_changed, log_payment_transition, log_rule};

use crate::errors::ServiceError;
use crate::services::ledger::credit_in;
use crate::services::retry::with_conflict_retry;
use crate::SERVICE_NAME;

const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

struct StatusChange {
    payment: Payment,
    balance_after: Option<Decimal>,
    changed: bool,
}

fn duplicate_external_id(err: StoreError) -> ServiceError {
    if err.is_unique_violation_of(constraints::PAYMENT_EXTERNAL_ID) {
        ServiceError::ValidationError("a payment with this external id already exists".to_string())
    } else {
        err.into()
    }
}

/// Payment records from the external payment sources. Moving a payment to
/// `completed` is the only way such a source credits the ledger.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn LedgerStore>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn LedgerStore>, config: Arc<AppConfig>) -> Self {
        Self { store, config }
    }

    pub async fn create_payment(&self, user_id: Uuid, request: &PaymentRequest) -> Result<Payment, ServiceError> {
        let method = request.method.toggle_name();
        if !self.config.feature_toggles.current().payment_method_enabled(method) {
            log_rule!("payment_method_enabled", fail, method);
            return Err(ServiceError::PaymentMethodDisabled(method.to_string()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(request.amount));
        }
        if self.store.find_user(user_id).await?.is_none() {
            return Err(ServiceError::UserNotFound);
        }

        let payment = self
            .store
            .insert_payment(&NewPayment {
                user_id,
                amount: request.amount.round_dp(2),
                currency: request.currency.clone().unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                method: request.method,
                external_id: request.external_id.clone().filter(|id| !id.is_empty()),
                description: request.description.clone(),
            })
            .await
            .map_err(duplicate_external_id)?;

        log_payment_transition(SERVICE_NAME, payment.id, user_id, "pending", payment.amount);
        Ok(payment)
    }

    /// Moves a pending payment to a terminal status once. Repeating the
    /// status it already has is a no-op, so a retried webhook never credits
    /// twice.
    pub async fn update_payment_status(&self, payment_id: Uuid, status: PaymentStatus) -> Result<Payment, ServiceError> {
        let change = with_conflict_retry("update_payment_status", self.config.maintenance.max_conflict_retries, move || {
            self.update_once(payment_id, status)
        })
        .await?;

        let payment = change.payment;
        if !change.changed {
            tracing::debug!(payment_id = %payment.id, status = %payment.status, "Payment status unchanged");
            return Ok(payment);
        }

        log_payment_transition(SERVICE_NAME, payment.id, payment.user_id, &payment.status.to_string(), payment.amount);
        if let Some(balance_after) = change.balance_after {
            log_balance_changed(
                SERVICE_NAME,
                "balance_credited",
                payment.user_id,
                payment.amount,
                balance_after,
                &format!("{} payment", payment.method.toggle_name()),
            );
        }
        Ok(payment)
    }

    async fn update_once(&self, payment_id: Uuid, status: PaymentStatus) -> Result<StatusChange, ServiceError> {
        let mut tx = self.store.begin().await?;
        let payment = tx.lock_payment(payment_id).await?.ok_or(ServiceError::PaymentNotFound)?;

        if payment.status == status {
            return Ok(StatusChange {
                payment,
                balance_after: None,
                changed: false,
            });
        }
        if payment.status.is_terminal() || !status.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                entity: "payment",
                from: payment.status.to_string(),
                to: status.to_string(),
            });
        }

        let completed = status == PaymentStatus::Completed;
        let updated = tx
            .update_payment_status(payment_id, status, completed.then(Utc::now))
            .await?;

        let balance_after = if completed {
            Some(credit_in(tx.as_mut(), updated.user_id, updated.amount).await?.balance)
        } else {
            None
        };
        tx.commit().await?;

        Ok(StatusChange {
            payment: updated,
            balance_after,
            changed: true,
        })
    }

    /// Payment sources that confirm synchronously (e.g. Telegram Stars):
    /// records the payment and completes it right away.
    pub async fn process_instant_payment(&self, user_id: Uuid, request: &PaymentRequest) -> Result<Payment, ServiceError> {
        let payment = self.create_payment(user_id, request).await?;
        self.update_payment_status(payment.id, PaymentStatus::Completed).await
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, ServiceError> {
        self.store
            .find_payment(payment_id)
            .await?
            .ok_or(ServiceError::PaymentNotFound)
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Payment, ServiceError> {
        self.store
            .find_payment_by_external_id(external_id)
            .await?
            .ok_or(ServiceError::PaymentNotFound)
    }

    /// Records the processor's id on a payment that has none yet.
    pub async fn attach_external_id(&self, payment_id: Uuid, external_id: &str) -> Result<Payment, ServiceError> {
        if external_id.trim().is_empty() {
            return Err(ServiceError::ValidationError("external id cannot be empty".to_string()));
        }

        match self
            .store
            .attach_payment_external_id(payment_id, external_id)
            .await
            .map_err(duplicate_external_id)?
        {
            Some(payment) => Ok(payment),
            None => {
                let existing = self.get_payment(payment_id).await?;
                if existing.external_id.as_deref() == Some(external_id) {
                    return Ok(existing);
                }
                Err(ServiceError::ValidationError(
                    "payment already has a different external id".to_string(),
                ))
            }
        }
    }

    pub async fn list_user_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.store.list_user_payments(user_id).await?)
    }
}
