use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use rust_decimal::Decimal;
use thiserror::Error;
use vpnshop_database::StoreError;

use crate::provisioning::ProvisioningError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user not found")]
    UserNotFound,

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: Decimal, required: Decimal },

    #[error("trial already used")]
    TrialAlreadyUsed,

    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition { entity: &'static str, from: String, to: String },

    #[error("promo code not found")]
    CodeNotFound,

    #[error("promo code expired, inactive or exhausted")]
    CodeExpiredOrInactive,

    #[error("promo code already redeemed by this user")]
    AlreadyRedeemed,

    #[error("provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("gave up after repeated transaction conflicts")]
    ConcurrencyConflict,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("payment not found")]
    PaymentNotFound,

    #[error("user is blocked")]
    UserBlocked,

    #[error("feature disabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("payment method disabled: {0}")]
    PaymentMethodDisabled(String),

    #[error("forbidden")]
    Forbidden,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("database error: {0}")]
    DatabaseError(#[from] StoreError),
}

impl ServiceError {
    /// Machine-readable kind, stable across releases
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::UserNotFound => "user_not_found",
            ServiceError::InvalidAmount(_) => "invalid_amount",
            ServiceError::InsufficientBalance { .. } => "insufficient_balance",
            ServiceError::TrialAlreadyUsed => "trial_already_used",
            ServiceError::InvalidTransition { .. } => "invalid_transition",
            ServiceError::CodeNotFound => "code_not_found",
            ServiceError::CodeExpiredOrInactive => "code_expired_or_inactive",
            ServiceError::AlreadyRedeemed => "already_redeemed",
            ServiceError::ProvisioningFailed(_) => "provisioning_failed",
            ServiceError::ConcurrencyConflict => "concurrency_conflict",
            ServiceError::SubscriptionNotFound => "subscription_not_found",
            ServiceError::PaymentNotFound => "payment_not_found",
            ServiceError::UserBlocked => "user_blocked",
            ServiceError::FeatureDisabled(_) => "feature_disabled",
            ServiceError::PaymentMethodDisabled(_) => "payment_method_disabled",
            ServiceError::Forbidden => "forbidden",
            ServiceError::ValidationError(_) => "validation_error",
            ServiceError::DatabaseError(_) => "database_error",
        }
    }

    /// Text shown to the end user by the bot front-end
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::UserNotFound => "We could not find your account. Send /start to register.".to_string(),
            ServiceError::InvalidAmount(_) => "The amount must be greater than zero.".to_string(),
            ServiceError::InsufficientBalance { balance, required } => format!(
                "Not enough funds: the price is {:.2}, your balance is {:.2}. Top up at least {:.2} to continue.",
                required,
                balance,
                (*required - *balance).max(Decimal::ZERO)
            ),
            ServiceError::TrialAlreadyUsed => {
                "The free trial is available once per account and you have already used it.".to_string()
            }
            ServiceError::InvalidTransition { entity: "payment", .. } => {
                "This payment has already been processed and cannot change its status.".to_string()
            }
            ServiceError::InvalidTransition { .. } => {
                "This subscription is no longer active, so it cannot be changed.".to_string()
            }
            ServiceError::CodeNotFound => "There is no promo code with that name.".to_string(),
            ServiceError::CodeExpiredOrInactive => {
                "This promo code has expired, is not active yet or has run out of uses.".to_string()
            }
            ServiceError::AlreadyRedeemed => "You have already used this promo code.".to_string(),
            ServiceError::ProvisioningFailed(_) => {
                "The VPN server did not respond. Nothing was charged, please try again later.".to_string()
            }
            ServiceError::ConcurrencyConflict => {
                "Too many simultaneous requests for your account. Please repeat the action.".to_string()
            }
            ServiceError::SubscriptionNotFound => "Subscription not found.".to_string(),
            ServiceError::PaymentNotFound => "Payment not found.".to_string(),
            ServiceError::UserBlocked => "Your account is blocked. Contact support.".to_string(),
            ServiceError::FeatureDisabled(feature) => format!("{} is currently unavailable.", feature),
            ServiceError::PaymentMethodDisabled(method) => {
                format!("Payments via {} are currently unavailable.", method)
            }
            ServiceError::Forbidden => "This action requires administrator rights.".to_string(),
            ServiceError::ValidationError(msg) => msg.clone(),
            ServiceError::DatabaseError(_) => "Something went wrong on our side. Please try again later.".to_string(),
        }
    }

    pub(crate) fn provisioning(err: ProvisioningError) -> Self {
        ServiceError::ProvisioningFailed(err.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UserNotFound
            | ServiceError::CodeNotFound
            | ServiceError::SubscriptionNotFound
            | ServiceError::PaymentNotFound => StatusCode::NOT_FOUND,
            ServiceError::InvalidAmount(_) | ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            ServiceError::TrialAlreadyUsed
            | ServiceError::InvalidTransition { .. }
            | ServiceError::AlreadyRedeemed
            | ServiceError::ConcurrencyConflict => StatusCode::CONFLICT,
            ServiceError::CodeExpiredOrInactive => StatusCode::GONE,
            ServiceError::ProvisioningFailed(_) => StatusCode::BAD_GATEWAY,
            ServiceError::UserBlocked | ServiceError::Forbidden => StatusCode::FORBIDDEN,
            ServiceError::FeatureDisabled(_) | ServiceError::PaymentMethodDisabled(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ServiceError::DatabaseError(err) = self {
            tracing::error!(error = %err, "Request failed with a store error");
        }

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.kind(),
            "message": self.user_message()
        }))
    }
}
