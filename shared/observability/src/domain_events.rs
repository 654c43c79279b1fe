//! Structured events for every committed change to money, subscriptions,
//! promo codes, referrals and payments.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    Success,
    Failure,
    Skipped,
}

impl std::fmt::Display for OperationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Ledger,
    Subscription,
    Promo,
    Referral,
    Payment,
    Provisioning,
    System,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ledger => write!(f, "ledger"),
            Self::Subscription => write!(f, "subscription"),
            Self::Promo => write!(f, "promo"),
            Self::Referral => write!(f, "referral"),
            Self::Payment => write!(f, "payment"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// e.g. "balance_debited", "trial_created"
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub result: OperationResult,
    pub duration_ms: Option<u64>,
    pub attempt: Option<u32>,
    pub error: Option<String>,
    pub user_id: Option<Uuid>,
    pub service: String,
    pub metadata: Option<serde_json::Value>,
}

impl DomainEvent {
    pub fn new(service: impl Into<String>, category: EventCategory, event_type: impl Into<String>) -> DomainEventBuilder {
        DomainEventBuilder {
            service: service.into(),
            category,
            event_type: event_type.into(),
            entity_type: None,
            entity_id: None,
            result: OperationResult::Success,
            duration_ms: None,
            attempt: None,
            error: None,
            user_id: None,
            metadata: None,
        }
    }
}

pub struct DomainEventBuilder {
    service: String,
    category: EventCategory,
    event_type: String,
    entity_type: Option<String>,
    entity_id: Option<String>,
    result: OperationResult,
    duration_ms: Option<u64>,
    attempt: Option<u32>,
    error: Option<String>,
    user_id: Option<Uuid>,
    metadata: Option<serde_json::Value>,
}

impl DomainEventBuilder {
    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn success(mut self) -> Self {
        self.result = OperationResult::Success;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.result = OperationResult::Skipped;
        self
    }

    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.result = OperationResult::Failure;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build and emit the event as a log line
    pub fn emit(self) {
        let event = self.build();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

        match event.result {
            OperationResult::Success => tracing::info!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "success",
                "DomainEvent: {}", json
            ),
            OperationResult::Failure => tracing::error!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "failure",
                error = ?event.error,
                "DomainEvent: {}", json
            ),
            OperationResult::Skipped => tracing::debug!(
                target: "domain_event",
                category = %event.category,
                event_type = %event.event_type,
                result = "skipped",
                "DomainEvent: {}", json
            ),
        }
    }

    pub fn build(self) -> DomainEvent {
        DomainEvent {
            timestamp: Utc::now(),
            category: self.category,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            result: self.result,
            duration_ms: self.duration_ms,
            attempt: self.attempt,
            error: self.error,
            user_id: self.user_id,
            service: self.service,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// Convenience functions for common domain events
// ============================================================================

/// `event_type` is "balance_credited" or "balance_debited"
pub fn log_balance_changed(
    service: &str,
    event_type: &str,
    user_id: Uuid,
    amount: Decimal,
    balance_after: Decimal,
    reason: &str,
) {
    DomainEvent::new(service, EventCategory::Ledger, event_type)
        .entity("user", user_id.to_string())
        .user(user_id)
        .metadata(serde_json::json!({
            "amount": amount,
            "balance_after": balance_after,
            "reason": reason,
        }))
        .success()
        .emit();
}

pub fn log_subscription_event(service: &str, event_type: &str, subscription_id: Uuid, user_id: Uuid, detail: serde_json::Value) {
    DomainEvent::new(service, EventCategory::Subscription, event_type)
        .entity("subscription", subscription_id.to_string())
        .user(user_id)
        .metadata(detail)
        .success()
        .emit();
}

pub fn log_promo_redeemed(service: &str, code: &str, promo_type: &str, user_id: Uuid, used_count: i32) {
    DomainEvent::new(service, EventCategory::Promo, "promo_redeemed")
        .entity("promo_code", code)
        .user(user_id)
        .metadata(serde_json::json!({ "type": promo_type, "used_count": used_count }))
        .success()
        .emit();
}

pub fn log_referral_linked(service: &str, user_id: Uuid, referrer_id: Uuid, bonus: Decimal) {
    DomainEvent::new(service, EventCategory::Referral, "referral_linked")
        .entity("user", user_id.to_string())
        .user(user_id)
        .metadata(serde_json::json!({ "referrer_id": referrer_id, "bonus": bonus }))
        .success()
        .emit();
}

pub fn log_payment_transition(service: &str, payment_id: Uuid, user_id: Uuid, status: &str, amount: Decimal) {
    DomainEvent::new(service, EventCategory::Payment, format!("payment_{}", status))
        .entity("payment", payment_id.to_string())
        .user(user_id)
        .metadata(serde_json::json!({ "amount": amount }))
        .success()
        .emit();
}

pub fn log_provisioning_call(service: &str, operation: &str, duration_ms: u64, error: Option<&str>) {
    let builder = DomainEvent::new(service, EventCategory::Provisioning, operation).duration_ms(duration_ms);

    match error {
        Some(err) => builder.failure(err),
        None => builder.success(),
    }
    .emit();
}
