use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Suspended,
}

impl SubscriptionStatus {
    /// Only `active` has outgoing edges; nothing leads back to it.
    pub fn can_transition_to(self, next: SubscriptionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Expired) | (Self::Active, Self::Cancelled) | (Self::Active, Self::Suspended)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Paid,
    Trial,
    Bonus,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: SubscriptionKind,
    pub server_id: i32,
    pub server_name: String,
    pub plan_id: i32,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub price: Decimal,
    pub traffic_limit_gb: Option<i32>,
    pub traffic_strategy: Option<String>,
    pub remote_id: Option<String>,
    pub deprovision_pending: bool,
    pub expires_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_trial(&self) -> bool {
        self.kind == SubscriptionKind::Trial
    }

    /// Active status alone is not enough: the expiry sweep may not have run yet.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.expires_at > now
    }

    pub fn days_left_at(&self, now: DateTime<Utc>) -> i64 {
        if self.expires_at <= now {
            return 0;
        }
        (self.expires_at - now).num_days()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub kind: SubscriptionKind,
    pub server_id: i32,
    pub server_name: String,
    pub plan_id: i32,
    pub plan_name: String,
    pub price: Decimal,
    pub traffic_limit_gb: Option<i32>,
    pub traffic_strategy: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use SubscriptionStatus::*;

        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Suspended));

        for from in [Expired, Cancelled, Suspended] {
            for to in [Active, Expired, Cancelled, Suspended] {
                assert!(!from.can_transition_to(to), "{} -> {} must be rejected", from, to);
            }
            assert!(from.is_terminal());
        }
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn test_live_and_days_left() {
        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: SubscriptionKind::Trial,
            server_id: 1,
            server_name: "nl-1".to_string(),
            plan_id: 1,
            plan_name: "Trial".to_string(),
            status: SubscriptionStatus::Active,
            price: Decimal::ZERO,
            traffic_limit_gb: None,
            traffic_strategy: None,
            remote_id: None,
            deprovision_pending: false,
            expires_at: now + Duration::days(3) + Duration::hours(1),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        assert!(sub.is_trial());
        assert!(sub.is_live_at(now));
        assert_eq!(sub.days_left_at(now), 3);
        assert!(!sub.is_live_at(now + Duration::days(4)));
        assert_eq!(sub.days_left_at(now + Duration::days(4)), 0);
    }
}
