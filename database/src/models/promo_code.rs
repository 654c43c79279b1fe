use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "promo_code_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromoCodeType {
    BonusDays,
    DiscountPercent,
    DiscountAmount,
}

impl std::fmt::Display for PromoCodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BonusDays => write!(f, "bonus_days"),
            Self::DiscountPercent => write!(f, "discount_percent"),
            Self::DiscountAmount => write!(f, "discount_amount"),
        }
    }
}

impl std::str::FromStr for PromoCodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bonus_days" => Ok(Self::BonusDays),
            "discount_percent" => Ok(Self::DiscountPercent),
            "discount_amount" => Ok(Self::DiscountAmount),
            other => Err(format!("unknown promo code type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub promo_type: PromoCodeType,
    pub value: Decimal,
    pub max_uses: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub description: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromoCode {
    /// Active, inside `[valid_from, valid_until)` and under the usage cap.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if now < self.valid_from {
            return false;
        }
        if let Some(until) = self.valid_until {
            if now >= until {
                return false;
            }
        }
        !self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses > 0 && self.used_count >= self.max_uses
    }

    pub fn remaining_uses(&self) -> Option<i32> {
        if self.max_uses == 0 {
            None
        } else {
            Some((self.max_uses - self.used_count).max(0))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromoCodeUsage {
    pub id: Uuid,
    pub promo_code_id: Uuid,
    pub user_id: Uuid,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPromoCode {
    pub code: String,
    pub promo_type: PromoCodeType,
    pub value: Decimal,
    pub max_uses: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub description: String,
    pub created_by: Option<Uuid>,
}
