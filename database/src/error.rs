use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a [`crate::LedgerStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// Deadlock or serialization failure; the whole transaction may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn not_found(entity: &'static str) -> Self {
        StoreError::NotFound { entity }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return StoreError::NotFound { entity: "row" };
        }

        let classified = match &err {
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or_default().to_string();
                match db_err.code().as_deref() {
                    Some("40001") | Some("40P01") => Some(StoreError::Conflict(db_err.message().to_string())),
                    Some("23505") => Some(StoreError::UniqueViolation { constraint }),
                    Some("23514") => Some(StoreError::CheckViolation { constraint }),
                    _ => None,
                }
            }
            _ => None,
        };

        classified.unwrap_or(StoreError::Database(err))
    }
}

/// Constraint names shared by both store implementations
pub mod constraints {
    pub const ONE_TRIAL_PER_USER: &str = "uq_subscriptions_one_trial_per_user";
    pub const REMOTE_ID: &str = "subscriptions_remote_id_key";
    pub const PROMO_USAGE_PER_USER: &str = "uq_promo_code_usages_code_user";
    pub const PROMO_CODE: &str = "promo_codes_code_key";
    pub const REFERRAL_CODE: &str = "users_referral_code_key";
    pub const PAYMENT_EXTERNAL_ID: &str = "payments_external_id_key";
    pub const NON_NEGATIVE_BALANCE: &str = "users_balance_check";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_unique_violation_matching() {
        let err = StoreError::UniqueViolation {
            constraint: constraints::ONE_TRIAL_PER_USER.to_string(),
        };
        assert!(err.is_unique_violation_of(constraints::ONE_TRIAL_PER_USER));
        assert!(!err.is_unique_violation_of(constraints::PROMO_CODE));
    }
}
