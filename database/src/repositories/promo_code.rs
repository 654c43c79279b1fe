use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{NewPromoCode, Pagination, PromoCode, PromoCodeUsage};

macro_rules! promo_code_columns {
    () => {
        "id, code, type, value, max_uses, used_count, is_active, valid_from, valid_until, \
         description, created_by, created_at, updated_at"
    };
}

pub struct PromoCodeRepository;

impl PromoCodeRepository {
    pub async fn find_by_code<'e, E: PgExecutor<'e>>(executor: E, code: &str) -> StoreResult<Option<PromoCode>> {
        let promo = sqlx::query_as::<_, PromoCode>(concat!(
            "SELECT ", promo_code_columns!(), " FROM promo_codes WHERE code = $1 AND deleted_at IS NULL"
        ))
        .bind(code)
        .fetch_optional(executor)
        .await?;

        Ok(promo)
    }

    pub async fn lock_by_code<'e, E: PgExecutor<'e>>(executor: E, code: &str) -> StoreResult<Option<PromoCode>> {
        let promo = sqlx::query_as::<_, PromoCode>(concat!(
            "SELECT ", promo_code_columns!(),
            " FROM promo_codes WHERE code = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(executor)
        .await?;

        Ok(promo)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, input: &NewPromoCode) -> StoreResult<PromoCode> {
        let promo = sqlx::query_as::<_, PromoCode>(concat!(
            r#"
            INSERT INTO promo_codes (id, code, type, value, max_uses, valid_from, valid_until,
                                     description, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING "#,
            promo_code_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(&input.code)
        .bind(input.promo_type)
        .bind(input.value)
        .bind(input.max_uses)
        .bind(input.valid_from)
        .bind(input.valid_until)
        .bind(&input.description)
        .bind(input.created_by)
        .fetch_one(executor)
        .await?;

        Ok(promo)
    }

    /// Bumps `used_count` only while a slot is left. `None` means the cap
    /// was reached by someone else first.
    pub async fn increment_usage<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<PromoCode>> {
        let promo = sqlx::query_as::<_, PromoCode>(concat!(
            r#"
            UPDATE promo_codes
            SET used_count = used_count + 1, updated_at = NOW()
            WHERE id = $1 AND (max_uses = 0 OR used_count < max_uses)
            RETURNING "#,
            promo_code_columns!()
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(promo)
    }

    pub async fn has_usage<'e, E: PgExecutor<'e>>(executor: E, promo_code_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM promo_code_usages WHERE promo_code_id = $1 AND user_id = $2)",
        )
        .bind(promo_code_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    pub async fn insert_usage<'e, E: PgExecutor<'e>>(
        executor: E,
        promo_code_id: Uuid,
        user_id: Uuid,
        used_at: DateTime<Utc>,
    ) -> StoreResult<PromoCodeUsage> {
        let usage = sqlx::query_as::<_, PromoCodeUsage>(
            r#"
            INSERT INTO promo_code_usages (id, promo_code_id, user_id, used_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, promo_code_id, user_id, used_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(promo_code_id)
        .bind(user_id)
        .bind(used_at)
        .fetch_one(executor)
        .await?;

        Ok(usage)
    }

    pub async fn count_usages<'e, E: PgExecutor<'e>>(executor: E, promo_code_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM promo_code_usages WHERE promo_code_id = $1")
            .bind(promo_code_id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }

    pub async fn count<'e, E: PgExecutor<'e>>(executor: E) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM promo_codes WHERE deleted_at IS NULL")
            .fetch_one(executor)
            .await?;

        Ok(count)
    }

    pub async fn list<'e, E: PgExecutor<'e>>(executor: E, pagination: &Pagination) -> StoreResult<Vec<PromoCode>> {
        let promos = sqlx::query_as::<_, PromoCode>(concat!(
            "SELECT ", promo_code_columns!(),
            " FROM promo_codes WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(pagination.limit)
        .bind(pagination.offset)
        .fetch_all(executor)
        .await?;

        Ok(promos)
    }

    pub async fn list_redeemable<'e, E: PgExecutor<'e>>(executor: E, now: DateTime<Utc>) -> StoreResult<Vec<PromoCode>> {
        let promos = sqlx::query_as::<_, PromoCode>(concat!(
            "SELECT ", promo_code_columns!(),
            r#" FROM promo_codes
            WHERE deleted_at IS NULL
              AND is_active
              AND valid_from <= $1
              AND (valid_until IS NULL OR valid_until > $1)
              AND (max_uses = 0 OR used_count < max_uses)
            ORDER BY created_at DESC"#
        ))
        .bind(now)
        .fetch_all(executor)
        .await?;

        Ok(promos)
    }

    pub async fn deactivate<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<PromoCode>> {
        let promo = sqlx::query_as::<_, PromoCode>(concat!(
            r#"
            UPDATE promo_codes
            SET is_active = FALSE, deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING "#,
            promo_code_columns!()
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(promo)
    }
}
