use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{NewUser, User};

macro_rules! user_columns {
    () => {
        "id, telegram_id, username, first_name, last_name, language_code, balance, \
         pending_discount_percent, referral_code, referred_by, is_blocked, is_admin, \
         created_at, updated_at"
    };
}

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ", user_columns!(), " FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    /// Row lock held until the surrounding transaction ends
    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ", user_columns!(), " FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    pub async fn find_by_telegram_id<'e, E: PgExecutor<'e>>(
        executor: E,
        telegram_id: i64,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ", user_columns!(), " FROM users WHERE telegram_id = $1 AND deleted_at IS NULL"
        ))
        .bind(telegram_id)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    pub async fn find_by_referral_code<'e, E: PgExecutor<'e>>(
        executor: E,
        referral_code: &str,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ", user_columns!(), " FROM users WHERE referral_code = $1 AND deleted_at IS NULL"
        ))
        .bind(referral_code)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    /// Insert-or-refresh keyed by telegram id. Balance, referral data and the
    /// referral code of an existing row are never touched.
    pub async fn upsert<'e, E: PgExecutor<'e>>(executor: E, input: &NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(concat!(
            r#"
            INSERT INTO users (id, telegram_id, username, first_name, last_name, language_code,
                               referral_code, is_admin)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'ru'), $7, $8)
            ON CONFLICT (telegram_id) DO UPDATE
            SET username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                language_code = COALESCE($6, users.language_code),
                is_admin = users.is_admin OR EXCLUDED.is_admin,
                updated_at = NOW()
            RETURNING "#,
            user_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(input.telegram_id)
        .bind(&input.profile.username)
        .bind(&input.profile.first_name)
        .bind(&input.profile.last_name)
        .bind(&input.profile.language_code)
        .bind(&input.referral_code)
        .bind(input.is_admin)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    pub async fn update_balance<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        balance: Decimal,
    ) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET balance = $1, updated_at = $2 WHERE id = $3 RETURNING ",
            user_columns!()
        ))
        .bind(balance)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    pub async fn set_pending_discount<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        percent: Option<Decimal>,
    ) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET pending_discount_percent = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            user_columns!()
        ))
        .bind(percent)
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    /// Returns false when the user already has a referrer
    pub async fn set_referred_by<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        referrer_id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET referred_by = $1, updated_at = NOW()
            WHERE id = $2 AND referred_by IS NULL AND id <> $1
            "#,
        )
        .bind(referrer_id)
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_blocked<'e, E: PgExecutor<'e>>(executor: E, id: Uuid, blocked: bool) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(concat!(
            "UPDATE users SET is_blocked = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            user_columns!()
        ))
        .bind(blocked)
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    pub async fn list_referrals<'e, E: PgExecutor<'e>>(executor: E, referrer_id: Uuid) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(concat!(
            "SELECT ", user_columns!(),
            " FROM users WHERE referred_by = $1 AND deleted_at IS NULL ORDER BY created_at DESC"
        ))
        .bind(referrer_id)
        .fetch_all(executor)
        .await?;

        Ok(users)
    }
}
