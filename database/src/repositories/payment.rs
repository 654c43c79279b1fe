use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{NewPayment, Payment, PaymentStatus};

macro_rules! payment_columns {
    () => {
        "id, user_id, amount, currency, method, status, external_id, description, \
         created_at, updated_at, completed_at"
    };
}

pub struct PaymentRepository;

impl PaymentRepository {
    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, input: &NewPayment) -> StoreResult<Payment> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            r#"
            INSERT INTO payments (id, user_id, amount, currency, method, status, external_id, description)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING "#,
            payment_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.method)
        .bind(&input.external_id)
        .bind(&input.description)
        .fetch_one(executor)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ", payment_columns!(), " FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }

    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ", payment_columns!(), " FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_external_id<'e, E: PgExecutor<'e>>(
        executor: E,
        external_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ", payment_columns!(), " FROM payments WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }

    pub async fn update_status<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Payment> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            "UPDATE payments SET status = $1, completed_at = $2, updated_at = NOW() WHERE id = $3 RETURNING ",
            payment_columns!()
        ))
        .bind(status)
        .bind(completed_at)
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(payment)
    }

    /// Only fills an empty correlation id
    pub async fn attach_external_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        external_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>(concat!(
            "UPDATE payments SET external_id = $1, updated_at = NOW() WHERE id = $2 AND external_id IS NULL RETURNING ",
            payment_columns!()
        ))
        .bind(external_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }

    pub async fn list_by_user<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> StoreResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ", payment_columns!(), " FROM payments WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(executor)
        .await?;

        Ok(payments)
    }
}
