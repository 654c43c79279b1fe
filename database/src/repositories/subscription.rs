use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{NewSubscription, Subscription, SubscriptionStatus};

macro_rules! subscription_columns {
    () => {
        "id, user_id, kind, server_id, server_name, plan_id, plan_name, status, price, \
         traffic_limit_gb, traffic_strategy, remote_id, deprovision_pending, expires_at, \
         cancelled_at, created_at, updated_at"
    };
}

pub struct SubscriptionRepository;

impl SubscriptionRepository {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(), " FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(subscription)
    }

    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(), " FROM subscriptions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(subscription)
    }

    /// Latest-expiring live subscription of the user, locked
    pub async fn lock_latest_active<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(),
            r#" FROM subscriptions
            WHERE user_id = $1 AND status = 'active' AND expires_at > $2
            ORDER BY expires_at DESC
            LIMIT 1
            FOR UPDATE"#
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(executor)
        .await?;

        Ok(subscription)
    }

    /// Counts every trial row regardless of status
    pub async fn has_trial<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1 AND is_trial)",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(executor: E, input: &NewSubscription) -> StoreResult<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            r#"
            INSERT INTO subscriptions (id, user_id, kind, server_id, server_name, plan_id, plan_name,
                                       status, price, traffic_limit_gb, traffic_strategy, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8, $9, $10, $11)
            RETURNING "#,
            subscription_columns!()
        ))
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(input.kind)
        .bind(input.server_id)
        .bind(&input.server_name)
        .bind(input.plan_id)
        .bind(&input.plan_name)
        .bind(input.price)
        .bind(input.traffic_limit_gb)
        .bind(&input.traffic_strategy)
        .bind(input.expires_at)
        .fetch_one(executor)
        .await?;

        Ok(subscription)
    }

    pub async fn attach_remote_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        remote_id: &str,
    ) -> StoreResult<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            "UPDATE subscriptions SET remote_id = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            subscription_columns!()
        ))
        .bind(remote_id)
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(subscription)
    }

    pub async fn extend<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            "UPDATE subscriptions SET expires_at = $1, updated_at = NOW() WHERE id = $2 AND status = 'active' RETURNING ",
            subscription_columns!()
        ))
        .bind(expires_at)
        .bind(id)
        .fetch_one(executor)
        .await?;

        Ok(subscription)
    }

    /// Moves an active row to a terminal status. Remote cleanup is owed for
    /// every row that was provisioned.
    pub async fn transition<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        status: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(concat!(
            r#"
            UPDATE subscriptions
            SET status = $1,
                cancelled_at = CASE WHEN $1 = 'cancelled'::subscription_status THEN $2 ELSE cancelled_at END,
                deprovision_pending = remote_id IS NOT NULL,
                updated_at = $2
            WHERE id = $3 AND status = 'active'
            RETURNING "#,
            subscription_columns!()
        ))
        .bind(status)
        .bind(now)
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(subscription)
    }

    /// Single statement, so rows already expired are never touched again
    pub async fn expire_due<'e, E: PgExecutor<'e>>(executor: E, now: DateTime<Utc>) -> StoreResult<Vec<Subscription>> {
        let expired = sqlx::query_as::<_, Subscription>(concat!(
            r#"
            UPDATE subscriptions
            SET status = 'expired',
                deprovision_pending = remote_id IS NOT NULL,
                updated_at = $1
            WHERE status = 'active' AND expires_at <= $1
            RETURNING "#,
            subscription_columns!()
        ))
        .bind(now)
        .fetch_all(executor)
        .await?;

        Ok(expired)
    }

    pub async fn list_by_user<'e, E: PgExecutor<'e>>(executor: E, user_id: Uuid) -> StoreResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(),
            " FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(executor)
        .await?;

        Ok(subscriptions)
    }

    pub async fn list_active_by_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(),
            " FROM subscriptions WHERE user_id = $1 AND status = 'active' AND expires_at > $2 ORDER BY expires_at ASC"
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(executor)
        .await?;

        Ok(subscriptions)
    }

    pub async fn list_expiring_between<'e, E: PgExecutor<'e>>(
        executor: E,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(),
            r#" FROM subscriptions
            WHERE status = 'active' AND expires_at > $1 AND expires_at <= $2
            ORDER BY expires_at ASC"#
        ))
        .bind(from)
        .bind(until)
        .fetch_all(executor)
        .await?;

        Ok(subscriptions)
    }

    pub async fn list_pending_deprovision<'e, E: PgExecutor<'e>>(
        executor: E,
        limit: i64,
    ) -> StoreResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(concat!(
            "SELECT ", subscription_columns!(),
            " FROM subscriptions WHERE deprovision_pending ORDER BY updated_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(executor)
        .await?;

        Ok(subscriptions)
    }

    pub async fn clear_deprovision_pending<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE subscriptions SET deprovision_pending = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }
}
