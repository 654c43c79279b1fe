use std::time::Duration;

use serde::Serialize;
use vpnshop_observability::{log_timed, DomainEvent, EventCategory};

use crate::errors::ServiceError;
use crate::services::Services;
use crate::SERVICE_NAME;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub deprovisioned: usize,
    pub expiring_soon: usize,
}

/// One maintenance pass: expiry sweep, owed remote deletes, then the
/// expiring-soon scan used for reminders.
pub async fn run_once(services: &Services, notice_days: i64) -> Result<MaintenanceReport, ServiceError> {
    let start = std::time::Instant::now();

    let expired = log_timed!("expire_sweep", services.subscriptions.expire().await)?;
    let deprovisioned = log_timed!("deprovision_sweep", services.subscriptions.retry_deprovisioning().await)?;

    let expiring = services.subscriptions.get_expiring_within(notice_days).await?;
    for subscription in &expiring {
        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            expires_at = %subscription.expires_at,
            "Subscription expires soon"
        );
    }

    let report = MaintenanceReport {
        expired: expired.len(),
        deprovisioned,
        expiring_soon: expiring.len(),
    };

    DomainEvent::new(SERVICE_NAME, EventCategory::System, "maintenance_pass")
        .success()
        .duration_ms(start.elapsed().as_millis() as u64)
        .metadata(serde_json::to_value(&report).unwrap_or_default())
        .emit();

    Ok(report)
}

pub async fn maintenance_task(services: Services, every: Duration, notice_days: i64) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;
        if let Err(e) = run_once(&services, notice_days).await {
            tracing::error!(error = %e, "Maintenance pass failed");
        }
    }
}
