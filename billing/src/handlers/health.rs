use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{AppState, SERVICE_NAME};

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = match state.store.health_check().await {
        Ok(()) => "connected",
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            "disconnected"
        }
    };

    let body = json!({
        "status": if database == "connected" { "healthy" } else { "degraded" },
        "service": SERVICE_NAME,
        "database": database,
        "features": state.config.feature_toggles.current().enabled_features(),
        "timestamp": chrono::Utc::now()
    });

    if database == "connected" {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
