use actix_web::{web, HttpResponse};

use crate::errors::ServiceError;
use crate::AppState;

/// Servers offered by the provisioning backend, for the bot's purchase menu
pub async fn list_servers(state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    let servers = state.gateway.list_servers().await.map_err(ServiceError::provisioning)?;
    Ok(HttpResponse::Ok().json(servers))
}

pub async fn list_plans(state: web::Data<AppState>, path: web::Path<i32>) -> Result<HttpResponse, ServiceError> {
    let plans = state
        .gateway
        .list_plans(path.into_inner())
        .await
        .map_err(ServiceError::provisioning)?;
    Ok(HttpResponse::Ok().json(plans))
}
