use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;
use vpnshop_database::models::{Pagination, PromoCodeType};
use vpnshop_observability::log_security;

use crate::errors::ServiceError;
use crate::handlers::validate;
use crate::services::PromoCodeDraft;
use crate::worker;
use crate::AppState;

pub const ADMIN_HEADER: &str = "X-Admin-Telegram-Id";

/// The single authorization check for every admin route.
fn require_admin(req: &HttpRequest, state: &AppState) -> Result<i64, ServiceError> {
    let telegram_id = req
        .headers()
        .get(ADMIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok());

    match telegram_id {
        Some(id) if state.config.admin.is_admin(id) => Ok(id),
        _ => {
            log_security!("admin_access_denied", telegram_id = telegram_id, path = req.path().to_string());
            Err(ServiceError::Forbidden)
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePromoCodeBody {
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub promo_type: PromoCodeType,
    pub value: Decimal,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub max_uses: i32,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    /// Ignore `code` and pick a random one
    #[serde(default)]
    pub generate: bool,
}

#[derive(Debug, Deserialize)]
pub struct PromoCodeQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    #[serde(default)]
    pub valid_only: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreditBody {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

pub async fn create_promo_code(
    req: HttpRequest,
    state: web::Data<AppState>,
    request: web::Json<CreatePromoCodeBody>,
) -> Result<HttpResponse, ServiceError> {
    let admin_id = require_admin(&req, &state)?;
    validate(&*request)?;
    let body = request.into_inner();

    let created_by = match state.services.users.find_by_telegram_id(admin_id).await {
        Ok(admin) => Some(admin.id),
        Err(ServiceError::UserNotFound) => None,
        Err(e) => return Err(e),
    };

    let draft = PromoCodeDraft {
        code: body.code,
        promo_type: body.promo_type,
        value: body.value,
        max_uses: body.max_uses,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        description: body.description,
    };

    let promo = if body.generate {
        state.services.promo_codes.generate_promo_code(&draft, created_by).await?
    } else {
        state.services.promo_codes.create_promo_code(&draft, created_by).await?
    };

    Ok(HttpResponse::Created().json(promo))
}

pub async fn list_promo_codes(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<PromoCodeQuery>,
) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;

    if query.valid_only {
        let codes = state.services.promo_codes.list_valid_promo_codes().await?;
        return Ok(HttpResponse::Ok().json(codes));
    }

    let pagination = Pagination::page(query.page.unwrap_or(1), query.per_page.unwrap_or(20));
    let page = state.services.promo_codes.list_promo_codes(&pagination).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn deactivate_promo_code(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let promo = state.services.promo_codes.deactivate_promo_code(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(promo))
}

pub async fn block_user(req: HttpRequest, state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let user = state.services.users.block_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn unblock_user(req: HttpRequest, state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let user = state.services.users.unblock_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

pub async fn credit_user(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    request: web::Json<CreditBody>,
) -> Result<HttpResponse, ServiceError> {
    let admin_id = require_admin(&req, &state)?;
    validate(&*request)?;

    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let reason = format!("admin {}: {}", admin_id, request.reason);
    let user = state.services.ledger.credit(user.id, request.amount, &reason).await?;

    Ok(HttpResponse::Ok().json(json!({ "user_id": user.id, "balance": user.balance })))
}

pub async fn suspend_subscription(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let subscription = state.services.subscriptions.suspend(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(subscription))
}

pub async fn reload_feature_toggles(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let toggles = state.config.feature_toggles.reload();
    tracing::info!(enabled = ?toggles.enabled_features(), "Feature toggles reloaded");
    Ok(HttpResponse::Ok().json(json!({ "enabled": toggles.enabled_features() })))
}

pub async fn run_maintenance(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ServiceError> {
    require_admin(&req, &state)?;
    let report = worker::run_once(&state.services, state.config.maintenance.expiring_notice_days).await?;
    Ok(HttpResponse::Ok().json(report))
}
