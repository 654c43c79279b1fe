use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use validator::Validate;
use vpnshop_database::models::UserProfile;

use crate::errors::ServiceError;
use crate::handlers::validate;
use crate::services::{PurchaseRequest, TrialParams};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterUserRequest {
    #[validate(range(min = 1))]
    pub telegram_id: i64,
    #[validate(length(max = 64))]
    pub username: Option<String>,
    #[validate(length(max = 128))]
    pub first_name: Option<String>,
    #[validate(length(max = 128))]
    pub last_name: Option<String>,
    #[validate(length(min = 2, max = 10))]
    pub language_code: Option<String>,
    /// Payload of the start command, if any
    #[validate(length(min = 1, max = 32))]
    pub referral_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CodeRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PurchaseBody {
    #[validate(range(min = 1))]
    pub server_id: i32,
    #[validate(length(min = 1, max = 128))]
    pub server_name: String,
    #[validate(range(min = 1))]
    pub plan_id: i32,
    #[validate(length(min = 1, max = 128))]
    pub plan_name: String,
    #[validate(range(min = 1, max = 36))]
    pub duration_months: u32,
    pub price: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(default)]
    pub active: bool,
}

pub async fn register_user(
    state: web::Data<AppState>,
    request: web::Json<RegisterUserRequest>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let request = request.into_inner();

    let profile = UserProfile {
        username: request.username,
        first_name: request.first_name,
        last_name: request.last_name,
        language_code: request.language_code,
    };
    let user = state
        .services
        .users
        .get_or_create_user(request.telegram_id, &profile)
        .await?;

    let referral_linked = match request.referral_code.as_deref() {
        Some(code) => state.services.referrals.link_referral(user.id, code).await?,
        None => false,
    };

    Ok(HttpResponse::Ok().json(json!({
        "user": user,
        "referral_linked": referral_linked
    })))
}

pub async fn get_user(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let referrals = state.services.users.list_referrals(user.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "user": user,
        "referral_count": referrals.len()
    })))
}

pub async fn link_referral(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    request: web::Json<CodeRequest>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let linked = state.services.referrals.link_referral(user.id, &request.code).await?;

    Ok(HttpResponse::Ok().json(json!({ "linked": linked })))
}

pub async fn get_balance(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let balance = state.services.ledger.balance(user.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "balance": balance,
        "pending_discount_percent": user.pending_discount_percent
    })))
}

pub async fn list_subscriptions(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<SubscriptionQuery>,
) -> Result<HttpResponse, ServiceError> {
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let subscriptions = if query.active {
        state.services.subscriptions.get_active(user.id).await?
    } else {
        state.services.subscriptions.get_by_user(user.id).await?
    };

    Ok(HttpResponse::Ok().json(subscriptions))
}

pub async fn list_payments(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let payments = state.services.payments.list_user_payments(user.id).await?;
    Ok(HttpResponse::Ok().json(payments))
}

pub async fn claim_trial(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, ServiceError> {
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let params = TrialParams::from(&state.config.trial);
    let subscription = state.services.subscriptions.create_trial(user.id, &params).await?;

    Ok(HttpResponse::Created().json(subscription))
}

pub async fn purchase(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    request: web::Json<PurchaseBody>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let body = request.into_inner();
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;

    let purchase = PurchaseRequest {
        server_id: body.server_id,
        server_name: body.server_name,
        plan_id: body.plan_id,
        plan_name: body.plan_name,
        duration_months: body.duration_months,
        price: body.price,
    };
    let subscription = state.services.subscriptions.purchase(user.id, &purchase).await?;

    Ok(HttpResponse::Created().json(subscription))
}

pub async fn redeem_promo_code(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    request: web::Json<CodeRequest>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let user = state.services.users.find_by_telegram_id(path.into_inner()).await?;
    let redemption = state.services.promo_codes.redeem(user.id, &request.code).await?;

    Ok(HttpResponse::Ok().json(redemption))
}
