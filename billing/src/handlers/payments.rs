use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;
use vpnshop_database::models::{PaymentMethod, PaymentStatus};

use crate::errors::ServiceError;
use crate::handlers::validate;
use crate::services::PaymentRequest;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentBody {
    #[validate(range(min = 1))]
    pub telegram_id: i64,
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 255))]
    pub external_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    /// Complete immediately, for sources that confirm synchronously
    #[serde(default)]
    pub instant: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ExternalIdBody {
    #[validate(length(min = 1, max = 255))]
    pub external_id: String,
}

pub async fn create_payment(
    state: web::Data<AppState>,
    request: web::Json<CreatePaymentBody>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let body = request.into_inner();
    let user = state.services.users.find_by_telegram_id(body.telegram_id).await?;

    let payment_request = PaymentRequest {
        amount: body.amount,
        currency: body.currency,
        method: body.method,
        external_id: body.external_id,
        description: body.description,
    };

    let payment = if body.instant {
        state
            .services
            .payments
            .process_instant_payment(user.id, &payment_request)
            .await?
    } else {
        state.services.payments.create_payment(user.id, &payment_request).await?
    };

    Ok(HttpResponse::Created().json(payment))
}

pub async fn update_payment_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<StatusBody>,
) -> Result<HttpResponse, ServiceError> {
    let payment = state
        .services
        .payments
        .update_payment_status(path.into_inner(), request.status)
        .await?;
    Ok(HttpResponse::Ok().json(payment))
}

pub async fn attach_external_id(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<ExternalIdBody>,
) -> Result<HttpResponse, ServiceError> {
    validate(&*request)?;
    let payment = state
        .services
        .payments
        .attach_external_id(path.into_inner(), &request.external_id)
        .await?;
    Ok(HttpResponse::Ok().json(payment))
}

pub async fn find_by_external_id(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let payment = state.services.payments.find_by_external_id(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payment))
}
