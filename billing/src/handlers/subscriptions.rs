use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::AppState;

pub async fn cancel_subscription(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ServiceError> {
    let subscription = state.services.subscriptions.cancel(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(subscription))
}
