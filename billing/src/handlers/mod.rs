pub mod admin;
pub mod health;
pub mod payments;
pub mod servers;
pub mod subscriptions;
pub mod users;

use actix_web::web;
use validator::Validate;

use crate::errors::ServiceError;

pub(crate) fn validate<T: Validate>(request: &T) -> Result<(), ServiceError> {
    request
        .validate()
        .map_err(|errors| ServiceError::ValidationError(errors.to_string()))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .route("/users", web::post().to(users::register_user))
            .route("/users/{telegram_id}", web::get().to(users::get_user))
            .route("/users/{telegram_id}/referral", web::post().to(users::link_referral))
            .route("/users/{telegram_id}/balance", web::get().to(users::get_balance))
            .route("/users/{telegram_id}/subscriptions", web::get().to(users::list_subscriptions))
            .route("/users/{telegram_id}/payments", web::get().to(users::list_payments))
            .route("/users/{telegram_id}/trial", web::post().to(users::claim_trial))
            .route("/users/{telegram_id}/purchase", web::post().to(users::purchase))
            .route("/users/{telegram_id}/promo", web::post().to(users::redeem_promo_code))
            .route("/servers", web::get().to(servers::list_servers))
            .route("/servers/{server_id}/plans", web::get().to(servers::list_plans))
            .route("/subscriptions/{id}/cancel", web::post().to(subscriptions::cancel_subscription))
            .route("/payments", web::post().to(payments::create_payment))
            .route("/payments/{id}/status", web::post().to(payments::update_payment_status))
            .route("/payments/{id}/external-id", web::post().to(payments::attach_external_id))
            .route("/payments/external/{external_id}", web::get().to(payments::find_by_external_id))
            .service(
                web::scope("/admin")
                    .route("/promo-codes", web::post().to(admin::create_promo_code))
                    .route("/promo-codes", web::get().to(admin::list_promo_codes))
                    .route("/promo-codes/{id}", web::delete().to(admin::deactivate_promo_code))
                    .route("/users/{telegram_id}/block", web::post().to(admin::block_user))
                    .route("/users/{telegram_id}/unblock", web::post().to(admin::unblock_user))
                    .route("/users/{telegram_id}/credit", web::post().to(admin::credit_user))
                    .route("/subscriptions/{id}/suspend", web::post().to(admin::suspend_subscription))
                    .route("/feature-toggles/reload", web::post().to(admin::reload_feature_toggles))
                    .route("/maintenance/run", web::post().to(admin::run_maintenance)),
            ),
    );
}
