mod common;

use futures::future::join_all;
use rust_decimal::Decimal;
use vpnshop_billing::services::PaymentRequest;
use vpnshop_billing::ServiceError;
use vpnshop_database::models::{PaymentMethod, PaymentStatus};

use common::harness;

fn request(amount: i64, method: PaymentMethod, external_id: Option<&str>) -> PaymentRequest {
    PaymentRequest {
        amount: Decimal::from(amount),
        currency: None,
        method,
        external_id: external_id.map(str::to_string),
        description: "Top-up".to_string(),
    }
}

#[tokio::test]
async fn test_completion_credits_exactly_once() {
    let h = harness();
    let user = h.user(5001).await;

    let payment = h
        .services
        .payments
        .create_payment(user.id, &request(200, PaymentMethod::YooKassa, Some("yk-1")))
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.currency, "RUB");
    assert_eq!(h.balance(&user).await, Decimal::ZERO);

    let completed = h
        .services
        .payments
        .update_payment_status(payment.id, PaymentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, PaymentStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(h.balance(&user).await, Decimal::from(200));

    // a retried webhook
    let again = h
        .services
        .payments
        .update_payment_status(payment.id, PaymentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(again.status, PaymentStatus::Completed);
    assert_eq!(h.balance(&user).await, Decimal::from(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_credit_once() {
    let h = harness();
    let user = h.user(5002).await;
    let payment = h
        .services
        .payments
        .create_payment(user.id, &request(75, PaymentMethod::Tribute, None))
        .await
        .unwrap();

    let tasks = (0..6).map(|_| {
        let payments = h.services.payments.clone();
        let payment_id = payment.id;
        tokio::spawn(async move { payments.update_payment_status(payment_id, PaymentStatus::Completed).await })
    });
    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().status, PaymentStatus::Completed);
    }

    assert_eq!(h.balance(&user).await, Decimal::from(75));
}

#[tokio::test]
async fn test_terminal_status_is_final() {
    let h = harness();
    let user = h.user(5003).await;
    let payment = h
        .services
        .payments
        .create_payment(user.id, &request(50, PaymentMethod::Stars, None))
        .await
        .unwrap();

    h.services
        .payments
        .update_payment_status(payment.id, PaymentStatus::Failed)
        .await
        .unwrap();
    assert_eq!(h.balance(&user).await, Decimal::ZERO);

    for next in [PaymentStatus::Completed, PaymentStatus::Pending, PaymentStatus::Cancelled] {
        let err = h
            .services
            .payments
            .update_payment_status(payment.id, next)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { entity: "payment", .. }));
    }
    assert_eq!(h.balance(&user).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_payment_input_checks() {
    let h = harness();
    let user = h.user(5004).await;

    let err = h
        .services
        .payments
        .create_payment(user.id, &request(100, PaymentMethod::CryptoPay, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentMethodDisabled(ref m) if m == "CryptoPay"));

    let err = h
        .services
        .payments
        .create_payment(user.id, &request(0, PaymentMethod::Stars, None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidAmount(_)));

    let err = h
        .services
        .payments
        .update_payment_status(uuid::Uuid::new_v4(), PaymentStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PaymentNotFound));
}

#[tokio::test]
async fn test_external_id_correlation() {
    let h = harness();
    let user = h.user(5005).await;

    let first = h
        .services
        .payments
        .create_payment(user.id, &request(10, PaymentMethod::YooKassa, None))
        .await
        .unwrap();
    let second = h
        .services
        .payments
        .create_payment(user.id, &request(20, PaymentMethod::YooKassa, None))
        .await
        .unwrap();

    h.services.payments.attach_external_id(first.id, "yk-42").await.unwrap();
    // same id again is accepted
    h.services.payments.attach_external_id(first.id, "yk-42").await.unwrap();

    let err = h.services.payments.attach_external_id(first.id, "yk-43").await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = h.services.payments.attach_external_id(second.id, "yk-42").await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let found = h.services.payments.find_by_external_id("yk-42").await.unwrap();
    assert_eq!(found.id, first.id);

    let err = h
        .services
        .payments
        .create_payment(user.id, &request(10, PaymentMethod::YooKassa, Some("yk-42")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    assert_eq!(h.services.payments.list_user_payments(user.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_instant_payment() {
    let h = harness();
    let user = h.user(5006).await;

    let payment = h
        .services
        .payments
        .process_instant_payment(user.id, &request(99, PaymentMethod::Stars, Some("stars-charge-1")))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(h.balance(&user).await, Decimal::from(99));
}
