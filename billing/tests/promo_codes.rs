mod common;

use chrono::{Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use vpnshop_billing::services::promo_codes::MAX_BONUS_DAYS;
use vpnshop_billing::services::{PromoCodeDraft, RedemptionEffect};
use vpnshop_billing::ServiceError;
use vpnshop_database::models::{NewPromoCode, Pagination, PromoCode, PromoCodeType, SubscriptionKind};
use vpnshop_database::LedgerStore;

use common::{harness, plan, Harness};

fn draft(code: &str, promo_type: PromoCodeType, value: i64, max_uses: i32) -> PromoCodeDraft {
    PromoCodeDraft {
        code: Some(code.to_string()),
        promo_type,
        value: Decimal::from(value),
        max_uses,
        valid_from: None,
        valid_until: None,
        description: String::new(),
    }
}

async fn code(h: &Harness, code: &str, promo_type: PromoCodeType, value: i64, max_uses: i32) -> PromoCode {
    h.services
        .promo_codes
        .create_promo_code(&draft(code, promo_type, value, max_uses), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_amount_code_credits_the_ledger() {
    let h = harness();
    let user = h.user(3001).await;
    code(&h, "BONUS50", PromoCodeType::DiscountAmount, 50, 0).await;

    let redemption = h.services.promo_codes.redeem(user.id, "  bonus50 ").await.unwrap();

    assert_eq!(redemption.promo_code.code, "BONUS50");
    assert_eq!(redemption.promo_code.used_count, 1);
    assert!(matches!(
        redemption.effect,
        RedemptionEffect::BalanceCredited { balance_after, .. } if balance_after == Decimal::from(50)
    ));
    assert_eq!(h.balance(&user).await, Decimal::from(50));
}

#[tokio::test]
async fn test_second_redemption_by_same_user_is_refused() {
    let h = harness();
    let user = h.user(3002).await;
    let promo = code(&h, "TWICE", PromoCodeType::DiscountAmount, 30, 0).await;

    h.services.promo_codes.redeem(user.id, "TWICE").await.unwrap();
    let err = h.services.promo_codes.redeem(user.id, "twice").await.unwrap_err();

    assert!(matches!(err, ServiceError::AlreadyRedeemed));
    assert_eq!(h.balance(&user).await, Decimal::from(30));
    assert_eq!(h.services.promo_codes.usage_count(promo.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_expired_and_deactivated_codes() {
    let h = harness();
    let user = h.user(3003).await;

    let err = h.services.promo_codes.redeem(user.id, "NOPE").await.unwrap_err();
    assert!(matches!(err, ServiceError::CodeNotFound));

    let mut expired = draft("OLDCODE", PromoCodeType::DiscountAmount, 10, 0);
    expired.valid_from = Some(Utc::now() - Duration::days(10));
    expired.valid_until = Some(Utc::now() - Duration::days(1));
    h.services.promo_codes.create_promo_code(&expired, None).await.unwrap();
    let err = h.services.promo_codes.redeem(user.id, "OLDCODE").await.unwrap_err();
    assert!(matches!(err, ServiceError::CodeExpiredOrInactive));

    let mut future = draft("LATER", PromoCodeType::DiscountAmount, 10, 0);
    future.valid_from = Some(Utc::now() + Duration::days(1));
    h.services.promo_codes.create_promo_code(&future, None).await.unwrap();
    let err = h.services.promo_codes.redeem(user.id, "LATER").await.unwrap_err();
    assert!(matches!(err, ServiceError::CodeExpiredOrInactive));

    let gone = code(&h, "GONE", PromoCodeType::DiscountAmount, 10, 0).await;
    h.services.promo_codes.deactivate_promo_code(gone.id).await.unwrap();
    let err = h.services.promo_codes.redeem(user.id, "GONE").await.unwrap_err();
    assert!(matches!(err, ServiceError::CodeNotFound));

    assert_eq!(h.balance(&user).await, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemptions_by_one_user_apply_once() {
    let h = harness();
    let user = h.user(3004).await;
    let promo = code(&h, "RACE50", PromoCodeType::DiscountAmount, 50, 0).await;

    let tasks = (0..10).map(|_| {
        let promo_codes = h.services.promo_codes.clone();
        let user_id = user.id;
        tokio::spawn(async move { promo_codes.redeem(user_id, "RACE50").await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ServiceError::AlreadyRedeemed)));
    assert_eq!(h.balance(&user).await, Decimal::from(50));
    assert_eq!(h.services.promo_codes.usage_count(promo.id).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capped_code_never_exceeds_max_uses() {
    let h = harness();
    let promo = code(&h, "FIRST3", PromoCodeType::DiscountAmount, 20, 3).await;

    let mut users = Vec::new();
    for telegram_id in 3100..3110 {
        users.push(h.user(telegram_id).await);
    }

    let tasks = users.iter().map(|user| {
        let promo_codes = h.services.promo_codes.clone();
        let user_id = user.id;
        tokio::spawn(async move { promo_codes.redeem(user_id, "FIRST3").await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ServiceError::CodeExpiredOrInactive)));

    let stored = h.services.promo_codes.list_promo_codes(&Pagination::default()).await.unwrap();
    let stored = stored.items.iter().find(|p| p.id == promo.id).unwrap();
    assert_eq!(stored.used_count, 3);
    assert_eq!(h.services.promo_codes.usage_count(promo.id).await.unwrap(), 3);

    let mut credited = Decimal::ZERO;
    for user in &users {
        credited += h.balance(user).await;
    }
    assert_eq!(credited, Decimal::from(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_use_code_raced_by_two_users() {
    let h = harness();
    code(&h, "BONUS50", PromoCodeType::DiscountAmount, 50, 1).await;
    let alice = h.user(3201).await;
    let bob = h.user(3202).await;

    let a = {
        let promo_codes = h.services.promo_codes.clone();
        tokio::spawn(async move { promo_codes.redeem(alice.id, "BONUS50").await })
    };
    let b = {
        let promo_codes = h.services.promo_codes.clone();
        tokio::spawn(async move { promo_codes.redeem(bob.id, "BONUS50").await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(loser, ServiceError::CodeExpiredOrInactive));

    let total = h.balance(&h.user(3201).await).await + h.balance(&h.user(3202).await).await;
    assert_eq!(total, Decimal::from(50));
}

#[tokio::test]
async fn test_percent_code_discounts_next_purchase_once() {
    let h = harness();
    let user = h.user_with_balance(3301, 500).await;
    code(&h, "SALE20", PromoCodeType::DiscountPercent, 20, 0).await;
    code(&h, "SALE10", PromoCodeType::DiscountPercent, 10, 0).await;

    h.services.promo_codes.redeem(user.id, "SALE20").await.unwrap();
    let redemption = h.services.promo_codes.redeem(user.id, "SALE10").await.unwrap();
    assert!(matches!(
        redemption.effect,
        RedemptionEffect::DiscountPending { percent } if percent == Decimal::from(20)
    ));

    let first = h.services.subscriptions.purchase(user.id, &plan(150, 1)).await.unwrap();
    assert_eq!(first.price, Decimal::from(120));
    assert_eq!(h.balance(&user).await, Decimal::from(380));

    let second = h.services.subscriptions.purchase(user.id, &plan(150, 1)).await.unwrap();
    assert_eq!(second.price, Decimal::from(150));
    assert_eq!(h.balance(&user).await, Decimal::from(230));
}

#[tokio::test]
async fn test_discount_survives_a_failed_purchase() {
    let h = harness();
    let user = h.user_with_balance(3302, 100).await;
    code(&h, "HALF", PromoCodeType::DiscountPercent, 50, 0).await;
    h.services.promo_codes.redeem(user.id, "HALF").await.unwrap();

    let err = h.services.subscriptions.purchase(user.id, &plan(300, 1)).await.unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientBalance { .. }));

    let subscription = h.services.subscriptions.purchase(user.id, &plan(200, 1)).await.unwrap();
    assert_eq!(subscription.price, Decimal::from(100));
    assert_eq!(h.balance(&user).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_bonus_days_extend_the_live_subscription() {
    let h = harness();
    let user = h.user_with_balance(3401, 300).await;
    let subscription = h.services.subscriptions.purchase(user.id, &plan(150, 1)).await.unwrap();
    code(&h, "WEEK", PromoCodeType::BonusDays, 7, 0).await;

    let redemption = h.services.promo_codes.redeem(user.id, "WEEK").await.unwrap();

    match redemption.effect {
        RedemptionEffect::SubscriptionExtended { subscription: extended, days } => {
            assert_eq!(days, 7);
            assert_eq!(extended.id, subscription.id);
            assert_eq!(extended.expires_at, subscription.expires_at + Duration::days(7));
        }
        other => panic!("unexpected effect: {:?}", other),
    }
    assert_eq!(h.provisioner.extended(), 1);
    assert_eq!(h.services.subscriptions.get_by_user(user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bonus_days_without_subscription_create_one() {
    let h = harness();
    let user = h.user(3402).await;
    code(&h, "WELCOME", PromoCodeType::BonusDays, 3, 0).await;

    let redemption = h.services.promo_codes.redeem(user.id, "WELCOME").await.unwrap();

    match redemption.effect {
        RedemptionEffect::SubscriptionCreated { subscription, days } => {
            assert_eq!(days, 3);
            assert_eq!(subscription.kind, SubscriptionKind::Bonus);
            assert_eq!(subscription.server_id, h.config.provisioning.bonus_server_id);
            assert!(subscription.remote_id.is_some());
        }
        other => panic!("unexpected effect: {:?}", other),
    }
    assert_eq!(h.provisioner.created(), 1);
}

#[tokio::test]
async fn test_bonus_days_provisioning_failure_keeps_code_unused() {
    let h = harness();
    let user = h.user(3403).await;
    let promo = code(&h, "WELCOME", PromoCodeType::BonusDays, 3, 1).await;

    h.provisioner.set_fail_create(true);
    let err = h.services.promo_codes.redeem(user.id, "WELCOME").await.unwrap_err();
    assert!(matches!(err, ServiceError::ProvisioningFailed(_)));
    assert_eq!(h.services.promo_codes.usage_count(promo.id).await.unwrap(), 0);

    h.provisioner.set_fail_create(false);
    assert!(h.services.promo_codes.redeem(user.id, "WELCOME").await.is_ok());
}

#[tokio::test]
async fn test_bonus_days_are_capped_at_creation() {
    let h = harness();

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("FOREVER", PromoCodeType::BonusDays, 100_000_000, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("DECADEPLUS", PromoCodeType::BonusDays, MAX_BONUS_DAYS + 1, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let decade = code(&h, "DECADE", PromoCodeType::BonusDays, MAX_BONUS_DAYS, 0).await;
    assert_eq!(decade.value, Decimal::from(MAX_BONUS_DAYS));
}

#[tokio::test]
async fn test_out_of_range_bonus_days_fail_without_side_effects() {
    let h = harness();
    let newcomer = h.user(3404).await;
    let subscriber = h.user_with_balance(3405, 300).await;
    let live = h.services.subscriptions.purchase(subscriber.id, &plan(100, 1)).await.unwrap();

    // written straight to the store, as an older row would be
    let promo = h
        .store
        .insert_promo_code(&NewPromoCode {
            code: "FOREVER".to_string(),
            promo_type: PromoCodeType::BonusDays,
            value: Decimal::from(100_000_000),
            max_uses: 0,
            valid_from: Utc::now() - Duration::hours(1),
            valid_until: None,
            description: String::new(),
            created_by: None,
        })
        .await
        .unwrap();

    let err = h.services.promo_codes.redeem(newcomer.id, "FOREVER").await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
    assert!(h.services.subscriptions.get_by_user(newcomer.id).await.unwrap().is_empty());

    let err = h.services.promo_codes.redeem(subscriber.id, "FOREVER").await.unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
    let unchanged = h.services.subscriptions.get_active(subscriber.id).await.unwrap();
    assert_eq!(unchanged[0].expires_at, live.expires_at);

    assert_eq!(h.services.promo_codes.usage_count(promo.id).await.unwrap(), 0);
    assert_eq!(h.provisioner.created(), 1);
    assert_eq!(h.provisioner.extended(), 0);
}

#[tokio::test]
async fn test_admin_validation() {
    let h = harness();

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("TOOMUCH", PromoCodeType::DiscountPercent, 150, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("AB", PromoCodeType::DiscountAmount, 10, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("ZERO", PromoCodeType::DiscountAmount, 0, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let created = code(&h, "spring-24", PromoCodeType::DiscountAmount, 10, 0).await;
    assert_eq!(created.code, "SPRING-24");

    let err = h
        .services
        .promo_codes
        .create_promo_code(&draft("Spring-24", PromoCodeType::DiscountAmount, 5, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn test_generated_code_is_redeemable() {
    let h = harness();
    let user = h.user(3501).await;

    let promo = h
        .services
        .promo_codes
        .generate_promo_code(&draft("", PromoCodeType::DiscountAmount, 15, 10), None)
        .await
        .unwrap();
    assert_eq!(promo.code.len(), 8);
    assert!(promo.code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    h.services.promo_codes.redeem(user.id, &promo.code).await.unwrap();
    assert_eq!(h.balance(&user).await, Decimal::from(15));
}

#[tokio::test]
async fn test_listing_hides_deactivated_codes() {
    let h = harness();
    let keep = code(&h, "KEEP", PromoCodeType::DiscountAmount, 10, 0).await;
    let drop = code(&h, "DROP", PromoCodeType::DiscountAmount, 10, 0).await;

    h.services.promo_codes.deactivate_promo_code(drop.id).await.unwrap();
    let err = h.services.promo_codes.deactivate_promo_code(drop.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::CodeNotFound));

    let valid = h.services.promo_codes.list_valid_promo_codes().await.unwrap();
    assert_eq!(valid.len(), 1);
    assert_eq!(valid[0].id, keep.id);

    let page = h.services.promo_codes.list_promo_codes(&Pagination::new(10, 0)).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_promo_codes_toggle_off() {
    use vpnshop_config::{AppConfig, FeatureToggles, ToggleHandle};

    let config = AppConfig {
        feature_toggles: ToggleHandle::new(FeatureToggles::default().with_flag("PromoCodes", false)),
        ..AppConfig::default()
    };
    let h = common::harness_with(config);
    let user = h.user(3601).await;
    code(&h, "BONUS50", PromoCodeType::DiscountAmount, 50, 0).await;

    let err = h.services.promo_codes.redeem(user.id, "BONUS50").await.unwrap_err();
    assert!(matches!(err, ServiceError::FeatureDisabled(_)));
}
