use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use vpnshop_billing::provisioning::{CreateRemoteSubscription, Provisioner, ProvisioningError, RemnawaveClient};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RemnawaveClient {
    RemnawaveClient::new(
        server.uri(),
        "api-key",
        Some("secret".to_string()),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_list_servers_and_plans() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/servers"))
        .and(header("X-API-Key", "api-key"))
        .and(header("Authorization", "Bearer api-key"))
        .and(header("X-Secret-Key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{ "id": 1, "name": "nl-amsterdam", "is_active": true }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/servers/1/plans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{ "id": 12, "server_id": 1, "name": "1 month", "price": "150.00", "duration": 1, "is_active": true }]
        })))
        .mount(&server)
        .await;

    let client = client(&server);

    let servers = client.list_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "nl-amsterdam");

    let plans = client.list_plans(1).await.unwrap();
    assert_eq!(plans[0].price, Decimal::from(150));
    assert_eq!(plans[0].duration, 1);
}

#[tokio::test]
async fn test_create_and_delete_subscription() {
    let server = MockServer::start().await;
    let expires_at = Utc.with_ymd_and_hms(2030, 1, 31, 12, 0, 0).unwrap();

    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "id": 777, "user_id": 42, "server_id": 1, "status": "active", "expires_at": expires_at }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/subscriptions/777"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let remote = client
        .create_subscription(&CreateRemoteSubscription {
            user_id: 42,
            server_id: 1,
            plan_id: None,
            expires_at,
            traffic_limit_gb: Some(10),
            traffic_strategy: Some("NO_RESET".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(remote.handle(), "777");
    assert_eq!(remote.expires_at, expires_at);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["traffic_limit_gb"], 10);
    assert!(body.get("plan_id").is_none());

    client.delete_subscription(&remote.handle()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_request_surfaces_remote_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "server is full"
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_subscription(&CreateRemoteSubscription {
            user_id: 42,
            server_id: 1,
            plan_id: Some(12),
            expires_at: Utc::now(),
            traffic_limit_gb: None,
            traffic_strategy: None,
        })
        .await
        .unwrap_err();

    match err {
        ProvisioningError::Api(message) => assert_eq!(message, "server is full"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_non_json_response_is_an_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/servers"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let err = client(&server).list_servers().await.unwrap_err();
    assert!(matches!(err, ProvisioningError::Api(ref m) if m.contains("502")));
}
