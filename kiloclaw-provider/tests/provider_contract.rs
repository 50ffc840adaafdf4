use kiloclaw_provider::client::ProviderClient;
use kiloclaw_provider::config::ProviderConfig;
use kiloclaw_provider::error::ClientError;
use kiloclaw_provider::models::IpAddressType;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> ProviderClient {
    let config = ProviderConfig::new("test-token", server.uri());
    ProviderClient::new(&config).expect("client builds")
}

#[tokio::test]
async fn create_app_succeeds_on_first_try() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "app_1", "name": "user-abc", "organization": "personal"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let app = client
        .create_app("user-abc", "personal", "user-123")
        .await
        .expect("create succeeds");
    assert_eq!(app.name, "user-abc");
}

#[tokio::test]
async fn create_app_conflict_owned_by_requester_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "name already taken"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps/user-abc/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "m1",
                "name": "instance",
                "state": "started",
                "region": "ord",
                "config": {
                    "image": "img",
                    "guest": {"cpu_kind": "shared", "cpus": 1, "memory_mb": 256},
                    "metadata": {"kiloclaw_user_id": "user-123"}
                }
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps/user-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "app_1", "name": "user-abc"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let app = client
        .create_app("user-abc", "personal", "user-123")
        .await
        .expect("owned-by-requester conflict resolves to success");
    assert_eq!(app.name, "user-abc");
}

#[tokio::test]
async fn create_app_conflict_owned_by_other_user_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "name already taken"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/apps/user-abc/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "m1",
                "name": "instance",
                "state": "started",
                "region": "ord",
                "config": {
                    "image": "img",
                    "guest": {"cpu_kind": "shared", "cpus": 1, "memory_mb": 256},
                    "metadata": {"kiloclaw_user_id": "user-999"}
                }
            }
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .create_app("user-abc", "personal", "user-123")
        .await
        .expect_err("cross-tenant collision must be fatal");
    assert!(matches!(err, ClientError::AppNameCollision { .. }));
}

#[tokio::test]
async fn allocate_ip_treats_409_as_already_allocated_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/user-abc/ips"))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "error": "already allocated"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .allocate_ip("user-abc", IpAddressType::SharedV4)
        .await
        .expect("409 on ip allocation is idempotent success");
}

#[tokio::test]
async fn destroy_machine_treats_404_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/apps/user-abc/machines/m1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": "not found"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .destroy_machine("user-abc", "m1", true)
        .await
        .expect("404 on destroy is a no-op success");
}

#[tokio::test]
async fn set_secret_returns_version_for_min_secrets_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/apps/user-abc/secrets/TOKEN"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": 7
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let version = client
        .set_secret("user-abc", "TOKEN", "value")
        .await
        .expect("set_secret succeeds");
    assert_eq!(version, 7);
}
