// Integration tests for the request pipeline
//
// These tests run the client against a mock backend and verify bearer
// injection, 401 handling, error normalization, retry and the session flow.

use mockito::{Matcher, Server, ServerGuard};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use rental_client::{
    auth::{CredentialStore, Credentials, Session},
    cancel::CancelToken,
    config::ClientConfig,
    error::{ApiError, ErrorCode},
    http_client::{ApiClient, ClientEvent, RequestDescriptor},
    retry::RetryPolicy,
    storage::{LocalStore, MemoryStorage, Storage, StorageError},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn create_client(server: &ServerGuard) -> ApiClient {
    create_client_with_base(&format!("{}/api", server.url()))
}

fn create_client_with_base(base_url: &str) -> ApiClient {
    let config = ClientConfig {
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        login_path: "/login".to_string(),
    };

    ApiClient::new(&config, Arc::new(CredentialStore::in_memory()))
        .expect("Failed to create API client")
}

fn store_credentials(client: &ApiClient) {
    client
        .credentials()
        .save(&Credentials {
            access_token: "access-abc".to_string(),
            refresh_token: Some("refresh-xyz".to_string()),
        })
        .unwrap();
}

/// Local address of a server that accepts connections and never answers
async fn spawn_silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    format!("http://{}/api", addr)
}

/// Backend whose removals always fail
struct ReadOnlyStorage(MemoryStorage);

impl Storage for ReadOnlyStorage {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.0.get_raw(key)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.0.set_raw(key, value)
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Poisoned)
    }

    fn clear(&self) -> Result<(), StorageError> {
        Err(StorageError::Poisoned)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Product {
    id: u32,
    name: String,
    daily_rate: f64,
}

// ==================================================================================================
// Authorization Header Tests
// ==================================================================================================

#[tokio::test]
async fn test_bearer_token_attached_when_stored() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/products/1")
        .match_header("authorization", "Bearer access-abc")
        .match_header("accept", "application/json")
        .match_header("x-request-id", Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":1,"name":"Scissor lift","daily_rate":85.0}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    store_credentials(&client);

    let product: Product = client.get("/products/1").await.unwrap();
    assert_eq!(
        product,
        Product {
            id: 1,
            name: "Scissor lift".to_string(),
            daily_rate: 85.0,
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_request_without_token_is_unauthenticated() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/products")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = create_client(&server);

    let products: Vec<Product> = client.get("/products").await.unwrap();
    assert!(products.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_header_override_replaces_authorization() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/reports/daily")
        .match_header("authorization", "Bearer report-key")
        .with_status(200)
        .with_body(r#"{"total":3}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    store_credentials(&client);

    let request = RequestDescriptor::get("/reports/daily").header("Authorization", "Bearer report-key");
    let report: Value = client.send(&request).await.unwrap();
    assert_eq!(report, json!({ "total": 3 }));
    mock.assert_async().await;
}

// ==================================================================================================
// Request Descriptor Tests
// ==================================================================================================

#[tokio::test]
async fn test_query_and_json_body_are_sent() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/quotations")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("draft".into(), "true".into()),
            Matcher::UrlEncoded("customer".into(), "acme co".into()),
        ]))
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({ "productId": 7, "days": 3 })))
        .with_status(201)
        .with_body(r#"{"id":"Q-100","status":"draft"}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    let request = RequestDescriptor::post("/quotations")
        .query("draft", "true")
        .query("customer", "acme co")
        .body(json!({ "productId": 7, "days": 3 }));

    let quotation: Value = client.send(&request).await.unwrap();
    assert_eq!(quotation["id"], "Q-100");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_and_plain_text_success_bodies() {
    let mut server = Server::new_async().await;
    server
        .mock("DELETE", "/api/rentals/9")
        .with_status(204)
        .create_async()
        .await;
    server
        .mock("GET", "/api/health")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("OK")
        .create_async()
        .await;

    let client = create_client(&server);

    let deleted: Value = client.delete("/rentals/9").await.unwrap();
    assert_eq!(deleted, Value::Null);

    let health: String = client.get("/health").await.unwrap();
    assert_eq!(health, "OK");
}

#[tokio::test]
async fn test_invalid_header_override_is_unknown_error() {
    let server = Server::new_async().await;
    let client = create_client(&server);

    let request = RequestDescriptor::get("/products").header("bad header", "x");
    let err = client.send::<Value>(&request).await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Unknown);
    assert!(err.message.contains("Invalid header name"));
}

#[tokio::test]
async fn test_response_shape_mismatch_is_unknown_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/products/1")
        .with_status(200)
        .with_body(r#"{"unexpected":true}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    let err = client.get::<Product>("/products/1").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Unknown);
    assert!(err.message.starts_with("Failed to decode response data"));
}

// ==================================================================================================
// Authentication Failure Tests
// ==================================================================================================

#[tokio::test]
async fn test_unauthorized_clears_credentials_and_emits_event() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/notifications")
        .with_status(401)
        .with_body(r#"{"message":"Token expired"}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    store_credentials(&client);
    let mut events = client.subscribe();

    let err = client.get::<Value>("/notifications").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Status(401));
    assert_eq!(err.message, "Token expired");
    assert!(err.is_unauthorized());

    assert_eq!(client.credentials().access_token().unwrap(), None);
    assert_eq!(client.credentials().refresh_token().unwrap(), None);

    match events.try_recv().unwrap() {
        ClientEvent::AuthenticationFailed { url, login_path } => {
            assert!(url.ends_with("/api/notifications"));
            assert_eq!(login_path, "/login");
        }
    }
}

#[tokio::test]
async fn test_unauthorized_on_any_method_clears_credentials() {
    let mut server = Server::new_async().await;
    server
        .mock("PATCH", "/api/users/5")
        .with_status(401)
        .create_async()
        .await;

    let client = create_client(&server);
    store_credentials(&client);

    let err = client
        .patch::<_, Value>("/users/5", &json!({ "name": "Dana" }))
        .await
        .unwrap_err();

    assert_eq!(err.message, "Unauthorized");
    assert!(!client.credentials().is_authenticated().unwrap());
}

#[tokio::test]
async fn test_other_errors_keep_credentials() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/payments")
        .with_status(403)
        .create_async()
        .await;

    let client = create_client(&server);
    store_credentials(&client);
    let mut events = client.subscribe();

    let err = client.get::<Value>("/payments").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Status(403));
    assert!(client.credentials().is_authenticated().unwrap());
    assert!(events.try_recv().is_err());
}

// ==================================================================================================
// Error Normalization Tests
// ==================================================================================================

#[tokio::test]
async fn test_server_error_message_and_details() {
    let mut server = Server::new_async().await;
    server
        .mock("PUT", "/api/rentals/3")
        .with_status(409)
        .with_body(r#"{"message":"Item already returned","rentalId":3}"#)
        .create_async()
        .await;

    let client = create_client(&server);
    let err = client
        .put::<_, Value>("/rentals/3", &json!({ "status": "returned" }))
        .await
        .unwrap_err();

    assert_eq!(err.code.to_string(), "409");
    assert_eq!(err.message, "Item already returned");
    assert_eq!(
        err.details,
        Some(json!({ "message": "Item already returned", "rentalId": 3 }))
    );
}

#[tokio::test]
async fn test_no_response_is_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = create_client_with_base(&format!("http://127.0.0.1:{}/api", port));

    let err = client.get::<Value>("/products").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Network);
    assert_eq!(err.code.to_string(), "NETWORK_ERROR");
    assert_eq!(err.message, "Network error. Please check your connection.");
    assert_eq!(err.details, None);
}

#[tokio::test]
async fn test_timeout_is_network_error() {
    let config = ClientConfig {
        base_url: spawn_silent_server().await,
        timeout: Duration::from_millis(200),
        login_path: "/login".to_string(),
    };
    let client = ApiClient::new(&config, Arc::new(CredentialStore::in_memory())).unwrap();

    let err = client.get::<Value>("/products").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Network);
    assert_eq!(err.message, "Network error. Please check your connection.");
    assert!(!err.is_cancelled());
}

// ==================================================================================================
// Retry Tests
// ==================================================================================================

#[tokio::test]
async fn test_send_with_retry_returns_last_error() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/reports/monthly")
        .with_status(503)
        .with_body(r#"{"message":"Report service warming up"}"#)
        .expect(3)
        .create_async()
        .await;

    let client = create_client(&server);
    let err: ApiError = client
        .send_with_retry::<Value>(
            &RequestDescriptor::get("/reports/monthly"),
            RetryPolicy::new(3, 5),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::Status(503));
    assert_eq!(err.message, "Report service warming up");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_send_without_retry_hits_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/reports/monthly")
        .with_status(500)
        .expect(1)
        .create_async()
        .await;

    let client = create_client(&server);
    let err = client.get::<Value>("/reports/monthly").await.unwrap_err();

    assert_eq!(err.message, "Internal Server Error");
    mock.assert_async().await;
}

// ==================================================================================================
// Cancellation Tests
// ==================================================================================================

#[tokio::test]
async fn test_cancelled_request() {
    let server = Server::new_async().await;
    let client = create_client(&server);

    let token = CancelToken::new();
    token.cancel();

    let err = client
        .send_cancellable::<Value>(&RequestDescriptor::get("/products"), &token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.code, ErrorCode::Unknown);
}

#[tokio::test]
async fn test_cancel_while_request_in_flight() {
    let client = create_client_with_base(&spawn_silent_server().await);

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        client.send_cancellable::<Value>(&RequestDescriptor::get("/products"), &token),
    )
    .await
    .expect("cancellation did not interrupt the request")
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.code, ErrorCode::Unknown);
}

#[tokio::test]
async fn test_uncancelled_token_lets_request_complete() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/products")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = create_client(&server);
    let token = CancelToken::new();

    let products: Vec<Product> = client
        .send_cancellable(&RequestDescriptor::get("/products"), &token)
        .await
        .unwrap();
    assert!(products.is_empty());
}

// ==================================================================================================
// Session Tests
// ==================================================================================================

#[tokio::test]
async fn test_login_stores_credentials() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/auth/login")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({
            "email": "ops@example.com",
            "password": "s3cret!"
        })))
        .with_status(200)
        .with_body(
            r#"{"token":"tok-1","refreshToken":"ref-1","user":{"id":"u1","name":"Ops","email":"ops@example.com","role":"admin"}}"#,
        )
        .create_async()
        .await;

    let client = Arc::new(create_client(&server));
    let session = Session::new(client.clone());

    let user = session.login("ops@example.com", "s3cret!").await.unwrap();

    assert_eq!(user.id, "u1");
    assert_eq!(user.role.as_deref(), Some("admin"));
    assert!(session.is_authenticated());
    assert_eq!(
        client.credentials().load().unwrap(),
        Some(Credentials {
            access_token: "tok-1".to_string(),
            refresh_token: Some("ref-1".to_string()),
        })
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_login_stores_nothing() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/auth/login")
        .with_status(400)
        .with_body(r#"{"message":"Invalid email or password"}"#)
        .create_async()
        .await;

    let client = Arc::new(create_client(&server));
    let session = Session::new(client);

    let err = session.login("ops@example.com", "wrong").await.unwrap_err();

    assert_eq!(err.message, "Invalid email or password");
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/auth/logout")
        .match_header("authorization", "Bearer access-abc")
        .with_status(500)
        .create_async()
        .await;

    let client = Arc::new(create_client(&server));
    store_credentials(&client);
    let session = Session::new(client.clone());

    session.logout().await.unwrap();

    assert!(!session.is_authenticated());
    assert_eq!(client.credentials().refresh_token().unwrap(), None);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_current_user_with_expired_session() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .create_async()
        .await;

    let client = Arc::new(create_client(&server));
    store_credentials(&client);
    let session = Session::new(client.clone());
    let mut events = client.subscribe();

    let err = session.current_user().await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(!session.is_authenticated());
    assert!(events.try_recv().is_ok());
}

#[tokio::test]
async fn test_logout_storage_failure_is_normalized() {
    let server = Server::new_async().await;
    let config = ClientConfig {
        base_url: format!("{}/api", server.url()),
        timeout: Duration::from_secs(5),
        login_path: "/login".to_string(),
    };
    let credentials = CredentialStore::new(
        LocalStore::new(Arc::new(ReadOnlyStorage(MemoryStorage::new()))),
        Default::default(),
    );
    let client = Arc::new(ApiClient::new(&config, Arc::new(credentials)).unwrap());
    let session = Session::new(client);

    let err: ApiError = session.logout().await.unwrap_err();

    assert_eq!(err.code, ErrorCode::Unknown);
    assert!(!err.is_cancelled());
}
