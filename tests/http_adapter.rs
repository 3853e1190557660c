use std::sync::Arc;

use cafe_query::endpoint::RequestDescriptor;
use cafe_query::schema::Category;
use cafe_query::schema::CategoryInput;
use cafe_query::schema::PostFilter;
use cafe_query::test::CountingTokenStore;
use cafe_query::ApiError;
use cafe_query::HttpClient;
use cafe_query::HttpConfig;
use cafe_query::Operation;
use cafe_query::TokenStore;
use httpmock::Method::GET;
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;

fn client(server: &MockServer, tokens: Arc<CountingTokenStore>) -> HttpClient {
    HttpClient::new(&HttpConfig::new(server.url("/api")), tokens).unwrap()
}

#[tokio::test]
async fn bearer_token_is_attached_when_present() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/user")
            .header("authorization", "Bearer secret-token")
            .header("accept", "application/json");
        then.status(200).json_body(json!({ "id": 1, "name": "Alice" }));
    });

    let http = client(&server, Arc::new(CountingTokenStore::with_token("secret-token")));
    let response = http.send(&Operation::CurrentUser.describe().unwrap()).await.unwrap();

    mock.assert();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn authorization_header_is_omitted_without_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/categories").header_missing("authorization");
        then.status(200).json_body(json!([{ "id": 1, "name": "Coffee" }]));
    });

    let http = client(&server, Arc::new(CountingTokenStore::new()));
    let categories: Vec<Category> = http.send_json(&Operation::ListCategories.describe().unwrap()).await.unwrap();

    mock.assert();
    assert_eq!(categories.len(), 1);
    assert!(categories[0].is_main());
}

#[tokio::test]
async fn unauthorized_response_clears_the_token_once() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/posts");
        then.status(401).json_body(json!({ "message": "Unauthenticated." }));
    });

    let tokens = Arc::new(CountingTokenStore::with_token("expired"));
    let http = client(&server, tokens.clone());
    let err = http.send(&Operation::ListPosts(PostFilter::default()).describe().unwrap()).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.status_code(), Some(401));
    assert_eq!(tokens.clears(), 1);
    assert!(!tokens.has_token());
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/posts/featured");
        then.status(500).body("boom");
    });

    let tokens = Arc::new(CountingTokenStore::with_token("kept"));
    let http = client(&server, tokens.clone());
    let err = http.send(&Operation::FeaturedPosts.describe().unwrap()).await.unwrap_err();

    match err {
        ApiError::Http { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(tokens.clears(), 0);
}

#[tokio::test]
async fn validation_errors_are_parsed_per_field() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/categories")
            .json_body(json!({ "name": "" }));
        then.status(422).json_body(json!({
            "message": "The name field is required.",
            "errors": { "name": ["The name field is required."] }
        }));
    });

    let http = client(&server, Arc::new(CountingTokenStore::new()));
    let err = http
        .send(&Operation::CreateCategory(CategoryInput::new("")).describe().unwrap())
        .await
        .unwrap_err();

    mock.assert();
    assert!(matches!(err, ApiError::Validation { ref message, .. } if message == "The name field is required."));
    assert_eq!(err.field_errors("name"), ["The name field is required.".to_string()]);
    assert!(err.field_errors("parent_id").is_empty());
}

#[tokio::test]
async fn network_failure_has_no_status() {
    let tokens: Arc<dyn TokenStore> = Arc::new(CountingTokenStore::new());
    let http = HttpClient::new(&HttpConfig::new("http://127.0.0.1:1/api"), tokens).unwrap();

    let err = http.send(&Operation::ListCategories.describe().unwrap()).await.unwrap_err();

    assert!(matches!(err, ApiError::Network(_)));
    assert_eq!(err.status_code(), None);
}

#[tokio::test]
async fn mismatching_body_is_a_schema_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/categories");
        then.status(200).json_body(json!({ "unexpected": true }));
    });

    let http = client(&server, Arc::new(CountingTokenStore::new()));
    let err = http
        .send_json::<Vec<Category>>(&Operation::ListCategories.describe().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Schema { ref context, .. } if context == "/categories"));
}

#[tokio::test]
async fn query_string_holds_only_present_parameters() {
    let tokens: Arc<dyn TokenStore> = Arc::new(CountingTokenStore::new());
    let http = HttpClient::new(&HttpConfig::new("http://localhost:8000/api/"), tokens).unwrap();

    let request = Operation::ListPosts(PostFilter::new().matching("latte")).describe().unwrap();
    let url = http.url(&request).unwrap();
    assert_eq!(url.as_str(), "http://localhost:8000/api/posts?search=latte");

    let url = http.url(&RequestDescriptor::get("/posts")).unwrap();
    assert_eq!(url.query(), None);
}

#[test]
fn malformed_base_url_is_rejected() {
    let tokens: Arc<dyn TokenStore> = Arc::new(CountingTokenStore::new());
    let err = HttpClient::new(&HttpConfig::new("not a url"), tokens).unwrap_err();
    assert!(matches!(err, ApiError::Url(_)));
}

#[test]
fn unusable_client_settings_are_a_config_error() {
    let tokens: Arc<dyn TokenStore> = Arc::new(CountingTokenStore::new());
    let config = HttpConfig::new("http://localhost:8000/api").with_user_agent("cafe\nquery");
    let err = HttpClient::new(&config, tokens).unwrap_err();
    assert!(matches!(err, ApiError::Config(_)), "unexpected error: {err:?}");
    assert_eq!(err.status_code(), None);
}
