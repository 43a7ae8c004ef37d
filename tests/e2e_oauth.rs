//! E2E tests for the platform OAuth connect flow

mod common;

use common::{CONSENT_BASE, FRONTEND_URL, TestServer};
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use serde_json::Value;

fn location(response: &reqwest::Response) -> String {
    response.headers()[LOCATION].to_str().unwrap().to_string()
}

fn query_value(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Start the flow and return the sealed state from the consent redirect
async fn authorize(server: &TestServer, platform: &str, profile_id: &str) -> String {
    let response = server
        .get(&format!("/api/v1/auth/{}", platform))
        .query(&[("profile_id", profile_id)])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let consent = location(&response);
    assert!(consent.starts_with(&format!("{}/{}", CONSENT_BASE, platform)));
    query_value(&consent, "state").unwrap()
}

async fn callback(server: &TestServer, platform: &str, params: &[(&str, &str)]) -> String {
    let response = server
        .client
        .get(server.url(&format!("/api/v1/auth/{}/callback", platform)))
        .query(params)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    location(&response)
}

#[tokio::test]
async fn test_round_trip_connects_account() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();

    let state = authorize(&server, "github", profile_id).await;
    let redirect = callback(&server, "github", &[("code", "good"), ("state", &state)]).await;

    assert!(redirect.starts_with(&format!("{}/connections?", FRONTEND_URL)));
    assert_eq!(query_value(&redirect, "success").as_deref(), Some("github"));
    assert_eq!(query_value(&redirect, "profile").as_deref(), Some(profile_id));

    let connections: Vec<Value> = server
        .get(&format!("/api/v1/profiles/{}/connections", profile_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["platform_user_id"], "stub-github");
    assert_eq!(connections[0]["is_active"], true);

    let stored = server
        .state
        .db
        .get_account(connections[0]["id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    let token = server
        .state
        .vault
        .decrypt(stored.access_token_encrypted.as_deref().unwrap())
        .unwrap();
    assert_eq!(token, "access-good");
}

#[tokio::test]
async fn test_state_cannot_be_replayed() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;

    let state = authorize(&server, "reddit", profile["id"].as_str().unwrap()).await;
    let first = callback(&server, "reddit", &[("code", "good"), ("state", &state)]).await;
    assert_eq!(query_value(&first, "success").as_deref(), Some("reddit"));

    let second = callback(&server, "reddit", &[("code", "good"), ("state", &state)]).await;
    assert_eq!(
        query_value(&second, "error").as_deref(),
        Some("state_replayed")
    );
}

#[tokio::test]
async fn test_tampered_state_is_rejected() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();

    let state = authorize(&server, "github", profile_id).await;
    let mut chars: Vec<char> = state.chars().collect();
    let middle = chars.len() / 2;
    chars[middle] = if chars[middle] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    let redirect = callback(&server, "github", &[("code", "good"), ("state", &tampered)]).await;
    assert_eq!(
        query_value(&redirect, "error").as_deref(),
        Some("invalid_state")
    );

    assert!(
        server
            .state
            .db
            .list_accounts(profile_id, true)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_callback_failure_codes() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let state = authorize(&server, "youtube", profile["id"].as_str().unwrap()).await;

    let denied = callback(&server, "youtube", &[("error", "access_denied")]).await;
    assert_eq!(
        query_value(&denied, "error").as_deref(),
        Some("access_denied")
    );

    let missing = callback(&server, "youtube", &[("code", "good")]).await;
    assert_eq!(
        query_value(&missing, "error").as_deref(),
        Some("missing_params")
    );

    let unknown = callback(&server, "myspace", &[("code", "good"), ("state", &state)]).await;
    assert_eq!(
        query_value(&unknown, "error").as_deref(),
        Some("unknown_platform")
    );

    let rejected = callback(&server, "youtube", &[("code", "bad-code"), ("state", &state)]).await;
    assert_eq!(
        query_value(&rejected, "error").as_deref(),
        Some("token_exchange_failed")
    );
}

#[tokio::test]
async fn test_twitter_authorize_sends_pkce_challenge() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;

    let response = server
        .get("/api/v1/auth/twitter")
        .query(&[("profile_id", profile["id"].as_str().unwrap())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let consent = location(&response);
    assert!(query_value(&consent, "code_challenge").is_some());
    assert_eq!(
        query_value(&consent, "code_challenge_method").as_deref(),
        Some("S256")
    );
}

#[tokio::test]
async fn test_authorize_requires_owned_profile_and_oauth_platform() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();

    let tasks = server
        .get("/api/v1/auth/tasks")
        .query(&[("profile_id", profile_id)])
        .send()
        .await
        .unwrap();
    assert_eq!(tasks.status(), StatusCode::BAD_REQUEST);

    let other_key = server.other_user_key().await;
    let foreign = server
        .client
        .get(server.url("/api/v1/auth/github"))
        .query(&[("profile_id", profile_id)])
        .bearer_auth(&other_key)
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let anonymous = server
        .client
        .get(server.url("/api/v1/auth/github"))
        .query(&[("profile_id", profile_id)])
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}
