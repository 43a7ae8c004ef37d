//! E2E tests for connections, settings and filters

mod common;

use chronofeed::data::Platform;
use chronofeed::sync::MemoryProvider;
use common::{TestServer, github_page};
use serde_json::{Value, json};
use std::sync::Arc;

async fn server_with_github() -> TestServer {
    let github = MemoryProvider::new(Platform::Github).with_page(github_page(&[
        ("1", "alice/app", "2024-03-02T12:00:00Z"),
        ("2", "alice/secret", "2024-03-01T12:00:00Z"),
    ]));
    TestServer::with_providers(vec![Arc::new(github)]).await
}

#[tokio::test]
async fn test_manual_connection_hides_tokens() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();

    let account = server.connect(profile_id, "github", "42").await;
    assert_eq!(account["platform"], "github");
    assert_eq!(account["is_active"], true);
    assert!(account.get("access_token_encrypted").is_none());

    let listed: Vec<Value> = server
        .get(&format!("/api/v1/profiles/{}/connections", profile_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["circuit"], "closed");
    assert_eq!(listed[0]["consecutive_failures"], 0);

    // Stored token is ciphertext
    let stored = server
        .state
        .db
        .get_account(account["id"].as_str().unwrap())
        .await
        .unwrap()
        .unwrap();
    let ciphertext = stored.access_token_encrypted.unwrap();
    assert_ne!(ciphertext, "manual-token");
    assert_eq!(server.state.vault.decrypt(&ciphertext).unwrap(), "manual-token");
}

#[tokio::test]
async fn test_connection_requires_token_except_tasks() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let path = format!(
        "/api/v1/profiles/{}/connections",
        profile["id"].as_str().unwrap()
    );

    let missing = server
        .post(&path)
        .json(&json!({ "platform": "reddit", "platform_user_id": "r1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);

    let tasks = server
        .post(&path)
        .json(&json!({ "platform": "tasks" }))
        .send()
        .await
        .unwrap();
    assert_eq!(tasks.status(), 201);
    let tasks: Value = tasks.json().await.unwrap();
    assert_eq!(tasks["platform_user_id"], server.user.id.as_str());
}

#[tokio::test]
async fn test_soft_and_hard_disconnect() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();
    let account = server.connect(profile_id, "reddit", "r1").await;
    let account_id = account["id"].as_str().unwrap();

    let soft = server
        .delete(&format!("/api/v1/connections/{}", account_id))
        .send()
        .await
        .unwrap();
    assert_eq!(soft.status(), 204);

    let listed: Vec<Value> = server
        .get(&format!("/api/v1/profiles/{}/connections", profile_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed[0]["is_active"], false);

    let refresh = server
        .post(&format!("/api/v1/connections/{}/refresh", account_id))
        .send()
        .await
        .unwrap();
    assert_eq!(refresh.status(), 400);

    let hard = server
        .delete(&format!("/api/v1/connections/{}?hard=true", account_id))
        .send()
        .await
        .unwrap();
    assert_eq!(hard.status(), 204);

    let listed: Vec<Value> = server
        .get(&format!("/api/v1/profiles/{}/connections", profile_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_settings_are_validated_per_platform() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let account = server
        .connect(profile["id"].as_str().unwrap(), "github", "42")
        .await;
    let path = format!(
        "/api/v1/connections/{}/settings",
        account["id"].as_str().unwrap()
    );

    let defaults: Value = server.get(&path).send().await.unwrap().json().await.unwrap();
    assert_eq!(defaults["include_issues"], true);
    assert_eq!(defaults["max_items"], Value::Null);

    let updated = server
        .put(&path)
        .json(&json!({ "include_issues": false, "max_items": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);
    let updated: Value = updated.json().await.unwrap();
    assert_eq!(updated["include_issues"], false);
    assert_eq!(updated["max_items"], 5);

    // Reddit-only key on a GitHub account
    let wrong_platform = server
        .put(&path)
        .json(&json!({ "include_comments": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_platform.status(), 400);

    let out_of_range = server
        .put(&path)
        .json(&json!({ "max_items": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(out_of_range.status(), 400);

    // null resets
    let reset: Value = server
        .put(&path)
        .json(&json!({ "max_items": null }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["max_items"], Value::Null);
    assert_eq!(reset["include_issues"], false);
}

#[tokio::test]
async fn test_filter_crud() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let account = server
        .connect(profile["id"].as_str().unwrap(), "github", "42")
        .await;
    let path = format!(
        "/api/v1/connections/{}/filters",
        account["id"].as_str().unwrap()
    );

    let created = server
        .post(&path)
        .json(&json!({
            "filter_type": "exclude",
            "filter_key": "repo",
            "filter_value": " secret ",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let created: Value = created.json().await.unwrap();
    assert_eq!(created["filter_value"], "secret");

    let wrong_key = server
        .post(&path)
        .json(&json!({
            "filter_type": "include",
            "filter_key": "subreddit",
            "filter_value": "rust",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_key.status(), 400);

    let listed: Vec<Value> = server.get(&path).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);

    let removed = server
        .delete(&format!("{}/{}", path, created["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);

    let again = server
        .delete(&format!("{}/{}", path, created["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn test_refresh_reports_fetch_status() {
    let server = server_with_github().await;
    let profile = server.create_profile("main").await;
    let account = server
        .connect(profile["id"].as_str().unwrap(), "github", "42")
        .await;
    let account_id = account["id"].as_str().unwrap();

    let filter = server
        .post(&format!("/api/v1/connections/{}/filters", account_id))
        .json(&json!({
            "filter_type": "exclude",
            "filter_key": "repo",
            "filter_value": "secret",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(filter.status(), 201);

    let response = server
        .post(&format!("/api/v1/connections/{}/refresh", account_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let status: Value = response.json().await.unwrap();
    assert_eq!(status["status"], "ok");
    assert_eq!(status["platform"], "github");
    assert_eq!(status["item_count"], 1);
}

#[tokio::test]
async fn test_refresh_all_is_accepted() {
    let server = server_with_github().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();
    let account = server.connect(profile_id, "github", "42").await;

    let response = server
        .post(&format!("/api/v1/profiles/{}/connections/refresh", profile_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["dispatched"], 1);
    assert_eq!(body["account_ids"][0], account["id"]);
}

#[tokio::test]
async fn test_connections_of_other_users_are_hidden() {
    let server = TestServer::new().await;
    let profile = server.create_profile("main").await;
    let profile_id = profile["id"].as_str().unwrap();
    let account = server.connect(profile_id, "github", "42").await;
    let other_key = server.other_user_key().await;

    let list = server
        .client
        .get(server.url(&format!("/api/v1/profiles/{}/connections", profile_id)))
        .bearer_auth(&other_key)
        .send()
        .await
        .unwrap();
    assert_eq!(list.status(), 404);

    let delete = server
        .client
        .delete(server.url(&format!(
            "/api/v1/connections/{}?hard=true",
            account["id"].as_str().unwrap()
        )))
        .bearer_auth(&other_key)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 404);
}
