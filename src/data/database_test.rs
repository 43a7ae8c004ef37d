//! Database tests

use super::*;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::error::AppError;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn profile(user_id: &str, slug: &str) -> Profile {
    let now = Utc::now();
    Profile {
        id: EntityId::new().0,
        user_id: user_id.to_string(),
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        description: None,
        theme: None,
        created_at: now,
        updated_at: now,
    }
}

fn account(profile_id: &str, platform: Platform, platform_user_id: &str, token: &str) -> Account {
    let now = Utc::now();
    Account {
        id: EntityId::new().0,
        profile_id: profile_id.to_string(),
        platform,
        platform_user_id: platform_user_id.to_string(),
        platform_username: Some(format!("{}-name", platform_user_id)),
        access_token_encrypted: Some(token.to_string()),
        refresh_token_encrypted: Some("refresh-1".to_string()),
        token_expires_at: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn filter(account_id: &str, key: FilterKey, value: &str) -> Filter {
    Filter {
        id: EntityId::new().0,
        account_id: account_id.to_string(),
        filter_type: FilterType::Exclude,
        filter_key: key,
        filter_value: value.to_string(),
        created_at: Utc::now(),
    }
}

/// User with one profile
async fn seed(db: &Database) -> (User, Profile) {
    let user = db.create_user("alice").await.unwrap();
    let profile = profile(&user.id, "main");
    db.insert_profile(&profile).await.unwrap();
    (user, profile)
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_user_and_api_key_lookup() {
    let (db, _temp_dir) = create_test_db().await;

    let user = db.create_user("alice").await.unwrap();
    assert_eq!(db.get_user(&user.id).await.unwrap().unwrap().name, "alice");

    db.insert_api_key(&ApiKey {
        id: EntityId::new().0,
        user_id: user.id.clone(),
        name: "laptop".to_string(),
        key_hash: "sha256:abc".to_string(),
        created_at: Utc::now(),
    })
    .await
    .unwrap();

    let found = db.get_user_by_api_key_hash("sha256:abc").await.unwrap();
    assert_eq!(found.unwrap().id, user.id);
    assert!(
        db.get_user_by_api_key_hash("sha256:other")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_profile_slug_unique_per_user() {
    let (db, _temp_dir) = create_test_db().await;
    let (user, _) = seed(&db).await;

    let duplicate = profile(&user.id, "main");
    assert!(matches!(
        db.insert_profile(&duplicate).await,
        Err(AppError::Conflict(_))
    ));

    // Another user may reuse the slug
    let bob = db.create_user("bob").await.unwrap();
    db.insert_profile(&profile(&bob.id, "main")).await.unwrap();

    assert_eq!(db.list_profiles(&user.id).await.unwrap().len(), 1);
    assert_eq!(db.list_profiles(&bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_profile_update_conflict_and_ownership() {
    let (db, _temp_dir) = create_test_db().await;
    let (user, main) = seed(&db).await;

    let mut work = profile(&user.id, "work");
    db.insert_profile(&work).await.unwrap();

    work.slug = "main".to_string();
    assert!(matches!(
        db.update_profile(&work).await,
        Err(AppError::Conflict(_))
    ));

    let bob = db.create_user("bob").await.unwrap();
    assert!(
        db.get_profile_for_user(&bob.id, &main.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.get_profile_for_user(&user.id, &main.id)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_account_upsert_updates_in_place() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;

    let first = db
        .upsert_account(&account(&main.id, Platform::Github, "42", "token-a"))
        .await
        .unwrap();
    db.set_account_active(&first.id, false).await.unwrap();

    let mut again = account(&main.id, Platform::Github, "42", "token-b");
    again.refresh_token_encrypted = None;
    let second = db.upsert_account(&again).await.unwrap();

    assert_eq!(second.id, first.id);
    assert!(second.is_active);
    assert_eq!(second.access_token_encrypted.as_deref(), Some("token-b"));
    // A missing refresh token keeps the stored one
    assert_eq!(second.refresh_token_encrypted.as_deref(), Some("refresh-1"));
    assert_eq!(db.list_accounts(&main.id, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_accounts_respects_active_flag() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;

    let github = db
        .upsert_account(&account(&main.id, Platform::Github, "1", "t"))
        .await
        .unwrap();
    db.upsert_account(&account(&main.id, Platform::Reddit, "2", "t"))
        .await
        .unwrap();
    db.set_account_active(&github.id, false).await.unwrap();

    let active = db.list_accounts(&main.id, false).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].platform, Platform::Reddit);
    assert_eq!(db.list_accounts(&main.id, true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_account_ownership_lookup() {
    let (db, _temp_dir) = create_test_db().await;
    let (user, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Youtube, "chan", "t"))
        .await
        .unwrap();

    let bob = db.create_user("bob").await.unwrap();
    assert!(
        db.get_account_for_user(&bob.id, &stored.id)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        db.get_account_for_user(&user.id, &stored.id)
            .await
            .unwrap()
            .unwrap()
            .platform,
        Platform::Youtube
    );
}

#[tokio::test]
async fn test_update_account_tokens() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Reddit, "r", "old"))
        .await
        .unwrap();

    let expires = Utc::now() + Duration::hours(1);
    assert!(
        db.update_account_tokens(&stored.id, "new", None, Some(expires))
            .await
            .unwrap()
    );

    let reloaded = db.get_account(&stored.id).await.unwrap().unwrap();
    assert_eq!(reloaded.access_token_encrypted.as_deref(), Some("new"));
    assert_eq!(reloaded.refresh_token_encrypted.as_deref(), Some("refresh-1"));
    assert!(reloaded.token_expires_at.is_some());

    assert!(
        !db.update_account_tokens("missing", "x", None, None)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_account_settings_crud() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Reddit, "r", "t"))
        .await
        .unwrap();

    db.set_account_setting(&stored.id, "max_items", "10")
        .await
        .unwrap();
    db.set_account_setting(&stored.id, "include_comments", "false")
        .await
        .unwrap();
    db.set_account_setting(&stored.id, "max_items", "25")
        .await
        .unwrap();

    let settings = db.get_account_settings(&stored.id).await.unwrap();
    assert_eq!(
        settings,
        vec![
            ("include_comments".to_string(), "false".to_string()),
            ("max_items".to_string(), "25".to_string()),
        ]
    );

    db.apply_account_settings(
        &stored.id,
        &[
            ("max_items".to_string(), None),
            ("include_posts".to_string(), Some("false".to_string())),
            ("missing".to_string(), None),
        ],
    )
    .await
    .unwrap();
    assert_eq!(
        db.get_account_settings(&stored.id).await.unwrap(),
        vec![
            ("include_comments".to_string(), "false".to_string()),
            ("include_posts".to_string(), "false".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_account_settings_batch_is_all_or_nothing() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Reddit, "r", "t"))
        .await
        .unwrap();
    db.set_account_setting(&stored.id, "include_comments", "false")
        .await
        .unwrap();

    sqlx::query(
        r#"
        CREATE TRIGGER reject_key BEFORE INSERT ON account_settings
        WHEN NEW.key = 'rejected'
        BEGIN
            SELECT RAISE(ABORT, 'rejected key');
        END
        "#,
    )
    .execute(db.pool())
    .await
    .unwrap();

    let result = db
        .apply_account_settings(
            &stored.id,
            &[
                ("include_comments".to_string(), None),
                ("max_items".to_string(), Some("10".to_string())),
                ("rejected".to_string(), Some("x".to_string())),
            ],
        )
        .await;

    assert!(matches!(result, Err(AppError::Database(_))));
    assert_eq!(
        db.get_account_settings(&stored.id).await.unwrap(),
        vec![("include_comments".to_string(), "false".to_string())]
    );
}

#[tokio::test]
async fn test_filters_are_scoped_to_account() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let github = db
        .upsert_account(&account(&main.id, Platform::Github, "g", "t"))
        .await
        .unwrap();
    let reddit = db
        .upsert_account(&account(&main.id, Platform::Reddit, "r", "t"))
        .await
        .unwrap();

    let repo = filter(&github.id, FilterKey::Repo, "octo/secret");
    db.insert_filter(&repo).await.unwrap();
    db.insert_filter(&filter(&reddit.id, FilterKey::Subreddit, "politics"))
        .await
        .unwrap();

    assert_eq!(db.list_filters(&github.id).await.unwrap().len(), 1);
    let batch = db
        .list_filters_for_accounts(&[github.id.clone(), reddit.id.clone()])
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);
    assert!(db.list_filters_for_accounts(&[]).await.unwrap().is_empty());

    // Wrong account does not delete
    assert!(!db.delete_filter(&reddit.id, &repo.id).await.unwrap());
    assert!(db.delete_filter(&github.id, &repo.id).await.unwrap());
    assert!(db.list_filters(&github.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rate_limit_upsert() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Twitter, "t", "t"))
        .await
        .unwrap();

    assert!(db.get_rate_limit(&stored.id).await.unwrap().is_none());

    let now = Utc::now();
    let mut state = RateLimitState::new(&stored.id);
    state.consecutive_failures = 2;
    state.last_failure_at = Some(now);
    state.circuit_open_until = Some(now + Duration::minutes(2));
    db.upsert_rate_limit(&state).await.unwrap();

    state.consecutive_failures = 0;
    state.circuit_open_until = None;
    state.last_success_at = Some(now);
    db.upsert_rate_limit(&state).await.unwrap();

    let reloaded = db.get_rate_limit(&stored.id).await.unwrap().unwrap();
    assert_eq!(reloaded.consecutive_failures, 0);
    assert!(reloaded.circuit_open_until.is_none());
    assert!(reloaded.last_success_at.is_some());
    assert!(reloaded.last_failure_at.is_some());
}

#[tokio::test]
async fn test_snapshot_upsert() {
    let (db, _temp_dir) = create_test_db().await;
    let (_, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Github, "g", "t"))
        .await
        .unwrap();

    for payload in [r#"{"events":[]}"#, r#"{"events":[{"id":"1"}]}"#] {
        db.upsert_snapshot(&AccountSnapshot {
            account_id: stored.id.clone(),
            payload: payload.to_string(),
            fetched_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    let snapshot = db.get_snapshot(&stored.id).await.unwrap().unwrap();
    assert_eq!(snapshot.payload, r#"{"events":[{"id":"1"}]}"#);
}

#[tokio::test]
async fn test_oauth_nonce_single_use_and_prune() {
    let (db, _temp_dir) = create_test_db().await;

    assert!(db.consume_oauth_nonce("n-1").await.unwrap());
    assert!(!db.consume_oauth_nonce("n-1").await.unwrap());
    assert!(db.consume_oauth_nonce("n-2").await.unwrap());

    // Nothing is older than an hour ago
    assert_eq!(
        db.prune_oauth_nonces(Utc::now() - Duration::hours(1))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        db.prune_oauth_nonces(Utc::now() + Duration::seconds(5))
            .await
            .unwrap(),
        2
    );

    // Pruned nonces could be consumed again; states carrying them have expired
    assert!(db.consume_oauth_nonce("n-1").await.unwrap());
}

#[tokio::test]
async fn test_recent_tasks_ordering() {
    let (db, _temp_dir) = create_test_db().await;
    let (user, _) = seed(&db).await;

    let base = Utc::now() - Duration::hours(3);
    for (offset, title) in [(0, "oldest"), (2, "newest"), (1, "middle")] {
        let at = base + Duration::hours(offset);
        db.insert_task(&Task {
            id: EntityId::new().0,
            user_id: user.id.clone(),
            project: Some("chronofeed".to_string()),
            title: title.to_string(),
            description: None,
            status: "todo".to_string(),
            priority: "medium".to_string(),
            created_at: at,
            updated_at: at,
        })
        .await
        .unwrap();
    }

    let titles: Vec<String> = db
        .get_recent_tasks(&user.id, 2, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.title)
        .collect();
    assert_eq!(titles, vec!["newest", "middle"]);

    let rest = db.get_recent_tasks(&user.id, 2, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].title, "oldest");
}

#[tokio::test]
async fn test_profile_delete_cascades() {
    let (db, _temp_dir) = create_test_db().await;
    let (user, main) = seed(&db).await;
    let stored = db
        .upsert_account(&account(&main.id, Platform::Github, "g", "t"))
        .await
        .unwrap();
    db.insert_filter(&filter(&stored.id, FilterKey::Keyword, "spoiler"))
        .await
        .unwrap();
    db.set_account_setting(&stored.id, "max_items", "5")
        .await
        .unwrap();
    db.upsert_rate_limit(&RateLimitState::new(&stored.id))
        .await
        .unwrap();
    db.upsert_snapshot(&AccountSnapshot {
        account_id: stored.id.clone(),
        payload: "{}".to_string(),
        fetched_at: Utc::now(),
    })
    .await
    .unwrap();

    assert!(db.delete_profile(&main.id).await.unwrap());

    assert!(db.get_account(&stored.id).await.unwrap().is_none());
    assert!(db.list_filters(&stored.id).await.unwrap().is_empty());
    assert!(db.get_account_settings(&stored.id).await.unwrap().is_empty());
    assert!(db.get_rate_limit(&stored.id).await.unwrap().is_none());
    assert!(db.get_snapshot(&stored.id).await.unwrap().is_none());
    assert!(db.list_profiles(&user.id).await.unwrap().is_empty());
}
