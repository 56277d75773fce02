//! Draft API tests.
//!
//! Run with: `cargo test -p transfer-api --test drafts_test`

mod helpers;

use helpers::fixtures::{bytes, create_session, get_session, session_action, upload};
use helpers::{api_path, setup_test_app};
use serde_json::{json, Value};

#[tokio::test]
async fn test_save_and_abandon_draft() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client
        .post(&api_path("/drafts"))
        .json(&json!({ "title": "Annual report" }))
        .await;
    assert_eq!(response.status_code(), 201);
    let draft: Value = response.json();
    let id = draft["id"].as_str().unwrap().to_string();
    assert_eq!(draft["title"], "Annual report");

    let response = client.delete(&api_path(&format!("/drafts/{}", id))).await;
    assert_eq!(response.status_code(), 204);

    let response = client.delete(&api_path(&format!("/drafts/{}", id))).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_update_draft_keeps_id() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let draft: Value = client
        .post(&api_path("/drafts"))
        .json(&json!({ "title": "First", "session_token": token }))
        .await
        .json();

    let response = client
        .post(&api_path("/drafts"))
        .json(&json!({ "id": draft["id"], "title": "Second", "session_token": token }))
        .await;
    assert_eq!(response.status_code(), 201);
    let updated: Value = response.json();
    assert_eq!(updated["id"], draft["id"]);
    assert_eq!(updated["title"], "Second");
}

#[tokio::test]
async fn test_session_can_only_back_one_draft() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let first = client
        .post(&api_path("/drafts"))
        .json(&json!({ "session_token": token }))
        .await;
    assert_eq!(first.status_code(), 201);

    let second = client
        .post(&api_path("/drafts"))
        .json(&json!({ "session_token": token }))
        .await;
    assert_eq!(second.status_code(), 409);
}

#[tokio::test]
async fn test_unknown_draft_and_session() {
    let app = setup_test_app().await;
    let client = app.client();

    let response = client
        .post(&api_path("/drafts"))
        .json(&json!({ "id": uuid::Uuid::new_v4() }))
        .await;
    assert_eq!(response.status_code(), 404);

    let response = client
        .post(&api_path("/drafts"))
        .json(&json!({ "session_token": "ef".repeat(32) }))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_finalize_completes_draft() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;
    upload(client, &token, "a.pdf", bytes(5)).await;

    let draft: Value = client
        .post(&api_path("/drafts"))
        .json(&json!({ "session_token": token }))
        .await
        .json();

    assert_eq!(session_action(client, &token, "finalize").await.status_code(), 200);
    assert_eq!(get_session(client, &token).await.status_code(), 200);

    let id = draft["id"].as_str().unwrap();
    let response = client.delete(&api_path(&format!("/drafts/{}", id))).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_draft_title_length_is_validated() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post(&api_path("/drafts"))
        .json(&json!({ "title": "x".repeat(300) }))
        .await;
    assert_eq!(response.status_code(), 400);
}
