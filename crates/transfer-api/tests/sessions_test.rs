//! Upload session API integration tests.
//!
//! Run with: `cargo test -p transfer-api --test sessions_test`

mod helpers;

use chrono::Duration;
use helpers::fixtures::{bytes, create_session, get_session, session_action, upload, MB};
use helpers::{api_path, setup_test_app, setup_test_app_with};
use serde_json::{json, Value};

#[tokio::test]
async fn test_create_and_get_session() {
    let app = setup_test_app().await;
    let client = app.client();

    let token = create_session(client).await;
    assert_eq!(token.len(), 64);

    let response = get_session(client, &token).await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "CREATED");
    assert_eq!(body["file_count"], 0);
}

#[tokio::test]
async fn test_create_session_with_owner() {
    let app = setup_test_app().await;
    let user_id = uuid::Uuid::new_v4();

    let response = app
        .client()
        .post(&api_path("/sessions"))
        .json(&json!({ "user_id": user_id }))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["user_id"], user_id.to_string());
}

#[tokio::test]
async fn test_unknown_and_malformed_tokens_are_not_found() {
    let app = setup_test_app().await;
    let client = app.client();

    let unknown = "ab".repeat(32);
    assert_eq!(get_session(client, &unknown).await.status_code(), 404);
    assert_eq!(get_session(client, "not-a-token").await.status_code(), 404);

    let body: Value = get_session(client, "not-a-token").await.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_upload_moves_session_to_uploading() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let response = upload(client, &token, "report.pdf", bytes(1024)).await;
    assert_eq!(response.status_code(), 200);
    let file: Value = response.json();
    assert_eq!(file["name"], "report.pdf");
    assert_eq!(file["size_bytes"], 1024);
    assert_eq!(file["tier"], "TEMPORARY");

    let session: Value = get_session(client, &token).await.json();
    assert_eq!(session["status"], "UPLOADING");
    assert_eq!(session["file_count"], 1);
    assert_eq!(session["total_size_bytes"], 1024);
}

#[tokio::test]
async fn test_empty_file_is_rejected() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let response = upload(client, &token, "report.pdf", Vec::new()).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["accepted"], false);
    assert_eq!(body["code"], "empty_file");
    assert_eq!(body["error"], "File is empty.");

    let session: Value = get_session(client, &token).await.json();
    assert_eq!(session["status"], "CREATED");
    assert_eq!(session["file_count"], 0);
}

#[tokio::test]
async fn test_file_count_cap() {
    let app = setup_test_app_with(|c| c.upload_policy.max_total_upload_count = 4).await;
    let client = app.client();
    let token = create_session(client).await;

    for i in 0..4 {
        let response = upload(client, &token, &format!("page{}.txt", i), bytes(10)).await;
        assert_eq!(response.status_code(), 200);
    }

    let response = upload(client, &token, "page4.txt", bytes(10)).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "too_many_files");
    assert_eq!(body["error"], "You can not upload anymore files.");
}

#[tokio::test]
async fn test_total_size_cap_answers_413() {
    let app = setup_test_app_with(|c| {
        c.upload_policy.max_single_upload_mb = 3;
        c.upload_policy.max_total_upload_mb = 3;
    })
    .await;
    let client = app.client();
    let token = create_session(client).await;

    let response = upload(client, &token, "scan.jpg", bytes(MB * 5 / 2)).await;
    assert_eq!(response.status_code(), 200);

    let response = upload(client, &token, "scan2.jpg", bytes(MB)).await;
    assert_eq!(response.status_code(), 413);
    let body: Value = response.json();
    assert_eq!(body["code"], "total_size_exceeded");
    assert_eq!(body["error"], "Maximum total upload size (3 MB) exceeded");
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    assert_eq!(upload(client, &token, "a.pdf", bytes(5)).await.status_code(), 200);
    let response = upload(client, &token, "a.pdf", bytes(5)).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "duplicate_name");
}

#[tokio::test]
async fn test_upload_without_file_field_is_bad_request() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let form = axum_test::multipart::MultipartForm::new().add_text("note", "hello");
    let response = client
        .post(&api_path(&format!("/sessions/{}/files", token)))
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_remove_file() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;
    upload(client, &token, "a.pdf", bytes(5)).await;
    upload(client, &token, "b.pdf", bytes(7)).await;

    let response = client
        .delete(&api_path(&format!("/sessions/{}/files/a.pdf", token)))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["file_count"], 1);
    assert_eq!(body["total_size_bytes"], 7);

    let response = client
        .delete(&api_path(&format!("/sessions/{}/files/a.pdf", token)))
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_finalize_promotes_session() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;
    upload(client, &token, "report.pdf", bytes(2048)).await;

    let response = session_action(client, &token, "finalize").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "COPY_IN_PROGRESS");

    // A second finalize while the copy is in flight conflicts
    let response = session_action(client, &token, "finalize").await;
    assert_eq!(response.status_code(), 409);

    assert!(app.run_jobs().await >= 1);

    let body: Value = get_session(client, &token).await.json();
    assert_eq!(body["status"], "STORED");
    assert_eq!(body["file_count"], 0);
    assert_eq!(body["files"][0]["tier"], "PERMANENT");

    // Finished sessions stay finished
    assert_eq!(session_action(client, &token, "finalize").await.status_code(), 409);
    assert_eq!(
        upload(client, &token, "late.pdf", bytes(5)).await.status_code(),
        409
    );
}

#[tokio::test]
async fn test_finalize_without_files_is_bad_request() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let response = session_action(client, &token, "finalize").await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_retry_requires_failed_copy() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;

    let response = session_action(client, &token, "retry").await;
    assert_eq!(response.status_code(), 409);
}

#[tokio::test]
async fn test_idle_unreferenced_session_is_deleted() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;
    upload(client, &token, "a.pdf", bytes(5)).await;

    app.clock.advance(Duration::minutes(24 * 60 + 1));
    app.state.lifecycle.run_tick().await.expect("sweep");

    assert_eq!(get_session(client, &token).await.status_code(), 404);
}

#[tokio::test]
async fn test_idle_referenced_session_expires_and_resumes() {
    let app = setup_test_app().await;
    let client = app.client();
    let token = create_session(client).await;
    upload(client, &token, "a.pdf", bytes(5)).await;

    let response = client
        .post(&api_path("/drafts"))
        .json(&json!({ "session_token": token, "title": "Board minutes" }))
        .await;
    assert_eq!(response.status_code(), 201);

    app.clock.advance(Duration::minutes(24 * 60 + 1));
    app.state.lifecycle.run_tick().await.expect("sweep");

    let body: Value = get_session(client, &token).await.json();
    assert_eq!(body["status"], "EXPIRED");

    assert_eq!(session_action(client, &token, "finalize").await.status_code(), 410);
    assert_eq!(upload(client, &token, "b.pdf", bytes(5)).await.status_code(), 410);

    let response = session_action(client, &token, "resume").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "CREATED");
    assert_eq!(body["file_count"], 0);

    assert_eq!(upload(client, &token, "b.pdf", bytes(5)).await.status_code(), 200);
}
