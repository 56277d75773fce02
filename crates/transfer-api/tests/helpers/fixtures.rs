//! Request fixtures shared by the API tests.

use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestResponse, TestServer};
use serde_json::Value;

use super::api_path;

/// Open a session and return its token.
pub async fn create_session(client: &TestServer) -> String {
    let response = client.post(&api_path("/sessions")).await;
    assert_eq!(response.status_code(), 201, "create session");
    let body: Value = response.json();
    body["token"]
        .as_str()
        .expect("session token in response")
        .to_string()
}

pub async fn upload(client: &TestServer, token: &str, filename: &str, data: Vec<u8>) -> TestResponse {
    let part = Part::bytes(data)
        .file_name(filename.to_string())
        .mime_type("application/octet-stream");
    client
        .post(&api_path(&format!("/sessions/{}/files", token)))
        .multipart(MultipartForm::new().add_part("file", part))
        .await
}

pub async fn get_session(client: &TestServer, token: &str) -> TestResponse {
    client
        .get(&api_path(&format!("/sessions/{}", token)))
        .await
}

pub async fn session_action(client: &TestServer, token: &str, action: &str) -> TestResponse {
    client
        .post(&api_path(&format!("/sessions/{}/{}", token, action)))
        .await
}

/// `n` bytes of filler.
pub fn bytes(n: usize) -> Vec<u8> {
    vec![b'x'; n]
}

pub const MB: usize = 1024 * 1024;
