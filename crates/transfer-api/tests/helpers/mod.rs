//! Test helpers: build AppState and router for integration tests.
//!
//! Everything runs in memory: the memory store, memory blob storage and a
//! manual clock. Background workers are not started; tests drain the job queue
//! with [`TestApp::run_jobs`] and run sweeps through `state.lifecycle`.

#![allow(dead_code)]

pub mod fixtures;

use axum_test::TestServer;
use std::sync::Arc;
use transfer_api::constants;
use transfer_api::setup::{routes, services};
use transfer_api::AppState;
use transfer_core::{
    AcceptedFormats, Config, JobQueueSettings, LifecycleSettings, ManualClock, PromotionSettings,
    StorageBackend, StoreBackend, TransferConfig, UploadPolicy,
};

/// API path prefix for tests (e.g. `/api/v1`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Run every job that is due now.
    pub async fn run_jobs(&self) -> usize {
        self.state
            .queue
            .run_due(&self.state.registry)
            .await
            .expect("Failed to run jobs")
    }
}

pub fn create_test_config() -> TransferConfig {
    TransferConfig {
        environment: "test".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        cors_origins: vec!["*".to_string()],
        store_backend: StoreBackend::Memory,
        database_url: None,
        db_max_connections: 1,
        db_timeout_seconds: 5,
        storage_backend: StorageBackend::Memory,
        temp_storage_path: String::new(),
        permanent_storage_path: String::new(),
        upload_policy: UploadPolicy {
            max_single_upload_mb: 64,
            max_total_upload_mb: 256,
            max_total_upload_count: 40,
            accepted_formats: AcceptedFormats::new()
                .with_group("Document", ["docx", "pdf", "txt"])
                .with_group("Image", ["jpg", "jpeg", "png"]),
        },
        lifecycle: LifecycleSettings::default(),
        promotion: PromotionSettings::default(),
        job_queue: JobQueueSettings::default(),
        smtp: None,
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Setup test app after adjusting the default test configuration.
pub async fn setup_test_app_with(configure: impl FnOnce(&mut TransferConfig)) -> TestApp {
    let mut inner = create_test_config();
    configure(&mut inner);
    let config = Config(Box::new(inner));
    config.validate().expect("Invalid test configuration");

    let clock = ManualClock::default();
    let state = services::initialize_services(&config, Arc::new(clock.clone()))
        .await
        .expect("Failed to initialize services");
    let app = routes::setup_routes(&config, state.clone()).expect("Failed to build routes");
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        state,
        clock,
    }
}
