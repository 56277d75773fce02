//! Configuration module
//!
//! Settings are read once from the environment (and `.env`, if present) when
//! the process starts. Each subsystem gets its own settings struct so it can
//! be built directly in tests without touching the environment.

use std::env;
use std::str::FromStr;

use chrono::Duration;

use crate::admission::{AcceptedFormats, UploadPolicy, BYTES_PER_MB};
use crate::storage_types::{StorageBackend, StoreBackend};

const SERVER_PORT: u16 = 3000;
const DB_MAX_CONNECTIONS: u32 = 10;
const DB_TIMEOUT_SECS: u64 = 30;
const IDLE_TIMEOUT_MINUTES: i64 = 1440;
const REMINDER_LEAD_MINUTES: i64 = 60;
const SWEEP_INTERVAL_SECS: u64 = 120;
const STORED_RETENTION_DAYS: i64 = 0;
const MAX_COPY_RETRIES: u32 = 2;
const COPY_ATTEMPT_TIMEOUT_SECS: u64 = 300;
const MAX_SINGLE_UPLOAD_SIZE_MB: u64 = 64;
const MAX_TOTAL_UPLOAD_SIZE_MB: u64 = 256;
const MAX_TOTAL_UPLOAD_COUNT: u64 = 40;
const ACCEPTED_FILE_FORMATS: &str = "Archive:zip;Audio:mp3,wav,flac;Document:docx,odt,pdf,txt,html;Image:jpg,jpeg,png,gif;Spreadsheet:xlsx,csv;Video:mkv,mp4";
const SMTP_PORT: u16 = 587;
const JOB_MAX_WORKERS: usize = 4;
const JOB_POLL_INTERVAL_MS: u64 = 1000;
const JOB_TIMEOUT_SECS: u64 = 900;
const JOB_MAX_ATTEMPTS: i32 = 3;

/// Idle expiry, reminders and reaping.
#[derive(Clone, Debug)]
pub struct LifecycleSettings {
    pub idle_timeout_minutes: i64,
    pub reminder_lead_minutes: i64,
    pub sweep_interval_secs: u64,
    /// 0 keeps stored sessions forever.
    pub stored_retention_days: i64,
}

impl LifecycleSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::minutes(self.idle_timeout_minutes)
    }

    pub fn reminder_lead(&self) -> Duration {
        Duration::minutes(self.reminder_lead_minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stored_retention(&self) -> Option<Duration> {
        (self.stored_retention_days > 0).then(|| Duration::days(self.stored_retention_days))
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: IDLE_TIMEOUT_MINUTES,
            reminder_lead_minutes: REMINDER_LEAD_MINUTES,
            sweep_interval_secs: SWEEP_INTERVAL_SECS,
            stored_retention_days: STORED_RETENTION_DAYS,
        }
    }
}

/// Copying a finalized session into permanent storage.
#[derive(Clone, Debug)]
pub struct PromotionSettings {
    /// Whole-session attempts before giving up.
    pub max_copy_retries: u32,
    pub copy_attempt_timeout_secs: u64,
    pub admin_notification_emails: Vec<String>,
}

impl PromotionSettings {
    pub fn copy_attempt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.copy_attempt_timeout_secs)
    }
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            max_copy_retries: MAX_COPY_RETRIES,
            copy_attempt_timeout_secs: COPY_ATTEMPT_TIMEOUT_SECS,
            admin_notification_emails: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub tls: bool,
}

#[derive(Clone, Debug)]
pub struct JobQueueSettings {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub timeout_seconds: u64,
    pub max_attempts: i32,
}

impl Default for JobQueueSettings {
    fn default() -> Self {
        Self {
            max_workers: JOB_MAX_WORKERS,
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            timeout_seconds: JOB_TIMEOUT_SECS,
            max_attempts: JOB_MAX_ATTEMPTS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub environment: String,
    pub server_host: String,
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage_backend: StorageBackend,
    pub temp_storage_path: String,
    pub permanent_storage_path: String,
    pub upload_policy: UploadPolicy,
    pub lifecycle: LifecycleSettings,
    pub promotion: PromotionSettings,
    pub job_queue: JobQueueSettings,
    pub smtp: Option<SmtpSettings>,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<TransferConfig>);

impl Config {
    fn inner(&self) -> &TransferConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = TransferConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn is_production(&self) -> bool {
        let env = self.inner().environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_host(&self) -> &str {
        &self.inner().server_host
    }

    pub fn server_port(&self) -> u16 {
        self.inner().server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().cors_origins
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.inner().store_backend
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn temp_storage_path(&self) -> &str {
        &self.inner().temp_storage_path
    }

    pub fn permanent_storage_path(&self) -> &str {
        &self.inner().permanent_storage_path
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.inner().upload_policy
    }

    pub fn lifecycle(&self) -> &LifecycleSettings {
        &self.inner().lifecycle
    }

    pub fn promotion(&self) -> &PromotionSettings {
        &self.inner().promotion
    }

    pub fn job_queue(&self) -> &JobQueueSettings {
        &self.inner().job_queue
    }

    pub fn smtp(&self) -> Option<&SmtpSettings> {
        self.inner().smtp.as_ref()
    }

    /// Largest request body worth reading: one file at the per-file cap plus multipart overhead.
    pub fn max_request_body_bytes(&self) -> usize {
        let file_cap = self.upload_policy().max_file_mb() * BYTES_PER_MB;
        (file_cap + BYTES_PER_MB) as usize
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl TransferConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let store_backend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| StoreBackend::Postgres.to_string())
            .parse::<StoreBackend>()?;
        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| StorageBackend::Local.to_string())
            .parse::<StorageBackend>()?;

        let accepted_formats = AcceptedFormats::parse(
            &env::var("ACCEPTED_FILE_FORMATS").unwrap_or_else(|_| ACCEPTED_FILE_FORMATS.to_string()),
        )?;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpSettings {
                host,
                port: env_or("SMTP_PORT", SMTP_PORT),
                username: env::var("SMTP_USERNAME").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
                from: env::var("SMTP_FROM")
                    .map_err(|_| anyhow::anyhow!("SMTP_FROM must be set when SMTP_HOST is set"))?,
                tls: env_or("SMTP_TLS", true),
            }),
            _ => None,
        };

        Ok(TransferConfig {
            environment,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env_or("SERVER_PORT", SERVER_PORT),
            cors_origins,
            store_backend,
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            storage_backend,
            temp_storage_path: env::var("TEMP_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/uploads/temp".to_string()),
            permanent_storage_path: env::var("PERMANENT_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/uploads/permanent".to_string()),
            upload_policy: UploadPolicy {
                max_single_upload_mb: env_or("MAX_SINGLE_UPLOAD_SIZE_MB", MAX_SINGLE_UPLOAD_SIZE_MB),
                max_total_upload_mb: env_or("MAX_TOTAL_UPLOAD_SIZE_MB", MAX_TOTAL_UPLOAD_SIZE_MB),
                max_total_upload_count: env_or("MAX_TOTAL_UPLOAD_COUNT", MAX_TOTAL_UPLOAD_COUNT),
                accepted_formats,
            },
            lifecycle: LifecycleSettings {
                idle_timeout_minutes: env_or(
                    "UPLOAD_SESSION_IDLE_TIMEOUT_MINUTES",
                    IDLE_TIMEOUT_MINUTES,
                ),
                reminder_lead_minutes: env_or(
                    "UPLOAD_SESSION_REMINDER_LEAD_MINUTES",
                    REMINDER_LEAD_MINUTES,
                ),
                sweep_interval_secs: env_or("SESSION_SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS),
                stored_retention_days: env_or(
                    "STORED_SESSION_RETENTION_DAYS",
                    STORED_RETENTION_DAYS,
                ),
            },
            promotion: PromotionSettings {
                max_copy_retries: env_or("MAX_COPY_RETRIES", MAX_COPY_RETRIES),
                copy_attempt_timeout_secs: env_or(
                    "COPY_ATTEMPT_TIMEOUT_SECS",
                    COPY_ATTEMPT_TIMEOUT_SECS,
                ),
                admin_notification_emails: env_list("ADMIN_NOTIFICATION_EMAILS"),
            },
            job_queue: JobQueueSettings {
                max_workers: env_or("JOB_MAX_WORKERS", JOB_MAX_WORKERS),
                poll_interval_ms: env_or("JOB_POLL_INTERVAL_MS", JOB_POLL_INTERVAL_MS),
                timeout_seconds: env_or("JOB_TIMEOUT_SECONDS", JOB_TIMEOUT_SECS),
                max_attempts: env_or("JOB_MAX_ATTEMPTS", JOB_MAX_ATTEMPTS),
            },
            smtp,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let production = matches!(self.environment.to_lowercase().as_str(), "production" | "prod");
        if production && self.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.store_backend == StoreBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string when STORE_BACKEND=postgres"
                    ))
                }
            }
        }

        let policy = &self.upload_policy;
        if policy.max_single_upload_mb == 0
            || policy.max_total_upload_mb == 0
            || policy.max_total_upload_count == 0
        {
            return Err(anyhow::anyhow!(
                "MAX_SINGLE_UPLOAD_SIZE_MB, MAX_TOTAL_UPLOAD_SIZE_MB and MAX_TOTAL_UPLOAD_COUNT must be greater than 0"
            ));
        }
        if policy.accepted_formats.is_empty() {
            return Err(anyhow::anyhow!(
                "ACCEPTED_FILE_FORMATS must name at least one extension"
            ));
        }

        if self.promotion.max_copy_retries == 0 {
            return Err(anyhow::anyhow!("MAX_COPY_RETRIES must be at least 1"));
        }
        if self.promotion.copy_attempt_timeout_secs == 0 {
            return Err(anyhow::anyhow!("COPY_ATTEMPT_TIMEOUT_SECS must be greater than 0"));
        }

        let lifecycle = &self.lifecycle;
        if lifecycle.idle_timeout_minutes <= 0 || lifecycle.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_IDLE_TIMEOUT_MINUTES and SESSION_SWEEP_INTERVAL_SECS must be greater than 0"
            ));
        }
        if lifecycle.reminder_lead_minutes < 0
            || lifecycle.reminder_lead_minutes >= lifecycle.idle_timeout_minutes
        {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_REMINDER_LEAD_MINUTES must be between 0 and the idle timeout"
            ));
        }

        if self.job_queue.max_workers == 0 {
            return Err(anyhow::anyhow!("JOB_MAX_WORKERS must be greater than 0"));
        }

        // Every copy attempt has to fit inside one run of the promotion job.
        let promotion_budget_secs = u64::from(self.promotion.max_copy_retries)
            .saturating_mul(self.promotion.copy_attempt_timeout_secs);
        if self.job_queue.timeout_seconds <= promotion_budget_secs {
            return Err(anyhow::anyhow!(
                "JOB_TIMEOUT_SECONDS ({}) must exceed MAX_COPY_RETRIES * COPY_ATTEMPT_TIMEOUT_SECS ({})",
                self.job_queue.timeout_seconds,
                promotion_budget_secs
            ));
        }
        if (lifecycle.idle_timeout_minutes as u64).saturating_mul(60) <= self.job_queue.timeout_seconds {
            return Err(anyhow::anyhow!(
                "UPLOAD_SESSION_IDLE_TIMEOUT_MINUTES must be longer than JOB_TIMEOUT_SECONDS"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransferConfig {
        TransferConfig {
            environment: "development".to_string(),
            server_host: "127.0.0.1".to_string(),
            server_port: SERVER_PORT,
            cors_origins: vec!["*".to_string()],
            store_backend: StoreBackend::Memory,
            database_url: None,
            db_max_connections: DB_MAX_CONNECTIONS,
            db_timeout_seconds: DB_TIMEOUT_SECS,
            storage_backend: StorageBackend::Memory,
            temp_storage_path: "/tmp/temp".to_string(),
            permanent_storage_path: "/tmp/permanent".to_string(),
            upload_policy: UploadPolicy {
                max_single_upload_mb: MAX_SINGLE_UPLOAD_SIZE_MB,
                max_total_upload_mb: MAX_TOTAL_UPLOAD_SIZE_MB,
                max_total_upload_count: MAX_TOTAL_UPLOAD_COUNT,
                accepted_formats: AcceptedFormats::parse(ACCEPTED_FILE_FORMATS).unwrap(),
            },
            lifecycle: LifecycleSettings::default(),
            promotion: PromotionSettings::default(),
            job_queue: JobQueueSettings::default(),
            smtp: None,
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_default_accepted_formats_parse() {
        let formats = AcceptedFormats::parse(ACCEPTED_FILE_FORMATS).unwrap();
        assert!(formats.allows("pdf"));
        assert!(formats.allows("mkv"));
        assert!(!formats.allows("exe"));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let mut config = config();
        config.store_backend = StoreBackend::Postgres;
        assert!(config.validate().is_err());
        config.database_url = Some("postgresql://localhost/transfer".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reminder_lead_must_fit_inside_idle_timeout() {
        let mut config = config();
        config.lifecycle.reminder_lead_minutes = config.lifecycle.idle_timeout_minutes;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = config();
        config.promotion.max_copy_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_timeout_must_cover_every_copy_attempt() {
        let mut config = config();
        assert!(
            config.job_queue.timeout_seconds
                > u64::from(config.promotion.max_copy_retries)
                    * config.promotion.copy_attempt_timeout_secs
        );

        config.promotion.copy_attempt_timeout_secs = 600;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("JOB_TIMEOUT_SECONDS"));

        config.job_queue.timeout_seconds = 1201;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_idle_timeout_must_outlast_a_promotion_job() {
        let mut config = config();
        config.lifecycle.idle_timeout_minutes = 15;
        config.lifecycle.reminder_lead_minutes = 5;
        assert!(config.validate().is_err());

        config.lifecycle.idle_timeout_minutes = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wildcard_cors_rejected_in_production() {
        let mut config = config();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lifecycle_durations() {
        let lifecycle = LifecycleSettings::default();
        assert_eq!(lifecycle.idle_timeout(), Duration::minutes(1440));
        assert_eq!(lifecycle.sweep_interval(), std::time::Duration::from_secs(120));
        assert!(lifecycle.stored_retention().is_none());
    }
}
