//! Notification delivery
//!
//! Lifecycle code never sends mail directly: it enqueues a `SendNotification`
//! job, and [`SendNotificationHandler`] hands it to a [`NotificationSender`].
//! Delivery failures are logged and the job still completes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use transfer_core::models::{Job, NotificationTemplate, SendNotificationPayload};
use transfer_core::{Clock, JobResultExt, SmtpSettings};
use transfer_db::SessionStore;
use transfer_worker::JobHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

impl RenderedNotification {
    pub fn render(template: NotificationTemplate, context: &Value) -> Self {
        let field = |name: &str| context.get(name).and_then(Value::as_str).unwrap_or("");
        let token = field("session_token");
        let title = match field("title") {
            "" => "your transfer".to_string(),
            title => format!("\"{}\"", title),
        };
        let file_count = context
            .get("file_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let (subject, body) = match template {
            NotificationTemplate::SubmissionReceived => (
                "Thank you for your submission".to_string(),
                format!(
                    "Thank you! We received {} file(s) for {}.\nReference: {}",
                    file_count, title, token
                ),
            ),
            NotificationTemplate::SubmissionReceivedAdmin => (
                "New submission received".to_string(),
                format!(
                    "A new submission with {} file(s) was stored.\nSession: {}\nSubmitted by: {}",
                    file_count,
                    token,
                    field("user_email")
                ),
            ),
            NotificationTemplate::SubmissionFailed => (
                "Your submission did not go through".to_string(),
                format!(
                    "Your submission did not go through. Your files could not be saved after {} attempt(s).\nReference: {}",
                    context.get("attempts").and_then(Value::as_u64).unwrap_or(0),
                    token
                ),
            ),
            NotificationTemplate::SubmissionFailedAdmin => (
                "Submission failed to store".to_string(),
                format!(
                    "Copying session {} to permanent storage failed after {} attempt(s).\nLast error: {}",
                    token,
                    context.get("attempts").and_then(Value::as_u64).unwrap_or(0),
                    field("last_error")
                ),
            ),
            NotificationTemplate::SessionExpiring => (
                "Your uploaded files will expire soon".to_string(),
                format!(
                    "The files uploaded for {} will expire at {} unless you return to your submission.",
                    title,
                    field("expires_at")
                ),
            ),
        };

        Self { subject, body }
    }
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipients: &[String],
        context: &Value,
    ) -> Result<()>;
}

/// Sends plain-text email over SMTP.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings
            .from
            .parse()
            .with_context(|| format!("Invalid SMTP_FROM: {}", settings.from))?;

        let builder = if settings.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .context("Failed to build SMTP STARTTLS transport")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };
        let builder = builder.port(settings.port);
        let builder = match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            tls = settings.tls,
            "Notification sender initialized (SMTP)"
        );

        Ok(Self {
            mailer: Arc::new(builder.build()),
            from,
        })
    }
}

#[async_trait]
impl NotificationSender for SmtpNotifier {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipients: &[String],
        context: &Value,
    ) -> Result<()> {
        let to: Vec<Mailbox> = recipients.iter().filter_map(|r| r.parse().ok()).collect();
        if to.is_empty() {
            return Err(anyhow!("No valid recipient addresses"));
        }

        let rendered = RenderedNotification::render(template, context);
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(rendered.subject);
        for mailbox in to {
            builder = builder.to(mailbox);
        }
        let email = builder
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .context("Failed to build notification email")?;

        self.mailer
            .send(email)
            .await
            .context("SMTP delivery failed")?;
        tracing::info!(template = %template, count = recipients.len(), "Notification email sent");
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them. Used when SMTP is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipients: &[String],
        context: &Value,
    ) -> Result<()> {
        let rendered = RenderedNotification::render(template, context);
        tracing::info!(
            template = %template,
            recipients = ?recipients,
            subject = %rendered.subject,
            "Notification (SMTP not configured, not sent)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub template: NotificationTemplate,
    pub recipients: Vec<String>,
    pub context: Value,
}

/// Keeps every notification in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, template: NotificationTemplate) -> usize {
        self.sent().iter().filter(|n| n.template == template).count()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipients: &[String],
        context: &Value,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentNotification {
                template,
                recipients: recipients.to_vec(),
                context: context.clone(),
            });
        Ok(())
    }
}

/// Job handler for `send_notification`.
pub struct SendNotificationHandler {
    sender: Arc<dyn NotificationSender>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
}

impl SendNotificationHandler {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            sessions,
            clock,
            idle_timeout,
        }
    }

    /// An expiry reminder is stale once the session has moved on or been
    /// touched again after the reminder was scheduled.
    async fn reminder_skip_reason(&self, context: &Value) -> Result<Option<&'static str>> {
        let Some(token) = context.get("session_token").and_then(Value::as_str) else {
            return Ok(Some("no session"));
        };
        let Some(session) = self.sessions.get_session(token).await? else {
            return Ok(Some("session deleted"));
        };
        if !session.status.accepts_uploads() {
            return Ok(Some("session no longer open"));
        }
        let scheduled_for = context
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if let Some(scheduled_for) = scheduled_for {
            if session.expires_at(self.idle_timeout) > scheduled_for {
                return Ok(Some("session touched since reminder was scheduled"));
            }
        }
        if session.is_idle(self.clock.now(), self.idle_timeout) {
            return Ok(Some("session already expired"));
        }
        Ok(None)
    }
}

#[async_trait]
impl JobHandler for SendNotificationHandler {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn handle(&self, job: &Job) -> Result<Value> {
        let payload: SendNotificationPayload = job
            .try_payload_as()
            .unrecoverable()?;

        if payload.template == NotificationTemplate::SessionExpiring {
            if let Some(reason) = self.reminder_skip_reason(&payload.context).await? {
                tracing::info!(reason, "Skipping stale expiry reminder");
                return Ok(json!({ "sent": false, "skipped": reason }));
            }
        }

        match self
            .sender
            .send(payload.template, &payload.recipients, &payload.context)
            .await
        {
            Ok(()) => Ok(json!({ "sent": true, "recipients": payload.recipients.len() })),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    template = %payload.template,
                    "Failed to deliver notification"
                );
                Ok(json!({ "sent": false, "error": e.to_string() }))
            }
        }
    }
}
