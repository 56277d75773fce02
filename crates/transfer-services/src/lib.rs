//! Transfer Services Layer
//!
//! Business logic for the upload session lifecycle. The API crate stays a thin
//! HTTP shell over [`SessionService`]; the job queue drives
//! [`PromotionService`] and notification delivery; the [`Scheduler`] drives
//! [`LifecycleService`].

pub mod lifecycle;
pub mod notifications;
pub mod promotion;
pub mod scheduler;
pub mod sessions;

#[cfg(test)]
mod testing;

pub use lifecycle::{LifecycleService, SweepReport};
pub use notifications::{
    LogNotifier, NotificationSender, RecordingNotifier, RenderedNotification,
    SendNotificationHandler, SmtpNotifier,
};
pub use promotion::{PromoteSessionHandler, PromotionOutcome, PromotionService};
pub use scheduler::{ScheduledJob, Scheduler, SchedulerHandle};
pub use sessions::SessionService;
