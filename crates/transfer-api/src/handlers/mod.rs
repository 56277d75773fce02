pub mod drafts;
pub mod health;
pub mod sessions;
pub mod uploads;
