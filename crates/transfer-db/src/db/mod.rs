//! Postgres repositories
//!
//! One repository per table group, each implementing the matching trait from
//! [`crate::store`].

mod draft;
mod job;
mod session;
mod user;

pub use draft::DraftRepository;
pub use job::JobRepository;
pub use session::SessionRepository;
pub use user::UserRepository;
