//! Data models for the upload service
//!
//! Sessions, their files, the drafts that keep them alive, and the jobs
//! that move them along.

mod draft;
mod file;
mod job;
mod notification;
mod session;
mod transfer;
mod user;

pub use draft::*;
pub use file::*;
pub use job::*;
pub use notification::*;
pub use session::*;
pub use transfer::*;
pub use user::*;
