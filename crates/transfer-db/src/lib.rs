//! Persistence for upload sessions, drafts and background jobs
//!
//! `store` defines the traits, `db` the Postgres repositories and `memory`
//! an in-process implementation of all of them.

pub mod db;
pub mod memory;
pub mod store;

pub use db::{DraftRepository, JobRepository, SessionRepository, UserRepository};
pub use memory::MemoryStore;
pub use store::{
    AddFileOutcome, DraftReference, DraftStore, FileLimits, JobStore, SessionStore, UserStore,
};
