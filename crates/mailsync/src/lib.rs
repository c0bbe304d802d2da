//! Mailsync crate - Mailbox synchronization scheduling and email merging
//!
//! This crate provides:
//! - Domain models (MailboxOrigin, EmailMessage, EmailAddress, EmailFolder)
//! - Storage trait abstractions with in-memory and SQLite implementations
//! - The synchronization scheduler: hang recovery, priority-based origin
//!   selection and the per-origin state machine
//! - The entity batch that merges parsed mail into storage by natural key
//!
//! Protocol work (IMAP, POP3) is supplied by callers as
//! [`SynchronizationProcessor`] implementations registered per origin kind.
//! The crate logs through the `log` facade and never installs a logger.

pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;

pub use batch::{BatchChange, EmailOwnerProvider, EntityBatch, PersistStats};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::{BatchError, SyncError};
pub use models::{
    EmailAddress, EmailFolder, EmailMessage, FolderType, MailboxOrigin, OriginId, OriginKind,
    SyncCode,
};
pub use storage::{EmailEntityStore, InMemoryMailStore, OriginRepository, SqliteMailStore};
pub use sync::{
    EmailSynchronizer, HangRecovery, OriginSelector, ProcessorRegistry, SyncOutcome,
    SynchronizationProcessor,
};
