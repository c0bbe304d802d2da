//! Scheduling of mailbox synchronization
//!
//! Each [`EmailSynchronizer::sync`] call recovers hung origins, selects the
//! most urgent eligible origin and drives it through
//! `InProcess -> Success | Failure` around a [`SynchronizationProcessor`].

mod hang;
pub mod priority;
mod processor;
mod selector;
mod synchronizer;

pub use hang::HangRecovery;
pub use processor::{ProcessorFactory, ProcessorRegistry, SynchronizationProcessor};
pub use selector::OriginSelector;
pub use synchronizer::{EmailSynchronizer, SyncOutcome};
