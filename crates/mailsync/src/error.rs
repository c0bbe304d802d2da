//! Error types of the scheduler and the merge engine

use crate::models::{OriginId, OriginKind};

/// Errors returned by [`EmailSynchronizer::sync`](crate::sync::EmailSynchronizer::sync)
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No processor factory is registered for the origin's kind
    #[error("No synchronization processor registered for {0} origins")]
    NoProcessor(OriginKind),

    /// Writing the InProcess or Success state failed
    #[error("Cannot change the sync state of origin {origin}: {error:#}")]
    StateWrite {
        origin: OriginId,
        error: anyhow::Error,
    },

    /// The synchronization processor failed; the origin was marked as failed
    #[error("The synchronization of origin {origin} failed: {error:#}")]
    Processor {
        origin: OriginId,
        error: anyhow::Error,
    },

    /// Hang recovery or origin selection could not query the repository
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// The error raised by the processor, if this is a processor failure
    pub fn processor_error(&self) -> Option<&anyhow::Error> {
        match self {
            SyncError::Processor { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Errors returned by [`EntityBatch`](crate::batch::EntityBatch)
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The same natural key was staged twice; the parser must deduplicate first
    #[error("The {entity} \"{key}\" already exists in the batch")]
    DuplicateInBatch { entity: &'static str, key: String },

    /// A previous persist failed half way; the batch must be cleared first
    #[error("The batch was partially persisted by a failed run and must be cleared before reuse")]
    Poisoned,

    /// Lookup or insert failure of the entity store
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
