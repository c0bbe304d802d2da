//! Storage trait definitions

use crate::models::{
    AddressId, EmailAddress, EmailFolder, EmailId, EmailMessage, FolderId, FolderType,
    MailboxOrigin, OriginId, SyncCode, SyncStateUpdate, ThreadId,
};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// How sync candidates are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrder {
    /// In-process origins first, then by descending sync priority, then
    /// oldest state change first (see [`crate::sync::priority`])
    SyncPriority,
}

/// Parameters of the sync candidate query
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    /// Only consider origins with the active flag set
    pub active_only: bool,
    /// Origins whose state changed after this instant are skipped, unless in process
    pub updated_before: DateTime<Utc>,
    /// Reference time for priority scoring
    pub now: DateTime<Utc>,
    pub max_results: usize,
    pub order: CandidateOrder,
}

/// Persistence of mailbox origins and their sync state
///
/// Implementations must not cache origin state: every call reads or writes
/// the shared store, because other worker processes update it concurrently.
pub trait OriginRepository: Send + Sync {
    /// Query origins eligible for synchronization, in the requested order
    fn find_sync_candidates(&self, query: &CandidateQuery) -> Result<Vec<MailboxOrigin>>;

    /// Change the sync state of one origin
    ///
    /// A transition into `Success` also increments the origin's sync count.
    fn update_sync_state(&self, id: OriginId, update: &SyncStateUpdate) -> Result<()>;

    /// Move every origin in `from` whose state changed at or before
    /// `updated_before` to `to`, returning the number of affected origins
    fn bulk_reset_hanged(
        &self,
        from: SyncCode,
        to: SyncCode,
        updated_before: DateTime<Utc>,
    ) -> Result<usize>;

    /// Insert or update an origin, returning its id
    fn save_origin(&self, origin: MailboxOrigin) -> Result<OriginId>;

    /// Get an origin by id
    fn get_origin(&self, id: OriginId) -> Result<Option<MailboxOrigin>>;

    /// List all origins ordered by id
    fn list_origins(&self) -> Result<Vec<MailboxOrigin>>;
}

/// Persistence used by [`EntityBatch::persist`](crate::batch::EntityBatch::persist)
///
/// All calls made during one `persist` belong to one logical transaction.
pub trait EmailEntityStore {
    /// Find a folder by its natural key
    fn find_folder(&self, folder_type: FolderType, full_name: &str) -> Result<Option<EmailFolder>>;

    /// Find an address by its normalized value
    fn find_address(&self, normalized_email: &str) -> Result<Option<EmailAddress>>;

    /// Find all messages with any of the given Message-IDs
    fn find_messages_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<EmailMessage>>;

    /// List the messages of a conversation
    fn find_thread_messages(&self, thread_id: &ThreadId) -> Result<Vec<EmailMessage>>;

    fn insert_folder(&self, folder: &EmailFolder) -> Result<FolderId>;

    fn insert_address(&self, address: &EmailAddress) -> Result<AddressId>;

    /// Insert a message; its folders and addresses must already be persisted
    fn insert_message(&self, message: &EmailMessage) -> Result<EmailId>;

    /// Persist folder memberships and thread fields of an existing message
    fn update_message(&self, message: &EmailMessage) -> Result<()>;
}
