//! In-memory storage implementation
//!
//! Used by tests and by embedders that keep origin state elsewhere. Every
//! collection is protected by its own RwLock, so a single store can be
//! shared between a synchronizer and the processors it runs.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{CandidateOrder, CandidateQuery, EmailEntityStore, OriginRepository};
use crate::models::{
    AddressId, EmailAddress, EmailFolder, EmailId, EmailMessage, FolderId, FolderType,
    MailboxOrigin, OriginId, SyncCode, SyncStateUpdate, ThreadId, folder_key,
};
use crate::sync::priority::{compare_candidates, is_candidate};

/// In-memory implementation of [`OriginRepository`] and [`EmailEntityStore`]
pub struct InMemoryMailStore {
    origins: RwLock<BTreeMap<i64, MailboxOrigin>>,
    folders: RwLock<BTreeMap<i64, EmailFolder>>,
    addresses: RwLock<BTreeMap<i64, EmailAddress>>,
    messages: RwLock<BTreeMap<i64, EmailMessage>>,
    next_id: AtomicI64,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            origins: RwLock::new(BTreeMap::new()),
            folders: RwLock::new(BTreeMap::new()),
            addresses: RwLock::new(BTreeMap::new()),
            messages: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Get a message by id
    pub fn get_message(&self, id: EmailId) -> Option<EmailMessage> {
        self.messages.read().unwrap().get(&id.0).cloned()
    }

    /// List all messages ordered by id
    pub fn list_messages(&self) -> Vec<EmailMessage> {
        self.messages.read().unwrap().values().cloned().collect()
    }

    pub fn count_messages(&self) -> usize {
        self.messages.read().unwrap().len()
    }

    pub fn count_addresses(&self) -> usize {
        self.addresses.read().unwrap().len()
    }

    pub fn count_folders(&self) -> usize {
        self.folders.read().unwrap().len()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.origins.write().unwrap().clear();
        self.folders.write().unwrap().clear();
        self.addresses.write().unwrap().clear();
        self.messages.write().unwrap().clear();
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginRepository for InMemoryMailStore {
    fn find_sync_candidates(&self, query: &CandidateQuery) -> Result<Vec<MailboxOrigin>> {
        let origins = self.origins.read().unwrap();

        let mut candidates: Vec<MailboxOrigin> = origins
            .values()
            .filter(|o| is_candidate(o, query.active_only, query.updated_before))
            .cloned()
            .collect();

        match query.order {
            CandidateOrder::SyncPriority => {
                candidates.sort_by(|a, b| compare_candidates(a, b, query.now));
            }
        }
        candidates.truncate(query.max_results);

        Ok(candidates)
    }

    fn update_sync_state(&self, id: OriginId, update: &SyncStateUpdate) -> Result<()> {
        let mut origins = self.origins.write().unwrap();
        if let Some(origin) = origins.get_mut(&id.0) {
            origin.apply(update);
        }
        Ok(())
    }

    fn bulk_reset_hanged(
        &self,
        from: SyncCode,
        to: SyncCode,
        updated_before: DateTime<Utc>,
    ) -> Result<usize> {
        let mut origins = self.origins.write().unwrap();
        let mut affected = 0;

        for origin in origins.values_mut() {
            let stale = origin
                .sync_code_updated_at
                .is_some_and(|updated_at| updated_at <= updated_before);
            if origin.sync_code == Some(from) && stale {
                // sync_code_updated_at is left untouched
                origin.sync_code = Some(to);
                affected += 1;
            }
        }

        Ok(affected)
    }

    fn save_origin(&self, mut origin: MailboxOrigin) -> Result<OriginId> {
        if origin.id.0 == 0 {
            origin.id = OriginId(self.allocate_id());
        }
        let id = origin.id;
        self.origins.write().unwrap().insert(id.0, origin);
        Ok(id)
    }

    fn get_origin(&self, id: OriginId) -> Result<Option<MailboxOrigin>> {
        Ok(self.origins.read().unwrap().get(&id.0).cloned())
    }

    fn list_origins(&self) -> Result<Vec<MailboxOrigin>> {
        Ok(self.origins.read().unwrap().values().cloned().collect())
    }
}

impl EmailEntityStore for InMemoryMailStore {
    fn find_folder(&self, folder_type: FolderType, full_name: &str) -> Result<Option<EmailFolder>> {
        let key = folder_key(folder_type, full_name);
        let folders = self.folders.read().unwrap();
        Ok(folders.values().find(|f| f.key() == key).cloned())
    }

    fn find_address(&self, normalized_email: &str) -> Result<Option<EmailAddress>> {
        let addresses = self.addresses.read().unwrap();
        Ok(addresses
            .values()
            .find(|a| a.key() == normalized_email)
            .cloned())
    }

    fn find_messages_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<EmailMessage>> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.key().is_some_and(|k| message_ids.iter().any(|id| id == k)))
            .cloned()
            .collect())
    }

    fn find_thread_messages(&self, thread_id: &ThreadId) -> Result<Vec<EmailMessage>> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.thread_id.as_ref() == Some(thread_id))
            .cloned()
            .collect())
    }

    fn insert_folder(&self, folder: &EmailFolder) -> Result<FolderId> {
        let id = FolderId(self.allocate_id());
        let mut stored = folder.clone();
        stored.id = Some(id);
        self.folders.write().unwrap().insert(id.0, stored);
        Ok(id)
    }

    fn insert_address(&self, address: &EmailAddress) -> Result<AddressId> {
        let id = AddressId(self.allocate_id());
        let mut stored = address.clone();
        stored.id = Some(id);
        self.addresses.write().unwrap().insert(id.0, stored);
        Ok(id)
    }

    fn insert_message(&self, message: &EmailMessage) -> Result<EmailId> {
        if message.folders.iter().any(|f| f.id.is_none())
            || message.addresses().any(|a| a.id.is_none())
        {
            bail!("Message references a folder or address that is not persisted");
        }
        let id = EmailId(self.allocate_id());
        let mut stored = message.clone();
        stored.id = Some(id);
        self.messages.write().unwrap().insert(id.0, stored);
        Ok(id)
    }

    fn update_message(&self, message: &EmailMessage) -> Result<()> {
        let Some(id) = message.id else {
            bail!("Cannot update a message that was never persisted");
        };
        let mut messages = self.messages.write().unwrap();
        let Some(stored) = messages.get_mut(&id.0) else {
            bail!("Message {} not found", id.0);
        };
        stored.folders = message.folders.clone();
        stored.thread_id = message.thread_id.clone();
        stored.is_head = message.is_head;
        Ok(())
    }
}
