//! Staging and merging of parsed email entities
//!
//! A processor stages the folders, addresses and messages it parsed during
//! one synchronization run into an [`EntityBatch`], then calls
//! [`EntityBatch::persist`]. Every staged object is matched against storage
//! by its natural key, so persisting the same mail twice never creates a
//! second row:
//!
//! * folders by lowercase `type_fullname`
//! * addresses by lowercase address
//! * messages by trimmed Message-ID
//!
//! Objects that already exist are replaced by the stored version and the
//! substitution is recorded in [`EntityBatch::changes`].

mod owner;
mod thread;

use std::collections::{HashMap, HashSet};

use crate::error::BatchError;
use crate::models::{
    EmailAddress, EmailFolder, EmailMessage, FolderType, folder_key, normalize_address,
};
use crate::storage::EmailEntityStore;

pub use owner::{EmailOwnerProvider, NoOwnerProvider, OwnerDirectory, OwnerProviderChain};

/// A staged object replaced by an already stored one during persist
#[derive(Debug, Clone, PartialEq)]
pub enum BatchChange {
    Folder { old: EmailFolder, new: EmailFolder },
    Address { old: EmailAddress, new: EmailAddress },
    Message { old: EmailMessage, new: EmailMessage },
}

impl BatchChange {
    /// Entity name used in logs
    pub fn entity(&self) -> &'static str {
        match self {
            BatchChange::Folder { .. } => "folder",
            BatchChange::Address { .. } => "address",
            BatchChange::Message { .. } => "message",
        }
    }
}

/// Statistics from a persist operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistStats {
    pub folders_inserted: usize,
    pub folders_merged: usize,
    pub addresses_inserted: usize,
    pub addresses_merged: usize,
    pub messages_inserted: usize,
    /// Staged messages replaced by a stored message with the same Message-ID
    pub messages_merged: usize,
    /// Stored messages written back with new folders or thread fields
    pub messages_updated: usize,
    /// Threads that gained a member
    pub threads_touched: usize,
}

/// Single-use staging area for the entities of one synchronization run
pub struct EntityBatch {
    owner_provider: Box<dyn EmailOwnerProvider>,
    folders: Vec<EmailFolder>,
    folder_index: HashMap<String, usize>,
    addresses: Vec<EmailAddress>,
    address_index: HashMap<String, usize>,
    messages: Vec<EmailMessage>,
    message_index: HashMap<String, usize>,
    /// Already persisted messages that gained folders since the last persist
    dirty: HashSet<usize>,
    changes: Vec<BatchChange>,
    poisoned: bool,
}

impl Default for EntityBatch {
    fn default() -> Self {
        Self::new(NoOwnerProvider)
    }
}

impl EntityBatch {
    /// Create an empty batch resolving new address owners with `owner_provider`
    pub fn new(owner_provider: impl EmailOwnerProvider + 'static) -> Self {
        Self {
            owner_provider: Box::new(owner_provider),
            folders: Vec::new(),
            folder_index: HashMap::new(),
            addresses: Vec::new(),
            address_index: HashMap::new(),
            messages: Vec::new(),
            message_index: HashMap::new(),
            dirty: HashSet::new(),
            changes: Vec::new(),
            poisoned: false,
        }
    }

    /// Stage a message
    ///
    /// A message with the Message-ID of an already staged one is merged into
    /// it: its folders are added to the staged message and it is dropped.
    pub fn add_message(&mut self, message: EmailMessage) {
        if let Some(key) = message.key()
            && let Some(&i) = self.message_index.get(key)
        {
            log::debug!("[BATCH] Merging duplicate message {} within the batch", key);
            let staged = &mut self.messages[i];
            let mut gained = false;
            for folder in message.folders {
                gained |= staged.add_folder(folder);
            }
            if gained && staged.is_persisted() {
                self.dirty.insert(i);
            }
            return;
        }

        if let Some(key) = message.key() {
            self.message_index
                .insert(key.to_string(), self.messages.len());
        }
        self.messages.push(message);
    }

    /// Stage an address
    ///
    /// Fails if an address with the same normalized value is already staged.
    pub fn add_address(&mut self, address: EmailAddress) -> Result<(), BatchError> {
        let key = address.key();
        if self.address_index.contains_key(&key) {
            return Err(BatchError::DuplicateInBatch {
                entity: "address",
                key,
            });
        }
        self.address_index.insert(key, self.addresses.len());
        self.addresses.push(address);
        Ok(())
    }

    /// Stage a folder
    ///
    /// Fails if a folder with the same type and full name is already staged.
    pub fn add_folder(&mut self, folder: EmailFolder) -> Result<(), BatchError> {
        let key = folder.key();
        if self.folder_index.contains_key(&key) {
            return Err(BatchError::DuplicateInBatch {
                entity: "folder",
                key,
            });
        }
        self.folder_index.insert(key, self.folders.len());
        self.folders.push(folder);
        Ok(())
    }

    /// Find a staged address, ignoring case
    pub fn address(&self, email: &str) -> Option<&EmailAddress> {
        self.address_index
            .get(&normalize_address(email))
            .map(|&i| &self.addresses[i])
    }

    /// Find a staged folder
    pub fn folder(&self, folder_type: FolderType, full_name: &str) -> Option<&EmailFolder> {
        self.folder_index
            .get(&folder_key(folder_type, full_name))
            .map(|&i| &self.folders[i])
    }

    /// Find a staged message by Message-ID
    pub fn message(&self, message_id: &str) -> Option<&EmailMessage> {
        self.message_index
            .get(message_id.trim())
            .map(|&i| &self.messages[i])
    }

    pub fn messages(&self) -> &[EmailMessage] {
        &self.messages
    }

    pub fn addresses(&self) -> &[EmailAddress] {
        &self.addresses
    }

    pub fn folders(&self) -> &[EmailFolder] {
        &self.folders
    }

    /// Substitutions made by the persist calls since the last [`clear`](Self::clear)
    pub fn changes(&self) -> &[BatchChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.addresses.is_empty() && self.folders.is_empty()
    }

    /// Reset the batch, including after a failed persist
    pub fn clear(&mut self) {
        self.folders.clear();
        self.folder_index.clear();
        self.addresses.clear();
        self.address_index.clear();
        self.changes.clear();
        self.remove_messages();
        self.poisoned = false;
    }

    /// Drop staged messages, keeping folders and addresses
    pub fn remove_messages(&mut self) {
        self.messages.clear();
        self.message_index.clear();
        self.dirty.clear();
    }

    /// Merge the staged entities into `store`
    ///
    /// Folders are persisted first, then addresses, then messages. Store
    /// errors propagate unchanged and leave the batch unusable until
    /// [`clear`](Self::clear) is called.
    pub fn persist(&mut self, store: &dyn EmailEntityStore) -> Result<PersistStats, BatchError> {
        if self.poisoned {
            return Err(BatchError::Poisoned);
        }

        self.poisoned = true;
        let mut stats = PersistStats::default();

        self.stage_references();
        self.persist_folders(store, &mut stats)?;
        self.persist_addresses(store, &mut stats)?;
        self.persist_messages(store, &mut stats)?;

        self.poisoned = false;
        log::info!(
            "[BATCH] Persisted {} new and {} merged message(s), {} new address(es), {} new folder(s)",
            stats.messages_inserted,
            stats.messages_merged,
            stats.addresses_inserted,
            stats.folders_inserted
        );
        Ok(stats)
    }

    /// Stage the folders and addresses messages refer to but nobody added
    fn stage_references(&mut self) {
        let mut folders = Vec::new();
        let mut addresses = Vec::new();

        for message in &self.messages {
            folders.extend(message.folders.iter().cloned());
            addresses.extend(message.addresses().cloned());
        }

        for folder in folders {
            let key = folder.key();
            if !self.folder_index.contains_key(&key) {
                self.folder_index.insert(key, self.folders.len());
                self.folders.push(folder);
            }
        }
        for address in addresses {
            let key = address.key();
            if !self.address_index.contains_key(&key) {
                self.address_index.insert(key, self.addresses.len());
                self.addresses.push(address);
            }
        }
    }

    fn persist_folders(
        &mut self,
        store: &dyn EmailEntityStore,
        stats: &mut PersistStats,
    ) -> Result<(), BatchError> {
        for i in 0..self.folders.len() {
            if self.folders[i].is_persisted() {
                continue;
            }

            let staged = &self.folders[i];
            let persisted = match store.find_folder(staged.folder_type, &staged.full_name)? {
                Some(existing) => {
                    self.changes.push(BatchChange::Folder {
                        old: staged.clone(),
                        new: existing.clone(),
                    });
                    stats.folders_merged += 1;
                    existing
                }
                None => {
                    let mut folder = staged.clone();
                    folder.id = Some(store.insert_folder(&folder)?);
                    stats.folders_inserted += 1;
                    folder
                }
            };

            rebind_folder(&mut self.messages, &persisted);
            self.folders[i] = persisted;
        }
        Ok(())
    }

    fn persist_addresses(
        &mut self,
        store: &dyn EmailEntityStore,
        stats: &mut PersistStats,
    ) -> Result<(), BatchError> {
        for i in 0..self.addresses.len() {
            if self.addresses[i].is_persisted() {
                continue;
            }

            let staged = &self.addresses[i];
            let key = staged.key();
            let persisted = match store.find_address(&key)? {
                Some(existing) => {
                    self.changes.push(BatchChange::Address {
                        old: staged.clone(),
                        new: existing.clone(),
                    });
                    stats.addresses_merged += 1;
                    existing
                }
                None => {
                    let mut address = staged.clone();
                    if address.owner.is_none() {
                        address.owner = self.owner_provider.find_owner(store, &key)?;
                    }
                    address.id = Some(store.insert_address(&address)?);
                    stats.addresses_inserted += 1;
                    address
                }
            };

            rebind_address(&mut self.messages, &persisted);
            self.addresses[i] = persisted;
        }
        Ok(())
    }

    fn persist_messages(
        &mut self,
        store: &dyn EmailEntityStore,
        stats: &mut PersistStats,
    ) -> Result<(), BatchError> {
        let keys: Vec<String> = self
            .messages
            .iter()
            .filter(|m| !m.is_persisted())
            .filter_map(|m| m.key().map(String::from))
            .collect();

        let mut existing: HashMap<String, EmailMessage> = HashMap::new();
        if !keys.is_empty() {
            for message in store.find_messages_by_message_ids(&keys)? {
                if let Some(key) = message.key() {
                    existing.entry(key.to_string()).or_insert(message);
                }
            }
        }

        // Stored versions of persisted messages, to detect changes to write back
        let mut merged: Vec<(usize, EmailMessage)> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_persisted())
            .map(|(i, m)| (i, m.clone()))
            .collect();
        for (i, message) in self.messages.iter_mut().enumerate() {
            if message.is_persisted() {
                continue;
            }
            let Some(mut stored) = message.key().and_then(|k| existing.remove(k)) else {
                continue;
            };

            merged.push((i, stored.clone()));
            for folder in &message.folders {
                stored.add_folder(folder.clone());
            }
            self.changes.push(BatchChange::Message {
                old: message.clone(),
                new: stored.clone(),
            });
            *message = stored;
            stats.messages_merged += 1;
        }

        let mut stored = thread::StoredMessages::default();
        let threads = thread::link_threads(store, &mut self.messages, &mut stored)?;
        thread::assign_heads(store, &mut self.messages, &mut stored, &threads)?;
        stats.threads_touched = threads.len();

        for message in self.messages.iter_mut().filter(|m| !m.is_persisted()) {
            message.id = Some(store.insert_message(message)?);
            stats.messages_inserted += 1;
        }

        let dirty = std::mem::take(&mut self.dirty);
        for (i, original) in &merged {
            let message = &self.messages[*i];
            if message != original || dirty.contains(i) {
                store.update_message(message)?;
                stats.messages_updated += 1;
            }
        }
        for message in stored.changed() {
            store.update_message(message)?;
            stats.messages_updated += 1;
        }

        Ok(())
    }
}

/// Point every message's copy of `folder` at the persisted one
fn rebind_folder(messages: &mut [EmailMessage], folder: &EmailFolder) {
    let key = folder.key();
    for message in messages {
        for f in message.folders.iter_mut().filter(|f| f.key() == key) {
            *f = folder.clone();
        }
    }
}

/// Point every message's copy of `address` at the persisted one
fn rebind_address(messages: &mut [EmailMessage], address: &EmailAddress) {
    let key = address.key();
    for message in messages {
        for a in message.addresses_mut().filter(|a| a.key() == key) {
            *a = address.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailRecipient, OwnerRef, RecipientType, ThreadId};
    use crate::storage::InMemoryMailStore;
    use anyhow::{Result, bail};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn inbox() -> EmailFolder {
        EmailFolder::new(FolderType::Inbox, "INBOX")
    }

    fn sent() -> EmailFolder {
        EmailFolder::new(FolderType::Sent, "Sent")
    }

    fn message(message_id: &str, folder: EmailFolder) -> EmailMessage {
        EmailMessage::builder(EmailAddress::new("alice@example.com"))
            .message_id(message_id)
            .subject("Quarterly report")
            .recipient(EmailRecipient::new(
                RecipientType::To,
                EmailAddress::new("Bob@Example.com"),
            ))
            .sent_at(at(0))
            .folder(folder)
            .build()
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let mut batch = EntityBatch::default();
        batch.add_address(EmailAddress::new("John@Example.com")).unwrap();

        let err = batch
            .add_address(EmailAddress::new("john@example.com"))
            .unwrap_err();
        assert!(matches!(err, BatchError::DuplicateInBatch { entity: "address", .. }));
    }

    #[test]
    fn test_duplicate_folder_is_rejected() {
        let mut batch = EntityBatch::default();
        batch.add_folder(inbox()).unwrap();
        assert!(batch.add_folder(EmailFolder::new(FolderType::Inbox, "inbox")).is_err());
        assert!(batch.add_folder(EmailFolder::new(FolderType::Other, "INBOX")).is_ok());
    }

    #[test]
    fn test_lookups_are_batch_only() {
        let mut batch = EntityBatch::default();
        batch.add_address(EmailAddress::new("a@example.com")).unwrap();
        batch.add_folder(inbox()).unwrap();

        assert!(batch.address("A@EXAMPLE.COM").is_some());
        assert!(batch.address("b@example.com").is_none());
        assert!(batch.folder(FolderType::Inbox, "inbox").is_some());
        assert!(batch.folder(FolderType::Sent, "INBOX").is_none());
    }

    #[test]
    fn test_same_message_id_collapses_within_batch() {
        let mut batch = EntityBatch::default();
        batch.add_message(message("<abc@example.com>", inbox()));
        batch.add_message(message(" <abc@example.com> ", sent()));

        assert_eq!(batch.messages().len(), 1);
        assert_eq!(batch.messages()[0].folders.len(), 2);
    }

    #[test]
    fn test_persist_inserts_references_once() {
        let store = InMemoryMailStore::new();
        let mut batch = EntityBatch::default();
        batch.add_message(message("<m1@example.com>", inbox()));
        batch.add_message(message("<m2@example.com>", inbox()));

        let stats = batch.persist(&store).unwrap();

        assert_eq!(stats.messages_inserted, 2);
        assert_eq!(stats.addresses_inserted, 2);
        assert_eq!(stats.folders_inserted, 1);
        assert_eq!(store.count_addresses(), 2);
        assert_eq!(store.count_folders(), 1);

        let folder_id = batch.folder(FolderType::Inbox, "INBOX").unwrap().id;
        assert!(folder_id.is_some());
        for m in batch.messages() {
            assert!(m.is_persisted());
            assert_eq!(m.folders[0].id, folder_id);
            assert!(m.addresses().all(|a| a.is_persisted()));
        }
    }

    #[test]
    fn test_existing_address_is_reused() {
        let store = InMemoryMailStore::new();
        let existing_id = store
            .insert_address(&EmailAddress::new("bob@example.com"))
            .unwrap();

        let mut batch = EntityBatch::default();
        batch.add_message(message("<m1@example.com>", inbox()));
        let stats = batch.persist(&store).unwrap();

        assert_eq!(stats.addresses_merged, 1);
        assert_eq!(batch.messages()[0].recipients[0].address.id, Some(existing_id));
        assert!(batch.changes().iter().any(|c| matches!(
            c,
            BatchChange::Address { old, new } if old.id.is_none() && new.id == Some(existing_id)
        )));
    }

    #[test]
    fn test_owner_provider_only_for_new_addresses() {
        let store = InMemoryMailStore::new();
        store
            .insert_address(&EmailAddress::new("bob@example.com"))
            .unwrap();

        let owners = OwnerDirectory::new()
            .with("alice@example.com", OwnerRef::new("user", 1))
            .with("bob@example.com", OwnerRef::new("user", 2));
        let mut batch = EntityBatch::new(owners);
        batch.add_message(message("<m1@example.com>", inbox()));
        batch.persist(&store).unwrap();

        let m = &batch.messages()[0];
        assert_eq!(m.from.owner, Some(OwnerRef::new("user", 1)));
        assert_eq!(m.recipients[0].address.owner, None);
    }

    #[test]
    fn test_existing_message_gains_folder() {
        let store = InMemoryMailStore::new();
        let mut first = EntityBatch::default();
        first.add_message(message("<dup@example.com>", inbox()));
        first.persist(&store).unwrap();
        let stored_id = first.messages()[0].id;

        let mut second = EntityBatch::default();
        second.add_message(message("<dup@example.com>", sent()));
        let stats = second.persist(&store).unwrap();

        assert_eq!(stats.messages_inserted, 0);
        assert_eq!(stats.messages_merged, 1);
        assert_eq!(stats.messages_updated, 1);
        assert_eq!(store.count_messages(), 1);
        assert_eq!(second.messages()[0].id, stored_id);

        let stored = store.get_message(stored_id.unwrap()).unwrap();
        assert_eq!(stored.folders.len(), 2);
    }

    #[test]
    fn test_folder_added_after_persist_is_written_back() {
        let store = InMemoryMailStore::new();
        let mut batch = EntityBatch::default();
        batch.add_message(message("<again@example.com>", inbox()));
        batch.persist(&store).unwrap();
        let stored_id = batch.messages()[0].id.unwrap();

        batch.add_message(message("<again@example.com>", sent()));
        let stats = batch.persist(&store).unwrap();

        assert_eq!(stats.messages_inserted, 0);
        assert_eq!(stats.messages_updated, 1);
        assert_eq!(store.count_messages(), 1);
        assert_eq!(store.count_folders(), 2);

        let stored = store.get_message(stored_id).unwrap();
        assert_eq!(stored.folders.len(), 2);
        assert!(stored.folders.iter().all(|f| f.id.is_some()));
    }

    #[test]
    fn test_persist_twice_is_idempotent() {
        let store = InMemoryMailStore::new();
        for _ in 0..2 {
            let mut batch = EntityBatch::default();
            batch.add_message(message("<m1@example.com>", inbox()));
            batch.persist(&store).unwrap();
        }

        assert_eq!(store.count_messages(), 1);
        assert_eq!(store.count_addresses(), 2);
        assert_eq!(store.count_folders(), 1);
    }

    #[test]
    fn test_messages_without_message_id_are_always_new() {
        let store = InMemoryMailStore::new();
        let mut batch = EntityBatch::default();
        batch.add_message(message("", inbox()));
        batch.add_message(message("  ", inbox()));

        assert_eq!(batch.persist(&store).unwrap().messages_inserted, 2);
    }

    #[test]
    fn test_replies_share_a_thread() {
        let store = InMemoryMailStore::new();
        let mut batch = EntityBatch::default();

        let root = message("<root@example.com>", inbox());
        let mut reply = message("<reply@example.com>", inbox());
        reply.in_reply_to = Some("<root@example.com>".to_string());
        reply.sent_at = at(10);

        batch.add_message(reply);
        batch.add_message(root);
        let stats = batch.persist(&store).unwrap();
        assert_eq!(stats.threads_touched, 1);

        let thread = Some(ThreadId::new("<root@example.com>"));
        let root = batch.message("<root@example.com>").unwrap();
        let reply = batch.message("<reply@example.com>").unwrap();
        assert_eq!(root.thread_id, thread);
        assert_eq!(reply.thread_id, thread);
        assert!(!root.is_head);
        assert!(reply.is_head);
    }

    #[test]
    fn test_reply_to_stored_message() {
        let store = InMemoryMailStore::new();
        let mut first = EntityBatch::default();
        first.add_message(message("<root@example.com>", inbox()));
        first.persist(&store).unwrap();

        let mut second = EntityBatch::default();
        let mut reply = message("<reply@example.com>", inbox());
        reply.references = vec!["<root@example.com>".to_string()];
        reply.sent_at = at(30);
        second.add_message(reply);
        let stats = second.persist(&store).unwrap();

        // The stored root joined the new thread and lost its head flag
        assert_eq!(stats.messages_updated, 1);
        let root = store
            .find_messages_by_message_ids(&["<root@example.com>".to_string()])
            .unwrap()
            .remove(0);
        assert_eq!(root.thread_id, Some(ThreadId::new("<root@example.com>")));
        assert!(!root.is_head);
        assert!(second.messages()[0].is_head);
    }

    #[test]
    fn test_unrelated_messages_stay_unthreaded() {
        let store = InMemoryMailStore::new();
        let mut batch = EntityBatch::default();
        let mut orphan = message("<orphan@example.com>", inbox());
        orphan.in_reply_to = Some("<unknown@example.com>".to_string());
        batch.add_message(orphan);

        let stats = batch.persist(&store).unwrap();
        assert_eq!(stats.threads_touched, 0);
        assert_eq!(batch.messages()[0].thread_id, None);
        assert!(batch.messages()[0].is_head);
    }

    struct BrokenStore;

    impl EmailEntityStore for BrokenStore {
        fn find_folder(&self, _: FolderType, _: &str) -> Result<Option<EmailFolder>> {
            bail!("database is locked")
        }
        fn find_address(&self, _: &str) -> Result<Option<EmailAddress>> {
            Ok(None)
        }
        fn find_messages_by_message_ids(&self, _: &[String]) -> Result<Vec<EmailMessage>> {
            Ok(Vec::new())
        }
        fn find_thread_messages(&self, _: &ThreadId) -> Result<Vec<EmailMessage>> {
            Ok(Vec::new())
        }
        fn insert_folder(&self, _: &EmailFolder) -> Result<crate::models::FolderId> {
            bail!("read only")
        }
        fn insert_address(&self, _: &EmailAddress) -> Result<crate::models::AddressId> {
            bail!("read only")
        }
        fn insert_message(&self, _: &EmailMessage) -> Result<crate::models::EmailId> {
            bail!("read only")
        }
        fn update_message(&self, _: &EmailMessage) -> Result<()> {
            bail!("read only")
        }
    }

    #[test]
    fn test_failed_persist_poisons_batch() {
        let mut batch = EntityBatch::default();
        batch.add_message(message("<m1@example.com>", inbox()));

        let err = batch.persist(&BrokenStore).unwrap_err();
        assert!(matches!(err, BatchError::Store(_)));
        assert_eq!(err.to_string(), "database is locked");

        let store = InMemoryMailStore::new();
        assert!(matches!(batch.persist(&store), Err(BatchError::Poisoned)));

        batch.clear();
        assert!(batch.is_empty());
        batch.add_message(message("<m1@example.com>", inbox()));
        assert!(batch.persist(&store).is_ok());
    }

    #[test]
    fn test_remove_messages_keeps_reference_data() {
        let mut batch = EntityBatch::default();
        batch.add_folder(inbox()).unwrap();
        batch.add_address(EmailAddress::new("a@example.com")).unwrap();
        batch.add_message(message("<m1@example.com>", inbox()));

        batch.remove_messages();

        assert!(batch.messages().is_empty());
        assert!(batch.message("<m1@example.com>").is_none());
        assert_eq!(batch.folders().len(), 1);
        assert_eq!(batch.addresses().len(), 1);
    }
}
