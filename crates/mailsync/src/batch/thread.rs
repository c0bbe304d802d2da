//! Conversation threading of a batch being persisted

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Result;

use crate::models::{EmailMessage, ThreadId};
use crate::storage::EmailEntityStore;

/// Stored messages outside the batch that threading loaded, as loaded and as changed
#[derive(Default)]
pub(crate) struct StoredMessages {
    loaded: BTreeMap<i64, (EmailMessage, EmailMessage)>,
}

impl StoredMessages {
    fn load(&mut self, message: EmailMessage) {
        if let Some(id) = message.id {
            self.loaded
                .entry(id.0)
                .or_insert_with(|| (message.clone(), message));
        }
    }

    fn find_mut_by_key(&mut self, key: &str) -> Option<&mut EmailMessage> {
        self.loaded
            .values_mut()
            .map(|(_, current)| current)
            .find(|m| m.key() == Some(key))
    }

    fn in_thread_mut<'a>(
        &'a mut self,
        thread: &'a ThreadId,
    ) -> impl Iterator<Item = &'a mut EmailMessage> + 'a {
        self.loaded
            .values_mut()
            .map(|(_, current)| current)
            .filter(move |m| m.thread_id.as_ref() == Some(thread))
    }

    /// Messages whose thread fields changed and must be written back
    pub(crate) fn changed(&self) -> impl Iterator<Item = &EmailMessage> {
        self.loaded
            .values()
            .filter(|(original, current)| original != current)
            .map(|(_, current)| current)
    }
}

fn batch_ids(messages: &[EmailMessage]) -> HashSet<i64> {
    messages.iter().filter_map(|m| m.id.map(|id| id.0)).collect()
}

/// Put unthreaded messages into the thread of their nearest known parent
///
/// Parents are looked up in the batch first, then in the store. A parent
/// without a thread starts one named after its Message-ID. Returns every
/// thread that gained a member.
pub(crate) fn link_threads(
    store: &dyn EmailEntityStore,
    messages: &mut [EmailMessage],
    stored: &mut StoredMessages,
) -> Result<BTreeSet<ThreadId>> {
    let in_batch = batch_ids(messages);
    let batch_keys: HashMap<String, usize> = messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.key().map(|k| (k.to_string(), i)))
        .collect();

    // Oldest first, so a parent is threaded before its replies
    let mut pending: Vec<usize> = (0..messages.len())
        .filter(|&i| messages[i].thread_id.is_none())
        .collect();
    pending.sort_by_key(|&i| messages[i].sent_at);

    let wanted: Vec<String> = pending
        .iter()
        .flat_map(|&i| messages[i].related_message_ids())
        .filter(|id| !batch_keys.contains_key(*id))
        .map(String::from)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !wanted.is_empty() {
        for message in store.find_messages_by_message_ids(&wanted)? {
            if message.id.is_some_and(|id| !in_batch.contains(&id.0)) {
                stored.load(message);
            }
        }
    }

    let mut touched = BTreeSet::new();
    for i in pending {
        if messages[i].thread_id.is_some() {
            continue;
        }

        let related: Vec<String> = messages[i]
            .related_message_ids()
            .into_iter()
            .map(String::from)
            .collect();

        for parent_key in related {
            let thread = if let Some(&j) = batch_keys.get(&parent_key) {
                messages[j]
                    .thread_id
                    .get_or_insert_with(|| ThreadId::new(parent_key.as_str()))
                    .clone()
            } else if let Some(parent) = stored.find_mut_by_key(&parent_key) {
                parent
                    .thread_id
                    .get_or_insert_with(|| ThreadId::new(parent_key.as_str()))
                    .clone()
            } else {
                continue;
            };

            messages[i].thread_id = Some(thread.clone());
            touched.insert(thread);
            break;
        }
    }

    Ok(touched)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Member {
    Batch(usize),
    Stored(i64),
}

/// Make the most recent message of every given thread its only head
pub(crate) fn assign_heads(
    store: &dyn EmailEntityStore,
    messages: &mut [EmailMessage],
    stored: &mut StoredMessages,
    threads: &BTreeSet<ThreadId>,
) -> Result<()> {
    let in_batch = batch_ids(messages);

    for thread in threads {
        for message in store.find_thread_messages(thread)? {
            if message.id.is_some_and(|id| !in_batch.contains(&id.0)) {
                stored.load(message);
            }
        }

        // Later batch messages win ties, and batch messages win over stored ones
        let mut head = None;
        for (i, m) in messages.iter().enumerate() {
            if m.thread_id.as_ref() == Some(thread)
                && head.is_none_or(|(at, _)| m.sent_at >= at)
            {
                head = Some((m.sent_at, Member::Batch(i)));
            }
        }
        for m in stored.in_thread_mut(thread) {
            if head.is_none_or(|(at, _)| m.sent_at > at) {
                head = m.id.map(|id| (m.sent_at, Member::Stored(id.0)));
            }
        }
        let head = head.map(|(_, member)| member);

        for (i, m) in messages.iter_mut().enumerate() {
            if m.thread_id.as_ref() == Some(thread) {
                m.is_head = head == Some(Member::Batch(i));
            }
        }
        for m in stored.in_thread_mut(thread) {
            m.is_head = m.id.is_some_and(|id| head == Some(Member::Stored(id.0)));
        }
    }

    Ok(())
}
