//! Email message model

use super::{EmailAddress, EmailFolder, EmailRecipient, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a persisted message (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailId(pub i64);

/// Message body as fetched from the origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailBody {
    pub content: String,
    /// true for text/plain, false for text/html
    pub is_text: bool,
    pub has_attachments: bool,
}

impl EmailBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_text: true,
            has_attachments: false,
        }
    }

    pub fn html(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_text: false,
            has_attachments: false,
        }
    }
}

/// A single email message, possibly filed into several folders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Database id, `None` until persisted
    pub id: Option<EmailId>,
    /// Message-ID header; some messages have none
    pub message_id: Option<String>,
    pub subject: String,
    /// Full "From" header value
    pub from_name: String,
    pub from: EmailAddress,
    pub recipients: Vec<EmailRecipient>,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// In-Reply-To header
    pub in_reply_to: Option<String>,
    /// References header, oldest first
    pub references: Vec<String>,
    /// Conversation this message belongs to
    pub thread_id: Option<ThreadId>,
    /// Whether this is the most recent message of its conversation
    pub is_head: bool,
    pub folders: Vec<EmailFolder>,
    pub body: Option<EmailBody>,
}

impl EmailMessage {
    pub fn builder(from: EmailAddress) -> EmailMessageBuilder {
        EmailMessageBuilder::new(from)
    }

    /// Natural key: the trimmed Message-ID, if not empty
    pub fn key(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn has_folder(&self, folder_key: &str) -> bool {
        self.folders.iter().any(|f| f.key() == folder_key)
    }

    /// Add a folder membership unless an equal folder is already present
    ///
    /// Returns true if the folder was added.
    pub fn add_folder(&mut self, folder: EmailFolder) -> bool {
        if self.has_folder(&folder.key()) {
            return false;
        }
        self.folders.push(folder);
        true
    }

    /// Message-IDs this message replies to, nearest parent first
    pub fn related_message_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        let candidates = self
            .in_reply_to
            .as_deref()
            .into_iter()
            .chain(self.references.iter().rev().map(String::as_str));
        for id in candidates {
            let id = id.trim();
            if !id.is_empty() && Some(id) != self.key() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Every address object referenced by this message
    pub fn addresses_mut(&mut self) -> impl Iterator<Item = &mut EmailAddress> {
        std::iter::once(&mut self.from).chain(self.recipients.iter_mut().map(|r| &mut r.address))
    }

    pub fn addresses(&self) -> impl Iterator<Item = &EmailAddress> {
        std::iter::once(&self.from).chain(self.recipients.iter().map(|r| &r.address))
    }
}

/// Builder for creating EmailMessage instances
pub struct EmailMessageBuilder {
    message_id: Option<String>,
    subject: String,
    from_name: Option<String>,
    from: EmailAddress,
    recipients: Vec<EmailRecipient>,
    sent_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    in_reply_to: Option<String>,
    references: Vec<String>,
    folders: Vec<EmailFolder>,
    body: Option<EmailBody>,
}

impl EmailMessageBuilder {
    fn new(from: EmailAddress) -> Self {
        Self {
            message_id: None,
            subject: String::new(),
            from_name: None,
            from,
            recipients: Vec::new(),
            sent_at: None,
            received_at: None,
            in_reply_to: None,
            references: Vec::new(),
            folders: Vec::new(),
            body: None,
        }
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn from_name(mut self, from_name: impl Into<String>) -> Self {
        self.from_name = Some(from_name.into());
        self
    }

    pub fn recipient(mut self, recipient: EmailRecipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn recipients(mut self, recipients: Vec<EmailRecipient>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn in_reply_to(mut self, in_reply_to: impl Into<String>) -> Self {
        self.in_reply_to = Some(in_reply_to.into());
        self
    }

    pub fn references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn folder(mut self, folder: EmailFolder) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn body(mut self, body: EmailBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn build(self) -> EmailMessage {
        let sent_at = self.sent_at.unwrap_or_else(Utc::now);
        let mut message = EmailMessage {
            id: None,
            message_id: self.message_id,
            subject: self.subject,
            from_name: self.from_name.unwrap_or_else(|| self.from.email.clone()),
            from: self.from,
            recipients: self.recipients,
            sent_at,
            received_at: self.received_at.unwrap_or(sent_at),
            in_reply_to: self.in_reply_to,
            references: self.references,
            thread_id: None,
            is_head: true,
            folders: Vec::new(),
            body: self.body,
        };
        for folder in self.folders {
            message.add_folder(folder);
        }
        message
    }
}
