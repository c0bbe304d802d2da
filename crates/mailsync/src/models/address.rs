//! Email address model and recipient parsing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a persisted email address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressId(pub i64);

/// Reference to the business record owning an address (a user, a contact, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Owner entity type, e.g. "user"
    pub kind: String,
    pub id: i64,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Normalize an address for comparison and lookups
pub fn normalize_address(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A distinct email address, shared by every message that mentions it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Database id, `None` until persisted
    pub id: Option<AddressId>,
    /// The address as it was first seen
    pub email: String,
    /// Business record owning this address, if any
    pub owner: Option<OwnerRef>,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: OwnerRef) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Natural key: the lower-cased address
    pub fn key(&self) -> String {
        normalize_address(&self.email)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

/// Recipient field a message was addressed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientType {
    To,
    Cc,
    Bcc,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::To => "to",
            RecipientType::Cc => "cc",
            RecipientType::Bcc => "bcc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to" => Some(RecipientType::To),
            "cc" => Some(RecipientType::Cc),
            "bcc" => Some(RecipientType::Bcc),
            _ => None,
        }
    }
}

/// One recipient of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub kind: RecipientType,
    /// Full display form, e.g. "John Doe <john@example.com>"
    pub name: String,
    pub address: EmailAddress,
}

impl EmailRecipient {
    pub fn new(kind: RecipientType, address: EmailAddress) -> Self {
        Self {
            kind,
            name: address.email.clone(),
            address,
        }
    }

    /// Parse a recipient from a header value like "John Doe <john@example.com>"
    pub fn parse(kind: RecipientType, s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                kind,
                name: s.to_string(),
                address: EmailAddress::new(email),
            };
        }

        Self {
            kind,
            name: s.to_string(),
            address: EmailAddress::new(s),
        }
    }

    /// Display name without the address part, if one was given
    pub fn display_name(&self) -> Option<&str> {
        let angle_start = self.name.rfind('<')?;
        let name = self.name[..angle_start].trim().trim_matches('"').trim();
        if name.is_empty() { None } else { Some(name) }
    }
}
