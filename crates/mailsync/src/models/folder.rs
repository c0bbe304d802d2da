//! Email folder model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::OriginId;

/// Unique identifier for a persisted folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub i64);

/// Well-known folder roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    Sent,
    Trash,
    Drafts,
    Spam,
    Other,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderType::Inbox => "inbox",
            FolderType::Sent => "sent",
            FolderType::Trash => "trash",
            FolderType::Drafts => "drafts",
            FolderType::Spam => "spam",
            FolderType::Other => "other",
        }
    }

    /// Parse a stored folder type; unknown values map to `Other`
    pub fn parse(s: &str) -> Self {
        match s {
            "inbox" => FolderType::Inbox,
            "sent" => FolderType::Sent,
            "trash" => FolderType::Trash,
            "drafts" => FolderType::Drafts,
            "spam" => FolderType::Spam,
            _ => FolderType::Other,
        }
    }
}

impl fmt::Display for FolderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a folder: lower-cased "type_fullname"
pub fn folder_key(folder_type: FolderType, full_name: &str) -> String {
    format!("{}_{}", folder_type.as_str(), full_name).to_lowercase()
}

/// A mail folder of one origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailFolder {
    /// Database id, `None` until persisted
    pub id: Option<FolderId>,
    /// Origin this folder belongs to
    pub origin_id: Option<OriginId>,
    pub folder_type: FolderType,
    /// Full path on the server, e.g. "INBOX/Projects"
    pub full_name: String,
    /// Display name, e.g. "Projects"
    pub name: String,
}

impl EmailFolder {
    pub fn new(folder_type: FolderType, full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let name = Self::leaf_name(&full_name);
        Self {
            id: None,
            origin_id: None,
            folder_type,
            full_name,
            name,
        }
    }

    pub fn with_origin(mut self, origin_id: OriginId) -> Self {
        self.origin_id = Some(origin_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn key(&self) -> String {
        folder_key(self.folder_type, &self.full_name)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Last path segment, accepting both '/' and '.' as hierarchy delimiters
    fn leaf_name(full_name: &str) -> String {
        full_name
            .rsplit(['/', '.'])
            .next()
            .unwrap_or(full_name)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_key_ignores_case() {
        let a = EmailFolder::new(FolderType::Inbox, "INBOX");
        let b = EmailFolder::new(FolderType::Inbox, "Inbox");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "inbox_inbox");
    }

    #[test]
    fn test_folder_key_includes_type() {
        let a = EmailFolder::new(FolderType::Sent, "Archive");
        let b = EmailFolder::new(FolderType::Other, "Archive");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(EmailFolder::new(FolderType::Other, "INBOX/Projects").name, "Projects");
        assert_eq!(EmailFolder::new(FolderType::Other, "INBOX.Work").name, "Work");
        assert_eq!(EmailFolder::new(FolderType::Inbox, "INBOX").name, "INBOX");
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(FolderType::parse("archive"), FolderType::Other);
        assert_eq!(FolderType::parse("sent"), FolderType::Sent);
    }
}
