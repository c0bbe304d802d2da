//! Mailbox origin model and its synchronization state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a mailbox origin (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginId(pub i64);

impl OriginId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of mailbox an origin points at
///
/// Each kind is synchronized by its own processor, looked up in a
/// [`ProcessorRegistry`](crate::sync::ProcessorRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    /// A remote IMAP account
    Imap,
    /// A remote POP3 account
    Pop3,
    /// Mail created inside the application (e.g. sent items)
    Internal,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Imap => "imap",
            OriginKind::Pop3 => "pop3",
            OriginKind::Internal => "internal",
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OriginKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imap" => Ok(OriginKind::Imap),
            "pop3" => Ok(OriginKind::Pop3),
            "internal" => Ok(OriginKind::Internal),
            other => anyhow::bail!("Unknown origin kind: {}", other),
        }
    }
}

/// Result of the last synchronization attempt of an origin
///
/// A never-synchronized origin has no code at all (`Option<SyncCode>::None`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncCode {
    InProcess,
    Failure,
    Success,
}

impl SyncCode {
    /// Code used for ranking origins that were never synchronized
    pub const NEVER_SYNCED: i64 = 1000;

    /// Numeric representation as stored in the database
    pub fn code(&self) -> i64 {
        match self {
            SyncCode::InProcess => 1,
            SyncCode::Failure => 2,
            SyncCode::Success => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SyncCode::InProcess),
            2 => Some(SyncCode::Failure),
            3 => Some(SyncCode::Success),
            _ => None,
        }
    }
}

impl fmt::Display for SyncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncCode::InProcess => "in-process",
            SyncCode::Failure => "failure",
            SyncCode::Success => "success",
        };
        f.write_str(name)
    }
}

/// A configured mailbox that is synchronized periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxOrigin {
    /// Unique identifier (0 until saved)
    pub id: OriginId,
    /// Which processor synchronizes this origin
    pub kind: OriginKind,
    /// Inactive origins are never selected for synchronization
    pub is_active: bool,
    /// Result of the last synchronization attempt
    pub sync_code: Option<SyncCode>,
    /// When `sync_code` last changed
    pub sync_code_updated_at: Option<DateTime<Utc>>,
    /// Start time of the last successful synchronization
    pub synchronized_at: Option<DateTime<Utc>>,
    /// Number of successful synchronizations
    #[serde(default)]
    pub sync_count: u32,
    /// Owning user (opaque to the scheduler)
    #[serde(default)]
    pub owner_id: Option<i64>,
    /// Owning organization (opaque to the scheduler)
    #[serde(default)]
    pub organization_id: Option<i64>,
}

impl MailboxOrigin {
    /// Create a new active, never synchronized origin (id assigned on save)
    pub fn new(kind: OriginKind) -> Self {
        Self {
            id: OriginId(0),
            kind,
            is_active: true,
            sync_code: None,
            sync_code_updated_at: None,
            synchronized_at: None,
            sync_count: 0,
            owner_id: None,
            organization_id: None,
        }
    }

    pub fn with_id(mut self, id: OriginId) -> Self {
        self.id = id;
        self
    }

    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Set the sync state as if it was last changed at `updated_at`
    pub fn with_sync_state(mut self, code: SyncCode, updated_at: DateTime<Utc>) -> Self {
        self.sync_code = Some(code);
        self.sync_code_updated_at = Some(updated_at);
        self
    }

    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_organization(mut self, organization_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn is_in_process(&self) -> bool {
        self.sync_code == Some(SyncCode::InProcess)
    }

    /// Apply a state change the same way the repositories do
    pub fn apply(&mut self, update: &SyncStateUpdate) {
        self.sync_code = Some(update.code);
        self.sync_code_updated_at = Some(update.updated_at);
        if let Some(synchronized_at) = update.synchronized_at {
            self.synchronized_at = Some(synchronized_at);
        }
        if update.code == SyncCode::Success {
            self.sync_count += 1;
        }
    }
}

/// A single-row change of an origin's sync state
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStateUpdate {
    pub code: SyncCode,
    pub updated_at: DateTime<Utc>,
    pub synchronized_at: Option<DateTime<Utc>>,
}

impl SyncStateUpdate {
    pub fn new(code: SyncCode, updated_at: DateTime<Utc>) -> Self {
        Self {
            code,
            updated_at,
            synchronized_at: None,
        }
    }

    pub fn synchronized_at(mut self, synchronized_at: DateTime<Utc>) -> Self {
        self.synchronized_at = Some(synchronized_at);
        self
    }
}
