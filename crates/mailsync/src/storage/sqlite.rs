//! SQLite-based storage for origins and email entities

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, named_params, params, params_from_iter};
use rusqlite_migration::{M, Migrations};

use super::traits::{CandidateOrder, CandidateQuery, EmailEntityStore, OriginRepository};
use crate::models::{
    AddressId, EmailAddress, EmailBody, EmailFolder, EmailId, EmailMessage, EmailRecipient,
    FolderId, FolderType, MailboxOrigin, OriginId, OwnerRef, RecipientType, SyncCode,
    SyncStateUpdate, ThreadId, folder_key,
};
use crate::sync::priority::never_updated_age;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied. Timestamps are stored as unix milliseconds
/// so that the candidate query can do arithmetic on them.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: mailbox origins
        M::up(
            r#"
            CREATE TABLE origins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                sync_code INTEGER,
                sync_code_updated_at INTEGER,
                synchronized_at INTEGER,
                sync_count INTEGER NOT NULL DEFAULT 0,
                owner_id INTEGER,
                organization_id INTEGER
            );

            CREATE INDEX idx_origins_sync
                ON origins(is_active, sync_code, sync_code_updated_at);
            "#,
        ),
        // Migration 2: email entities
        M::up(
            r#"
            CREATE TABLE email_folders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                origin_id INTEGER,
                folder_type TEXT NOT NULL,
                full_name TEXT NOT NULL,
                name TEXT NOT NULL,
                folder_key TEXT NOT NULL UNIQUE,
                FOREIGN KEY (origin_id) REFERENCES origins(id)
            );

            CREATE TABLE email_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                email_key TEXT NOT NULL UNIQUE,
                owner_kind TEXT,
                owner_id INTEGER
            );

            CREATE TABLE emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT,
                subject TEXT NOT NULL,
                from_name TEXT NOT NULL,
                from_address_id INTEGER NOT NULL,
                sent_at INTEGER NOT NULL,
                received_at INTEGER NOT NULL,
                in_reply_to TEXT,
                refs TEXT NOT NULL DEFAULT '[]',
                thread_id TEXT,
                is_head INTEGER NOT NULL DEFAULT 1,
                body BLOB,  -- zstd compressed
                body_is_text INTEGER NOT NULL DEFAULT 1,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (from_address_id) REFERENCES email_addresses(id)
            );

            CREATE UNIQUE INDEX idx_emails_message_id
                ON emails(message_id) WHERE message_id IS NOT NULL;
            CREATE INDEX idx_emails_thread_id ON emails(thread_id);

            CREATE TABLE email_recipients (
                email_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                recipient_type TEXT NOT NULL,
                name TEXT NOT NULL,
                address_id INTEGER NOT NULL,
                PRIMARY KEY (email_id, position),
                FOREIGN KEY (email_id) REFERENCES emails(id) ON DELETE CASCADE,
                FOREIGN KEY (address_id) REFERENCES email_addresses(id)
            );

            CREATE TABLE email_folder_links (
                email_id INTEGER NOT NULL,
                folder_id INTEGER NOT NULL,
                PRIMARY KEY (email_id, folder_id),
                FOREIGN KEY (email_id) REFERENCES emails(id) ON DELETE CASCADE,
                FOREIGN KEY (folder_id) REFERENCES email_folders(id)
            );

            CREATE INDEX idx_email_folder_links_folder ON email_folder_links(folder_id);
            "#,
        ),
    ])
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Invalid timestamp: {}", ms))
}

fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// Raw origin row, converted outside the rusqlite closure
struct OriginRow {
    id: i64,
    kind: String,
    is_active: bool,
    sync_code: Option<i64>,
    sync_code_updated_at: Option<i64>,
    synchronized_at: Option<i64>,
    sync_count: u32,
    owner_id: Option<i64>,
    organization_id: Option<i64>,
}

impl OriginRow {
    const COLUMNS: &'static str = "id, kind, is_active, sync_code, sync_code_updated_at, \
         synchronized_at, sync_count, owner_id, organization_id";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            is_active: row.get(2)?,
            sync_code: row.get(3)?,
            sync_code_updated_at: row.get(4)?,
            synchronized_at: row.get(5)?,
            sync_count: row.get(6)?,
            owner_id: row.get(7)?,
            organization_id: row.get(8)?,
        })
    }

    fn into_origin(self) -> Result<MailboxOrigin> {
        let sync_code = match self.sync_code {
            Some(code) => Some(
                SyncCode::from_code(code)
                    .with_context(|| format!("Unknown sync code {} on origin {}", code, self.id))?,
            ),
            None => None,
        };

        Ok(MailboxOrigin {
            id: OriginId(self.id),
            kind: self.kind.parse()?,
            is_active: self.is_active,
            sync_code,
            sync_code_updated_at: from_millis_opt(self.sync_code_updated_at)?,
            synchronized_at: from_millis_opt(self.synchronized_at)?,
            sync_count: self.sync_count,
            owner_id: self.owner_id,
            organization_id: self.organization_id,
        })
    }
}

/// SQLite-based storage
///
/// Implements [`OriginRepository`] directly. Email entities are written
/// through [`SqliteEntityStore`], either one statement at a time via the
/// [`EmailEntityStore`] impl of this type, or atomically via
/// [`SqliteMailStore::in_transaction`].
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets concurrent workers read origin state while one of them writes.
        // busy_timeout makes a worker wait for a competing writer instead of failing.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against an entity store bound to one SQLite transaction
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
    pub fn in_transaction<T, E>(
        &self,
        f: impl FnOnce(&SqliteEntityStore<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .context("Failed to begin transaction")?;

        let result = {
            let store = SqliteEntityStore::new(&tx);
            f(&store)
        };

        match result {
            Ok(value) => {
                tx.commit().context("Failed to commit transaction")?;
                Ok(value)
            }
            Err(e) => {
                // Dropping the transaction rolls it back
                drop(tx);
                Err(e)
            }
        }
    }

    /// Load a message by id
    pub fn get_message(&self, id: EmailId) -> Result<Option<EmailMessage>> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).load_message(id.0)
    }

    /// Count persisted messages
    pub fn count_messages(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count persisted addresses
    pub fn count_addresses(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM email_addresses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl OriginRepository for SqliteMailStore {
    fn find_sync_candidates(&self, query: &CandidateQuery) -> Result<Vec<MailboxOrigin>> {
        let conn = self.conn.lock().unwrap();

        let order_by = match query.order {
            CandidateOrder::SyncPriority => "p1, p2 DESC, sync_code_updated_at, id",
        };

        let sql = format!(
            "SELECT {columns},
                    CASE WHEN sync_code = :in_process THEN 0 ELSE 1 END AS p1,
                    (COALESCE(sync_code, :never_synced) * 100
                        + (:now - COALESCE(sync_code_updated_at, :min)) / 1000
                          / (CASE sync_code WHEN :success THEN 100 ELSE 1 END)) AS p2
             FROM origins
             WHERE (:active_only = 0 OR is_active = 1)
               AND (sync_code_updated_at IS NULL
                    OR sync_code_updated_at <= :border
                    OR sync_code = :in_process)
             ORDER BY {order_by}
             LIMIT :limit",
            columns = OriginRow::COLUMNS,
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":in_process": SyncCode::InProcess.code(),
                    ":success": SyncCode::Success.code(),
                    ":never_synced": SyncCode::NEVER_SYNCED,
                    ":now": to_millis(query.now),
                    ":min": to_millis(query.now - never_updated_age()),
                    ":active_only": query.active_only,
                    ":border": to_millis(query.updated_before),
                    ":limit": i64::try_from(query.max_results).unwrap_or(i64::MAX),
                },
                OriginRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(OriginRow::into_origin).collect()
    }

    fn update_sync_state(&self, id: OriginId, update: &SyncStateUpdate) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE origins SET
                sync_code = ?1,
                sync_code_updated_at = ?2,
                synchronized_at = COALESCE(?3, synchronized_at),
                sync_count = sync_count + CASE WHEN ?1 = ?4 THEN 1 ELSE 0 END
             WHERE id = ?5",
            params![
                update.code.code(),
                to_millis(update.updated_at),
                update.synchronized_at.map(to_millis),
                SyncCode::Success.code(),
                id.0,
            ],
        )
        .with_context(|| format!("Failed to update sync state of origin {}", id))?;
        Ok(())
    }

    fn bulk_reset_hanged(
        &self,
        from: SyncCode,
        to: SyncCode,
        updated_before: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE origins SET sync_code = ?1
             WHERE sync_code = ?2 AND sync_code_updated_at <= ?3",
            params![to.code(), from.code(), to_millis(updated_before)],
        )?;
        Ok(affected)
    }

    fn save_origin(&self, origin: MailboxOrigin) -> Result<OriginId> {
        let conn = self.conn.lock().unwrap();
        let id = if origin.id.0 == 0 { None } else { Some(origin.id.0) };

        // ON CONFLICT DO UPDATE keeps the row (and its folders) in place
        conn.execute(
            "INSERT INTO origins
             (id, kind, is_active, sync_code, sync_code_updated_at, synchronized_at,
              sync_count, owner_id, organization_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                is_active = excluded.is_active,
                sync_code = excluded.sync_code,
                sync_code_updated_at = excluded.sync_code_updated_at,
                synchronized_at = excluded.synchronized_at,
                sync_count = excluded.sync_count,
                owner_id = excluded.owner_id,
                organization_id = excluded.organization_id",
            params![
                id,
                origin.kind.as_str(),
                origin.is_active,
                origin.sync_code.map(|c| c.code()),
                origin.sync_code_updated_at.map(to_millis),
                origin.synchronized_at.map(to_millis),
                origin.sync_count,
                origin.owner_id,
                origin.organization_id,
            ],
        )?;

        Ok(OriginId(id.unwrap_or_else(|| conn.last_insert_rowid())))
    }

    fn get_origin(&self, id: OriginId) -> Result<Option<MailboxOrigin>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM origins WHERE id = ?", OriginRow::COLUMNS),
                [id.0],
                OriginRow::from_row,
            )
            .optional()?;
        row.map(OriginRow::into_origin).transpose()
    }

    fn list_origins(&self) -> Result<Vec<MailboxOrigin>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {} FROM origins ORDER BY id", OriginRow::COLUMNS))?;
        let rows = stmt
            .query_map([], OriginRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OriginRow::into_origin).collect()
    }
}

impl EmailEntityStore for SqliteMailStore {
    fn find_folder(&self, folder_type: FolderType, full_name: &str) -> Result<Option<EmailFolder>> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).find_folder(folder_type, full_name)
    }

    fn find_address(&self, normalized_email: &str) -> Result<Option<EmailAddress>> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).find_address(normalized_email)
    }

    fn find_messages_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<EmailMessage>> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).find_messages_by_message_ids(message_ids)
    }

    fn find_thread_messages(&self, thread_id: &ThreadId) -> Result<Vec<EmailMessage>> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).find_thread_messages(thread_id)
    }

    fn insert_folder(&self, folder: &EmailFolder) -> Result<FolderId> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).insert_folder(folder)
    }

    fn insert_address(&self, address: &EmailAddress) -> Result<AddressId> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).insert_address(address)
    }

    fn insert_message(&self, message: &EmailMessage) -> Result<EmailId> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).insert_message(message)
    }

    fn update_message(&self, message: &EmailMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        SqliteEntityStore::new(&conn).update_message(message)
    }
}

/// Email entity store over a borrowed connection or transaction
pub struct SqliteEntityStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteEntityStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_address(&self, id: i64) -> Result<EmailAddress> {
        let (email, owner_kind, owner_id): (String, Option<String>, Option<i64>) = self
            .conn
            .query_row(
                "SELECT email, owner_kind, owner_id FROM email_addresses WHERE id = ?",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .with_context(|| format!("Address {} not found", id))?;

        Ok(EmailAddress {
            id: Some(AddressId(id)),
            email,
            owner: owner_from_columns(owner_kind, owner_id),
        })
    }

    fn load_recipients(&self, email_id: i64) -> Result<Vec<EmailRecipient>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.recipient_type, r.name, a.id, a.email, a.owner_kind, a.owner_id
             FROM email_recipients r
             JOIN email_addresses a ON a.id = r.address_id
             WHERE r.email_id = ?
             ORDER BY r.position",
        )?;

        let rows = stmt
            .query_map([email_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(kind, name, address_id, email, owner_kind, owner_id)| {
                let kind = RecipientType::parse(&kind)
                    .with_context(|| format!("Unknown recipient type: {}", kind))?;
                Ok(EmailRecipient {
                    kind,
                    name,
                    address: EmailAddress {
                        id: Some(AddressId(address_id)),
                        email,
                        owner: owner_from_columns(owner_kind, owner_id),
                    },
                })
            })
            .collect()
    }

    fn load_folders(&self, email_id: i64) -> Result<Vec<EmailFolder>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.origin_id, f.folder_type, f.full_name, f.name
             FROM email_folder_links l
             JOIN email_folders f ON f.id = l.folder_id
             WHERE l.email_id = ?
             ORDER BY f.id",
        )?;

        let folders = stmt
            .query_map([email_id], folder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(folders)
    }

    fn save_folder_links(&self, email_id: i64, folders: &[EmailFolder]) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO email_folder_links (email_id, folder_id) VALUES (?, ?)",
        )?;

        for folder in folders {
            let folder_id = folder
                .id
                .with_context(|| format!("Folder {} is not persisted", folder.full_name))?;
            stmt.execute(params![email_id, folder_id.0])?;
        }

        Ok(())
    }

    /// Load a complete message by database id
    pub fn load_message(&self, id: i64) -> Result<Option<EmailMessage>> {
        let row: Option<(
            Option<String>,
            String,
            String,
            i64,
            i64,
            i64,
            Option<String>,
            String,
            Option<String>,
            bool,
            Option<Vec<u8>>,
            bool,
            bool,
        )> = self
            .conn
            .query_row(
                "SELECT message_id, subject, from_name, from_address_id, sent_at, received_at,
                        in_reply_to, refs, thread_id, is_head, body, body_is_text,
                        has_attachments
                 FROM emails WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            message_id,
            subject,
            from_name,
            from_address_id,
            sent_at,
            received_at,
            in_reply_to,
            refs,
            thread_id,
            is_head,
            body,
            body_is_text,
            has_attachments,
        )) = row
        else {
            return Ok(None);
        };

        let body = body
            .map(|compressed| -> Result<EmailBody> {
                let bytes = zstd::decode_all(compressed.as_slice())
                    .context("Failed to decompress body")?;
                Ok(EmailBody {
                    content: String::from_utf8(bytes).context("Body is not valid UTF-8")?,
                    is_text: body_is_text,
                    has_attachments,
                })
            })
            .transpose()?;

        Ok(Some(EmailMessage {
            id: Some(EmailId(id)),
            message_id,
            subject,
            from_name,
            from: self.load_address(from_address_id)?,
            recipients: self.load_recipients(id)?,
            sent_at: from_millis(sent_at)?,
            received_at: from_millis(received_at)?,
            in_reply_to,
            references: serde_json::from_str(&refs).context("Invalid references column")?,
            thread_id: thread_id.map(ThreadId::new),
            is_head,
            folders: self.load_folders(id)?,
            body,
        }))
    }

    fn load_messages(&self, ids: Vec<i64>) -> Result<Vec<EmailMessage>> {
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_message(id)? {
                Some(message) => messages.push(message),
                None => log::warn!("[STORE] Message {} vanished while loading", id),
            }
        }
        Ok(messages)
    }
}

fn owner_from_columns(kind: Option<String>, id: Option<i64>) -> Option<OwnerRef> {
    match (kind, id) {
        (Some(kind), Some(id)) => Some(OwnerRef { kind, id }),
        _ => None,
    }
}

fn folder_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmailFolder> {
    let folder_type: String = row.get(2)?;
    Ok(EmailFolder {
        id: Some(FolderId(row.get(0)?)),
        origin_id: row.get::<_, Option<i64>>(1)?.map(OriginId),
        folder_type: FolderType::parse(&folder_type),
        full_name: row.get(3)?,
        name: row.get(4)?,
    })
}

impl EmailEntityStore for SqliteEntityStore<'_> {
    fn find_folder(&self, folder_type: FolderType, full_name: &str) -> Result<Option<EmailFolder>> {
        let folder = self
            .conn
            .query_row(
                "SELECT id, origin_id, folder_type, full_name, name
                 FROM email_folders WHERE folder_key = ?",
                [folder_key(folder_type, full_name)],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    fn find_address(&self, normalized_email: &str) -> Result<Option<EmailAddress>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM email_addresses WHERE email_key = ?",
                [normalized_email],
                |row| row.get(0),
            )
            .optional()?;
        id.map(|id| self.load_address(id)).transpose()
    }

    fn find_messages_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<EmailMessage>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id FROM emails WHERE message_id IN ({}) ORDER BY id",
            placeholders
        ))?;
        let ids = stmt
            .query_map(params_from_iter(message_ids.iter()), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        self.load_messages(ids)
    }

    fn find_thread_messages(&self, thread_id: &ThreadId) -> Result<Vec<EmailMessage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM emails WHERE thread_id = ? ORDER BY sent_at, id")?;
        let ids = stmt
            .query_map([thread_id.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        self.load_messages(ids)
    }

    fn insert_folder(&self, folder: &EmailFolder) -> Result<FolderId> {
        self.conn
            .execute(
                "INSERT INTO email_folders (origin_id, folder_type, full_name, name, folder_key)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    folder.origin_id.map(|id| id.0),
                    folder.folder_type.as_str(),
                    folder.full_name,
                    folder.name,
                    folder.key(),
                ],
            )
            .with_context(|| format!("Failed to insert folder {}", folder.full_name))?;
        Ok(FolderId(self.conn.last_insert_rowid()))
    }

    fn insert_address(&self, address: &EmailAddress) -> Result<AddressId> {
        self.conn
            .execute(
                "INSERT INTO email_addresses (email, email_key, owner_kind, owner_id)
                 VALUES (?, ?, ?, ?)",
                params![
                    address.email,
                    address.key(),
                    address.owner.as_ref().map(|o| o.kind.as_str()),
                    address.owner.as_ref().map(|o| o.id),
                ],
            )
            .with_context(|| format!("Failed to insert address {}", address.email))?;
        Ok(AddressId(self.conn.last_insert_rowid()))
    }

    fn insert_message(&self, message: &EmailMessage) -> Result<EmailId> {
        let Some(from_id) = message.from.id else {
            bail!("Sender address {} is not persisted", message.from.email);
        };

        // zstd level 3 = good balance of speed vs compression
        let body = message
            .body
            .as_ref()
            .map(|b| zstd::encode_all(b.content.as_bytes(), 3))
            .transpose()
            .context("Failed to compress body")?;

        self.conn.execute(
            "INSERT INTO emails
             (message_id, subject, from_name, from_address_id, sent_at, received_at,
              in_reply_to, refs, thread_id, is_head, body, body_is_text, has_attachments)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.key(),
                message.subject,
                message.from_name,
                from_id.0,
                to_millis(message.sent_at),
                to_millis(message.received_at),
                message.in_reply_to,
                serde_json::to_string(&message.references)?,
                message.thread_id.as_ref().map(|t| t.as_str()),
                message.is_head,
                body,
                message.body.as_ref().is_none_or(|b| b.is_text),
                message.body.as_ref().is_some_and(|b| b.has_attachments),
            ],
        )?;
        let email_id = self.conn.last_insert_rowid();

        let mut stmt = self.conn.prepare(
            "INSERT INTO email_recipients (email_id, position, recipient_type, name, address_id)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for (i, recipient) in message.recipients.iter().enumerate() {
            let address_id = recipient
                .address
                .id
                .with_context(|| format!("Recipient {} is not persisted", recipient.address.email))?;
            stmt.execute(params![
                email_id,
                i as i64,
                recipient.kind.as_str(),
                recipient.name,
                address_id.0,
            ])?;
        }

        self.save_folder_links(email_id, &message.folders)?;

        Ok(EmailId(email_id))
    }

    fn update_message(&self, message: &EmailMessage) -> Result<()> {
        let Some(id) = message.id else {
            bail!("Cannot update a message that was never persisted");
        };

        self.conn.execute(
            "UPDATE emails SET thread_id = ?, is_head = ? WHERE id = ?",
            params![
                message.thread_id.as_ref().map(|t| t.as_str()),
                message.is_head,
                id.0,
            ],
        )?;
        self.save_folder_links(id.0, &message.folders)?;

        Ok(())
    }
}
