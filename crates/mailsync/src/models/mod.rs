//! Domain models for mailbox origins and email entities

mod address;
mod folder;
mod message;
mod origin;
mod thread;

pub use address::{
    AddressId, EmailAddress, EmailRecipient, OwnerRef, RecipientType, normalize_address,
};
pub use folder::{EmailFolder, FolderId, FolderType, folder_key};
pub use message::{EmailBody, EmailId, EmailMessage, EmailMessageBuilder};
pub use origin::{MailboxOrigin, OriginId, OriginKind, SyncCode, SyncStateUpdate};
pub use thread::ThreadId;
