//! Storage traits and implementations
//!
//! [`OriginRepository`] holds the shared origin state that coordinates
//! workers; [`EmailEntityStore`] is what an entity batch persists into.
//! Both have an in-memory and a SQLite implementation.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::{SqliteEntityStore, SqliteMailStore};
pub use traits::{CandidateOrder, CandidateQuery, EmailEntityStore, OriginRepository};
