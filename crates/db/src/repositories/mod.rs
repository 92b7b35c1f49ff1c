use async_trait::async_trait;
use thiserror::Error;

use autostream_core::analytics::SessionRecord;

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Append-only log of finished chat sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Saving a record whose session id already exists replaces it.
    async fn save(&self, record: SessionRecord) -> Result<(), RepositoryError>;
    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<SessionRecord>, RepositoryError>;
}
