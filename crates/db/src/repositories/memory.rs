use tokio::sync::RwLock;

use autostream_core::analytics::SessionRecord;

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    records: RwLock<Vec<SessionRecord>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn save(&self, record: SessionRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|existing| existing.session_id == record.session_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        let mut records = self.records.read().await.clone();
        records.sort_by_key(|record| record.recorded_at);
        Ok(records)
    }
}
