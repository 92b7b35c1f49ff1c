use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use autostream_core::analytics::SessionRecord;
use autostream_core::domain::{Intent, LeadInfo, SessionId};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn save(&self, record: SessionRecord) -> Result<(), RepositoryError> {
        let lead_info_json = serde_json::to_string(&record.lead_info)
            .map_err(|e| RepositoryError::Decode(format!("lead_info is not serializable: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO conversation_session (
                session_id, recorded_at, turns, lead_captured, lead_info_json,
                final_intent, completed
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                recorded_at = excluded.recorded_at,
                turns = excluded.turns,
                lead_captured = excluded.lead_captured,
                lead_info_json = excluded.lead_info_json,
                final_intent = excluded.final_intent,
                completed = excluded.completed
            "#,
        )
        .bind(&record.session_id.0)
        .bind(record.recorded_at.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(i64::from(record.turns))
        .bind(record.lead_captured)
        .bind(lead_info_json)
        .bind(record.final_intent.as_str())
        .bind(record.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT
                session_id, recorded_at, turns, lead_captured, lead_info_json,
                final_intent, completed
            FROM conversation_session
            ORDER BY recorded_at ASC, session_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_record_from_row).collect()
    }
}

fn session_record_from_row(row: &SqliteRow) -> Result<SessionRecord, RepositoryError> {
    let recorded_at: String = row.try_get("recorded_at")?;
    let turns: i64 = row.try_get("turns")?;
    let lead_info_json: String = row.try_get("lead_info_json")?;
    let final_intent: String = row.try_get("final_intent")?;

    Ok(SessionRecord {
        session_id: SessionId(row.try_get("session_id")?),
        recorded_at: parse_timestamp("recorded_at", recorded_at)?,
        turns: u32::try_from(turns)
            .map_err(|_| RepositoryError::Decode(format!("invalid turns: {turns}")))?,
        lead_captured: row.try_get("lead_captured")?,
        lead_info: serde_json::from_str::<LeadInfo>(&lead_info_json)
            .map_err(|e| RepositoryError::Decode(format!("invalid lead_info_json: {e}")))?,
        final_intent: Intent::parse(&final_intent)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid final_intent: {final_intent}")))?,
        completed: row.try_get("completed")?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use autostream_core::analytics::SessionRecord;
    use autostream_core::domain::{Intent, LeadField, LeadInfo, SessionId};

    use super::SqlSessionRepository;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn captured_record(id: &str) -> SessionRecord {
        SessionRecord {
            session_id: SessionId(id.to_string()),
            recorded_at: Utc::now(),
            turns: 5,
            lead_captured: true,
            lead_info: LeadInfo::default()
                .with(LeadField::Name, "Sam")
                .with(LeadField::Email, "sam@x.com")
                .with(LeadField::Platform, "Instagram"),
            final_intent: Intent::HighIntent,
            completed: true,
        }
    }

    #[tokio::test]
    async fn sql_session_repo_round_trips_records() {
        let repo = SqlSessionRepository::new(setup_pool().await);
        let captured = captured_record("S-1");
        let abandoned = SessionRecord {
            session_id: SessionId("S-0".to_string()),
            recorded_at: captured.recorded_at - Duration::minutes(5),
            turns: 10,
            lead_captured: false,
            lead_info: LeadInfo::default().with(LeadField::Name, "Alex"),
            final_intent: Intent::Unset,
            completed: false,
        };

        repo.save(captured.clone()).await.expect("save captured");
        repo.save(abandoned.clone()).await.expect("save abandoned");

        let records = repo.list().await.expect("list");
        assert_eq!(records, vec![abandoned, captured]);
    }

    #[tokio::test]
    async fn saving_same_session_twice_replaces_the_row() {
        let repo = SqlSessionRepository::new(setup_pool().await);
        let mut record = captured_record("S-2");
        repo.save(record.clone()).await.expect("first save");

        record.turns = 7;
        repo.save(record.clone()).await.expect("second save");

        let records = repo.list().await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].turns, 7);
    }

    #[tokio::test]
    async fn unknown_intent_label_is_a_decode_error() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO conversation_session (session_id, recorded_at, turns, final_intent)
             VALUES ('S-bad', ?, 1, 'shopping')",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("insert raw row");

        let error = SqlSessionRepository::new(pool).list().await.expect_err("decode must fail");
        assert!(matches!(error, RepositoryError::Decode(ref message) if message.contains("shopping")));
    }
}
