//! Conversation persistence using SQLite
//!
//! The store holds exactly one conversation: the one the session had when it
//! was last saved. Saving replaces the stored copy wholesale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::conversation::{Role, Turn, TurnId, TurnStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row at position {position}: {reason}")]
    Corrupt { position: i64, reason: String },
}

/// Local key-value style storage for the session's conversation
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save(&self, turns: &[Turn]) -> Result<(), StoreError>;

    /// The stored conversation, or an empty one if nothing was saved
    async fn load(&self) -> Result<Vec<Turn>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

/// SQLite-backed conversation store
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    /// Create a new memory store with the given SQLite database path
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        // One connection, otherwise every connection sees its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                position INTEGER PRIMARY KEY,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'complete',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, turns: &[Turn]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM turns").execute(&mut *tx).await?;

        for (position, turn) in turns.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO turns (position, role, content, status, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(turn.status.as_str())
            .bind(turn.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(turns = turns.len(), "saved conversation");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Turn>, StoreError> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT position, role, content, status, created_at
            FROM turns
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(position, role, content, status, created_at)| {
                let corrupt = |reason: String| StoreError::Corrupt { position, reason };

                let role = Role::parse(&role).ok_or_else(|| corrupt(format!("role {:?}", role)))?;
                let status = TurnStatus::parse(&status)
                    .ok_or_else(|| corrupt(format!("status {:?}", status)))?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| corrupt(format!("created_at: {}", e)))?;

                Ok(Turn {
                    // Ids are session-scoped; the conversation assigns fresh ones
                    id: TurnId(position as u64),
                    role,
                    content,
                    status,
                    created_at,
                })
            })
            .collect()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM turns").execute(&self.pool).await?;
        Ok(())
    }
}
