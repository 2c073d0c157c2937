//! SQLite backend for rooms, steps, conversations, turns, notes, and
//! refinement history.
//!
//! Uses a single SQLite database file. Schema is created on open. Turn
//! indexes are assigned inside a transaction so concurrent appenders get
//! dense, strictly increasing positions. Note upserts are conditional on
//! `message_count` — a stale writer's update affects zero rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use studyloom_core::error::StoreError;
use studyloom_core::message::{Conversation, ConversationId, Role, RoomId, Turn};
use studyloom_core::note::{LearningNote, RoomNote};
use studyloom_core::room::{NewRefinement, RefinementRecord, Room, Step};
use studyloom_core::store::Store;
use tracing::{debug, info};
use uuid::Uuid;

/// The production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from a connection string.
    ///
    /// The database and all tables are created automatically. Pass
    /// `"sqlite::memory:"` for an in-process ephemeral database (tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Each connection to a plain ":memory:" database is a separate
        // database, so the ephemeral case must stay on one connection.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id         TEXT PRIMARY KEY,
                goal       TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS steps (
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                key         TEXT NOT NULL,
                label       TEXT NOT NULL,
                instruction TEXT NOT NULL,
                position    INTEGER NOT NULL,
                PRIMARY KEY (room_id, key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id         TEXT PRIMARY KEY,
                room_id    TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                step_key   TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                idx             INTEGER NOT NULL,
                role            TEXT NOT NULL,
                text            TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                truncated       INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (conversation_id, idx)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS learning_notes (
                conversation_id TEXT PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
                text            TEXT NOT NULL,
                message_count   INTEGER NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS refinement_history (
                id              TEXT PRIMARY KEY,
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                preference_text TEXT NOT NULL,
                old_steps       TEXT NOT NULL,
                new_steps       TEXT NOT NULL,
                summary         TEXT NOT NULL,
                created_at      TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_conversations_room ON conversations(room_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_refinements_room ON refinement_history(room_id, created_at DESC)",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_role(s: &str) -> Result<Role, StoreError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::QueryFailed(format!("unknown role '{other}'"))),
        }
    }

    fn row_to_room(row: &sqlx::sqlite::SqliteRow) -> Result<Room, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let goal: String = row
            .try_get("goal")
            .map_err(|e| StoreError::QueryFailed(format!("goal column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        Ok(Room {
            id: RoomId(id),
            goal,
            created_at: Self::parse_timestamp(&created_at),
        })
    }

    fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<Step, StoreError> {
        Ok(Step {
            key: row
                .try_get("key")
                .map_err(|e| StoreError::QueryFailed(format!("key column: {e}")))?,
            label: row
                .try_get("label")
                .map_err(|e| StoreError::QueryFailed(format!("label column: {e}")))?,
            instruction: row
                .try_get("instruction")
                .map_err(|e| StoreError::QueryFailed(format!("instruction column: {e}")))?,
            position: row
                .try_get("position")
                .map_err(|e| StoreError::QueryFailed(format!("position column: {e}")))?,
        })
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let room_id: String = row
            .try_get("room_id")
            .map_err(|e| StoreError::QueryFailed(format!("room_id column: {e}")))?;
        let step_key: String = row
            .try_get("step_key")
            .map_err(|e| StoreError::QueryFailed(format!("step_key column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        Ok(Conversation {
            id: ConversationId(id),
            room_id: RoomId(room_id),
            step_key,
            created_at: Self::parse_timestamp(&created_at),
        })
    }

    fn row_to_refinement(row: &sqlx::sqlite::SqliteRow) -> Result<RefinementRecord, StoreError> {
        let old_steps_json: String = row
            .try_get("old_steps")
            .map_err(|e| StoreError::QueryFailed(format!("old_steps column: {e}")))?;
        let new_steps_json: String = row
            .try_get("new_steps")
            .map_err(|e| StoreError::QueryFailed(format!("new_steps column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
        let room_id: String = row
            .try_get("room_id")
            .map_err(|e| StoreError::QueryFailed(format!("room_id column: {e}")))?;

        Ok(RefinementRecord {
            id: row
                .try_get("id")
                .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?,
            room_id: RoomId(room_id),
            preference_text: row
                .try_get("preference_text")
                .map_err(|e| StoreError::QueryFailed(format!("preference_text column: {e}")))?,
            old_steps: serde_json::from_str(&old_steps_json)
                .map_err(|e| StoreError::QueryFailed(format!("old_steps json: {e}")))?,
            new_steps: serde_json::from_str(&new_steps_json)
                .map_err(|e| StoreError::QueryFailed(format!("new_steps json: {e}")))?,
            summary: row
                .try_get("summary")
                .map_err(|e| StoreError::QueryFailed(format!("summary column: {e}")))?,
            created_at: Self::parse_timestamp(&created_at),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_room(&self, goal: &str, steps: &[Step]) -> Result<Room, StoreError> {
        let room = Room {
            id: RoomId::new(),
            goal: goal.to_string(),
            created_at: Utc::now(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query("INSERT INTO rooms (id, goal, created_at) VALUES (?, ?, ?)")
            .bind(&room.id.0)
            .bind(&room.goal)
            .bind(room.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insert room: {e}")))?;

        for step in steps {
            sqlx::query(
                "INSERT INTO steps (room_id, key, label, instruction, position) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&room.id.0)
            .bind(&step.key)
            .bind(&step.label)
            .bind(&step.instruction)
            .bind(step.position)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insert step: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(room)
    }

    async fn get_room(&self, id: &RoomId) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query("SELECT id, goal, created_at FROM rooms WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_room).transpose()
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let rows = sqlx::query("SELECT id, goal, created_at FROM rooms ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(Self::row_to_room).collect()
    }

    async fn list_steps(&self, room: &RoomId) -> Result<Vec<Step>, StoreError> {
        let rows = sqlx::query(
            "SELECT key, label, instruction, position FROM steps WHERE room_id = ? ORDER BY position ASC",
        )
        .bind(&room.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(Self::row_to_step).collect()
    }

    async fn replace_steps_with_history(
        &self,
        room: &RoomId,
        refinement: NewRefinement,
    ) -> Result<RefinementRecord, StoreError> {
        let old_steps = self.list_steps(room).await?;

        let record = RefinementRecord {
            id: Uuid::new_v4().to_string(),
            room_id: room.clone(),
            preference_text: refinement.preference_text,
            old_steps,
            new_steps: refinement.new_steps,
            summary: refinement.summary,
            created_at: Utc::now(),
        };

        let old_json = serde_json::to_string(&record.old_steps)
            .map_err(|e| StoreError::Storage(format!("serialize old steps: {e}")))?;
        let new_json = serde_json::to_string(&record.new_steps)
            .map_err(|e| StoreError::Storage(format!("serialize new steps: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM steps WHERE room_id = ?")
            .bind(&room.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("delete steps: {e}")))?;

        for step in &record.new_steps {
            sqlx::query(
                "INSERT INTO steps (room_id, key, label, instruction, position) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&room.0)
            .bind(&step.key)
            .bind(&step.label)
            .bind(&step.instruction)
            .bind(step.position)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insert step: {e}")))?;
        }

        sqlx::query(
            r#"
            INSERT INTO refinement_history
                (id, room_id, preference_text, old_steps, new_steps, summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&room.0)
        .bind(&record.preference_text)
        .bind(&old_json)
        .bind(&new_json)
        .bind(&record.summary)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert refinement: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(record)
    }

    async fn get_refinement(&self, id: &str) -> Result<Option<RefinementRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, room_id, preference_text, old_steps, new_steps, summary, created_at
             FROM refinement_history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_refinement).transpose()
    }

    async fn list_refinements(&self, room: &RoomId) -> Result<Vec<RefinementRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, room_id, preference_text, old_steps, new_steps, summary, created_at
             FROM refinement_history WHERE room_id = ? ORDER BY created_at DESC",
        )
        .bind(&room.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(Self::row_to_refinement).collect()
    }

    async fn create_conversation(
        &self,
        room: &RoomId,
        step_key: &str,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: ConversationId::new(),
            room_id: room.clone(),
            step_key: step_key.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO conversations (id, room_id, step_key, created_at) VALUES (?, ?, ?, ?)")
            .bind(&conversation.id.0)
            .bind(&room.0)
            .bind(step_key)
            .bind(conversation.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("insert conversation: {e}")))?;

        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let row =
            sqlx::query("SELECT id, room_id, step_key, created_at FROM conversations WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_conversations(&self, room: &RoomId) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, room_id, step_key, created_at FROM conversations
             WHERE room_id = ? ORDER BY created_at ASC",
        )
        .bind(&room.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn append_turn(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
        truncated: bool,
    ) -> Result<Turn, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        // Next dense index, assigned inside the transaction so concurrent
        // appenders cannot race to the same position.
        let row = sqlx::query(
            "SELECT COALESCE(MAX(idx) + 1, 0) AS next_idx FROM turns WHERE conversation_id = ?",
        )
        .bind(&conversation.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("next index: {e}")))?;
        let index: i64 = row
            .try_get("next_idx")
            .map_err(|e| StoreError::QueryFailed(format!("next_idx column: {e}")))?;

        let turn = Turn {
            index,
            role,
            text: text.to_string(),
            created_at: Utc::now(),
            truncated,
        };

        sqlx::query(
            "INSERT INTO turns (conversation_id, idx, role, text, created_at, truncated)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.0)
        .bind(turn.index)
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(turn.created_at.to_rfc3339())
        .bind(turn.truncated as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("insert turn: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(turn)
    }

    async fn list_turns(&self, conversation: &ConversationId) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT idx, role, text, created_at, truncated FROM turns
             WHERE conversation_id = ? ORDER BY idx ASC",
        )
        .bind(&conversation.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let role_str: String = row
                    .try_get("role")
                    .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
                let created_at: String = row
                    .try_get("created_at")
                    .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
                let truncated: i64 = row
                    .try_get("truncated")
                    .map_err(|e| StoreError::QueryFailed(format!("truncated column: {e}")))?;
                Ok(Turn {
                    index: row
                        .try_get("idx")
                        .map_err(|e| StoreError::QueryFailed(format!("idx column: {e}")))?,
                    role: Self::parse_role(&role_str)?,
                    text: row
                        .try_get("text")
                        .map_err(|e| StoreError::QueryFailed(format!("text column: {e}")))?,
                    created_at: Self::parse_timestamp(&created_at),
                    truncated: truncated != 0,
                })
            })
            .collect()
    }

    async fn message_count(&self, conversation: &ConversationId) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM turns WHERE conversation_id = ?")
            .bind(&conversation.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.try_get("n")
            .map_err(|e| StoreError::QueryFailed(format!("n column: {e}")))
    }

    async fn get_note(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<LearningNote>, StoreError> {
        let row = sqlx::query(
            "SELECT conversation_id, text, message_count, updated_at FROM learning_notes
             WHERE conversation_id = ?",
        )
        .bind(&conversation.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        row.map(|row| {
            let id: String = row
                .try_get("conversation_id")
                .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
            let updated_at: String = row
                .try_get("updated_at")
                .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;
            Ok(LearningNote {
                conversation_id: ConversationId(id),
                text: row
                    .try_get("text")
                    .map_err(|e| StoreError::QueryFailed(format!("text column: {e}")))?,
                message_count: row
                    .try_get("message_count")
                    .map_err(|e| StoreError::QueryFailed(format!("message_count column: {e}")))?,
                updated_at: Self::parse_timestamp(&updated_at),
            })
        })
        .transpose()
    }

    async fn upsert_note_if_newer(&self, note: &LearningNote) -> Result<bool, StoreError> {
        // Conditional upsert: a writer carrying a stale (lower or equal)
        // message_count affects zero rows and is thereby discarded.
        let result = sqlx::query(
            r#"
            INSERT INTO learning_notes (conversation_id, text, message_count, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                text = excluded.text,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at
            WHERE excluded.message_count > learning_notes.message_count
            "#,
        )
        .bind(&note.conversation_id.0)
        .bind(&note.text)
        .bind(note.message_count)
        .bind(note.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("upsert note: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn notes_for_room(
        &self,
        room: &RoomId,
        excluding: &ConversationId,
    ) -> Result<Vec<RoomNote>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(s.label, c.step_key) AS step_label,
                   n.conversation_id, n.text, n.message_count, n.updated_at
            FROM learning_notes n
            JOIN conversations c ON c.id = n.conversation_id
            LEFT JOIN steps s ON s.room_id = c.room_id AND s.key = c.step_key
            WHERE c.room_id = ? AND c.id != ?
            ORDER BY c.created_at ASC
            "#,
        )
        .bind(&room.0)
        .bind(&excluding.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("conversation_id")
                    .map_err(|e| StoreError::QueryFailed(format!("conversation_id column: {e}")))?;
                let updated_at: String = row
                    .try_get("updated_at")
                    .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;
                Ok(RoomNote {
                    step_label: row
                        .try_get("step_label")
                        .map_err(|e| StoreError::QueryFailed(format!("step_label column: {e}")))?,
                    note: LearningNote {
                        conversation_id: ConversationId(id),
                        text: row
                            .try_get("text")
                            .map_err(|e| StoreError::QueryFailed(format!("text column: {e}")))?,
                        message_count: row.try_get("message_count").map_err(|e| {
                            StoreError::QueryFailed(format!("message_count column: {e}"))
                        })?,
                        updated_at: Self::parse_timestamp(&updated_at),
                    },
                })
            })
            .collect()
    }
}
