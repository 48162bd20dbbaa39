use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::agent::llm::types::InternalMessage;
use crate::database::{
    Database,
    DatabaseError,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum HistoryError {
    #[error("history storage is unavailable: {}", .0)]
    Database(Arc<DatabaseError>),
    #[error("failed to encode or decode a stored message: {}", .0)]
    Serialization(String),
    #[error("history storage task failed: {}", .0)]
    Task(String),
}

impl From<DatabaseError> for HistoryError {
    fn from(value: DatabaseError) -> Self {
        Self::Database(Arc::new(value))
    }
}

impl From<tokio::task::JoinError> for HistoryError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Ordered, append-only message storage keyed by session id.
#[async_trait]
pub trait HistoryStore: std::fmt::Debug + Send + Sync {
    async fn append(&self, session_id: &str, message: &InternalMessage) -> Result<(), HistoryError>;

    /// Every message of the session in append order.
    async fn load(&self, session_id: &str) -> Result<Vec<InternalMessage>, HistoryError>;

    /// Removes the whole session.
    async fn clear(&self, session_id: &str) -> Result<(), HistoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, Vec<InternalMessage>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, session_id: &str, message: &InternalMessage) -> Result<(), HistoryError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<InternalMessage>, HistoryError> {
        Ok(self.sessions.read().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// History persisted in the `conversation_history` table, one JSON document per message.
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    database: Database,
}

impl SqliteHistoryStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl SqliteHistoryStore {
    /// Runs a blocking database call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, HistoryError> + Send + 'static,
    {
        let database = self.database.clone();
        tokio::task::spawn_blocking(move || f(&database)).await?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, session_id: &str, message: &InternalMessage) -> Result<(), HistoryError> {
        let encoded = serde_json::to_string(message)?;
        let session_id = session_id.to_string();
        self.blocking(move |db| Ok(db.append_message(&session_id, &encoded)?))
            .await
    }

    async fn load(&self, session_id: &str) -> Result<Vec<InternalMessage>, HistoryError> {
        let session_id = session_id.to_string();
        let rows = self.blocking(move |db| Ok(db.get_messages(&session_id)?)).await?;
        rows.iter()
            .map(|row| serde_json::from_str(row).map_err(HistoryError::from))
            .collect()
    }

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        let session_id = session_id.to_string();
        self.blocking(move |db| {
            db.clear_messages(&session_id)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent::llm::types::{
        ContentPart,
        ToolCall,
    };

    fn sample() -> Vec<InternalMessage> {
        vec![
            InternalMessage::user("Calculate 2+2"),
            InternalMessage::assistant(None, vec![ToolCall::new(
                "call_1",
                "calculator",
                json!({"expression": "2+2"}),
            )]),
            InternalMessage::tool_result("call_1", "calculator", vec![ContentPart::text("4")]),
        ]
    }

    async fn exercise(store: &dyn HistoryStore) {
        let appended = sample();
        for msg in &appended {
            store.append("s1", msg).await.unwrap();
        }
        store.append("s2", &InternalMessage::user("other")).await.unwrap();

        // Timestamps survive storage exactly.
        assert_eq!(store.load("s1").await.unwrap(), appended);
        assert_eq!(store.load("s2").await.unwrap().len(), 1);
        assert!(store.load("missing").await.unwrap().is_empty());

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());
        assert_eq!(store.load("s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        exercise(&InMemoryHistoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        exercise(&SqliteHistoryStore::new(Database::in_memory().unwrap())).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_sqlite_store_on_current_thread_runtime() {
        let store = SqliteHistoryStore::new(Database::in_memory().unwrap());
        let msg_one = InternalMessage::user("one");
        let msg_two = InternalMessage::user("two");
        let (first, second) = tokio::join!(
            store.append("s1", &msg_one),
            store.append("s2", &msg_two),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(store.load("s1").await.unwrap()[0].text(), "one");
        assert_eq!(store.load("s2").await.unwrap()[0].text(), "two");
    }

    #[tokio::test]
    async fn test_sqlite_store_rejects_corrupt_rows() {
        let db = Database::in_memory().unwrap();
        db.append_message("s1", "not json").unwrap();
        let err = SqliteHistoryStore::new(db).load("s1").await.unwrap_err();
        assert!(matches!(err, HistoryError::Serialization(_)));
    }
}
