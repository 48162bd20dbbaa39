use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::{
    debug,
    trace,
};

use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};
use crate::agent::util::directories::database_path;
use crate::agent::util::error::{
    ErrorContext,
    UtilError,
};

#[derive(Debug, Clone, Copy)]
pub enum Table {
    /// Ordered conversation history, one JSON encoded message per row.
    ConversationHistory,
    /// Tools approved to run without confirmation.
    AllowedTools,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Table::ConversationHistory => write!(f, "conversation_history"),
            Table::AllowedTools => write!(f, "allowed_tools"),
        }
    }
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conversation_history (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        message TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS conversation_history_session ON conversation_history (session_id, seq)",
    "CREATE TABLE IF NOT EXISTS allowed_tools (
        tool_name TEXT NOT NULL,
        scope TEXT NOT NULL,
        PRIMARY KEY (tool_name, scope)
    )",
];

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    R2d2(#[from] r2d2::Error),
    #[error(transparent)]
    Util(#[from] UtilError),
}

impl ClassifiedError for DatabaseError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::System
    }
}

/// Sqlite storage shared by the persistent history store and allowed-tools provider.
#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Opens the database at the default data directory location.
    pub async fn new() -> Result<Self, DatabaseError> {
        Self::open(database_path()?).await
    }

    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context(format!("failed to create parent directory {:?} for database", parent))?;
            }
        }

        let pool = Pool::builder().build(SqliteConnectionManager::file(path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(path).context(format!("failed to get metadata for file {:?}", path))?;
            let mut permissions = metadata.permissions();
            if permissions.mode() & 0o777 != 0o600 {
                debug!(?path, "Setting database file permissions to 0600");
                permissions.set_mode(0o600);
                std::fs::set_permissions(path, permissions)
                    .context(format!("failed to set file permissions for file {:?}", path))?;
            }
        }

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// An ephemeral database. Uses a single connection since every sqlite memory connection is
    /// its own database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let pool = Pool::builder().max_size(1).build(SqliteConnectionManager::memory())?;
        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        let conn = self.pool.get()?;
        for migration in MIGRATIONS {
            conn.execute(migration, [])?;
        }
        Ok(())
    }

    pub fn append_message(&self, session_id: &str, message: &str) -> Result<(), DatabaseError> {
        trace!(session_id, "appending message");
        self.pool.get()?.execute(
            &format!("INSERT INTO {} (session_id, message) VALUES (?1, ?2)", Table::ConversationHistory),
            params![session_id, message],
        )?;
        Ok(())
    }

    /// Messages for a session in insertion order.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<String>, DatabaseError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT message FROM {} WHERE session_id = ?1 ORDER BY seq ASC",
            Table::ConversationHistory
        ))?;
        let rows = stmt.query_map([session_id], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear_messages(&self, session_id: &str) -> Result<usize, DatabaseError> {
        Ok(self.pool.get()?.execute(
            &format!("DELETE FROM {} WHERE session_id = ?1", Table::ConversationHistory),
            [session_id],
        )?)
    }

    pub fn insert_allowed_tool(&self, tool_name: &str, scope: &str) -> Result<(), DatabaseError> {
        self.pool.get()?.execute(
            &format!("INSERT OR REPLACE INTO {} (tool_name, scope) VALUES (?1, ?2)", Table::AllowedTools),
            params![tool_name, scope],
        )?;
        Ok(())
    }

    pub fn delete_allowed_tool(&self, tool_name: &str, scope: &str) -> Result<bool, DatabaseError> {
        let deleted = self.pool.get()?.execute(
            &format!("DELETE FROM {} WHERE tool_name = ?1 AND scope = ?2", Table::AllowedTools),
            params![tool_name, scope],
        )?;
        Ok(deleted > 0)
    }

    pub fn has_allowed_tool(&self, tool_name: &str, scope: &str) -> Result<bool, DatabaseError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT 1 FROM {} WHERE tool_name = ?1 AND scope = ?2",
            Table::AllowedTools
        ))?;
        Ok(stmt.exists(params![tool_name, scope])?)
    }

    pub fn list_allowed_tools(&self, scope: &str) -> Result<Vec<String>, DatabaseError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT tool_name FROM {} WHERE scope = ?1 ORDER BY tool_name",
            Table::AllowedTools
        ))?;
        let rows = stmt.query_map([scope], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::util::test::TestDir;

    #[test]
    fn test_error_display_debug() {
        let errors: Vec<DatabaseError> = vec![
            rusqlite::Error::SqliteSingleThreadedMode.into(),
            UtilError::MissingDataLocalDir.into(),
        ];
        for error in errors {
            assert_eq!(error.kind(), ErrorKind::System);
            eprintln!("{} {:?}", error, error);
        }
    }

    #[test]
    fn test_history_rows_are_ordered_per_session() {
        let db = Database::in_memory().unwrap();
        db.append_message("s1", "one").unwrap();
        db.append_message("s2", "other").unwrap();
        db.append_message("s1", "two").unwrap();

        assert_eq!(db.get_messages("s1").unwrap(), vec!["one", "two"]);
        assert_eq!(db.get_messages("s2").unwrap(), vec!["other"]);
        assert_eq!(db.clear_messages("s1").unwrap(), 2);
        assert!(db.get_messages("s1").unwrap().is_empty());
    }

    #[test]
    fn test_allowed_tools_rows() {
        let db = Database::in_memory().unwrap();
        db.insert_allowed_tool("deleteFile", "session:s1").unwrap();
        db.insert_allowed_tool("deleteFile", "session:s1").unwrap();
        db.insert_allowed_tool("search", "global").unwrap();

        assert!(db.has_allowed_tool("deleteFile", "session:s1").unwrap());
        assert!(!db.has_allowed_tool("deleteFile", "global").unwrap());
        assert_eq!(db.list_allowed_tools("session:s1").unwrap(), vec!["deleteFile"]);
        assert!(db.delete_allowed_tool("deleteFile", "session:s1").unwrap());
        assert!(!db.delete_allowed_tool("deleteFile", "session:s1").unwrap());
    }

    #[tokio::test]
    async fn test_open_file_database_persists() {
        let dir = TestDir::new();
        let path = dir.join("nested/data.sqlite3");
        {
            let db = Database::open(&path).await.unwrap();
            db.append_message("s1", "persisted").unwrap();
        }
        let db = Database::open(&path).await.unwrap();
        assert_eq!(db.get_messages("s1").unwrap(), vec!["persisted"]);
    }
}
