//! Tools that may run without asking, remembered per session or globally.

use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::Arc;

use async_trait::async_trait;
use globset::GlobSet;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};
use crate::agent::util::error::UtilError;
use crate::agent::util::glob::compile_patterns;
use crate::database::{
    Database,
    DatabaseError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AllowedToolScope {
    Global,
    Session(String),
}

impl AllowedToolScope {
    /// Session scope when a session id is known, global otherwise.
    pub fn for_session(session_id: Option<&str>) -> Self {
        match session_id {
            Some(id) => Self::Session(id.to_string()),
            None => Self::Global,
        }
    }

    /// Storage key of the scope.
    pub fn key(&self) -> String {
        match self {
            AllowedToolScope::Global => "global".to_string(),
            AllowedToolScope::Session(id) => format!("session:{id}"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AllowedToolsError {
    #[error("allowed tools storage is unavailable: {}", .0)]
    Database(Arc<DatabaseError>),
    #[error("invalid allowed tool pattern: {}", .0)]
    InvalidPattern(String),
}

impl From<DatabaseError> for AllowedToolsError {
    fn from(value: DatabaseError) -> Self {
        Self::Database(Arc::new(value))
    }
}

impl From<UtilError> for AllowedToolsError {
    fn from(value: UtilError) -> Self {
        Self::InvalidPattern(value.to_string())
    }
}

impl ClassifiedError for AllowedToolsError {
    fn kind(&self) -> ErrorKind {
        match self {
            AllowedToolsError::Database(_) => ErrorKind::System,
            AllowedToolsError::InvalidPattern(_) => ErrorKind::User,
        }
    }
}

/// Allow-list consulted before a confirmation is requested.
///
/// Writes are atomic with respect to concurrent reads: a reader sees an entry either fully
/// present or absent.
#[async_trait]
pub trait AllowedToolsProvider: std::fmt::Debug + Send + Sync {
    async fn allow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<(), AllowedToolsError>;

    /// Returns whether an entry was removed.
    async fn disallow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<bool, AllowedToolsError>;

    /// Checks the session scope, then the global scope, then configured patterns.
    async fn is_tool_allowed(&self, tool_name: &str, session_id: Option<&str>) -> Result<bool, AllowedToolsError>;

    async fn list_allowed(&self, scope: &AllowedToolScope) -> Result<Vec<String>, AllowedToolsError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAllowedToolsProvider {
    entries: RwLock<HashMap<AllowedToolScope, HashSet<String>>>,
    patterns: Option<GlobSet>,
}

impl InMemoryAllowedToolsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Glob patterns of tool names allowed everywhere, e.g. `fs_*`.
    pub fn with_patterns<T, U>(mut self, patterns: T) -> Result<Self, AllowedToolsError>
    where
        T: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        self.patterns = compile_non_empty(patterns)?;
        Ok(self)
    }
}

#[async_trait]
impl AllowedToolsProvider for InMemoryAllowedToolsProvider {
    async fn allow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<(), AllowedToolsError> {
        debug!(tool_name, scope = %scope.key(), "allowing tool");
        self.entries
            .write()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(tool_name.to_string());
        Ok(())
    }

    async fn disallow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<bool, AllowedToolsError> {
        Ok(self
            .entries
            .write()
            .await
            .get_mut(scope)
            .is_some_and(|tools| tools.remove(tool_name)))
    }

    async fn is_tool_allowed(&self, tool_name: &str, session_id: Option<&str>) -> Result<bool, AllowedToolsError> {
        let entries = self.entries.read().await;
        let in_scope = |scope: &AllowedToolScope| entries.get(scope).is_some_and(|tools| tools.contains(tool_name));
        if let Some(id) = session_id {
            if in_scope(&AllowedToolScope::Session(id.to_string())) {
                return Ok(true);
            }
        }
        Ok(in_scope(&AllowedToolScope::Global) || matches_patterns(self.patterns.as_ref(), tool_name))
    }

    async fn list_allowed(&self, scope: &AllowedToolScope) -> Result<Vec<String>, AllowedToolsError> {
        let mut tools: Vec<_> = self
            .entries
            .read()
            .await
            .get(scope)
            .map(|tools| tools.iter().cloned().collect())
            .unwrap_or_default();
        tools.sort();
        Ok(tools)
    }
}

/// Allow-list persisted in the `allowed_tools` table.
#[derive(Debug, Clone)]
pub struct SqliteAllowedToolsProvider {
    database: Database,
    patterns: Option<GlobSet>,
}

impl SqliteAllowedToolsProvider {
    pub fn new(database: Database) -> Self {
        Self {
            database,
            patterns: None,
        }
    }

    pub fn with_patterns<T, U>(mut self, patterns: T) -> Result<Self, AllowedToolsError>
    where
        T: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        self.patterns = compile_non_empty(patterns)?;
        Ok(self)
    }
}

#[async_trait]
impl AllowedToolsProvider for SqliteAllowedToolsProvider {
    async fn allow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<(), AllowedToolsError> {
        debug!(tool_name, scope = %scope.key(), "persisting allowed tool");
        Ok(self.database.insert_allowed_tool(tool_name, &scope.key())?)
    }

    async fn disallow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<bool, AllowedToolsError> {
        Ok(self.database.delete_allowed_tool(tool_name, &scope.key())?)
    }

    async fn is_tool_allowed(&self, tool_name: &str, session_id: Option<&str>) -> Result<bool, AllowedToolsError> {
        if let Some(id) = session_id {
            if self
                .database
                .has_allowed_tool(tool_name, &AllowedToolScope::Session(id.to_string()).key())?
            {
                return Ok(true);
            }
        }
        Ok(self
            .database
            .has_allowed_tool(tool_name, &AllowedToolScope::Global.key())?
            || matches_patterns(self.patterns.as_ref(), tool_name))
    }

    async fn list_allowed(&self, scope: &AllowedToolScope) -> Result<Vec<String>, AllowedToolsError> {
        Ok(self.database.list_allowed_tools(&scope.key())?)
    }
}

/// Layers configured glob patterns over another provider. Remembered entries still go to
/// the wrapped provider.
#[derive(Debug)]
pub struct PatternAllowedToolsProvider {
    inner: Arc<dyn AllowedToolsProvider>,
    patterns: Option<GlobSet>,
}

impl PatternAllowedToolsProvider {
    pub fn new<T, U>(inner: Arc<dyn AllowedToolsProvider>, patterns: T) -> Result<Self, AllowedToolsError>
    where
        T: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        Ok(Self {
            inner,
            patterns: compile_non_empty(patterns)?,
        })
    }
}

#[async_trait]
impl AllowedToolsProvider for PatternAllowedToolsProvider {
    async fn allow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<(), AllowedToolsError> {
        self.inner.allow_tool(tool_name, scope).await
    }

    async fn disallow_tool(&self, tool_name: &str, scope: &AllowedToolScope) -> Result<bool, AllowedToolsError> {
        self.inner.disallow_tool(tool_name, scope).await
    }

    async fn is_tool_allowed(&self, tool_name: &str, session_id: Option<&str>) -> Result<bool, AllowedToolsError> {
        if matches_patterns(self.patterns.as_ref(), tool_name) {
            return Ok(true);
        }
        self.inner.is_tool_allowed(tool_name, session_id).await
    }

    async fn list_allowed(&self, scope: &AllowedToolScope) -> Result<Vec<String>, AllowedToolsError> {
        self.inner.list_allowed(scope).await
    }
}

fn compile_non_empty<T, U>(patterns: T) -> Result<Option<GlobSet>, AllowedToolsError>
where
    T: IntoIterator<Item = U>,
    U: AsRef<str>,
{
    let patterns: Vec<U> = patterns.into_iter().collect();
    if patterns.is_empty() {
        return Ok(None);
    }
    Ok(Some(compile_patterns(patterns)?))
}

fn matches_patterns(patterns: Option<&GlobSet>, tool_name: &str) -> bool {
    patterns.is_some_and(|set| set.is_match(tool_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(provider: &dyn AllowedToolsProvider) {
        let s1 = AllowedToolScope::Session("s1".to_string());
        assert!(!provider.is_tool_allowed("deleteFile", Some("s1")).await.unwrap());

        provider.allow_tool("deleteFile", &s1).await.unwrap();
        assert!(provider.is_tool_allowed("deleteFile", Some("s1")).await.unwrap());
        assert!(!provider.is_tool_allowed("deleteFile", Some("s2")).await.unwrap());
        assert!(!provider.is_tool_allowed("deleteFile", None).await.unwrap());

        provider.allow_tool("search", &AllowedToolScope::Global).await.unwrap();
        assert!(provider.is_tool_allowed("search", Some("s2")).await.unwrap());
        assert!(provider.is_tool_allowed("search", None).await.unwrap());

        assert_eq!(provider.list_allowed(&s1).await.unwrap(), vec!["deleteFile"]);
        assert!(provider.disallow_tool("deleteFile", &s1).await.unwrap());
        assert!(!provider.disallow_tool("deleteFile", &s1).await.unwrap());
        assert!(!provider.is_tool_allowed("deleteFile", Some("s1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_provider() {
        exercise(&InMemoryAllowedToolsProvider::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_provider() {
        exercise(&SqliteAllowedToolsProvider::new(Database::in_memory().unwrap())).await;
    }

    #[tokio::test]
    async fn test_patterns() {
        let provider = InMemoryAllowedToolsProvider::new().with_patterns(["fs_*", "echo"]).unwrap();
        assert!(provider.is_tool_allowed("fs_read", None).await.unwrap());
        assert!(provider.is_tool_allowed("echo", Some("s1")).await.unwrap());
        assert!(!provider.is_tool_allowed("execute_bash", None).await.unwrap());

        let err = InMemoryAllowedToolsProvider::new().with_patterns(["a{"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
    }

    #[tokio::test]
    async fn test_pattern_layer_keeps_inner_entries() {
        let inner = Arc::new(InMemoryAllowedToolsProvider::new());
        let provider = PatternAllowedToolsProvider::new(inner.clone(), ["fs_*"]).unwrap();
        assert!(provider.is_tool_allowed("fs_write", Some("s1")).await.unwrap());
        assert!(!provider.is_tool_allowed("search", Some("s1")).await.unwrap());

        provider
            .allow_tool("search", &AllowedToolScope::Session("s1".to_string()))
            .await
            .unwrap();
        assert!(provider.is_tool_allowed("search", Some("s1")).await.unwrap());
        assert!(inner.is_tool_allowed("search", Some("s1")).await.unwrap());
        assert!(!inner.is_tool_allowed("fs_write", None).await.unwrap());
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(AllowedToolScope::for_session(None).key(), "global");
        assert_eq!(AllowedToolScope::for_session(Some("s1")).key(), "session:s1");
    }
}
