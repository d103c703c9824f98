//! Per-client session isolation for the web front-end.
//!
//! Each session owns a [`RunContext`] rooted at `<results_dir>/<session_id>`,
//! so artifacts of overlapping runs from different clients never mix.
//! Sessions expire a fixed time after creation; expired sessions are removed
//! together with their directories.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use load_engine::RunContext;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// One client's isolated workspace.
#[derive(Debug)]
pub struct TestSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    created: Instant,
    pub context: Arc<RunContext>,
}

impl TestSession {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created.elapsed() >= ttl
    }

    /// Remove the session directory.
    fn cleanup(&self) -> std::io::Result<()> {
        let dir = self.context.artifact_dir();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Registry of live sessions. Lives in the application state.
pub struct SessionManager {
    results_dir: PathBuf,
    ttl: Duration,
    sessions: RwLock<HashMap<String, Arc<TestSession>>>,
}

impl SessionManager {
    pub fn new(results_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            results_dir: results_dir.into(),
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session with a fresh directory.
    pub async fn create_session(&self) -> Result<Arc<TestSession>> {
        let id = Uuid::new_v4().to_string();
        let context = RunContext::create(self.results_dir.join(&id))
            .with_context(|| format!("Failed to create directory for session {}", id))?;

        let session = Arc::new(TestSession {
            id: id.clone(),
            created_at: Utc::now(),
            created: Instant::now(),
            context: Arc::new(context),
        });
        self.sessions.write().await.insert(id.clone(), session.clone());

        info!(session_id = %id, "Created session");
        Ok(session)
    }

    /// Live session by id; `None` if unknown or expired.
    pub async fn get_session(&self, id: &str) -> Option<Arc<TestSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|session| !session.is_expired(self.ttl))
            .cloned()
    }

    /// Existing live session, or a new one.
    pub async fn get_or_create(&self, id: Option<&str>) -> Result<Arc<TestSession>> {
        if let Some(id) = id {
            if let Some(session) = self.get_session(id).await {
                return Ok(session);
            }
            debug!(session_id = %id, "Unknown or expired session, creating a new one");
        }
        self.create_session().await
    }

    /// Drop expired sessions and delete their directories. Returns how many
    /// were removed.
    ///
    /// A session still held outside the registry (a sweep is writing into
    /// it) is left for a later pass.
    pub async fn cleanup_expired(&self) -> usize {
        let expired: Vec<Arc<TestSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| {
                    session.is_expired(self.ttl) && Arc::strong_count(session) == 1
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            if let Err(e) = session.cleanup() {
                warn!(session_id = %session.id, error = %e, "Failed to remove session directory");
            }
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), "Cleaned up expired sessions");
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`Self::cleanup_expired`] every `every`.
    pub fn spawn_cleanup_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_get_separate_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(tmp.path(), DEFAULT_SESSION_TTL);

        let a = manager.create_session().await.unwrap();
        let b = manager.create_session().await.unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.context.artifact_dir(), b.context.artifact_dir());
        assert!(a.context.artifact_dir().starts_with(tmp.path()));
        assert!(b.context.artifact_dir().is_dir());
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_live_session() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(tmp.path(), DEFAULT_SESSION_TTL);

        let first = manager.get_or_create(None).await.unwrap();
        let again = manager.get_or_create(Some(&first.id)).await.unwrap();
        assert_eq!(first.id, again.id);

        let other = manager.get_or_create(Some("not-a-session")).await.unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn test_expired_sessions_are_removed_with_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(tmp.path(), Duration::ZERO);

        let session = manager.create_session().await.unwrap();
        let dir = session.context.artifact_dir().to_path_buf();
        session.context.write_artifact("x.json", b"{}").unwrap();

        assert!(manager.get_session(&session.id).await.is_none());
        drop(session);
        assert_eq!(manager.cleanup_expired().await, 1);
        assert!(!dir.exists());
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleanup_spares_sessions_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(tmp.path(), Duration::ZERO);

        let session = manager.create_session().await.unwrap();
        let dir = session.context.artifact_dir().to_path_buf();

        // still held by a running sweep
        assert_eq!(manager.cleanup_expired().await, 0);
        assert!(dir.is_dir());
        session.context.write_artifact("late.csv", b"a,b\n").unwrap();

        drop(session);
        assert_eq!(manager.cleanup_expired().await, 1);
        assert!(!dir.exists());
    }
}
