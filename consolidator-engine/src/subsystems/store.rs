//! Session persistence
//!
//! Sessions are keyed by id. `load_all_needing_link` yields a stream that may
//! include sessions in any state; the linker re-checks status itself. Records
//! that cannot be decoded come back as per-item errors rather than failing the
//! whole load.

use async_trait::async_trait;
use consolidator_core::{ConsolidatorError, Session, SessionStatus};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Sessions yielded one at a time; a failed item does not end the stream.
pub type SessionStream = BoxStream<'static, Result<Session, ConsolidatorError>>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_all_needing_link(&self) -> Result<SessionStream, ConsolidatorError>;

    async fn save(&self, session: &Session) -> Result<(), ConsolidatorError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<BTreeMap<Uuid, Session>>,
    saves: Mutex<Vec<Uuid>>,
}

impl MemorySessionStore {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into_iter().map(|s| (s.id, s)).collect()),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.lock().await.get(&id).cloned()
    }

    /// Ids passed to `save`, in call order.
    pub async fn save_log(&self) -> Vec<Uuid> {
        self.saves.lock().await.clone()
    }

    pub async fn count_with_status(&self, status: SessionStatus) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.status == status)
            .count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_all_needing_link(&self) -> Result<SessionStream, ConsolidatorError> {
        let sessions: Vec<Session> = self.sessions.lock().await.values().cloned().collect();
        Ok(stream::iter(sessions.into_iter().map(Ok)).boxed())
    }

    async fn save(&self, session: &Session) -> Result<(), ConsolidatorError> {
        self.sessions.lock().await.insert(session.id, session.clone());
        self.saves.lock().await.push(session.id);
        Ok(())
    }
}

// ============================================================================
// JSON directory store
// ============================================================================

/// One pretty-printed JSON file per session, named `<id>.json`.
///
/// Loading lists the folder up front but reads each file only when the
/// stream reaches it.
#[derive(Debug, Clone)]
pub struct JsonDirSessionStore {
    folder: PathBuf,
}

impl JsonDirSessionStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.folder.join(format!("{id}.json"))
    }

    async fn read_session(path: &Path) -> Result<Session, ConsolidatorError> {
        let raw = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&raw).map_err(|e| {
            ConsolidatorError::Store(format!("malformed session {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl SessionStore for JsonDirSessionStore {
    async fn load_all_needing_link(&self) -> Result<SessionStream, ConsolidatorError> {
        if !tokio::fs::try_exists(&self.folder).await? {
            tracing::warn!(folder = %self.folder.display(), "Sessions folder does not exist");
            return Ok(stream::empty().boxed());
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            if is_json && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        tracing::debug!(
            folder = %self.folder.display(),
            files = paths.len(),
            "Listed session files"
        );
        Ok(stream::iter(paths)
            .then(|path| async move { Self::read_session(&path).await })
            .boxed())
    }

    async fn save(&self, session: &Session) -> Result<(), ConsolidatorError> {
        tokio::fs::create_dir_all(&self.folder).await?;

        let path = self.path_for(session.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(session)?;

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(session_id = %session.id, path = %path.display(), "Session saved");
        Ok(())
    }
}
