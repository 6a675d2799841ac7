//! JSON file session store.
//!
//! One pretty-printed JSON file per root session under `sessions/`, plus a
//! small meta marker (version + updated_at) under `meta/sessions/` that is
//! bumped on every save.

use std::path::{Path, PathBuf};
use exertion_core::{SessionId, SessionRecord};
use super::{Result, SessionStore};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// File-based JSON session store.
pub struct JsonSessionStore {
    root: PathBuf,
    // serializes writes so version bumps never interleave
    write_lock: Mutex<()>,
}

impl JsonSessionStore {
    /// Create the store, creating `sessions/` and `meta/sessions/` below `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("sessions")).await?;
        fs::create_dir_all(root.join("meta").join("sessions")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn session_path(&self, id: SessionId) -> PathBuf {
        self.root.join("sessions").join(format!("{}.json", id))
    }

    fn meta_path(&self, id: SessionId) -> PathBuf {
        self.root.join("meta").join("sessions").join(format!("{}.meta.json", id))
    }

    /// Current version of a stored session (0 when never saved).
    pub async fn version(&self, id: SessionId) -> Result<u64> {
        match fs::read_to_string(self.meta_path(id)).await {
            Ok(s) => {
                let json: serde_json::Value = serde_json::from_str(&s)?;
                Ok(json.get("version").and_then(|v| v.as_u64()).unwrap_or(0))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Read and increment the version marker, return the new version.
    async fn bump_version(&self, id: SessionId) -> Result<u64> {
        let version = self.version(id).await? + 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        fs::write(self.meta_path(id), serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }
}

#[async_trait::async_trait]
impl SessionStore for JsonSessionStore {
    async fn save(&self, root: &SessionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_string_pretty(root)?;
        fs::write(self.session_path(root.cookie), json.as_bytes()).await?;
        let version = self.bump_version(root.cookie).await?;

        debug!("Saved session {} (v{}, {})", root.cookie, version, root.status());
        Ok(())
    }

    async fn load(&self, cookie: SessionId) -> Result<Option<SessionRecord>> {
        read_json(&self.session_path(cookie)).await
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = list_dir(&self.root.join("sessions")).await?;
        sessions.sort_by(|a, b| a.cookie.cmp(&b.cookie));
        Ok(sessions)
    }

    async fn delete(&self, cookie: SessionId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in [self.session_path(cookie), self.meta_path(cookie)] {
            fs::remove_file(path).await.or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
            })?;
        }
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use exertion_core::Status;

    #[tokio::test]
    async fn test_save_load_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path()).await.unwrap();

        let mut root = record("job", Status::Running);
        store.save(&root).await.unwrap();
        root.runtime.control.status = Status::Done;
        store.save(&root).await.unwrap();

        let loaded = store.load(root.cookie).await.unwrap().unwrap();
        assert_eq!(loaded.status(), Status::Done);
        assert_eq!(store.version(root.cookie).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path()).await.unwrap();
        assert!(store.load(SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path()).await.unwrap();

        let a = record("a", Status::Done);
        let b = record("b", Status::Failed);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);

        store.delete(a.cookie).await.unwrap();
        store.delete(a.cookie).await.unwrap();
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].cookie, b.cookie);
    }
}
