//! Durable layout for Waypost.
//!
//! Everything a restart needs lives under one data root:
//!
//! ```text
//! {root}/
//!   default_client          # raw bytes of the default session id
//!   {session_id}/
//!     state.json            # pretty JSON SessionSnapshot
//!     ...                   # engine-owned files, opaque here
//! ```
//!
//! `state.json` is always written to `state.json.tmp` first and renamed into
//! place, so a crash mid-write leaves the previous version intact.

mod error;

pub use error::{StoreError, StoreResult};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use waypost_protocol::{Codec, JsonCodec, SessionSnapshot};

/// Name of the per-session state file.
pub const STATE_FILE: &str = "state.json";

/// Name of the default-client marker under the root.
pub const DEFAULT_CLIENT_FILE: &str = "default_client";

const STATE_TMP_FILE: &str = "state.json.tmp";

/// File-backed store for session snapshots.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    codec: JsonCodec,
}

impl SessionStore {
    /// Creates a store rooted at `root`. Nothing touches the disk until
    /// [`ensure_root`](Self::ensure_root) or the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            codec: JsonCodec::pretty(),
        }
    }

    /// The data root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the data root if it is missing.
    pub async fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::file_io(&self.root, e))
    }

    /// The private directory of session `id`.
    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn state_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(STATE_FILE)
    }

    fn default_path(&self) -> PathBuf {
        self.root.join(DEFAULT_CLIENT_FILE)
    }

    /// Creates the directory of session `id` and returns its path.
    pub async fn create_session_dir(&self, id: &str) -> StoreResult<PathBuf> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::file_io(&dir, e))?;
        Ok(dir)
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// Writes `snapshot` to `{root}/{snapshot.id}/state.json`.
    ///
    /// The session directory must already exist; a removed session is never
    /// recreated by a late save.
    pub async fn save_state(&self, snapshot: &SessionSnapshot) -> StoreResult<()> {
        let dir = self.session_dir(&snapshot.id);
        let final_path = dir.join(STATE_FILE);
        let temp_path = dir.join(STATE_TMP_FILE);

        let bytes = self
            .codec
            .encode(snapshot)
            .map_err(|e| StoreError::codec(&final_path, e))?;

        fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| StoreError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StoreError::file_io(&final_path, e))?;

        tracing::debug!(session_id = %snapshot.id, "state saved");
        Ok(())
    }

    /// Reads the snapshot of session `id`; `None` if it has none.
    pub async fn load_state(&self, id: &str) -> StoreResult<Option<SessionSnapshot>> {
        let path = self.state_path(id);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::file_io(&path, e)),
        };

        let snapshot = self
            .codec
            .decode(&bytes)
            .map_err(|e| StoreError::codec(&path, e))?;
        Ok(Some(snapshot))
    }

    /// Ids of every subdirectory holding a `state.json`, sorted.
    ///
    /// A missing root is an empty store.
    pub async fn list_sessions(&self) -> StoreResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::file_io(&self.root, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::file_io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let has_state = fs::try_exists(entry.path().join(STATE_FILE))
                .await
                .unwrap_or(false);
            if !has_state {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) => ids.push(name.to_string()),
                None => tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 session directory"),
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Removes the directory of session `id` and everything in it.
    pub async fn delete_session(&self, id: &str) -> StoreResult<()> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::file_io(&dir, e)),
        }
    }

    // ------------------------------------------------------------------------
    // Default marker
    // ------------------------------------------------------------------------

    /// Writes the default marker, or removes it when `id` is `None`.
    pub async fn save_default(&self, id: Option<&str>) -> StoreResult<()> {
        let path = self.default_path();
        match id {
            Some(id) => {
                self.ensure_root().await?;
                fs::write(&path, id.as_bytes())
                    .await
                    .map_err(|e| StoreError::file_io(&path, e))
            }
            None => match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::file_io(&path, e)),
            },
        }
    }

    /// Reads the default marker, trimmed. Missing or blank → `None`.
    pub async fn load_default(&self) -> StoreResult<Option<String>> {
        let path = self.default_path();
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::file_io(&path, e)),
        };

        let id = contents.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use waypost_protocol::SessionStatus;

    fn snapshot(id: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: id.to_string(),
            status: SessionStatus::Connected,
            last_activity: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            connected: true,
            logged_in: true,
            push_name: "Ana".into(),
            phone_number: "6281234".into(),
            connection_error: String::new(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load_state() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("work").await.unwrap();

        store.save_state(&snapshot("work")).await.unwrap();

        let loaded = store.load_state("work").await.unwrap();
        assert_eq!(loaded, Some(snapshot("work")));
        assert!(!dir.path().join("work").join(STATE_TMP_FILE).exists());
    }

    #[tokio::test]
    async fn test_state_file_is_pretty_and_omits_empty_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("work").await.unwrap();

        store.save_state(&snapshot("work")).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("work").join(STATE_FILE)).unwrap();
        assert!(text.contains('\n'), "state.json should be indented");
        assert!(text.contains("\"status\": \"connected\""));
        assert!(!text.contains("connection_error"));
    }

    #[tokio::test]
    async fn test_save_state_does_not_recreate_removed_dir() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("work").await.unwrap();
        store.delete_session("work").await.unwrap();

        let err = store.save_state(&snapshot("work")).await.unwrap_err();

        assert!(matches!(err, StoreError::FileIo { .. }));
        assert!(!dir.path().join("work").exists());
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_state_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        assert!(store.load_state("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_state_corrupt_is_codec_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("work").await.unwrap();
        std::fs::write(dir.path().join("work").join(STATE_FILE), b"{not json").unwrap();

        let err = store.load_state("work").await.unwrap_err();

        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[tokio::test]
    async fn test_list_sessions_only_dirs_with_state_sorted() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        for id in ["work", "home"] {
            store.create_session_dir(id).await.unwrap();
            store.save_state(&snapshot(id)).await.unwrap();
        }
        store.create_session_dir("half-created").await.unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        assert_eq!(store.list_sessions().await.unwrap(), vec!["home", "work"]);
    }

    #[tokio::test]
    async fn test_list_sessions_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nope"));

        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_marker_round_trip_and_removal() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        store.save_default(Some("work")).await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join(DEFAULT_CLIENT_FILE)).unwrap(),
            b"work"
        );
        assert_eq!(store.load_default().await.unwrap().as_deref(), Some("work"));

        store.save_default(None).await.unwrap();
        assert!(store.load_default().await.unwrap().is_none());
        store.save_default(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_default_trims_whitespace() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(dir.path().join(DEFAULT_CLIENT_FILE), b"  home\n").unwrap();

        assert_eq!(store.load_default().await.unwrap().as_deref(), Some("home"));

        std::fs::write(dir.path().join(DEFAULT_CLIENT_FILE), b" \n").unwrap();
        assert!(store.load_default().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_session_removes_tree_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store.create_session_dir("work").await.unwrap();
        store.save_state(&snapshot("work")).await.unwrap();
        std::fs::write(dir.path().join("work").join("engine.db"), b"keys").unwrap();

        store.delete_session("work").await.unwrap();
        assert!(!dir.path().join("work").exists());

        store.delete_session("work").await.unwrap();
    }
}
