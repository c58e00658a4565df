//! The session registry: creates, tracks, persists and deletes sessions.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use waypost_engine::{Engine, EngineFactory};
use waypost_protocol::SessionSnapshot;
use waypost_session::Session;
use waypost_store::{DEFAULT_CLIENT_FILE, SessionStore};

use crate::RegistryConfig;
use crate::RegistryError;
use crate::autosave::Autosave;

/// Outcome of [`Registry::load_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Sessions restored into the registry.
    pub loaded: usize,
    /// Directories whose state or engine couldn't be loaded.
    pub skipped: usize,
    /// Restored sessions with a reconnect running in the background.
    pub reconnecting: usize,
}

/// Everything guarded by the registry lock.
struct Inner<E: Engine> {
    sessions: HashMap<String, Arc<Session<E>>>,
    default_id: Option<String>,
    /// Ids detached by `delete` whose storage is still being removed.
    deleting: HashSet<String>,
    closed: bool,
}

impl<E: Engine> Inner<E> {
    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed {
            Err(RegistryError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Owns every session, keyed by id.
///
/// This is the entry point for higher layers (an HTTP surface, the shell
/// demo). Sessions are handed out as `Arc`s; the registry lock is never
/// held while a caller drives a session's lifecycle.
///
/// # Default session
///
/// At most one session is the *default*: `get("")` resolves to it. The
/// first session created becomes default; deleting the default hands the
/// role to the lexicographically smallest remaining id.
pub struct Registry<F: EngineFactory> {
    config: RegistryConfig,
    factory: F,
    store: SessionStore,
    inner: Arc<RwLock<Inner<F::Engine>>>,
    /// Held shared by every state write and exclusively while a deleted
    /// session's directory is removed.
    storage: Arc<RwLock<()>>,
    autosave: Mutex<Option<Autosave>>,
}

impl<F: EngineFactory> Registry<F> {
    /// Creates an empty registry and starts its autosave task.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn new(config: RegistryConfig, factory: F) -> Arc<Self> {
        let store = SessionStore::new(config.root.clone());
        let interval = config.autosave_interval;
        let registry = Arc::new(Self {
            config,
            factory,
            store,
            inner: Arc::new(RwLock::new(Inner {
                sessions: HashMap::new(),
                default_id: None,
                deleting: HashSet::new(),
                closed: false,
            })),
            storage: Arc::new(RwLock::new(())),
            autosave: Mutex::new(None),
        });

        if !interval.is_zero() {
            let autosave = Autosave::spawn(Arc::downgrade(&registry), interval);
            *registry
                .autosave
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(autosave);
        }

        tracing::info!(root = %registry.store.root().display(), "registry created");
        registry
    }

    /// The registry's configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The store backing this registry.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Structural operations
    // -----------------------------------------------------------------------

    /// Creates a session and opens its engine in `{root}/{id}`.
    ///
    /// The first session in an otherwise empty registry with no default
    /// becomes the default. State is persisted best-effort.
    ///
    /// # Errors
    /// - [`RegistryError::InvalidId`] for ids that can't name a directory
    /// - [`RegistryError::AlreadyExists`] if the id is live or still being
    ///   deleted
    /// - [`RegistryError::PersistenceFailed`] / [`RegistryError::Engine`]
    ///   when the directory or engine can't be opened
    pub async fn create(&self, id: &str) -> Result<Arc<Session<F::Engine>>, RegistryError> {
        validate_id(id)?;

        let session = {
            let mut inner = self.inner.write().await;
            inner.ensure_open()?;
            if inner.sessions.contains_key(id) || inner.deleting.contains(id) {
                return Err(RegistryError::AlreadyExists(id.to_string()));
            }

            let dir = self.store.create_session_dir(id).await?;
            let (engine, events) = match self.factory.open(id, &dir).await {
                Ok(opened) => opened,
                Err(e) => {
                    if let Err(cleanup) = self.store.delete_session(id).await {
                        tracing::warn!(session_id = %id, error = %cleanup, "failed to remove directory of failed session");
                    }
                    return Err(e.into());
                }
            };
            let session = Session::spawn(id, engine, events, self.config.session.clone());
            inner.sessions.insert(id.to_string(), Arc::clone(&session));

            if inner.sessions.len() == 1 && inner.default_id.is_none() {
                inner.default_id = Some(id.to_string());
                self.persist_default(Some(id)).await;
            }
            session
        };

        self.persist(&session).await;
        tracing::info!(session_id = %id, "session created");
        Ok(session)
    }

    /// Looks up a session. An empty id means the default session.
    ///
    /// # Errors
    /// [`RegistryError::NoDefaultClient`] for an empty id with no default,
    /// [`RegistryError::NotFound`] otherwise.
    pub async fn get(&self, id: &str) -> Result<Arc<Session<F::Engine>>, RegistryError> {
        let inner = self.inner.read().await;
        inner.ensure_open()?;

        let id = if id.is_empty() {
            inner
                .default_id
                .as_deref()
                .ok_or(RegistryError::NoDefaultClient)?
        } else {
            id
        };

        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Removes a session: logs it out, closes it and deletes its directory.
    ///
    /// ```text
    ///   [registry lock]  detach entry, fix default, reserve id
    ///   [no lock]        disconnect → logout (best-effort) → close
    ///                    wait delete_grace
    ///   [storage lock]   remove {root}/{id}
    ///   [registry lock]  release id
    /// ```
    ///
    /// The teardown runs on its own task, so dropping this future early
    /// doesn't leave the id reserved. Removal failures are only logged.
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] if no such session exists.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let session = {
            let mut inner = self.inner.write().await;
            inner.ensure_open()?;
            let session = inner
                .sessions
                .remove(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            inner.deleting.insert(id.to_string());

            if inner.default_id.as_deref() == Some(id) {
                inner.default_id = inner.sessions.keys().min().cloned();
                let next = inner.default_id.clone();
                self.persist_default(next.as_deref()).await;
                tracing::info!(session_id = %id, new_default = ?next, "default session reassigned");
            }
            session
        };

        let teardown = tokio::spawn(teardown(
            session,
            self.store.clone(),
            Arc::clone(&self.inner),
            Arc::clone(&self.storage),
            self.config.delete_grace,
        ));
        if let Err(e) = teardown.await {
            tracing::warn!(session_id = %id, error = %e, "session teardown task failed");
        }

        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Makes `id` the default session.
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] if no such session exists.
    pub async fn set_default(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        inner.ensure_open()?;
        if !inner.sessions.contains_key(id) {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        inner.default_id = Some(id.to_string());
        self.persist_default(Some(id)).await;
        tracing::info!(session_id = %id, "default session set");
        Ok(())
    }

    /// The current default session id, if any.
    pub async fn default_id(&self) -> Option<String> {
        self.inner.read().await.default_id.clone()
    }

    /// Snapshots of every session, in no particular order.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self.inner.read().await.sessions.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.state().await);
        }
        snapshots
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Whether the registry holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Restores every session found under the data root.
    ///
    /// Directories with unreadable state or an engine that won't open are
    /// logged and skipped. Sessions that were online when last saved get a
    /// background reconnect; this call doesn't wait for it. The default
    /// marker is honoured only if it names a session that loaded.
    ///
    /// # Errors
    /// [`RegistryError::PersistenceFailed`] only when the data root itself
    /// can't be created or scanned.
    pub async fn load_all(&self) -> Result<LoadReport, RegistryError> {
        self.store.ensure_root().await?;
        let ids = self.store.list_sessions().await?;

        let mut report = LoadReport::default();
        let mut reconnect = Vec::new();
        {
            let mut inner = self.inner.write().await;
            inner.ensure_open()?;

            for id in ids {
                if inner.sessions.contains_key(&id) {
                    continue;
                }
                match self.restore_one(&id).await {
                    Some((session, was_online)) => {
                        if was_online {
                            reconnect.push(Arc::clone(&session));
                        }
                        inner.sessions.insert(id, session);
                        report.loaded += 1;
                    }
                    None => report.skipped += 1,
                }
            }

            match self.store.load_default().await {
                Ok(Some(id)) if inner.sessions.contains_key(&id) => {
                    inner.default_id = Some(id);
                }
                Ok(Some(id)) => {
                    tracing::warn!(session_id = %id, "default marker names an unknown session; ignoring");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "failed to read default marker"),
            }
        }

        report.reconnecting = reconnect.len();
        for session in reconnect {
            tokio::spawn(async move {
                match session.connect().await {
                    Ok(()) => tracing::info!(session_id = %session.id(), "session reconnected"),
                    Err(e) => {
                        tracing::warn!(session_id = %session.id(), error = %e, "reconnect failed")
                    }
                }
            });
        }

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            reconnecting = report.reconnecting,
            "sessions loaded"
        );
        Ok(report)
    }

    /// Loads one session's state and engine. `None` means skip it.
    async fn restore_one(&self, id: &str) -> Option<(Arc<Session<F::Engine>>, bool)> {
        if let Err(e) = validate_id(id) {
            tracing::warn!(error = %e, "skipping session directory");
            return None;
        }

        let snapshot = match self.store.load_state(id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "skipping session with unreadable state");
                return None;
            }
        };

        let dir = self.store.session_dir(id);
        let (engine, events) = match self.factory.open(id, &dir).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "skipping session whose engine failed to open");
                return None;
            }
        };

        let session = Session::spawn(id, engine, events, self.config.session.clone());
        session.restore(&snapshot).await;
        tracing::debug!(session_id = %id, status = %snapshot.status, "session restored");
        Some((session, snapshot.was_online()))
    }

    /// Writes every session's state and the default marker.
    ///
    /// # Errors
    /// Individual session failures are logged and skipped. Only a failure
    /// to write the default marker is returned.
    pub async fn save_all(&self) -> Result<(), RegistryError> {
        let (sessions, default_id) = {
            let inner = self.inner.read().await;
            inner.ensure_open()?;
            let sessions: Vec<_> = inner.sessions.values().cloned().collect();
            (sessions, inner.default_id.clone())
        };

        for session in &sessions {
            self.persist(session).await;
        }
        self.store.save_default(default_id.as_deref()).await?;

        tracing::debug!(count = sessions.len(), "sessions saved");
        Ok(())
    }

    /// Stops autosave, saves everything once more and closes every session.
    ///
    /// Afterwards structural operations return [`RegistryError::Closed`].
    /// Calling it again does nothing.
    pub async fn close(&self) {
        if self.inner.read().await.closed {
            return;
        }

        let autosave = self
            .autosave
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(autosave) = autosave {
            autosave.stop().await;
        }

        if let Err(e) = self.save_all().await {
            tracing::warn!(error = %e, "final save failed");
        }

        let sessions: Vec<_> = {
            let mut inner = self.inner.write().await;
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.sessions.drain().map(|(_, session)| session).collect()
        };

        for session in &sessions {
            session.close().await;
        }
        tracing::info!(count = sessions.len(), "registry closed");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Writes one session's state unless it has already been closed.
    async fn persist(&self, session: &Session<F::Engine>) {
        let _storage = self.storage.read().await;
        if session.is_closed() {
            tracing::debug!(session_id = %session.id(), "skipping save of closed session");
            return;
        }
        let snapshot = session.state().await;
        if let Err(e) = self.store.save_state(&snapshot).await {
            tracing::warn!(session_id = %snapshot.id, error = %e, "failed to persist session state");
        }
    }

    async fn persist_default(&self, id: Option<&str>) {
        if let Err(e) = self.store.save_default(id).await {
            tracing::warn!(error = %e, "failed to persist default session");
        }
    }
}

/// Shuts a detached session down and removes its directory.
async fn teardown<E: Engine>(
    session: Arc<Session<E>>,
    store: SessionStore,
    inner: Arc<RwLock<Inner<E>>>,
    storage: Arc<RwLock<()>>,
    grace: std::time::Duration,
) {
    let id = session.id().to_string();

    session.disconnect().await;
    if let Err(e) = session.logout().await {
        tracing::warn!(session_id = %id, error = %e, "logout during delete failed");
    }
    session.close().await;

    tokio::time::sleep(grace).await;
    {
        // Saves that started before the close finish first; later ones see
        // the session closed and skip.
        let _storage = storage.write().await;
        if let Err(e) = store.delete_session(&id).await {
            tracing::warn!(session_id = %id, error = %e, "failed to remove session directory");
        }
    }

    inner.write().await.deleting.remove(&id);
}

/// Rejects ids that can't safely name a directory under the data root.
pub fn validate_id(id: &str) -> Result<(), RegistryError> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.contains(['/', '\\']) {
        "must not contain path separators"
    } else if id == "." || id == ".." {
        "must not be a relative path component"
    } else if id == DEFAULT_CLIENT_FILE {
        "is reserved"
    } else {
        return Ok(());
    };

    Err(RegistryError::InvalidId {
        id: id.to_string(),
        reason,
    })
}
