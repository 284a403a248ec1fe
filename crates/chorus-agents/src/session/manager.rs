//! Bounded, TTL-governed registry of resident chat sessions backed by
//! persisted metadata.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use chorus_common::{Error, Result, SessionId};
use chorus_config::{LlmConfig, LlmConfigUpdate, SessionConfig};
use chorus_db::{SessionHistory, SessionMetadata, SessionStore};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::chat::{ChatSession, SessionServices};

/// Id of the conventional session used when a caller does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Upper bound on the background cleanup period.
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a batch model switch. Failures are listed, never raised.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchLlmResult {
    pub message: String,
    pub warnings: Vec<String>,
    pub switched_sessions: Vec<String>,
    pub failed_sessions: Vec<String>,
}

impl SwitchLlmResult {
    pub fn is_complete(&self) -> bool {
        self.failed_sessions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Sessions with persisted metadata.
    pub total_sessions: usize,
    pub in_memory_sessions: usize,
    pub max_sessions: usize,
    pub session_ttl_secs: u64,
}

pub struct SessionManager {
    services: SessionServices,
    store: SessionStore,
    settings: SessionConfig,
    llm_config: std::sync::RwLock<LlmConfig>,
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    /// Every path that registers or removes a session holds this lock, so
    /// concurrent creates for one id converge on a single object and the
    /// capacity check sees a stable count.
    creation_lock: Mutex<()>,
    initialized: Mutex<bool>,
    cleanup_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(services: SessionServices, llm_config: LlmConfig, settings: SessionConfig) -> Self {
        let store = SessionStore::new(Arc::clone(&services.storage));
        Self {
            services,
            store,
            settings,
            llm_config: std::sync::RwLock::new(llm_config),
            sessions: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            initialized: Mutex::new(false),
            cleanup_task: std::sync::Mutex::new(None),
        }
    }

    /// Drop expired metadata records and start the periodic cleanup task.
    /// Later calls are no-ops.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        let now = Utc::now();
        let ttl = self.settings.session_ttl();
        let ids = self.store.list_ids().await?;
        let mut expired = 0usize;
        for id in &ids {
            match self.store.load(id).await {
                Ok(Some(metadata)) if metadata.is_expired(now, ttl) => {
                    self.store.delete(id).await?;
                    expired += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable session record '{id}': {e}"),
            }
        }
        info!(
            "session manager initialized: {} persisted session(s), {expired} expired record(s) removed",
            ids.len() - expired
        );

        self.start_cleanup_task();
        *initialized = true;
        Ok(())
    }

    /// `min(ttl / 4, 15 min)`, but never below one second.
    pub fn cleanup_interval(&self) -> Duration {
        (self.settings.session_ttl() / 4)
            .min(MAX_CLEANUP_INTERVAL)
            .max(MIN_CLEANUP_INTERVAL)
    }

    fn start_cleanup_task(self: &Arc<Self>) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.cleanup_interval();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.cleanup_expired_sessions().await {
                    warn!("periodic session cleanup failed: {e}");
                }
            }
        });

        let previous = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Create a session, or return the resident one with this id.
    pub async fn create_session(&self, session_id: Option<&str>) -> Result<Arc<ChatSession>> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| SessionId::new().into_inner());

        let _creating = self.creation_lock.lock().await;
        self.evict_expired_locked().await?;

        let existing = self.sessions.read().await.get(&id).cloned();
        if let Some(session) = existing {
            self.touch(&id).await?;
            return Ok(session);
        }

        let resident = self.ensure_capacity().await?;
        let stored = self.store.load(&id).await?;
        let session = self.build_session(&id, stored.as_ref()).await?;
        match stored {
            Some(_) => self.touch(&id).await?,
            None => self.store.save(&id, &SessionMetadata::new(Utc::now())).await?,
        }
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&session));
        info!("created session '{id}' ({} resident)", resident + 1);
        Ok(session)
    }

    /// Resident session, or one rehydrated from persisted metadata. `None`
    /// when the id is unknown. Rehydration counts against `max_sessions`
    /// like any other registration.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Arc<ChatSession>>> {
        if let Some(session) = self.touch_resident(session_id).await? {
            return Ok(Some(session));
        }

        let _creating = self.creation_lock.lock().await;
        if let Some(session) = self.touch_resident(session_id).await? {
            return Ok(Some(session));
        }
        let Some(stored) = self.store.load(session_id).await? else {
            return Ok(None);
        };

        self.evict_expired_locked().await?;
        self.ensure_capacity().await?;
        let session = self.build_session(session_id, Some(&stored)).await?;
        self.touch(session_id).await?;
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), Arc::clone(&session));
        info!("rehydrated session '{session_id}' from storage");
        Ok(Some(session))
    }

    /// Delete metadata and history and drop the resident object. Unknown
    /// ids are a no-op.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let _creating = self.creation_lock.lock().await;
        let removed = self.store.delete(session_id).await?;
        SessionHistory::new(Arc::clone(&self.services.storage), session_id)
            .clear()
            .await?;

        let resident = self.sessions.write().await.remove(session_id);
        if let Some(session) = resident {
            if let Err(e) = session.cleanup().await {
                warn!("cleanup of ended session '{session_id}' failed: {e}");
            }
        }
        if removed {
            info!("ended session '{session_id}'");
        } else {
            debug!("end_session: '{session_id}' was not persisted");
        }
        Ok(())
    }

    /// Evict resident sessions idle for longer than the TTL. Their metadata
    /// and history stay in storage. Returns the number evicted.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let _creating = self.creation_lock.lock().await;
        self.evict_expired_locked().await
    }

    /// Caller holds `creation_lock`.
    async fn evict_expired_locked(&self) -> Result<usize> {
        let ttl = self.settings.session_ttl();
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();

        let mut candidates = Vec::new();
        for id in ids {
            if self.is_expired(&id, ttl).await? {
                candidates.push(id);
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        // Re-check under the write lock: a lookup that touched the session
        // since the scan above keeps it resident.
        let evicted: Vec<Arc<ChatSession>> = {
            let mut sessions = self.sessions.write().await;
            let mut evicted = Vec::new();
            for id in candidates {
                if self.is_expired(&id, ttl).await? {
                    if let Some(session) = sessions.remove(&id) {
                        evicted.push(session);
                    }
                }
            }
            evicted
        };
        for session in &evicted {
            if let Err(e) = session.cleanup().await {
                warn!("cleanup of expired session '{}' failed: {e}", session.id());
            }
        }
        if !evicted.is_empty() {
            info!("evicted {} expired session(s)", evicted.len());
        }
        Ok(evicted.len())
    }

    async fn is_expired(&self, session_id: &str, ttl: Duration) -> Result<bool> {
        Ok(self
            .store
            .load(session_id)
            .await?
            .is_some_and(|metadata| metadata.is_expired(Utc::now(), ttl)))
    }

    /// Ids of every persisted session.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        self.store.list_ids().await
    }

    pub async fn get_session_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        self.store.load(session_id).await
    }

    pub async fn increment_message_count(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        self.store
            .increment_message_count(session_id, Utc::now())
            .await
    }

    /// Convenience over [`get_session`] and [`create_session`] for
    /// [`DEFAULT_SESSION_ID`].
    ///
    /// [`get_session`]: SessionManager::get_session
    /// [`create_session`]: SessionManager::create_session
    pub async fn get_default_session(&self) -> Result<Arc<ChatSession>> {
        match self.get_session(DEFAULT_SESSION_ID).await? {
            Some(session) => Ok(session),
            None => self.create_session(Some(DEFAULT_SESSION_ID)).await,
        }
    }

    /// Apply `update` to every resident session and to the default config
    /// for sessions created later. One failing session never stops the rest.
    pub async fn switch_llm_for_all_sessions(&self, update: &LlmConfigUpdate) -> SwitchLlmResult {
        let mut result = SwitchLlmResult::default();

        let next_default = self.llm_config().apply(update);
        match self.services.llm_factory.validate(&next_default) {
            Ok(()) => {
                *self
                    .llm_config
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = next_default.clone();
            }
            Err(e) => result
                .warnings
                .push(format!("default configuration left unchanged: {e}")),
        }

        let mut sessions: Vec<(String, Arc<ChatSession>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(session)))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, session) in sessions {
            let next = session.config().apply(update);
            match session.switch_llm(next).await {
                Ok(()) => result.switched_sessions.push(id),
                Err(e) => {
                    warn!("switching session '{id}' failed: {e}");
                    result.warnings.push(format!("{id}: {e}"));
                    result.failed_sessions.push(id);
                }
            }
        }

        result.message = if result.is_complete() {
            format!(
                "switched {} session(s) to {}/{}",
                result.switched_sessions.len(),
                next_default.provider,
                next_default.model
            )
        } else {
            format!(
                "switched {} session(s), {} failed",
                result.switched_sessions.len(),
                result.failed_sessions.len()
            )
        };
        info!("{}", result.message);
        result
    }

    /// Switch one session, rehydrating it if needed.
    pub async fn switch_llm_for_specific_session(
        &self,
        session_id: &str,
        update: &LlmConfigUpdate,
    ) -> Result<LlmConfig> {
        let session = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        Self::switch_session(&session, update).await
    }

    /// Switch the default session, creating it if needed.
    pub async fn switch_llm_for_default_session(
        &self,
        update: &LlmConfigUpdate,
    ) -> Result<LlmConfig> {
        let session = self.get_default_session().await?;
        Self::switch_session(&session, update).await
    }

    async fn switch_session(session: &ChatSession, update: &LlmConfigUpdate) -> Result<LlmConfig> {
        let next = session.config().apply(update);
        session.switch_llm(next.clone()).await?;
        Ok(next)
    }

    pub async fn get_session_stats(&self) -> Result<SessionStats> {
        Ok(SessionStats {
            total_sessions: self.store.list_ids().await?.len(),
            in_memory_sessions: self.sessions.read().await.len(),
            max_sessions: self.settings.max_sessions,
            session_ttl_secs: self.settings.session_ttl_secs,
        })
    }

    /// Stop the cleanup task and release every resident session. Per-session
    /// failures are logged and do not stop the others.
    pub async fn cleanup(&self) {
        self.stop_cleanup_task();

        let _creating = self.creation_lock.lock().await;
        let sessions: Vec<Arc<ChatSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        for session in sessions {
            if let Err(e) = session.cleanup().await {
                warn!("cleanup of session '{}' failed: {e}", session.id());
            }
        }
        info!("session manager shut down, {count} session(s) released");
    }

    /// Default configuration for newly created sessions.
    pub fn llm_config(&self) -> LlmConfig {
        self.llm_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn settings(&self) -> &SessionConfig {
        &self.settings
    }

    pub async fn is_resident(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// The read guard is held across the touch, so eviction (which takes
    /// the write lock) sees the refreshed activity.
    async fn touch_resident(&self, session_id: &str) -> Result<Option<Arc<ChatSession>>> {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(session_id).cloned() else {
            return Ok(None);
        };
        self.touch(session_id).await?;
        Ok(Some(session))
    }

    /// Current resident count, or `SessionLimitReached` when full.
    async fn ensure_capacity(&self) -> Result<usize> {
        let resident = self.sessions.read().await.len();
        if resident >= self.settings.max_sessions {
            return Err(Error::SessionLimitReached {
                max: self.settings.max_sessions,
            });
        }
        Ok(resident)
    }

    async fn build_session(
        &self,
        session_id: &str,
        stored: Option<&SessionMetadata>,
    ) -> Result<Arc<ChatSession>> {
        let config = stored
            .and_then(|metadata| self.stored_llm_config(session_id, metadata))
            .unwrap_or_else(|| self.llm_config());
        let session = Arc::new(ChatSession::new(session_id, config, self.services.clone()));
        session.init().await?;
        Ok(session)
    }

    /// The model a session last switched to, if it is still usable.
    fn stored_llm_config(&self, session_id: &str, metadata: &SessionMetadata) -> Option<LlmConfig> {
        let value = metadata.llm_config.clone()?;
        let config: LlmConfig = match serde_json::from_value(value) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring unreadable model config of session '{session_id}': {e}");
                return None;
            }
        };
        match self.services.llm_factory.validate(&config) {
            Ok(()) => Some(config),
            Err(e) => {
                warn!("session '{session_id}' falls back to the default model: {e}");
                None
            }
        }
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let now = Utc::now();
        if self.store.touch(session_id, now).await?.is_none() {
            self.store.save(session_id, &SessionMetadata::new(now)).await?;
        }
        Ok(())
    }

    fn stop_cleanup_task(&self) {
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_cleanup_task();
    }
}
