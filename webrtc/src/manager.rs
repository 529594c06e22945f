//! Peer session manager - registry and lifecycle of per-client sessions

use crate::{
    config::WebRtcConfig,
    error::{WebRtcError, WebRtcResult},
    session::{PeerSession, SessionState},
    transport::{SessionEventSender, TransportFactory},
    types::{ClientId, SessionInfo, WebRtcStats},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use visionrtc_media::DeviceProvider;

/// Shared handle to a session; the mutex serializes its state machine
pub type SessionHandle = Arc<Mutex<PeerSession>>;

/// Peer session manager
///
/// Maps each client to at most one [`PeerSession`]. Registry mutations for
/// one client run under that client's gate, so concurrent operations for
/// the same client are serialized while different clients never wait on
/// each other.
pub struct PeerSessionManager {
    /// Configuration
    config: Arc<WebRtcConfig>,

    /// Creates one transport per session
    factory: Arc<dyn TransportFactory>,

    /// Capture devices for outbound tracks
    devices: Arc<dyn DeviceProvider>,

    /// Active sessions (client_id → session)
    sessions: RwLock<HashMap<ClientId, SessionHandle>>,

    /// Per-client mutation gates
    gates: parking_lot::Mutex<HashMap<ClientId, Arc<Mutex<()>>>>,

    /// Statistics
    stats: parking_lot::RwLock<WebRtcStats>,
}

impl PeerSessionManager {
    /// Create a new session manager
    pub fn new(
        config: Arc<WebRtcConfig>,
        factory: Arc<dyn TransportFactory>,
        devices: Arc<dyn DeviceProvider>,
    ) -> Self {
        Self {
            config,
            factory,
            devices,
            sessions: RwLock::new(HashMap::new()),
            gates: parking_lot::Mutex::new(HashMap::new()),
            stats: parking_lot::RwLock::new(WebRtcStats::default()),
        }
    }

    /// Shared configuration
    pub fn config(&self) -> &Arc<WebRtcConfig> {
        &self.config
    }

    /// Device provider used for outbound tracks
    pub fn devices(&self) -> &dyn DeviceProvider {
        self.devices.as_ref()
    }

    fn gate(&self, client_id: ClientId) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.lock().entry(client_id).or_default())
    }

    /// Return the client's live session, creating an `Idle` one if needed
    ///
    /// A terminal session still in the registry is closed and replaced.
    ///
    /// # Errors
    /// `SessionLimitReached`, or whatever the transport factory returns.
    pub async fn get_or_create(
        &self,
        client_id: ClientId,
        events: &SessionEventSender,
    ) -> WebRtcResult<SessionHandle> {
        let gate = self.gate(client_id);
        let _guard = gate.lock().await;

        if let Some(existing) = self.find(client_id).await {
            if !existing.lock().await.is_terminal() {
                return Ok(existing);
            }
            self.evict(client_id).await;
        }

        self.create_session(client_id, events).await
    }

    /// Session to apply a new offer to
    ///
    /// An `Idle` session is reused so that candidates buffered ahead of the
    /// offer survive. Any other existing session is closed and removed
    /// before the new one is created.
    ///
    /// # Errors
    /// `SessionLimitReached`, or whatever the transport factory returns.
    pub async fn prepare_offer(
        &self,
        client_id: ClientId,
        events: &SessionEventSender,
    ) -> WebRtcResult<SessionHandle> {
        let gate = self.gate(client_id);
        let _guard = gate.lock().await;

        if let Some(existing) = self.find(client_id).await {
            if existing.lock().await.state() == SessionState::Idle {
                return Ok(existing);
            }
            if self.evict(client_id).await {
                self.stats.write().replaced_sessions += 1;
                tracing::info!(client_id = %client_id, "Replacing session for new offer");
            }
        }

        self.create_session(client_id, events).await
    }

    async fn create_session(
        &self,
        client_id: ClientId,
        events: &SessionEventSender,
    ) -> WebRtcResult<SessionHandle> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.max_sessions {
                return Err(WebRtcError::SessionLimitReached {
                    current: sessions.len(),
                    max: self.config.max_sessions,
                });
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let transport = self.factory.create(&session_id, events.clone()).await?;
        let session = PeerSession::new(
            session_id.clone(),
            client_id,
            transport,
            Arc::clone(&self.config),
        );
        let handle = Arc::new(Mutex::new(session));

        self.sessions
            .write()
            .await
            .insert(client_id, Arc::clone(&handle));

        {
            let mut stats = self.stats.write();
            stats.total_sessions += 1;
        }

        tracing::info!(client_id = %client_id, session_id = %session_id, "Created session");
        Ok(handle)
    }

    /// Look up the client's session
    pub async fn find(&self, client_id: ClientId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&client_id).cloned()
    }

    /// Close and remove the client's session
    ///
    /// Idempotent: returns `false` when there was nothing to remove.
    pub async fn remove(&self, client_id: ClientId) -> bool {
        let gate = self.gate(client_id);
        let _guard = gate.lock().await;
        self.evict(client_id).await
    }

    /// Remove under an already-held gate
    async fn evict(&self, client_id: ClientId) -> bool {
        let Some(handle) = self.sessions.write().await.remove(&client_id) else {
            return false;
        };

        let mut session = handle.lock().await;
        let was_failed = session.state() == SessionState::Failed;
        session.close().await;

        if was_failed {
            self.stats.write().failed_sessions += 1;
        }
        tracing::info!(client_id = %client_id, session_id = %session.id(), "Removed session");
        true
    }

    /// Drop the client's gate once its connection is gone
    pub fn forget(&self, client_id: ClientId) {
        self.gates.lock().remove(&client_id);
    }

    /// State of the client's session, if any
    pub async fn session_state(&self, client_id: ClientId) -> Option<SessionState> {
        let handle = self.find(client_id).await?;
        let state = handle.lock().await.state();
        Some(state)
    }

    /// Get session information
    pub async fn session_info(&self, client_id: ClientId) -> Option<SessionInfo> {
        let handle = self.find(client_id).await?;
        let info = handle.lock().await.info();
        Some(info)
    }

    /// List all sessions
    ///
    /// Sessions busy negotiating are skipped rather than waited for.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        handles
            .iter()
            .filter_map(|handle| handle.try_lock().ok().map(|session| session.info()))
            .collect()
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get statistics
    pub async fn stats(&self) -> WebRtcStats {
        let active = self.session_count().await;
        let mut stats = self.stats.read().clone();
        stats.active_sessions = active;
        stats
    }

    /// Update counters
    pub(crate) fn record(&self, update: impl FnOnce(&mut WebRtcStats)) {
        update(&mut self.stats.write());
    }

    /// Remove terminal and stale sessions; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let timeout = self.config.session_timeout;
        let candidates: Vec<(ClientId, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect();

        let mut to_remove = Vec::new();
        for (client_id, handle) in candidates {
            // A locked session is mid-operation, so it is not idle
            if let Ok(session) = handle.try_lock() {
                if session.is_terminal() || session.is_stale(timeout) {
                    to_remove.push(client_id);
                }
            }
        }

        let mut removed = 0;
        for client_id in to_remove {
            if self.remove(client_id).await {
                removed += 1;
            }
        }

        if removed > 0 {
            self.stats.write().sessions_cleaned += removed;
            tracing::info!("Cleaned up {} stale sessions", removed);
        }
        removed
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // First tick completes immediately
            interval_timer.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval_timer.tick() => {
                        manager.sweep().await;
                    }
                }
            }
            tracing::debug!("Session cleanup task stopped");
        })
    }
}
