//! Signaling hub - terminates client connections and dispatches messages
//!
//! Each accepted connection becomes a [`ClientConnection`] owned by exactly
//! one worker ([`SignalingHub::drive`]). Everything a worker sends goes to
//! its own connection's outbound queue; there is no broadcast.

use crate::{
    config::WebRtcConfig,
    error::{WebRtcError, WebRtcResult},
    manager::{PeerSessionManager, SessionHandle},
    protocol::{ClientMessage, ServerMessage},
    session::{CandidateOutcome, SessionState},
    transport::{SessionEvent, SessionEventKind, SessionEventReceiver, SessionEventSender},
    types::{ClientId, IceCandidate},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use visionrtc_media::{analyze_fail_open, FrameAnalyzer, VideoFrame};

/// One accepted client connection
///
/// Not `Clone`: the worker that drives it is its only owner.
pub struct ClientConnection {
    id: ClientId,
    outbound: mpsc::Sender<ServerMessage>,
    events_tx: SessionEventSender,
    events_rx: SessionEventReceiver,
    token: CancellationToken,
    negotiation_deadline: Option<Instant>,
    last_analysis: Option<Instant>,
}

impl ClientConnection {
    /// Connection identity
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Token cancelled when the connection goes away
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// When the current negotiation must reach connectivity
    pub fn negotiation_deadline(&self) -> Option<Instant> {
        self.negotiation_deadline
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("negotiation_deadline", &self.negotiation_deadline)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Signaling hub
pub struct SignalingHub {
    manager: Arc<PeerSessionManager>,
    analyzer: Arc<dyn FrameAnalyzer>,
    connections: parking_lot::RwLock<HashMap<ClientId, DateTime<Utc>>>,
}

impl SignalingHub {
    /// Create a hub on top of `manager`
    pub fn new(manager: Arc<PeerSessionManager>, analyzer: Arc<dyn FrameAnalyzer>) -> Self {
        Self {
            manager,
            analyzer,
            connections: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Session manager
    pub fn manager(&self) -> &Arc<PeerSessionManager> {
        &self.manager
    }

    fn config(&self) -> &WebRtcConfig {
        self.manager.config()
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Register a new connection whose messages go to `outbound`
    pub fn on_connect(&self, outbound: mpsc::Sender<ServerMessage>) -> ClientConnection {
        let id = ClientId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.connections.write().insert(id, Utc::now());

        tracing::info!(client_id = %id, "Client connected");

        ClientConnection {
            id,
            outbound,
            events_tx,
            events_rx,
            token: CancellationToken::new(),
            negotiation_deadline: None,
            last_analysis: None,
        }
    }

    /// Handle one raw inbound frame
    ///
    /// Never fails: errors become an `error` message to this client.
    pub async fn on_message(&self, conn: &mut ClientConnection, raw: &[u8]) {
        self.manager.record(|s| s.messages_received += 1);

        let max = self.config().max_message_size;
        let parsed = if raw.len() > max {
            Err(WebRtcError::MalformedMessage(format!(
                "message of {} bytes exceeds the {} byte limit",
                raw.len(),
                max
            )))
        } else {
            ClientMessage::parse(raw)
        };

        let message = match parsed {
            Ok(message) => message,
            Err(err) => {
                self.manager.record(|s| s.malformed_messages += 1);
                tracing::debug!(client_id = %conn.id, "Rejected message: {}", err);
                self.send(conn, ServerMessage::from(&err)).await;
                return;
            }
        };

        tracing::debug!(client_id = %conn.id, tag = message.tag(), "Received message");

        if let Err(err) = self.dispatch(conn, message).await {
            self.handle_failure(conn, err).await;
        }
    }

    async fn dispatch(&self, conn: &mut ClientConnection, message: ClientMessage) -> WebRtcResult<()> {
        match message {
            ClientMessage::Offer(sdp) => self.handle_offer(conn, &sdp).await,
            ClientMessage::Candidate(candidate) => self.handle_candidate(conn, candidate).await,
            ClientMessage::Answer(_) => Err(WebRtcError::InvalidState {
                session_id: String::new(),
                expected: "an offer or candidate (the server only answers)".to_string(),
                actual: "answer".to_string(),
            }),
            ClientMessage::Close => {
                conn.negotiation_deadline = None;
                self.manager.remove(conn.id).await;
                Ok(())
            }
        }
    }

    async fn handle_offer(&self, conn: &mut ClientConnection, sdp: &str) -> WebRtcResult<()> {
        let handle = self.manager.prepare_offer(conn.id, &conn.events_tx).await?;
        conn.negotiation_deadline = None;

        let (answer, deadline, rejections) = {
            let mut session = handle.lock().await;
            session.apply_offer(sdp).await?;
            let answer = session.create_answer(self.manager.devices()).await?;
            (answer, session.connect_deadline(), session.take_replay_rejections())
        };

        conn.negotiation_deadline = deadline;
        self.manager.record(|s| s.answers_created += 1);
        self.send(conn, ServerMessage::answer(answer)).await;

        // Early candidates the transport refused, reported once the answer is out
        for err in rejections {
            self.send(conn, ServerMessage::from(&err)).await;
        }
        Ok(())
    }

    async fn handle_candidate(
        &self,
        conn: &mut ClientConnection,
        candidate: IceCandidate,
    ) -> WebRtcResult<()> {
        let handle = self.manager.get_or_create(conn.id, &conn.events_tx).await?;
        let outcome = handle.lock().await.add_candidate(candidate).await?;

        match outcome {
            CandidateOutcome::Buffered => self.manager.record(|s| s.candidates_buffered += 1),
            CandidateOutcome::Applied => self.manager.record(|s| s.candidates_applied += 1),
        }
        Ok(())
    }

    /// Report `err` to the client and tear the session down if it cannot continue
    async fn handle_failure(&self, conn: &mut ClientConnection, err: WebRtcError) {
        tracing::debug!(client_id = %conn.id, kind = %err.kind(), "Request failed: {}", err);
        self.send(conn, ServerMessage::from(&err)).await;

        let terminal = self
            .manager
            .session_state(conn.id)
            .await
            .map_or(false, |state| state.is_terminal());
        if err.is_session_fatal() || terminal {
            conn.negotiation_deadline = None;
            self.manager.remove(conn.id).await;
        }
    }

    /// Apply a transport event for this connection's session
    ///
    /// Events from a session that has since been replaced are ignored.
    pub async fn on_session_event(&self, conn: &mut ClientConnection, event: SessionEvent) {
        let Some(handle) = self.current_session(conn.id, &event.session_id).await else {
            tracing::debug!(
                client_id = %conn.id,
                session_id = %event.session_id,
                "Ignoring event from stale session"
            );
            return;
        };

        match event.kind {
            SessionEventKind::LocalCandidate(candidate) => {
                self.send(conn, ServerMessage::candidate(candidate)).await;
            }
            SessionEventKind::Connectivity(connectivity) => {
                let result = handle.lock().await.on_connectivity(connectivity).await;
                match result {
                    Ok(true) => {
                        conn.negotiation_deadline = None;
                        self.manager.record(|s| s.connected_sessions += 1);
                    }
                    Ok(false) => {}
                    Err(err) => self.handle_failure(conn, err).await,
                }
            }
            SessionEventKind::RemoteFrame(frame) => self.analyze(conn, frame).await,
        }
    }

    async fn current_session(&self, client_id: ClientId, session_id: &str) -> Option<SessionHandle> {
        let handle = self.manager.find(client_id).await?;
        let current = handle.lock().await.id() == session_id;
        current.then_some(handle)
    }

    async fn analyze(&self, conn: &mut ClientConnection, frame: VideoFrame) {
        let interval = self.config().analysis_interval;
        if let Some(at) = conn.last_analysis {
            if at.elapsed() < interval {
                return;
            }
        }
        conn.last_analysis = Some(Instant::now());

        let text = analyze_fail_open(self.analyzer.as_ref(), &frame).await;
        if !text.is_empty() {
            self.send(conn, ServerMessage::response(text)).await;
        }
    }

    /// The connect deadline passed without live connectivity
    pub async fn on_negotiation_timeout(&self, conn: &mut ClientConnection) {
        conn.negotiation_deadline = None;
        let Some(handle) = self.manager.find(conn.id).await else {
            return;
        };

        let err = {
            let mut session = handle.lock().await;
            if session.state() != SessionState::AnswerCreated {
                return;
            }
            session
                .fail(WebRtcError::NegotiationTimeout(format!(
                    "no connectivity within {:?} of the answer",
                    self.config().connect_timeout
                )))
                .await
        };
        self.handle_failure(conn, err).await;
    }

    /// Tear down the connection's session and release its identity
    pub async fn on_disconnect(&self, conn: ClientConnection) {
        conn.token.cancel();
        let removed = self.manager.remove(conn.id).await;
        self.manager.forget(conn.id);
        self.connections.write().remove(&conn.id);

        tracing::info!(client_id = %conn.id, had_session = removed, "Client disconnected");
    }

    /// Run a connection until the client goes away
    ///
    /// Messages are handled one at a time, in order. Cancelling the
    /// connection's token aborts whatever is in flight; the session is then
    /// torn down by [`on_disconnect`](Self::on_disconnect).
    pub async fn drive(&self, mut conn: ClientConnection, mut inbound: mpsc::Receiver<Bytes>) {
        let token = conn.cancellation_token();

        loop {
            let deadline = conn.negotiation_deadline;
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                raw = inbound.recv() => {
                    let Some(raw) = raw else { break };
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = self.on_message(&mut conn, &raw) => {}
                    }
                }
                Some(event) = conn.events_rx.recv() => {
                    self.on_session_event(&mut conn, event).await;
                }
                _ = sleep_until(deadline) => {
                    self.on_negotiation_timeout(&mut conn).await;
                }
            }
        }

        self.on_disconnect(conn).await;
    }

    async fn send(&self, conn: &ClientConnection, message: ServerMessage) {
        if conn.outbound.send(message).await.is_err() {
            tracing::debug!(client_id = %conn.id, "Outbound channel closed, dropping message");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
