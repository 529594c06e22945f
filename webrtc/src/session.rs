//! Peer session state machine
//!
//! ```text
//! Idle --apply_offer--> OfferReceived --create_answer--> AnswerCreated
//!      --connectivity(Connected)--> Connected --close--> Closed
//! ```
//!
//! `Failed` is reachable from every non-terminal state. `close()` is valid
//! from every state, including `Failed`, and releases resources exactly once.

use crate::{
    config::WebRtcConfig,
    error::{WebRtcError, WebRtcResult},
    relay::{CandidateRelay, Relayed},
    sdp::{self, SdpSummary},
    transport::{Connectivity, FrameSink, PeerTransport},
    types::{ClientId, IceCandidate, SessionInfo},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use visionrtc_media::{DeviceProvider, MediaSourceTrack, NextFrame};

/// Peer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, no offer yet (candidates may already be buffered)
    Idle,

    /// Client's offer applied as remote description
    OfferReceived,

    /// Our answer committed as local description
    AnswerCreated,

    /// Transport reports live connectivity, media flowing
    Connected,

    /// Closed by the client or on disconnect
    Closed,

    /// Negotiation or transport failure
    Failed,
}

impl SessionState {
    /// Convert session state to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::OfferReceived => "offer_received",
            Self::AnswerCreated => "answer_created",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// `Closed` or `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a remote candidate ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Waiting for the remote description
    Buffered,
    /// Handed to the transport
    Applied,
}

struct FramePump {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One client's in-flight negotiation and the resources it owns
pub struct PeerSession {
    id: String,
    client_id: ClientId,
    state: SessionState,
    config: Arc<WebRtcConfig>,
    transport: Arc<dyn PeerTransport>,
    remote_description: Option<String>,
    local_description: Option<String>,
    relay: CandidateRelay,
    applied_candidates: usize,
    rejected_candidates: usize,
    replay_rejections: Vec<WebRtcError>,
    track: Option<Arc<Mutex<MediaSourceTrack>>>,
    sink: Option<Arc<dyn FrameSink>>,
    pump: Option<FramePump>,
    answered_at: Option<Instant>,
    released: bool,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl PeerSession {
    /// Create an `Idle` session around a fresh transport
    pub fn new(
        id: String,
        client_id: ClientId,
        transport: Arc<dyn PeerTransport>,
        config: Arc<WebRtcConfig>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            client_id,
            state: SessionState::Idle,
            config,
            transport,
            remote_description: None,
            local_description: None,
            relay: CandidateRelay::new(),
            applied_candidates: 0,
            rejected_candidates: 0,
            replay_rejections: Vec::new(),
            track: None,
            sink: None,
            pump: None,
            answered_at: None,
            released: false,
            created_at: now,
            last_activity: now,
        }
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owning client
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is `Closed` or `Failed`
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applied offer
    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    /// Answer sent to the client
    ///
    /// May carry an appended video section the transport never saw.
    pub fn local_description(&self) -> Option<&str> {
        self.local_description.as_deref()
    }

    /// Candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.relay.pending()
    }

    /// Candidates handed to the transport
    pub fn applied_candidates(&self) -> usize {
        self.applied_candidates
    }

    /// Candidates the transport refused
    pub fn rejected_candidates(&self) -> usize {
        self.rejected_candidates
    }

    /// Take the rejections collected while replaying buffered candidates
    ///
    /// The offer itself still succeeds; the caller reports these afterwards.
    pub fn take_replay_rejections(&mut self) -> Vec<WebRtcError> {
        std::mem::take(&mut self.replay_rejections)
    }

    /// Whether a media track has been attached
    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }

    /// Point in time by which connectivity must be established
    pub fn connect_deadline(&self) -> Option<Instant> {
        match self.state {
            SessionState::AnswerCreated => self
                .answered_at
                .map(|at| at + self.config.connect_timeout),
            _ => None,
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Check if session is stale (inactive for too long)
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_activity);
        elapsed.to_std().map_or(false, |elapsed| elapsed > timeout)
    }

    /// Apply the client's offer (`Idle -> OfferReceived`)
    ///
    /// Buffered candidates are replayed in arrival order right after the
    /// remote description is set.
    ///
    /// # Errors
    /// `InvalidState` if an offer was already applied; `InvalidOffer` or
    /// `NegotiationTimeout` (both fail the session) if the offer is unusable.
    pub async fn apply_offer(&mut self, offer: &str) -> WebRtcResult<SdpSummary> {
        self.expect_state(SessionState::Idle, "idle")?;
        self.touch();

        let summary = match sdp::validate_offer(offer) {
            Ok(summary) => summary,
            Err(e) => return Err(self.fail(e).await),
        };

        let applied = bounded(
            self.config.negotiation_timeout,
            "set_remote_description",
            self.transport.set_remote_description(offer),
        )
        .await;
        if let Err(e) = applied {
            return Err(self.fail(e).await);
        }

        self.remote_description = Some(offer.to_string());
        self.state = SessionState::OfferReceived;
        tracing::info!(
            session_id = %self.id,
            client_id = %self.client_id,
            media = ?summary.media,
            "Applied remote offer"
        );

        for candidate in self.relay.drain_if_ready(true) {
            match self.apply_candidate(&candidate).await {
                Ok(()) => {}
                Err(WebRtcError::InvalidCandidate(msg)) => {
                    tracing::warn!(session_id = %self.id, "Buffered candidate rejected: {}", msg);
                    self.rejected_candidates += 1;
                    self.replay_rejections.push(WebRtcError::InvalidCandidate(format!(
                        "buffered candidate '{}' rejected: {}",
                        candidate.candidate, msg
                    )));
                }
                Err(e) => return Err(self.fail(e).await),
            }
        }

        Ok(summary)
    }

    /// Attach a media track and produce the answer (`OfferReceived -> AnswerCreated`)
    ///
    /// The track is opened here. If the device is unavailable an empty
    /// track is attached and the answer is still produced.
    ///
    /// # Errors
    /// `InvalidState` outside `OfferReceived`; any transport failure fails
    /// the session.
    pub async fn create_answer(&mut self, devices: &dyn DeviceProvider) -> WebRtcResult<String> {
        self.expect_state(SessionState::OfferReceived, "offer_received")?;
        self.touch();

        match self.negotiate_answer(devices).await {
            Ok(answer) => {
                self.local_description = Some(answer.clone());
                self.state = SessionState::AnswerCreated;
                self.answered_at = Some(Instant::now());
                tracing::info!(session_id = %self.id, client_id = %self.client_id, "Created answer");
                Ok(answer)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn negotiate_answer(&mut self, devices: &dyn DeviceProvider) -> WebRtcResult<String> {
        let timeout = self.config.negotiation_timeout;

        let track = MediaSourceTrack::open_or_empty(devices).await;
        let (kind, track_id) = (track.kind(), track.id().to_string());
        self.track = Some(Arc::new(Mutex::new(track)));

        let sink = bounded(
            timeout,
            "attach_track",
            self.transport.attach_track(kind, &track_id),
        )
        .await?;
        self.sink = Some(sink);

        let generated = bounded(timeout, "create_answer", self.transport.create_answer()).await?;

        // The transport only accepts the answer it generated; the patched
        // copy is what the client receives.
        bounded(
            timeout,
            "set_local_description",
            self.transport.set_local_description(&generated),
        )
        .await?;

        let (answer, added) = sdp::ensure_media_section(&generated, &self.config.video_codec);
        if added {
            tracing::info!(session_id = %self.id, "Answer had no media section, appended video");
        }

        Ok(answer)
    }

    /// Accept a remote candidate
    ///
    /// # Errors
    /// `InvalidState` on a terminal session; `InvalidCandidate` if the
    /// transport rejects it.
    pub async fn add_candidate(&mut self, candidate: IceCandidate) -> WebRtcResult<CandidateOutcome> {
        if self.is_terminal() {
            return Err(self.state_error("non-terminal"));
        }
        self.touch();

        match self.relay.enqueue(candidate) {
            Relayed::Buffered => {
                tracing::debug!(
                    session_id = %self.id,
                    pending = self.relay.pending(),
                    "Buffered candidate until remote description is set"
                );
                Ok(CandidateOutcome::Buffered)
            }
            Relayed::Forward(candidate) => {
                if let Err(e) = self.apply_candidate(&candidate).await {
                    if matches!(e, WebRtcError::InvalidCandidate(_)) {
                        self.rejected_candidates += 1;
                    }
                    return Err(e);
                }
                Ok(CandidateOutcome::Applied)
            }
        }
    }

    async fn apply_candidate(&mut self, candidate: &IceCandidate) -> WebRtcResult<()> {
        bounded(
            self.config.negotiation_timeout,
            "add_ice_candidate",
            self.transport.add_ice_candidate(candidate),
        )
        .await?;
        self.applied_candidates += 1;
        tracing::debug!(
            session_id = %self.id,
            total = self.applied_candidates,
            "Applied remote candidate"
        );
        Ok(())
    }

    /// React to a transport connectivity report
    ///
    /// Returns `true` when the session moved to `Connected`.
    ///
    /// # Errors
    /// `TransportFailed` when the transport reports `Failed` or `Closed`; the
    /// session is failed and its resources released.
    pub async fn on_connectivity(&mut self, connectivity: Connectivity) -> WebRtcResult<bool> {
        if self.is_terminal() {
            return Ok(false);
        }

        match connectivity {
            Connectivity::Connected if self.state == SessionState::AnswerCreated => {
                self.touch();
                self.state = SessionState::Connected;
                self.start_pump();
                tracing::info!(session_id = %self.id, client_id = %self.client_id, "Session connected");
                Ok(true)
            }
            c if c.is_fatal() => {
                let err = WebRtcError::TransportFailed(format!("transport reported {:?}", c));
                Err(self.fail(err).await)
            }
            _ => Ok(false),
        }
    }

    fn start_pump(&mut self) {
        let (Some(track), Some(sink)) = (self.track.clone(), self.sink.clone()) else {
            return;
        };
        if track.lock().is_empty_track() {
            tracing::debug!(session_id = %self.id, "Empty track attached, no frames to send");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(pump_frames(track, sink, token.clone(), self.id.clone()));
        self.pump = Some(FramePump { token, handle });
    }

    /// Move to `Failed` and release resources
    ///
    /// Returns the error so callers can `return Err(self.fail(e).await)`.
    pub async fn fail(&mut self, err: WebRtcError) -> WebRtcError {
        if !self.is_terminal() {
            tracing::warn!(
                session_id = %self.id,
                client_id = %self.client_id,
                state = %self.state,
                "Session failed: {}",
                err
            );
            self.state = SessionState::Failed;
            self.release().await;
        }
        err
    }

    /// Close the session
    ///
    /// Returns `true` if this call moved the session to `Closed`.
    pub async fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        let previous = self.state;
        self.state = SessionState::Closed;
        self.release().await;
        tracing::info!(session_id = %self.id, client_id = %self.client_id, from = %previous, "Session closed");
        true
    }

    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(pump) = self.pump.take() {
            pump.token.cancel();
            pump.handle.abort();
        }
        self.sink = None;
        if let Some(track) = &self.track {
            track.lock().close();
        }

        let closed = bounded(
            self.config.negotiation_timeout,
            "close",
            self.transport.close(),
        )
        .await;
        if let Err(e) = closed {
            tracing::warn!(session_id = %self.id, "Transport close failed: {}", e);
        }
    }

    /// Snapshot for status queries
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            client_id: self.client_id,
            state: self.state.as_str().to_string(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            has_remote_description: self.remote_description.is_some(),
            has_local_description: self.local_description.is_some(),
            pending_candidates: self.relay.pending(),
            applied_candidates: self.applied_candidates,
            rejected_candidates: self.rejected_candidates,
            track_id: self.track.as_ref().map(|t| t.lock().id().to_string()),
        }
    }

    fn expect_state(&self, expected: SessionState, label: &str) -> WebRtcResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.state_error(label))
        }
    }

    fn state_error(&self, expected: &str) -> WebRtcError {
        WebRtcError::InvalidState {
            session_id: self.id.clone(),
            expected: expected.to_string(),
            actual: self.state.as_str().to_string(),
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(pump) = self.pump.take() {
            pump.token.cancel();
        }
        if let Some(track) = &self.track {
            track.lock().close();
        }
        let transport = Arc::clone(&self.transport);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = transport.close().await;
            });
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("pending_candidates", &self.relay.pending())
            .field("applied_candidates", &self.applied_candidates)
            .finish()
    }
}

/// Bound one transport call by the negotiation timeout
async fn bounded<T>(
    timeout: Duration,
    step: &str,
    fut: impl Future<Output = WebRtcResult<T>>,
) -> WebRtcResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(WebRtcError::NegotiationTimeout(format!(
            "{} did not finish within {:?}",
            step, timeout
        ))),
    }
}

/// Pull frames from the track at its frame rate and write them to the sink
async fn pump_frames(
    track: Arc<Mutex<MediaSourceTrack>>,
    sink: Arc<dyn FrameSink>,
    token: CancellationToken,
    session_id: String,
) {
    let interval = track.lock().frame_interval();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let next = track.lock().next_frame();
        match next {
            Ok(NextFrame::Frame(frame)) => {
                if let Err(e) = sink.write_frame(&frame).await {
                    tracing::warn!(session_id = %session_id, "Stopping frame pump: {}", e);
                    break;
                }
            }
            Ok(NextFrame::Unavailable) => {}
            Ok(NextFrame::EndOfStream) => {
                tracing::info!(session_id = %session_id, "Media track reached end of stream");
                break;
            }
            Err(e) => {
                tracing::debug!(session_id = %session_id, "Frame pump stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate, MockBehavior, MockTransport, NO_MEDIA_OFFER, VIDEO_OFFER};
    use visionrtc_media::{SyntheticConfig, SyntheticSource, UnavailableDevice};

    fn session(transport: Arc<MockTransport>) -> PeerSession {
        PeerSession::new(
            "session-1".to_string(),
            ClientId::new(),
            transport,
            Arc::new(WebRtcConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_full_negotiation() {
        let transport = Arc::new(MockTransport::new());
        let source = SyntheticSource::new(SyntheticConfig::default());
        let mut session = session(transport.clone());

        session.apply_offer(VIDEO_OFFER).await.unwrap();
        assert_eq!(session.state(), SessionState::OfferReceived);

        let answer = session.create_answer(&source).await.unwrap();
        assert_eq!(session.state(), SessionState::AnswerCreated);
        assert_eq!(session.local_description(), Some(answer.as_str()));
        assert!(session.connect_deadline().is_some());
        assert_eq!(source.handles_in_use(), 1);

        assert!(session.on_connectivity(Connectivity::Connected).await.unwrap());
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.connect_deadline().is_none());

        assert!(session.close().await);
        assert_eq!(source.handles_in_use(), 0);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_offer_fails_session() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());

        let err = session.apply_offer("hello").await.unwrap_err();
        assert!(matches!(err, WebRtcError::InvalidOffer(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.remote_description().is_none());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_second_offer_is_invalid_state() {
        let mut session = session(Arc::new(MockTransport::new()));
        session.apply_offer(VIDEO_OFFER).await.unwrap();

        let err = session.apply_offer(VIDEO_OFFER).await.unwrap_err();
        assert!(matches!(err, WebRtcError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::OfferReceived);
    }

    #[tokio::test]
    async fn test_answer_before_offer_is_invalid_state() {
        let mut session = session(Arc::new(MockTransport::new()));
        let source = SyntheticSource::new(SyntheticConfig::default());

        let err = session.create_answer(&source).await.unwrap_err();
        assert!(matches!(err, WebRtcError::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(source.acquired(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_device_still_answers() {
        let mut session = session(Arc::new(MockTransport::new()));
        session.apply_offer(VIDEO_OFFER).await.unwrap();

        let answer = session
            .create_answer(&UnavailableDevice::new("no camera"))
            .await
            .unwrap();
        assert!(answer.contains("m=video"));
        assert!(session.has_track());
    }

    #[tokio::test]
    async fn test_offer_without_media_commits_generated_answer() {
        let transport = Arc::new(MockTransport::new());
        let source = SyntheticSource::new(SyntheticConfig::default());
        let mut session = session(transport.clone());
        session.apply_offer(NO_MEDIA_OFFER).await.unwrap();

        let answer = session.create_answer(&source).await.unwrap();
        assert!(answer.contains("m=video"));
        assert_eq!(session.local_description(), Some(answer.as_str()));

        // The transport holds its own answer, without the appended section
        let committed = transport.local_description().unwrap();
        assert!(!committed.contains("m=video"));
        assert!(answer.starts_with(&committed));
    }

    #[tokio::test]
    async fn test_rejected_buffered_candidates_are_recorded() {
        let transport = Arc::new(MockTransport::with_behavior(MockBehavior {
            reject_candidates: true,
            ..Default::default()
        }));
        let mut session = session(transport);

        session.add_candidate(candidate(1)).await.unwrap();
        session.add_candidate(candidate(2)).await.unwrap();
        session.apply_offer(VIDEO_OFFER).await.unwrap();

        assert_eq!(session.state(), SessionState::OfferReceived);
        assert_eq!(session.rejected_candidates(), 2);
        assert_eq!(session.info().rejected_candidates, 2);

        let rejections = session.take_replay_rejections();
        assert_eq!(rejections.len(), 2);
        assert!(rejections
            .iter()
            .all(|e| matches!(e, WebRtcError::InvalidCandidate(_))));
        assert!(session.take_replay_rejections().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_after_failure() {
        let transport = Arc::new(MockTransport::new());
        let mut session = session(transport.clone());
        session.apply_offer(VIDEO_OFFER).await.unwrap();

        let err = session
            .on_connectivity(Connectivity::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, WebRtcError::TransportFailed(_)));
        assert_eq!(session.state(), SessionState::Failed);

        assert!(session.close().await);
        assert!(!session.close().await);
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_candidates_on_terminal_session_rejected() {
        let mut session = session(Arc::new(MockTransport::new()));
        session.close().await;

        let err = session
            .add_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 9 typ host"))
            .await
            .unwrap_err();
        assert!(matches!(err, WebRtcError::InvalidState { .. }));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::OfferReceived.as_str(), "offer_received");
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }
}
