//! In-memory transports for tests
//!
//! Available to this crate's unit tests and, with the `test-helpers`
//! feature, to integration tests and downstream crates.

use crate::{
    error::{WebRtcError, WebRtcResult},
    sdp,
    transport::{
        Connectivity, FrameSink, PeerTransport, SessionEvent, SessionEventKind,
        SessionEventSender, TransportFactory,
    },
    types::IceCandidate,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use visionrtc_media::{TrackKind, VideoFrame};

/// Offer with one receive-only video section
pub const VIDEO_OFFER: &str = "v=0\r\n\
    o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=group:BUNDLE 0\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    c=IN IP4 0.0.0.0\r\n\
    a=ice-ufrag:EsAw\r\n\
    a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n\
    a=fingerprint:sha-256 0F:74:31:25:CB:A2:13:EC:28:6F:6D:2C:61:FF:5D:C2\r\n\
    a=setup:actpass\r\n\
    a=mid:0\r\n\
    a=recvonly\r\n\
    a=rtcp-mux\r\n\
    a=rtpmap:96 VP8/90000\r\n";

/// Structurally valid offer without any media section
pub const NO_MEDIA_OFFER: &str = "v=0\r\n\
    o=- 1 1 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    a=ice-ufrag:EsAw\r\n\
    a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n\
    a=fingerprint:sha-256 0F:74:31:25:CB:A2:13:EC:28:6F:6D:2C:61:FF:5D:C2\r\n";

/// Test candidate number `n`
pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{} 1 udp 2122260223 192.168.1.{} {} typ host",
        n,
        n % 250 + 1,
        50000 + n
    ))
    .with_mid("0", 0)
}

/// Knobs for [`MockTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Reject every offer at the transport level
    pub reject_offer: bool,
    /// Reject every remote candidate
    pub reject_candidates: bool,
    /// Sleep this long inside `create_answer`
    pub answer_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockState {
    remote_description: Option<String>,
    local_description: Option<String>,
    generated_answer: Option<String>,
    candidates: Vec<IceCandidate>,
    attached_tracks: Vec<String>,
    frames_written: u64,
    close_calls: usize,
}

/// Scriptable [`PeerTransport`]
///
/// Like a real peer connection, it refuses remote candidates before the
/// remote description is set and only commits the answer it generated.
pub struct MockTransport {
    session_id: String,
    behavior: MockBehavior,
    state: Arc<Mutex<MockState>>,
    events: Option<SessionEventSender>,
}

impl MockTransport {
    /// Transport with default behavior and no event queue
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    /// Transport with custom behavior
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            session_id: String::new(),
            behavior,
            state: Arc::new(Mutex::new(MockState::default())),
            events: None,
        }
    }

    /// Session this transport was created for
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Remote candidates applied, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    /// Applied remote description
    pub fn remote_description(&self) -> Option<String> {
        self.state.lock().remote_description.clone()
    }

    /// Committed local description
    pub fn local_description(&self) -> Option<String> {
        self.state.lock().local_description.clone()
    }

    /// IDs of attached outbound tracks
    pub fn attached_tracks(&self) -> Vec<String> {
        self.state.lock().attached_tracks.clone()
    }

    /// Frames written to attached tracks
    pub fn frames_written(&self) -> u64 {
        self.state.lock().frames_written
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().close_calls > 0
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Push a connectivity change, as the transport library would
    pub fn emit_connectivity(&self, connectivity: Connectivity) -> bool {
        self.emit(SessionEventKind::Connectivity(connectivity))
    }

    /// Push a locally gathered candidate
    pub fn emit_local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(SessionEventKind::LocalCandidate(candidate))
    }

    /// Push a frame received from the remote peer
    pub fn emit_remote_frame(&self, frame: VideoFrame) -> bool {
        self.emit(SessionEventKind::RemoteFrame(frame))
    }

    fn emit(&self, kind: SessionEventKind) -> bool {
        match &self.events {
            Some(events) => events
                .send(SessionEvent::new(self.session_id.clone(), kind))
                .is_ok(),
            None => false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct MockSink {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn write_frame(&self, _frame: &VideoFrame) -> WebRtcResult<()> {
        self.state.lock().frames_written += 1;
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn set_remote_description(&self, sdp: &str) -> WebRtcResult<()> {
        if self.behavior.reject_offer {
            return Err(WebRtcError::InvalidOffer("rejected by transport".to_string()));
        }
        let mut state = self.state.lock();
        if state.remote_description.is_some() {
            return Err(WebRtcError::Internal("remote description already set".to_string()));
        }
        state.remote_description = Some(sdp.to_string());
        Ok(())
    }

    async fn attach_track(&self, _kind: TrackKind, track_id: &str) -> WebRtcResult<Arc<dyn FrameSink>> {
        self.state.lock().attached_tracks.push(track_id.to_string());
        Ok(Arc::new(MockSink {
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_answer(&self) -> WebRtcResult<String> {
        if let Some(delay) = self.behavior.answer_delay {
            tokio::time::sleep(delay).await;
        }

        let remote = self
            .state
            .lock()
            .remote_description
            .clone()
            .ok_or_else(|| WebRtcError::Internal("no remote description".to_string()))?;

        // Mirror the offer's sections, like a real answerer
        let mut answer = String::from("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n");
        for (mid, kind) in sdp::media_kinds(&remote).iter().enumerate() {
            answer.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=mid:{}\r\na=sendonly\r\n",
                kind, mid
            ));
        }
        self.state.lock().generated_answer = Some(answer.clone());
        Ok(answer)
    }

    async fn set_local_description(&self, sdp: &str) -> WebRtcResult<()> {
        let mut state = self.state.lock();
        if state.generated_answer.as_deref() != Some(sdp) {
            return Err(WebRtcError::Internal(
                "new sdp does not match previous answer".to_string(),
            ));
        }
        state.local_description = Some(sdp.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> WebRtcResult<()> {
        if self.behavior.reject_candidates {
            return Err(WebRtcError::InvalidCandidate("rejected by transport".to_string()));
        }
        let mut state = self.state.lock();
        if state.remote_description.is_none() {
            return Err(WebRtcError::InvalidCandidate(
                "remote description not set".to_string(),
            ));
        }
        state.candidates.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> WebRtcResult<()> {
        self.state.lock().close_calls += 1;
        Ok(())
    }
}

/// Factory handing out [`MockTransport`]s and keeping a handle to each
#[derive(Default)]
pub struct MockTransportFactory {
    behavior: MockBehavior,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Factory with default behavior
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose transports use `behavior`
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Every transport created so far, oldest first
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    /// Most recently created transport
    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }

    /// Transport created for `session_id`
    pub fn for_session(&self, session_id: &str) -> Option<Arc<MockTransport>> {
        self.created
            .lock()
            .iter()
            .find(|t| t.session_id == session_id)
            .cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        session_id: &str,
        events: SessionEventSender,
    ) -> WebRtcResult<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockTransport {
            session_id: session_id.to_string(),
            behavior: self.behavior.clone(),
            state: Arc::new(Mutex::new(MockState::default())),
            events: Some(events),
        });
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}
