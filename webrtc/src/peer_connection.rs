//! Real WebRTC transport using the webrtc crate

use crate::{
    config::{VideoCodecConfig, WebRtcConfig},
    error::{WebRtcError, WebRtcResult},
    transport::{
        Connectivity, FrameSink, PeerTransport, SessionEvent, SessionEventKind,
        SessionEventSender, TransportFactory,
    },
    types::IceCandidate,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use visionrtc_media::{TrackKind, VideoFrame};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        setting_engine::SettingEngine, APIBuilder,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

const STREAM_ID: &str = "visionrtc";

/// Partial frames larger than this are discarded
const MAX_REASSEMBLY_BYTES: usize = 4 * 1024 * 1024;

/// [`PeerTransport`] backed by a `webrtc` crate peer connection
pub struct RtcTransport {
    session_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    codec: VideoCodecConfig,
}

impl RtcTransport {
    /// Create a peer connection and wire its callbacks to `events`
    pub async fn new(
        config: &WebRtcConfig,
        session_id: &str,
        events: SessionEventSender,
    ) -> WebRtcResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            WebRtcError::Internal(format!("Failed to register codecs: {}", e))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            WebRtcError::Internal(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            WebRtcError::Internal(format!("Failed to create peer connection: {}", e))
        })?;

        let transport = Self {
            session_id: session_id.to_string(),
            peer_connection: Arc::new(peer_connection),
            codec: config.video_codec.clone(),
        };
        transport.setup_event_handlers(events, config.analysis_interval);

        tracing::debug!(session_id = %session_id, "Created peer connection");
        Ok(transport)
    }

    /// Current connection state
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.peer_connection.connection_state()
    }

    fn setup_event_handlers(&self, events: SessionEventSender, frame_interval: Duration) {
        let session_id = self.session_id.clone();
        let state_events = events.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let session_id = session_id.clone();
                let events = state_events.clone();

                Box::pin(async move {
                    let connectivity = match s {
                        RTCPeerConnectionState::New => Connectivity::New,
                        RTCPeerConnectionState::Connecting => Connectivity::Connecting,
                        RTCPeerConnectionState::Connected => Connectivity::Connected,
                        RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
                        RTCPeerConnectionState::Failed => Connectivity::Failed,
                        RTCPeerConnectionState::Closed => Connectivity::Closed,
                        _ => return,
                    };
                    tracing::debug!(session_id = %session_id, state = %s, "Peer connection state changed");
                    // Receiver gone means the connection worker has exited
                    let _ = events.send(SessionEvent::new(
                        session_id,
                        SessionEventKind::Connectivity(connectivity),
                    ));
                })
            }));

        let session_id = self.session_id.clone();
        let candidate_events = events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            let _ = candidate_events.send(SessionEvent::new(
                                session_id.clone(),
                                SessionEventKind::LocalCandidate(IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    username_fragment: init.username_fragment,
                                }),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, "Failed to encode local candidate: {}", e);
                        }
                    }
                }
                Box::pin(async {})
            }));

        let session_id = self.session_id.clone();
        let clock_rate = self.codec.clock_rate.max(1);
        self.peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let session_id = session_id.clone();
            let events = events.clone();
            Box::pin(async move {
                tracing::info!(session_id = %session_id, kind = ?track.kind(), "Remote track added");
                if track.kind() != RTPCodecType::Video {
                    return;
                }
                tokio::spawn(read_remote_video(
                    track,
                    session_id,
                    events,
                    clock_rate,
                    frame_interval,
                ));
            })
        }));
    }
}

/// Reassemble RTP payloads into frames (one frame per marker bit) and forward
/// at most one frame per `frame_interval`
async fn read_remote_video(
    track: Arc<TrackRemote>,
    session_id: String,
    events: SessionEventSender,
    clock_rate: u32,
    frame_interval: Duration,
) {
    let mut buf = BytesMut::new();
    let mut sequence = 0u64;
    let mut last_timestamp: Option<u32> = None;
    let mut last_emit: Option<Instant> = None;

    loop {
        let packet = match track.read_rtp().await {
            Ok((packet, _)) => packet,
            Err(e) => {
                tracing::debug!(session_id = %session_id, "Remote track ended: {}", e);
                break;
            }
        };

        if buf.len() + packet.payload.len() > MAX_REASSEMBLY_BYTES {
            tracing::warn!(session_id = %session_id, "Dropping oversized partial frame");
            buf.clear();
            continue;
        }
        buf.extend_from_slice(&packet.payload);

        if !packet.header.marker {
            continue;
        }

        let timestamp = packet.header.timestamp;
        let duration = last_timestamp
            .map(|prev| {
                let ticks = timestamp.wrapping_sub(prev);
                Duration::from_micros(u64::from(ticks) * 1_000_000 / u64::from(clock_rate))
            })
            .unwrap_or_default();
        last_timestamp = Some(timestamp);

        let payload: Bytes = buf.split().freeze();
        let due = last_emit.map_or(true, |at| at.elapsed() >= frame_interval);
        if due {
            last_emit = Some(Instant::now());
            let frame = VideoFrame::new(sequence, 0, 0, payload, duration);
            if events
                .send(SessionEvent::new(session_id.clone(), SessionEventKind::RemoteFrame(frame)))
                .is_err()
            {
                break;
            }
        }
        sequence += 1;
    }
}

fn ice_servers(config: &WebRtcConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Sink writing frames as samples to a local static track
struct SampleSink {
    track: Arc<TrackLocalStaticSample>,
}

#[async_trait]
impl FrameSink for SampleSink {
    async fn write_frame(&self, frame: &VideoFrame) -> WebRtcResult<()> {
        self.track
            .write_sample(&Sample {
                data: frame.payload.clone(),
                duration: frame.duration,
                ..Default::default()
            })
            .await
            .map_err(|e| WebRtcError::TransportFailed(format!("Failed to write sample: {}", e)))
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn set_remote_description(&self, sdp: &str) -> WebRtcResult<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| WebRtcError::InvalidOffer(format!("Invalid SDP offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| WebRtcError::InvalidOffer(format!("Failed to set remote description: {}", e)))
    }

    async fn attach_track(&self, kind: TrackKind, track_id: &str) -> WebRtcResult<Arc<dyn FrameSink>> {
        if kind != TrackKind::Video {
            return Err(WebRtcError::Internal(format!("Unsupported track kind: {}", kind)));
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: self.codec.mime_type.clone(),
                clock_rate: self.codec.clock_rate,
                ..Default::default()
            },
            track_id.to_string(),
            STREAM_ID.to_string(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| WebRtcError::Internal(format!("Failed to add track: {}", e)))?;

        // RTCP must be drained for interceptors (NACK, reports) to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        tracing::debug!(session_id = %self.session_id, track_id = %track_id, "Attached local track");
        Ok(Arc::new(SampleSink { track }))
    }

    async fn create_answer(&self) -> WebRtcResult<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| WebRtcError::Internal(format!("Failed to create answer: {}", e)))?;
        Ok(answer.sdp)
    }

    async fn set_local_description(&self, sdp: &str) -> WebRtcResult<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| WebRtcError::Internal(format!("Invalid SDP answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| WebRtcError::Internal(format!("Failed to set local description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> WebRtcResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| WebRtcError::InvalidCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> WebRtcResult<()> {
        self.peer_connection.close().await.map_err(|e| {
            WebRtcError::TransportFailed(format!("Failed to close peer connection: {}", e))
        })
    }
}

/// Creates one [`RtcTransport`] per session
pub struct RtcTransportFactory {
    config: Arc<WebRtcConfig>,
}

impl RtcTransportFactory {
    /// Create a factory sharing `config`
    pub fn new(config: Arc<WebRtcConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        session_id: &str,
        events: SessionEventSender,
    ) -> WebRtcResult<Arc<dyn PeerTransport>> {
        let transport = RtcTransport::new(&self.config, session_id, events).await?;
        Ok(Arc::new(transport))
    }
}
