//! Integration tests for real WebRTC peer connections

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use visionrtc_media::{NoopAnalyzer, SyntheticConfig, SyntheticSource, TrackKind};
use visionrtc_webrtc::{
    media_kinds, MediaKind, PeerSessionManager, PeerTransport, RtcTransport, RtcTransportFactory,
    ServerMessage, SessionState, SignalingHub, WebRtcConfig,
};
use webrtc::{
    api::{media_engine::MediaEngine, APIBuilder},
    peer_connection::{
        configuration::RTCConfiguration, sdp::session_description::RTCSessionDescription,
        RTCPeerConnection,
    },
    rtp_transceiver::{
        rtp_codec::RTPCodecType, rtp_transceiver_direction::RTCRtpTransceiverDirection,
        RTCRtpTransceiverInit,
    },
};

/// Config without STUN so tests never leave the host
fn local_config() -> WebRtcConfig {
    WebRtcConfig {
        ice_servers: Vec::new(),
        ..Default::default()
    }
}

/// A browser-like peer that only wants to receive video
async fn viewer() -> Result<(RTCPeerConnection, String)> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let pc = api.new_peer_connection(RTCConfiguration::default()).await?;
    pc.add_transceiver_from_kind(
        RTPCodecType::Video,
        Some(RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        }),
    )
    .await?;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;
    Ok((pc, offer.sdp))
}

/// A peer whose offer only negotiates a data channel
async fn data_only_peer() -> Result<(RTCPeerConnection, String)> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let pc = api.new_peer_connection(RTCConfiguration::default()).await?;
    pc.create_data_channel("signals", None).await?;

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer.clone()).await?;
    Ok((pc, offer.sdp))
}

/// Test answering a real offer directly through the transport
#[tokio::test]
async fn test_transport_answers_real_offer() -> Result<()> {
    let (viewer, offer) = viewer().await?;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let transport = RtcTransport::new(&local_config(), "session-1", events_tx).await?;
    transport.set_remote_description(&offer).await?;
    transport.attach_track(TrackKind::Video, "video-test").await?;

    let answer = transport.create_answer().await?;
    assert!(answer.starts_with("v=0"), "answer should be SDP");
    assert_eq!(media_kinds(&answer), vec![MediaKind::Video]);

    transport.set_local_description(&answer).await?;
    viewer
        .set_remote_description(RTCSessionDescription::answer(answer)?)
        .await?;

    transport.close().await?;
    viewer.close().await?;
    Ok(())
}

/// Test a full offer round trip through the signaling hub
#[tokio::test]
async fn test_hub_answers_real_offer() -> Result<()> {
    let config = Arc::new(local_config());
    let manager = Arc::new(PeerSessionManager::new(
        config.clone(),
        Arc::new(RtcTransportFactory::new(config)),
        Arc::new(SyntheticSource::new(SyntheticConfig::default())),
    ));
    let hub = SignalingHub::new(manager.clone(), Arc::new(NoopAnalyzer));

    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let mut conn = hub.on_connect(outbound_tx);
    let client_id = conn.id();

    let (viewer, offer) = viewer().await?;
    let raw = json!({ "offer": offer }).to_string();
    hub.on_message(&mut conn, raw.as_bytes()).await;

    let message = tokio::time::timeout(Duration::from_secs(5), outbound_rx.recv()).await?;
    let answer = match message {
        Some(ServerMessage::Answer { answer }) => answer,
        other => panic!("expected answer, got {:?}", other),
    };
    assert!(answer.contains("m=video"), "answer should carry a video section");
    assert_eq!(
        manager.session_state(client_id).await,
        Some(SessionState::AnswerCreated)
    );

    viewer
        .set_remote_description(RTCSessionDescription::answer(answer)?)
        .await?;

    hub.on_disconnect(conn).await;
    assert!(manager.find(client_id).await.is_none());
    assert_eq!(manager.session_count().await, 0);

    viewer.close().await?;
    Ok(())
}

/// Test that a transport rejects an offer the SDP parser cannot read
#[tokio::test]
async fn test_transport_rejects_unparseable_offer() -> Result<()> {
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let transport = RtcTransport::new(&local_config(), "session-2", events_tx).await?;

    let result = transport.set_remote_description("v=0\r\nm=bogus\r\n").await;
    assert!(result.is_err(), "garbage offer must be rejected");

    transport.close().await?;
    Ok(())
}

/// Test that an offer without media still gets a video section back
#[tokio::test]
async fn test_hub_answers_data_only_offer_with_video() -> Result<()> {
    let config = Arc::new(local_config());
    let manager = Arc::new(PeerSessionManager::new(
        config.clone(),
        Arc::new(RtcTransportFactory::new(config)),
        Arc::new(SyntheticSource::new(SyntheticConfig::default())),
    ));
    let hub = SignalingHub::new(manager.clone(), Arc::new(NoopAnalyzer));

    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let mut conn = hub.on_connect(outbound_tx);
    let client_id = conn.id();

    let (peer, offer) = data_only_peer().await?;
    assert!(!offer.contains("m=video"));
    let raw = json!({ "offer": offer }).to_string();
    hub.on_message(&mut conn, raw.as_bytes()).await;

    let message = tokio::time::timeout(Duration::from_secs(5), outbound_rx.recv()).await?;
    let answer = match message {
        Some(ServerMessage::Answer { answer }) => answer,
        other => panic!("expected answer, got {:?}", other),
    };
    assert!(answer.contains("m=application"));
    assert!(answer.contains("m=video"), "answer should carry a video section");
    assert_eq!(
        manager.session_state(client_id).await,
        Some(SessionState::AnswerCreated)
    );

    hub.on_disconnect(conn).await;
    assert_eq!(manager.session_count().await, 0);

    peer.close().await?;
    Ok(())
}
