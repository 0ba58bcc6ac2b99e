//! webrtc-rs backed transport capability.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use super::media::{LocalMediaHandle, MediaError, MediaKind, MediaSource, MediaTrack};
use super::transport::{
    PeerTransport, TransportError, TransportEvent, TransportFactory, TransportState,
};
use crate::config::{IceServerConfig, MediaProfile};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

const AUDIO_SAMPLE_RATE: u32 = 48_000;
const VIDEO_CLOCK_RATE: u32 = 90_000;

// ============================================================================
// TRANSPORT
// ============================================================================

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl WebRtcTransport {
    async fn new(ice_servers: &[IceServerConfig]) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?,
        );

        let (event_tx, _) = broadcast::channel(100);
        let transport = Self { pc, event_tx };
        transport.register_handlers();
        Ok(transport)
    }

    fn register_handlers(&self) {
        let event_tx = self.event_tx.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                tracing::info!("peer connection state: {:?}", s);
                let state = match s {
                    RTCPeerConnectionState::New => TransportState::New,
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => TransportState::New,
                };
                let _ = event_tx.send(TransportEvent::StateChanged(state));
                Box::pin(async {})
            }));

        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                tracing::debug!("ice connection state: {:?}", s);
                Box::pin(async {})
            }));

        let event_tx = self.event_tx.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            let _ = event_tx.send(TransportEvent::Candidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }));
                        }
                        Err(e) => tracing::warn!("failed to encode ice candidate: {}", e),
                    }
                }
                Box::pin(async {})
            }));

        let event_tx = self.event_tx.clone();
        self.pc.on_track(Box::new(move |track, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            tracing::info!("received remote track: {:?}", track.codec());
            let _ = event_tx.send(TransportEvent::RemoteTrack { kind });
            Box::pin(async move {})
        }));
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn attach_media(&self, media: &LocalMediaHandle) -> Result<(), TransportError> {
        for track in media.tracks() {
            let Some(rtp) = track.as_rtp() else {
                return Err(TransportError::Setup(
                    "media handle carries a track without an RTP backing".into(),
                ));
            };
            self.pc
                .add_track(Arc::clone(rtp))
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?;
        }

        // The peer still sends kinds this role does not; negotiate a
        // receive-only line for each of them.
        for (kind, codec_type) in [
            (MediaKind::Audio, RTPCodecType::Audio),
            (MediaKind::Video, RTPCodecType::Video),
        ] {
            if media.has_kind(kind) {
                continue;
            }
            self.pc
                .add_transceiver_from_kind(
                    codec_type,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await
                .map_err(|e| TransportError::Setup(e.to_string()))?;
        }

        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| TransportError::Description(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let rtc_desc = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| TransportError::Description(e.to_string()))?;
        self.pc
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| TransportError::Description(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("peer connection close failed: {}", e);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

#[derive(Debug, Default)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        Ok(Arc::new(WebRtcTransport::new(ice_servers).await?))
    }
}

// ============================================================================
// STATIC RTP MEDIA
// ============================================================================

/// Media source producing `TrackLocalStaticRTP` tracks (Opus audio, VP8
/// video). The host feeds RTP packets into them; capture itself stays
/// outside this crate.
pub struct StaticRtpMedia {
    stream_id: String,
}

impl StaticRtpMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl MediaSource for StaticRtpMedia {
    async fn open(&self, profile: MediaProfile) -> Result<LocalMediaHandle, MediaError> {
        let mut tracks = Vec::new();

        if profile.audio {
            let track = Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: AUDIO_SAMPLE_RATE,
                    channels: 1,
                    ..Default::default()
                },
                "audio".to_string(),
                self.stream_id.clone(),
            ));
            tracks.push(MediaTrack::rtp(
                MediaKind::Audio,
                track as Arc<dyn TrackLocal + Send + Sync>,
            ));
        }

        if profile.video {
            let track = Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: VIDEO_CLOCK_RATE,
                    ..Default::default()
                },
                "video".to_string(),
                self.stream_id.clone(),
            ));
            tracks.push(MediaTrack::rtp(
                MediaKind::Video,
                track as Arc<dyn TrackLocal + Send + Sync>,
            ));
        }

        Ok(LocalMediaHandle::new(tracks))
    }
}
