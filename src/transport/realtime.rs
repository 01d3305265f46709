//! Peer-to-peer realtime session adapter
//!
//! Negotiates a WebRTC media session: a short-lived credential is minted by
//! the broker, the local offer is POSTed to the returned negotiation URL,
//! and after the answer is applied audio flows over the negotiated media
//! path while a data channel carries transcripts and control events.
//!
//! The remote transcript arrives as deltas on the side-channel and is
//! buffered until the turn-done marker - see [`super::sidechannel`].
//!
//! # Connection Health
//!
//! new → connecting → connected → disconnected → (grace window) →
//! {connected | failed}. A disconnect gets one grace window before it is
//! treated as fatal; `failed` closes immediately; teardown runs exactly once
//! no matter which observer requests it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::sidechannel::{DeltaBuffer, SideChannelMessage};
use super::{OpenRequest, Speaker, TransportError, TransportEvent, TransportHandle, VoiceTransport};
use crate::broker::{BrokerClient, BrokerError};

/// How long a transient disconnect may last before it is fatal
const GRACE_WINDOW: Duration = Duration::from_secs(5);

/// Label of the structured side-channel
const SIDE_CHANNEL_LABEL: &str = "oai-events";

/// Capture rate fed into the local track
const TRACK_SAMPLE_RATE: u32 = 16_000;

/// Duration of one Opus frame written to the local track
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// Samples per Opus frame at the capture rate
const OPUS_FRAME_SAMPLES: usize = (TRACK_SAMPLE_RATE as usize / 1000) * 20;

/// Upper bound on one encoded Opus packet
const MAX_OPUS_PACKET: usize = 1500;

/// Browser family the negotiation request runs under. One family's
/// networking stack rejects the `filter` query parameter on the negotiation
/// URL, so it must be stripped there - detected from the user agent, never
/// assumed from the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    SafariFamily,
    Other,
}

impl ClientProfile {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ua.contains("safari") && !ua.contains("chrome") && !ua.contains("chromium") {
            ClientProfile::SafariFamily
        } else {
            ClientProfile::Other
        }
    }
}

/// Strip the `filter` query parameter for Safari-family clients; every other
/// profile uses the URL the broker returned untouched.
pub fn normalize_negotiation_url(calls_url: &str, profile: ClientProfile) -> String {
    if profile != ClientProfile::SafariFamily {
        return calls_url.to_string();
    }

    let (base, query) = match calls_url.split_once('?') {
        Some((base, query)) => (base, query),
        None => return calls_url.to_string(),
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            key != "filter"
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

/// What the health observer does in response to a connection-state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthAction {
    None,
    /// Connection (re)established: cancel any pending grace timer
    Recovered,
    /// Transient disconnect: start the grace timer
    StartGrace,
    /// Unrecoverable: close immediately
    CloseNow,
    /// Underlying connection closed: run teardown
    Teardown,
}

fn health_action(state: RTCPeerConnectionState) -> HealthAction {
    match state {
        RTCPeerConnectionState::Connected => HealthAction::Recovered,
        RTCPeerConnectionState::Disconnected => HealthAction::StartGrace,
        RTCPeerConnectionState::Failed => HealthAction::CloseNow,
        RTCPeerConnectionState::Closed => HealthAction::Teardown,
        _ => HealthAction::None,
    }
}

/// Peer-to-peer realtime backend.
pub struct RealtimeTransport {
    broker: BrokerClient,
    /// Remote media packets are forwarded here for the platform playout;
    /// they are never decoded by this adapter.
    media_out: mpsc::Sender<Bytes>,
    profile: ClientProfile,
}

impl RealtimeTransport {
    pub fn new(broker: BrokerClient, media_out: mpsc::Sender<Bytes>, profile: ClientProfile) -> Self {
        Self {
            broker,
            media_out,
            profile,
        }
    }
}

#[async_trait]
impl VoiceTransport for RealtimeTransport {
    async fn open(
        &mut self,
        request: OpenRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let framer = OpusFramer::new()?;

        // 1. Mint a short-lived credential; the browser side never holds
        //    long-lived realtime secrets.
        let credential = self
            .broker
            .mint(&request.instructions, &request.voice)
            .await
            .map_err(broker_to_credential_error)?;

        // 2. Peer connection, local track and side-channel all exist before
        //    the offer so they are represented in it.
        let pc = create_peer_connection()
            .await
            .map_err(TransportError::Connection)?;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 1,
                ..Default::default()
            },
            "mic".to_owned(),
            "phenolive-interviewee".to_owned(),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // Drain RTCP so the sender does not stall
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let data_channel = pc
            .create_data_channel(SIDE_CHANNEL_LABEL, None)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let shared = Arc::new(SharedSession {
            pc: Arc::clone(&pc),
            data_channel: Arc::clone(&data_channel),
            events: events.clone(),
            closed: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            grace: Mutex::new(None),
        });

        wire_side_channel(&data_channel, events.clone());
        wire_remote_media(&pc, self.media_out.clone());
        wire_health_observer(&pc, Arc::clone(&shared));

        // 3. Offer with complete ICE candidates
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let _ = gather_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description".to_string()))?;

        // 4. Offer/answer exchange against the minted negotiation URL
        let negotiation_url = normalize_negotiation_url(&credential.calls_url, self.profile);
        let answer_sdp = self
            .broker
            .negotiate(&negotiation_url, &credential.token, &local.sdp)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        log::info!("Realtime: negotiation complete, awaiting media");

        Ok(Box::new(RealtimeHandle {
            track,
            framer,
            shared,
        }))
    }
}

fn broker_to_credential_error(e: BrokerError) -> TransportError {
    match e {
        BrokerError::Rejected { .. } => TransportError::CredentialRejected(e.to_string()),
        BrokerError::Unreachable(_) | BrokerError::MalformedResponse(_) => {
            TransportError::Broker(e.to_string())
        }
    }
}

async fn create_peer_connection() -> Result<Arc<RTCPeerConnection>, String> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| format!("codec registration failed: {}", e))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| format!("interceptor registration failed: {}", e))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
            ..Default::default()
        }],
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(|e| format!("peer connection failed: {}", e))?;

    Ok(Arc::new(pc))
}

/// Translate side-channel messages into transport events, buffering deltas
/// until the turn-done marker.
fn wire_side_channel(data_channel: &Arc<RTCDataChannel>, events: mpsc::Sender<TransportEvent>) {
    let buffer = Arc::new(Mutex::new(DeltaBuffer::new()));

    data_channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = events.clone();
        let buffer = Arc::clone(&buffer);
        Box::pin(async move {
            let text = match std::str::from_utf8(&msg.data) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    log::warn!("Realtime: non-UTF8 side-channel message dropped");
                    return;
                }
            };
            let mut buffer = buffer.lock().await;
            handle_side_channel_text(&text, &mut buffer, &events).await;
        })
    }));
}

async fn handle_side_channel_text(
    text: &str,
    buffer: &mut DeltaBuffer,
    events: &mpsc::Sender<TransportEvent>,
) {
    let msg: SideChannelMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Realtime: failed to parse side-channel message: {}", e);
            let _ = events
                .send(TransportEvent::ParseFailure {
                    message: format!("Failed to parse side-channel message: {}", e),
                })
                .await;
            return;
        }
    };

    match msg {
        SideChannelMessage::TranscriptDelta { delta } => {
            buffer.push_delta(&delta);
        }
        SideChannelMessage::TranscriptTurnDone { transcript } => {
            if let Some(text) = buffer.flush(transcript.as_deref()) {
                let _ = events
                    .send(TransportEvent::TranscriptLine {
                        speaker: Speaker::Ai,
                        text,
                    })
                    .await;
            }
        }
        SideChannelMessage::LocalTranscriptCompleted { transcript } => {
            if !transcript.is_empty() {
                let _ = events
                    .send(TransportEvent::TranscriptLine {
                        speaker: Speaker::Interviewee,
                        text: transcript,
                    })
                    .await;
            }
        }
        SideChannelMessage::Error { error } => {
            let _ = events
                .send(TransportEvent::Error {
                    message: error.message,
                })
                .await;
        }
        SideChannelMessage::Unknown => {}
    }
}

/// Forward remote media packets to the playout channel. The packets stay
/// opaque here - decoding is the playout facility's job.
fn wire_remote_media(pc: &Arc<RTCPeerConnection>, media_out: mpsc::Sender<Bytes>) {
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let media_out = media_out.clone();
        Box::pin(async move {
            log::info!("Realtime: remote track started: {}", track.id());
            tokio::spawn(forward_remote_track(track, media_out));
        })
    }));
}

async fn forward_remote_track(track: Arc<TrackRemote>, media_out: mpsc::Sender<Bytes>) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                let payload = Bytes::copy_from_slice(&packet.payload);
                if media_out.send(payload).await.is_err() {
                    log::debug!("Realtime: media playout channel closed");
                    break;
                }
            }
            Err(e) => {
                log::debug!("Realtime: remote track ended: {}", e);
                break;
            }
        }
    }
}

/// Mirror the peer-connection state into the health machine.
fn wire_health_observer(pc: &Arc<RTCPeerConnection>, shared: Arc<SharedSession>) {
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let shared = Arc::clone(&shared);
        Box::pin(async move {
            log::info!("Realtime: connection state: {:?}", state);
            match health_action(state) {
                HealthAction::None => {}
                HealthAction::Recovered => {
                    shared.cancel_grace().await;
                    if !shared.opened.swap(true, Ordering::SeqCst) {
                        let _ = shared.events.send(TransportEvent::Opened).await;
                    }
                }
                HealthAction::StartGrace => {
                    shared.start_grace().await;
                }
                HealthAction::CloseNow => {
                    let _ = shared
                        .events
                        .send(TransportEvent::Error {
                            message: "Realtime connection failed".to_string(),
                        })
                        .await;
                    shared.close().await;
                }
                HealthAction::Teardown => {
                    shared.close().await;
                }
            }
        })
    }));
}

/// State shared between the handle, the health observer and the grace timer.
struct SharedSession {
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    events: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    opened: AtomicBool,
    grace: Mutex<Option<CancellationToken>>,
}

impl SharedSession {
    async fn start_grace(self: &Arc<Self>) {
        let mut grace = self.grace.lock().await;
        if grace.is_some() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        *grace = Some(token.clone());
        drop(grace);

        log::warn!(
            "Realtime: connection lost, waiting {:?} for recovery",
            GRACE_WINDOW
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("Realtime: connection recovered within grace window");
                }
                _ = tokio::time::sleep(GRACE_WINDOW) => {
                    let _ = shared
                        .events
                        .send(TransportEvent::Error {
                            message: "Connection lost and did not recover".to_string(),
                        })
                        .await;
                    shared.close().await;
                }
            }
        });
    }

    async fn cancel_grace(&self) {
        if let Some(token) = self.grace.lock().await.take() {
            token.cancel();
        }
    }

    /// Best-effort teardown, exactly once: cancel the grace timer, close the
    /// side-channel, release sender tracks, close the peer connection, then
    /// signal `Closed`. Individual step failures are logged, never raised.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Realtime: closing session");

        self.cancel_grace().await;

        if let Err(e) = self.data_channel.close().await {
            log::warn!("Realtime: error closing side-channel: {}", e);
        }

        for sender in self.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                log::warn!("Realtime: error stopping sender track: {}", e);
            }
        }

        if let Err(e) = self.pc.close().await {
            log::warn!("Realtime: error closing peer connection: {}", e);
        }

        if self.events.send(TransportEvent::Closed).await.is_err() {
            log::debug!("Realtime: event channel gone during close");
        }
    }
}

/// Accumulates captured samples into whole 20 ms frames and Opus-encodes
/// them. Remainders carry over to the next batch, so batch sizes from the
/// capture layer never have to line up with the frame size.
struct OpusFramer {
    encoder: Encoder,
    pending: Vec<f32>,
    output: Vec<u8>,
}

impl OpusFramer {
    fn new() -> Result<Self, TransportError> {
        let encoder = Encoder::new(SampleRate::Hz16000, Channels::Mono, Application::Voip)
            .map_err(|e| TransportError::Connection(format!("Opus encoder: {}", e)))?;
        Ok(Self {
            encoder,
            pending: Vec::with_capacity(OPUS_FRAME_SAMPLES * 2),
            output: vec![0u8; MAX_OPUS_PACKET],
        })
    }

    /// Feed one captured batch; returns an encoded packet per completed frame.
    fn push(&mut self, samples: &[f32]) -> Result<Vec<Bytes>, TransportError> {
        self.pending.extend_from_slice(samples);

        let mut packets = Vec::new();
        while self.pending.len() >= OPUS_FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..OPUS_FRAME_SAMPLES).collect();
            let len = self
                .encoder
                .encode_float(&frame, &mut self.output)
                .map_err(|e| TransportError::Send(format!("Opus encode: {}", e)))?;
            packets.push(Bytes::copy_from_slice(&self.output[..len]));
        }
        Ok(packets)
    }
}

/// Live handle to an open peer-to-peer session. Captured batches are framed
/// and Opus-encoded before they reach the local track; the track's
/// packetizer handles RTP.
pub struct RealtimeHandle {
    track: Arc<TrackLocalStaticSample>,
    framer: OpusFramer,
    shared: Arc<SharedSession>,
}

#[async_trait]
impl TransportHandle for RealtimeHandle {
    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("transport closed".to_string()));
        }

        for payload in self.framer.push(samples)? {
            self.track
                .write_sample(&Sample {
                    data: payload,
                    duration: OPUS_FRAME,
                    ..Default::default()
                })
                .await
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.shared.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_profile_from_user_agent() {
        let safari = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                      AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
        assert_eq!(
            ClientProfile::from_user_agent(safari),
            ClientProfile::SafariFamily
        );

        let chrome = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                      (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
        assert_eq!(ClientProfile::from_user_agent(chrome), ClientProfile::Other);

        let firefox = "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0";
        assert_eq!(ClientProfile::from_user_agent(firefox), ClientProfile::Other);
    }

    #[test]
    fn test_normalize_strips_filter_for_safari() {
        let url = "https://calls.example/v1/calls?filter=audio&session=abc";
        let normalized = normalize_negotiation_url(url, ClientProfile::SafariFamily);
        assert_eq!(normalized, "https://calls.example/v1/calls?session=abc");
    }

    #[test]
    fn test_normalize_drops_query_when_only_filter() {
        let url = "https://calls.example/v1/calls?filter=audio";
        let normalized = normalize_negotiation_url(url, ClientProfile::SafariFamily);
        assert_eq!(normalized, "https://calls.example/v1/calls");
    }

    #[test]
    fn test_normalize_untouched_for_other_profiles() {
        let url = "https://calls.example/v1/calls?filter=audio&session=abc";
        let normalized = normalize_negotiation_url(url, ClientProfile::Other);
        assert_eq!(normalized, url);
    }

    #[test]
    fn test_normalize_without_query() {
        let url = "https://calls.example/v1/calls";
        assert_eq!(
            normalize_negotiation_url(url, ClientProfile::SafariFamily),
            url
        );
    }

    #[test]
    fn test_health_actions() {
        assert_eq!(
            health_action(RTCPeerConnectionState::Connected),
            HealthAction::Recovered
        );
        assert_eq!(
            health_action(RTCPeerConnectionState::Disconnected),
            HealthAction::StartGrace
        );
        assert_eq!(
            health_action(RTCPeerConnectionState::Failed),
            HealthAction::CloseNow
        );
        assert_eq!(
            health_action(RTCPeerConnectionState::Closed),
            HealthAction::Teardown
        );
        assert_eq!(
            health_action(RTCPeerConnectionState::Connecting),
            HealthAction::None
        );
        assert_eq!(
            health_action(RTCPeerConnectionState::New),
            HealthAction::None
        );
    }

    #[test]
    fn test_opus_framer_buffers_until_a_full_frame() {
        let mut framer = OpusFramer::new().unwrap();

        // 10 ms at 16 kHz: half a frame, nothing to emit yet
        assert!(framer.push(&[0.1; 160]).unwrap().is_empty());

        // The second half completes exactly one 20 ms frame
        let packets = framer.push(&[0.1; 160]).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].is_empty());
        assert!(packets[0].len() <= MAX_OPUS_PACKET);
    }

    #[test]
    fn test_opus_framer_one_packet_per_frame() {
        let mut framer = OpusFramer::new().unwrap();
        let tone: Vec<f32> = (0..OPUS_FRAME_SAMPLES * 2 + 100)
            .map(|i| {
                (i as f32 * 440.0 / TRACK_SAMPLE_RATE as f32 * std::f32::consts::TAU).sin() * 0.5
            })
            .collect();

        let packets = framer.push(&tone).unwrap();
        assert_eq!(packets.len(), 2);

        // The 100-sample remainder completes with the next batch
        let packets = framer.push(&[0.0; OPUS_FRAME_SAMPLES - 100]).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[tokio::test]
    async fn test_side_channel_delta_buffering() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = DeltaBuffer::new();

        for delta in ["Hel", "lo the", "re"] {
            let json = format!(
                r#"{{"type":"response.output_audio_transcript.delta","delta":"{}"}}"#,
                delta
            );
            handle_side_channel_text(&json, &mut buffer, &tx).await;
        }
        // No line until the turn-done marker
        assert!(rx.try_recv().is_err());

        handle_side_channel_text(
            r#"{"type":"response.output_audio_transcript.done"}"#,
            &mut buffer,
            &tx,
        )
        .await;

        match rx.recv().await {
            Some(TransportEvent::TranscriptLine { speaker, text }) => {
                assert_eq!(speaker, Speaker::Ai);
                assert_eq!(text, "Hello there");
            }
            other => panic!("Expected one transcript line, got {:?}", other),
        }
        // Exactly one line, not three
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_side_channel_local_transcript() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = DeltaBuffer::new();

        handle_side_channel_text(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"It was warm."}"#,
            &mut buffer,
            &tx,
        )
        .await;

        match rx.recv().await {
            Some(TransportEvent::TranscriptLine { speaker, text }) => {
                assert_eq!(speaker, Speaker::Interviewee);
                assert_eq!(text, "It was warm.");
            }
            other => panic!("Expected interviewee line, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_side_channel_error_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = DeltaBuffer::new();

        handle_side_channel_text(
            r#"{"type":"error","error":{"message":"session expired"}}"#,
            &mut buffer,
            &tx,
        )
        .await;

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Error { message }) if message == "session expired"
        ));
    }

    #[tokio::test]
    async fn test_side_channel_parse_failure_non_fatal() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut buffer = DeltaBuffer::new();

        handle_side_channel_text("not json at all", &mut buffer, &tx).await;

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::ParseFailure { .. })
        ));
    }

    async fn shared_session(events: mpsc::Sender<TransportEvent>) -> Arc<SharedSession> {
        let pc = create_peer_connection().await.unwrap();
        let data_channel = pc
            .create_data_channel(SIDE_CHANNEL_LABEL, None)
            .await
            .unwrap();
        Arc::new(SharedSession {
            pc,
            data_channel,
            events,
            closed: AtomicBool::new(false),
            opened: AtomicBool::new(true),
            grace: Mutex::new(None),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window_expiry_is_fatal_and_closes_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let shared = shared_session(tx).await;

        shared.start_grace().await;
        tokio::time::advance(GRACE_WINDOW + Duration::from_millis(50)).await;

        // Exactly one network error, then the single Closed signal
        assert!(matches!(rx.recv().await, Some(TransportEvent::Error { .. })));
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed)));
        assert!(shared.closed.load(Ordering::SeqCst));

        // A later close request is a no-op
        shared.close().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_within_grace_window_raises_no_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let shared = shared_session(tx).await;

        shared.start_grace().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        // Connection came back before the window expired
        shared.cancel_grace().await;
        tokio::time::advance(GRACE_WINDOW * 2).await;
        tokio::task::yield_now().await;

        assert!(rx.try_recv().is_err());
        assert!(!shared.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_broker_errors_map_to_credential_category() {
        use crate::session::classify::DiagnosticCategory;

        let rejected = broker_to_credential_error(BrokerError::Rejected {
            status: 401,
            message: "bad key".to_string(),
        });
        assert_eq!(rejected.category(), DiagnosticCategory::Credential);

        let unreachable =
            broker_to_credential_error(BrokerError::Unreachable("refused".to_string()));
        assert_eq!(unreachable.category(), DiagnosticCategory::Credential);
    }
}
