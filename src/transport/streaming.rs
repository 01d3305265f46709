//! Streaming-model session adapter
//!
//! Maintains a duplex WebSocket to the streaming speech model: captured
//! frames go out immediately in arrival order, synthesized audio chunks and
//! transcript done-segments come back. Inbound chunks are scheduled
//! back-to-back on the playback sink; a single malformed message is logged
//! and dropped, never fatal.
//!
//! # Connection Flow
//!
//! 1. `open()` - fail fast without a credential, else connect and wait for
//!    `session.created`
//! 2. send `session.update` with voice, instructions, and output
//!    transcription enabled
//! 3. receiver task reports `Opened` on the `session.updated` ack, then
//!    translates server events for the controller
//! 4. `close()` - cancel the receiver, close the socket, signal `Closed` once

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use super::protocol::{ClientMessage, ServerMessage, STREAMING_MODEL_URL};
use super::{OpenRequest, Speaker, TransportError, TransportEvent, TransportHandle, VoiceTransport};
use crate::audio::codec::{self, OUTPUT_SAMPLE_RATE};
use crate::audio::playback::{PlaybackScheduler, PlaybackSink};

/// Timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the session.created message
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Streaming-model backend. Holds the playback sink until a session opens.
pub struct StreamingTransport<S: PlaybackSink + 'static> {
    sink: Option<S>,
}

impl<S: PlaybackSink + 'static> StreamingTransport<S> {
    pub fn new(sink: S) -> Self {
        Self { sink: Some(sink) }
    }
}

#[async_trait]
impl<S: PlaybackSink + 'static> VoiceTransport for StreamingTransport<S> {
    async fn open(
        &mut self,
        request: OpenRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        // Credential check happens before any network attempt
        if request.credential.is_empty() {
            return Err(TransportError::MissingCredential);
        }
        let sink = self
            .sink
            .take()
            .ok_or_else(|| TransportError::Connection("transport already opened".to_string()))?;

        let mut ws_request = STREAMING_MODEL_URL
            .into_client_request()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        ws_request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", request.credential))
                .map_err(|e| TransportError::CredentialRejected(e.to_string()))?,
        );
        ws_request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        log::info!("Streaming: connecting to speech model...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(ws_request, None, false),
        )
        .await
        .map_err(|_| TransportError::Connection("Connection timeout".to_string()))?
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let session_id = wait_for_session_created(&mut read).await?;
        log::info!("Streaming: session created: {}", session_id);

        // Configure voice, instructions, and output transcription
        let setup = ClientMessage::session_update(&request.voice, &request.instructions);
        send_message(&mut write, &setup).await?;

        let shutdown = CancellationToken::new();
        let receiver_task = tokio::spawn(run_receiver(
            read,
            events.clone(),
            PlaybackScheduler::new(sink),
            shutdown.clone(),
        ));

        Ok(Box::new(StreamingHandle {
            write,
            events,
            shutdown,
            receiver_task,
            closed: false,
        }))
    }
}

/// Live handle to an open streaming session
pub struct StreamingHandle {
    write: WsSink,
    events: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
    receiver_task: tokio::task::JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl TransportHandle for StreamingHandle {
    async fn send_audio(&mut self, samples: &[f32]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Send("transport closed".to_string()));
        }
        let frame = codec::encode_frame(samples);
        let msg = ClientMessage::audio_append(&frame);
        send_message(&mut self.write, &msg).await
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        log::info!("Streaming: closing session");
        self.shutdown.cancel();

        if let Err(e) = self.write.close().await {
            log::warn!("Streaming: error closing socket: {}", e);
        }

        // Give the receiver a moment to stop the playback sink, then drop it
        let _ = timeout(Duration::from_secs(1), &mut self.receiver_task).await;
        self.receiver_task.abort();

        if self.events.send(TransportEvent::Closed).await.is_err() {
            log::debug!("Streaming: event channel gone during close");
        }
    }
}

impl Drop for StreamingHandle {
    fn drop(&mut self) {
        // Dropping without close() still stops the receiver task
        self.shutdown.cancel();
        self.receiver_task.abort();
    }
}

async fn send_message(write: &mut WsSink, msg: &ClientMessage) -> Result<(), TransportError> {
    let json = serde_json::to_string(msg).map_err(|e| TransportError::Send(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

async fn wait_for_session_created(read: &mut WsSource) -> Result<String, TransportError> {
    timeout(SESSION_TIMEOUT, async {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::SessionCreated { session }) => return Ok(session.id),
                    Ok(ServerMessage::Error { error }) => {
                        return Err(TransportError::CredentialRejected(error.message));
                    }
                    Ok(_) => {
                        log::debug!("Streaming: ignoring message before session.created");
                    }
                    Err(e) => {
                        log::warn!("Streaming: failed to parse message: {}", e);
                    }
                },
                Ok(Message::Close(_)) => {
                    return Err(TransportError::Connection(
                        "Connection closed before session created".to_string(),
                    ));
                }
                Err(e) => return Err(TransportError::Connection(e.to_string())),
                _ => {} // ping/pong/binary
            }
        }
        Err(TransportError::Connection("Stream ended".to_string()))
    })
    .await
    .map_err(|_| TransportError::Connection("Session creation timeout".to_string()))?
}

/// Receiver loop: translate server messages into transport events and
/// schedule inbound audio. Runs until the socket ends or close cancels it.
async fn run_receiver<S: PlaybackSink>(
    mut read: WsSource,
    events: mpsc::Sender<TransportEvent>,
    mut scheduler: PlaybackScheduler<S>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::debug!("Streaming: receiver cancelled");
                break;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_server_text(&text, &events, &mut scheduler).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Streaming: socket closed by server");
                        let _ = events
                            .send(TransportEvent::Error {
                                message: "Connection closed unexpectedly".to_string(),
                            })
                            .await;
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = events
                            .send(TransportEvent::Error { message: e.to_string() })
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong/binary
                }
            }
        }
    }

    scheduler.stop();
    log::debug!("Streaming: receiver task exiting");
}

/// Dispatch one inbound text message. Separated from the socket loop so the
/// translation rules are testable without a connection.
async fn handle_server_text<S: PlaybackSink>(
    text: &str,
    events: &mpsc::Sender<TransportEvent>,
    scheduler: &mut PlaybackScheduler<S>,
) {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("Streaming: failed to parse message: {}", e);
            let _ = events
                .send(TransportEvent::ParseFailure {
                    message: format!("Failed to parse server message: {}", e),
                })
                .await;
            return;
        }
    };

    match msg {
        ServerMessage::SessionUpdated { session } => {
            log::info!("Streaming: session configured: {}", session.id);
            let _ = events.send(TransportEvent::Opened).await;
        }
        ServerMessage::AudioChunk { delta } => {
            // One frame of synthesized speech; a bad frame is dropped, not fatal
            match codec::decode_frame(&delta)
                .and_then(|bytes| codec::decode_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, 1))
            {
                Ok(buffer) => {
                    scheduler.schedule(buffer);
                }
                Err(e) => {
                    log::warn!("Streaming: dropping malformed audio chunk: {}", e);
                    let _ = events
                        .send(TransportEvent::ParseFailure {
                            message: format!("Malformed audio chunk: {}", e),
                        })
                        .await;
                }
            }
        }
        ServerMessage::TranscriptDone { transcript } => {
            let _ = events
                .send(TransportEvent::TranscriptLine {
                    speaker: Speaker::Ai,
                    text: transcript,
                })
                .await;
        }
        ServerMessage::Error { error } => {
            let _ = events
                .send(TransportEvent::Error {
                    message: error.message,
                })
                .await;
        }
        ServerMessage::SessionCreated { .. }
        | ServerMessage::ResponseDone
        | ServerMessage::Unknown => {}
    }
}
