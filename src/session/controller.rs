//! Live interview session orchestrator
//!
//! Owns the microphone, the active transport adapter, the timers and the
//! runtime state for one session attempt. The shell drives it through
//! [`SessionControls`] (toggle mute, end, cancel) and observes state through
//! a watch channel; the controller's event loop is the only writer of that
//! state, so every invariant in [`super::state`] is enforced in one place.
//!
//! Exactly one terminal outcome per attempt: open, error and the connection
//! timeout race inside one `select!` loop, and whichever fires first settles
//! the session. The transport open is itself an arm of that loop, so End and
//! Cancel land (and the elapsed/level timers run) for the whole connect
//! window. The microphone is released on every exit path.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::audio::capture::{AudioCapture, CaptureConstraints};
use crate::audio::level::LevelMeter;
use crate::config::SessionConfig;
use crate::prompt::{build_instructions, VoiceMap};
use crate::session::classify::{classify, DiagnosticCategory};
use crate::session::state::{LiveSessionState, SessionOutcome};
use crate::transport::{
    OpenRequest, TransportError, TransportEvent, TransportHandle, VoiceTransport,
};

/// From session start until either open or an error; always fatal on expiry
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Elapsed-seconds tick
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Mic level refresh, independent of transport state
const LEVEL_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

const EVENT_CHANNEL_CAPACITY: usize = 64;
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// User actions the shell can issue against a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleMute,
    /// Tear down and hand the transcript + duration back
    End,
    /// Tear down and discard the result
    Cancel,
}

/// Shell-side handle: issue commands, watch state.
#[derive(Debug, Clone)]
pub struct SessionControls {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<LiveSessionState>,
}

impl SessionControls {
    pub async fn toggle_mute(&self) {
        let _ = self.commands.send(SessionCommand::ToggleMute).await;
    }

    pub async fn end(&self) {
        let _ = self.commands.send(SessionCommand::End).await;
    }

    pub async fn cancel(&self) {
        let _ = self.commands.send(SessionCommand::Cancel).await;
    }

    pub fn state(&self) -> watch::Receiver<LiveSessionState> {
        self.state.clone()
    }
}

/// Orchestrates one live session attempt.
pub struct SessionController {
    config: SessionConfig,
    transport: Box<dyn VoiceTransport>,
    capture: Box<dyn AudioCapture>,
    voices: VoiceMap,
    session_id: Uuid,
    commands: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<LiveSessionState>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn VoiceTransport>,
        capture: Box<dyn AudioCapture>,
    ) -> (Self, SessionControls) {
        Self::with_voices(config, transport, capture, VoiceMap::default())
    }

    pub fn with_voices(
        config: SessionConfig,
        transport: Box<dyn VoiceTransport>,
        capture: Box<dyn AudioCapture>,
        voices: VoiceMap,
    ) -> (Self, SessionControls) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(LiveSessionState::new());

        let controller = Self {
            config,
            transport,
            capture,
            voices,
            session_id: Uuid::new_v4(),
            commands: command_rx,
            state_tx,
        };
        let controls = SessionControls {
            commands: command_tx,
            state: state_rx,
        };
        (controller, controls)
    }

    /// Run the session to completion. Returns the outcome on explicit end,
    /// `None` on cancel or when the shell drops its controls.
    pub async fn run(self) -> Option<SessionOutcome> {
        let Self {
            config,
            mut transport,
            mut capture,
            voices,
            session_id,
            mut commands,
            state_tx,
        } = self;

        log::info!("Session {}: starting", session_id);
        let mut state = LiveSessionState::new();
        let publish = |s: &LiveSessionState| {
            let _ = state_tx.send(s.clone());
        };
        publish(&state);

        let mut level_meter = LevelMeter::new();

        // Microphone first: capture (and the level meter) run as soon as the
        // device is acquired, before the remote connection completes.
        state.mark_checking(DiagnosticCategory::Microphone);
        publish(&state);
        let mut samples = match capture.start(&CaptureConstraints::default()) {
            Ok(rx) => {
                state.mark_ok(DiagnosticCategory::Microphone);
                publish(&state);
                Some(rx)
            }
            Err(e) => {
                state.record_failure(DiagnosticCategory::Microphone, &e.to_string());
                publish(&state);
                None
            }
        };

        let (event_tx, mut events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connect_deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        let mut handle: Option<Box<dyn TransportHandle>> = None;

        // The open is raced as a select! arm below rather than awaited here:
        // End and Cancel stay live for the whole connect window. Only started
        // if the microphone came up.
        let mut opening: Option<OpenFuture<'_>> = if samples.is_some() {
            state.mark_checking(DiagnosticCategory::Credential);
            state.mark_checking(DiagnosticCategory::Network);
            publish(&state);

            let request = OpenRequest {
                credential: config.credential.clone(),
                instructions: build_instructions(&config),
                voice: voices.voice_for(config.provider, config.accent).to_string(),
            };
            Some(transport.open(request, event_tx.clone()))
        } else {
            None
        };

        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + TICK_INTERVAL,
            TICK_INTERVAL,
        );
        let mut level_tick = tokio::time::interval(LEVEL_SAMPLE_INTERVAL);
        let connect_timeout = tokio::time::sleep_until(connect_deadline);
        tokio::pin!(connect_timeout);
        let mut opened = false;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::ToggleMute) => {
                            state.is_muted = !state.is_muted;
                            log::info!(
                                "Session {}: mute {}",
                                session_id,
                                if state.is_muted { "on" } else { "off" }
                            );
                            publish(&state);
                        }
                        Some(SessionCommand::End) => {
                            release(capture.as_mut(), &mut handle, &mut samples).await;
                            state.mark_closed();
                            publish(&state);
                            log::info!(
                                "Session {}: ended after {}s, {} transcript lines",
                                session_id,
                                state.elapsed_seconds,
                                state.transcript.len()
                            );
                            return Some(state.outcome());
                        }
                        Some(SessionCommand::Cancel) | None => {
                            // Cancel and shell teardown discard the result;
                            // dropping a pending open aborts the attempt
                            release(capture.as_mut(), &mut handle, &mut samples).await;
                            state.mark_closed();
                            publish(&state);
                            log::info!("Session {}: cancelled", session_id);
                            return None;
                        }
                    }
                }

                result = next_open(&mut opening), if opening.is_some() => {
                    opening = None;
                    match result {
                        Ok(h) => {
                            handle = Some(h);
                        }
                        Err(e) => {
                            log::warn!("Session {}: open failed: {}", session_id, e);
                            state.record_failure(e.category(), &e.to_string());
                            release(capture.as_mut(), &mut handle, &mut samples).await;
                            publish(&state);
                        }
                    }
                }

                event = next_event(&mut events), if handle.is_some() || !state.is_settled() => {
                    let Some(event) = event else { continue };
                    match event {
                        TransportEvent::Opened => {
                            opened = true;
                            state.mark_connected();
                            state.mark_ok(DiagnosticCategory::Credential);
                            state.mark_ok(DiagnosticCategory::Network);
                            publish(&state);
                            log::info!("Session {}: connected", session_id);
                        }
                        TransportEvent::TranscriptLine { speaker, text } => {
                            state.transcript.append(speaker, &text);
                            publish(&state);
                        }
                        TransportEvent::ParseFailure { message } => {
                            // A single bad message is never terminal
                            log::warn!("Session {}: {}", session_id, message);
                        }
                        TransportEvent::Error { message } => {
                            let (category, detail) = classify(&message);
                            state.record_failure(category, &detail);
                            release(capture.as_mut(), &mut handle, &mut samples).await;
                            publish(&state);
                        }
                        TransportEvent::Closed => {
                            // Transport-initiated closure gets the same
                            // teardown as an explicit end
                            release(capture.as_mut(), &mut handle, &mut samples).await;
                            state.mark_closed();
                            publish(&state);
                        }
                    }
                }

                batch = next_batch(&mut samples), if samples.is_some() => {
                    let Some(batch) = batch else {
                        samples = None;
                        continue;
                    };
                    level_meter.push_samples(&batch);
                    if !state.is_muted {
                        if let Some(h) = handle.as_mut() {
                            if let Err(e) = h.send_audio(&batch).await {
                                log::warn!(
                                    "Session {}: audio send failed: {}",
                                    session_id,
                                    e
                                );
                                state.record_failure(e.category(), &e.to_string());
                                release(capture.as_mut(), &mut handle, &mut samples).await;
                                publish(&state);
                            }
                        }
                    }
                }

                _ = &mut connect_timeout, if !opened && !state.is_settled() => {
                    log::warn!("Session {}: connection timed out", session_id);
                    opening = None;
                    state.record_failure(
                        DiagnosticCategory::Network,
                        "Connection timed out before the session opened",
                    );
                    release(capture.as_mut(), &mut handle, &mut samples).await;
                    publish(&state);
                }

                _ = tick.tick(), if !state.is_settled() => {
                    state.elapsed_seconds += 1;
                    publish(&state);
                }

                _ = level_tick.tick() => {
                    let level = level_meter.sample();
                    if (level - state.mic_level).abs() > f32::EPSILON {
                        state.mic_level = level;
                        publish(&state);
                    }
                }
            }
        }
    }
}

type OpenFuture<'a> = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Box<dyn TransportHandle>, TransportError>> + Send + 'a>,
>;

async fn next_open(
    opening: &mut Option<OpenFuture<'_>>,
) -> Result<Box<dyn TransportHandle>, TransportError> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
    events.recv().await
}

async fn next_batch(samples: &mut Option<mpsc::Receiver<Vec<f32>>>) -> Option<Vec<f32>> {
    match samples {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Release the transport and the microphone. Safe to call from any exit
/// path, any number of times.
async fn release(
    capture: &mut dyn AudioCapture,
    handle: &mut Option<Box<dyn TransportHandle>>,
    samples: &mut Option<mpsc::Receiver<Vec<f32>>>,
) {
    if let Some(mut h) = handle.take() {
        h.close().await;
    }
    capture.stop();
    *samples = None;
}
