//! Audio pipeline for the live session
//!
//! Capture (microphone → mono f32 batches), the PCM16 wire codec both
//! transports share, the gap-free playback scheduler for synthesized speech,
//! and the display-only mic-level meter.

pub mod capture;
pub mod codec;
pub mod level;
pub mod playback;

pub use capture::{AudioCapture, CaptureConstraints, CaptureError, ChannelCapture, CpalCapture};
pub use codec::{
    decode_frame, decode_to_audio_buffer, encode_frame, AudioBuffer, AudioFrame, DecodeError,
};
pub use level::LevelMeter;
pub use playback::{PlaybackScheduler, PlaybackSink};
