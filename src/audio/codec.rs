//! PCM16 wire codec for the voice transports
//!
//! Both backends carry raw audio as base64-encoded little-endian 16-bit PCM.
//! Capture produces floating-point samples in [-1, 1]; these functions convert
//! between that and the wire format.
//!
//! # Sample Rates
//!
//! Input frames are tagged 16kHz (the capture rate); the remote voice arrives
//! at 24kHz mono. Input and output rates are never assumed equal - the decode
//! path takes the rate as a parameter.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Capture sample rate for outbound frames (Hz)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Native output rate of the remote voice (Hz)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Errors from the decode path
#[derive(Debug, Clone)]
pub enum DecodeError {
    /// Input was not valid base64
    InvalidBase64(String),
    /// Byte length is not divisible by channels * 2
    TruncatedFrame { len: usize, channels: u16 },
    /// Zero channels requested
    NoChannels,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidBase64(e) => write!(f, "Invalid base64 audio frame: {}", e),
            DecodeError::TruncatedFrame { len, channels } => write!(
                f,
                "PCM16 frame of {} bytes does not divide into {} channel(s)",
                len, channels
            ),
            DecodeError::NoChannels => write!(f, "Cannot decode audio with zero channels"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// One encoded outbound audio frame, tagged with its format
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Base64-encoded little-endian PCM16
    pub data: String,
    /// Sample rate the frame was captured at
    pub sample_rate: u32,
    /// MIME-style label for the wire format
    pub mime_type: &'static str,
}

/// Decoded playable audio, de-interleaved per channel
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// One sample vector per channel, values in [-1, 1]
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Duration of this buffer in seconds
    pub fn duration_secs(&self) -> f64 {
        let frames = self.channels.first().map(|c| c.len()).unwrap_or(0);
        frames as f64 / self.sample_rate as f64
    }
}

/// Encode floating-point samples into a base64 PCM16 frame.
///
/// Quantizes by multiplying by 32768 with no clamping; out-of-range input
/// wraps through the 16-bit cast, matching the behavior transcripts were
/// recorded against.
pub fn encode_frame(samples: &[f32]) -> AudioFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let quantized = (sample * 32768.0) as i32 as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }

    AudioFrame {
        data: STANDARD.encode(&bytes),
        sample_rate: INPUT_SAMPLE_RATE,
        mime_type: "audio/pcm;rate=16000",
    }
}

/// Decode the base64 layer of an inbound frame. No resampling, no
/// reinterpretation - just bytes.
pub fn decode_frame(data: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(data)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
}

/// Reinterpret interleaved PCM16 bytes as a playable buffer.
///
/// De-interleaves per channel and rescales each sample to floating point by
/// dividing by 32768. The byte length must divide exactly into
/// `channels * 2`-byte frames.
pub fn decode_to_audio_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }

    let frame_bytes = channels as usize * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::TruncatedFrame {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();

    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample_bytes) in frame.chunks_exact(2).enumerate() {
            let sample = i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]);
            out[ch].push(sample as f32 / 32768.0);
        }
    }

    Ok(AudioBuffer {
        channels: out,
        sample_rate,
    })
}
