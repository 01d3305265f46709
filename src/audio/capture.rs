//! Microphone capture behind a narrow capability interface
//!
//! The session controller owns capture exclusively for the session's
//! lifetime. `AudioCapture` is the seam: the cpal implementation drives a
//! real device, tests feed samples through `ChannelCapture`.
//!
//! cpal streams are not `Send` on every platform, so `CpalCapture` runs the
//! stream on a dedicated audio thread and hands samples across a channel,
//! the same bridging the recorder used before it.

use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::mpsc;

/// Capacity of the sample channel. The capture callback never blocks; if the
/// consumer stalls, frames are dropped with a log line.
const SAMPLE_CHANNEL_CAPACITY: usize = 100;

/// Errors from microphone acquisition
#[derive(Debug, Clone)]
pub enum CaptureError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    AlreadyStarted,
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NoInputDevice => write!(f, "No audio input device found"),
            CaptureError::NoSupportedConfig => write!(f, "No supported microphone configuration"),
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create microphone stream: {}", e)
            }
            CaptureError::AlreadyStarted => write!(f, "Microphone capture already started"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Acquisition constraints. Echo cancellation, noise suppression and auto
/// gain are requested off: the remote model does its own audio conditioning
/// and local processing degrades it. Backends that cannot express a
/// constraint up front apply what they can after acquisition.
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub channels: u16,
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: crate::audio::codec::INPUT_SAMPLE_RATE,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

/// Capability interface over the platform's microphone facility.
pub trait AudioCapture: Send {
    /// Acquire the microphone and start producing mono f32 sample batches at
    /// the constrained rate. Fails with a microphone-category error if the
    /// device is absent or refuses.
    fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError>;

    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Default-device capture via cpal.
pub struct CpalCapture {
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self { stop_tx: None }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCapture for CpalCapture {
    fn start(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError> {
        if self.stop_tx.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }

        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>(SAMPLE_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let target_rate = constraints.sample_rate;

        if constraints.echo_cancellation || constraints.noise_suppression {
            log::warn!("Capture: DSP conditioning requested but not available at this layer");
        }

        // Dedicated audio thread: the cpal Stream lives and dies here.
        std::thread::spawn(move || {
            let stream = match build_input_stream(sample_tx, target_rate) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::warn!("Capture: stream play failed: {}", e);
                return;
            }

            // Park until stop() drops or signals the sender
            let _ = stop_rx.recv();
            drop(stream);
            log::debug!("Capture: audio thread exiting");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                Ok(sample_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::StreamCreationFailed(
                "audio thread exited during setup".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            log::info!("Capture: microphone released");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    sample_tx: mpsc::Sender<Vec<f32>>,
    target_rate: u32,
) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    log::info!("Capture: using input device: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|_| CaptureError::NoSupportedConfig)?;

    let source_rate = supported.sample_rate().0;
    let source_channels = supported.channels();
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    log::info!(
        "Capture: device config {} Hz, {} ch, {:?}; delivering mono {} Hz",
        source_rate,
        source_channels,
        sample_format,
        target_rate
    );

    let err_fn = |e| log::warn!("Capture: stream error: {}", e);

    let mut resampler = Resampler::new(source_rate, target_rate);
    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &config,
                move |data: &[f32], _| {
                    forward_samples(data, source_channels, &mut resampler, &sample_tx);
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let floats: Vec<f32> =
                        data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                    forward_samples(&floats, source_channels, &mut resampler, &sample_tx);
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?,
        other => {
            log::warn!("Capture: unsupported sample format {:?}", other);
            return Err(CaptureError::NoSupportedConfig);
        }
    };

    Ok(stream)
}

/// Mix to mono, resample to the target rate, forward without blocking.
fn forward_samples(
    data: &[f32],
    channels: u16,
    resampler: &mut Resampler,
    tx: &mpsc::Sender<Vec<f32>>,
) {
    let mono: Vec<f32> = if channels <= 1 {
        data.to_vec()
    } else {
        data.chunks(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    let resampled = resampler.process(&mono);

    if tx.try_send(resampled).is_err() {
        log::debug!("Capture: sample channel full, dropping batch");
    }
}

/// Streaming device-rate → target-rate conversion.
///
/// Integer ratios (48k → 16k) decimate by block averaging, the way the
/// recorder always has. Non-integer ratios (44.1k → 16k, the usual consumer
/// default) linearly interpolate. Both modes carry their remainder state
/// across batches, so callback boundaries stay phase-aligned.
enum Resampler {
    Passthrough,
    Average {
        ratio: usize,
        carry: Vec<f32>,
    },
    Interpolate {
        step: f64,
        /// Read position relative to the current batch; -1.0 addresses the
        /// carried last sample of the previous batch
        pos: f64,
        prev: f32,
    },
}

impl Resampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        if source_rate == 0 || target_rate == 0 || source_rate == target_rate {
            Resampler::Passthrough
        } else if source_rate % target_rate == 0 {
            Resampler::Average {
                ratio: (source_rate / target_rate) as usize,
                carry: Vec::new(),
            }
        } else {
            Resampler::Interpolate {
                step: source_rate as f64 / target_rate as f64,
                pos: 0.0,
                prev: 0.0,
            }
        }
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        match self {
            Resampler::Passthrough => samples.to_vec(),
            Resampler::Average { ratio, carry } => {
                carry.extend_from_slice(samples);
                let full = carry.len() / *ratio * *ratio;
                let out = carry[..full]
                    .chunks_exact(*ratio)
                    .map(|chunk| chunk.iter().sum::<f32>() / *ratio as f32)
                    .collect();
                carry.drain(..full);
                out
            }
            Resampler::Interpolate { step, pos, prev } => {
                let len = samples.len() as f64;
                let mut out = Vec::with_capacity((len / *step).ceil() as usize + 1);
                while *pos < len - 1.0 {
                    let idx = pos.floor();
                    let frac = (*pos - idx) as f32;
                    let i = idx as isize;
                    let a = if i < 0 { *prev } else { samples[i as usize] };
                    let b = samples[(i + 1) as usize];
                    out.push(a + (b - a) * frac);
                    *pos += *step;
                }
                if let Some(&last) = samples.last() {
                    *prev = last;
                }
                *pos -= len;
                out
            }
        }
    }
}

/// Test capture fed from a channel the test holds the sender for.
pub struct ChannelCapture {
    rx: Option<mpsc::Receiver<Vec<f32>>>,
    stopped: bool,
}

impl ChannelCapture {
    pub fn new(rx: mpsc::Receiver<Vec<f32>>) -> Self {
        Self {
            rx: Some(rx),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl AudioCapture for ChannelCapture {
    fn start(
        &mut self,
        _constraints: &CaptureConstraints,
    ) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError> {
        self.rx.take().ok_or(CaptureError::AlreadyStarted)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_3x_averages() {
        let mut r = Resampler::new(48_000, 16_000);
        let output = r.process(&[0.0f32, 0.3, 0.6, 0.9, 0.9, 0.9]);
        assert_eq!(output.len(), 2);
        assert!((output[0] - 0.3).abs() < 1e-6);
        assert!((output[1] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_resample_3x_carries_remainder_across_batches() {
        let mut r = Resampler::new(48_000, 16_000);
        // 5 samples: one full block of 3, two carried
        assert_eq!(r.process(&[0.3f32, 0.3, 0.3, 0.6, 0.6]).len(), 1);
        // One more completes the carried block
        let output = r.process(&[0.6f32]);
        assert_eq!(output.len(), 1);
        assert!((output[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![0.1f32, 0.2];
        assert_eq!(Resampler::new(16_000, 16_000).process(&input), input);
    }

    #[test]
    fn test_resample_44100_to_16000() {
        let mut r = Resampler::new(44_100, 16_000);
        // 100 ms of DC at 44.1 kHz must come out as 100 ms at 16 kHz
        let output = r.process(&vec![0.5f32; 4410]);
        assert_eq!(output.len(), 1600);
        for &s in &output {
            assert!((s - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_resample_interpolation_phase_survives_batch_split() {
        // A linear ramp resampled at a non-integer ratio stays strictly
        // increasing even when fed in two uneven batches
        let ramp: Vec<f32> = (0..200).map(|i| i as f32 / 200.0).collect();

        let mut r = Resampler::new(44_100, 16_000);
        let mut out = r.process(&ramp[..101]);
        out.extend(r.process(&ramp[101..]));

        assert!(!out.is_empty());
        for pair in out.windows(2) {
            assert!(pair[1] > pair[0], "{} !> {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_resample_zero_rate_passes_through() {
        let input = vec![0.1f32];
        assert_eq!(Resampler::new(0, 16_000).process(&input), input);
        assert_eq!(Resampler::new(48_000, 0).process(&input), input);
    }

    #[test]
    fn test_default_constraints_disable_conditioning() {
        let c = CaptureConstraints::default();
        assert_eq!(c.channels, 1);
        assert_eq!(c.sample_rate, 16_000);
        assert!(!c.echo_cancellation);
        assert!(!c.noise_suppression);
        assert!(!c.auto_gain_control);
    }

    #[tokio::test]
    async fn test_channel_capture_start_once() {
        let (tx, rx) = mpsc::channel(4);
        let mut capture = ChannelCapture::new(rx);

        let mut got = capture.start(&CaptureConstraints::default()).unwrap();
        tx.send(vec![0.5f32; 10]).await.unwrap();
        assert_eq!(got.recv().await.unwrap().len(), 10);

        // Second start fails rather than handing out a second stream
        assert!(matches!(
            capture.start(&CaptureConstraints::default()),
            Err(CaptureError::AlreadyStarted)
        ));

        capture.stop();
        assert!(capture.is_stopped());
    }
}
