//! Mic-level metering for the session's input visualization
//!
//! Computes a single decaying scalar from recent input samples. The meter is
//! display-only: it keeps running while muted so the user can see the mic is
//! alive, and carries no correctness invariant.

use std::collections::VecDeque;

/// Samples retained for level computation (~100ms at 16kHz)
const WINDOW_CAPACITY: usize = 1600;

/// Smoothing factor on rising levels (fraction of the new value taken)
const ATTACK_ALPHA: f32 = 0.5;

/// Per-sample-call decay applied when the level falls
const DECAY: f32 = 0.85;

/// Rolling RMS meter with asymmetric smoothing: fast attack, slow decay, so
/// the meter jumps on speech and falls off smoothly.
#[derive(Debug)]
pub struct LevelMeter {
    window: VecDeque<f32>,
    level: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            level: 0.0,
        }
    }

    /// Feed captured samples (values in [-1, 1]) into the window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let len = samples.len();
        if len >= WINDOW_CAPACITY {
            self.window.clear();
            self.window.extend(&samples[len - WINDOW_CAPACITY..]);
            return;
        }

        let to_remove = (self.window.len() + len).saturating_sub(WINDOW_CAPACITY);
        if to_remove > 0 {
            self.window.drain(0..to_remove);
        }
        self.window.extend(samples);
    }

    /// Recompute and return the current level in [0, 1]. Called by the
    /// controller's sampler tick (~10x per second).
    pub fn sample(&mut self) -> f32 {
        let rms = if self.window.is_empty() {
            0.0
        } else {
            let sum_squares: f64 = self.window.iter().map(|&s| (s as f64) * (s as f64)).sum();
            (sum_squares / self.window.len() as f64).sqrt() as f32
        };

        self.level = if rms > self.level {
            ATTACK_ALPHA * rms + (1.0 - ATTACK_ALPHA) * self.level
        } else {
            self.level * DECAY
        };
        self.level = self.level.clamp(0.0, 1.0);
        self.level
    }

    /// Last computed level without recomputing.
    pub fn current(&self) -> f32 {
        self.level
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.level = 0.0;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}
