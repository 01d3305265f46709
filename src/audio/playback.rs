//! Gap-free playback scheduling for synthesized speech
//!
//! Synthesized audio arrives as discrete network messages at irregular
//! intervals, but must play back as one continuous stream. The scheduler
//! tracks a monotonic "next start time" watermark: each chunk starts at the
//! later of the current playback clock and the previous chunk's end time, so
//! chunks never overlap and no silence is inserted while data is available.

use crate::audio::codec::AudioBuffer;

/// Where scheduled audio actually goes. The platform's output facility
/// (an audio graph, an element, a device stream) implements this; tests use
/// a collecting sink.
pub trait PlaybackSink: Send {
    /// Play `buffer` starting at `start_time` seconds on the sink's clock.
    fn play_at(&mut self, start_time: f64, buffer: AudioBuffer);

    /// Current position of the sink's playback clock, in seconds.
    fn now(&self) -> f64;

    /// Stop everything queued and release the output resource.
    fn stop(&mut self);
}

/// Schedules decoded chunks back-to-back on a [`PlaybackSink`].
pub struct PlaybackScheduler<S: PlaybackSink> {
    sink: S,
    next_start: f64,
}

impl<S: PlaybackSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start: 0.0,
        }
    }

    /// Schedule one chunk. Returns the start time it was scheduled at.
    ///
    /// Invariant: start(n) >= end(n-1), and start(n) == end(n-1) whenever the
    /// clock has not overtaken the watermark (no gaps when data is available).
    pub fn schedule(&mut self, buffer: AudioBuffer) -> f64 {
        let now = self.sink.now();
        let start = if now > self.next_start {
            now
        } else {
            self.next_start
        };
        let duration = buffer.duration_secs();

        self.sink.play_at(start, buffer);
        self.next_start = start + duration;
        start
    }

    /// Seconds of audio scheduled beyond the current clock position.
    pub fn buffered_secs(&self) -> f64 {
        (self.next_start - self.sink.now()).max(0.0)
    }

    /// Stop the sink and reset the watermark.
    pub fn stop(&mut self) {
        self.sink.stop();
        self.next_start = 0.0;
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test sink with a manually advanced clock, recording every scheduled chunk
    struct FakeSink {
        clock: f64,
        scheduled: Vec<(f64, f64)>, // (start, duration)
        stopped: bool,
    }

    impl FakeSink {
        fn new() -> Self {
            Self {
                clock: 0.0,
                scheduled: Vec::new(),
                stopped: false,
            }
        }
    }

    impl PlaybackSink for FakeSink {
        fn play_at(&mut self, start_time: f64, buffer: AudioBuffer) {
            self.scheduled.push((start_time, buffer.duration_secs()));
        }

        fn now(&self) -> f64 {
            self.clock
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn chunk_of(duration_secs: f64) -> AudioBuffer {
        let samples = (duration_secs * 24_000.0).round() as usize;
        AudioBuffer {
            channels: vec![vec![0.0; samples]],
            sample_rate: 24_000,
        }
    }

    #[test]
    fn test_back_to_back_chunks_no_gap() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());

        scheduler.schedule(chunk_of(0.1));
        scheduler.schedule(chunk_of(0.1));
        scheduler.schedule(chunk_of(0.05));

        let s = &scheduler.sink.scheduled;
        // Each chunk starts exactly where the previous ended
        assert_eq!(s[0].0, 0.0);
        assert!((s[1].0 - 0.1).abs() < 1e-9);
        assert!((s[2].0 - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_no_overlap_under_arbitrary_arrival() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());
        let durations = [0.1, 0.03, 0.2, 0.05, 0.12];

        for (i, &d) in durations.iter().enumerate() {
            // Chunks arrive at irregular times, some late
            scheduler.sink.clock = i as f64 * 0.04;
            scheduler.schedule(chunk_of(d));
        }

        let s = &scheduler.sink.scheduled;
        for pair in s.windows(2) {
            let end_prev = pair[0].0 + pair[0].1;
            let start_next = pair[1].0;
            assert!(
                start_next >= end_prev - 1e-9,
                "chunk overlaps previous: start {} < end {}",
                start_next,
                end_prev
            );
        }
    }

    #[test]
    fn test_late_chunk_starts_at_clock() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());

        scheduler.schedule(chunk_of(0.1));
        // Previous chunk finished at 0.1; next arrives well after
        scheduler.sink.clock = 0.5;
        let start = scheduler.schedule(chunk_of(0.1));

        assert!((start - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_burst_after_stall_stays_contiguous() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());

        scheduler.sink.clock = 1.0;
        // A burst of chunks arriving "late" after their nominal start
        let a = scheduler.schedule(chunk_of(0.1));
        let b = scheduler.schedule(chunk_of(0.1));
        let c = scheduler.schedule(chunk_of(0.1));

        assert!((a - 1.0).abs() < 1e-9);
        assert!((b - 1.1).abs() < 1e-9);
        assert!((c - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_buffered_secs() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());
        assert_eq!(scheduler.buffered_secs(), 0.0);

        scheduler.schedule(chunk_of(0.3));
        assert!((scheduler.buffered_secs() - 0.3).abs() < 1e-9);

        scheduler.sink.clock = 0.2;
        assert!((scheduler.buffered_secs() - 0.1).abs() < 1e-9);

        // Clock past the watermark never reports negative
        scheduler.sink.clock = 1.0;
        assert_eq!(scheduler.buffered_secs(), 0.0);
    }

    #[test]
    fn test_stop_resets_watermark() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::new());
        scheduler.schedule(chunk_of(0.5));
        scheduler.stop();

        assert!(scheduler.sink.stopped);
        assert_eq!(scheduler.next_start, 0.0);
    }
}
