//! Frame and inference timing
//!
//! Rolling-window statistics for render frame times and detector latency.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Samples kept per window (5 seconds at 60fps)
const MAX_SAMPLES: usize = 300;

/// Timing statistics over a window of samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingStats {
    /// Average time in milliseconds
    pub avg_ms: f64,
    /// Minimum time in milliseconds
    pub min_ms: f64,
    /// Maximum time in milliseconds
    pub max_ms: f64,
    /// 50th percentile (median)
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Number of samples in the statistics
    pub sample_count: usize,
}

impl TimingStats {
    fn from_samples<'a>(samples: impl Iterator<Item = &'a Duration>) -> Self {
        let mut times: Vec<f64> = samples.map(|d| d.as_secs_f64() * 1000.0).collect();
        if times.is_empty() {
            return Self::default();
        }
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();
        let count = times.len() as f64;

        Self {
            avg_ms: sum / count,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }
}

/// Frame profiler for render loop timing
///
/// Collects frame intervals and computes statistics and FPS.
pub struct FrameProfiler {
    /// Frame durations
    frame_times: VecDeque<Duration>,
    /// Last frame start time
    last_frame_start: Option<Instant>,
    /// Frame start times for FPS calculation
    frame_starts: VecDeque<Instant>,
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfiler {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(MAX_SAMPLES),
            last_frame_start: None,
            frame_starts: VecDeque::with_capacity(MAX_SAMPLES),
        }
    }

    /// Mark the beginning of a frame
    pub fn begin_frame(&mut self) {
        self.begin_frame_at(Instant::now());
    }

    fn begin_frame_at(&mut self, now: Instant) {
        if let Some(start) = self.last_frame_start {
            push_bounded(&mut self.frame_times, now.saturating_duration_since(start));
        }
        self.last_frame_start = Some(now);
        push_bounded(&mut self.frame_starts, now);
    }

    /// Get frame timing statistics
    pub fn stats(&self) -> TimingStats {
        TimingStats::from_samples(self.frame_times.iter())
    }

    /// Current FPS from frame start times
    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frame_starts.front(), self.frame_starts.back()) else {
            return 0.0;
        };
        if self.frame_starts.len() < 2 {
            return 0.0;
        }

        let duration = last.saturating_duration_since(*first).as_secs_f64();
        if duration > 0.0 {
            (self.frame_starts.len() - 1) as f64 / duration
        } else {
            0.0
        }
    }

    /// Get the last frame time in milliseconds
    pub fn last_frame_time_ms(&self) -> f64 {
        self.frame_times
            .back()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Rolling window of detector latencies
#[derive(Default)]
pub struct LatencyTracker {
    samples: VecDeque<Duration>,
    /// Frame number of the last recorded result
    last_frame: Option<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency of the result for `frame_number`, once per frame
    pub fn record(&mut self, frame_number: u64, latency: Duration) {
        if self.last_frame == Some(frame_number) {
            return;
        }
        self.last_frame = Some(frame_number);
        push_bounded(&mut self.samples, latency);
    }

    pub fn stats(&self) -> TimingStats {
        TimingStats::from_samples(self.samples.iter())
    }

    /// Most recent latency in milliseconds
    pub fn last_ms(&self) -> Option<f64> {
        self.samples.back().map(|d| d.as_secs_f64() * 1000.0)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.last_frame = None;
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
    queue.push_back(value);
    if queue.len() > MAX_SAMPLES {
        queue.pop_front();
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_profiler() {
        let mut profiler = FrameProfiler::new();
        let start = Instant::now();

        for i in 0..11 {
            profiler.begin_frame_at(start + Duration::from_millis(20 * i));
        }

        let stats = profiler.stats();
        assert_eq!(stats.sample_count, 10);
        assert!((stats.avg_ms - 20.0).abs() < 1e-6);
        assert!((profiler.fps() - 50.0).abs() < 1e-6);
        assert!((profiler.last_frame_time_ms() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_profiler() {
        let mut profiler = FrameProfiler::new();
        assert_eq!(profiler.fps(), 0.0);
        profiler.begin_frame();
        assert_eq!(profiler.fps(), 0.0);
        assert_eq!(profiler.stats().sample_count, 0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut profiler = FrameProfiler::new();
        let start = Instant::now();
        for i in 0..(MAX_SAMPLES as u64 + 50) {
            profiler.begin_frame_at(start + Duration::from_millis(i));
        }
        assert_eq!(profiler.stats().sample_count, MAX_SAMPLES);
    }

    #[test]
    fn test_latency_tracker_records_once_per_frame() {
        let mut tracker = LatencyTracker::new();
        assert_eq!(tracker.last_ms(), None);

        tracker.record(1, Duration::from_millis(10));
        tracker.record(1, Duration::from_millis(10));
        tracker.record(2, Duration::from_millis(30));

        let stats = tracker.stats();
        assert_eq!(stats.sample_count, 2);
        assert!((stats.avg_ms - 20.0).abs() < 1e-6);
        assert!((stats.max_ms - 30.0).abs() < 1e-6);
        assert!((tracker.last_ms().unwrap() - 30.0).abs() < 1e-6);

        tracker.clear();
        assert_eq!(tracker.stats().sample_count, 0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&values, 0.5), 5.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 10.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }
}
