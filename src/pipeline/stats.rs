//! Per-session stream counters

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Counters written by the acquisition loop, readable from anywhere
#[derive(Debug, Default)]
pub struct StreamStats {
    counters: CachePadded<Counters>,
    fps_bits: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    /// Grabs that saw no frame at all; included in `frames_dropped`
    pub timeouts: u64,
    pub fps: f64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, fps: f64) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        metrics::counter!("gigecast_frames_delivered_total").increment(1);
        metrics::gauge!("gigecast_fps").set(fps);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gigecast_frames_dropped_total").increment(1);
    }

    pub fn record_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gigecast_grab_timeouts_total").increment(1);
        self.record_dropped();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_delivered: self.counters.delivered.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }
}

/// Moving-window frame rate over the last `window` of deliveries
#[derive(Debug)]
pub struct FpsWindow {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl Default for FpsWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FpsWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: VecDeque::new(),
        }
    }

    /// Record a delivery at `now` and return the current rate
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.stamps.push_back(now);
        while let Some(&oldest) = self.stamps.front() {
            if now.duration_since(oldest) < self.window {
                break;
            }
            self.stamps.pop_front();
        }

        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() > 1 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.stamps.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_count_as_dropped() {
        let stats = StreamStats::new();
        stats.record_delivered(30.0);
        stats.record_timeout();
        stats.record_dropped();
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                frames_delivered: 1,
                frames_dropped: 2,
                timeouts: 1,
                fps: 30.0,
            }
        );
    }

    #[test]
    fn fps_window_tracks_recent_interval() {
        let mut window = FpsWindow::new(Duration::from_secs(1));
        let start = Instant::now();
        let mut fps = 0.0;
        for i in 0..20 {
            fps = window.tick(start + Duration::from_millis(100 * i));
        }
        assert!((fps - 10.0).abs() < 1e-6, "fps = {}", fps);
    }

    #[test]
    fn single_sample_has_no_rate() {
        let mut window = FpsWindow::default();
        assert_eq!(window.tick(Instant::now()), 0.0);
    }
}
