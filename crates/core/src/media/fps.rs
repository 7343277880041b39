use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling frame-rate estimate over the last `window` inter-frame gaps.
#[derive(Debug, Clone)]
pub struct FpsCalculator {
    intervals: VecDeque<Duration>,
    window: usize,
    last_frame: Option<Instant>,
}

impl FpsCalculator {
    /// `window` is clamped to at least one interval.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            intervals: VecDeque::with_capacity(window),
            window,
            last_frame: None,
        }
    }

    /// Record a frame now. Returns the gap since the previous frame.
    pub fn on_frame(&mut self) -> Option<Duration> {
        self.on_frame_at(Instant::now())
    }

    pub fn on_frame_at(&mut self, now: Instant) -> Option<Duration> {
        let previous = self.last_frame.replace(now)?;
        let delta = now.checked_duration_since(previous)?;
        if self.intervals.len() == self.window {
            self.intervals.pop_front();
        }
        self.intervals.push_back(delta);
        Some(delta)
    }

    /// Mean frames per second over the window, `None` before two frames.
    pub fn average_fps(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        let total: Duration = self.intervals.iter().sum();
        let mean = total.as_secs_f64() / self.intervals.len() as f64;
        if mean <= 0.0 { None } else { Some(1.0 / mean) }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_frame = None;
    }
}

impl Default for FpsCalculator {
    fn default() -> Self {
        Self::new(30)
    }
}
