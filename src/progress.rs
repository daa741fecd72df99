// Progress logging for multi-step runs (batch export, map generation).
use log::{debug, info};
use std::time::{Duration, Instant};

use crate::util::format_elapsed;

/// Minimum gap between two progress lines at info level.
const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

pub struct ProgressTracker {
    operation: String,
    total: usize,
    current: usize,
    start: Instant,
    last_update: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, operation: impl Into<String>) -> Self {
        let now = Instant::now();
        ProgressTracker {
            operation: operation.into(),
            total: total.max(1),
            current: 0,
            start: now,
            last_update: now,
        }
    }

    pub fn percent(&self) -> f64 {
        (self.current as f64 / self.total as f64) * 100.0
    }

    /// Advance one step.
    pub fn update(&mut self, message: &str) {
        self.current = (self.current + 1).min(self.total);
        self.report(message, Instant::now());
    }

    fn report(&mut self, message: &str, now: Instant) {
        let elapsed = now.duration_since(self.start);
        debug!(
            "{}: step {}/{} {}",
            self.operation, self.current, self.total, message
        );
        if now.duration_since(self.last_update) < UPDATE_INTERVAL {
            return;
        }
        let remaining = self
            .estimate_remaining(elapsed)
            .map(format_elapsed)
            .unwrap_or_else(|| "Unknown".to_string());
        info!(
            "{}: {:.1}% complete ({}/{}), elapsed {}, estimated remaining {}{}",
            self.operation,
            self.percent(),
            self.current,
            self.total,
            format_elapsed(elapsed),
            remaining,
            if message.is_empty() {
                String::new()
            } else {
                format!(", current: {}", message)
            }
        );
        self.last_update = now;
    }

    fn estimate_remaining(&self, elapsed: Duration) -> Option<Duration> {
        if self.current == 0 {
            return None;
        }
        let per_step = elapsed / self.current as u32;
        Some(per_step * (self.total - self.current) as u32)
    }

    pub fn complete(&self, message: &str) {
        info!(
            "{} completed in {} ({})",
            self.operation,
            format_elapsed(self.start.elapsed()),
            message
        );
    }
}
