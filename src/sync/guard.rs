//! Protocol error burst detection.
//!
//! A single malformed frame is logged and dropped. A burst of them within a
//! short window means the stream is in a bad state and forces a reconnect.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct ProtocolErrorWindow {
    timestamps: VecDeque<Instant>,
    threshold: usize,
    window: Duration,
}

impl ProtocolErrorWindow {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(threshold),
            threshold: threshold.max(1),
            window,
        }
    }

    /// Record an error at `now`. Returns true once the threshold is reached within the window.
    pub fn record(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.push_back(now);
        self.timestamps.len() >= self.threshold
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
