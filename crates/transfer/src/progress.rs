use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

/// Progress notification produced while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Cumulative bytes processed for one file.
    Bytes {
        file: String,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// Free-form status line.
    Status { text: String },
}

/// Sends progress events over a channel.
///
/// The per-file byte count never goes backwards: a report lower than the last
/// one sent for that file is dropped. Reports are clamped to the file total.
///
/// The channel is unbounded so blocking codec work never stalls on a slow
/// consumer. The event type is generic so callers can fold progress into
/// their own event enum via `From<ProgressEvent>`.
pub struct ProgressReporter<E = ProgressEvent> {
    tx: mpsc::UnboundedSender<E>,
    sent: HashMap<String, u64>,
}

impl<E: From<ProgressEvent>> ProgressReporter<E> {
    pub fn new(tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            tx,
            sent: HashMap::new(),
        }
    }

    /// Last byte count sent for `file`.
    pub fn last_reported(&self, file: &str) -> u64 {
        self.sent.get(file).copied().unwrap_or(0)
    }

    /// Reports cumulative progress for `file`. Returns `true` if an event was
    /// emitted.
    pub fn report(&mut self, file: &str, bytes_done: u64, bytes_total: u64) -> bool {
        let bytes_done = bytes_done.min(bytes_total);
        if let Some(&last) = self.sent.get(file)
            && bytes_done <= last
        {
            return false;
        }
        self.sent.insert(file.to_string(), bytes_done);
        // A closed receiver only means nobody is listening.
        let _ = self.tx.send(E::from(ProgressEvent::Bytes {
            file: file.to_string(),
            bytes_done,
            bytes_total,
        }));
        true
    }

    pub fn status(&self, text: impl Into<String>) {
        let _ = self
            .tx
            .send(E::from(ProgressEvent::Status { text: text.into() }));
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100).max(2),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&mut self, bytes: u64, timestamp: Instant) {
        self.samples.push_back(SpeedSample { bytes, timestamp });

        if let Some(cutoff) = timestamp.checked_sub(self.window_size) {
            while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
                self.samples.pop_front();
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window; 0.0 with fewer than
    /// two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample only marks the start of the window.
        let bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed).ok()
    }

    /// Clears all recorded samples.
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
