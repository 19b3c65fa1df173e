//! Throttled progress reporting.

use std::time::{Duration, Instant};

/// Minimum interval between two reports.
const REPORT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Public,
    Dictionary,
    BruteForce,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Public => write!(f, "public"),
            Phase::Dictionary => write!(f, "dictionary"),
            Phase::BruteForce => write!(f, "bruteforce"),
        }
    }
}

/// One progress snapshot. `checked` is cumulative over the whole crack and
/// never decreases.
#[derive(Clone, Debug)]
pub struct ProgressReport {
    pub phase: Phase,
    pub checked: u64,
    pub total: u64,
    /// Candidates per second since the crack started.
    pub rate: f64,
    pub eta_secs: f64,
    pub elapsed_secs: f64,
    /// Current brute-force name length; 0 outside Phase C.
    pub length: u32,
    /// Position inside the current phase (list index or enumeration offset).
    pub position: u64,
}

pub struct ProgressTracker {
    started: Instant,
    last_report: Option<Instant>,
    checked: u64,
    total: u64,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            started: Instant::now(),
            last_report: None,
            checked: 0,
            total,
        }
    }

    pub fn bump(&mut self, n: u64) {
        self.checked += n;
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Emit a report if the throttle interval has elapsed.
    pub fn maybe_report(
        &mut self,
        phase: Phase,
        length: u32,
        position: u64,
        sink: &mut Option<&mut dyn FnMut(&ProgressReport)>,
    ) {
        let Some(callback) = sink.as_mut() else { return };
        let now = Instant::now();
        if let Some(last) = self.last_report {
            if now - last < REPORT_INTERVAL {
                return;
            }
        }
        self.last_report = Some(now);
        let report = self.snapshot(phase, length, position);
        callback(&report);
    }

    fn snapshot(&self, phase: Phase, length: u32, position: u64) -> ProgressReport {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.checked as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(self.checked);
        let eta_secs = if rate > 0.0 {
            remaining as f64 / rate
        } else {
            f64::INFINITY
        };
        ProgressReport {
            phase,
            checked: self.checked,
            total: self.total,
            rate,
            eta_secs,
            elapsed_secs: elapsed,
            length,
            position,
        }
    }
}
