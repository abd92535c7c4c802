//! Run statistics over per-cycle samples.

use std::time::Duration;

/// Outcome of one fetch round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSample {
    /// 1-based cycle index
    pub index: u32,
    pub elapsed: Duration,
    pub bytes_received: u64,
    pub succeeded: bool,
    /// Why the cycle failed, for display
    pub error: Option<String>,
}

impl CycleSample {
    pub fn success(index: u32, elapsed: Duration, bytes_received: u64) -> Self {
        Self {
            index,
            elapsed,
            bytes_received,
            succeeded: true,
            error: None,
        }
    }

    /// Failed cycle: zero bytes, zero rate.
    pub fn failure(index: u32, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            index,
            elapsed,
            bytes_received: 0,
            succeeded: false,
            error: Some(error.into()),
        }
    }

    /// Throughput in bytes per second; 0 for failed cycles.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if !self.succeeded || secs <= 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / secs
    }
}

/// How failed cycles enter min/max/average rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedCyclePolicy {
    /// A failed cycle delivered zero throughput
    #[default]
    CountAsZero,
    /// Failed cycles are left out of the rate figures
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Host accepted the run and all cycles were attempted
    Completed,
    /// Host failed its memory self-test; no cycle ran
    Rejected,
}

/// Aggregate figures for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub status: RunStatus,
    pub cycles: u32,
    pub completed: u32,
    pub failed: u32,
    pub total_bytes: u64,
    /// `None` for a rejected run
    pub loss_percent: Option<f64>,
    pub min_rate: f64,
    pub max_rate: f64,
    pub avg_rate: f64,
}

impl RunStatistics {
    /// Statistics for a run the host declined.
    pub fn rejected(cycles: u32) -> Self {
        Self {
            status: RunStatus::Rejected,
            cycles,
            completed: 0,
            failed: 0,
            total_bytes: 0,
            loss_percent: None,
            min_rate: 0.0,
            max_rate: 0.0,
            avg_rate: 0.0,
        }
    }

    /// Reduce `samples` from a run of `cycles` payloads of `expected_payload` bytes.
    pub fn aggregate(
        samples: &[CycleSample],
        expected_payload: u64,
        cycles: u32,
        policy: FailedCyclePolicy,
    ) -> Self {
        let completed = samples.iter().filter(|s| s.succeeded).count() as u32;
        let total_bytes: u64 = samples.iter().map(|s| s.bytes_received).sum();

        let expected_total = expected_payload as f64 * cycles as f64;
        let loss_percent = if expected_total > 0.0 {
            (1.0 - total_bytes as f64 / expected_total) * 100.0
        } else {
            0.0
        };

        let rates: Vec<f64> = samples
            .iter()
            .filter(|s| s.succeeded || policy == FailedCyclePolicy::CountAsZero)
            .map(CycleSample::rate)
            .collect();

        let (min_rate, max_rate, avg_rate) = if rates.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = rates.iter().copied().fold(f64::INFINITY, f64::min);
            let max = rates.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = rates.iter().sum::<f64>() / rates.len() as f64;
            (min, max, avg)
        };

        Self {
            status: RunStatus::Completed,
            cycles,
            completed,
            failed: cycles.saturating_sub(completed),
            total_bytes,
            loss_percent: Some(loss_percent),
            min_rate,
            max_rate,
            avg_rate,
        }
    }
}
