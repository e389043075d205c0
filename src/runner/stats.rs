use std::collections::BTreeMap;

use serde::Serialize;

use crate::executor::ResponseOutcome;

/// Latencies and status histogram for one environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerEnvStats {
    pub response_times_ms: Vec<f64>,
    pub status_code_counts: BTreeMap<u16, u64>,
}

impl PerEnvStats {
    /// Unmeasured (baseline) outcomes count toward the status histogram only.
    pub fn record(&mut self, outcome: &ResponseOutcome) {
        if let Some(duration) = outcome.duration_ms {
            self.response_times_ms.push(duration);
        }
        *self.status_code_counts.entry(outcome.status).or_default() += 1;
    }

    pub fn latency(&self) -> LatencySummary {
        LatencySummary::from_samples(&self.response_times_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatistics {
    pub old: PerEnvStats,
    pub new: Option<PerEnvStats>,
}

impl RunStatistics {
    pub fn new(compare_new: bool) -> Self {
        Self {
            old: PerEnvStats::default(),
            new: compare_new.then(PerEnvStats::default),
        }
    }
}

/// Latency percentiles in milliseconds; all `None` without samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub p99: Option<f64>,
    pub p95: Option<f64>,
    pub p90: Option<f64>,
    pub p50: Option<f64>,
    pub median: Option<f64>,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        Self {
            p99: percentile(&sorted, 0.99),
            p95: percentile(&sorted, 0.95),
            p90: percentile(&sorted, 0.9),
            p50: percentile(&sorted, 0.5),
            median: median(&sorted),
        }
    }

    pub fn rows(&self) -> [(&'static str, Option<f64>); 5] {
        [
            ("p99", self.p99),
            ("p95", self.p95),
            ("p90", self.p90),
            ("p50", self.p50),
            ("median", self.median),
        ]
    }
}

/// Linear interpolation at rank `n * p - 0.5` over sorted samples.
fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || p < 0.0 {
        return None;
    }
    let p = p.min(1.0);
    let last = sorted.len() - 1;
    let rank = sorted.len() as f64 * p - 0.5;
    let lower = (rank.trunc().max(0.0) as usize).min(last);
    let upper = (lower + 1).min(last);
    let fract = rank - rank.trunc();
    if fract <= 0.0 || upper == lower {
        return Some(sorted[lower]);
    }
    Some((1.0 - fract) * sorted[lower] + fract * sorted[upper])
}

fn median(sorted: &[f64]) -> Option<f64> {
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        len if len % 2 == 1 => Some(sorted[mid]),
        _ => Some((sorted[mid - 1] + sorted[mid]) / 2.0),
    }
}
