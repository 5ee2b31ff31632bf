use serde::Serialize;

use crate::config::{ConcurrencyMode, RateConfig};

pub const MAX_CYCLE_SECONDS: u64 = 3600;

pub fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

pub fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    (a / gcd(a, b)).saturating_mul(b)
}

pub fn lcm_all(values: &[u64]) -> u64 {
    values.iter().copied().fold(1, lcm)
}

pub fn effective_rate_limit(upstream_limit: u32, safety_buffer: f64) -> u32 {
    (upstream_limit as f64 * safety_buffer).floor() as u32
}

pub fn max_simultaneous_intervals(intervals: &[u64]) -> u32 {
    let intervals: Vec<u64> = intervals.iter().copied().filter(|i| *i > 0).collect();
    if intervals.is_empty() {
        return 1;
    }
    let cycle = lcm_all(&intervals).min(MAX_CYCLE_SECONDS);
    let mut max = 0;
    for second in 1..=cycle {
        let coinciding = intervals.iter().filter(|i| second % **i == 0).count() as u32;
        max = max.max(coinciding);
    }
    max.max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateModel {
    pub upstream_limit: u32,
    pub effective_rate_limit: u32,
    pub max_simultaneous_intervals: u32,
    pub effective_concurrent_limit: u32,
    pub concurrency_mode: ConcurrencyMode,
}

impl RateModel {
    pub fn new(config: &RateConfig, intervals: &[u64]) -> Self {
        let effective = effective_rate_limit(config.upstream_limit, config.safety_buffer);
        let simultaneous = max_simultaneous_intervals(intervals);
        let concurrent = match config.concurrency_mode {
            ConcurrencyMode::Manual => config.manual_concurrent_limit,
            ConcurrencyMode::Auto if intervals.is_empty() => 1,
            ConcurrencyMode::Auto => (effective / simultaneous).max(1),
        };
        Self {
            upstream_limit: config.upstream_limit,
            effective_rate_limit: effective,
            max_simultaneous_intervals: simultaneous,
            effective_concurrent_limit: concurrent,
            concurrency_mode: config.concurrency_mode,
        }
    }

    pub fn max_cameras_per_slot(&self) -> u32 {
        (self.effective_rate_limit / self.max_simultaneous_intervals).max(1)
    }

    pub fn naive_peak_load(&self, camera_count: usize) -> u64 {
        camera_count as u64 * self.max_simultaneous_intervals as u64
    }
}
