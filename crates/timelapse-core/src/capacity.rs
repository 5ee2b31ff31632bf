use serde::Serialize;

use crate::config::ConcurrencyMode;
use crate::distribution::DistributionPlanner;

#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    pub camera_count: usize,
    pub intervals: Vec<u64>,
    pub upstream_rate_limit: u32,
    pub effective_rate_limit: u32,
    pub max_simultaneous_intervals: u32,
    pub effective_concurrent_limit: u32,
    pub concurrency_mode: ConcurrencyMode,
    pub naive_peak_load: u64,
    pub distribution_active: bool,
    pub offset_seconds: u64,
    pub slot_count: u64,
    pub max_cameras_per_slot: u32,
    pub projected_peak_per_slot: u64,
    pub passed: bool,
    pub warnings: Vec<String>,
}

pub fn validate_capacity(planner: &DistributionPlanner, intervals: &[u64], camera_count: usize) -> CapacityReport {
    let rate = *planner.rate();
    let active = planner.should_distribute(camera_count);
    let (offset, slots) = if active {
        let offset = planner.optimal_offset(camera_count);
        (offset, planner.slot_count(offset))
    } else {
        (0, 1)
    };

    let per_slot = rate.max_cameras_per_slot();
    let cameras_per_slot = (camera_count as u64).div_ceil(slots.max(1));
    let peak = cameras_per_slot * rate.max_simultaneous_intervals as u64;
    let effective = rate.effective_rate_limit as u64;

    let mut warnings = Vec::new();
    if peak > effective {
        if active {
            let needed = (camera_count as u64).div_ceil(per_slot as u64);
            warnings.push(format!(
                "widen the distribution window: {camera_count} cameras need {needed} slots of at most {per_slot}, the window fits {slots}"
            ));
        } else {
            warnings.push(format!(
                "enable distribution (TIMELAPSE_DISTRIBUTION_ENABLED=true): {peak} simultaneous requests exceed the effective limit of {effective}"
            ));
        }
    }
    if rate.concurrency_mode == ConcurrencyMode::Manual
        && rate.effective_concurrent_limit as u64 * rate.max_simultaneous_intervals as u64 > effective
    {
        warnings.push(format!(
            "lower TIMELAPSE_CONCURRENT_LIMIT to at most {}",
            (rate.effective_rate_limit / rate.max_simultaneous_intervals).max(1)
        ));
    }

    CapacityReport {
        camera_count,
        intervals: intervals.to_vec(),
        upstream_rate_limit: rate.upstream_limit,
        effective_rate_limit: rate.effective_rate_limit,
        max_simultaneous_intervals: rate.max_simultaneous_intervals,
        effective_concurrent_limit: rate.effective_concurrent_limit,
        concurrency_mode: rate.concurrency_mode,
        naive_peak_load: rate.naive_peak_load(camera_count),
        distribution_active: active,
        offset_seconds: offset,
        slot_count: slots,
        max_cameras_per_slot: per_slot,
        projected_peak_per_slot: peak,
        passed: warnings.is_empty(),
        warnings,
    }
}
