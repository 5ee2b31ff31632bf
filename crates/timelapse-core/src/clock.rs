use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

use crate::rate::{lcm, lcm_all, MAX_CYCLE_SECONDS};

pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

pub fn unix_now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn millis_until(timestamp: u64) -> i64 {
    timestamp as i64 * 1000 - unix_now_millis()
}

pub fn sleep_duration(millis: i64) -> Duration {
    Duration::from_millis(millis.max(0) as u64)
}

pub fn local_date(timestamp: u64) -> NaiveDate {
    match Local.timestamp_opt(timestamp as i64, 0).single() {
        Some(dt) => dt.date_naive(),
        None => DateTime::<Utc>::from_timestamp(timestamp as i64, 0)
            .unwrap_or_default()
            .date_naive(),
    }
}

pub fn alignment_step(interval: u64, top_of_minute: bool) -> u64 {
    if top_of_minute && interval >= 60 {
        lcm(interval, 60)
    } else {
        interval.max(1)
    }
}

pub fn align_up(from: u64, step: u64) -> u64 {
    from.div_ceil(step.max(1)) * step.max(1)
}

pub fn next_aligned(now: u64, interval: u64, top_of_minute: bool) -> u64 {
    align_up(now + 1, alignment_step(interval, top_of_minute))
}

pub fn skip_missed(next: u64, now: u64, interval: u64) -> u64 {
    if next >= now {
        return next;
    }
    let interval = interval.max(1);
    next + (now - next).div_ceil(interval) * interval
}

pub fn common_start(now: u64, intervals: &[u64], top_of_minute: bool) -> u64 {
    if top_of_minute {
        return align_up(now + 1, 60);
    }
    let cycle = lcm_all(intervals);
    let step = if cycle == 0 || cycle > MAX_CYCLE_SECONDS {
        intervals.iter().copied().max().unwrap_or(60)
    } else {
        cycle
    };
    align_up(now + 1, step)
}

pub fn first_firing(start: u64, interval: u64, top_of_minute: bool) -> u64 {
    align_up(start, alignment_step(interval, top_of_minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_of_minute_widens_long_intervals_only() {
        assert_eq!(alignment_step(10, true), 10);
        assert_eq!(alignment_step(90, true), 180);
        assert_eq!(alignment_step(90, false), 90);
    }

    #[test]
    fn next_aligned_is_strictly_in_the_future() {
        assert_eq!(next_aligned(1_700_000_400, 60, true), 1_700_000_460);
        assert_eq!(next_aligned(1_700_000_401, 15, true), 1_700_000_415);
    }

    #[test]
    fn common_start_lands_on_every_interval_boundary() {
        let now = 1_700_000_123;
        let start = common_start(now, &[10, 15, 60], true);
        assert_eq!(start, 1_700_000_160);
        for interval in [10, 15, 60] {
            assert_eq!(first_firing(start, interval, true), start);
        }

        let lcm_start = common_start(now, &[20, 45], false);
        assert_eq!(lcm_start % 180, 0);
        assert!(lcm_start > now);
    }

    #[test]
    fn skipping_missed_firings_stays_on_the_grid() {
        assert_eq!(skip_missed(1_700_000_400, 1_700_000_425, 10), 1_700_000_430);
        assert_eq!(skip_missed(1_700_000_400, 1_700_000_430, 10), 1_700_000_430);
        assert_eq!(skip_missed(1_700_000_400, 1_700_000_390, 10), 1_700_000_400);
        assert_eq!(skip_missed(1_700_000_400, 1_700_003_999, 60) % 60, 0);
    }

    #[test]
    fn oversized_cycle_falls_back_to_largest_interval() {
        let start = common_start(1_000, &[7, 3599], false);
        assert_eq!(start % 3599, 0);
    }
}
