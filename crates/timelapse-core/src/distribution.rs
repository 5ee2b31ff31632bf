//! Spreads cameras over time-offset slots so peak request volume stays under the rate ceiling.
//!
//! Slot assignment is `sha1(camera.id) mod slot_count`, reading the digest as a
//! big-endian integer. Any implementation given the same id and parameters
//! lands on the same slot.

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::camera::Camera;
use crate::config::{DistributionConfig, DistributionMode, DistributionStrategy};
use crate::rate::RateModel;

pub fn slot_for_id(camera_id: &str, slot_count: u64) -> u64 {
    if slot_count <= 1 {
        return 0;
    }
    let digest = Sha1::digest(camera_id.as_bytes());
    let modulus = slot_count as u128;
    digest
        .iter()
        .fold(0u128, |acc, byte| (acc * 256 + *byte as u128) % modulus) as u64
}

pub fn slot_count(window_seconds: u64, offset_seconds: u64) -> u64 {
    if offset_seconds == 0 {
        return 1;
    }
    (window_seconds / offset_seconds).max(1)
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionGroup {
    pub slot: u64,
    pub offset_seconds: u64,
    pub cameras: Vec<Camera>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionPlan {
    pub offset_seconds: u64,
    pub slot_count: u64,
    pub max_cameras_per_slot: u32,
    pub groups: Vec<DistributionGroup>,
}

impl DistributionPlan {
    pub fn largest_group(&self) -> usize {
        self.groups.iter().map(|g| g.cameras.len()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct DistributionPlanner {
    config: DistributionConfig,
    rate: RateModel,
}

impl DistributionPlanner {
    pub fn new(config: DistributionConfig, rate: RateModel) -> Self {
        Self { config, rate }
    }

    pub fn rate(&self) -> &RateModel {
        &self.rate
    }

    pub fn should_distribute(&self, camera_count: usize) -> bool {
        match self.config.mode {
            DistributionMode::Enabled => true,
            DistributionMode::Disabled => false,
            DistributionMode::Auto => {
                camera_count > self.config.min_cameras
                    && (self.rate.naive_peak_load(camera_count) > self.rate.upstream_limit as u64
                        || camera_count > self.rate.effective_concurrent_limit as usize)
            }
        }
    }

    pub fn optimal_offset(&self, camera_count: usize) -> u64 {
        match self.config.strategy {
            DistributionStrategy::Fixed => self.config.fixed_offset,
            DistributionStrategy::Adaptive => {
                let per_slot = self.rate.max_cameras_per_slot() as usize;
                if camera_count <= per_slot {
                    return 0;
                }
                let slots_needed = camera_count.div_ceil(per_slot) as u64;
                (self.config.window_seconds / slots_needed).clamp(self.config.min_offset, self.config.max_offset)
            }
        }
    }

    pub fn slot_count(&self, offset_seconds: u64) -> u64 {
        slot_count(self.config.window_seconds, offset_seconds)
    }

    /// Offset in seconds from the firing instant. Depends only on the camera's own id.
    pub fn assign_offset(&self, camera: &Camera, offset_seconds: u64) -> u64 {
        slot_for_id(&camera.id, self.slot_count(offset_seconds)) * offset_seconds
    }

    pub fn plan_groups(&self, cameras: &[Camera]) -> DistributionPlan {
        let offset = self.optimal_offset(cameras.len());
        let slots = self.slot_count(offset) as usize;
        let cap = self.rate.max_cameras_per_slot() as usize;

        let mut buckets: Vec<Vec<Camera>> = vec![Vec::new(); slots];
        for camera in cameras {
            let slot = slot_for_id(&camera.id, slots as u64) as usize;
            buckets[slot].push(camera.clone());
        }

        let mut overflow: Vec<(usize, Camera)> = Vec::new();
        for (slot, bucket) in buckets.iter_mut().enumerate() {
            bucket.sort_by(|a, b| a.id.cmp(&b.id));
            if bucket.len() > cap {
                overflow.extend(bucket.split_off(cap).into_iter().map(|c| (slot, c)));
            }
        }

        let mut extra: Vec<Vec<Camera>> = Vec::new();
        for (origin, camera) in overflow {
            let target = (1..=slots)
                .map(|k| (origin + k) % slots)
                .find(|slot| buckets[*slot].len() < cap);
            match target {
                Some(slot) => buckets[slot].push(camera),
                None => match extra.last_mut() {
                    Some(group) if group.len() < cap => group.push(camera),
                    _ => extra.push(vec![camera]),
                },
            }
        }

        let mut groups: Vec<DistributionGroup> = buckets
            .into_iter()
            .enumerate()
            .filter(|(_, cams)| !cams.is_empty())
            .map(|(slot, cams)| DistributionGroup {
                slot: slot as u64,
                offset_seconds: slot as u64 * offset,
                cameras: cams,
            })
            .collect();
        for (i, cams) in extra.into_iter().enumerate() {
            let slot = (slots + i) as u64;
            groups.push(DistributionGroup {
                slot,
                offset_seconds: slot * offset,
                cameras: cams,
            });
        }

        DistributionPlan {
            offset_seconds: offset,
            slot_count: slots as u64,
            max_cameras_per_slot: cap as u32,
            groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn planner(intervals: &[u64]) -> DistributionPlanner {
        let config = Config::default();
        let rate = RateModel::new(&config.rate, intervals);
        DistributionPlanner::new(config.distribution, rate)
    }

    fn cameras(n: usize) -> Vec<Camera> {
        (1..=n)
            .map(|i| Camera::new(format!("cam-{i:02}"), format!("Camera {i}")))
            .collect()
    }

    #[test]
    fn slot_matches_reference_digest() {
        // sha1("abc") = a9993e36...d89d; as an integer mod 6 it is 5.
        assert_eq!(slot_for_id("abc", 6), 5);
        assert_eq!(slot_for_id("camera-front", 12), 11);
        assert_eq!(slot_for_id("5f1a2b3c4d5e6f7a8b9c0d1e", 4), 3);
    }

    #[test]
    fn assignment_ignores_other_cameras() {
        let planner = planner(&[60]);
        let camera = Camera::new("5f1a2b3c4d5e6f7a8b9c0d1e", "Porch");
        let before = planner.assign_offset(&camera, 15);

        let mut renamed = camera.clone();
        renamed.name = "Porch (renamed)".to_string();
        let crowd = cameras(40);
        let plan = planner.plan_groups(&crowd);

        assert_eq!(planner.assign_offset(&renamed, 15), before);
        assert_eq!(before, 45);
        assert!(plan.groups.len() > 1);
    }

    #[test]
    fn offset_is_zero_until_cameras_exceed_one_slot() {
        let planner = planner(&[10, 60]);
        // effective 8 / 2 simultaneous = 4 per slot
        assert_eq!(planner.optimal_offset(4), 0);
        for count in 5..60 {
            let offset = planner.optimal_offset(count);
            assert!((5..=30).contains(&offset), "count {count} gave {offset}");
        }
    }

    #[test]
    fn twelve_cameras_single_interval_distribute_within_capacity() {
        let planner = planner(&[60]);
        assert!(planner.should_distribute(12));
        assert!(!planner.should_distribute(10));

        let plan = planner.plan_groups(&cameras(12));
        assert_eq!(plan.offset_seconds, 30);
        assert_eq!(plan.slot_count, 2);
        assert_eq!(plan.max_cameras_per_slot, 8);
        assert!(plan.largest_group() <= 8);
        assert_eq!(plan.groups.iter().map(|g| g.cameras.len()).sum::<usize>(), 12);
    }

    #[test]
    fn forced_modes_override_auto() {
        let config = Config::default();
        let rate = RateModel::new(&config.rate, &[60]);
        let mut dist = config.distribution.clone();

        dist.mode = DistributionMode::Enabled;
        assert!(DistributionPlanner::new(dist.clone(), rate).should_distribute(1));
        dist.mode = DistributionMode::Disabled;
        assert!(!DistributionPlanner::new(dist, rate).should_distribute(500));
    }

    #[test]
    fn fixed_strategy_uses_configured_offset() {
        let config = Config::default();
        let rate = RateModel::new(&config.rate, &[60]);
        let mut dist = config.distribution.clone();
        dist.strategy = DistributionStrategy::Fixed;
        let planner = DistributionPlanner::new(dist, rate);

        assert_eq!(planner.optimal_offset(1), 15);
        assert_eq!(planner.slot_count(15), 4);
    }

    #[test]
    fn overflow_beyond_window_gets_trailing_groups() {
        let planner = planner(&[60]);
        // 8 per slot, offset clamps to 5 -> 12 slots, 96 slots of room; 120 cameras overflow it.
        let plan = planner.plan_groups(&cameras(120));
        assert_eq!(plan.offset_seconds, 5);
        assert_eq!(plan.slot_count, 12);
        assert!(plan.largest_group() <= 8);
        assert_eq!(plan.groups.iter().map(|g| g.cameras.len()).sum::<usize>(), 120);
        assert!(plan.groups.len() >= 15);
    }
}
