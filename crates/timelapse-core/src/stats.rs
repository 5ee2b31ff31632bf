use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use crate::capture::{CaptureOutcome, CaptureStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub success: u64,
    pub failure: u64,
    pub reused: u64,
}

#[derive(Debug, Clone)]
pub struct IntervalStats {
    pub interval: u64,
    pub success: u64,
    pub failure: u64,
    pub reused: u64,
    pub not_reused: u64,
    pub skipped: u64,
    pub firings: u64,
    pub last_capture: Option<DateTime<Local>>,
    pub capture_time: Duration,
    pub cameras: BTreeMap<String, CameraStats>,
    since: Instant,
}

impl IntervalStats {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            success: 0,
            failure: 0,
            reused: 0,
            not_reused: 0,
            skipped: 0,
            firings: 0,
            last_capture: None,
            capture_time: Duration::ZERO,
            cameras: BTreeMap::new(),
            since: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.success as f64 / total as f64 * 100.0,
        }
    }

    pub fn record_firing(&mut self, outcomes: &[CaptureOutcome]) {
        self.firings += 1;
        self.last_capture = Some(Local::now());
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    pub fn record(&mut self, outcome: &CaptureOutcome) {
        if outcome.reuse_missed {
            self.not_reused += 1;
        }
        let camera = self.cameras.entry(outcome.camera.clone()).or_default();
        match &outcome.status {
            CaptureStatus::Captured => {
                self.success += 1;
                camera.success += 1;
                self.capture_time += outcome.elapsed;
            }
            CaptureStatus::Reused { .. } => {
                self.success += 1;
                self.reused += 1;
                camera.success += 1;
                camera.reused += 1;
            }
            CaptureStatus::Failed { .. } => {
                self.failure += 1;
                camera.failure += 1;
            }
            CaptureStatus::Skipped => self.skipped += 1,
            CaptureStatus::Cancelled => {}
        }
    }

    pub fn average_capture_time(&self) -> Option<Duration> {
        let fresh = self.success - self.reused;
        (fresh > 0).then(|| self.capture_time / fresh as u32)
    }

    pub fn summary_lines(&self) -> Vec<String> {
        if self.total() == 0 {
            return vec![format!("{}s: no captures", self.interval)];
        }
        let last = self
            .last_capture
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let mut head = format!(
            "{}s: {}/{} successful ({:.1}%), {} reused, {} not reused, last: {}",
            self.interval,
            self.success,
            self.total(),
            self.success_rate(),
            self.reused,
            self.not_reused,
            last
        );
        if let Some(avg) = self.average_capture_time() {
            head.push_str(&format!(", avg {:.2}s", avg.as_secs_f64()));
        }

        let mut lines = vec![head];
        for (name, cam) in &self.cameras {
            let total = cam.success + cam.failure;
            if total == 0 {
                continue;
            }
            lines.push(format!(
                "  {name}: {}/{} ({:.1}%)",
                cam.success,
                total,
                cam.success as f64 / total as f64 * 100.0
            ));
        }
        lines
    }

    pub fn emit_and_reset(&mut self) {
        let minutes = self.since.elapsed().as_secs_f64() / 60.0;
        info!(interval = self.interval, minutes = %format!("{minutes:.1}"), "capture summary");
        for line in self.summary_lines() {
            info!("{line}");
        }
        self.reset();
    }

    pub fn reset(&mut self) {
        let interval = self.interval;
        let last_capture = self.last_capture;
        *self = Self::new(interval);
        self.last_capture = last_capture;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(camera: &str, status: CaptureStatus) -> CaptureOutcome {
        CaptureOutcome {
            camera_id: format!("id-{camera}"),
            camera: camera.to_string(),
            interval: 60,
            timestamp: 1_700_000_400,
            status,
            attempts: 1,
            elapsed: Duration::from_millis(400),
            path: None,
            reuse_missed: false,
        }
    }

    #[test]
    fn counts_success_failure_and_reuse() {
        let mut stats = IntervalStats::new(60);
        stats.record_firing(&[
            outcome("Front", CaptureStatus::Captured),
            outcome("Back", CaptureStatus::Reused { from_interval: 10 }),
            outcome("Side", CaptureStatus::Failed { reason: "timeout".to_string() }),
            outcome("Shed", CaptureStatus::Skipped),
        ]);

        assert_eq!(stats.success, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.cameras["Back"].reused, 1);
        assert_eq!(stats.average_capture_time(), Some(Duration::from_millis(400)));

        let lines = stats.summary_lines();
        assert!(lines[0].starts_with("60s: 2/3 successful (66.7%), 1 reused"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn fallback_after_missed_reuse_is_counted() {
        let mut missed = outcome("Front", CaptureStatus::Captured);
        missed.reuse_missed = true;
        let mut stats = IntervalStats::new(60);
        stats.record_firing(&[missed, outcome("Back", CaptureStatus::Reused { from_interval: 15 })]);

        assert_eq!(stats.success, 2);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.not_reused, 1);
        assert!(stats.summary_lines()[0].contains("1 reused, 1 not reused"));
    }

    #[test]
    fn reset_clears_counters_but_keeps_last_capture() {
        let mut stats = IntervalStats::new(10);
        stats.record_firing(&[outcome("Front", CaptureStatus::Captured)]);
        stats.reset();

        assert_eq!(stats.total(), 0);
        assert!(stats.cameras.is_empty());
        assert!(stats.last_capture.is_some());
        assert_eq!(stats.summary_lines(), vec!["10s: no captures".to_string()]);
    }
}
