use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, SourceError};
use crate::capacity::{self, CapacityReport};
use crate::capture::{CaptureOutcome, Capturer};
use crate::clock;
use crate::config::Config;
use crate::directory::CameraDirectory;
use crate::distribution::DistributionPlanner;
use crate::rate::RateModel;
use crate::registry::ReuseRegistry;
use crate::stats::IntervalStats;

#[derive(Debug, Clone, Serialize)]
pub struct FiringReport {
    pub interval: u64,
    pub timestamp: u64,
    pub distributed: bool,
    pub offset_seconds: u64,
    pub groups: usize,
    pub outcomes: Vec<CaptureOutcome>,
}

impl FiringReport {
    fn empty(interval: u64, timestamp: u64) -> Self {
        Self {
            interval,
            timestamp,
            distributed: false,
            offset_seconds: 0,
            groups: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn reused(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_reused()).count()
    }
}

pub struct CaptureScheduler {
    config: Arc<Config>,
    directory: Arc<CameraDirectory>,
    registry: Arc<ReuseRegistry>,
    capturer: Arc<Capturer>,
    planner: DistributionPlanner,
    limiters: BTreeMap<u64, Arc<Semaphore>>,
}

impl CaptureScheduler {
    pub fn new(config: Arc<Config>, directory: Arc<CameraDirectory>) -> Self {
        let rate = RateModel::new(&config.rate, &config.fetch.intervals);
        let registry = Arc::new(ReuseRegistry::new(
            config.reuse.registry_window,
            config.largest_interval(),
        ));
        let capturer = Arc::new(Capturer::new(&config, directory.source().clone(), registry.clone()));
        let limiters = config
            .fetch
            .intervals
            .iter()
            .map(|i| (*i, Arc::new(Semaphore::new(rate.effective_concurrent_limit as usize))))
            .collect();

        Self {
            planner: DistributionPlanner::new(config.distribution.clone(), rate),
            config,
            directory,
            registry,
            capturer,
            limiters,
        }
    }

    pub fn rate(&self) -> &RateModel {
        self.planner.rate()
    }

    pub fn planner(&self) -> &DistributionPlanner {
        &self.planner
    }

    pub fn registry(&self) -> &Arc<ReuseRegistry> {
        &self.registry
    }

    pub fn capturer(&self) -> &Arc<Capturer> {
        &self.capturer
    }

    pub fn validate_capacity(&self, camera_count: usize) -> CapacityReport {
        capacity::validate_capacity(&self.planner, &self.config.fetch.intervals, camera_count)
    }

    pub fn cameras_for(&self, interval: u64, cameras: &[Camera]) -> Vec<Camera> {
        cameras
            .iter()
            .filter(|c| c.is_connected() && self.config.fetch.serves(interval, &c.name))
            .cloned()
            .collect()
    }

    fn limiter(&self, interval: u64) -> Arc<Semaphore> {
        self.limiters.get(&interval).cloned().unwrap_or_else(|| {
            Arc::new(Semaphore::new(self.rate().effective_concurrent_limit as usize))
        })
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let fetch = &self.config.fetch;
        let rate = self.rate();
        info!(
            intervals = ?fetch.intervals,
            upstream_limit = rate.upstream_limit,
            effective_limit = rate.effective_rate_limit,
            max_simultaneous = rate.max_simultaneous_intervals,
            concurrent_limit = rate.effective_concurrent_limit,
            mode = ?rate.concurrency_mode,
            "starting capture scheduler"
        );

        let cameras = self.directory.connected().await;
        let report = self.validate_capacity(cameras.len());
        if !report.passed {
            for warning in &report.warnings {
                warn!(cameras = cameras.len(), "capacity: {warning}");
            }
        }

        let now = clock::unix_now();
        let start = fetch
            .common_start
            .then(|| clock::common_start(now, &fetch.intervals, fetch.top_of_minute));
        if let Some(start) = start {
            info!(start, in_secs = start.saturating_sub(now), "all intervals share one start instant");
        }

        let mut loops = JoinSet::new();
        for &interval in &fetch.intervals {
            let first = match start {
                Some(start) => clock::first_firing(start, interval, fetch.top_of_minute),
                None => clock::next_aligned(now, interval, fetch.top_of_minute),
            };
            let this = self.clone();
            let cancel = cancel.clone();
            loops.spawn(async move { this.interval_loop(interval, first, cancel).await });
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "interval loop aborted");
            }
        }
        info!("capture scheduler stopped");
    }

    pub(crate) async fn interval_loop(&self, interval: u64, first: u64, cancel: CancellationToken) {
        let mut stats = IntervalStats::new(interval);
        let mut summary = self.config.summary.enabled.then(|| {
            let period = self.config.summary.interval;
            tokio::time::interval_at(Instant::now() + period, period)
        });
        let mut next = first;
        info!(interval, first, "interval loop armed");

        loop {
            let mut wait = clock::millis_until(next);
            if wait < -(interval as i64 * 500) {
                let resume = clock::skip_missed(next, clock::unix_now(), interval);
                warn!(
                    interval,
                    timestamp = next,
                    behind_secs = -wait / 1000,
                    skipped = (resume - next) / interval,
                    resume,
                    "running behind schedule, skipping missed firings"
                );
                next = resume;
                wait = clock::millis_until(next);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = next_summary(&mut summary) => {
                    stats.emit_and_reset();
                    continue;
                }
                _ = tokio::time::sleep(clock::sleep_duration(wait)) => {}
            }

            let report = self.fire(interval, next, &cancel).await;
            stats.record_firing(&report.outcomes);
            debug!(
                interval,
                timestamp = next,
                succeeded = report.succeeded(),
                total = report.outcomes.len(),
                reused = report.reused(),
                distributed = report.distributed,
                "firing complete"
            );
            if cancel.is_cancelled() {
                break;
            }
            next += interval;
        }

        if summary.is_some() {
            stats.emit_and_reset();
        }
        info!(interval, "interval loop stopped");
    }

    pub async fn fire(&self, interval: u64, timestamp: u64, cancel: &CancellationToken) -> FiringReport {
        let cameras = self.directory.connected().await;
        let cameras = self.cameras_for(interval, &cameras);
        self.fire_cameras(interval, timestamp, &cameras, cancel).await
    }

    pub async fn fire_cameras(
        &self,
        interval: u64,
        timestamp: u64,
        cameras: &[Camera],
        cancel: &CancellationToken,
    ) -> FiringReport {
        let mut report = FiringReport::empty(interval, timestamp);
        if cameras.is_empty() {
            debug!(interval, timestamp, "no cameras for this interval");
            return report;
        }
        let limiter = self.limiter(interval);

        if !self.planner.should_distribute(cameras.len()) {
            report.groups = 1;
            report.outcomes = self.run_batch(cameras, interval, timestamp, &limiter, cancel).await;
            return report;
        }

        let plan = self.planner.plan_groups(cameras);
        debug!(
            interval,
            timestamp,
            offset = plan.offset_seconds,
            groups = plan.groups.len(),
            largest = plan.largest_group(),
            "distributed firing"
        );
        report.distributed = true;
        report.offset_seconds = plan.offset_seconds;
        report.groups = plan.groups.len();

        let base = Instant::now();
        for group in &plan.groups {
            // Groups run one after another; each starts no earlier than its slot.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(base + Duration::from_secs(group.offset_seconds)) => {}
            }
            let outcomes = self
                .run_batch(&group.cameras, interval, timestamp, &limiter, cancel)
                .await;
            report.outcomes.extend(outcomes);
        }
        report
    }

    async fn run_batch(
        &self,
        cameras: &[Camera],
        interval: u64,
        timestamp: u64,
        limiter: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Vec<CaptureOutcome> {
        let mut tasks = JoinSet::new();
        for camera in cameras {
            let capturer = self.capturer.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let camera = camera.clone();
            tasks.spawn(async move { capturer.capture(&camera, interval, timestamp, &limiter, &cancel).await });
        }

        let mut outcomes = Vec::with_capacity(cameras.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(interval, timestamp, error = %err, "capture task aborted"),
            }
        }
        outcomes
    }

    pub async fn capture_all_once(&self, cancel: &CancellationToken) -> Result<Vec<CaptureOutcome>, SourceError> {
        let cameras = self.directory.get(true).await?;
        let interval = self.config.smallest_interval();
        let timestamp = clock::unix_now();
        let limiter = self.limiter(interval);
        info!(cameras = cameras.len(), interval, timestamp, "capturing all cameras once");

        let mut tasks = JoinSet::new();
        for camera in cameras.iter() {
            let capturer = self.capturer.clone();
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let camera = camera.clone();
            tasks.spawn(async move {
                if camera.is_connected() {
                    capturer.capture_fresh(&camera, interval, timestamp, &limiter, &cancel).await
                } else {
                    capturer.capture(&camera, interval, timestamp, &limiter, &cancel).await
                }
            });
        }

        let mut outcomes = Vec::with_capacity(cameras.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "capture task aborted"),
            }
        }
        outcomes.sort_by(|a, b| a.camera.cmp(&b.camera));
        Ok(outcomes)
    }
}

async fn next_summary(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
