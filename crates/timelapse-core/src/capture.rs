use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::camera::{Camera, CameraSource, SourceError};
use crate::config::{Config, FetchConfig, ReuseConfig, ReuseStrategy};
use crate::layout::{partial_path, Layout};
use crate::registry::{EntryState, ReuseRegistry};

const SOURCE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: SourceError },
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CaptureStatus {
    Captured,
    Reused { from_interval: u64 },
    Failed { reason: String },
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub camera_id: String,
    pub camera: String,
    pub interval: u64,
    pub timestamp: u64,
    #[serde(flatten)]
    pub status: CaptureStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    pub path: Option<PathBuf>,
    /// Reuse was eligible but the source image never became available.
    pub reuse_missed: bool,
}

impl CaptureOutcome {
    fn new(camera: &Camera, interval: u64, timestamp: u64, status: CaptureStatus) -> Self {
        Self {
            camera_id: camera.id.clone(),
            camera: camera.name.clone(),
            interval,
            timestamp,
            status,
            attempts: 0,
            elapsed: Duration::ZERO,
            path: None,
            reuse_missed: false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, CaptureStatus::Captured | CaptureStatus::Reused { .. })
    }

    pub fn is_reused(&self) -> bool {
        matches!(self.status, CaptureStatus::Reused { .. })
    }
}

pub struct Capturer {
    source: Arc<dyn CameraSource>,
    registry: Arc<ReuseRegistry>,
    layout: Layout,
    fetch: FetchConfig,
    reuse: ReuseConfig,
    high_quality: bool,
}

impl Capturer {
    pub fn new(config: &Config, source: Arc<dyn CameraSource>, registry: Arc<ReuseRegistry>) -> Self {
        Self {
            source,
            registry,
            layout: Layout::new(
                config.image_root.clone(),
                config.video_root.clone(),
                config.fetch.image_extension.clone(),
            ),
            fetch: config.fetch.clone(),
            reuse: config.reuse.clone(),
            high_quality: config.source.snapshot_high_quality,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn reuse_source(&self, interval: u64, timestamp: u64, camera_name: &str) -> Option<u64> {
        if !self.reuse.enabled {
            return None;
        }
        let smallest = self.fetch.intervals.first().copied()?;
        if interval <= smallest {
            return None;
        }
        self.fetch
            .intervals
            .iter()
            .copied()
            .filter(|s| *s < interval && interval % s == 0 && timestamp % s == 0)
            .filter(|s| self.fetch.serves(*s, camera_name))
            .max()
    }

    pub async fn capture(
        &self,
        camera: &Camera,
        interval: u64,
        timestamp: u64,
        limiter: &Semaphore,
        cancel: &CancellationToken,
    ) -> CaptureOutcome {
        if !camera.is_connected() {
            debug!(camera = %camera.name, interval, "camera not connected, skipping");
            return CaptureOutcome::new(camera, interval, timestamp, CaptureStatus::Skipped);
        }

        let mut reuse_missed = false;
        if let Some(from) = self.reuse_source(interval, timestamp, &camera.name) {
            let started = Instant::now();
            if let Some(path) = self.try_reuse(camera, interval, timestamp, from, cancel).await {
                debug!(camera = %camera.name, interval, from, timestamp, "reused image");
                let mut outcome = CaptureOutcome::new(
                    camera,
                    interval,
                    timestamp,
                    CaptureStatus::Reused { from_interval: from },
                );
                outcome.elapsed = started.elapsed();
                outcome.path = Some(path);
                return outcome;
            }
            if cancel.is_cancelled() {
                return CaptureOutcome::new(camera, interval, timestamp, CaptureStatus::Cancelled);
            }
            debug!(camera = %camera.name, interval, from, timestamp, "reuse unavailable, capturing fresh");
            reuse_missed = true;
        }

        let mut outcome = self.capture_fresh(camera, interval, timestamp, limiter, cancel).await;
        outcome.reuse_missed = reuse_missed;
        outcome
    }

    pub async fn capture_fresh(
        &self,
        camera: &Camera,
        interval: u64,
        timestamp: u64,
        limiter: &Semaphore,
        cancel: &CancellationToken,
    ) -> CaptureOutcome {
        let started = Instant::now();
        let path = self.layout.image_path(&camera.safe_name(), interval, timestamp);
        self.registry
            .register(timestamp, &camera.id, interval, path.clone(), EntryState::Pending)
            .await;

        let result = self.fetch_with_retry(camera, interval, &path, limiter, cancel).await;
        let (state, status, attempts) = match result {
            Ok(attempts) => (EntryState::Ready, CaptureStatus::Captured, attempts),
            Err(CaptureError::Cancelled { attempts }) => (EntryState::Failed, CaptureStatus::Cancelled, attempts),
            Err(err @ CaptureError::Exhausted { attempts, .. }) => {
                warn!(camera = %camera.name, interval, timestamp, error = %err, "capture failed");
                (EntryState::Failed, CaptureStatus::Failed { reason: err.to_string() }, attempts)
            }
        };
        self.registry
            .register(timestamp, &camera.id, interval, path.clone(), state)
            .await;

        let mut outcome = CaptureOutcome::new(camera, interval, timestamp, status);
        outcome.attempts = attempts;
        outcome.elapsed = started.elapsed();
        if state == EntryState::Ready {
            outcome.path = Some(path);
        }
        outcome
    }

    async fn fetch_with_retry(
        &self,
        camera: &Camera,
        interval: u64,
        path: &Path,
        limiter: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<u32, CaptureError> {
        let total = self.fetch.max_retries + 1;
        let timeout = self.fetch.attempt_timeout(interval);
        let high_quality = self.high_quality && camera.supports_high_quality;
        let mut last = SourceError::Other("no attempt made".to_string());

        for attempt in 1..=total {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CaptureError::Cancelled { attempts: attempt }),
                r = self.attempt(camera, high_quality, timeout, path, limiter) => r,
            };
            match result {
                Ok(size) => {
                    debug!(camera = %camera.name, interval, attempt, size, path = %path.display(), "image saved");
                    return Ok(attempt);
                }
                Err(err) => {
                    warn!(camera = %camera.name, interval, attempt, max_attempts = total, error = %err, "capture attempt failed");
                    last = err;
                }
            }
            if attempt < total {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CaptureError::Cancelled { attempts: attempt }),
                    _ = tokio::time::sleep(self.fetch.retry_delay) => {}
                }
            }
        }

        Err(CaptureError::Exhausted { attempts: total, last })
    }

    async fn attempt(
        &self,
        camera: &Camera,
        high_quality: bool,
        timeout: Duration,
        path: &Path,
        limiter: &Semaphore,
    ) -> Result<usize, SourceError> {
        let _permit = limiter.acquire().await.map_err(|_| SourceError::Cancelled)?;
        let snapshot = self.source.capture_snapshot(camera, high_quality, timeout);
        let bytes = tokio::time::timeout(timeout + SOURCE_GRACE, snapshot)
            .await
            .map_err(|_| SourceError::Timeout)??;
        if bytes.len() < self.fetch.min_image_bytes {
            return Err(SourceError::Undersized {
                size: bytes.len(),
                min: self.fetch.min_image_bytes,
            });
        }
        write_atomic(path, &bytes).await?;
        Ok(bytes.len())
    }

    async fn try_reuse(
        &self,
        camera: &Camera,
        interval: u64,
        timestamp: u64,
        from: u64,
        cancel: &CancellationToken,
    ) -> Option<PathBuf> {
        let safe = camera.safe_name();
        let source_path = match self.reuse.strategy {
            ReuseStrategy::Registry => {
                self.registry
                    .wait_for(
                        timestamp,
                        &camera.id,
                        from,
                        self.reuse.wait_timeout,
                        self.reuse.poll_interval,
                        cancel,
                    )
                    .await?
            }
            ReuseStrategy::Delay => {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.reuse.delay) => {}
                }
                let path = self.layout.image_path(&safe, from, timestamp);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return None;
                }
                path
            }
        };

        let dest = self.layout.image_path(&safe, interval, timestamp);
        match copy_atomic(&source_path, &dest).await {
            Ok(()) => {
                self.registry
                    .register(timestamp, &camera.id, interval, dest.clone(), EntryState::Ready)
                    .await;
                Some(dest)
            }
            Err(err) => {
                warn!(camera = %camera.name, interval, from, error = %err, "reuse copy failed");
                None
            }
        }
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = partial_path(path);
    tokio::fs::write(&part, bytes).await?;
    tokio::fs::rename(&part, path).await
}

async fn copy_atomic(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let part = partial_path(to);
    tokio::fs::copy(from, &part).await?;
    tokio::fs::rename(&part, to).await
}
