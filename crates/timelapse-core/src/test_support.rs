use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::camera::{Camera, CameraSource, SourceError};
use crate::config::{Config, DistributionMode};
use crate::directory::CameraDirectory;

pub fn make_temp_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    let uniq = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("unix epoch")
        .as_nanos();
    path.push(format!("timelapse-tests-{name}-{uniq}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

pub fn test_config(root: &Path, intervals: &[u64]) -> Config {
    let mut config = Config::default();
    config.image_root = root.join("images");
    config.video_root = root.join("videos");
    config.fetch.intervals = intervals.to_vec();
    config.fetch.retry_delay = Duration::from_millis(10);
    config.reuse.poll_interval = Duration::from_millis(5);
    config.reuse.wait_timeout = Duration::from_secs(5);
    config.distribution.mode = DistributionMode::Disabled;
    config
}

pub struct FakeSource {
    cameras: Vec<Camera>,
    failing: HashSet<String>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    timeouts: Mutex<Vec<Duration>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSource {
    pub fn new(cameras: Vec<Camera>) -> Self {
        Self {
            cameras,
            failing: HashSet::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
            timeouts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, camera_id: &str) -> Self {
        self.failing.insert(camera_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self, camera_id: &str) -> usize {
        self.calls.lock().expect("calls").get(camera_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls").values().sum()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().expect("timeouts").clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraSource for FakeSource {
    async fn list_cameras(&self) -> Result<Vec<Camera>, SourceError> {
        Ok(self.cameras.clone())
    }

    async fn capture_snapshot(
        &self,
        camera: &Camera,
        _high_quality: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, SourceError> {
        *self.calls.lock().expect("calls").entry(camera.id.clone()).or_default() += 1;
        self.timeouts.lock().expect("timeouts").push(timeout);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&camera.id) {
            return Err(SourceError::Status {
                status: 500,
                message: "snapshot unavailable".to_string(),
            });
        }
        Ok(vec![0xFF; 2048])
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

pub fn directory(source: Arc<FakeSource>, config: &Config) -> Arc<CameraDirectory> {
    Arc::new(CameraDirectory::new(source, config.selection.clone()))
}
