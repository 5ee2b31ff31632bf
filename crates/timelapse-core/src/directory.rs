use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::camera::{Camera, CameraSource, SourceError};
use crate::config::{SelectionConfig, SelectionMode};

struct Cache {
    cameras: Arc<Vec<Camera>>,
    refreshed_at: Option<Instant>,
}

pub struct CameraDirectory {
    source: Arc<dyn CameraSource>,
    selection: SelectionConfig,
    cache: RwLock<Cache>,
    refreshing: Mutex<()>,
}

impl CameraDirectory {
    pub fn new(source: Arc<dyn CameraSource>, selection: SelectionConfig) -> Self {
        Self {
            source,
            selection,
            cache: RwLock::new(Cache {
                cameras: Arc::new(Vec::new()),
                refreshed_at: None,
            }),
            refreshing: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &Arc<dyn CameraSource> {
        &self.source
    }

    pub async fn refresh(&self, force: bool) -> Result<Arc<Vec<Camera>>, SourceError> {
        let _guard = self.refreshing.lock().await;

        if !force {
            let cache = self.cache.read().await;
            if let Some(at) = cache.refreshed_at {
                if !cache.cameras.is_empty() && at.elapsed() < self.selection.refresh_interval {
                    return Ok(cache.cameras.clone());
                }
            }
        }

        let all = self.source.list_cameras().await?;
        let total = all.len();
        let selected: Vec<Camera> = all
            .into_iter()
            .filter(|c| self.selection.accepts(&c.name))
            .collect();

        info!(total, selected = selected.len(), source = self.source.kind(), "camera directory refreshed");
        for camera in &selected {
            info!(
                camera = %camera.name,
                id = %camera.id,
                connected = camera.is_connected(),
                quality = if camera.supports_high_quality { "HD" } else { "SD" },
                "camera"
            );
        }
        if selected.is_empty() {
            match self.selection.mode {
                SelectionMode::Whitelist => warn!(whitelist = ?self.selection.whitelist, "no cameras match the whitelist"),
                SelectionMode::Blacklist => warn!(blacklist = ?self.selection.blacklist, "every camera is blacklisted"),
                SelectionMode::All => warn!("upstream reported no cameras"),
            }
        }

        let cameras = Arc::new(selected);
        let mut cache = self.cache.write().await;
        cache.cameras = cameras.clone();
        cache.refreshed_at = Some(Instant::now());
        Ok(cameras)
    }

    pub async fn get(&self, force_refresh: bool) -> Result<Arc<Vec<Camera>>, SourceError> {
        let cached = self.cache.read().await.cameras.clone();
        if cached.is_empty() || force_refresh {
            return self.refresh(force_refresh).await;
        }
        Ok(cached)
    }

    pub async fn connected(&self) -> Vec<Camera> {
        let cameras = match self.refresh(false).await {
            Ok(cameras) => cameras,
            Err(err) => {
                warn!(error = %err, "camera refresh failed, using last known list");
                self.cache.read().await.cameras.clone()
            }
        };
        cameras.iter().filter(|c| c.is_connected()).cloned().collect()
    }

    pub async fn cache_age(&self) -> Option<Duration> {
        self.cache.read().await.refreshed_at.map(|at| at.elapsed())
    }
}
