use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::camera::{Camera, CameraSource, CameraState, SourceError};
use crate::config::{RtspsCamera, SourceConfig};
use crate::process::{self, ProcessError};

pub struct RtspsSource {
    host: String,
    port: u16,
    cameras: Vec<RtspsCamera>,
    grab_timeout: Duration,
    cancel: CancellationToken,
}

impl RtspsSource {
    pub fn new(config: &SourceConfig, cancel: CancellationToken) -> Result<Self, SourceError> {
        let host = config
            .rtsps_host
            .clone()
            .ok_or_else(|| SourceError::Other("rtsps host not configured".to_string()))?;
        Ok(Self {
            host,
            port: config.rtsps_port,
            cameras: config.rtsps_cameras.clone(),
            grab_timeout: config.request_timeout,
            cancel,
        })
    }

    pub fn stream_url(&self, stream_id: &str) -> String {
        format!("rtsps://{}:{}/{}?enableSrtp", self.host, self.port, stream_id)
    }

    pub fn grab_timeout(&self, attempt: Duration) -> Duration {
        attempt.min(self.grab_timeout)
    }

    fn grab_command(&self, stream_id: &str) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-rtsp_transport", "tcp"])
            .arg("-i")
            .arg(self.stream_url(stream_id))
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-"]);
        cmd
    }
}

#[async_trait]
impl CameraSource for RtspsSource {
    async fn list_cameras(&self) -> Result<Vec<Camera>, SourceError> {
        Ok(self
            .cameras
            .iter()
            .map(|c| Camera {
                id: c.stream_id.clone(),
                name: c.name.clone(),
                state: CameraState::Connected,
                supports_high_quality: false,
                model: "rtsps".to_string(),
            })
            .collect())
    }

    async fn capture_snapshot(
        &self,
        camera: &Camera,
        _high_quality: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, SourceError> {
        let output = process::run(self.grab_command(&camera.id), self.grab_timeout(timeout), &self.cancel)
            .await
            .map_err(|err| match err {
                ProcessError::Timeout { .. } => SourceError::Timeout,
                ProcessError::Cancelled { .. } => SourceError::Cancelled,
                other => SourceError::Process(other.to_string()),
            })?;

        if !output.status.success() {
            return Err(SourceError::Process(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                output.stderr_excerpt(200)
            )));
        }

        debug!(camera = %camera.name, elapsed_ms = output.elapsed.as_millis() as u64, size = output.stdout.len(), "frame grabbed");
        Ok(output.stdout)
    }

    fn kind(&self) -> &'static str {
        "rtsps"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn cameras_come_from_configuration() {
        let mut config = Config::default().source;
        config.rtsps_host = Some("nvr.local".to_string());
        config.rtsps_cameras = vec![RtspsCamera {
            name: "cam-back".to_string(),
            stream_id: "abc123".to_string(),
            intervals: vec![15, 60],
        }];

        let source = RtspsSource::new(&config, CancellationToken::new()).expect("source");
        let cameras = source.list_cameras().await.expect("cameras");

        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].id, "abc123");
        assert!(cameras[0].is_connected());
        assert_eq!(source.stream_url("abc123"), "rtsps://nvr.local:7441/abc123?enableSrtp");
    }

    #[test]
    fn frame_grab_fits_inside_the_attempt_budget() {
        let mut config = Config::default().source;
        config.rtsps_host = Some("nvr.local".to_string());
        config.request_timeout = Duration::from_secs(10);
        let source = RtspsSource::new(&config, CancellationToken::new()).expect("source");

        // 10s interval at 80%: the process timeout must fire before the capturer's.
        let attempt = Config::default().fetch.attempt_timeout(10);
        assert_eq!(source.grab_timeout(attempt), attempt);
        assert!(source.grab_timeout(attempt) < Duration::from_secs(10));
        assert_eq!(source.grab_timeout(Duration::from_secs(48)), Duration::from_secs(10));
    }
}
