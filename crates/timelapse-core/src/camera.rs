use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Connected,
    Other,
}

/// `id` is the only key used for hashing and offsets; `name` may change between refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub state: CameraState,
    pub supports_high_quality: bool,
    #[serde(default)]
    pub model: String,
}

impl Camera {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: CameraState::Connected,
            supports_high_quality: false,
            model: String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == CameraState::Connected
    }

    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }
}

pub fn safe_name(name: &str) -> String {
    name.replace([' ', '/', '\\'], "_")
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(String),
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("timeout")]
    Timeout,
    #[error("unexpected content type {0:?}")]
    InvalidContent(String),
    #[error("image too small ({size} bytes, need {min})")]
    Undersized { size: usize, min: usize },
    #[error("capture process failed: {0}")]
    Process(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("cancelled")]
    Cancelled,
    #[error("source error: {0}")]
    Other(String),
}

/// `capture_snapshot` must give up on its own within `timeout`, releasing whatever it holds.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<Camera>, SourceError>;
    async fn capture_snapshot(
        &self,
        camera: &Camera,
        high_quality: bool,
        timeout: Duration,
    ) -> Result<Vec<u8>, SourceError>;
    fn kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_replaces_separators() {
        let camera = Camera::new("id-1", "Front Door/Left\\Side");
        assert_eq!(camera.safe_name(), "Front_Door_Left_Side");
    }
}
