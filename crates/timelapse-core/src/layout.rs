use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::clock::local_date;

/// On-disk naming shared by the capture side and the video assembler.
///
/// Images: `{image_root}/{camera}/{interval}s/{YYYY}/{MM}/{DD}/{camera}_{unix_ts}.{ext}`.
/// Videos: `{video_root}/{YYYY}/{MM}/{camera}/{interval}s/{camera}_{YYYYMMDD}_{interval}s.mp4`.
#[derive(Debug, Clone)]
pub struct Layout {
    image_root: PathBuf,
    video_root: PathBuf,
    extension: String,
}

impl Layout {
    pub fn new(image_root: impl Into<PathBuf>, video_root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            image_root: image_root.into(),
            video_root: video_root.into(),
            extension: extension.into(),
        }
    }

    pub fn image_root(&self) -> &Path {
        &self.image_root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn image_dir(&self, camera: &str, interval: u64, date: NaiveDate) -> PathBuf {
        self.image_root
            .join(camera)
            .join(format!("{interval}s"))
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    pub fn image_file_name(&self, camera: &str, timestamp: u64) -> String {
        format!("{camera}_{timestamp}.{}", self.extension)
    }

    pub fn image_path(&self, camera: &str, interval: u64, timestamp: u64) -> PathBuf {
        self.image_dir(camera, interval, local_date(timestamp))
            .join(self.image_file_name(camera, timestamp))
    }

    pub fn image_glob(&self, camera: &str) -> String {
        format!("{camera}_*.{}", self.extension)
    }

    pub fn video_path(&self, camera: &str, interval: u64, date: NaiveDate) -> PathBuf {
        self.video_root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(camera)
            .join(format!("{interval}s"))
            .join(format!("{camera}_{}_{interval}s.mp4", date.format("%Y%m%d")))
    }
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_and_video_paths_follow_the_layout() {
        let layout = Layout::new("/data/images", "/data/videos", "jpg");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).expect("date");

        assert_eq!(
            layout.image_dir("Front_Door", 60, date),
            PathBuf::from("/data/images/Front_Door/60s/2024/03/07")
        );
        assert_eq!(
            layout.video_path("Front_Door", 60, date),
            PathBuf::from("/data/videos/2024/03/Front_Door/60s/Front_Door_20240307_60s.mp4")
        );
        assert_eq!(layout.image_glob("Front_Door"), "Front_Door_*.jpg");
    }

    #[test]
    fn image_path_uses_the_timestamp_date_and_name() {
        let layout = Layout::new("img", "vid", "jpg");
        let ts = 1_700_000_400;
        let path = layout.image_path("cam", 10, ts);

        assert!(path.starts_with(layout.image_dir("cam", 10, local_date(ts))));
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("cam_1700000400.jpg"));
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("a/b/cam_1.jpg")),
            PathBuf::from("a/b/cam_1.jpg.part")
        );
    }
}
