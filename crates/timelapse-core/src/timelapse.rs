use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Days, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EncoderSettings, VideoConfig};
use crate::layout::{partial_path, Layout};
use crate::process;

const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VideoStatus {
    Created { size: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoOutcome {
    pub camera: String,
    pub interval: u64,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: VideoStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub date: NaiveDate,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub videos: Vec<VideoOutcome>,
}

impl AssemblyReport {
    fn new(date: NaiveDate, mut videos: Vec<VideoOutcome>) -> Self {
        videos.sort_by(|a, b| (&a.camera, a.interval).cmp(&(&b.camera, b.interval)));
        let count = |f: fn(&VideoStatus) -> bool| videos.iter().filter(|v| f(&v.status)).count();
        Self {
            date,
            successful: count(|s| matches!(s, VideoStatus::Created { .. })),
            failed: count(|s| matches!(s, VideoStatus::Failed { .. })),
            skipped: count(|s| matches!(s, VideoStatus::Skipped { .. })),
            videos,
        }
    }
}

#[derive(Clone)]
pub struct VideoAssembler {
    layout: Layout,
    intervals: Vec<u64>,
    video: VideoConfig,
    encoder: EncoderSettings,
    program: String,
    program_args: Vec<String>,
    cancel: CancellationToken,
}

impl VideoAssembler {
    pub fn new(config: &Config, cancel: CancellationToken) -> Self {
        Self {
            layout: Layout::new(
                config.image_root.clone(),
                config.video_root.clone(),
                config.fetch.image_extension.clone(),
            ),
            intervals: config.fetch.intervals.clone(),
            encoder: config.video.encoder_settings(),
            video: config.video.clone(),
            program: "ffmpeg".to_string(),
            program_args: Vec::new(),
            cancel,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_program_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn encoder_args(&self, image_dir: &Path, camera: &str, output: &Path) -> Vec<String> {
        let e = &self.encoder;
        let mut args: Vec<String> = vec![
            if self.video.overwrite { "-y" } else { "-n" }.into(),
            "-loglevel".into(),
            "error".into(),
            "-nostats".into(),
            "-framerate".into(),
            self.video.frame_rate.to_string(),
            "-pattern_type".into(),
            "glob".into(),
            "-i".into(),
            image_dir.join(self.layout.image_glob(camera)).to_string_lossy().into_owned(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            e.preset.clone(),
            "-crf".into(),
            e.crf.to_string(),
            "-pix_fmt".into(),
            e.pix_fmt.clone(),
        ];
        if e.color_settings {
            for flag in ["-color_primaries", "-color_trc", "-colorspace"] {
                args.push(flag.into());
                args.push("bt709".into());
            }
        }
        args.push("-movflags".into());
        args.push("+faststart".into());
        args.push("-f".into());
        args.push("mp4".into());
        args.push(output.to_string_lossy().into_owned());
        args
    }

    pub async fn camera_dirs(&self) -> Result<Vec<String>> {
        let root = self.layout.image_root();
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            warn!(root = %root.display(), "image root does not exist");
            return Ok(Vec::new());
        }
        let mut entries = tokio::fs::read_dir(root)
            .await
            .with_context(|| format!("reading {}", root.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn assemble_date(&self, date: NaiveDate) -> Result<AssemblyReport> {
        let started = Instant::now();
        let cameras = self.camera_dirs().await.context("listing camera image directories")?;
        info!(
            %date,
            cameras = cameras.len(),
            intervals = ?self.intervals,
            crf = self.encoder.crf,
            preset = %self.encoder.preset,
            pix_fmt = %self.encoder.pix_fmt,
            "assembling videos"
        );

        let permits = Arc::new(Semaphore::new(self.video.concurrent_creation.max(1)));
        let mut tasks = JoinSet::new();
        for camera in &cameras {
            for &interval in &self.intervals {
                let this = self.clone();
                let permits = permits.clone();
                let camera = camera.clone();
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    this.assemble_one(&camera, interval, date).await
                });
            }
        }

        let mut videos = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => videos.push(outcome),
                Err(err) => error!(error = %err, "video task aborted"),
            }
        }

        let report = AssemblyReport::new(date, videos);
        info!(
            %date,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            took = %format_duration(started.elapsed()),
            "video assembly finished"
        );
        Ok(report)
    }

    pub async fn assemble_one(&self, camera: &str, interval: u64, date: NaiveDate) -> VideoOutcome {
        let started = Instant::now();
        let image_dir = self.layout.image_dir(camera, interval, date);
        let output = self.layout.video_path(camera, interval, date);
        let outcome = |status: VideoStatus| VideoOutcome {
            camera: camera.to_string(),
            interval,
            path: output.clone(),
            status,
            elapsed: started.elapsed(),
        };

        let images = count_images(&image_dir, &self.layout, camera).await;
        if images == 0 {
            debug!(camera, interval, dir = %image_dir.display(), "no images, skipping");
            return outcome(VideoStatus::Skipped {
                reason: "no images".to_string(),
            });
        }
        if !self.video.overwrite && tokio::fs::try_exists(&output).await.unwrap_or(false) {
            info!(camera, interval, path = %output.display(), "video exists, skipping");
            return outcome(VideoStatus::Skipped {
                reason: "video exists".to_string(),
            });
        }
        if let Some(parent) = output.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return outcome(VideoStatus::Failed {
                    reason: format!("cannot create {}: {err}", parent.display()),
                });
            }
        }

        // Encode next to the output and move it into place only once complete.
        let part = partial_path(&output);
        let _ = tokio::fs::remove_file(&part).await;
        let mut command = Command::new(&self.program);
        command.args(&self.program_args);
        command.args(self.encoder_args(&image_dir, camera, &part));
        debug!(camera, interval, images, program = %self.program, "running encoder");

        let status = match process::run(command, self.video.encode_timeout, &self.cancel).await {
            Ok(out) if out.status.success() => match tokio::fs::metadata(&part).await {
                Ok(meta) if meta.len() > 0 => match tokio::fs::rename(&part, &output).await {
                    Ok(()) => VideoStatus::Created { size: meta.len() },
                    Err(err) => VideoStatus::Failed {
                        reason: format!("cannot move {} into place: {err}", part.display()),
                    },
                },
                _ => VideoStatus::Failed {
                    reason: "output missing or empty".to_string(),
                },
            },
            Ok(out) => VideoStatus::Failed {
                reason: format!("encoder exited with {}: {}", out.status, out.stderr_excerpt(200)),
            },
            Err(err) => VideoStatus::Failed { reason: err.to_string() },
        };

        if !matches!(status, VideoStatus::Created { .. }) {
            let _ = tokio::fs::remove_file(&part).await;
        }
        match &status {
            VideoStatus::Created { size } => {
                info!(
                    camera,
                    interval,
                    images,
                    took = %format_duration(started.elapsed()),
                    size = %format_file_size(*size),
                    "video created"
                );
                if self.video.delete_images_after_success {
                    if let Err(err) = remove_images(&image_dir).await {
                        warn!(camera, interval, error = %err, "failed to delete images");
                    }
                }
            }
            VideoStatus::Failed { reason } => error!(camera, interval, reason = %reason, "video failed"),
            VideoStatus::Skipped { .. } => {}
        }
        outcome(status)
    }

    pub async fn run_schedule(&self) {
        loop {
            let now = Local::now().naive_local();
            let next = next_creation(now, self.video.creation_time);
            let hours = (next - now).num_seconds() as f64 / 3600.0;
            info!(next = %next.format("%Y-%m-%d %H:%M:%S"), in_hours = %format!("{hours:.1}"), "next video assembly scheduled");

            loop {
                let Ok(remaining) = (next - Local::now().naive_local()).to_std() else {
                    break;
                };
                if remaining.is_zero() {
                    break;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(remaining.min(MAX_SLEEP_CHUNK)) => {}
                }
            }

            let today = Local::now().date_naive();
            let date = today
                .checked_sub_days(Days::new(self.video.days_ago as u64))
                .unwrap_or(today);
            if let Err(err) = self.assemble_date(date).await {
                error!(%date, error = %err, "video assembly failed");
            }
            if self.cancel.is_cancelled() {
                return;
            }
        }
    }
}

pub fn next_creation(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if now >= today {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

async fn count_images(dir: &Path, layout: &Layout, camera: &str) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let prefix = format!("{camera}_");
    let suffix = format!(".{}", layout.extension());
    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&prefix) && name.ends_with(&suffix) {
            count += 1;
        }
    }
    count
}

async fn remove_images(dir: &Path) -> Result<()> {
    tokio::fs::remove_dir_all(dir)
        .await
        .with_context(|| format!("removing {}", dir.display()))
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, minutes, secs) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
