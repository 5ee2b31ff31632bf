use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "TIMELAPSE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("cannot read env file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: format!("{ENV_PREFIX}{key}"),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Rtsps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    All,
    Whitelist,
    Blacklist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    Auto,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStrategy {
    Adaptive,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReuseStrategy {
    Registry,
    Delay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtspsCamera {
    pub name: String,
    pub stream_id: String,
    #[serde(default)]
    pub intervals: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
    pub verify_ssl: bool,
    pub request_timeout: Duration,
    pub snapshot_high_quality: bool,
    pub rtsps_host: Option<String>,
    pub rtsps_port: u16,
    pub rtsps_cameras: Vec<RtspsCamera>,
}

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    pub mode: SelectionMode,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub refresh_interval: Duration,
}

impl SelectionConfig {
    pub fn accepts(&self, name: &str) -> bool {
        match self.mode {
            SelectionMode::All => true,
            SelectionMode::Whitelist => self.whitelist.iter().any(|n| n == name),
            SelectionMode::Blacklist => !self.blacklist.iter().any(|n| n == name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateConfig {
    pub upstream_limit: u32,
    pub safety_buffer: f64,
    pub concurrency_mode: ConcurrencyMode,
    pub manual_concurrent_limit: u32,
}

#[derive(Debug, Clone)]
pub struct DistributionConfig {
    pub mode: DistributionMode,
    pub strategy: DistributionStrategy,
    pub min_cameras: usize,
    pub window_seconds: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub fixed_offset: u64,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub intervals: Vec<u64>,
    pub interval_cameras: BTreeMap<u64, Vec<String>>,
    pub top_of_minute: bool,
    pub common_start: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout_percentage: f64,
    pub min_image_bytes: usize,
    pub image_extension: String,
}

impl FetchConfig {
    pub fn attempt_timeout(&self, interval: u64) -> Duration {
        let scaled = (interval as f64 * self.timeout_percentage).floor() as u64;
        let secs = scaled.min(interval.saturating_sub(1)).max(5);
        Duration::from_secs(secs)
    }

    pub fn serves(&self, interval: u64, camera_name: &str) -> bool {
        match self.interval_cameras.get(&interval) {
            Some(names) => names.iter().any(|n| n == camera_name),
            None => self.intervals.contains(&interval),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReuseConfig {
    pub enabled: bool,
    pub strategy: ReuseStrategy,
    pub delay: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub registry_window: Duration,
}

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    pub enabled: bool,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Medium,
    High,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub crf: u32,
    pub preset: String,
    pub pix_fmt: String,
    pub color_settings: bool,
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub creation_time: NaiveTime,
    pub days_ago: u32,
    pub frame_rate: u32,
    pub quality_preset: QualityPreset,
    pub custom: EncoderSettings,
    pub overwrite: bool,
    pub delete_images_after_success: bool,
    pub concurrent_creation: usize,
    pub encode_timeout: Duration,
}

impl VideoConfig {
    pub fn encoder_settings(&self) -> EncoderSettings {
        match self.quality_preset {
            QualityPreset::Medium => EncoderSettings {
                crf: 25,
                preset: "medium".to_string(),
                pix_fmt: "yuv420p".to_string(),
                color_settings: false,
            },
            QualityPreset::High => EncoderSettings {
                crf: 18,
                preset: "slow".to_string(),
                pix_fmt: "yuv444p".to_string(),
                color_settings: true,
            },
            QualityPreset::Custom => self.custom.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub selection: SelectionConfig,
    pub fetch: FetchConfig,
    pub rate: RateConfig,
    pub distribution: DistributionConfig,
    pub reuse: ReuseConfig,
    pub summary: SummaryConfig,
    pub video: VideoConfig,
    pub image_root: PathBuf,
    pub video_root: PathBuf,
    pub fetch_enabled: bool,
    pub timelapse_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                kind: SourceKind::Api,
                api_base_url: None,
                api_key: None,
                verify_ssl: false,
                request_timeout: Duration::from_secs(10),
                snapshot_high_quality: true,
                rtsps_host: None,
                rtsps_port: 7441,
                rtsps_cameras: Vec::new(),
            },
            selection: SelectionConfig {
                mode: SelectionMode::All,
                whitelist: Vec::new(),
                blacklist: Vec::new(),
                refresh_interval: Duration::from_secs(300),
            },
            fetch: FetchConfig {
                intervals: vec![60],
                interval_cameras: BTreeMap::new(),
                top_of_minute: true,
                common_start: true,
                max_retries: 3,
                retry_delay: Duration::from_secs(2),
                timeout_percentage: 0.8,
                min_image_bytes: 1000,
                image_extension: "jpg".to_string(),
            },
            rate: RateConfig {
                upstream_limit: 10,
                safety_buffer: 0.8,
                concurrency_mode: ConcurrencyMode::Auto,
                manual_concurrent_limit: 8,
            },
            distribution: DistributionConfig {
                mode: DistributionMode::Auto,
                strategy: DistributionStrategy::Adaptive,
                min_cameras: 10,
                window_seconds: 60,
                min_offset: 5,
                max_offset: 30,
                fixed_offset: 15,
            },
            reuse: ReuseConfig {
                enabled: true,
                strategy: ReuseStrategy::Registry,
                delay: Duration::from_secs(2),
                wait_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(250),
                registry_window: Duration::from_secs(300),
            },
            summary: SummaryConfig {
                enabled: true,
                interval: Duration::from_secs(3600),
            },
            video: VideoConfig {
                creation_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap_or_default(),
                days_ago: 1,
                frame_rate: 30,
                quality_preset: QualityPreset::Medium,
                custom: EncoderSettings {
                    crf: 23,
                    preset: "medium".to_string(),
                    pix_fmt: "yuv420p".to_string(),
                    color_settings: false,
                },
                overwrite: false,
                delete_images_after_success: false,
                concurrent_creation: 1,
                encode_timeout: Duration::from_secs(3600),
            },
            image_root: PathBuf::from("output/images"),
            video_root: PathBuf::from("output/videos"),
            fetch_enabled: true,
            timelapse_enabled: true,
        }
    }
}

impl Config {
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut vars = match env_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                parse_env_file(&text)
            }
            None => HashMap::new(),
        };
        vars.extend(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)));
        let config = Self::from_vars(&vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let env = Vars(vars);
        let d = Config::default();

        let rtsps_cameras: Vec<RtspsCamera> = match env.get("RTSPS_CAMERAS") {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|err| ConfigError::invalid("RTSPS_CAMERAS", &raw, err.to_string()))?,
            None => Vec::new(),
        };

        let mut intervals = match env.get("FETCH_INTERVALS") {
            Some(raw) => parse_list(&raw)
                .iter()
                .map(|v| {
                    v.parse::<u64>()
                        .map_err(|err| ConfigError::invalid("FETCH_INTERVALS", &raw, err.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let mut interval_cameras: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for cam in rtsps_cameras.iter().filter(|c| !c.intervals.is_empty()) {
            for interval in &cam.intervals {
                interval_cameras.entry(*interval).or_default().push(cam.name.clone());
            }
        }
        // Cameras without an explicit list follow every interval.
        for cam in rtsps_cameras.iter().filter(|c| c.intervals.is_empty()) {
            for names in interval_cameras.values_mut() {
                names.push(cam.name.clone());
            }
        }
        intervals.extend(interval_cameras.keys().copied());
        if intervals.is_empty() {
            intervals = d.fetch.intervals.clone();
        }
        intervals.sort_unstable();
        intervals.dedup();

        let creation_time = match env.get("CREATION_TIME") {
            Some(raw) => NaiveTime::parse_from_str(&raw, "%H:%M")
                .map_err(|err| ConfigError::invalid("CREATION_TIME", &raw, err.to_string()))?,
            None => d.video.creation_time,
        };

        Ok(Self {
            source: SourceConfig {
                kind: env.parse_enum("CAMERA_SOURCE", d.source.kind)?,
                api_base_url: env.get("API_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
                api_key: env.get("API_KEY"),
                verify_ssl: env.bool("VERIFY_SSL", d.source.verify_ssl),
                request_timeout: env.seconds("REQUEST_TIMEOUT", d.source.request_timeout)?,
                snapshot_high_quality: env.bool("SNAPSHOT_HIGH_QUALITY", d.source.snapshot_high_quality),
                rtsps_host: env.get("RTSPS_HOST"),
                rtsps_port: env.parse("RTSPS_PORT", d.source.rtsps_port)?,
                rtsps_cameras,
            },
            selection: SelectionConfig {
                mode: env.parse_enum("CAMERA_SELECTION_MODE", d.selection.mode)?,
                whitelist: env.get("CAMERA_WHITELIST").map(|v| parse_list(&v)).unwrap_or_default(),
                blacklist: env.get("CAMERA_BLACKLIST").map(|v| parse_list(&v)).unwrap_or_default(),
                refresh_interval: env.seconds("CAMERA_REFRESH_INTERVAL", d.selection.refresh_interval)?,
            },
            fetch: FetchConfig {
                intervals,
                interval_cameras,
                top_of_minute: env.bool("FETCH_TOP_OF_THE_MINUTE", d.fetch.top_of_minute),
                common_start: env.bool("FETCH_COMMON_START", d.fetch.common_start),
                max_retries: env.parse("FETCH_MAX_RETRIES", d.fetch.max_retries)?,
                retry_delay: env.seconds("FETCH_RETRY_DELAY", d.fetch.retry_delay)?,
                timeout_percentage: env.parse("FETCH_TIMEOUT_PERCENTAGE", d.fetch.timeout_percentage)?,
                min_image_bytes: env.parse("MIN_IMAGE_BYTES", d.fetch.min_image_bytes)?,
                image_extension: env
                    .get("IMAGE_EXTENSION")
                    .map(|e| e.trim_start_matches('.').to_string())
                    .unwrap_or(d.fetch.image_extension),
            },
            rate: RateConfig {
                upstream_limit: env.parse("RATE_LIMIT", d.rate.upstream_limit)?,
                safety_buffer: env.parse("RATE_LIMIT_BUFFER", d.rate.safety_buffer)?,
                concurrency_mode: env.parse_enum("CONCURRENT_LIMIT_MODE", d.rate.concurrency_mode)?,
                manual_concurrent_limit: env.parse("CONCURRENT_LIMIT", d.rate.manual_concurrent_limit)?,
            },
            distribution: DistributionConfig {
                mode: parse_distribution_mode(&env, d.distribution.mode)?,
                strategy: env.parse_enum("DISTRIBUTION_STRATEGY", d.distribution.strategy)?,
                min_cameras: env.parse("DISTRIBUTION_MIN_CAMERAS", d.distribution.min_cameras)?,
                window_seconds: env.parse("DISTRIBUTION_WINDOW_SECONDS", d.distribution.window_seconds)?,
                min_offset: env.parse("DISTRIBUTION_MIN_OFFSET", d.distribution.min_offset)?,
                max_offset: env.parse("DISTRIBUTION_MAX_OFFSET", d.distribution.max_offset)?,
                fixed_offset: env.parse("DISTRIBUTION_FIXED_OFFSET", d.distribution.fixed_offset)?,
            },
            reuse: ReuseConfig {
                enabled: env.bool("OPTIMIZE_INTERVAL_FETCHING", d.reuse.enabled),
                strategy: env.parse_enum("REUSE_STRATEGY", d.reuse.strategy)?,
                delay: env.seconds("REUSE_DELAY", d.reuse.delay)?,
                wait_timeout: env.seconds("REUSE_WAIT_TIMEOUT", d.reuse.wait_timeout)?,
                poll_interval: env.seconds("REUSE_POLL_INTERVAL", d.reuse.poll_interval)?,
                registry_window: env.seconds("REGISTRY_WINDOW", d.reuse.registry_window)?,
            },
            summary: SummaryConfig {
                enabled: env.bool("SUMMARY_ENABLED", d.summary.enabled),
                interval: env.seconds("SUMMARY_INTERVAL_SECONDS", d.summary.interval)?,
            },
            video: VideoConfig {
                creation_time,
                days_ago: env.parse("DAYS_AGO", d.video.days_ago)?,
                frame_rate: env.parse("FFMPEG_FRAME_RATE", d.video.frame_rate)?,
                quality_preset: env.parse_enum("VIDEO_QUALITY_PRESET", d.video.quality_preset)?,
                custom: EncoderSettings {
                    crf: env.parse("CUSTOM_CRF", d.video.custom.crf)?,
                    preset: env.get("CUSTOM_PRESET").unwrap_or(d.video.custom.preset),
                    pix_fmt: env.get("CUSTOM_PIX_FMT").unwrap_or(d.video.custom.pix_fmt),
                    color_settings: env.bool("CUSTOM_COLOR_SETTINGS", d.video.custom.color_settings),
                },
                overwrite: env.bool("FFMPEG_OVERWRITE_FILE", d.video.overwrite),
                delete_images_after_success: env.bool(
                    "FFMPEG_DELETE_IMAGES_AFTER_SUCCESS",
                    d.video.delete_images_after_success,
                ),
                concurrent_creation: env.parse("FFMPEG_CONCURRENT_CREATION", d.video.concurrent_creation)?,
                encode_timeout: env.seconds("FFMPEG_TIMEOUT", d.video.encode_timeout)?,
            },
            image_root: env.get("IMAGE_OUTPUT_PATH").map(PathBuf::from).unwrap_or(d.image_root),
            video_root: env.get("VIDEO_OUTPUT_PATH").map(PathBuf::from).unwrap_or(d.video_root),
            fetch_enabled: env.bool("FETCH_IMAGE_ENABLED", d.fetch_enabled),
            timelapse_enabled: env.bool("CREATE_TIMELAPSE_ENABLED", d.timelapse_enabled),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.fetch;
        if f.intervals.is_empty() {
            return Err(ConfigError::Missing(format!("{ENV_PREFIX}FETCH_INTERVALS")));
        }
        if f.intervals.contains(&0) {
            return Err(ConfigError::invalid("FETCH_INTERVALS", "0", "intervals must be positive"));
        }
        if !(f.timeout_percentage > 0.0 && f.timeout_percentage <= 1.0) {
            return Err(ConfigError::invalid(
                "FETCH_TIMEOUT_PERCENTAGE",
                f.timeout_percentage,
                "must be in (0, 1]",
            ));
        }

        let r = &self.rate;
        if r.upstream_limit == 0 {
            return Err(ConfigError::invalid("RATE_LIMIT", r.upstream_limit, "must be at least 1"));
        }
        if !(r.safety_buffer > 0.0 && r.safety_buffer <= 1.0) {
            return Err(ConfigError::invalid("RATE_LIMIT_BUFFER", r.safety_buffer, "must be in (0, 1]"));
        }
        if r.concurrency_mode == ConcurrencyMode::Manual && r.manual_concurrent_limit == 0 {
            return Err(ConfigError::invalid(
                "CONCURRENT_LIMIT",
                r.manual_concurrent_limit,
                "must be at least 1 in manual mode",
            ));
        }

        let dist = &self.distribution;
        if dist.min_offset == 0 || dist.min_offset > dist.max_offset || dist.max_offset > dist.window_seconds {
            return Err(ConfigError::invalid(
                "DISTRIBUTION_MIN_OFFSET",
                format!("{}..{} in {}", dist.min_offset, dist.max_offset, dist.window_seconds),
                "need 0 < min_offset <= max_offset <= window_seconds",
            ));
        }
        if dist.fixed_offset == 0 || dist.fixed_offset > dist.window_seconds {
            return Err(ConfigError::invalid(
                "DISTRIBUTION_FIXED_OFFSET",
                dist.fixed_offset,
                "must be in (0, window_seconds]",
            ));
        }

        if self.reuse.poll_interval.is_zero() {
            return Err(ConfigError::invalid("REUSE_POLL_INTERVAL", 0, "must be positive"));
        }
        if self.summary.enabled && self.summary.interval.is_zero() {
            return Err(ConfigError::invalid("SUMMARY_INTERVAL_SECONDS", 0, "must be positive"));
        }
        if self.video.concurrent_creation == 0 {
            return Err(ConfigError::invalid("FFMPEG_CONCURRENT_CREATION", 0, "must be at least 1"));
        }

        match self.source.kind {
            SourceKind::Api => {
                if self.source.api_base_url.is_none() {
                    return Err(ConfigError::Missing(format!("{ENV_PREFIX}API_BASE_URL")));
                }
                if self.source.api_key.is_none() {
                    return Err(ConfigError::Missing(format!("{ENV_PREFIX}API_KEY")));
                }
            }
            SourceKind::Rtsps => {
                if self.source.rtsps_host.is_none() {
                    return Err(ConfigError::Missing(format!("{ENV_PREFIX}RTSPS_HOST")));
                }
                if self.source.rtsps_cameras.is_empty() {
                    return Err(ConfigError::Missing(format!("{ENV_PREFIX}RTSPS_CAMERAS")));
                }
            }
        }

        Ok(())
    }

    pub fn smallest_interval(&self) -> u64 {
        self.fetch.intervals.first().copied().unwrap_or(60)
    }

    pub fn largest_interval(&self) -> u64 {
        self.fetch.intervals.last().copied().unwrap_or(60)
    }
}

struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.0
            .get(&format!("{ENV_PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "t" | "y" | "yes"))
            .unwrap_or(default)
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|err: T::Err| ConfigError::invalid(key, &raw, err.to_string())),
            None => Ok(default),
        }
    }

    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(raw) => {
                let secs: f64 = raw
                    .parse()
                    .map_err(|err: std::num::ParseFloatError| ConfigError::invalid(key, &raw, err.to_string()))?;
                Duration::try_from_secs_f64(secs)
                    .map_err(|err| ConfigError::invalid(key, &raw, err.to_string()))
            }
            None => Ok(default),
        }
    }

    fn parse_enum<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.get(key) {
            Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
                .map_err(|err| ConfigError::invalid(key, &raw, err.to_string())),
            None => Ok(default),
        }
    }
}

fn parse_distribution_mode(env: &Vars<'_>, default: DistributionMode) -> Result<DistributionMode, ConfigError> {
    let Some(raw) = env.get("DISTRIBUTION_ENABLED") else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "auto" => Ok(DistributionMode::Auto),
        "true" | "1" | "yes" | "on" => Ok(DistributionMode::Enabled),
        "false" | "0" | "no" | "off" => Ok(DistributionMode::Disabled),
        _ => Err(ConfigError::invalid("DISTRIBUTION_ENABLED", &raw, "expected auto, true or false")),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn parse_env_file(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.trim().to_string(), val.trim().trim_matches('"').to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect()
    }

    fn api_vars(extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map = vars(&[("API_BASE_URL", "https://nvr.local/api/"), ("API_KEY", "secret")]);
        map.extend(vars(extra));
        map
    }

    #[test]
    fn intervals_are_sorted_and_deduplicated() {
        let config = Config::from_vars(&api_vars(&[("FETCH_INTERVALS", "60, 10,60,15")])).expect("config");
        assert_eq!(config.fetch.intervals, vec![10, 15, 60]);
        assert_eq!(config.source.api_base_url.as_deref(), Some("https://nvr.local/api"));
        config.validate().expect("valid");
    }

    #[test]
    fn zero_interval_fails_validation() {
        let config = Config::from_vars(&api_vars(&[("FETCH_INTERVALS", "0,60")])).expect("config");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn api_source_requires_key() {
        let config = Config::from_vars(&vars(&[("API_BASE_URL", "https://nvr")])).expect("config");
        assert!(matches!(config.validate(), Err(ConfigError::Missing(key)) if key.ends_with("API_KEY")));
    }

    #[test]
    fn booleans_and_enums_are_case_insensitive() {
        let config = Config::from_vars(&api_vars(&[
            ("FETCH_TOP_OF_THE_MINUTE", "No"),
            ("OPTIMIZE_INTERVAL_FETCHING", "Y"),
            ("CAMERA_SELECTION_MODE", "Whitelist"),
            ("CAMERA_WHITELIST", "Front Door, Garage"),
            ("DISTRIBUTION_ENABLED", "TRUE"),
            ("REUSE_STRATEGY", "delay"),
        ]))
        .expect("config");

        assert!(!config.fetch.top_of_minute);
        assert!(config.reuse.enabled);
        assert_eq!(config.distribution.mode, DistributionMode::Enabled);
        assert_eq!(config.reuse.strategy, ReuseStrategy::Delay);
        assert!(config.selection.accepts("Garage"));
        assert!(!config.selection.accepts("Backyard"));
    }

    #[test]
    fn bad_number_reports_key() {
        let err = Config::from_vars(&api_vars(&[("RATE_LIMIT", "ten")])).expect_err("should fail");
        assert!(err.to_string().contains("TIMELAPSE_RATE_LIMIT"));
    }

    #[test]
    fn offset_bounds_are_checked() {
        let config = Config::from_vars(&api_vars(&[
            ("DISTRIBUTION_MIN_OFFSET", "40"),
            ("DISTRIBUTION_MAX_OFFSET", "20"),
        ]))
        .expect("config");
        assert!(config.validate().is_err());
    }

    #[test]
    fn rtsps_cameras_drive_interval_assignment() {
        let config = Config::from_vars(&vars(&[
            ("CAMERA_SOURCE", "rtsps"),
            ("RTSPS_HOST", "nvr.local"),
            (
                "RTSPS_CAMERAS",
                r#"[{"name":"cam-back","stream_id":"abc123","intervals":[15,60]},
                    {"name":"cam-front","stream_id":"def456","intervals":[60]}]"#,
            ),
        ]))
        .expect("config");
        config.validate().expect("valid");

        assert_eq!(config.fetch.intervals, vec![15, 60]);
        assert!(config.fetch.serves(15, "cam-back"));
        assert!(!config.fetch.serves(15, "cam-front"));
        assert!(config.fetch.serves(60, "cam-front"));
    }

    #[test]
    fn attempt_timeout_is_clamped() {
        let fetch = Config::default().fetch;
        assert_eq!(fetch.attempt_timeout(60), Duration::from_secs(48));
        assert_eq!(fetch.attempt_timeout(10), Duration::from_secs(8));
        assert_eq!(fetch.attempt_timeout(2), Duration::from_secs(5));
    }

    #[test]
    fn creation_time_must_be_hh_mm() {
        assert!(Config::from_vars(&api_vars(&[("CREATION_TIME", "25:99")])).is_err());
        let config = Config::from_vars(&api_vars(&[("CREATION_TIME", "03:30")])).expect("config");
        assert_eq!(config.video.creation_time, NaiveTime::from_hms_opt(3, 30, 0).expect("time"));
    }

    #[test]
    fn env_file_parsing_strips_quotes_and_comments() {
        let text = r#"
# comment
TIMELAPSE_API_KEY="abc def"
export TIMELAPSE_FETCH_INTERVALS=10,60
"#;
        let map = parse_env_file(text);
        assert_eq!(map["TIMELAPSE_API_KEY"], "abc def");
        assert_eq!(map["TIMELAPSE_FETCH_INTERVALS"], "10,60");
        assert_eq!(map.len(), 2);
    }
}
