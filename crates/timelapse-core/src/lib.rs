pub mod camera;
pub mod capacity;
pub mod capture;
pub mod clock;
pub mod config;
pub mod directory;
pub mod distribution;
pub mod layout;
pub mod process;
pub mod protect;
pub mod rate;
pub mod registry;
pub mod rtsps;
pub mod scheduler;
pub mod stats;
pub mod timelapse;

#[cfg(test)]
mod test_support;

pub use camera::{Camera, CameraSource, CameraState, SourceError};
pub use capacity::CapacityReport;
pub use capture::{CaptureError, CaptureOutcome, CaptureStatus, Capturer};
pub use config::{Config, ConfigError, SourceKind};
pub use directory::CameraDirectory;
pub use distribution::{DistributionGroup, DistributionPlan, DistributionPlanner};
pub use layout::Layout;
pub use protect::ProtectApiSource;
pub use rate::RateModel;
pub use registry::{EntryState, ReuseRegistry};
pub use rtsps::RtspsSource;
pub use scheduler::{CaptureScheduler, FiringReport};
pub use stats::IntervalStats;
pub use timelapse::{AssemblyReport, VideoAssembler, VideoOutcome, VideoStatus};
