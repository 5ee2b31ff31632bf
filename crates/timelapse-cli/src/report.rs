use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;
use timelapse_core::timelapse::{format_duration, format_file_size};
use timelapse_core::{AssemblyReport, Camera, CapacityReport, CaptureOutcome, CaptureStatus, VideoStatus};

use crate::OutputFormat;

pub fn emit<T: Serialize + ?Sized>(value: &T, format: OutputFormat, render: fn(&T) -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Human => print!("{}", render(value)),
    }
    Ok(())
}

pub fn render_cameras(cameras: &[Camera]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Cameras ({}) ===", cameras.len());
    for camera in cameras {
        let _ = writeln!(
            out,
            "{:<24} {:<26} {:<10} {:<3} {}",
            camera.name,
            camera.id,
            if camera.is_connected() { "connected" } else { "offline" },
            if camera.supports_high_quality { "HD" } else { "SD" },
            camera.model
        );
    }
    out
}

pub fn render_outcomes(outcomes: &[CaptureOutcome]) -> String {
    let mut out = String::new();
    let ok = outcomes.iter().filter(|o| o.is_success()).count();
    let _ = writeln!(out, "=== Capture: {ok}/{} successful ===", outcomes.len());
    for o in outcomes {
        let status = match &o.status {
            CaptureStatus::Captured => "ok".to_string(),
            CaptureStatus::Reused { from_interval } => format!("reused from {from_interval}s"),
            CaptureStatus::Failed { reason } => format!("FAILED: {reason}"),
            CaptureStatus::Skipped => "skipped (not connected)".to_string(),
            CaptureStatus::Cancelled => "cancelled".to_string(),
        };
        let _ = write!(out, "{:<24} {:<28} {:>6.2}s", o.camera, status, o.elapsed.as_secs_f64());
        if let Some(path) = &o.path {
            let _ = write!(out, "  {}", path.display());
        }
        out.push('\n');
    }
    out
}

pub fn render_capacity(r: &CapacityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Capacity: {} ===", if r.passed { "PASS" } else { "FAIL" });
    let _ = writeln!(out, "Cameras:              {}", r.camera_count);
    let _ = writeln!(out, "Intervals:            {:?}", r.intervals);
    let _ = writeln!(
        out,
        "Rate limit:           {} req/s upstream, {} effective",
        r.upstream_rate_limit, r.effective_rate_limit
    );
    let _ = writeln!(out, "Simultaneous:         {}", r.max_simultaneous_intervals);
    let _ = writeln!(
        out,
        "Concurrency:          {} ({:?})",
        r.effective_concurrent_limit, r.concurrency_mode
    );
    let _ = writeln!(out, "Naive peak:           {}", r.naive_peak_load);
    if r.distribution_active {
        let _ = writeln!(
            out,
            "Distribution:         {} slots every {}s, up to {} cameras per slot",
            r.slot_count, r.offset_seconds, r.max_cameras_per_slot
        );
    } else {
        let _ = writeln!(out, "Distribution:         off");
    }
    let _ = writeln!(out, "Projected peak:       {}", r.projected_peak_per_slot);
    for warning in &r.warnings {
        let _ = writeln!(out, "Warning:              {warning}");
    }
    out
}

pub fn render_assembly(r: &AssemblyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "=== Videos for {}: {} created, {} failed, {} skipped ===",
        r.date, r.successful, r.failed, r.skipped
    );
    for v in &r.videos {
        let detail = match &v.status {
            VideoStatus::Created { size } => {
                format!("created {} in {}", format_file_size(*size), format_duration(v.elapsed))
            }
            VideoStatus::Skipped { reason } => format!("skipped: {reason}"),
            VideoStatus::Failed { reason } => format!("FAILED: {reason}"),
        };
        let _ = writeln!(out, "{:<24} {:>5}s  {}", v.camera, v.interval, detail);
    }
    out
}
