//! Runtime status snapshot: host uptime and detector flag.

use serde::Serialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub uptime_seconds: u64,
    pub detector_configured: bool,
}

/// Uptime split for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UptimeBreakdown {
    pub seconds: u64,
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
}

impl UptimeBreakdown {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds,
            days: seconds / 86_400,
            hours: (seconds % 86_400) / 3_600,
            minutes: (seconds % 3_600) / 60,
        }
    }
}

pub fn snapshot() -> DeviceStatus {
    DeviceStatus {
        uptime_seconds: read_uptime_seconds(Path::new("/proc/uptime")),
        detector_configured: detector_configured(),
    }
}

/// Host uptime in whole seconds, 0 when the source is unreadable.
fn read_uptime_seconds(path: &Path) -> u64 {
    let Ok(content) = fs::read_to_string(path) else {
        tracing::debug!(path = %path.display(), "uptime source unreadable, reporting 0");
        return 0;
    };
    content
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|s| s as u64)
        .unwrap_or(0)
}

fn detector_configured() -> bool {
    match env::var("DETECTOR_CONFIGURED") {
        Ok(value) => value == "true" || value == "1",
        Err(_) => false,
    }
}
