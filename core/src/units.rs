use std::path::Path;
use std::time::Duration;

pub const GIB: f64 = 1_073_741_824.0;

/// Size of a file in bytes, 0 when it does not exist.
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// File size in GiB truncated to three decimals, 0 when missing.
pub fn file_size_gb(path: &Path) -> f64 {
    bytes_to_gb(file_size(path))
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / GIB * 1000.0).floor() / 1000.0
}

/// "2 hours, 5 minutes, 3 seconds"; sub-second spans print as milliseconds.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if total == 0 {
        return format!("{}ms", elapsed.as_millis());
    }
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours} hours"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} minutes"));
    }
    if seconds > 0 {
        parts.push(format!("{seconds} seconds"));
    }
    parts.join(", ")
}
