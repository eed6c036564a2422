//! Rendering of an agent's metrics snapshot into the first prompt.
//!
//! The block is deterministic: fields always appear in the same order, absent
//! values render as `unknown`, percentages and sizes are rounded to whole numbers.

use crate::store::MetricsSnapshot;
use std::fmt::Write;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

fn text_or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("unknown")
}

fn number_or_unknown(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "unknown".to_string(),
    }
}

fn whole_gb(bytes: u64) -> i64 {
    (bytes as f64 / BYTES_PER_GB).round() as i64
}

pub fn render_system_info(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::from("System Information:\n");

    // Writing into a String cannot fail.
    let _ = writeln!(out, "- Hostname: {}", text_or_unknown(snapshot.hostname.as_deref()));
    let _ = writeln!(
        out,
        "- OS: {} (kernel {})",
        text_or_unknown(snapshot.os_info.as_deref()),
        text_or_unknown(snapshot.kernel_version.as_deref())
    );
    let _ = writeln!(out, "- CPU Usage: {}%", number_or_unknown(snapshot.cpu_percent, 1));

    let memory = match (snapshot.memory_used_mb, snapshot.memory_total_mb) {
        (Some(used), Some(total)) if total > 0.0 => format!(
            "{:.0} MB / {:.0} MB ({}%)",
            used,
            total,
            (used / total * 100.0).round() as i64
        ),
        (used, total) => format!(
            "{} MB / {} MB",
            number_or_unknown(used, 0),
            number_or_unknown(total, 0)
        ),
    };
    let _ = writeln!(out, "- Memory: {}", memory);

    let _ = writeln!(
        out,
        "- Load Average: {} (1m), {} (5m), {} (15m)",
        number_or_unknown(snapshot.load_avg_1, 2),
        number_or_unknown(snapshot.load_avg_5, 2),
        number_or_unknown(snapshot.load_avg_15, 2)
    );
    let _ = writeln!(
        out,
        "- Network: {} Kbps in / {} Kbps out",
        number_or_unknown(snapshot.network_in_kbps, 1),
        number_or_unknown(snapshot.network_out_kbps, 1)
    );
    let _ = writeln!(out, "- IP Address: {}", text_or_unknown(snapshot.ip_address.as_deref()));

    if snapshot.filesystems.is_empty() {
        out.push_str("- Filesystems: none reported\n");
    } else {
        out.push_str("- Filesystems:\n");
        for fs in &snapshot.filesystems {
            let _ = writeln!(
                out,
                "  - {}: {}% used ({} GB / {} GB)",
                fs.mount_path,
                fs.usage_percent.round() as i64,
                whole_gb(fs.used_bytes),
                whole_gb(fs.total_bytes)
            );
        }
    }

    if snapshot.block_devices.is_empty() {
        out.push_str("- Block Devices: none reported\n");
    } else {
        out.push_str("- Block Devices:\n");
        for device in &snapshot.block_devices {
            let _ = write!(out, "  - {}: {} GB", device.name, whole_gb(device.size_bytes));
            if let Some(model) = device.model.as_deref().filter(|m| !m.is_empty()) {
                let _ = write!(out, " ({})", model);
            }
            out.push('\n');
        }
    }

    out
}

/// First-turn prompt: the system information block followed by the issue.
pub fn initial_prompt(snapshot: &MetricsSnapshot, issue: &str) -> String {
    format!("{}\nIssue: {}", render_system_info(snapshot), issue)
}
