//! Plain-text rendering of progress lines and result tables.

use crate::core::models::{JobHandle, Progress, ResourceSummary, SoftwareRecord};

const HEADERS: [&str; 3] = ["Name", "Version", "Build Hash"];

pub fn submitted_line(handle: &JobHandle) -> String {
    format!(
        "Job submitted: {} (farm {}, queue {})",
        handle.job_id, handle.farm_id, handle.queue_id
    )
}

pub fn progress_line(progress: &Progress) -> String {
    format!(
        "[{:>3}%] {} {} ({} elapsed)",
        progress.percent,
        progress.job_id,
        progress_status(progress),
        format_duration(progress.elapsed.as_secs())
    )
}

fn progress_status(progress: &Progress) -> String {
    let raw = progress.raw_status.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case(progress.status.as_str()) {
        progress.status.to_string()
    } else {
        format!("{} [{}]", progress.status, raw)
    }
}

/// Left-aligned table with a header rule, one row per record.
pub fn software_table(records: &[SoftwareRecord]) -> String {
    let rows: Vec<[&str; 3]> = records
        .iter()
        .map(|r| [r.name.as_str(), r.version.as_str(), r.build_hash.as_str()])
        .collect();
    render(&HEADERS, &rows)
}

pub fn resource_table(resources: &[ResourceSummary]) -> String {
    let rows: Vec<[&str; 2]> = resources
        .iter()
        .map(|r| [r.id.as_str(), r.name.as_str()])
        .collect();
    render(&["ID", "Name"], &rows)
}

fn render<const N: usize>(headers: &[&str; N], rows: &[[&str; N]]) -> String {
    let mut widths: [usize; N] = std::array::from_fn(|i| headers[i].chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(rule.join("  ").trim_end());
    out.push('\n');
    for row in rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[&str], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
