//! Conda package listing parser.
//!
//! Job logs mix Deadline session noise with the output of `conda list` /
//! `conda search`. Any line that looks like `name version build [extra...]`
//! becomes a [`SoftwareRecord`]; everything else is skipped. Parsing never
//! fails: the log shape is not guaranteed by the producer, so extraction is
//! best effort.

use std::sync::LazyLock;

use regex::Regex;

use super::models::SoftwareRecord;

// Either "[2025-12-03T21:49:43.773000+00:00] " or "2025/12/06 11:27:34-08:00 ".
static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[[\d\-T:+.]+\]|\d{4}/\d{2}/\d{2}\s+[\d:\-+]+)\s+")
        .expect("valid timestamp pattern")
});

static PACKAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\w.\-]+)\s+(\d[\w.]*)\s+([A-Za-z0-9_]+)(?:\s+.*)?$")
        .expect("valid package pattern")
});

/// Lowercase fragments of Deadline session output that are never packages.
const NOISE: &[&str] = &[
    "process pid",
    "exited with code",
    "retrieving logs",
    "retrieved ",
    "uploading output",
    "job attachments",
    "session session",
    "worker 0 of 0",
    "messages (0 of 0)",
];

/// Extract software records from raw log text, in line order.
pub fn parse(raw: &str) -> Vec<SoftwareRecord> {
    raw.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<SoftwareRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("---") {
        return None;
    }
    if is_table_header(trimmed) || is_noise(trimmed) {
        return None;
    }

    let body = match TIMESTAMP_PREFIX.find(trimmed) {
        Some(prefix) => &trimmed[prefix.end()..],
        None => trimmed,
    };

    let caps = PACKAGE_LINE.captures(body)?;
    Some(SoftwareRecord {
        name: caps[1].to_string(),
        version: caps[2].to_string(),
        build_hash: caps[3].to_string(),
    })
}

fn is_table_header(line: &str) -> bool {
    line.contains("Name") && line.contains("Version") && line.contains("Build")
}

fn is_noise(line: &str) -> bool {
    let lower = line.to_lowercase();
    NOISE.iter().any(|fragment| lower.contains(fragment))
}
