//! CSV export of parsed software records.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, TimeZone};

use crate::core::models::SoftwareRecord;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

const HEADER: &str = "Name,Version,Build Hash";

/// `deadline_software_YYYYMMDD_HHMMSS.csv` for the given moment.
pub fn default_export_filename<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("deadline_software_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Write `records` with a header row. Every field is quoted.
pub fn write_csv(path: &Path, records: &[SoftwareRecord]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    write_records(&mut writer, records).map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}

pub fn write_records<W: Write>(writer: &mut W, records: &[SoftwareRecord]) -> std::io::Result<()> {
    writeln!(writer, "{}", HEADER)?;
    for record in records {
        writeln!(
            writer,
            "{},{},{}",
            quote(&record.name),
            quote(&record.version),
            quote(&record.build_hash)
        )?;
    }
    Ok(())
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(name: &str, version: &str, build_hash: &str) -> SoftwareRecord {
        SoftwareRecord {
            name: name.to_string(),
            version: version.to_string(),
            build_hash: build_hash.to_string(),
        }
    }

    #[test]
    fn header_and_quoted_rows() {
        let mut out = Vec::new();
        write_records(
            &mut out,
            &[record("zlib", "1.2.13", "h5eee18b_1"), record("odd\"name", "1.0", "")],
        )
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Name,Version,Build Hash\n\"zlib\",\"1.2.13\",\"h5eee18b_1\"\n\"odd\"\"name\",\"1.0\",\"\"\n"
        );
    }

    #[test]
    fn writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &[record("foo", "1.0", "abc123")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let err = write_csv(&dir.path().join("nope").join("out.csv"), &[]).unwrap_err();
        assert!(err.to_string().contains("out.csv"));
    }

    #[test]
    fn filename_uses_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 12, 6, 11, 27, 34).unwrap();
        assert_eq!(
            default_export_filename(&now),
            "deadline_software_20251206_112734.csv"
        );
    }
}
