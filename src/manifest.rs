//! # Batch Manifest
//!
//! CSV file with one header row and one row per processed carrier. Every
//! append opens, writes, syncs and closes the file so a row is durable before
//! the next carrier starts.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::MANIFEST_HEADER;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("malformed manifest row {row}: {reason}")]
    Malformed { row: usize, reason: String },
    #[error("manifest header {found:?} does not start with {expected:?}")]
    HeaderMismatch { found: Vec<String>, expected: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub job_id: String,
    pub catalog_id: String,
    pub volume_number: u32,
    pub title: String,
    pub success: bool,
    pub read_error_count: u64,
}

fn bool_label(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

impl ManifestRecord {
    fn to_row(&self) -> [String; 6] {
        [
            self.job_id.clone(),
            self.catalog_id.clone(),
            self.volume_number.to_string(),
            self.title.clone(),
            bool_label(self.success).to_string(),
            self.read_error_count.to_string(),
        ]
    }

    fn from_row(row: usize, record: &::csv::StringRecord) -> Result<Self, ManifestError> {
        let field = |idx: usize| -> Result<&str, ManifestError> {
            record.get(idx).ok_or_else(|| ManifestError::Malformed {
                row,
                reason: format!("missing column {}", MANIFEST_HEADER[idx]),
            })
        };
        let volume_number = field(2)?.parse().map_err(|_| ManifestError::Malformed {
            row,
            reason: format!("bad volume number {:?}", field(2).unwrap_or_default()),
        })?;
        let success = match field(4)? {
            "True" | "true" => true,
            "False" | "false" => false,
            other => {
                return Err(ManifestError::Malformed {
                    row,
                    reason: format!("bad success flag {other:?}"),
                });
            }
        };
        let read_error_count = field(5)?.parse().map_err(|_| ManifestError::Malformed {
            row,
            reason: format!("bad read error count {:?}", field(5).unwrap_or_default()),
        })?;
        Ok(Self {
            job_id: field(0)?.to_string(),
            catalog_id: field(1)?.to_string(),
            volume_number,
            title: field(3)?.to_string(),
            success,
            read_error_count,
        })
    }
}

/// Append-only writer for one batch manifest.
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    /// Attach to `path`, writing the header if the file is missing or empty
    /// and terminating a row cut short by an interrupted append.
    pub fn open(path: &Path) -> Result<Self, ManifestError> {
        let len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };

        if len == 0 {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut file);
            writer.write_record(MANIFEST_HEADER)?;
            writer.flush()?;
            drop(writer);
            file.sync_all()?;
            debug!("wrote manifest header to {}", path.display());
        } else {
            check_header(&read_header(path)?)?;
            if !ends_with_newline(path)? {
                warn!("manifest {} ends mid-row; terminating it", path.display());
                let mut file = OpenOptions::new().append(true).open(path)?;
                file.write_all(b"\n")?;
                file.sync_all()?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ManifestRecord) -> Result<(), ManifestError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut file);
        writer.write_record(record.to_row())?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        Ok(())
    }
}

fn ends_with_newline(path: &Path) -> Result<bool, ManifestError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_header(path: &Path) -> Result<::csv::StringRecord, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    Ok(reader.headers()?.clone())
}

/// The leading columns must be exactly [`MANIFEST_HEADER`]; trailing extras are allowed.
fn check_header(header: &::csv::StringRecord) -> Result<(), ManifestError> {
    let matches = header.len() >= MANIFEST_HEADER.len()
        && MANIFEST_HEADER
            .iter()
            .zip(header.iter())
            .all(|(expected, found)| *expected == found.trim());
    if matches {
        return Ok(());
    }
    Err(ManifestError::HeaderMismatch {
        found: header.iter().map(str::to_string).collect(),
        expected: MANIFEST_HEADER.iter().map(|s| s.to_string()).collect(),
    })
}

/// Read every row after the header. Extra trailing columns are ignored.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRecord>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    check_header(reader.headers()?)?;
    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row?;
        records.push(ManifestRecord::from_row(idx + 1, &row)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(job_id: &str, success: bool, read_errors: u64) -> ManifestRecord {
        ManifestRecord {
            job_id: job_id.to_string(),
            catalog_id: "123456789".to_string(),
            volume_number: 1,
            title: "Atlas, vol. 1".to_string(),
            success,
            read_error_count: read_errors,
        }
    }

    #[test]
    fn writes_header_then_rows() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        let writer = ManifestWriter::open(&path).expect("open");
        writer.append(&record("A", true, 0)).expect("append");
        writer.append(&record("B", false, 4)).expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "jobID,catalogID,volumeNumber,title,success,readErrorCount\n\
             A,123456789,1,\"Atlas, vol. 1\",True,0\n\
             B,123456789,1,\"Atlas, vol. 1\",False,4\n"
        );

        let rows = read_manifest(&path).expect("read manifest");
        assert_eq!(rows, vec![record("A", true, 0), record("B", false, 4)]);
    }

    #[test]
    fn reopening_does_not_duplicate_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        ManifestWriter::open(&path)
            .expect("open")
            .append(&record("A", true, 0))
            .expect("append");
        let writer = ManifestWriter::open(&path).expect("reopen");
        writer.append(&record("B", true, 0)).expect("append");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("jobID").count(), 1);
        assert_eq!(read_manifest(&path).expect("rows").len(), 2);
    }

    #[test]
    fn repairs_interrupted_row() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        std::fs::write(
            &path,
            "jobID,catalogID,volumeNumber,title,success,readErrorCount\nA,1,1,T,True,0",
        )
        .expect("write");
        let writer = ManifestWriter::open(&path).expect("open");
        writer.append(&record("B", true, 0)).expect("append");
        let rows = read_manifest(&path).expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].job_id, "B");
    }

    #[test]
    fn tolerates_extra_trailing_columns() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        std::fs::write(
            &path,
            "jobID,catalogID,volumeNumber,title,success,readErrorCount,badBlocks\n\
             A,,2,Floppy,False,0,3\n",
        )
        .expect("write");
        let rows = read_manifest(&path).expect("rows");
        assert_eq!(rows[0].volume_number, 2);
        assert!(!rows[0].success);
        assert_eq!(rows[0].catalog_id, "");
    }

    #[test]
    fn rejects_garbage_success_flag() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        std::fs::write(
            &path,
            "jobID,catalogID,volumeNumber,title,success,readErrorCount\nA,,1,T,maybe,0\n",
        )
        .expect("write");
        assert!(matches!(
            read_manifest(&path),
            Err(ManifestError::Malformed { row: 1, .. })
        ));
    }

    #[test]
    fn refuses_manifest_with_foreign_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        let legacy = "jobID,PPN,volumeNo,title,mediaType,deviceType,success\n\
                      j1,9,1,X,CD,optical,True\n";
        std::fs::write(&path, legacy).expect("write");

        assert!(matches!(
            ManifestWriter::open(&path),
            Err(ManifestError::HeaderMismatch { .. })
        ));
        assert!(matches!(
            read_manifest(&path),
            Err(ManifestError::HeaderMismatch { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), legacy);
    }

    #[test]
    fn refuses_truncated_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        std::fs::write(&path, "jobID,catalogID,volumeNumber\n").expect("write");
        assert!(matches!(
            ManifestWriter::open(&path),
            Err(ManifestError::HeaderMismatch { .. })
        ));
    }

    #[test]
    fn append_fails_when_manifest_is_gone() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest.csv");
        let writer = ManifestWriter::open(&path).expect("open");
        std::fs::remove_file(&path).expect("remove");
        std::fs::create_dir(&path).expect("mkdir");
        assert!(writer.append(&record("A", true, 0)).is_err());
    }
}
