//! # Checksum Engine
//!
//! SHA-512 digests for every file a carrier left in its output directory.
//! The checksum file is written under a `.part` name and renamed into place,
//! so a leftover `.part` file marks an incomplete run.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::debug;

use crate::constants::{CHECKSUM_FILE, CHECKSUM_PART_FILE, HASH_BUFFER_BYTES};

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed checksum line: {0}")]
    Malformed(String),
}

/// One `<digest> <filename>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: String,
    pub file_name: String,
}

pub fn file_sha512(path: &Path) -> Result<String, ChecksumError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; HASH_BUFFER_BYTES];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Regular files directly under `dir`, sorted by name, minus the checksum file itself.
fn checksum_inputs(dir: &Path) -> Result<Vec<(String, PathBuf)>, ChecksumError> {
    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == CHECKSUM_FILE || name == CHECKSUM_PART_FILE {
            continue;
        }
        inputs.push((name, entry.path()));
    }
    inputs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(inputs)
}

/// Write `checksums.sha512` for `dir` and return the number of files covered.
pub fn checksum_directory(dir: &Path) -> Result<usize, ChecksumError> {
    let inputs = checksum_inputs(dir)?;
    let mut entries = Vec::with_capacity(inputs.len());
    for (name, path) in inputs {
        let digest = file_sha512(&path)?;
        debug!("sha512 {name} {digest}");
        entries.push(ChecksumEntry {
            digest,
            file_name: name,
        });
    }

    let part_path = dir.join(CHECKSUM_PART_FILE);
    let mut writer = BufWriter::new(File::create(&part_path)?);
    for entry in &entries {
        writeln!(writer, "{} {}", entry.digest, entry.file_name)?;
    }
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&part_path, dir.join(CHECKSUM_FILE))?;

    Ok(entries.len())
}

pub fn read_checksum_file(dir: &Path) -> Result<Vec<ChecksumEntry>, ChecksumError> {
    let text = std::fs::read_to_string(dir.join(CHECKSUM_FILE))?;
    let mut entries = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (digest, file_name) = line
            .split_once(' ')
            .ok_or_else(|| ChecksumError::Malformed(line.to_string()))?;
        entries.push(ChecksumEntry {
            digest: digest.to_string(),
            file_name: file_name.to_string(),
        });
    }
    Ok(entries)
}

/// Re-hash every listed file; returns the names that are missing or differ.
pub fn verify_directory(dir: &Path) -> Result<Vec<String>, ChecksumError> {
    let mut mismatches = Vec::new();
    for entry in read_checksum_file(dir)? {
        let path = dir.join(&entry.file_name);
        match file_sha512(&path) {
            Ok(digest) if digest == entry.digest => {}
            Ok(_) => mismatches.push(entry.file_name),
            Err(ChecksumError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                mismatches.push(entry.file_name)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(mismatches)
}
