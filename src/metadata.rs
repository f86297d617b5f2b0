//! Per-carrier `metadata.json`: who the carrier is, what the device looked
//! like and how imaging went.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::backend::ImagingOutcome;
use crate::carrier::Carrier;
use crate::constants::METADATA_FILE;
use crate::device::DeviceInfo;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
pub struct CarrierMetadata<'a> {
    pub carrier: &'a Carrier,
    pub device: Option<&'a DeviceInfo>,
    pub imaging: &'a ImagingOutcome,
    pub imaging_succeeded: bool,
    pub tool_version: &'a str,
    pub config_hash: &'a str,
    pub started_at: DateTime<Utc>,
    pub imaged_at: DateTime<Utc>,
}

pub fn write_carrier_metadata(
    output_dir: &Path,
    metadata: &CarrierMetadata<'_>,
) -> Result<PathBuf, MetadataError> {
    let path = output_dir.join(METADATA_FILE);
    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(&mut writer, metadata)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(path)
}
