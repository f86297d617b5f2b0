//! Source device inspection: identification, medium presence and mount state.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("device not found: {0}")]
    NotFound(PathBuf),
    #[error("device is still mounted: {0}")]
    StillMounted(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    BlockDevice,
    File,
    Other,
}

/// What could be learned about the source device before imaging.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub kind: DeviceKind,
    pub size_bytes: Option<u64>,
    pub removable: Option<bool>,
}

/// Reports whether readable media is currently inserted in a device.
pub trait MediumSensor: Send + Sync {
    fn medium_loaded(&self, device: &Path) -> bool;
}

/// A medium is present when the device can be opened read-only.
pub struct OpenSensor;

impl MediumSensor for OpenSensor {
    fn medium_loaded(&self, device: &Path) -> bool {
        File::open(device).is_ok()
    }
}

fn read_sys_block(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/class/block").join(device_name).join(file);
    std::fs::read_to_string(path).map(|s| s.trim().to_string())
}

pub fn identify(path: &Path) -> Result<DeviceInfo, DeviceError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(DeviceError::NotFound(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };

    if metadata.is_file() {
        return Ok(DeviceInfo {
            path: path.to_path_buf(),
            kind: DeviceKind::File,
            size_bytes: Some(metadata.len()),
            removable: None,
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if metadata.file_type().is_block_device() {
            let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            let name = canonical
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            // sysfs reports size in 512-byte sectors regardless of the device's block size.
            let size_bytes = read_sys_block(&name, "size")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|sectors| sectors.saturating_mul(512));
            let removable = read_sys_block(&name, "removable").ok().map(|s| s == "1");
            return Ok(DeviceInfo {
                path: path.to_path_buf(),
                kind: DeviceKind::BlockDevice,
                size_bytes,
                removable,
            });
        }
    }

    Ok(DeviceInfo {
        path: path.to_path_buf(),
        kind: DeviceKind::Other,
        size_bytes: None,
        removable: None,
    })
}

/// Whether `source` names a partition of `device`: `/dev/sdb1` for `/dev/sdb`,
/// `/dev/nvme0n1p2` or `/dev/mmcblk0p1` when the device name ends in a digit.
fn is_partition_of(source: &str, device: &str) -> bool {
    let Some(rest) = source.strip_prefix(device) else {
        return false;
    };
    let digits = if device.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Mount sources in a mount table (`/proc/self/mounts` format) that are the
/// device itself or one of its partitions, in table order.
///
/// A missing table means the platform has none to consult; nothing is
/// reported as mounted.
pub fn mounted_sources(mount_table: &Path, device: &Path) -> Result<Vec<PathBuf>, DeviceError> {
    let table = match std::fs::read_to_string(mount_table) {
        Ok(table) => table,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = vec![device.to_path_buf()];
    if let Ok(canonical) = std::fs::canonicalize(device) {
        if canonical != device {
            names.push(canonical);
        }
    }

    let mut found: Vec<PathBuf> = Vec::new();
    for line in table.lines() {
        let Some(source) = line.split_whitespace().next() else {
            continue;
        };
        let matches = names.iter().any(|name| {
            Path::new(source) == name.as_path()
                || name.to_str().is_some_and(|name| is_partition_of(source, name))
        });
        if matches && !found.iter().any(|f| f.as_path() == Path::new(source)) {
            found.push(PathBuf::from(source));
        }
    }
    Ok(found)
}

/// True when the device or any of its partitions appears in the mount table.
pub fn is_mounted(mount_table: &Path, device: &Path) -> Result<bool, DeviceError> {
    Ok(!mounted_sources(mount_table, device)?.is_empty())
}
