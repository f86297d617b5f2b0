//! Fixed names and limits shared across the crate.

use std::time::Duration;

/// Exit status reported when the imaging tool could not run to completion
/// (launch failure, missing companion file).
pub const SENTINEL_EXIT_STATUS: i32 = -99;

pub const MANIFEST_FILE: &str = "manifest.csv";
pub const VERSION_FILE: &str = "version.txt";
pub const FINALIZED_FILE: &str = "finalized.txt";
pub const METADATA_FILE: &str = "metadata.json";
pub const CHECKSUM_FILE: &str = "checksums.sha512";
pub const CHECKSUM_PART_FILE: &str = "checksums.sha512.part";
pub const BATCH_LOG_FILE: &str = "batch.log";

pub const MANIFEST_HEADER: [&str; 6] = [
    "jobID",
    "catalogID",
    "volumeNumber",
    "title",
    "success",
    "readErrorCount",
];

pub const HASH_BUFFER_BYTES: usize = 1024 * 1024;
pub const OUTPUT_READ_BUFFER: usize = 4096;
/// Longest unterminated output line kept while waiting for `\n`.
pub const MAX_PENDING_LINE_BYTES: usize = 8 * 1024;

/// How often the control loop checks for a finished carrier.
pub const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);
