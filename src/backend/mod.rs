//! # Imaging Backends
//!
//! One implementation per external tool family. The backend is chosen once
//! from configuration and used for every carrier in the session.

pub mod aaru;
pub mod ddrescue;
pub mod stream;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{BackendKind, Config};
use crate::constants::SENTINEL_EXIT_STATUS;
use crate::device::DeviceError;

/// Result of one backend invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ImagingOutcome {
    pub backend: String,
    pub exit_status: i32,
    pub image_path: PathBuf,
    pub read_error_count: u64,
    pub bad_block_count: u64,
    pub command_line: String,
}

impl ImagingOutcome {
    /// Same predicate for every backend: clean exit, no read errors, no bad blocks.
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0 && self.read_error_count == 0 && self.bad_block_count == 0
    }

    /// The tool never produced a usable result (launch failure, missing companion file).
    pub fn is_infrastructure_failure(&self) -> bool {
        self.exit_status == SENTINEL_EXIT_STATUS
    }

    /// Human-readable reason for a failed outcome.
    pub fn failure_reason(&self) -> Option<String> {
        if self.succeeded() {
            return None;
        }
        if self.is_infrastructure_failure() {
            return Some(format!("{} did not run to completion", self.backend));
        }
        let mut reasons = Vec::new();
        if self.exit_status != 0 {
            reasons.push(format!("exit status {}", self.exit_status));
        }
        if self.read_error_count > 0 {
            reasons.push(format!("{} read errors", self.read_error_count));
        }
        if self.bad_block_count > 0 {
            reasons.push(format!("{} bad blocks", self.bad_block_count));
        }
        Some(format!("{} reported {}", self.backend, reasons.join(", ")))
    }
}

/// Bounded wait for a file the tool may finish writing after it exits.
#[derive(Debug, Clone, Copy)]
pub struct CompanionPoll {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl CompanionPoll {
    /// Returns `false` once `max_wait` has passed without the file appearing.
    pub fn wait_for(&self, path: &Path) -> bool {
        let started = Instant::now();
        loop {
            if path.is_file() {
                return true;
            }
            if started.elapsed() >= self.max_wait {
                return false;
            }
            thread::sleep(self.interval);
        }
    }
}

/// An external imaging tool family.
pub trait ImagingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Make the device ready for imaging. Runs before the carrier is accepted;
    /// an error rejects the submission.
    fn prepare_device(&self, _device: &Path) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Image `source_device` into `output_dir`, naming outputs after `base_name`.
    /// Never fails: problems are reported through the outcome.
    fn run(&self, source_device: &Path, output_dir: &Path, base_name: &str) -> ImagingOutcome;
}

pub fn build_backend(cfg: &Config) -> Box<dyn ImagingBackend> {
    match cfg.backend {
        BackendKind::Aaru => Box::new(aaru::AaruBackend::new(
            cfg.aaru_bin.clone(),
            cfg.companion_poll(),
        )),
        BackendKind::Ddrescue => Box::new(ddrescue::DdrescueBackend {
            bin: cfg.ddrescue_bin.clone(),
            umount_bin: cfg.umount_bin.clone(),
            mount_table: cfg.mount_table.clone(),
            block_size: cfg.block_size,
            retries: cfg.retries,
            poll: cfg.companion_poll(),
        }),
    }
}
