//! # Pipeline Module
//!
//! Runs one carrier through identification, imaging, metadata capture,
//! checksumming and manifest recording. Steps always run in order; a failing
//! step only downgrades the final outcome, so every carrier that finishes
//! leaves exactly one manifest row. Only a failed manifest append is fatal.

pub mod events;
pub mod workers;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::backend::{ImagingBackend, ImagingOutcome};
use crate::carrier::Carrier;
use crate::checksum;
use crate::device::{self, DeviceInfo};
use crate::manifest::{ManifestError, ManifestRecord, ManifestWriter};
use crate::metadata::{self, CarrierMetadata};

/// Where a carrier is in its processing sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierState {
    Created,
    DeviceIdentified,
    Imaged,
    MetadataCaptured,
    Checksummed,
    Recorded,
    Done { success: bool },
}

impl fmt::Display for CarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarrierState::Created => write!(f, "created"),
            CarrierState::DeviceIdentified => write!(f, "device-identified"),
            CarrierState::Imaged => write!(f, "imaged"),
            CarrierState::MetadataCaptured => write!(f, "metadata-captured"),
            CarrierState::Checksummed => write!(f, "checksummed"),
            CarrierState::Recorded => write!(f, "recorded"),
            CarrierState::Done { success: true } => write!(f, "done(success)"),
            CarrierState::Done { success: false } => write!(f, "done(failure)"),
        }
    }
}

/// A step that did not succeed, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub state: CarrierState,
    pub reason: String,
}

/// Everything the control plane learns about a finished carrier.
#[derive(Debug, Clone)]
pub struct CarrierReport {
    pub carrier: Carrier,
    pub output_dir: PathBuf,
    pub outcome: ImagingOutcome,
    pub device: Option<DeviceInfo>,
    pub failures: Vec<StepFailure>,
    pub success: bool,
}

impl CarrierReport {
    /// One line per failed step, for the operator.
    pub fn narrative(&self) -> String {
        if self.failures.is_empty() {
            return format!("job {} imaged successfully", self.carrier.job_id);
        }
        let steps: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.state, f.reason))
            .collect();
        format!("job {} failed; {}", self.carrier.job_id, steps.join("; "))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("manifest append failed for job {job_id}: {source}")]
    Manifest {
        job_id: String,
        #[source]
        source: ManifestError,
    },
}

/// Tracks state transitions and failures for one carrier.
struct CarrierRun {
    job_id: String,
    state: CarrierState,
    failures: Vec<StepFailure>,
}

impl CarrierRun {
    fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: CarrierState::Created,
            failures: Vec::new(),
        }
    }

    fn advance(&mut self, next: CarrierState) {
        info!("job_id={} state={} -> {}", self.job_id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, state: CarrierState, reason: impl Into<String>) {
        let reason = reason.into();
        error!("job_id={} step={} failed: {}", self.job_id, state, reason);
        self.failures.push(StepFailure { state, reason });
    }

    fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CarrierPipeline {
    backend: Arc<dyn ImagingBackend>,
    manifest: Arc<ManifestWriter>,
    batch_dir: PathBuf,
    tool_version: String,
    config_hash: String,
}

impl CarrierPipeline {
    pub fn new(
        backend: Arc<dyn ImagingBackend>,
        manifest: Arc<ManifestWriter>,
        batch_dir: &Path,
        tool_version: &str,
        config_hash: &str,
    ) -> Self {
        Self {
            backend,
            manifest,
            batch_dir: batch_dir.to_path_buf(),
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
        }
    }

    /// Process one carrier to completion.
    ///
    /// Returns `Err` only when the manifest row could not be written; every
    /// other problem is folded into `CarrierReport::success`.
    pub fn process(&self, carrier: Carrier) -> Result<CarrierReport, PipelineError> {
        let started_at = Utc::now();
        let mut run = CarrierRun::new(&carrier.job_id);

        info!("### job_id={}", carrier.job_id);
        info!(
            "catalog_id={} title={} volume={}",
            carrier.catalog_id.as_deref().unwrap_or(""),
            carrier.title,
            carrier.volume_number
        );

        let output_dir = self.batch_dir.join(&carrier.job_id);
        info!("carrier directory: {}", output_dir.display());
        if let Err(err) = std::fs::create_dir_all(&output_dir) {
            run.fail(
                CarrierState::Created,
                format!("cannot create {}: {err}", output_dir.display()),
            );
        }

        let device = match device::identify(&carrier.source_device) {
            Ok(info) => {
                info!(
                    "device kind={:?} size_bytes={:?} removable={:?}",
                    info.kind, info.size_bytes, info.removable
                );
                Some(info)
            }
            Err(err) => {
                run.fail(CarrierState::DeviceIdentified, err.to_string());
                None
            }
        };
        run.advance(CarrierState::DeviceIdentified);

        info!("*** imaging with {} ***", self.backend.name());
        let outcome = self
            .backend
            .run(&carrier.source_device, &output_dir, &carrier.job_id);
        info!("{} command: {}", outcome.backend, outcome.command_line);
        if let Some(reason) = outcome.failure_reason() {
            if outcome.is_infrastructure_failure() {
                warn!("job_id={} imaging infrastructure failure", carrier.job_id);
            }
            run.fail(CarrierState::Imaged, reason);
        }
        run.advance(CarrierState::Imaged);

        let meta = CarrierMetadata {
            carrier: &carrier,
            device: device.as_ref(),
            imaging: &outcome,
            imaging_succeeded: outcome.succeeded(),
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
            started_at,
            imaged_at: Utc::now(),
        };
        if let Err(err) = metadata::write_carrier_metadata(&output_dir, &meta) {
            run.fail(CarrierState::MetadataCaptured, format!("metadata write failed: {err}"));
        }
        run.advance(CarrierState::MetadataCaptured);

        info!("*** computing checksums ***");
        match checksum::checksum_directory(&output_dir) {
            Ok(count) => info!("checksummed {count} files"),
            Err(err) => run.fail(CarrierState::Checksummed, format!("checksum file not written: {err}")),
        }
        run.advance(CarrierState::Checksummed);

        let record = ManifestRecord {
            job_id: carrier.job_id.clone(),
            catalog_id: carrier.catalog_id.clone().unwrap_or_default(),
            volume_number: carrier.volume_number,
            title: carrier.title.clone(),
            success: run.success(),
            read_error_count: outcome.read_error_count,
        };
        if let Err(source) = self.manifest.append(&record) {
            error!(
                "job_id={} manifest {} not updated: {source}",
                carrier.job_id,
                self.manifest.path().display()
            );
            return Err(PipelineError::Manifest {
                job_id: carrier.job_id,
                source,
            });
        }
        run.advance(CarrierState::Recorded);

        let success = run.success();
        run.advance(CarrierState::Done { success });
        info!("*** finished processing job_id={} success={} ***", carrier.job_id, success);

        Ok(CarrierReport {
            carrier,
            output_dir,
            outcome,
            device,
            failures: run.failures,
            success,
        })
    }
}
