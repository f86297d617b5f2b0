//! # Batch Controller
//!
//! Owns the open batch and the single carrier worker. Submissions are a
//! one-slot handoff: a carrier is accepted only when nothing is in flight,
//! and the caller observes its completion (via [`BatchController::poll`] or
//! [`BatchController::wait`]) before submitting the next one.
//!
//! Quit and finalize never interrupt imaging; they drain the in-flight
//! carrier first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{self, ImagingBackend};
use crate::carrier::{Carrier, CarrierRequest};
use crate::catalog::{CatalogError, CatalogLookup, CsvCatalog};
use crate::config::LoadedConfig;
use crate::constants::{FINALIZED_FILE, MANIFEST_FILE, VERSION_FILE};
use crate::device::{MediumSensor, OpenSensor};
use crate::logging::{self, BatchLogGuard};
use crate::manifest::{self, ManifestError, ManifestRecord, ManifestWriter};
use crate::pipeline::CarrierPipeline;
use crate::pipeline::events::Completion;
use crate::pipeline::workers::{CarrierWorker, spawn_carrier_worker};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("not a batch directory: {0}")]
    NotABatch(PathBuf),
    #[error("batch already finalized: {0}")]
    Finalized(PathBuf),
    #[error("another batch is already open: {0}")]
    AlreadyOpen(PathBuf),
    #[error("batch directory already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("no batch is open")]
    NoBatchOpen,
    #[error("batch halted: {0}")]
    Halted(String),
}

/// Why a carrier was not accepted. The carrier never entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no batch is open")]
    NoBatchOpen,
    #[error("carrier {0} is still being processed")]
    Busy(String),
    #[error("batch halted: {0}")]
    Halted(String),
    #[error("quit requested; no new carriers accepted")]
    ShuttingDown,
    #[error("volume number must be 1 or greater, got {0}")]
    InvalidVolume(u32),
    #[error("no title resolved: {0}")]
    NoTitle(String),
    #[error("no medium loaded in {0}")]
    NoMedium(PathBuf),
    #[error("device not ready: {0}")]
    DeviceNotReady(String),
}

/// A batch directory: version marker, manifest and one directory per carrier.
#[derive(Debug)]
pub struct Batch {
    name: String,
    dir: PathBuf,
    manifest: Arc<ManifestWriter>,
}

impl Batch {
    /// Create `<root>/<prefix>-<uuid v7>` with its version marker and manifest header.
    pub fn create(root: &Path, prefix: &str, tool_version: &str) -> Result<Self, BatchError> {
        let name = format!("{prefix}-{}", Uuid::now_v7());
        let dir = root.join(&name);
        if dir.exists() {
            return Err(BatchError::AlreadyExists(dir));
        }
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(VERSION_FILE), format!("{tool_version}\n"))?;
        let manifest = ManifestWriter::open(&dir.join(MANIFEST_FILE))?;
        info!("created batch {}", dir.display());
        Ok(Self {
            name,
            dir,
            manifest: Arc::new(manifest),
        })
    }

    /// Attach to an existing batch, repairing a manifest left by an unclean exit.
    pub fn open(dir: &Path) -> Result<Self, BatchError> {
        if !dir.is_dir() {
            return Err(BatchError::NotABatch(dir.to_path_buf()));
        }
        if is_finalized(dir) {
            return Err(BatchError::Finalized(dir.to_path_buf()));
        }
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() && !dir.join(VERSION_FILE).exists() {
            return Err(BatchError::NotABatch(dir.to_path_buf()));
        }
        let manifest = ManifestWriter::open(&manifest_path)?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.display().to_string());
        info!("opened existing batch {}", dir.display());
        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            manifest: Arc::new(manifest),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> &Path {
        self.manifest.path()
    }

    pub fn records(&self) -> Result<Vec<ManifestRecord>, BatchError> {
        Ok(manifest::read_manifest(self.manifest.path())?)
    }

    fn mark_finalized(&self) -> Result<(), BatchError> {
        std::fs::write(
            self.dir.join(FINALIZED_FILE),
            format!("{}\n", Utc::now().to_rfc3339()),
        )?;
        Ok(())
    }
}

pub fn is_finalized(dir: &Path) -> bool {
    dir.join(FINALIZED_FILE).exists()
}

/// Result of finalizing: the batch directory and the carrier drained on the way.
#[derive(Debug)]
pub struct FinalizedBatch {
    pub dir: PathBuf,
    pub drained: Option<Completion>,
}

struct Session {
    batch: Batch,
    worker: CarrierWorker,
    in_flight: Option<Carrier>,
    // Dropped last so the closing lines still reach batch.log.
    _log: Option<BatchLogGuard>,
}

pub struct BatchController {
    backend: Arc<dyn ImagingBackend>,
    sensor: Arc<dyn MediumSensor>,
    catalog: Option<Arc<dyn CatalogLookup>>,
    source_device: PathBuf,
    tool_version: String,
    config_hash: String,
    quit: Arc<AtomicBool>,
    session: Option<Session>,
    halted: Option<String>,
}

impl BatchController {
    pub fn new(
        backend: Arc<dyn ImagingBackend>,
        sensor: Arc<dyn MediumSensor>,
        source_device: &Path,
    ) -> Self {
        Self {
            backend,
            sensor,
            catalog: None,
            source_device: source_device.to_path_buf(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: String::new(),
            quit: Arc::new(AtomicBool::new(false)),
            session: None,
            halted: None,
        }
    }

    /// Controller with the configured backend, an open-device sensor and,
    /// when enabled, the CSV catalog.
    pub fn from_config(loaded: &LoadedConfig) -> Result<Self, BatchError> {
        let cfg = &loaded.config;
        let backend: Arc<dyn ImagingBackend> = Arc::from(backend::build_backend(cfg));
        let mut controller = Self::new(backend, Arc::new(OpenSensor), &cfg.source_device);
        controller.config_hash = loaded.config_hash.clone();
        if cfg.enable_catalog_lookup {
            if let Some(path) = &cfg.catalog_path {
                let catalog = CsvCatalog::load(path)?;
                info!("loaded {} catalog records from {}", catalog.len(), path.display());
                controller.catalog = Some(Arc::new(catalog));
            }
        }
        Ok(controller)
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogLookup>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_provenance(mut self, tool_version: &str, config_hash: &str) -> Self {
        self.tool_version = tool_version.to_string();
        self.config_hash = config_hash.to_string();
        self
    }

    pub fn create_batch(&mut self, root: &Path, prefix: &str) -> Result<&Batch, BatchError> {
        self.ensure_no_batch()?;
        let batch = Batch::create(root, prefix, &self.tool_version)?;
        Ok(self.attach(batch))
    }

    pub fn open_batch(&mut self, dir: &Path) -> Result<&Batch, BatchError> {
        self.ensure_no_batch()?;
        let batch = Batch::open(dir)?;
        Ok(self.attach(batch))
    }

    fn ensure_no_batch(&self) -> Result<(), BatchError> {
        match &self.session {
            Some(session) => Err(BatchError::AlreadyOpen(session.batch.dir.clone())),
            None => Ok(()),
        }
    }

    fn attach(&mut self, batch: Batch) -> &Batch {
        let pipeline = CarrierPipeline::new(
            self.backend.clone(),
            batch.manifest.clone(),
            &batch.dir,
            &self.tool_version,
            &self.config_hash,
        );
        let log = match logging::attach_batch_log(&batch.dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!("cannot open batch log in {}: {e}", batch.dir.display());
                None
            }
        };
        info!("attached batch {} (tool {})", batch.name, self.tool_version);
        let worker = spawn_carrier_worker(pipeline);
        self.halted = None;
        let session = self.session.insert(Session {
            batch,
            worker,
            in_flight: None,
            _log: log,
        });
        &session.batch
    }

    pub fn batch(&self) -> Option<&Batch> {
        self.session.as_ref().map(|s| &s.batch)
    }

    pub fn in_flight(&self) -> Option<&Carrier> {
        self.session.as_ref().and_then(|s| s.in_flight.as_ref())
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight().is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn source_device(&self) -> &Path {
        &self.source_device
    }

    pub fn medium_loaded(&self) -> bool {
        self.sensor.medium_loaded(&self.source_device)
    }

    /// Shared flag for signal handlers. Setting it stops new submissions only.
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Accept one carrier for imaging, or say why not.
    pub fn submit(&mut self, request: &CarrierRequest) -> Result<Carrier, Rejection> {
        if self.quit_requested() {
            return Err(Rejection::ShuttingDown);
        }
        if let Some(reason) = &self.halted {
            return Err(Rejection::Halted(reason.clone()));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(Rejection::NoBatchOpen);
        };
        if let Some(current) = &session.in_flight {
            return Err(Rejection::Busy(current.job_id.clone()));
        }

        let carrier = request.resolve(self.catalog.as_deref(), &self.source_device)?;

        if !self.sensor.medium_loaded(&self.source_device) {
            return Err(Rejection::NoMedium(self.source_device.clone()));
        }
        self.backend
            .prepare_device(&self.source_device)
            .map_err(|err| Rejection::DeviceNotReady(err.to_string()))?;

        info!(
            "submitting job_id={} title={} volume={}",
            carrier.job_id, carrier.title, carrier.volume_number
        );
        if let Err(carrier) = session.worker.dispatch(carrier.clone()) {
            let reason = "carrier worker is not running".to_string();
            error!("job_id={} not dispatched: {reason}", carrier.job_id);
            self.halted = Some(reason.clone());
            return Err(Rejection::Halted(reason));
        }
        session.in_flight = Some(carrier.clone());
        Ok(carrier)
    }

    /// Non-blocking check for the in-flight carrier's completion.
    pub fn poll(&mut self) -> Option<Completion> {
        let session = self.session.as_mut()?;
        session.in_flight.as_ref()?;
        let result = session.worker.try_completion();
        match result {
            Ok(Some(completion)) => Some(self.observe(completion)),
            Ok(None) => None,
            Err(_) => {
                self.worker_lost();
                None
            }
        }
    }

    /// Block until the in-flight carrier completes. `None` when nothing is in flight.
    pub fn wait(&mut self) -> Option<Completion> {
        let session = self.session.as_mut()?;
        session.in_flight.as_ref()?;
        let result = session.worker.wait_completion();
        match result {
            Ok(completion) => Some(self.observe(completion)),
            Err(_) => {
                self.worker_lost();
                None
            }
        }
    }

    fn observe(&mut self, completion: Completion) -> Completion {
        if let Some(session) = self.session.as_mut() {
            session.in_flight = None;
        }
        match &completion {
            Completion::Finished(report) => {
                info!("{}", report.narrative());
            }
            Completion::Fatal { job_id, error } => {
                error!("batch halted after job_id={job_id}: {error}");
                self.halted = Some(error.clone());
            }
        }
        completion
    }

    fn worker_lost(&mut self) {
        let job_id = self
            .session
            .as_mut()
            .and_then(|s| s.in_flight.take())
            .map(|c| c.job_id)
            .unwrap_or_default();
        error!("carrier worker exited while processing job_id={job_id}");
        self.halted = Some(format!("carrier worker exited while processing {job_id}"));
    }

    /// Drain the in-flight carrier, then mark the batch finalized and close it.
    pub fn finalize(&mut self) -> Result<FinalizedBatch, BatchError> {
        if self.session.is_none() {
            return Err(BatchError::NoBatchOpen);
        }
        if self.is_busy() {
            info!("waiting for in-flight carrier before finalizing");
        }
        let drained = self.wait();
        if let Some(reason) = &self.halted {
            return Err(BatchError::Halted(reason.clone()));
        }
        let Some(session) = self.session.take() else {
            return Err(BatchError::NoBatchOpen);
        };
        session.batch.mark_finalized()?;
        session.worker.stop();
        info!("finalized batch {}", session.batch.dir.display());
        Ok(FinalizedBatch {
            dir: session.batch.dir,
            drained,
        })
    }

    /// Drain the in-flight carrier and detach from the batch without
    /// finalizing it; the batch can be reopened later.
    pub fn close(&mut self) -> Option<Completion> {
        let drained = self.wait();
        let halted = self.halted.take();
        if let Some(session) = self.session.take() {
            session.worker.stop();
            if let Some(reason) = halted {
                warn!("closed halted batch: {reason}");
            }
            info!("closed batch {}", session.batch.dir.display());
        }
        drained
    }
}

impl Drop for BatchController {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.close();
        }
    }
}
