//! Global tracing setup: stderr for the operator, plus `batch.log` inside the
//! open batch so each carrier's narrative outlives the process.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::constants::BATCH_LOG_FILE;

/// Currently attached batch log, tagged with the guard generation that owns it.
static BATCH_LOG: Lazy<Mutex<Option<(u64, File)>>> = Lazy::new(|| Mutex::new(None));
static GENERATION: AtomicU64 = AtomicU64::new(0);

fn batch_log() -> MutexGuard<'static, Option<(u64, File)>> {
    BATCH_LOG.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writer handed to the file layer. Discards output while no batch is attached.
pub struct BatchLogSink;

impl Write for BatchLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match batch_log().as_mut() {
            Some((_, file)) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match batch_log().as_mut() {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }
}

fn batch_log_sink() -> BatchLogSink {
    BatchLogSink
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
/// Calling it again is a no-op.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(batch_log_sink);
    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let _ = if json {
        registry
            .with(fmt::layer().json().with_target(false).with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
    };
}

/// Keeps `batch.log` attached; dropping it detaches and syncs the file.
#[derive(Debug)]
pub struct BatchLogGuard {
    generation: u64,
    path: PathBuf,
}

impl BatchLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BatchLogGuard {
    fn drop(&mut self) {
        let mut slot = batch_log();
        if matches!(slot.as_ref(), Some((generation, _)) if *generation == self.generation) {
            if let Some((_, file)) = slot.take() {
                let _ = file.sync_all();
            }
        }
    }
}

/// Append log output to `<dir>/batch.log` until the guard is dropped.
/// Attaching again replaces the previous file.
pub fn attach_batch_log(dir: &Path) -> io::Result<BatchLogGuard> {
    let path = dir.join(BATCH_LOG_FILE);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    *batch_log() = Some((generation, file));
    Ok(BatchLogGuard { generation, path })
}

