//! # Pipeline Workers
//!
//! The single worker thread that runs carriers one at a time. Both channels
//! hold one message: the control thread hands over a carrier only after it
//! has observed the previous completion.

use std::thread;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use tracing::{debug, warn};

use crate::carrier::Carrier;

use super::CarrierPipeline;
use super::events::Completion;

pub struct CarrierWorker {
    job_tx: Sender<Carrier>,
    done_rx: Receiver<Completion>,
    handle: thread::JoinHandle<()>,
}

/// The worker thread exited (panicked) without reporting a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerGone;

/// Spawn the carrier worker thread
pub fn spawn_carrier_worker(pipeline: CarrierPipeline) -> CarrierWorker {
    let (job_tx, job_rx) = bounded::<Carrier>(1);
    let (done_tx, done_rx) = bounded::<Completion>(1);

    let handle = thread::spawn(move || {
        for carrier in job_rx {
            let job_id = carrier.job_id.clone();
            let completion = match pipeline.process(carrier) {
                Ok(report) => Completion::Finished(report),
                Err(err) => Completion::Fatal {
                    job_id,
                    error: err.to_string(),
                },
            };
            if let Err(err) = done_tx.send(completion) {
                warn!("completion channel closed: {err}");
                break;
            }
        }
        debug!("carrier worker exiting");
    });

    CarrierWorker {
        job_tx,
        done_rx,
        handle,
    }
}

impl CarrierWorker {
    /// Hand a carrier to the worker. Gives the carrier back if the worker is gone.
    pub fn dispatch(&self, carrier: Carrier) -> Result<(), Carrier> {
        self.job_tx.send(carrier).map_err(|err| err.into_inner())
    }

    pub fn try_completion(&self) -> Result<Option<Completion>, WorkerGone> {
        match self.done_rx.try_recv() {
            Ok(completion) => Ok(Some(completion)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerGone),
        }
    }

    /// Block until the in-flight carrier completes.
    pub fn wait_completion(&self) -> Result<Completion, WorkerGone> {
        self.done_rx.recv().map_err(|_| WorkerGone)
    }

    /// Close the job channel and join the thread.
    pub fn stop(self) {
        let CarrierWorker {
            job_tx,
            done_rx,
            handle,
        } = self;
        drop(job_tx);
        if handle.join().is_err() {
            warn!("carrier worker panicked");
        }
        drop(done_rx);
    }
}
