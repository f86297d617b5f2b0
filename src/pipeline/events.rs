//! # Pipeline Events
//!
//! Messages the carrier worker sends back to the control thread.

use super::CarrierReport;

/// Completion signal for one submitted carrier.
#[derive(Debug)]
pub enum Completion {
    /// The carrier reached its terminal state and has a manifest row.
    Finished(CarrierReport),
    /// The manifest row could not be written; the batch must stop.
    Fatal { job_id: String, error: String },
}

impl Completion {
    pub fn job_id(&self) -> &str {
        match self {
            Completion::Finished(report) => &report.carrier.job_id,
            Completion::Fatal { job_id, .. } => job_id,
        }
    }
}
