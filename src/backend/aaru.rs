//! Snapshot backend: one `aaru media dump` run, judged by its error log.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backend::stream::{command_line, run_tool};
use crate::backend::{CompanionPoll, ImagingBackend, ImagingOutcome};
use crate::constants::SENTINEL_EXIT_STATUS;
use crate::parser::count_error_log_entries;

pub struct AaruBackend {
    bin: PathBuf,
    poll: CompanionPoll,
}

impl AaruBackend {
    pub fn new(bin: PathBuf, poll: CompanionPoll) -> Self {
        Self { bin, poll }
    }
}

impl ImagingBackend for AaruBackend {
    fn name(&self) -> &'static str {
        "aaru"
    }

    fn run(&self, source_device: &Path, output_dir: &Path, base_name: &str) -> ImagingOutcome {
        let image_path = output_dir.join(format!("{base_name}.img"));
        // Aaru names its error log after the output prefix (image path minus extension).
        let error_log = output_dir.join(format!("{base_name}.error.log"));

        let args = vec![
            "media".to_string(),
            "dump".to_string(),
            source_device.display().to_string(),
            image_path.display().to_string(),
        ];
        let cmd = command_line(&self.bin, &args);
        info!("aaru command: {cmd}");

        let mut exit_status = run_tool(&self.bin, &args, &mut |line| info!("aaru: {line}"));
        let mut read_error_count = 0;

        if exit_status != SENTINEL_EXIT_STATUS {
            let log_present = if exit_status == 0 {
                self.poll.wait_for(&error_log)
            } else {
                error_log.is_file()
            };
            if !log_present {
                warn!(
                    "aaru error log {} not found (status={exit_status})",
                    error_log.display()
                );
                if exit_status == 0 {
                    exit_status = SENTINEL_EXIT_STATUS;
                }
            } else {
                match std::fs::read(&error_log) {
                    Ok(bytes) => {
                        read_error_count = count_error_log_entries(&String::from_utf8_lossy(&bytes));
                    }
                    Err(err) => {
                        warn!("cannot read aaru error log {}: {err}", error_log.display());
                        if exit_status == 0 {
                            exit_status = SENTINEL_EXIT_STATUS;
                        }
                    }
                }
            }
        }

        info!("aaru status={exit_status} read_errors={read_error_count}");

        ImagingOutcome {
            backend: self.name().to_string(),
            exit_status,
            image_path,
            read_error_count,
            bad_block_count: 0,
            command_line: cmd,
        }
    }
}
