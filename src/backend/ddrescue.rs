//! Rescue backend: ddrescue with block size and retry passes, judged by its
//! live error counter and the map file it leaves behind.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::backend::stream::{command_line, run_tool};
use crate::backend::{CompanionPoll, ImagingBackend, ImagingOutcome};
use crate::constants::SENTINEL_EXIT_STATUS;
use crate::device::{self, DeviceError};
use crate::parser::{ProgressTracker, bad_block_count};

pub struct DdrescueBackend {
    pub bin: PathBuf,
    pub umount_bin: PathBuf,
    pub mount_table: PathBuf,
    pub block_size: u64,
    pub retries: u32,
    pub poll: CompanionPoll,
}

impl DdrescueBackend {
    fn args(&self, source_device: &Path, image_path: &Path, map_path: &Path) -> Vec<String> {
        vec![
            "-b".to_string(),
            self.block_size.to_string(),
            format!("-r{}", self.retries),
            "-v".to_string(),
            source_device.display().to_string(),
            image_path.display().to_string(),
            map_path.display().to_string(),
        ]
    }
}

impl ImagingBackend for DdrescueBackend {
    fn name(&self) -> &'static str {
        "ddrescue"
    }

    /// Unmount the device and any mounted partitions once, best effort, then
    /// insist none of them is still mounted.
    fn prepare_device(&self, device: &Path) -> Result<(), DeviceError> {
        let mut targets = device::mounted_sources(&self.mount_table, device)?;
        if !targets.iter().any(|t| t.as_path() == device) {
            targets.insert(0, device.to_path_buf());
        }
        for target in &targets {
            match Command::new(&self.umount_bin).arg(target).status() {
                Ok(status) if status.success() => info!("unmounted {}", target.display()),
                Ok(status) => info!("umount {} exited with {status}", target.display()),
                Err(err) => warn!("could not run {}: {err}", self.umount_bin.display()),
            }
        }
        if let Some(still) = device::mounted_sources(&self.mount_table, device)?.first() {
            return Err(DeviceError::StillMounted(still.clone()));
        }
        Ok(())
    }

    fn run(&self, source_device: &Path, output_dir: &Path, base_name: &str) -> ImagingOutcome {
        let image_path = output_dir.join(format!("{base_name}.img"));
        let map_path = output_dir.join(format!("{base_name}.map"));
        let args = self.args(source_device, &image_path, &map_path);
        let cmd = command_line(&self.bin, &args);
        info!("ddrescue command: {cmd}");

        let mut tracker = ProgressTracker::default();
        let mut exit_status = run_tool(&self.bin, &args, &mut |line| {
            tracker.observe(line);
            info!("{line}");
        });
        let read_error_count = tracker.read_errors();
        let mut bad_blocks = 0;

        if exit_status != SENTINEL_EXIT_STATUS {
            // A failed run may never write its map; only a clean exit waits for it.
            let map_present = if exit_status == 0 {
                self.poll.wait_for(&map_path)
            } else {
                map_path.is_file()
            };
            if !map_present {
                warn!(
                    "ddrescue map file {} not found (status={exit_status})",
                    map_path.display()
                );
                if exit_status == 0 {
                    exit_status = SENTINEL_EXIT_STATUS;
                }
            } else {
                match bad_block_count(&map_path) {
                    Ok(count) => bad_blocks = count,
                    Err(err) => {
                        warn!("cannot read map file {}: {err}", map_path.display());
                        if exit_status == 0 {
                            exit_status = SENTINEL_EXIT_STATUS;
                        }
                    }
                }
            }
        }

        info!(
            "ddrescue status={exit_status} read_errors={read_error_count} bad_blocks={bad_blocks}"
        );

        ImagingOutcome {
            backend: self.name().to_string(),
            exit_status,
            image_path,
            read_error_count,
            bad_block_count: bad_blocks,
            command_line: cmd,
        }
    }
}
