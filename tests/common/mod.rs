//! Shared test infrastructure for the batch tests.
//!
//! Each test gets a scratch directory holding a fake source medium, a fake
//! imaging tool (a small shell script standing in for ddrescue or aaru), an
//! empty mount table and a batch root.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carrierlab::backend::{self, ImagingBackend};
use carrierlab::batch::BatchController;
use carrierlab::carrier::CarrierRequest;
use carrierlab::config::{self, BackendKind, Config};
use carrierlab::device::OpenSensor;

pub const MEDIUM_BYTES: usize = 4096;

// ============================================================================
// Fake tools
// ============================================================================

/// ddrescue stand-in: redraws its status block with escape sequences, reports
/// zero read errors and leaves an all-good map. Arguments are
/// `-b N -rN -v SOURCE IMAGE MAP`.
pub const DDRESCUE_CLEAN: &str = r#"
printf 'GNU ddrescue 1.27\n'
printf 'Press Ctrl-C to interrupt\n'
printf '\033[A\033[A     ipos:     4096 B, non-trimmed:        0 B,  current rate:    4096 B/s\r'
printf '     opos:     4096 B, non-scraped:        0 B,  average rate:    4096 B/s\n'
printf '  rescued:     4096 B,   bad areas:        0,        run time:          0s\n'
printf 'pct rescued:  100.00%%, read errors:        0,  remaining time:         n/a\n'
printf 'Finished\n'
cp "$5" "$6"
printf '# Mapfile. Created by GNU ddrescue version 1.27\n# current_pos  current_status  current_pass\n0x00000000     +               1\n#      pos        size  status\n0x00000000  0x00001000  +\n' > "$7"
exit 0
"#;

/// ddrescue stand-in for a scratched disc: four read errors, two bad areas.
pub const DDRESCUE_DAMAGED: &str = r#"
printf 'GNU ddrescue 1.27\n'
printf '\033[A\033[A  rescued:     2048 B,   bad areas:        1,        run time:          1s\r'
printf 'pct rescued:   50.00%%, read errors:        1,  remaining time:         n/a\n'
printf 'ddrescue: read error on sector 2\n' >&2
printf 'pct rescued:   75.00%%, read errors:        4,  remaining time:         n/a\n'
printf 'Finished\n'
cp "$5" "$6"
printf '# Mapfile\n0x00000800     -               4\n0x00000000  0x00000400  +\n0x00000400  0x00000200  -\n0x00000600  0x00000200  /\n0x00000800  0x00000800  +\n' > "$7"
exit 1
"#;

/// Clean ddrescue run that takes a while, to exercise draining.
pub const DDRESCUE_SLOW: &str = r#"
printf 'GNU ddrescue 1.27\n'
sleep 1
printf 'pct rescued:  100.00%%, read errors:        0,  remaining time:         n/a\n'
cp "$5" "$6"
printf '0x00000000  0x00001000  +\n' > "$7"
exit 0
"#;

/// ddrescue that exits without ever writing its map file.
pub const DDRESCUE_NO_MAP: &str = r#"
printf 'pct rescued:  100.00%%, read errors:        0,  remaining time:         n/a\n'
cp "$5" "$6"
exit 0
"#;

/// ddrescue that aborts on an unreadable source before writing a map.
pub const DDRESCUE_FAILED_NO_MAP: &str = r#"
printf 'GNU ddrescue 1.27\n'
printf 'ddrescue: Can'"'"'t open input file: No medium found\n' >&2
exit 2
"#;

/// aaru stand-in. Arguments are `media dump SOURCE IMAGE`; the error log sits
/// next to the image as `<base>.error.log`.
pub const AARU_TWO_ERRORS: &str = r#"
printf 'Aaru 6.0.0-alpha9\n'
cp "$3" "$4"
log="${4%.img}.error.log"
printf 'Aaru dump error log\nDevice: fake\n\nSector 16 could not be read\nSector 17 could not be read\n' > "$log"
exit 0
"#;

pub const AARU_CLEAN: &str = r#"
cp "$3" "$4"
log="${4%.img}.error.log"
printf 'Aaru dump error log\nDevice: fake\n\n' > "$log"
exit 0
"#;

/// aaru that finishes writing its error log after it has exited.
pub const AARU_LATE_LOG: &str = r#"
cp "$3" "$4"
log="${4%.img}.error.log"
( sleep 0.3; printf 'Aaru dump error log\n\n' > "$log" ) >/dev/null 2>&1 &
exit 0
"#;

pub const AARU_NO_LOG: &str = r#"
cp "$3" "$4"
exit 0
"#;

pub fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod tool");
    path
}

// ============================================================================
// Rig
// ============================================================================

pub struct Rig {
    pub temp: tempfile::TempDir,
    pub device: PathBuf,
    pub cfg: Config,
}

impl Rig {
    pub fn new(backend: BackendKind, tool_body: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let device = root.join("medium.bin");
        fs::write(&device, vec![0x5au8; MEDIUM_BYTES]).expect("write medium");
        let tool = write_tool(root, "imager", tool_body);
        let umount = write_tool(root, "umount", "exit 0\n");
        let mount_table = root.join("mounts");
        fs::write(&mount_table, "proc /proc proc rw 0 0\n").expect("write mounts");

        let mut cfg = config::load_config(None).expect("config").config;
        cfg.root_dir = root.join("batches");
        cfg.batch_prefix = "test".to_string();
        cfg.source_device = device.clone();
        cfg.backend = backend;
        cfg.aaru_bin = tool.clone();
        cfg.ddrescue_bin = tool;
        cfg.umount_bin = umount;
        cfg.mount_table = mount_table;
        cfg.companion_poll_interval_ms = 10;
        cfg.companion_max_wait_secs = 1;
        fs::create_dir_all(&cfg.root_dir).expect("batch root");

        Self { temp, device, cfg }
    }

    pub fn backend(&self) -> Arc<dyn ImagingBackend> {
        Arc::from(backend::build_backend(&self.cfg))
    }

    pub fn controller(&self) -> BatchController {
        BatchController::new(self.backend(), Arc::new(OpenSensor), &self.device)
    }

    /// Controller with a batch already created under the rig's root.
    pub fn controller_with_batch(&self) -> (BatchController, PathBuf) {
        let mut controller = self.controller();
        let dir = controller
            .create_batch(&self.cfg.root_dir, &self.cfg.batch_prefix)
            .expect("create batch")
            .dir()
            .to_path_buf();
        (controller, dir)
    }
}

pub fn titled(title: &str, volume: u32) -> CarrierRequest {
    CarrierRequest {
        catalog_id: None,
        title: Some(title.to_string()),
        volume_number: volume,
    }
}
