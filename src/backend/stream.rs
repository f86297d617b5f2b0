//! # Tool Output Streaming
//!
//! Runs an imaging tool and hands its combined stdout/stderr to a callback
//! one logical line at a time, as the bytes arrive.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use crossbeam_channel::{Sender, unbounded};
use tracing::{error, warn};

use crate::constants::{OUTPUT_READ_BUFFER, SENTINEL_EXIT_STATUS};
use crate::parser::LineAssembler;

/// Run `program` to completion and return its exit status.
///
/// Launch failures and signal terminations report [`SENTINEL_EXIT_STATUS`].
pub fn run_tool(program: &Path, args: &[String], on_line: &mut dyn FnMut(&str)) -> i32 {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            error!("failed to launch {}: {err}", program.display());
            return SENTINEL_EXIT_STATUS;
        }
    };

    let (tx, rx) = unbounded::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, tx.clone()));
    }
    drop(tx);

    for line in rx {
        on_line(&line);
    }
    for reader in readers {
        let _ = reader.join();
    }

    match child.wait() {
        Ok(status) => status.code().unwrap_or_else(|| {
            warn!("{} terminated by signal", program.display());
            SENTINEL_EXIT_STATUS
        }),
        Err(err) => {
            error!("failed to wait for {}: {err}", program.display());
            SENTINEL_EXIT_STATUS
        }
    }
}

/// Reads whatever is available rather than waiting for newlines, so
/// in-place progress redraws are seen as soon as the tool writes them.
fn spawn_reader<R: Read + Send + 'static>(mut source: R, tx: Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut assembler = LineAssembler::default();
        let mut buf = [0u8; OUTPUT_READ_BUFFER];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in assembler.push(&buf[..n]) {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("tool output read error: {err}");
                    break;
                }
            }
        }
        if let Some(line) = assembler.finish() {
            let _ = tx.send(line);
        }
    })
}

/// Command line as a single string, for audit logging only.
pub fn command_line(program: &Path, args: &[String]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}
