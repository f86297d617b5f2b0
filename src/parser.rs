//! # Output Stream Parser
//!
//! Turns raw imaging-tool output into logical lines and structured counters.
//! Nothing in here fails on malformed input: lines that do not parse are
//! skipped.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::MAX_PENDING_LINE_BYTES;

/// ANSI CSI sequences (cursor movement, erase line) emitted by ddrescue when it
/// redraws its status block in place.
static CONTROL_SEQUENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("control sequence regex"));

/// Reduce one raw output segment to the text a terminal would show.
///
/// Carriage returns rewrite the line in place, so only the text after the
/// last one survives.
pub fn clean_line(raw: &str) -> String {
    let stripped = CONTROL_SEQUENCE.replace_all(raw, "");
    let trimmed = stripped.trim_end_matches(['\n', '\r']);
    let visible = match trimmed.rfind('\r') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    visible
        .chars()
        .filter(|c| *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Splits a byte stream into cleaned logical lines as bytes arrive.
///
/// A line that never ends is held to [`MAX_PENDING_LINE_BYTES`]: rewrites
/// before the last carriage return go first, then the oldest bytes.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;
        while let Some(idx) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..idx]);
            self.bound();
            let raw = std::mem::take(&mut self.pending);
            let line = clean_line(&String::from_utf8_lossy(&raw));
            if !line.is_empty() {
                lines.push(line);
            }
            rest = &rest[idx + 1..];
        }
        self.pending.extend_from_slice(rest);
        self.bound();
        lines
    }

    fn bound(&mut self) {
        if self.pending.len() <= MAX_PENDING_LINE_BYTES {
            return;
        }
        // Trailing carriage returns do not hide the text before them.
        let end = self
            .pending
            .iter()
            .rposition(|&b| b != b'\r')
            .map_or(0, |i| i + 1);
        if let Some(cr) = self.pending[..end].iter().rposition(|&b| b == b'\r') {
            self.pending.drain(..=cr);
        }
        if self.pending.len() > MAX_PENDING_LINE_BYTES {
            let excess = self.pending.len() - MAX_PENDING_LINE_BYTES / 2;
            self.pending.drain(..excess);
        }
    }

    /// Flush whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = clean_line(&String::from_utf8_lossy(&raw));
        if line.is_empty() { None } else { Some(line) }
    }
}

/// Extract the read-error count from a status line.
///
/// ddrescue renamed `errors:` to `read errors:` between 1.19 and 1.22; both
/// spellings match. When a line carries several matches the last one wins.
pub fn parse_read_errors(line: &str) -> Option<u64> {
    let mut found = None;
    for item in line.split(',') {
        if let Some(idx) = item.find("errors:") {
            let value = item[idx + "errors:".len()..].trim_start();
            let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
            if let Ok(count) = digits.parse::<u64>() {
                found = Some(count);
            }
        }
    }
    found
}

/// Running state over every line a backend prints.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    read_errors: Option<u64>,
    lines_seen: u64,
}

impl ProgressTracker {
    pub fn observe(&mut self, line: &str) {
        self.lines_seen += 1;
        if let Some(count) = parse_read_errors(line) {
            self.read_errors = Some(count);
        }
    }

    /// Latest reported read-error count, zero if none was ever printed.
    pub fn read_errors(&self) -> u64 {
        self.read_errors.unwrap_or(0)
    }

    pub fn saw_error_field(&self) -> bool {
        self.read_errors.is_some()
    }

    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }
}

/// Parse a fully buffered output stream and return the final read-error count.
pub fn parse_output(output: &[u8]) -> u64 {
    let mut assembler = LineAssembler::default();
    let mut tracker = ProgressTracker::default();
    for line in assembler.push(output) {
        tracker.observe(&line);
    }
    if let Some(line) = assembler.finish() {
        tracker.observe(&line);
    }
    tracker.read_errors()
}

/// One data line of a ddrescue map file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub offset: u64,
    pub size: u64,
    pub status: char,
}

impl MapEntry {
    pub fn is_good(&self) -> bool {
        self.status == '+'
    }
}

fn parse_number(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Parse a `pos size status` map line. Comments and the current-status line
/// (`pos status pass`) yield `None`.
pub fn parse_map_line(line: &str) -> Option<MapEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut tokens = line.split_whitespace();
    let offset = parse_number(tokens.next()?)?;
    let size = parse_number(tokens.next()?)?;
    let status_token = tokens.next()?;
    let mut chars = status_token.chars();
    let status = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Some(MapEntry {
        offset,
        size,
        status,
    })
}

/// Count map entries whose status is anything but `+`.
pub fn count_bad_blocks(map_text: &str) -> u64 {
    map_text
        .lines()
        .filter_map(parse_map_line)
        .filter(|entry| !entry.is_good())
        .count() as u64
}

pub fn bad_block_count(map_path: &Path) -> std::io::Result<u64> {
    let bytes = std::fs::read(map_path)?;
    Ok(count_bad_blocks(&String::from_utf8_lossy(&bytes)))
}

/// Count the entries in a snapshot-tool error log.
///
/// The log opens with a header block terminated by the first blank line;
/// every non-empty line after it is one captured error.
pub fn count_error_log_entries(log_text: &str) -> u64 {
    let mut lines = log_text.lines();
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }
    lines.filter(|line| !line.trim().is_empty()).count() as u64
}
