use std::fs;

use carrierlab::checksum;
use carrierlab::constants::CHECKSUM_FILE;
use carrierlab::manifest::{ManifestError, read_manifest};
use carrierlab::parser::{self, LineAssembler, ProgressTracker};

#[test]
fn binary_noise_yields_zero_errors() {
    let mut noise = Vec::with_capacity(8192);
    let mut state: u32 = 0x1234_5678;
    for _ in 0..8192 {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        noise.push((state >> 16) as u8);
    }
    assert_eq!(parser::parse_output(&noise), 0);
}

#[test]
fn error_field_without_digits_is_ignored() {
    let output = b"read errors: 3, rate: 1\nread errors: n/a, remaining: 0\nerrors:\n";
    assert_eq!(parser::parse_output(output), 3);
}

#[test]
fn invalid_utf8_does_not_hide_later_counts() {
    let mut output = vec![0xff, 0xfe, b'\n'];
    output.extend_from_slice(b"\x1b[1Apct rescued: 10%, read errors: 7, x\n");
    output.extend_from_slice(&[0xc3, 0x28, b'\r']);
    output.extend_from_slice(b"errors: 9");
    assert_eq!(parser::parse_output(&output), 9);
}

#[test]
fn split_chunks_assemble_same_lines() {
    let text = b"alpha\r\nbe\x1b[2Kta\nread errors: 5\n";
    let whole = {
        let mut assembler = LineAssembler::default();
        assembler.push(text)
    };
    let mut assembler = LineAssembler::default();
    let mut pieces = Vec::new();
    for chunk in text.chunks(3) {
        pieces.extend(assembler.push(chunk));
    }
    pieces.extend(assembler.finish());
    assert_eq!(pieces, whole);
    assert_eq!(whole, vec!["alpha", "beta", "read errors: 5"]);

    let mut tracker = ProgressTracker::default();
    for line in &pieces {
        tracker.observe(line);
    }
    assert_eq!(tracker.read_errors(), 5);
    assert_eq!(tracker.lines_seen(), 3);
}

#[test]
fn garbage_map_lines_are_skipped() {
    let map = "\
# comment
garbage
0x10 zz -
0x0 0x200 +
0x200 0x200 -*
0x400 0x200 *
0x600
";
    assert_eq!(parser::count_bad_blocks(map), 1);
}

#[test]
fn manifest_with_bad_row_reports_row_number() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("manifest.csv");
    fs::write(
        &path,
        "jobID,catalogID,volumeNumber,title,success,readErrorCount\n\
         a,,1,T,True,0\n\
         b,,one,T,False,0\n",
    )
    .expect("write");
    match read_manifest(&path) {
        Err(ManifestError::Malformed { row, .. }) => assert_eq!(row, 2),
        other => panic!("expected malformed row error, got {other:?}"),
    }
}

#[test]
fn checksum_file_with_bad_line_is_malformed() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join(CHECKSUM_FILE), "deadbeef\n").expect("write");
    assert!(checksum::read_checksum_file(dir.path()).is_err());
}
