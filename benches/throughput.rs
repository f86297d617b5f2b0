use std::fs;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use carrierlab::checksum;
use carrierlab::parser;

/// ddrescue-style output: a status block redrawn `frames` times.
fn progress_output(frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"GNU ddrescue 1.27\nPress Ctrl-C to interrupt\n");
    for i in 0..frames {
        out.extend_from_slice(b"\x1b[A\x1b[A\x1b[A");
        out.extend_from_slice(
            format!(
                "     ipos: {:>8} kB, non-trimmed:        0 B,  current rate:   1024 kB/s\r\n\
                 pct rescued:  {:>3}.00%, read errors: {:>8},  remaining time:         n/a\n",
                i * 64,
                i % 100,
                i / 10
            )
            .as_bytes(),
        );
    }
    out
}

fn bench_parse_output(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_output");
    for frames in [100usize, 10_000] {
        let output = progress_output(frames);
        group.throughput(Throughput::Bytes(output.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frames), &output, |b, output| {
            b.iter(|| parser::parse_output(output));
        });
    }
    group.finish();
}

fn bench_checksum_directory(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let image = vec![0xa5u8; 16 * 1024 * 1024];
    fs::write(temp_dir.path().join("job.img"), &image).expect("write image");
    fs::write(temp_dir.path().join("job.map"), b"0x00000000  0x01000000  +\n").expect("write map");

    let mut group = c.benchmark_group("checksum_directory");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(image.len() as u64));
    group.bench_function("16MiB", |b| {
        b.iter(|| checksum::checksum_directory(temp_dir.path()).expect("checksum"));
    });
    group.finish();
}

criterion_group!(benches, bench_parse_output, bench_checksum_directory);
criterion_main!(benches);
