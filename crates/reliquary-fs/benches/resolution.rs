//! Benchmarks for path resolution and the stream data path.
//!
//! # Run Benchmarks
//!
//! ```bash
//! cargo bench --bench resolution
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use reliquary_fs::{FsBuilder, LookupOptions, MemFs, OpenFlags, Whence};
use std::hint::black_box;

fn deep_tree(depth: usize) -> (MemFs, String) {
    let path = (0..depth).fold(String::new(), |acc, i| format!("{acc}/d{i}"));
    let fs = FsBuilder::new()
        .add_file(format!("{path}/leaf"), "x", 0o644)
        .build()
        .unwrap();
    (fs, format!("{path}/leaf"))
}

/// Resolution cost as path depth grows.
fn bench_lookup_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_by_depth");

    for depth in [1, 8, 32, 128] {
        let (fs, path) = deep_tree(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &path, |b, path| {
            b.iter(|| fs.lookup_path(black_box(path), LookupOptions::default()).unwrap());
        });
    }

    group.finish();
}

/// Resolution through a chain of symlinks.
fn bench_symlink_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("symlink_chain");

    for hops in [1, 10, 40] {
        let mut builder = FsBuilder::new().add_file("/target", "x", 0o644);
        builder = builder.add_symlink("/target", "/l0");
        for i in 1..hops {
            builder = builder.add_symlink(format!("/l{}", i - 1), format!("/l{i}"));
        }
        let fs = builder.build().unwrap();
        let head = format!("/l{}", hops - 1);

        group.bench_with_input(BenchmarkId::from_parameter(hops), &head, |b, head| {
            b.iter(|| fs.lookup_path(black_box(head), LookupOptions::follow()).unwrap());
        });
    }

    group.finish();
}

/// Name index lookups in a wide directory.
fn bench_wide_directory(c: &mut Criterion) {
    let mut group = c.benchmark_group("wide_directory");

    for width in [16, 1024, 8192] {
        let mut fs = MemFs::new();
        fs.mkdir("/wide", 0o755).unwrap();
        for i in 0..width {
            fs.create(&format!("/wide/f{i}"), 0o644).unwrap();
        }
        let probe = format!("/wide/f{}", width / 2);

        group.bench_with_input(BenchmarkId::from_parameter(width), &probe, |b, probe| {
            b.iter(|| fs.exists(black_box(probe)));
        });
    }

    group.finish();
}

/// Sequential writes followed by a full read-back.
fn bench_stream_io(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_io");
    let rw = OpenFlags::from_mode_str("w+").unwrap();

    for chunk in [64usize, 4096, 65536] {
        let data = vec![0xA5u8; chunk];
        group.throughput(Throughput::Bytes((chunk * 16) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(chunk), &data, |b, data| {
            b.iter_batched(
                MemFs::new,
                |mut fs| {
                    let fd = fs.open("/blob", rw, None).unwrap();
                    for _ in 0..16 {
                        fs.write(fd, black_box(data), None).unwrap();
                    }
                    fs.llseek(fd, 0, Whence::Set).unwrap();
                    let mut buf = vec![0u8; data.len() * 16];
                    fs.read(fd, &mut buf, None).unwrap();
                    fs.close(fd).unwrap();
                    fs
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lookup_depth,
    bench_symlink_chain,
    bench_wide_directory,
    bench_stream_io
);
criterion_main!(benches);
