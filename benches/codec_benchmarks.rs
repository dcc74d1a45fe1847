//! Codec micro-benchmarks for mariadb-wire
//!
//! These benchmarks need no server; they measure the hot paths of the wire
//! codec:
//! - Length-encoded integer decoding
//! - Packet framing and reassembly
//! - Binary row decoding
//! - Batch chunk planning
//! - Client-side placeholder scanning
//!
//! Run with: cargo bench --bench codec_benchmarks

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mariadb_wire::protocol::codec::{decode_lenenc_int, encode_lenenc_int};
use mariadb_wire::protocol::constants::column_type;
use mariadb_wire::protocol::packet::{take_message, write_packets};
use mariadb_wire::protocol::ColumnDefinition;
use mariadb_wire::statement::{batch, scan_placeholders};
use mariadb_wire::Row;
use std::sync::Arc;

// ============================================================================
// Primitive Benchmarks
// ============================================================================

fn lenenc_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("lenenc");

    for value in [10u64, 1_000, 100_000, 10_000_000_000] {
        let mut buf = BytesMut::new();
        encode_lenenc_int(&mut buf, value);
        let encoded = buf.freeze();
        group.bench_with_input(BenchmarkId::new("decode", value), &encoded, |b, encoded| {
            b.iter(|| decode_lenenc_int(black_box(encoded), 0))
        });
    }

    group.finish();
}

// ============================================================================
// Framing Benchmarks
// ============================================================================

fn framing_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    for size in [64usize, 4096, 1 << 20, 20 << 20] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("write", size), &payload, |b, payload| {
            let mut buf = BytesMut::with_capacity(size + 64);
            b.iter(|| {
                buf.clear();
                let mut sequence = 0u8;
                write_packets(&mut buf, black_box(payload), &mut sequence);
            })
        });

        let mut framed = BytesMut::new();
        let mut sequence = 0u8;
        write_packets(&mut framed, &payload, &mut sequence);
        let framed = framed.freeze();
        group.bench_with_input(BenchmarkId::new("reassemble", size), &framed, |b, framed| {
            b.iter(|| {
                let mut buf = BytesMut::from(&framed[..]);
                let mut sequence = 0u8;
                take_message(&mut buf, &mut sequence)
            })
        });
    }

    group.finish();
}

// ============================================================================
// Row Decoding Benchmarks
// ============================================================================

fn column(col_type: u8) -> ColumnDefinition {
    ColumnDefinition {
        column_type: col_type,
        character_set: 45,
        ..Default::default()
    }
}

fn binary_row_payload() -> (Bytes, Arc<[ColumnDefinition]>) {
    let columns: Arc<[ColumnDefinition]> = vec![
        column(column_type::LONGLONG),
        column(column_type::VAR_STRING),
        column(column_type::DOUBLE),
        column(column_type::DATETIME),
        column(column_type::VAR_STRING),
    ]
    .into();

    // Last column NULL: bit 4 + offset 2
    let mut row = vec![0x00, 0x40];
    row.extend_from_slice(&42i64.to_le_bytes());
    row.push(11);
    row.extend_from_slice(b"hello world");
    row.extend_from_slice(&3.25f64.to_le_bytes());
    row.push(7);
    row.extend_from_slice(&2024u16.to_le_bytes());
    row.extend_from_slice(&[6, 30, 12, 0, 0]);
    (Bytes::from(row), columns)
}

fn row_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("rows");
    let (payload, columns) = binary_row_payload();

    group.bench_function("binary_decode", |b| {
        b.iter(|| {
            let row = Row::binary(payload.clone(), Arc::clone(&columns)).unwrap();
            for i in 0..row.len() {
                black_box(row.raw(i).unwrap());
            }
        })
    });

    group.finish();
}

// ============================================================================
// Statement Benchmarks
// ============================================================================

fn statement_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("statements");

    for rows in [100usize, 10_000] {
        let sizes: Vec<Option<usize>> = (0..rows).map(|i| Some(20 + i % 50)).collect();
        group.bench_with_input(BenchmarkId::new("batch_plan", rows), &sizes, |b, sizes| {
            b.iter(|| batch::plan(black_box(sizes), 11, 64 * 1024))
        });
    }

    let sql = "SELECT a, 'it''s ?', `q?` FROM t /* ? */ WHERE x = ? AND y IN (?, ?, ?) -- ?\nAND z = ?";
    group.bench_function("scan_placeholders", |b| {
        b.iter(|| scan_placeholders(black_box(sql), false))
    });

    group.finish();
}

criterion_group!(
    benches,
    lenenc_benchmarks,
    framing_benchmarks,
    row_benchmarks,
    statement_benchmarks
);
criterion_main!(benches);
