//! Benchmarks for decoder performance.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Cursor;
use tpcdaq_core::encode::{CardBuilder, CrateBuilder, NevisEventBuilder, RecordBuilder};
use tpcdaq_core::{
    DecoderConfig, EventRecord, EventSource, Expand, Granularity, NevisDecoder, UbdaqOptions,
    UbdaqReader, WordReader,
};

fn nevis_benchmark(c: &mut Criterion) {
    // 100 events of 64 channels x 3000 samples
    let samples: Vec<u16> = (0..3000).map(|i| (i % 4096) as u16).collect();
    let mut data = Vec::new();
    for event in 0..100 {
        let mut builder = NevisEventBuilder::new(1, event);
        for channel in 0..64 {
            builder = builder.channel(channel, &samples);
        }
        data.extend(builder.encode());
    }

    let mut group = c.benchmark_group("nevis");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("synthetic_100_events", |b| {
        b.iter(|| {
            let mut decoder = NevisDecoder::new(DecoderConfig::default());
            let mut reader = WordReader::new(Cursor::new(black_box(&data)));
            let mut digits = 0;
            while !reader.at_end().unwrap() {
                digits += decoder.decode_event(&mut reader).unwrap().digits.len();
            }
            black_box(digits)
        })
    });

    group.finish();
}

fn synthetic_record(event: u32) -> RecordBuilder {
    let samples: Vec<u16> = (0..4000).map(|i| (i % 4096) as u16).collect();
    let mut record = RecordBuilder::new(1, event).seconds(event);
    for crate_number in 1..=2 {
        let mut block = CrateBuilder::new(crate_number);
        for module in 0..8 {
            let mut card = CardBuilder::new(module);
            for channel in 0..64 {
                card = card.channel(channel, samples.clone());
            }
            block = block.card(card);
        }
        record = record.crate_block(block);
    }
    record
}

fn ubdaq_benchmark(c: &mut Criterion) {
    let record = synthetic_record(1).encode();
    let stream: Vec<u8> = (1..=10).flat_map(|e| synthetic_record(e).encode()).collect();

    let mut group = c.benchmark_group("ubdaq");

    group.throughput(Throughput::Bytes(record.len() as u64));
    group.bench_function("expand_crate_only", |b| {
        b.iter(|| {
            let mut parsed = EventRecord::from_bytes(black_box(&record)).unwrap();
            parsed.expand(Granularity::Crate).unwrap();
            black_box(parsed.consumed_bytes())
        })
    });
    group.bench_function("expand_channel", |b| {
        b.iter(|| {
            let mut parsed = EventRecord::from_bytes(black_box(&record)).unwrap();
            parsed.expand(Granularity::Channel).unwrap();
            black_box(parsed.channel_count())
        })
    });

    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("reader_10_events", |b| {
        b.iter(|| {
            let mut reader = UbdaqReader::new(
                WordReader::new(Cursor::new(black_box(&stream))),
                UbdaqOptions::default(),
            );
            let mut digits = 0;
            while let Some(event) = reader.next_event().unwrap() {
                digits += event.digit_count();
            }
            black_box(digits)
        })
    });

    group.finish();
}

criterion_group!(benches, nevis_benchmark, ubdaq_benchmark);
criterion_main!(benches);
