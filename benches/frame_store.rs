//! Benchmarks for the frame store hot path
//!
//! - publish cost with and without a watching subscriber
//! - `latest()` snapshot cost, alone and while a writer thread publishes at full speed
//! - multipart part encoding for a realistic JPEG payload

use bytes::Bytes;
use camera_driver::stream::multipart::encode_part;
use camera_driver::test_utils::tiny_jpeg;
use camera_driver::{CapturedFrame, FrameStore, PixelFormat};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ~60 KB, a typical 640x480 MJPEG frame
fn vga_payload() -> Bytes {
    let jpeg = tiny_jpeg(7);
    Bytes::from(jpeg.iter().copied().cycle().take(60 * 1024).collect::<Vec<u8>>())
}

fn bench_publish(c: &mut Criterion) {
    let payload = vga_payload();
    let mut group = c.benchmark_group("publish");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    let store = FrameStore::new();
    group.bench_function("no_subscribers", |b| {
        b.iter(|| black_box(store.publish(CapturedFrame::new(payload.clone(), PixelFormat::Mjpeg))))
    });

    let watched = FrameStore::new();
    let _rx = watched.subscribe();
    group.bench_function("one_subscriber", |b| {
        b.iter(|| black_box(watched.publish(CapturedFrame::new(payload.clone(), PixelFormat::Mjpeg))))
    });

    group.finish();
}

fn bench_latest(c: &mut Criterion) {
    let payload = vga_payload();
    let store = FrameStore::new();
    store.publish(CapturedFrame::new(payload.clone(), PixelFormat::Mjpeg));

    c.bench_function("latest_uncontended", |b| b.iter(|| black_box(store.latest())));

    let running = Arc::new(AtomicBool::new(true));
    let writer = {
        let store = store.clone();
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                store.publish(CapturedFrame::new(payload.clone(), PixelFormat::Mjpeg));
            }
        })
    };

    c.bench_function("latest_with_writer", |b| b.iter(|| black_box(store.latest())));

    running.store(false, Ordering::Relaxed);
    let _ = writer.join();
}

fn bench_encode_part(c: &mut Criterion) {
    let store = FrameStore::new();
    store.publish(CapturedFrame::new(vga_payload(), PixelFormat::Mjpeg));
    let frame = store.latest().expect("frame just published");

    let mut group = c.benchmark_group("multipart");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("encode_part", |b| b.iter(|| black_box(encode_part(black_box(&frame)))));
    group.finish();
}

criterion_group!(benches, bench_publish, bench_latest, bench_encode_part);
criterion_main!(benches);
