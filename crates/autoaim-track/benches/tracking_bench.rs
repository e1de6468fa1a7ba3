//! Performance benchmarks for the tracking hot path.
//!
//! Run with: cargo bench --package autoaim-track
//!
//! Benchmarks cover:
//! - Tracking-queue push/update cycles at realistic frame cadence
//! - The spin estimator on an orbiting-plate stream
//! - The rune estimator on a constant-speed blade stream

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::f64::consts::PI;

use autoaim_core::{angles, Pose, RuneObservation, Timestamp};
use autoaim_track::{AccelTrackQueue, RuneConfig, RuneEstimator, RuneKind, SpinEstimator};

fn frame_time(frame: u32) -> Timestamp {
    Timestamp::new(10_000, 0).offset(frame as f64 * 0.02)
}

/// One plate strafing plus one plate orbiting; a busy two-target frame.
fn two_target_frame(frame: u32) -> [Pose; 2] {
    let time = frame as f64 * 0.02;
    let theta = PI * time;
    [
        Pose::new(1.0 + 0.5 * time, 0.2, 0.3, 0.1),
        Pose::new(
            3.0 - 0.25 * theta.cos(),
            -0.25 * theta.sin(),
            0.15,
            angles::align(0.0, theta),
        ),
    ]
}

fn bench_track_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("track_queue");
    for frames in [32u32, 256] {
        group.bench_with_input(
            BenchmarkId::new("push_update", frames),
            &frames,
            |b, &frames| {
                b.iter(|| {
                    let mut queue = AccelTrackQueue::default();
                    for f in 0..frames {
                        for pose in two_target_frame(f) {
                            queue.push(black_box(pose), frame_time(f));
                        }
                        queue.update(frame_time(f));
                    }
                    black_box(queue.pose_at(0.1))
                });
            },
        );
    }
    group.finish();
}

fn bench_spin_estimator(c: &mut Criterion) {
    c.bench_function("spin_estimator_100_frames", |b| {
        b.iter(|| {
            let mut spin = SpinEstimator::default();
            for f in 0..100u32 {
                let theta = PI * f as f64 * 0.02;
                let pose = Pose::new(
                    2.0 - 0.2 * theta.cos(),
                    -0.2 * theta.sin(),
                    0.1,
                    angles::align(0.0, theta),
                );
                spin.push(black_box(&pose), frame_time(f));
            }
            black_box(spin.pose_at(0.1))
        });
    });
}

fn bench_rune_estimator(c: &mut Criterion) {
    c.bench_function("rune_estimator_100_frames", |b| {
        b.iter(|| {
            let mut rune = RuneEstimator::new(RuneKind::Small, RuneConfig::default());
            for f in 0..100u32 {
                let blade = (PI / 3.0) * f as f64 * 0.02;
                let obs = RuneObservation::new(
                    0.69852 * blade.cos(),
                    5.0,
                    1.5 + 0.69852 * blade.sin(),
                    PI / 2.0,
                    angles::align(0.0, blade),
                );
                rune.push(black_box(&obs), frame_time(f));
            }
            black_box(rune.pose_at(0.2))
        });
    });
}

criterion_group!(
    benches,
    bench_track_queue,
    bench_spin_estimator,
    bench_rune_estimator
);
criterion_main!(benches);
