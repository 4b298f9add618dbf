//! Benchmarks for the hot paths of a stitch: feature extraction, descriptor
//! matching and soft compositing.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma, Rgb, RgbImage};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;
use tilemosaic::core::GridCoord;
use tilemosaic::features::{FeatureDetector, Harris, Matcher, Orb};
use tilemosaic::photo::{BlendMode, Compositor, Placement};

fn noise_gray(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::new(width, height);
    for p in img.pixels_mut() {
        *p = Luma([rng.gen()]);
    }
    img
}

fn noise_rgb(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::new(width, height);
    for p in img.pixels_mut() {
        *p = Rgb([rng.gen(), rng.gen(), rng.gen()]);
    }
    img
}

fn benchmark_feature_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_extraction");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);

    for size in [128u32, 256, 512] {
        let img = noise_gray(size, size, 7);
        let orb = Orb::new().with_n_features(500);
        let harris = Harris::new().with_max_features(500);

        group.bench_with_input(
            BenchmarkId::new("orb", format!("{}x{}", size, size)),
            &img,
            |b, img| b.iter(|| orb.detect_and_compute(black_box(img))),
        );
        group.bench_with_input(
            BenchmarkId::new("harris", format!("{}x{}", size, size)),
            &img,
            |b, img| b.iter(|| harris.detect_and_compute(black_box(img))),
        );
    }

    group.finish();
}

fn benchmark_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("descriptor_matching");
    group.sample_size(20);

    let orb = Orb::new().with_n_features(1000);
    let base = noise_gray(400, 300, 11);
    let query = orb.detect_and_compute(&image::imageops::crop_imm(&base, 0, 0, 300, 300).to_image());
    let train = orb.detect_and_compute(&image::imageops::crop_imm(&base, 100, 0, 300, 300).to_image());
    let matcher = Matcher::new();

    group.bench_function("orb_ratio_test", |b| {
        b.iter(|| matcher.match_descriptors(black_box(&query), black_box(&train)))
    });

    group.finish();
}

fn benchmark_compositing(c: &mut Criterion) {
    let mut group = c.benchmark_group("compositing");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);

    let tiles: Vec<RgbImage> = (0..4).map(|i| noise_rgb(256, 256, i)).collect();
    let placements: Vec<Placement<'_>> = tiles
        .iter()
        .enumerate()
        .map(|(i, image)| Placement {
            coord: GridCoord::new((i / 2) as i32, (i % 2) as i32),
            image,
            x: (i % 2) as i64 * 200,
            y: (i / 2) as i64 * 200,
        })
        .collect();

    for mode in [BlendMode::Hard, BlendMode::Soft] {
        let compositor = Compositor::new(mode);
        group.bench_function(format!("{mode:?}_2x2"), |b| {
            b.iter(|| compositor.composite_placements(black_box(&placements)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_feature_extraction,
    benchmark_matching,
    benchmark_compositing
);
criterion_main!(benches);
