use mosaic_core::{GrayImage, Luma};
use mosaic_features::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn noise(w: u32, h: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(w, h, |_, _| Luma([rng.gen::<u8>()]))
}

fn crop(img: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> GrayImage {
    image::imageops::crop_imm(img, x, y, w, h).to_image()
}

fn recovered_shift(detector: &dyn FeatureDetector, a: &GrayImage, b: &GrayImage) -> (usize, Vec<(f64, f64)>) {
    let da = detector.detect_and_compute(a);
    let db = detector.detect_and_compute(b);
    let matches = match_descriptors(&db, &da);
    let shifts = matches
        .iter()
        .map(|m| {
            let ka = da.descriptors[m.train_idx].keypoint;
            let kb = db.descriptors[m.query_idx].keypoint;
            (ka.x - kb.x, ka.y - kb.y)
        })
        .collect();
    (matches.len(), shifts)
}

#[test]
fn orb_matches_recover_translation() {
    let scene = noise(260, 200, 11);
    let a = crop(&scene, 0, 0, 160, 160);
    let b = crop(&scene, 90, 25, 160, 160);

    let orb = DetectorConfig {
        max_features: 500,
        ..Default::default()
    }
    .build()
    .expect("valid config");

    let (n, shifts) = recovered_shift(orb.as_ref(), &a, &b);
    assert!(n >= 10, "only {n} matches");
    let exact = shifts.iter().filter(|s| **s == (90.0, 25.0)).count();
    assert!(exact * 10 >= n * 8, "{exact}/{n} matches agree with the true shift");
}

#[test]
fn harris_matches_recover_translation() {
    let scene = noise(260, 200, 5);
    let a = crop(&scene, 0, 0, 160, 160);
    let b = crop(&scene, 70, 10, 160, 160);

    let harris = DetectorConfig {
        kind: DetectorKind::Harris,
        max_features: 500,
        ..Default::default()
    }
    .build()
    .expect("valid config");
    assert_eq!(harris.name(), "harris");

    let (n, shifts) = recovered_shift(harris.as_ref(), &a, &b);
    assert!(n >= 10, "only {n} matches");
    let exact = shifts.iter().filter(|s| **s == (70.0, 10.0)).count();
    assert!(exact * 10 >= n * 8, "{exact}/{n} matches agree with the true shift");
}

#[test]
fn unrelated_images_rarely_match() {
    let a = noise(160, 160, 1);
    let b = noise(160, 160, 2);
    let orb = Orb::new().with_n_features(500);
    let (n, _) = recovered_shift(&orb, &a, &b);
    assert!(n < 10, "{n} spurious matches");
}

#[test]
fn invalid_config_is_rejected() {
    let cfg = DetectorConfig {
        max_features: 0,
        ..Default::default()
    };
    assert!(matches!(cfg.build(), Err(FeatureError::InvalidParameter(_))));
}
