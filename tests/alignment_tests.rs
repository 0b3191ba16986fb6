//! Tests for template-to-frame alignment


use approx::assert_relative_eq;
use gaze_estimation::{
    alignment::{AlignmentEstimator, AlignmentTransform},
    config::AlignmentConfig,
    face_model::FaceTemplate,
    landmarks::{LandmarkLayout, LandmarkSet, BASE_LANDMARKS},
    Error,
};
use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng};
use test_helpers::random_affine;

fn fit(linear: &nalgebra::Matrix3<f64>, translation: &Vector3<f64>) -> AlignmentTransform {
    let template = FaceTemplate::canonical();
    let observed: Vec<_> = template
        .stable_points()
        .iter()
        .map(|p| Point3::from(linear * p.coords + translation))
        .collect();
    AlignmentEstimator::default()
        .estimate(template.stable_points(), &observed)
        .unwrap()
}

proptest! {
    #[test]
    fn prop_round_trip(
        seed in any::<u64>(),
        x in -1.0f64..1.0,
        y in -1.0f64..1.0,
        z in -1.0f64..1.0,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (linear, translation) = random_affine(&mut rng);
        let transform = fit(&linear, &translation);

        let p = Point3::new(x, y, z);
        let back = transform.to_model_point(&transform.to_image_point(&p));
        prop_assert!((back - p).norm() <= 1e-6 * p.coords.norm().max(1.0));

        let q = Point3::new(z, x, y);
        let forth = transform.to_image_point(&transform.to_model_point(&q));
        prop_assert!((forth - q).norm() <= 1e-6 * q.coords.norm().max(1.0));
    }

    #[test]
    fn prop_exact_fit_recovers_map(seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (linear, translation) = random_affine(&mut rng);
        let transform = fit(&linear, &translation);

        prop_assert!((transform.linear() - linear).norm() < 1e-8);
        prop_assert!((transform.translation() - translation).norm() < 1e-8);
        prop_assert!(transform.rms_residual() < 1e-9);
    }
}

#[test]
fn test_directions_ignore_translation() {
    let mut rng = StdRng::seed_from_u64(7);
    let (linear, translation) = random_affine(&mut rng);
    let transform = fit(&linear, &translation);

    assert_relative_eq!(transform.to_image_vector(&Vector3::zeros()), Vector3::zeros());
    assert_relative_eq!(
        transform.to_image_point(&Point3::origin()).coords,
        translation,
        epsilon = 1e-9
    );

    let v = Vector3::new(0.01, -0.02, 0.03);
    assert_relative_eq!(transform.to_image_vector(&v), linear * v, epsilon = 1e-9);
    assert_relative_eq!(transform.to_model_vector(&(linear * v)), v, epsilon = 1e-9);
}

#[test]
fn test_three_points_are_insufficient() {
    let template = FaceTemplate::canonical();
    let points = &template.stable_points()[..3];
    let result = AlignmentEstimator::default().estimate(points, points);
    assert!(matches!(result, Err(Error::InsufficientCorrespondence(_))));
}

#[test]
fn test_collinear_template_is_insufficient() {
    let template: Vec<_> = (0..6).map(|i| Point3::new(f64::from(i) * 0.01, 0.0, 0.0)).collect();
    let observed: Vec<_> = template.iter().map(|p| Point3::from(p.coords * 2.0)).collect();
    let result = AlignmentEstimator::default().estimate(&template, &observed);
    assert!(matches!(result, Err(Error::InsufficientCorrespondence(_))));
}

#[test]
fn test_coplanar_template_is_insufficient() {
    let template: Vec<_> = FaceTemplate::canonical()
        .stable_points()
        .iter()
        .map(|p| Point3::new(p.x, p.y, 0.0))
        .collect();
    let result = AlignmentEstimator::default().estimate(&template, &template);
    assert!(matches!(result, Err(Error::InsufficientCorrespondence(_))));
}

#[test]
fn test_near_coplanar_template_is_degenerate() {
    let template: Vec<_> = FaceTemplate::canonical()
        .stable_points()
        .iter()
        .enumerate()
        .map(|(i, p)| Point3::new(p.x, p.y, if i % 2 == 0 { 1e-5 } else { -1e-5 }))
        .collect();
    let result = AlignmentEstimator::default().estimate(&template, &template);
    assert!(matches!(result, Err(Error::DegenerateAlignment(_))));

    // A looser tolerance accepts the same configuration
    let loose = AlignmentEstimator::new(AlignmentConfig {
        min_condition_ratio: 1e-11,
        ..AlignmentConfig::default()
    });
    assert!(loose.estimate(&template, &template).is_ok());
}

#[test]
fn test_align_from_landmark_set() {
    let template = FaceTemplate::canonical();
    let mut rng = StdRng::seed_from_u64(11);
    let (linear, translation) = random_affine(&mut rng);

    let mut coords = vec![[0.0; 3]; 478];
    for (&idx, p) in BASE_LANDMARKS.iter().zip(template.stable_points()) {
        let q = linear * p.coords + translation;
        coords[idx] = [q.x, q.y, q.z];
    }
    let landmarks = LandmarkSet::from_coords(&coords);

    let transform = AlignmentEstimator::default()
        .align(&template, &landmarks, &LandmarkLayout::default())
        .unwrap();
    assert_relative_eq!(transform.linear(), linear, epsilon = 1e-8);
}

#[test]
fn test_align_short_landmark_set() {
    let landmarks = LandmarkSet::from_coords(&[[0.5, 0.5, 0.0]; 100]);
    let result = AlignmentEstimator::default().align(
        &FaceTemplate::canonical(),
        &landmarks,
        &LandmarkLayout::default(),
    );
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

#[test]
fn test_noisy_fit_reports_residual() {
    let template = FaceTemplate::canonical();
    let mut observed: Vec<_> = template.stable_points().iter().map(|p| Point3::from(p.coords * 2.5)).collect();
    observed[0].y += 0.01;
    observed[5].z -= 0.01;

    let transform = AlignmentEstimator::default()
        .estimate(template.stable_points(), &observed)
        .unwrap();
    assert!(transform.rms_residual() > 0.0);
    assert!(transform.rms_residual() < 0.01);
}
