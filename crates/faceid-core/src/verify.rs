//! Gallery verification: one probe against every enrolled image.
//!
//! Each pair is classified against the detection threshold, and the
//! fraction of matching pairs is compared with the verification threshold.

use crate::gallery::{Gallery, GalleryError};
use crate::model::{ModelError, SimilarityModel};
use crate::preprocess::{self, DecodeError};
use crate::types::{Outcome, Thresholds, Verification};
use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("no gallery images enrolled; capture ID images first")]
    NoGalleryImages,
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to persist probe to {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
}

/// Aggregate per-pair scores into a decision.
///
/// Fails with [`VerifyError::NoGalleryImages`] when `scores` is empty.
pub fn aggregate(scores: Vec<f32>, thresholds: Thresholds) -> Result<Verification, VerifyError> {
    if scores.is_empty() {
        return Err(VerifyError::NoGalleryImages);
    }

    let gallery_size = scores.len();
    let match_count = scores.iter().filter(|&&s| s > thresholds.detection).count();
    let match_ratio = match_count as f32 / gallery_size as f32;
    let verified = match_ratio > thresholds.verification;

    Ok(Verification {
        verified,
        outcome: if verified {
            Outcome::Verified
        } else {
            Outcome::Unverified
        },
        match_count,
        gallery_size,
        match_ratio,
        scores,
    })
}

/// Runs verification attempts with a fixed model and thresholds.
pub struct Verifier<M> {
    model: M,
    thresholds: Thresholds,
    probe_path: PathBuf,
}

impl<M: SimilarityModel> Verifier<M> {
    pub fn new(model: M, thresholds: Thresholds, probe_path: impl Into<PathBuf>) -> Self {
        Self {
            model,
            thresholds,
            probe_path: probe_path.into(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn probe_path(&self) -> &Path {
        &self.probe_path
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Compare `probe` against every image in `gallery`.
    ///
    /// The probe is first written to the probe path so probe and gallery
    /// images go through the same decode path. Every gallery image is scored
    /// exactly once; any decode or model failure aborts the attempt.
    pub fn verify(&self, probe: &RgbImage, gallery: &Gallery) -> Result<Verification, VerifyError> {
        let images = gallery.images()?;
        if images.is_empty() {
            tracing::warn!(dir = %gallery.dir().display(), "verify: gallery is empty");
            return Err(VerifyError::NoGalleryImages);
        }

        self.persist_probe(probe)?;
        let probe_tensor = preprocess::preprocess(&self.probe_path)?;

        let mut scores = Vec::with_capacity(images.len());
        for path in &images {
            let reference = preprocess::preprocess(path)?;
            let score = self.model.score(&probe_tensor, &reference)?;
            tracing::debug!(image = %path.display(), score, "verify: pair scored");
            scores.push(score);
        }

        let result = aggregate(scores, self.thresholds)?;
        tracing::info!(
            verified = result.verified,
            matches = result.match_count,
            gallery = result.gallery_size,
            ratio = result.match_ratio,
            "verification complete"
        );
        Ok(result)
    }

    fn persist_probe(&self, probe: &RgbImage) -> Result<(), VerifyError> {
        let err = |reason: String| VerifyError::Probe {
            path: self.probe_path.clone(),
            reason,
        };
        if let Some(parent) = self.probe_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err(e.to_string()))?;
        }
        probe
            .save_with_format(&self.probe_path, ImageFormat::Jpeg)
            .map_err(|e| err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageTensor;
    use image::Rgb;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores bright references `bright` and dark references `dark`.
    struct ByBrightness {
        bright: f32,
        dark: f32,
        calls: AtomicUsize,
    }

    impl ByBrightness {
        fn new(bright: f32, dark: f32) -> Self {
            Self { bright, dark, calls: AtomicUsize::new(0) }
        }
    }

    impl SimilarityModel for ByBrightness {
        fn score(&self, _: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if reference.mean() > 0.5 { self.bright } else { self.dark })
        }
    }

    struct Failing;

    impl SimilarityModel for Failing {
        fn score(&self, _: &ImageTensor, _: &ImageTensor) -> Result<f32, ModelError> {
            Err(ModelError::ModelNotFound("siamese.onnx".into()))
        }
    }

    fn gallery_with(root: &Path, bright: usize, dark: usize) -> Gallery {
        let gallery = Gallery::open(root.join("verification_images")).unwrap();
        let mut frames = Vec::new();
        frames.extend((0..bright).map(|_| RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]))));
        frames.extend((0..dark).map(|_| RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]))));
        gallery.replace(&frames).unwrap();
        gallery
    }

    fn probe() -> RgbImage {
        RgbImage::from_pixel(250, 250, Rgb([90, 120, 150]))
    }

    #[test]
    fn test_three_of_four_match_is_verified() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 3, 1);
        let verifier = Verifier::new(
            ByBrightness::new(0.6, 0.4),
            Thresholds::default(),
            root.path().join("input_image/input_image.jpg"),
        );

        let result = verifier.verify(&probe(), &gallery).unwrap();
        assert_eq!(result.match_count, 3);
        assert_eq!(result.gallery_size, 4);
        assert!((result.match_ratio - 0.75).abs() < 1e-6);
        assert!(result.verified);
        assert_eq!(result.outcome, Outcome::Verified);
    }

    #[test]
    fn test_no_matches_is_unverified() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 0, 4);
        let verifier = Verifier::new(
            ByBrightness::new(0.6, 0.4),
            Thresholds::default(),
            root.path().join("probe.jpg"),
        );

        let result = verifier.verify(&probe(), &gallery).unwrap();
        assert_eq!(result.match_ratio, 0.0);
        assert!(!result.verified);
        assert_eq!(result.outcome.message(), "Unverified, please try again");
    }

    #[test]
    fn test_every_image_scored_once() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 5, 2);
        let model = ByBrightness::new(0.9, 0.1);
        let verifier = Verifier::new(model, Thresholds::default(), root.path().join("probe.jpg"));

        verifier.verify(&probe(), &gallery).unwrap();
        assert_eq!(verifier.model().calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_probe_persisted_and_overwritten() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 1, 0);
        let probe_path = root.path().join("input_image/input_image.jpg");
        let verifier = Verifier::new(ByBrightness::new(0.9, 0.1), Thresholds::default(), &probe_path);

        verifier.verify(&RgbImage::from_pixel(40, 30, Rgb([1, 2, 3])), &gallery).unwrap();
        assert_eq!(image::open(&probe_path).unwrap().width(), 40);

        verifier.verify(&RgbImage::from_pixel(64, 48, Rgb([1, 2, 3])), &gallery).unwrap();
        assert_eq!(image::open(&probe_path).unwrap().width(), 64);
    }

    #[test]
    fn test_empty_gallery_fails_fast() {
        let root = tempfile::tempdir().unwrap();
        let gallery = Gallery::open(root.path().join("empty")).unwrap();
        let model = ByBrightness::new(0.9, 0.1);
        let verifier = Verifier::new(model, Thresholds::default(), root.path().join("probe.jpg"));

        let err = verifier.verify(&probe(), &gallery).unwrap_err();
        assert!(matches!(err, VerifyError::NoGalleryImages));
        assert_eq!(verifier.model().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_undecodable_gallery_image_aborts() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 2, 0);
        std::fs::write(gallery.dir().join("verification_image_9.jpg"), b"junk").unwrap();
        let verifier = Verifier::new(
            ByBrightness::new(0.9, 0.1),
            Thresholds::default(),
            root.path().join("probe.jpg"),
        );

        let err = verifier.verify(&probe(), &gallery).unwrap_err();
        assert!(matches!(err, VerifyError::Decode(_)));
    }

    #[test]
    fn test_model_failure_aborts_attempt() {
        let root = tempfile::tempdir().unwrap();
        let gallery = gallery_with(root.path(), 1, 0);
        let verifier = Verifier::new(Failing, Thresholds::default(), root.path().join("probe.jpg"));

        let err = verifier.verify(&probe(), &gallery).unwrap_err();
        assert!(matches!(err, VerifyError::Model(_)));
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(matches!(
            aggregate(vec![], Thresholds::default()),
            Err(VerifyError::NoGalleryImages)
        ));
    }

    #[test]
    fn test_aggregate_thresholds_are_strict() {
        // Score equal to the detection threshold is not a match
        let r = aggregate(vec![0.5, 0.5], Thresholds::default()).unwrap();
        assert_eq!(r.match_count, 0);

        // Ratio equal to the verification threshold is not verified
        let r = aggregate(vec![0.9, 0.1], Thresholds::default()).unwrap();
        assert_eq!(r.match_ratio, 0.5);
        assert!(!r.verified);
    }

    proptest! {
        #[test]
        fn prop_constant_score_decision(d in 0.0f32..1.0, n in 1usize..60) {
            let r = aggregate(vec![d; n], Thresholds::default()).unwrap();
            let expected_ratio = if d > 0.5 { 1.0 } else { 0.0 };
            prop_assert_eq!(r.match_ratio, expected_ratio);
            prop_assert_eq!(r.verified, expected_ratio > 0.5);
        }

        #[test]
        fn prop_order_independent(
            scores in proptest::collection::vec(0.0f32..1.0, 1..40),
            seed in any::<u64>(),
        ) {
            let forward = aggregate(scores.clone(), Thresholds::default()).unwrap();

            let mut shuffled = scores.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
            let reordered = aggregate(shuffled, Thresholds::default()).unwrap();

            prop_assert_eq!(forward.verified, reordered.verified);
            prop_assert_eq!(forward.match_count, reordered.match_count);
            prop_assert_eq!(forward.match_ratio, reordered.match_ratio);
        }
    }
}
