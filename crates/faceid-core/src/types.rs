use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Side length of the square model input.
pub const INPUT_SIZE: usize = 100;

/// Normalized model input: `INPUT_SIZE × INPUT_SIZE × 3`, values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(pub Array3<f32>);

impl ImageTensor {
    /// Mean over all channels and pixels.
    pub fn mean(&self) -> f32 {
        self.0.mean().unwrap_or(0.0)
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }
}

/// The two cutoffs of the decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Per-pair cutoff: a pair is a match when its score exceeds this.
    pub detection: f32,
    /// Cutoff on the fraction of matching pairs.
    pub verification: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            detection: 0.5,
            verification: 0.5,
        }
    }
}

/// Final outcome of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Verified,
    Unverified,
}

impl Outcome {
    /// Message shown to the user for this outcome.
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Verified => "Verified",
            Outcome::Unverified => "Unverified, please try again",
        }
    }
}

/// Result of comparing one probe against a whole gallery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    pub outcome: Outcome,
    /// Pairs whose score exceeded the detection threshold.
    pub match_count: usize,
    pub gallery_size: usize,
    /// `match_count / gallery_size`.
    pub match_ratio: f32,
    /// Raw per-pair scores in gallery enumeration order.
    pub scores: Vec<f32>,
}
