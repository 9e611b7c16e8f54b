//! faceid-core: gallery-based face verification engine.
//!
//! Compares a probe image against every enrolled gallery image with a
//! siamese similarity model running via ONNX Runtime, and aggregates the
//! per-pair scores into a single accept/reject decision.

pub mod bus;
pub mod config;
pub mod gallery;
pub mod model;
pub mod preprocess;
pub mod registry;
pub mod ring;
pub mod types;
pub mod verify;

pub use config::Config;
pub use gallery::Gallery;
pub use model::{ModelHandle, SimilarityModel};
pub use registry::ProtectedRegistry;
pub use ring::FrameRing;
pub use types::{ImageTensor, Outcome, Thresholds, Verification};
pub use verify::Verifier;
