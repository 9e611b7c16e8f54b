//! Siamese similarity model via ONNX Runtime.
//!
//! The network takes two normalized `1×100×100×3` images and returns a single
//! score. The verification engine treats it as an opaque pure function.

use crate::types::{ImageTensor, INPUT_SIZE};
use ndarray::Axis;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

const SIAMESE_INPUT_SHAPE: [usize; 3] = [INPUT_SIZE, INPUT_SIZE, 3];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}; export the siamese network to ONNX and set FACEID_MODEL_PATH")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unexpected input shape {0:?}")]
    BadInput(Vec<usize>),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scores how alike two preprocessed images are.
pub trait SimilarityModel {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError>;
}

impl<M: SimilarityModel + ?Sized> SimilarityModel for Arc<M> {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        (**self).score(probe, reference)
    }
}

/// Two-input siamese network loaded into an ONNX Runtime session.
pub struct SiameseModel {
    session: Mutex<Session>,
}

impl SiameseModel {
    /// Load the siamese ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded siamese model"
        );

        if session.inputs().len() != 2 {
            return Err(ModelError::InferenceFailed(format!(
                "siamese model requires 2 inputs (probe, reference), got {}",
                session.inputs().len()
            )));
        }

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl SimilarityModel for SiameseModel {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        for t in [probe, reference] {
            if t.shape() != SIAMESE_INPUT_SHAPE {
                return Err(ModelError::BadInput(t.shape().to_vec()));
            }
        }

        // NHWC with a batch of one
        let probe = probe.0.view().insert_axis(Axis(0));
        let reference = reference.0.view().insert_axis(Axis(0));

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceFailed("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![
            TensorRef::from_array_view(probe)?,
            TensorRef::from_array_view(reference)?
        ])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("score extraction: {e}")))?;

        raw.first()
            .copied()
            .ok_or_else(|| ModelError::InferenceFailed("model returned an empty tensor".into()))
    }
}

/// Process-wide handle to the siamese model.
///
/// The session is loaded on first use and shared read-only afterwards. A
/// failed load is reported to that caller and attempted again next time.
pub struct ModelHandle {
    path: PathBuf,
    model: OnceLock<SiameseModel>,
}

impl ModelHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            model: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Return the loaded model, loading it if this is the first call.
    pub fn get(&self) -> Result<&SiameseModel, ModelError> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let loaded = SiameseModel::load(&self.path)?;
        Ok(self.model.get_or_init(move || loaded))
    }
}

impl SimilarityModel for ModelHandle {
    fn score(&self, probe: &ImageTensor, reference: &ImageTensor) -> Result<f32, ModelError> {
        self.get()?.score(probe, reference)
    }
}
