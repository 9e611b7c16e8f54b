//! Image preprocessing for the similarity model.
//!
//! Decodes an image, resizes it to the fixed model resolution with a
//! bilinear filter and scales every channel from [0, 255] to [0, 1].

use crate::types::{ImageTensor, INPUT_SIZE};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array3;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Load the image at `path` and convert it into a normalized model input.
pub fn preprocess(path: &Path) -> Result<ImageTensor, DecodeError> {
    if !path.is_file() {
        return Err(DecodeError::NotFound(path.to_path_buf()));
    }

    let decoded = image::open(path).map_err(|source| DecodeError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(preprocess_image(&decoded.to_rgb8()))
}

/// Resize an in-memory RGB image and normalize it to [0, 1].
pub fn preprocess_image(image: &RgbImage) -> ImageTensor {
    let size = INPUT_SIZE as u32;
    let resized = if image.dimensions() == (size, size) {
        image.clone()
    } else {
        image::imageops::resize(image, size, size, FilterType::Triangle)
    };

    let tensor = Array3::from_shape_fn((INPUT_SIZE, INPUT_SIZE, 3), |(y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    ImageTensor(tensor)
}
