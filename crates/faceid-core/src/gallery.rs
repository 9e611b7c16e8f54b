//! Gallery of enrolled reference images on disk.
//!
//! Updates are staged in a sibling directory and swapped in by rename, so an
//! interrupted update leaves either the previous or the new complete set.

use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_PREFIX: &str = "verification_image_";
const IMAGE_EXT: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write gallery image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> GalleryError + '_ {
    move |source| GalleryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// File name of the gallery image stored in buffer slot `index`.
pub fn image_file_name(index: usize) -> String {
    format!("{IMAGE_PREFIX}{index}.{IMAGE_EXT}")
}

/// Directory-backed set of reference images.
#[derive(Debug, Clone)]
pub struct Gallery {
    dir: PathBuf,
}

impl Gallery {
    /// Open the gallery at `dir`, creating it if needed and finishing any
    /// update that was interrupted mid-swap.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let gallery = Self { dir: dir.into() };
        gallery.recover()?;
        fs::create_dir_all(&gallery.dir).map_err(io_err(&gallery.dir))?;
        Ok(gallery)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All regular files in the gallery, sorted by name.
    pub fn images(&self) -> Result<Vec<PathBuf>, GalleryError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let entry = entry.map_err(io_err(&self.dir))?;
            let path = entry.path();
            if path.is_file() {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }

    pub fn len(&self) -> Result<usize, GalleryError> {
        Ok(self.images()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, GalleryError> {
        Ok(self.len()? == 0)
    }

    /// Replace the whole gallery with `frames`, numbered by slice position.
    ///
    /// An empty slice leaves an empty gallery.
    pub fn replace(&self, frames: &[RgbImage]) -> Result<(), GalleryError> {
        let staging = self.staging_dir();
        let backup = self.backup_dir();

        for stale in [&staging, &backup] {
            if stale.exists() {
                tracing::debug!(dir = %stale.display(), "removing leftover directory");
                fs::remove_dir_all(stale).map_err(io_err(stale))?;
            }
        }
        fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        for (idx, frame) in frames.iter().enumerate() {
            let path = staging.join(image_file_name(idx));
            frame
                .save_with_format(&path, ImageFormat::Jpeg)
                .map_err(|source| GalleryError::Encode {
                    path: path.clone(),
                    source,
                })?;
        }

        let previous = if self.dir.exists() {
            let count = self.images().map(|i| i.len()).unwrap_or(0);
            fs::rename(&self.dir, &backup).map_err(io_err(&self.dir))?;
            count
        } else {
            0
        };

        if let Err(source) = fs::rename(&staging, &self.dir) {
            // Put the previous set back so the gallery never goes missing
            if backup.exists() && !self.dir.exists() {
                if let Err(e) = fs::rename(&backup, &self.dir) {
                    tracing::error!(error = %e, dir = %self.dir.display(), "failed to restore gallery");
                }
            }
            return Err(GalleryError::Io {
                path: staging,
                source,
            });
        }

        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(io_err(&backup))?;
        }

        tracing::info!(
            dir = %self.dir.display(),
            removed = previous,
            written = frames.len(),
            "gallery replaced"
        );
        Ok(())
    }

    fn staging_dir(&self) -> PathBuf {
        self.sibling("staging")
    }

    fn backup_dir(&self) -> PathBuf {
        self.sibling("old")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gallery".to_string());
        self.dir.with_file_name(format!("{name}.{suffix}"))
    }

    fn recover(&self) -> Result<(), GalleryError> {
        let staging = self.staging_dir();
        let backup = self.backup_dir();

        // Crash between the two renames: the old set is only in the backup.
        if !self.dir.exists() && backup.exists() {
            tracing::warn!(dir = %self.dir.display(), "restoring gallery from interrupted update");
            fs::rename(&backup, &self.dir).map_err(io_err(&backup))?;
        }
        if backup.exists() {
            fs::remove_dir_all(&backup).map_err(io_err(&backup))?;
        }
        if staging.exists() {
            tracing::debug!(dir = %staging.display(), "removing stale staging directory");
            fs::remove_dir_all(&staging).map_err(io_err(&staging))?;
        }
        Ok(())
    }
}
