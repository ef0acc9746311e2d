//! Ordered image sequences read from a directory.
use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::{Error, Result};

/// Sequences shorter than this are rejected.
pub const MIN_DATASET_SIZE: usize = 15;

const EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "pgm", "tif", "tiff"];

#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    start_index: usize,
}

impl ImageSequence {
    /// Lists the images in `dir` sorted by file name, skipping the first
    /// `start_index` of them.
    pub fn from_dir(dir: impl AsRef<Path>, start_index: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Self::from_paths(paths, start_index)
            .map_err(|err| Error::Dataset(format!("{}: {err}", dir.display())))
    }

    /// Builds a sequence from an explicit, already ordered list.
    pub fn from_paths(paths: Vec<PathBuf>, start_index: usize) -> Result<Self> {
        if paths.len() < MIN_DATASET_SIZE {
            return Err(Error::Dataset(format!(
                "{} images found, at least {MIN_DATASET_SIZE} are needed",
                paths.len()
            )));
        }
        if start_index >= paths.len() {
            return Err(Error::Dataset(format!(
                "start index {start_index} is past the last of {} images",
                paths.len()
            )));
        }
        log::info!("image sequence with {} images, starting at {start_index}", paths.len());
        Ok(Self { paths, start_index })
    }

    /// Number of images that will be tracked.
    pub fn len(&self) -> usize {
        self.paths.len() - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_index(&self) -> usize {
        self.start_index
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    /// Decodes image `index` (counted from the start of the directory) as 8-bit grayscale.
    pub fn load(&self, index: usize) -> Result<GrayImage> {
        let path = self
            .path(index)
            .ok_or_else(|| Error::Dataset(format!("no image at index {index}")))?;
        Ok(image::open(path)?.to_luma8())
    }

    /// `(index, path)` pairs from the start index on.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Path)> {
        self.paths
            .iter()
            .enumerate()
            .skip(self.start_index)
            .map(|(index, path)| (index, path.as_path()))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
