use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Frame, FrameSource};

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png"];

/// Cycles through the images of a directory, in name order, forever.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    pub fn open(dir: &str) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read frames dir {}", dir))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        paths.sort();
        anyhow::ensure!(!paths.is_empty(), "no images in {}", dir);
        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

fn is_image(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Frame> {
        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();
        let image = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        Ok(Frame::new(image, path.display().to_string()))
    }
}
