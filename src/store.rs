//! On-disk placement of pipeline outputs.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/originals/<id>_original.png
//! <root>/results/<id>_result.png
//! <root>/cutouts/<id>_cutout.png
//! ```
//!
//! `<id>` is a fresh v4 UUID per call, shared by the artifacts of one call.

use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Original,
    Result,
    Cutout,
}

impl ArtifactKind {
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Original => "originals",
            Self::Result => "results",
            Self::Cutout => "cutouts",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Result => "result",
            Self::Cutout => "cutout",
        }
    }
}

/// Paths written by one successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPair {
    pub original: PathBuf,
    pub result: PathBuf,
    pub cutout: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: ArtifactKind, id: &Uuid) -> PathBuf {
        self.root
            .join(kind.subdir())
            .join(format!("{}_{}.png", id.simple(), kind.tag()))
    }

    /// Writes `image` as PNG under a fresh identifier and returns its path.
    pub fn put(&self, kind: ArtifactKind, image: &DynamicImage) -> Result<PathBuf> {
        self.write(kind, &Uuid::new_v4(), image)
    }

    fn write(&self, kind: ArtifactKind, id: &Uuid, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.path_for(kind, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("png.tmp");
        if let Err(e) = image.save_with_format(&tmp, ImageFormat::Png) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, &path)?;
        debug!("wrote {:?}", path);
        Ok(path)
    }

    /// Writes the original and annotated images (and the cutout, when
    /// given) under one identifier. Either every file is on disk afterwards
    /// or none of them is.
    pub fn put_pair(
        &self,
        original: &RgbImage,
        result: &RgbImage,
        cutout: Option<&RgbaImage>,
    ) -> Result<ArtifactPair> {
        let id = Uuid::new_v4();
        let mut written = Vec::new();
        let outcome = self.write_all(&id, original, result, cutout, &mut written);
        if outcome.is_err() {
            for path in &written {
                if let Err(e) = fs::remove_file(path) {
                    warn!("could not remove partial artifact {:?}: {}", path, e);
                }
            }
        }
        outcome
    }

    fn write_all(
        &self,
        id: &Uuid,
        original: &RgbImage,
        result: &RgbImage,
        cutout: Option<&RgbaImage>,
        written: &mut Vec<PathBuf>,
    ) -> Result<ArtifactPair> {
        let original =
            self.write(ArtifactKind::Original, id, &DynamicImage::ImageRgb8(original.clone()))?;
        written.push(original.clone());
        let result = self.write(ArtifactKind::Result, id, &DynamicImage::ImageRgb8(result.clone()))?;
        written.push(result.clone());
        let cutout = match cutout {
            Some(image) => {
                let path =
                    self.write(ArtifactKind::Cutout, id, &DynamicImage::ImageRgba8(image.clone()))?;
                written.push(path.clone());
                Some(path)
            }
            None => None,
        };
        if let Some(missing) = written.iter().find(|p| !p.is_file()) {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("artifact {:?} missing after write", missing),
            )));
        }
        Ok(ArtifactPair {
            original,
            result,
            cutout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn put_creates_directories_and_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("static/images"));
        let image = DynamicImage::ImageRgb8(RgbImage::new(3, 2));
        let a = store.put(ArtifactKind::Result, &image).unwrap();
        let b = store.put(ArtifactKind::Result, &image).unwrap();
        assert_ne!(a, b);
        assert!(a.is_file());
        assert_eq!(a.parent().unwrap(), dir.path().join("static/images/results"));
        assert!(a.to_string_lossy().ends_with("_result.png"));
    }

    #[test]
    fn pair_shares_identifier_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let original = RgbImage::from_pixel(5, 4, Rgb([10, 20, 30]));
        let result = RgbImage::from_pixel(5, 4, Rgb([40, 50, 60]));
        let pair = store.put_pair(&original, &result, None).unwrap();
        let id = |p: &Path| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .split('_')
                .next()
                .unwrap()
                .to_string()
        };
        assert_eq!(id(&pair.original), id(&pair.result));
        assert!(pair.cutout.is_none());
        let reread = image::open(&pair.original).unwrap().to_rgb8();
        assert_eq!(reread, original);
    }

    #[test]
    fn failed_pair_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        fs::create_dir_all(&root).unwrap();
        // a file where the results directory should go
        fs::write(root.join("results"), b"").unwrap();
        let store = ArtifactStore::new(&root);
        let image = RgbImage::new(2, 2);
        assert!(store.put_pair(&image, &image, None).is_err());
        assert_eq!(fs::read_dir(root.join("originals")).unwrap().count(), 0);
    }

    #[test]
    fn cutout_is_written_with_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let image = RgbImage::new(2, 2);
        let cutout = RgbaImage::new(2, 2);
        let pair = store.put_pair(&image, &image, Some(&cutout)).unwrap();
        let path = pair.cutout.unwrap();
        assert!(path.starts_with(dir.path().join("cutouts")));
        assert_eq!(image::open(path).unwrap().color(), image::ColorType::Rgba8);
    }
}
