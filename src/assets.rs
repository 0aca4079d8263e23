//! Config and checkpoint resolution for the two capabilities

use crate::capability::{Component, Readiness, Unavailable};
use crate::config::{AssetSource, DownloadConfig, ModelsConfig};
use crate::download::{download_with_retry, AssetFetcher};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files a capability needs before it can be constructed. Only the
/// detector has a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAssets {
    pub config: Option<PathBuf>,
    pub checkpoint: PathBuf,
}

pub struct AssetResolver<'a> {
    models: &'a ModelsConfig,
    download: &'a DownloadConfig,
    fetcher: &'a dyn AssetFetcher,
}

impl<'a> AssetResolver<'a> {
    pub fn new(
        models: &'a ModelsConfig,
        download: &'a DownloadConfig,
        fetcher: &'a dyn AssetFetcher,
    ) -> Self {
        Self {
            models,
            download,
            fetcher,
        }
    }

    pub fn ensure_assets(&self, component: Component) -> Readiness<ModelAssets> {
        match component {
            Component::Detector => self.ensure_detector(),
            Component::Segmenter => self.ensure_segmenter(),
        }
    }

    fn ensure_detector(&self) -> Readiness<ModelAssets> {
        let detector = &self.models.detector;
        let Some(config) = self.find_detector_config() else {
            return Readiness::Unavailable(Unavailable::new(
                Component::Detector,
                format!(
                    "config file '{}' not found under {:?} or {:?}",
                    detector.config_file,
                    self.models.root,
                    self.models.detector_vendored_dir()
                ),
                format!(
                    "place '{}' in {:?}",
                    detector.config_file,
                    self.models.root.join("config")
                ),
            ));
        };
        self.ensure_checkpoint(
            Component::Detector,
            &self.models.detector_checkpoint_path(),
            &detector.checkpoint.source,
        )
        .map(|checkpoint| ModelAssets {
            config: Some(config),
            checkpoint,
        })
    }

    fn ensure_segmenter(&self) -> Readiness<ModelAssets> {
        self.ensure_checkpoint(
            Component::Segmenter,
            &self.models.segmenter_checkpoint_path(),
            &self.models.segmenter.checkpoint.source,
        )
        .map(|checkpoint| ModelAssets {
            config: None,
            checkpoint,
        })
    }

    /// Probes the fixed candidate paths first, then searches the vendored
    /// directory recursively for the config file name.
    pub fn find_detector_config(&self) -> Option<PathBuf> {
        let detector = &self.models.detector;
        for candidate in &detector.config_candidates {
            let path = self.models.root.join(candidate);
            debug!("looking for detector config at {:?}", path);
            if path.is_file() {
                return Some(path);
            }
        }
        let vendored = self.models.detector_vendored_dir();
        let found = find_file_recursive(&vendored, &detector.config_file);
        if let Some(path) = &found {
            info!("found detector config by search: {:?}", path);
        }
        found
    }

    fn ensure_checkpoint(
        &self,
        component: Component,
        path: &Path,
        source: &AssetSource,
    ) -> Readiness<PathBuf> {
        if path.is_file() {
            debug!("{} checkpoint present at {:?}", component, path);
            return Readiness::Ready(path.to_path_buf());
        }
        info!("{} checkpoint not found at {:?}, downloading", component, path);
        match download_with_retry(
            self.fetcher,
            source,
            path,
            self.download.retries,
            Duration::from_millis(self.download.retry_delay_ms),
        ) {
            Ok(path) => Readiness::Ready(path),
            Err(e) => {
                warn!("{} checkpoint download failed: {}", component, e);
                Readiness::Unavailable(Unavailable::new(
                    component,
                    format!("checkpoint missing and download failed: {e}"),
                    format!("download {source} manually to {path:?}"),
                ))
            }
        }
    }
}

/// Depth-first search for a file named `name`, visiting entries in sorted
/// order so the result is deterministic.
pub fn find_file_recursive(root: &Path, name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    if let Some(hit) = entries
        .iter()
        .find(|p| p.is_file() && p.file_name().is_some_and(|n| n == name))
    {
        return Some(hit.clone());
    }
    entries
        .iter()
        .filter(|p| p.is_dir() && !p.is_symlink())
        .find_map(|dir| find_file_recursive(dir, name))
}
