use crate::capability::{DetectorBackend, SegmenterBackend};
use crate::error::Result;
use crate::segmenter::MobileSamBackend;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// File a vendored capability directory must contain to be picked up.
pub const MANIFEST_FILE: &str = "capability.json";

/// Backends known to this process, keyed by package name.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    detectors: HashMap<String, Arc<dyn DetectorBackend>>,
    segmenters: HashMap<String, Arc<dyn SegmenterBackend>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends compiled into this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_segmenter("mobile_sam", MobileSamBackend);
        registry
    }

    pub fn register_detector(
        &mut self,
        package: impl Into<String>,
        backend: impl DetectorBackend + 'static,
    ) -> &mut Self {
        self.detectors.insert(package.into(), Arc::new(backend));
        self
    }

    pub fn register_segmenter(
        &mut self,
        package: impl Into<String>,
        backend: impl SegmenterBackend + 'static,
    ) -> &mut Self {
        self.segmenters.insert(package.into(), Arc::new(backend));
        self
    }

    pub fn detector(&self, package: &str) -> Option<Arc<dyn DetectorBackend>> {
        self.detectors.get(package).cloned()
    }

    pub fn segmenter(&self, package: &str) -> Option<Arc<dyn SegmenterBackend>> {
        self.segmenters.get(package).cloned()
    }

    pub fn detector_packages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.detectors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn segmenter_packages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.segmenters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// `capability.json` in a vendored directory, naming the registered
/// backend that serves it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct VendoredManifest {
    pub backend: String,
}

impl VendoredManifest {
    pub fn read(dir: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }
}
