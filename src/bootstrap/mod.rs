//! Making the detector and segmenter ready despite partial installs.
//!
//! Each capability is located by trying its canonical package name, then
//! the configured alternates, then a vendored directory manifest. Assets are
//! resolved (and downloaded when missing) and the backend is constructed on
//! the selected device. Every step reports failure as
//! [`Readiness::Unavailable`] with remediation text, never as a panic.

mod registry;
mod strategy;

pub use registry::{CapabilityRegistry, VendoredManifest, MANIFEST_FILE};
pub use strategy::{first_available, Provenance, Strategy};

use crate::assets::{AssetResolver, ModelAssets};
use crate::capability::{
    Component, Detector, DetectorBackend, Readiness, Segmenter, SegmenterBackend, Unavailable,
};
use crate::config::{DownloadConfig, ModelsConfig};
use crate::download::AssetFetcher;
use candle_core::Device;
use log::{debug, error, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A located backend and how it was found.
pub struct Capability<B: ?Sized> {
    pub backend: Arc<B>,
    pub provenance: Provenance,
}

impl<B: ?Sized> Clone for Capability<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

impl<B: ?Sized> std::fmt::Debug for Capability<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}

pub type DetectorCapability = Capability<dyn DetectorBackend>;
pub type SegmenterCapability = Capability<dyn SegmenterBackend>;

fn acquire<B: ?Sized>(
    component: Component,
    package: &str,
    alternates: &[String],
    vendored: PathBuf,
    lookup: impl Fn(&str) -> Option<Arc<B>>,
    remediation: String,
) -> Readiness<Capability<B>> {
    let lookup = &lookup;
    let mut strategies = vec![Strategy::new(format!("package '{package}'"), move || {
        lookup(package).map(|backend| Capability {
            backend,
            provenance: Provenance::Canonical(package.to_string()),
        })
    })];
    for alternate in alternates {
        strategies.push(Strategy::new(
            format!("alternate package '{alternate}'"),
            move || {
                lookup(alternate).map(|backend| Capability {
                    backend,
                    provenance: Provenance::Alternate(alternate.clone()),
                })
            },
        ));
    }
    let vendored_name = format!("vendored directory {vendored:?}");
    strategies.push(Strategy::new(vendored_name, move || {
        if !vendored.is_dir() {
            return None;
        }
        let manifest = VendoredManifest::read(&vendored)
            .inspect_err(|e| debug!("no usable manifest in {:?}: {}", vendored, e))
            .ok()?;
        lookup(&manifest.backend).map(|backend| Capability {
            backend,
            provenance: Provenance::Vendored(vendored.clone()),
        })
    }));

    match first_available(&component.to_string(), &strategies) {
        Some(capability) => Readiness::Ready(capability),
        None => {
            let unavailable = Unavailable::new(
                component,
                format!(
                    "no backend registered as '{}' or any of {:?}",
                    package, alternates
                ),
                remediation,
            );
            warn!("{}", unavailable);
            Readiness::Unavailable(unavailable)
        }
    }
}

/// Picks the requested variant, or the first registered one when the
/// request is unknown.
pub fn resolve_variant(variants: &[String], requested: &str) -> Option<String> {
    if variants.iter().any(|v| v == requested) {
        return Some(requested.to_string());
    }
    let fallback = variants.first()?;
    warn!(
        "segmenter variant '{}' not registered (have {:?}), using '{}'",
        requested, variants, fallback
    );
    Some(fallback.clone())
}

pub struct Bootstrapper<'a> {
    registry: &'a CapabilityRegistry,
    models: &'a ModelsConfig,
    download: &'a DownloadConfig,
    fetcher: &'a dyn AssetFetcher,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(
        registry: &'a CapabilityRegistry,
        models: &'a ModelsConfig,
        download: &'a DownloadConfig,
        fetcher: &'a dyn AssetFetcher,
    ) -> Self {
        Self {
            registry,
            models,
            download,
            fetcher,
        }
    }

    pub fn acquire_detector_capability(&self) -> Readiness<DetectorCapability> {
        let detector = &self.models.detector;
        let vendored = self.models.detector_vendored_dir();
        let remediation = format!(
            "register a grounding detector backend as '{}' with \
             CapabilityRegistry::register_detector, or vendor one into {:?} \
             with a {} naming a registered backend",
            detector.package, vendored, MANIFEST_FILE
        );
        acquire(
            Component::Detector,
            &detector.package,
            &detector.alternates,
            vendored,
            |name| self.registry.detector(name),
            remediation,
        )
    }

    pub fn acquire_segmenter_capability(&self) -> Readiness<SegmenterCapability> {
        let segmenter = &self.models.segmenter;
        let vendored = self.models.segmenter_vendored_dir();
        let remediation = format!(
            "register a segment-anything backend as '{}' (the built-in one is \
             'mobile_sam'), or vendor one into {:?} with a {}",
            segmenter.package, vendored, MANIFEST_FILE
        );
        acquire(
            Component::Segmenter,
            &segmenter.package,
            &segmenter.alternates,
            vendored,
            |name| self.registry.segmenter(name),
            remediation,
        )
    }

    pub fn ensure_assets(&self, component: Component) -> Readiness<ModelAssets> {
        AssetResolver::new(self.models, self.download, self.fetcher).ensure_assets(component)
    }

    pub fn load_detector(
        &self,
        capability: &DetectorCapability,
        config: &Path,
        checkpoint: &Path,
        device: &Device,
    ) -> Option<Box<dyn Detector>> {
        info!(
            "loading detector from {} ({:?}, {:?})",
            capability.provenance, config, checkpoint
        );
        let loaded = catch_unwind(AssertUnwindSafe(|| {
            capability.backend.load(config, checkpoint, device)
        }));
        match loaded {
            Ok(Ok(detector)) => {
                info!("detector loaded");
                Some(detector)
            }
            Ok(Err(e)) => {
                error!("error loading detector: {}", e);
                None
            }
            Err(_) => {
                error!("detector construction panicked");
                None
            }
        }
    }

    pub fn load_segmenter(
        &self,
        capability: &SegmenterCapability,
        checkpoint: &Path,
        type_tag: &str,
        device: &Device,
    ) -> Option<Box<dyn Segmenter>> {
        let variants = capability.backend.variants();
        let Some(variant) = resolve_variant(&variants, type_tag) else {
            error!("segmenter from {} registers no variants", capability.provenance);
            return None;
        };
        info!(
            "loading segmenter '{}' from {} ({:?})",
            variant, capability.provenance, checkpoint
        );
        let loaded = catch_unwind(AssertUnwindSafe(|| {
            capability.backend.load(&variant, checkpoint, device)
        }));
        match loaded {
            Ok(Ok(segmenter)) => {
                info!("segmenter loaded");
                Some(segmenter)
            }
            Ok(Err(e)) => {
                error!("error loading segmenter: {}", e);
                None
            }
            Err(_) => {
                error!("segmenter construction panicked");
                None
            }
        }
    }

    /// Acquire, resolve assets and construct the detector.
    pub fn bootstrap_detector(&self, device: &Device) -> Readiness<Box<dyn Detector>> {
        let capability = match self.acquire_detector_capability() {
            Readiness::Ready(c) => c,
            Readiness::Unavailable(u) => return Readiness::Unavailable(u),
        };
        let assets = match self.ensure_assets(Component::Detector) {
            Readiness::Ready(a) => a,
            Readiness::Unavailable(u) => return Readiness::Unavailable(u),
        };
        let Some(config) = assets.config else {
            return Readiness::Unavailable(Unavailable::new(
                Component::Detector,
                "config file not resolved",
                format!("place '{}' under {:?}", self.models.detector.config_file, self.models.root),
            ));
        };
        match self.load_detector(&capability, &config, &assets.checkpoint, device) {
            Some(detector) => Readiness::Ready(detector),
            None => Readiness::Unavailable(Unavailable::new(
                Component::Detector,
                format!("construction from {} failed", capability.provenance),
                format!(
                    "check that {:?} and {:?} match the backend's expected format",
                    config, assets.checkpoint
                ),
            )),
        }
    }

    /// Acquire, resolve assets and construct the segmenter.
    pub fn bootstrap_segmenter(&self, device: &Device) -> Readiness<Box<dyn Segmenter>> {
        let capability = match self.acquire_segmenter_capability() {
            Readiness::Ready(c) => c,
            Readiness::Unavailable(u) => return Readiness::Unavailable(u),
        };
        let assets = match self.ensure_assets(Component::Segmenter) {
            Readiness::Ready(a) => a,
            Readiness::Unavailable(u) => return Readiness::Unavailable(u),
        };
        let type_tag = &self.models.segmenter.type_tag;
        match self.load_segmenter(&capability, &assets.checkpoint, type_tag, device) {
            Some(segmenter) => Readiness::Ready(segmenter),
            None => Readiness::Unavailable(Unavailable::new(
                Component::Segmenter,
                format!("construction from {} failed", capability.provenance),
                format!(
                    "check that {:?} is a '{}' checkpoint",
                    assets.checkpoint, type_tag
                ),
            )),
        }
    }
}
