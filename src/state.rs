//! Process-wide models and settings shared by every pipeline call

use crate::bootstrap::{Bootstrapper, CapabilityRegistry};
use crate::capability::{Detector, Segmenter, Unavailable};
use crate::config::PipelineConfig;
use crate::device::{select_device, DeviceTag};
use crate::download::{AssetFetcher, HttpFetcher};
use crate::error::Result;
use candle_core::Device;
use log::{info, warn};
use std::sync::{Arc, Mutex, OnceLock};

/// Loaded models. The segmenter holds the image it was last primed with,
/// so priming and predicting happen under its lock.
pub struct Capabilities {
    pub detector: Box<dyn Detector>,
    pub segmenter: Mutex<Box<dyn Segmenter>>,
    pub device: DeviceTag,
}

impl Capabilities {
    pub fn new(
        detector: Box<dyn Detector>,
        segmenter: Box<dyn Segmenter>,
        device: DeviceTag,
    ) -> Self {
        Self {
            detector,
            segmenter: Mutex::new(segmenter),
            device,
        }
    }
}

type LoadOutcome = std::result::Result<Arc<Capabilities>, Unavailable>;

pub struct AppState {
    config: PipelineConfig,
    registry: CapabilityRegistry,
    fetcher: Box<dyn AssetFetcher>,
    device: Device,
    capabilities: OnceLock<LoadOutcome>,
}

impl AppState {
    /// State that downloads missing checkpoints over HTTPS or from the hub.
    pub fn new(config: PipelineConfig, registry: CapabilityRegistry) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.download)?;
        Ok(Self::with_fetcher(config, registry, fetcher))
    }

    pub fn with_fetcher(
        config: PipelineConfig,
        registry: CapabilityRegistry,
        fetcher: impl AssetFetcher + 'static,
    ) -> Self {
        let device = if config.force_cpu {
            info!("CPU forced by configuration");
            Device::Cpu
        } else {
            select_device().clone()
        };
        Self {
            config,
            registry,
            fetcher: Box::new(fetcher),
            device,
            capabilities: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn bootstrapper(&self) -> Bootstrapper<'_> {
        Bootstrapper::new(
            &self.registry,
            &self.config.models,
            &self.config.download,
            self.fetcher.as_ref(),
        )
    }

    /// Loaded models, bootstrapping them on first use. The outcome of that
    /// single attempt, ready or not, is kept for the life of the process.
    pub fn capabilities(&self) -> LoadOutcome {
        self.capabilities.get_or_init(|| self.load()).clone()
    }

    /// Whether a bootstrap attempt has already run and succeeded.
    pub fn is_loaded(&self) -> bool {
        matches!(self.capabilities.get(), Some(Ok(_)))
    }

    fn load(&self) -> LoadOutcome {
        let tag = DeviceTag::of(&self.device);
        info!("loading models on {}", tag);
        let bootstrapper = self.bootstrapper();
        let detector = bootstrapper.bootstrap_detector(&self.device);
        let segmenter = bootstrapper.bootstrap_segmenter(&self.device);
        match (detector.into_result(), segmenter.into_result()) {
            (Ok(detector), Ok(segmenter)) => {
                info!("models ready on {}", tag);
                Ok(Arc::new(Capabilities::new(detector, segmenter, tag)))
            }
            (Err(unavailable), _) | (_, Err(unavailable)) => {
                warn!("models not loaded: {}", unavailable);
                Err(unavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetSource, ModelsConfig};
    use crate::error::Error;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default, Clone)]
    struct CountingOffline(Arc<AtomicU32>);

    impl AssetFetcher for CountingOffline {
        fn fetch(&self, _: &AssetSource, _: &Path) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Download {
                url: "test".into(),
                reason: "offline".into(),
            })
        }
    }

    #[test]
    fn failed_bootstrap_is_attempted_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig {
            force_cpu: true,
            models: ModelsConfig {
                root: dir.path().join("models"),
                vendor_dir: dir.path().join("vendor"),
                ..Default::default()
            },
            ..Default::default()
        };
        config.download.retry_delay_ms = 0;
        let fetcher = CountingOffline::default();
        let state = AppState::with_fetcher(config, CapabilityRegistry::with_builtin(), fetcher.clone());

        assert!(state.capabilities().is_err());
        let fetches = fetcher.0.load(Ordering::SeqCst);
        assert!(state.capabilities().is_err());
        assert_eq!(fetcher.0.load(Ordering::SeqCst), fetches);
        assert!(!state.is_loaded());
        assert_eq!(DeviceTag::of(state.device()), DeviceTag::Cpu);
    }
}
