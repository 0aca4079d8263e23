//! Runtime settings, read from an optional JSON file

use crate::error::{Error, Result};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 2048;
pub const DEFAULT_BOX_THRESHOLD: f32 = 0.35;
pub const DEFAULT_TEXT_THRESHOLD: f32 = 0.25;
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;

const GROUNDING_DINO_CHECKPOINT_URL: &str =
    "https://github.com/IDEA-Research/GroundingDINO/releases/download/v0.1.0-alpha/groundingdino_swint_ogc.pth";
const GROUNDING_DINO_CONFIG_FILE: &str = "GroundingDINO_SwinT_OGC.py";
const MOBILE_SAM_HUB_REPO: &str = "lmz/candle-sam";
const MOBILE_SAM_CHECKPOINT_FILE: &str = "mobile_sam-tiny-vitt.safetensors";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_upload_bytes: usize,
    pub max_image_dimension: u32,
    pub box_threshold: f32,
    pub text_threshold: f32,
    pub storage_root: PathBuf,
    pub force_cpu: bool,
    pub annotation: AnnotationConfig,
    pub models: ModelsConfig,
    pub download: DownloadConfig,
    pub server: ServerSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            box_threshold: DEFAULT_BOX_THRESHOLD,
            text_threshold: DEFAULT_TEXT_THRESHOLD,
            storage_root: PathBuf::from("static/images"),
            force_cpu: false,
            annotation: AnnotationConfig::default(),
            models: ModelsConfig::default(),
            download: DownloadConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path.as_ref())?)?;
        debug!("loaded config from {:?}", path.as_ref());
        Ok(config)
    }

    /// Reads `path` when given, otherwise starts from defaults, then applies
    /// environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.server.apply_env();
        if std::env::var("PROMPTSEG_FORCE_CPU").is_ok_and(|v| v == "1") {
            config.force_cpu = true;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(Error::Config(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )))
            }
        };
        unit("box_threshold", self.box_threshold)?;
        unit("text_threshold", self.text_threshold)?;
        unit("annotation.overlay_alpha", self.annotation.overlay_alpha)?;
        if self.max_image_dimension == 0 {
            return Err(Error::Config("max_image_dimension must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub overlay_alpha: f32,
    pub overlay_color: [u8; 3],
    pub box_color: [u8; 3],
    pub label_color: [u8; 3],
    pub box_thickness: u32,
    /// Label glyph height in pixels.
    pub label_scale: f32,
    /// TrueType/OpenType font for labels; a built-in bitmap font is used when unset.
    pub label_font: Option<PathBuf>,
    pub write_cutout: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            overlay_alpha: 0.3,
            overlay_color: [30, 144, 255],
            box_color: [0, 255, 0],
            label_color: [0, 0, 0],
            box_thickness: 2,
            label_scale: 16.0,
            label_font: None,
            write_cutout: false,
        }
    }
}

/// Where a checkpoint comes from when it is not on disk yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetSource {
    Url { url: String },
    Hub { repo: String, file: String },
}

impl std::fmt::Display for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url { url } => write!(f, "{url}"),
            Self::Hub { repo, file } => write!(f, "hf://{repo}/{file}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    pub file: String,
    pub source: AssetSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub package: String,
    pub alternates: Vec<String>,
    /// Directory name under `models.vendor_dir`.
    pub vendored: String,
    pub config_file: String,
    /// Paths relative to `models.root` probed for the config file, in order.
    pub config_candidates: Vec<PathBuf>,
    pub checkpoint: CheckpointConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            package: "groundingdino".into(),
            alternates: vec![
                "GroundingDINO".into(),
                "grounding_dino".into(),
                "groundingdino-py".into(),
            ],
            vendored: "GroundingDINO".into(),
            config_file: GROUNDING_DINO_CONFIG_FILE.into(),
            config_candidates: vec![
                PathBuf::from("GroundingDINO/groundingdino/config").join(GROUNDING_DINO_CONFIG_FILE),
                PathBuf::from("groundingdino/config").join(GROUNDING_DINO_CONFIG_FILE),
                PathBuf::from("config").join(GROUNDING_DINO_CONFIG_FILE),
                PathBuf::from(GROUNDING_DINO_CONFIG_FILE),
            ],
            checkpoint: CheckpointConfig {
                file: "groundingdino_swint_ogc.pth".into(),
                source: AssetSource::Url {
                    url: GROUNDING_DINO_CHECKPOINT_URL.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub package: String,
    pub alternates: Vec<String>,
    pub vendored: String,
    pub type_tag: String,
    pub checkpoint: CheckpointConfig,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            package: "mobile_sam".into(),
            alternates: vec!["segment_anything".into(), "MobileSAM".into()],
            vendored: "MobileSAM".into(),
            type_tag: "vit_t".into(),
            checkpoint: CheckpointConfig {
                file: MOBILE_SAM_CHECKPOINT_FILE.into(),
                source: AssetSource::Hub {
                    repo: MOBILE_SAM_HUB_REPO.into(),
                    file: MOBILE_SAM_CHECKPOINT_FILE.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub root: PathBuf,
    pub vendor_dir: PathBuf,
    pub detector: DetectorConfig,
    pub segmenter: SegmenterConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("models"),
            vendor_dir: PathBuf::from("vendor"),
            detector: DetectorConfig::default(),
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl ModelsConfig {
    pub fn detector_checkpoint_path(&self) -> PathBuf {
        self.root.join(&self.detector.checkpoint.file)
    }

    pub fn segmenter_checkpoint_path(&self) -> PathBuf {
        self.root.join(&self.segmenter.checkpoint.file)
    }

    pub fn detector_vendored_dir(&self) -> PathBuf {
        self.vendor_dir.join(&self.detector.vendored)
    }

    pub fn segmenter_vendored_dir(&self) -> PathBuf {
        self.vendor_dir.join(&self.segmenter.vendored)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    /// Hugging Face cache location, the hub default when unset.
    pub hub_cache_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_DOWNLOAD_RETRIES,
            retry_delay_ms: 1000,
            timeout_secs: 3600,
            hub_cache_dir: None,
        }
    }
}

/// Listen address for the HTTP front end that embeds the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

impl ServerSettings {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Honors a `PORT` override; unparsable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("ignoring invalid PORT value '{port}'"),
            }
        }
    }
}
