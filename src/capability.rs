//! Contracts for the two model capabilities and their backends.
//!
//! A [`Detector`] turns an image and a caption into boxes. A [`Segmenter`] is
//! stateful: it is primed with one image through [`Segmenter::set_image`] and
//! then answers box or point prompts against that image until primed again.

use crate::bbox::{BBox, Detections};
use crate::error::Result;
use candle_core::Device;
use image::RgbImage;
use std::fmt;
use std::path::Path;

pub trait Detector: Send + Sync {
    fn predict_with_caption(
        &self,
        image: &RgbImage,
        caption: &str,
        box_threshold: f32,
        text_threshold: f32,
    ) -> Result<Detections>;
}

/// Where the segmenter should look.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentPrompt {
    Box(BBox),
    /// A single point, `foreground == false` marks background.
    Point { x: f32, y: f32, foreground: bool },
}

pub trait Segmenter: Send {
    fn set_image(&mut self, image: &RgbImage) -> Result<()>;

    /// Masks for the primed image, exactly one when `multimask_output` is false.
    fn predict(&mut self, prompt: &SegmentPrompt, multimask_output: bool) -> Result<Vec<Mask>>;

    /// Drops the primed image and anything derived from it.
    fn reset(&mut self) {}
}

/// Builds detectors for one registered package.
pub trait DetectorBackend: Send + Sync {
    fn load(&self, config: &Path, checkpoint: &Path, device: &Device) -> Result<Box<dyn Detector>>;
}

/// Builds segmenters for one registered package. `variants` is the
/// package's model registry in preference order.
pub trait SegmenterBackend: Send + Sync {
    fn variants(&self) -> Vec<String>;

    fn load(&self, variant: &str, checkpoint: &Path, device: &Device)
        -> Result<Box<dyn Segmenter>>;
}

/// Binary mask congruent with the image it was computed for.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("foreground", &self.count())
            .finish()
    }
}

impl Mask {
    pub fn new(width: u32, height: u32, data: Vec<bool>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Binarizes raw activations, any positive value is foreground.
    pub fn from_logits(width: u32, height: u32, logits: &[f32]) -> Option<Self> {
        Self::new(width, height, logits.iter().map(|v| *v > 0.0).collect())
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.data[(y * self.width + x) as usize]
    }

    /// Number of foreground pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Clears everything outside `bbox`.
    pub fn restrict_to(&mut self, bbox: &BBox) {
        for y in 0..self.height {
            for x in 0..self.width {
                if !bbox.contains(x as f32, y as f32) {
                    self.data[(y * self.width + x) as usize] = false;
                }
            }
        }
    }
}

/// Which of the two capabilities a message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Detector,
    Segmenter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detector => write!(f, "detector"),
            Self::Segmenter => write!(f, "segmenter"),
        }
    }
}

/// Why a capability could not be made ready, and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unavailable {
    pub component: Component,
    pub reason: String,
    pub remediation: String,
}

impl Unavailable {
    pub fn new(
        component: Component,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            component,
            reason: reason.into(),
            remediation: remediation.into(),
        }
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.component, self.reason)?;
        if !self.remediation.is_empty() {
            write!(f, " ({})", self.remediation)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Readiness<T> {
    Ready(T),
    Unavailable(Unavailable),
}

impl<T> Readiness<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Readiness<U> {
        match self {
            Self::Ready(value) => Readiness::Ready(f(value)),
            Self::Unavailable(u) => Readiness::Unavailable(u),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, Unavailable> {
        match self {
            Self::Ready(value) => Ok(value),
            Self::Unavailable(u) => Err(u),
        }
    }
}
