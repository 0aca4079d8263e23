use crate::bbox::BBox;
use crate::capability::{Mask, SegmentPrompt, Segmenter, SegmenterBackend};
use crate::error::{Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::segment_anything::sam::{self, Sam};
use image::{imageops::FilterType, RgbImage};
use log::debug;
use std::path::Path;

/// Registry of SAM encoders this backend can build, tiny first.
const VARIANTS: [&str; 4] = ["vit_t", "vit_b", "vit_l", "vit_h"];

/// Segment-anything on candle. `vit_t` is MobileSAM's TinyViT encoder.
pub struct MobileSamBackend;

impl SegmenterBackend for MobileSamBackend {
    fn variants(&self) -> Vec<String> {
        VARIANTS.iter().map(|v| v.to_string()).collect()
    }

    fn load(
        &self,
        variant: &str,
        checkpoint: &Path,
        device: &Device,
    ) -> Result<Box<dyn Segmenter>> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[checkpoint], DType::F32, device)? };
        let model = match variant {
            "vit_t" => Sam::new_tiny(vb)?,
            "vit_b" => Sam::new(768, 12, 12, &[2, 5, 8, 11], vb)?,
            "vit_l" => Sam::new(1024, 24, 16, &[5, 11, 17, 23], vb)?,
            "vit_h" => Sam::new(1280, 32, 16, &[7, 15, 23, 31], vb)?,
            other => {
                return Err(Error::Capability(format!(
                    "unknown segment-anything variant '{other}'"
                )))
            }
        };
        debug!("built segment-anything '{}' from {:?}", variant, checkpoint);
        Ok(Box::new(SamSegmenter {
            model,
            device: device.clone(),
            primed: None,
        }))
    }
}

struct PrimedImage {
    embeddings: Tensor,
    /// Size of the encoder input, longest side is `sam::IMAGE_SIZE`.
    encoded_w: usize,
    encoded_h: usize,
    width: u32,
    height: u32,
}

pub struct SamSegmenter {
    model: Sam,
    device: Device,
    primed: Option<PrimedImage>,
}

fn encoder_size(width: u32, height: u32) -> (u32, u32) {
    let target = sam::IMAGE_SIZE as f32;
    let scale = target / width.max(height) as f32;
    let fit = |v: u32| ((v as f32 * scale).round() as u32).clamp(1, sam::IMAGE_SIZE as u32);
    (fit(width), fit(height))
}

impl SamSegmenter {
    fn masks_for_point(
        &self,
        primed: &PrimedImage,
        x: f32,
        y: f32,
        foreground: bool,
        multimask_output: bool,
    ) -> Result<Vec<Mask>> {
        let points = [(
            (x / primed.width as f32).clamp(0.0, 1.0) as f64,
            (y / primed.height as f32).clamp(0.0, 1.0) as f64,
            foreground,
        )];
        let (low_res, _iou) = self.model.forward_for_embeddings(
            &primed.embeddings,
            primed.encoded_h,
            primed.encoded_w,
            &points,
            multimask_output,
        )?;
        let logits = low_res
            .upsample_nearest2d(sam::IMAGE_SIZE, sam::IMAGE_SIZE)?
            .get(0)?
            .i((.., ..primed.encoded_h, ..primed.encoded_w))?;

        let mut masks = Vec::new();
        for i in 0..logits.dim(0)? {
            let grid = logits.get(i)?.to_dtype(DType::F32)?.to_vec2::<f32>()?;
            let (w, h) = (primed.width as usize, primed.height as usize);
            let (ew, eh) = (primed.encoded_w, primed.encoded_h);
            masks.push(Mask::from_fn(primed.width, primed.height, |x, y| {
                let sx = (x as usize * ew / w).min(ew - 1);
                let sy = (y as usize * eh / h).min(eh - 1);
                grid[sy][sx] > 0.0
            }));
        }
        Ok(masks)
    }
}

impl Segmenter for SamSegmenter {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        let (ew, eh) = encoder_size(width, height);
        let resized = image::imageops::resize(image, ew, eh, FilterType::Triangle);
        let data = resized.into_raw();
        let tensor = Tensor::from_vec(data, (eh as usize, ew as usize, 3), &self.device)?
            .permute((2, 0, 1))?;
        let embeddings = self.model.embeddings(&tensor)?;
        self.primed = Some(PrimedImage {
            embeddings,
            encoded_w: ew as usize,
            encoded_h: eh as usize,
            width,
            height,
        });
        Ok(())
    }

    /// Box prompts are answered with the box centre as a foreground point,
    /// and the resulting mask is cleared outside the box.
    fn predict(&mut self, prompt: &SegmentPrompt, multimask_output: bool) -> Result<Vec<Mask>> {
        let primed = self
            .primed
            .as_ref()
            .ok_or_else(|| Error::Capability("segmenter has no image set".into()))?;
        match *prompt {
            SegmentPrompt::Box(bbox) => {
                let bbox: BBox = bbox.clamp_to(primed.width, primed.height);
                let (cx, cy) = bbox.center();
                let mut masks = self.masks_for_point(primed, cx, cy, true, multimask_output)?;
                for mask in &mut masks {
                    mask.restrict_to(&bbox);
                }
                Ok(masks)
            }
            SegmentPrompt::Point { x, y, foreground } => {
                self.masks_for_point(primed, x, y, foreground, multimask_output)
            }
        }
    }

    fn reset(&mut self) {
        self.primed = None;
    }
}
