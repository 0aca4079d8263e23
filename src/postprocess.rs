//! Mask overlay, box and label drawing

use crate::bbox::{BBox, Detections};
use crate::capability::Mask;
use crate::config::AnnotationConfig;
use crate::glyphs;
use ab_glyph::FontVec;
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::warn;

const LABEL_PADDING: u32 = 2;

/// Blends `color` over every foreground pixel with weight `alpha`.
pub fn blend_mask(image: &mut RgbImage, mask: &Mask, color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if !mask.get(x, y) {
            continue;
        }
        for (channel, target) in pixel.0.iter_mut().zip(color) {
            let blended = (1.0 - alpha) * *channel as f32 + alpha * target as f32;
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Box outline in integer pixels, `None` when it collapses to nothing.
fn box_rect(bbox: &BBox, inset: u32) -> Option<Rect> {
    let left = bbox.x1.round() as i32 + inset as i32;
    let top = bbox.y1.round() as i32 + inset as i32;
    let width = (bbox.width().round() as i64 - 2 * inset as i64).max(0) as u32;
    let height = (bbox.height().round() as i64 - 2 * inset as i64).max(0) as u32;
    (width > 0 && height > 0).then(|| Rect::at(left, top).of_size(width, height))
}

/// Source image masked to the object, everything else transparent.
pub fn cutout(source: &RgbImage, mask: &Mask) -> RgbaImage {
    RgbaImage::from_fn(source.width(), source.height(), |x, y| {
        if mask.get(x, y) {
            let [r, g, b] = source.get_pixel(x, y).0;
            Rgba([r, g, b, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

pub struct Annotator {
    config: AnnotationConfig,
    font: Option<FontVec>,
}

impl Annotator {
    /// Loads the configured label font; falls back to the built-in bitmap
    /// font if it is missing or unreadable.
    pub fn new(config: &AnnotationConfig) -> Self {
        let font = config.label_font.as_ref().and_then(|path| {
            let bytes = std::fs::read(path)
                .inspect_err(|e| warn!("cannot read label font {:?}: {}", path, e))
                .ok()?;
            FontVec::try_from_vec(bytes)
                .inspect_err(|e| warn!("invalid label font {:?}: {}", path, e))
                .ok()
        });
        Self {
            config: config.clone(),
            font,
        }
    }

    /// Copy of `source` with the mask highlighted and every box outlined
    /// and labelled with `label` above it.
    pub fn annotate(
        &self,
        source: &RgbImage,
        mask: &Mask,
        detections: &Detections,
        label: &str,
    ) -> RgbImage {
        let mut image = source.clone();
        blend_mask(
            &mut image,
            mask,
            self.config.overlay_color,
            self.config.overlay_alpha,
        );
        let color = Rgb(self.config.box_color);
        for bbox in &detections.boxes {
            let bbox = bbox.clamp_to(image.width(), image.height());
            for inset in 0..self.config.box_thickness.max(1) {
                if let Some(rect) = box_rect(&bbox, inset) {
                    draw_hollow_rect_mut(&mut image, rect, color);
                }
            }
            self.draw_label(&mut image, &bbox, label);
        }
        image
    }

    fn label_size(&self, label: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.config.label_scale, font, label),
            None => glyphs::text_size(label, glyphs::magnification(self.config.label_scale)),
        }
    }

    /// Filled tag in the box colour whose bottom edge sits on the box's
    /// top edge, pushed inside the image when the box touches the top.
    fn draw_label(&self, image: &mut RgbImage, bbox: &BBox, label: &str) {
        let (text_w, text_h) = self.label_size(label);
        let tag_w = text_w + 2 * LABEL_PADDING;
        let tag_h = text_h + 2 * LABEL_PADDING;
        let left = bbox.x1.round() as i32;
        let top = (bbox.y1.round() as i32 - tag_h as i32).max(0);
        draw_filled_rect_mut(
            image,
            Rect::at(left, top).of_size(tag_w.max(1), tag_h.max(1)),
            Rgb(self.config.box_color),
        );
        let (text_x, text_y) = (left + LABEL_PADDING as i32, top + LABEL_PADDING as i32);
        let text_color = Rgb(self.config.label_color);
        match &self.font {
            Some(font) => draw_text_mut(
                image,
                text_color,
                text_x,
                text_y,
                self.config.label_scale,
                font,
                label,
            ),
            None => glyphs::draw_text(
                image,
                text_x,
                text_y,
                label,
                glyphs::magnification(self.config.label_scale),
                text_color,
            ),
        }
    }
}
