//! Segmenter backends and a quick health check for a loaded segmenter

mod mobile_sam;

pub use mobile_sam::{MobileSamBackend, SamSegmenter};

use crate::bbox::BBox;
use crate::capability::{SegmentPrompt, Segmenter};
use crate::error::Result;
use image::{Rgb, RgbImage};
use log::info;

/// Mask sizes produced by [`self_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfCheckReport {
    pub box_masks: usize,
    pub box_foreground: usize,
    pub point_masks: usize,
    pub point_foreground: usize,
}

/// Primes `segmenter` with a black 100x100 image holding a white square and
/// asks for one mask by box and one by point.
pub fn self_check(segmenter: &mut dyn Segmenter) -> Result<SelfCheckReport> {
    let image = RgbImage::from_fn(100, 100, |x, y| {
        if (25..75).contains(&x) && (25..75).contains(&y) {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    segmenter.set_image(&image)?;
    let by_box = segmenter.predict(&SegmentPrompt::Box(BBox::new(30.0, 30.0, 70.0, 70.0)), false)?;
    info!("box prompt returned {} mask(s)", by_box.len());
    let by_point = segmenter.predict(
        &SegmentPrompt::Point {
            x: 50.0,
            y: 50.0,
            foreground: true,
        },
        false,
    )?;
    info!("point prompt returned {} mask(s)", by_point.len());
    segmenter.reset();
    Ok(SelfCheckReport {
        box_masks: by_box.len(),
        box_foreground: by_box.first().map_or(0, |m| m.count()),
        point_masks: by_point.len(),
        point_foreground: by_point.first().map_or(0, |m| m.count()),
    })
}
