//! Prompt-guided segmentation of one uploaded image.
//!
//! A call validates the upload, makes sure the models are loaded, shrinks
//! oversized images, asks the detector for boxes matching the prompt, asks
//! the segmenter for a mask of the first box (falling back to the box centre
//! as a point prompt), draws the result and stores both images.

use crate::bbox::BBox;
use crate::capability::{Mask, SegmentPrompt, Segmenter};
use crate::error::{InputError, Result, SegmentError};
use crate::postprocess::{cutout, Annotator};
use crate::preprocess::{decode_image, downscale_to_fit, validate_prompt};
use crate::state::AppState;
use crate::store::{ArtifactPair, ArtifactStore};
use image::RgbImage;
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

pub struct Pipeline {
    state: Arc<AppState>,
    store: ArtifactStore,
    annotator: Annotator,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// First mask of a segmenter answer, if it is non-empty and matches the
/// image size.
fn usable_mask(answer: Result<Vec<Mask>>, image: &RgbImage, strategy: &str) -> Option<Mask> {
    let masks = match answer {
        Ok(masks) => masks,
        Err(e) => {
            warn!("{} prompt failed: {}", strategy, e);
            return None;
        }
    };
    let Some(mask) = masks.into_iter().next() else {
        debug!("{} prompt returned no masks", strategy);
        return None;
    };
    if mask.dimensions() != image.dimensions() {
        warn!(
            "{} prompt returned a {:?} mask for a {:?} image",
            strategy,
            mask.dimensions(),
            image.dimensions()
        );
        return None;
    }
    if mask.is_empty() {
        debug!("{} prompt returned an empty mask", strategy);
        return None;
    }
    Some(mask)
}

/// Box prompt first, then the box centre as a foreground point.
fn prime_and_predict(
    segmenter: &mut dyn Segmenter,
    image: &RgbImage,
    bbox: BBox,
) -> std::result::Result<Mask, SegmentError> {
    segmenter
        .set_image(image)
        .map_err(|e| SegmentError::Unexpected(format!("priming segmenter failed: {e}")))?;
    let by_box = segmenter.predict(&SegmentPrompt::Box(bbox), false);
    if let Some(mask) = usable_mask(by_box, image, "box") {
        return Ok(mask);
    }
    let (x, y) = bbox.center();
    info!("falling back to point prompt at ({:.1}, {:.1})", x, y);
    let by_point = segmenter.predict(
        &SegmentPrompt::Point {
            x,
            y,
            foreground: true,
        },
        false,
    );
    usable_mask(by_point, image, "point").ok_or(SegmentError::NoMask)
}

impl Pipeline {
    pub fn new(state: Arc<AppState>) -> Self {
        let config = state.config();
        let store = ArtifactStore::new(&config.storage_root);
        let annotator = Annotator::new(&config.annotation);
        Self {
            state,
            store,
            annotator,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs one call and returns what went wrong as a value. The reason is
    /// not logged here; [`Pipeline::try_segment`] does that.
    pub fn run(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> std::result::Result<ArtifactPair, SegmentError> {
        let config = self.state.config();
        if image_bytes.is_empty() {
            return Err(InputError::EmptyImage.into());
        }
        let prompt = validate_prompt(prompt)?;
        let image = decode_image(image_bytes, config.max_upload_bytes)?;

        let capabilities = self
            .state
            .capabilities()
            .map_err(|u| SegmentError::CapabilityUnavailable(u.to_string()))?;

        let image = downscale_to_fit(image, config.max_image_dimension);

        let detections = capabilities
            .detector
            .predict_with_caption(&image, prompt, config.box_threshold, config.text_threshold)
            .map_err(|e| SegmentError::Unexpected(format!("detection failed: {e}")))?;
        let Some((bbox, confidence)) = detections.first() else {
            return Err(SegmentError::NoDetection);
        };
        debug!(
            "{} box(es) for '{}', using {:?} ({:.2})",
            detections.len(),
            prompt,
            bbox,
            confidence
        );

        let mask = self.segment_box(&capabilities.segmenter, &image, bbox)?;

        let annotated = self.annotator.annotate(&image, &mask, &detections, prompt);
        let cutout_image = config
            .annotation
            .write_cutout
            .then(|| cutout(&image, &mask));
        self.store
            .put_pair(&image, &annotated, cutout_image.as_ref())
            .map_err(|e| SegmentError::Persistence(e.to_string()))
    }

    /// Holds the segmenter lock across priming and prediction and clears
    /// the primed image before releasing it, whatever the outcome.
    fn segment_box(
        &self,
        segmenter: &Mutex<Box<dyn Segmenter>>,
        image: &RgbImage,
        bbox: BBox,
    ) -> std::result::Result<Mask, SegmentError> {
        let mut segmenter = segmenter.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            prime_and_predict(&mut **segmenter, image, bbox)
        }))
        .unwrap_or_else(|payload| {
            Err(SegmentError::Unexpected(format!(
                "segmenter panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        if catch_unwind(AssertUnwindSafe(|| segmenter.reset())).is_err() {
            warn!("segmenter reset panicked");
        }
        outcome
    }

    /// Like [`Pipeline::run`], but also turns a panicking model into
    /// [`SegmentError::Unexpected`] and logs the failure reason once.
    pub fn try_segment(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> std::result::Result<ArtifactPair, SegmentError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.run(image_bytes, prompt)))
            .unwrap_or_else(|payload| Err(SegmentError::Unexpected(panic_message(payload.as_ref()))));
        match &outcome {
            Ok(pair) => info!("stored {:?} and {:?}", pair.original, pair.result),
            Err(e) if e.is_expected() => info!("{}", e),
            Err(e @ SegmentError::Unexpected(_)) => error!("{}", e),
            Err(e) => warn!("{}", e),
        }
        outcome
    }

    /// Returns the stored artifacts, or `None` after logging why there are
    /// none. Never panics because of a misbehaving model.
    pub fn segment(&self, image_bytes: &[u8], prompt: &str) -> Option<ArtifactPair> {
        self.try_segment(image_bytes, prompt).ok()
    }
}
