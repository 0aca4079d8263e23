use crate::error::InputError;
use image::{ImageReader, RgbImage};
use std::io::Cursor;

/// Trimmed prompt, rejecting empty and whitespace-only text.
pub fn validate_prompt(prompt: &str) -> Result<&str, InputError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(InputError::EmptyPrompt);
    }
    Ok(prompt)
}

/// Decodes an uploaded image into 8-bit RGB after checking its byte size.
pub fn decode_image(bytes: &[u8], max_bytes: usize) -> Result<RgbImage, InputError> {
    if bytes.is_empty() {
        return Err(InputError::EmptyImage);
    }
    if bytes.len() > max_bytes {
        return Err(InputError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| InputError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| InputError::Decode(e.to_string()))?;
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(InputError::ZeroDimension { width, height });
    }
    Ok(image.to_rgb8())
}

/// Size that fits inside `max_dimension` on the longer side, preserving
/// aspect ratio. Sizes already inside the limit are returned unchanged.
///
/// ```rust
/// # use promptseg::preprocess::fit_within;
/// assert_eq!(fit_within(3000, 1500, 2048), (2048, 1024));
/// assert_eq!(fit_within(640, 480, 2048), (640, 480));
/// ```
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension {
        return (width, height);
    }
    let scale = |v: u32| {
        let scaled = (v as u64 * max_dimension as u64 + longer as u64 / 2) / longer as u64;
        (scaled as u32).max(1)
    };
    if width >= height {
        (max_dimension, scale(height))
    } else {
        (scale(width), max_dimension)
    }
}

/// Shrinks `image` so its longer side is at most `max_dimension`, averaging
/// the source pixels that fall into each target pixel.
pub fn downscale_to_fit(image: RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_width, new_height) = fit_within(width, height, max_dimension);
    if (new_width, new_height) == (width, height) {
        return image;
    }
    log::debug!(
        "resizing image from {}x{} to {}x{}",
        width,
        height,
        new_width,
        new_height
    );
    image::imageops::thumbnail(&image, new_width, new_height)
}
