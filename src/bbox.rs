//! Axis-aligned boxes and detector output

/// A box in pixel coordinates, `x2 >= x1` and `y2 >= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Builds a box from two corners in any order.
    ///
    /// ```rust
    /// # use promptseg::bbox::BBox;
    /// let bbox = BBox::new(400.0, 300.0, 100.0, 100.0);
    /// assert_eq!((bbox.x1, bbox.y1, bbox.x2, bbox.y2), (100.0, 100.0, 400.0, 300.0));
    /// ```
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn from_xyxy(xyxy: [f32; 4]) -> Self {
        Self::new(xyxy[0], xyxy[1], xyxy[2], xyxy[3])
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Clamps the box into an image of the given size.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            x1: self.x1.clamp(0.0, max_x),
            y1: self.y1.clamp(0.0, max_y),
            x2: self.x2.clamp(0.0, max_x),
            y2: self.y2.clamp(0.0, max_y),
        }
    }

    /// Multiplies every coordinate, used when the image is resized.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// Ordered boxes with a parallel confidence per box.
#[derive(Debug, Clone, Default)]
pub struct Detections {
    pub boxes: Vec<BBox>,
    pub confidence: Vec<f32>,
}

impl Detections {
    pub fn new(boxes: Vec<BBox>, confidence: Vec<f32>) -> Self {
        debug_assert_eq!(boxes.len(), confidence.len());
        Self { boxes, confidence }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// The primary detection, the only one that gets a mask.
    pub fn first(&self) -> Option<(BBox, f32)> {
        let bbox = *self.boxes.first()?;
        let confidence = self.confidence.first().copied().unwrap_or(0.0);
        Some((bbox, confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn center_of_box() {
        let (cx, cy) = BBox::new(100.0, 100.0, 400.0, 300.0).center();
        assert_approx_eq!(f32, cx, 250.0);
        assert_approx_eq!(f32, cy, 200.0);
    }

    #[test]
    fn clamp_keeps_box_inside_image() {
        let bbox = BBox::new(-5.0, 10.0, 120.0, 80.0).clamp_to(100, 50);
        assert_eq!(bbox, BBox::new(0.0, 10.0, 99.0, 49.0));
    }

    #[test]
    fn first_detection_pairs_box_with_score() {
        let detections = Detections::new(
            vec![BBox::new(0.0, 0.0, 1.0, 1.0), BBox::new(2.0, 2.0, 3.0, 3.0)],
            vec![0.9, 0.4],
        );
        let (bbox, score) = detections.first().unwrap();
        assert_eq!(bbox, BBox::new(0.0, 0.0, 1.0, 1.0));
        assert_approx_eq!(f32, score, 0.9);
        assert!(Detections::empty().first().is_none());
    }
}
