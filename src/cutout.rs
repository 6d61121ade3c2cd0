//! Cutout geometry around a detected source.

use crate::catalog::SourceRow;
use crate::fits::Plane;

/// Half-open pixel box `[x1, x2) x [y1, y2)` in zero-based image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoutBox {
    pub x1: usize,
    pub x2: usize,
    pub y1: usize,
    pub y2: usize,
}

impl CutoutBox {
    /// Box of half-size `3 * FWHM` (capped at `max_size` when positive) around
    /// the source centre, clipped to an image of `naxis1 x naxis2` pixels.
    pub fn around(source: &SourceRow, max_size: f64, naxis1: usize, naxis2: usize) -> Self {
        let (x, y) = source_center(source);
        let mut size = 3.0 * source.fwhm;
        if max_size > 0.0 && size > max_size {
            size = max_size;
        }
        let clip = |lo: f64, hi: f64, limit: usize| -> (usize, usize) {
            let start = lo.max(0.0).trunc() as usize;
            let end = hi.min(limit as f64).max(0.0).trunc() as usize;
            (start, end)
        };
        let (x1, x2) = clip(x - size, x + size, naxis1);
        let (y1, y2) = clip(y - size, y + size, naxis2);
        Self { x1, x2, y1, y2 }
    }

    pub fn width(&self) -> usize {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> usize {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn cut<T: Copy>(&self, plane: &Plane<T>) -> Plane<T> {
        plane.section(self.x1, self.x2, self.y1, self.y2)
    }
}

/// Zero-based source centre; catalog positions are 1-based.
pub fn source_center(source: &SourceRow) -> (f64, f64) {
    (source.x_image - 1.0, source.y_image - 1.0)
}

/// Turn a segmentation cutout into a bad-pixel mask for `source_id`: the
/// source's own pixels are released (set to 0), other labels stay masked.
pub fn mask_for_source(segmentation: &Plane<i32>, source_id: u32) -> Plane<i32> {
    let id = source_id as i32;
    Plane {
        width: segmentation.width,
        height: segmentation.height,
        data: segmentation
            .data
            .iter()
            .map(|&label| if label == id { 0 } else { label })
            .collect(),
    }
}
