//! Boolean image masks
//!
//! Masks are dense in memory but serialized sparsely as the coordinates of
//! their set pixels, since an ROI covers a tiny fraction of the scan grid.

use crate::error::MalformedField;
use serde::{Deserialize, Serialize};

/// Dense boolean mask over a `rows x cols` grid, stored row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "SparseMask", try_from = "SparseMask")]
pub struct ImageMask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

/// Largest grid a mask may cover
pub const MAX_PIXELS: usize = 1 << 26;

/// Pixel count of a `rows x cols` grid, or `None` past [`MAX_PIXELS`]
pub fn grid_len(rows: usize, cols: usize) -> Option<usize> {
    rows.checked_mul(cols).filter(|&len| len <= MAX_PIXELS)
}

fn too_large(rows: usize, cols: usize) -> String {
    format!("{}x{} grid exceeds {} pixels", rows, cols, MAX_PIXELS)
}

impl ImageMask {
    /// Empty mask, or `None` if the grid is larger than [`MAX_PIXELS`]
    pub fn new(rows: usize, cols: usize) -> Option<Self> {
        let len = grid_len(rows, cols)?;
        Some(Self {
            rows,
            cols,
            data: vec![false; len],
        })
    }

    /// Build a mask from 1-based pixel indices unraveled in column-major
    /// order, so index `i` lands on row `(i - 1) % rows`, column
    /// `(i - 1) / rows`. Repeated indices set the same pixel.
    pub fn from_pixel_list(
        field: &str,
        rows: usize,
        cols: usize,
        indices: &[i64],
    ) -> Result<Self, MalformedField> {
        let mut mask = ImageMask::new(rows, cols)
            .ok_or_else(|| MalformedField::new(field, too_large(rows, cols)))?;
        let len = mask.data.len();
        for &index in indices {
            let offset = usize::try_from(index)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .filter(|&z| z < len)
                .ok_or_else(|| {
                    MalformedField::new(
                        field,
                        format!("pixel index {} outside 1..={} for a {}x{} grid", index, len, rows, cols),
                    )
                })?;
            mask.set(offset % rows, offset / rows);
        }
        Ok(mask)
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Panics if `(row, col)` is outside the grid
    pub fn set(&mut self, row: usize, col: usize) {
        assert!(row < self.rows && col < self.cols, "pixel ({row}, {col}) outside mask");
        self.data[row * self.cols + col] = true;
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.data[row * self.cols + col]
    }

    /// Number of set pixels
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&p| p).count()
    }

    /// Set pixels as `[row, col]`, in row-major order
    pub fn pixels(&self) -> Vec<[usize; 2]> {
        self.data
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p)
            .map(|(i, _)| [i / self.cols, i % self.cols])
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct SparseMask {
    shape: [usize; 2],
    pixels: Vec<[usize; 2]>,
}

impl From<ImageMask> for SparseMask {
    fn from(mask: ImageMask) -> Self {
        SparseMask {
            shape: mask.shape(),
            pixels: mask.pixels(),
        }
    }
}

impl TryFrom<SparseMask> for ImageMask {
    type Error = String;

    fn try_from(sparse: SparseMask) -> Result<Self, Self::Error> {
        let [rows, cols] = sparse.shape;
        let mut mask = ImageMask::new(rows, cols).ok_or_else(|| too_large(rows, cols))?;
        for [row, col] in sparse.pixels {
            if row >= rows || col >= cols {
                return Err(format!("pixel ({row}, {col}) outside {rows}x{cols} mask"));
            }
            mask.set(row, col);
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_count() {
        let mut mask = ImageMask::new(4, 3).unwrap();
        mask.set(0, 0);
        mask.set(3, 2);
        mask.set(3, 2);
        assert!(mask.get(0, 0));
        assert!(mask.get(3, 2));
        assert!(!mask.get(1, 1));
        assert!(!mask.get(10, 10));
        assert_eq!(mask.count(), 2);
        assert_eq!(mask.pixels(), vec![[0, 0], [3, 2]]);
    }

    #[test]
    fn test_pixel_list_is_one_based_column_major() {
        let mask = ImageMask::from_pixel_list("roi_pixel_list", 512, 512, &[1, 2, 513, 513]).unwrap();
        assert_eq!(mask.count(), 3);
        assert!(mask.get(0, 0));
        // Second index walks down the first column
        assert!(mask.get(1, 0));
        // One full column later
        assert!(mask.get(0, 1));
    }

    #[test]
    fn test_pixel_list_bounds() {
        let last = ImageMask::from_pixel_list("roi_pixel_list", 3, 2, &[6]).unwrap();
        assert!(last.get(2, 1));

        for bad in [0, -4, 7] {
            let err = ImageMask::from_pixel_list("neuropil_pixel_list", 3, 2, &[bad]).unwrap_err();
            assert_eq!(err.field, "neuropil_pixel_list");
        }
    }

    #[test]
    fn test_serializes_sparse() {
        let mut mask = ImageMask::new(512, 512).unwrap();
        mask.set(1, 0);
        let json = serde_json::to_value(&mask).unwrap();
        assert_eq!(json, serde_json::json!({"shape": [512, 512], "pixels": [[1, 0]]}));

        let back: ImageMask = serde_json::from_value(json).unwrap();
        assert_eq!(back, mask);
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        assert!(ImageMask::new(1 << 33, 1 << 33).is_none());
        assert!(ImageMask::new(usize::MAX, 2).is_none());

        let err = ImageMask::from_pixel_list("roi_pixel_list", 1 << 20, 1 << 20, &[1]).unwrap_err();
        assert_eq!(err.field, "roi_pixel_list");

        let json = serde_json::json!({"shape": [1u64 << 33, 1u64 << 33], "pixels": []});
        assert!(serde_json::from_value::<ImageMask>(json).is_err());
    }

    #[test]
    fn test_rejects_pixels_outside_shape() {
        let json = serde_json::json!({"shape": [2, 2], "pixels": [[2, 0]]});
        assert!(serde_json::from_value::<ImageMask>(json).is_err());
    }
}
