//! Embed a detector subarray into the full frame of its chip.
//!
//! This follows `embedsub` from wfc3tools, but takes the subarray geometry
//! from the SCI extension's header rather than from a _spt.fits file.

use std::ops::Range;

use log::debug;
use ndarray::prelude::*;
use thiserror::Error;

use crate::DQ_NOT_EXPOSED;

/// The header geometry of an image extension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubarrayGeometry {
    /// The number of columns (NAXIS1).
    pub naxis1: usize,

    /// The number of rows (NAXIS2).
    pub naxis2: usize,

    /// The offset of the image's origin from the chip's origin along the
    /// columns, negated (LTV1).
    pub ltv1: f64,

    /// The offset of the image's origin from the chip's origin along the rows,
    /// negated (LTV2).
    pub ltv2: f64,

    /// The reference pixel along the columns (CRPIX1).
    pub crpix1: f64,

    /// The reference pixel along the rows (CRPIX2).
    pub crpix2: f64,
}

/// Where a subarray lands in the full frame (0-indexed, exclusive ends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementWindow {
    pub y_min: usize,
    pub y_max: usize,
    pub x_min: usize,
    pub x_max: usize,
}

impl PlacementWindow {
    pub fn rows(&self) -> Range<usize> {
        self.y_min..self.y_max
    }

    pub fn cols(&self) -> Range<usize> {
        self.x_min..self.x_max
    }
}

impl SubarrayGeometry {
    /// The subarray's shape as (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        (self.naxis2, self.naxis1)
    }

    /// Work out where this subarray sits inside a full frame of shape
    /// `full_shape` (rows, columns).
    pub fn window(&self, full_shape: (usize, usize)) -> Result<PlacementWindow, EmbedError> {
        let y_min = (-self.ltv2).round();
        let x_min = (-self.ltv1).round();
        let out_of_bounds = || EmbedError::WindowOutOfBounds {
            y_min,
            y_max: y_min + self.naxis2 as f64,
            x_min,
            x_max: x_min + self.naxis1 as f64,
            full_shape,
        };

        // Checked as floats so that huge offsets can't overflow the casts.
        let fits = y_min >= 0.0
            && x_min >= 0.0
            && y_min + self.naxis2 as f64 <= full_shape.0 as f64
            && x_min + self.naxis1 as f64 <= full_shape.1 as f64;
        if !fits {
            return Err(out_of_bounds());
        }
        let y_min = y_min as usize;
        let x_min = x_min as usize;
        Ok(PlacementWindow {
            y_min,
            y_max: y_min + self.naxis2,
            x_min,
            x_max: x_min + self.naxis1,
        })
    }

    /// The geometry of this image after it has been embedded at `window` in a
    /// full frame of shape `full_shape`.
    pub fn to_full_frame(&self, window: PlacementWindow, full_shape: (usize, usize)) -> Self {
        SubarrayGeometry {
            naxis1: full_shape.1,
            naxis2: full_shape.0,
            ltv1: 0.0,
            ltv2: 0.0,
            crpix1: self.crpix1 + window.x_min as f64,
            crpix2: self.crpix2 + window.y_min as f64,
        }
    }
}

/// The science, error and data-quality planes of a full-frame image.
#[derive(Debug, Clone)]
pub struct FullFramePlanes {
    pub science: Array2<f32>,
    pub error: Array2<f32>,
    pub dq: Array2<i16>,

    /// The geometry after embedding (full-frame sizes, shifted reference
    /// pixel, zero offsets).
    pub geometry: SubarrayGeometry,

    /// Where the subarray data were placed.
    pub window: PlacementWindow,
}

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Subarray window rows {y_min}..{y_max}, columns {x_min}..{x_max} does not fit in a full frame of shape {full_shape:?}")]
    WindowOutOfBounds {
        y_min: f64,
        y_max: f64,
        x_min: f64,
        x_max: f64,
        full_shape: (usize, usize),
    },

    #[error("The {plane} plane has shape {got:?}, but {expected:?} was expected")]
    ShapeMismatch {
        plane: &'static str,
        got: (usize, usize),
        expected: (usize, usize),
    },
}

/// Place a subarray's science, error and data-quality planes into a full frame
/// of shape `full_shape` (rows, columns).
///
/// Pixels outside of the subarray have zero science and error and the
/// [`DQ_NOT_EXPOSED`] data-quality flag. The inputs are not modified.
pub fn embed_subarray(
    science: ArrayView2<f32>,
    error: ArrayView2<f32>,
    dq: ArrayView2<i16>,
    geometry: &SubarrayGeometry,
    full_shape: (usize, usize),
) -> Result<FullFramePlanes, EmbedError> {
    let expected = geometry.shape();
    for (plane, got) in [
        ("SCI", science.dim()),
        ("ERR", error.dim()),
        ("DQ", dq.dim()),
    ] {
        if got != expected {
            return Err(EmbedError::ShapeMismatch {
                plane,
                got,
                expected,
            });
        }
    }

    let window = geometry.window(full_shape)?;
    debug!(
        "Embedding {}x{} subarray at rows {:?}, columns {:?}",
        geometry.naxis2,
        geometry.naxis1,
        window.rows(),
        window.cols()
    );

    let mut full_science = Array2::zeros(full_shape);
    let mut full_error = Array2::zeros(full_shape);
    let mut full_dq = Array2::from_elem(full_shape, DQ_NOT_EXPOSED);
    full_science
        .slice_mut(s![window.rows(), window.cols()])
        .assign(&science);
    full_error
        .slice_mut(s![window.rows(), window.cols()])
        .assign(&error);
    full_dq
        .slice_mut(s![window.rows(), window.cols()])
        .assign(&dq);

    Ok(FullFramePlanes {
        science: full_science,
        error: full_error,
        dq: full_dq,
        geometry: geometry.to_full_frame(window, full_shape),
        window,
    })
}

/// Cut the originally-embedded subarray back out of a full frame.
pub fn crop_to_window(planes: &FullFramePlanes) -> (Array2<f32>, Array2<f32>, Array2<i16>) {
    let (rows, cols) = (planes.window.rows(), planes.window.cols());
    (
        planes.science.slice(s![rows.clone(), cols.clone()]).to_owned(),
        planes.error.slice(s![rows.clone(), cols.clone()]).to_owned(),
        planes.dq.slice(s![rows, cols]).to_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UVIS_CHIP_SHAPE;
    use approx::assert_abs_diff_eq;

    fn geometry(naxis1: usize, naxis2: usize, ltv1: f64, ltv2: f64) -> SubarrayGeometry {
        SubarrayGeometry {
            naxis1,
            naxis2,
            ltv1,
            ltv2,
            crpix1: 100.5,
            crpix2: 20.0,
        }
    }

    fn planes(rows: usize, cols: usize) -> (Array2<f32>, Array2<f32>, Array2<i16>) {
        (
            Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f32),
            Array2::from_shape_fn((rows, cols), |(r, c)| 0.1 * (r + c) as f32),
            Array2::from_shape_fn((rows, cols), |(r, c)| ((r + c) % 3) as i16 * 512),
        )
    }

    #[test]
    fn test_window() {
        let g = geometry(400, 30, -1000.0, -250.0);
        let window = g.window(UVIS_CHIP_SHAPE).unwrap();
        assert_eq!(
            window,
            PlacementWindow {
                y_min: 250,
                y_max: 280,
                x_min: 1000,
                x_max: 1400
            }
        );
    }

    #[test]
    fn test_window_out_of_bounds() {
        let g = geometry(400, 30, -3800.0, -250.0);
        assert!(matches!(
            g.window(UVIS_CHIP_SHAPE),
            Err(EmbedError::WindowOutOfBounds { .. })
        ));
        let g = geometry(400, 30, 5.0, -250.0);
        assert!(matches!(
            g.window(UVIS_CHIP_SHAPE),
            Err(EmbedError::WindowOutOfBounds { .. })
        ));
        let g = geometry(400, 30, -10.0, -2040.0);
        assert!(matches!(
            g.window(UVIS_CHIP_SHAPE),
            Err(EmbedError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_huge_offsets_are_out_of_bounds() {
        for (ltv1, ltv2) in [
            (-1.0, -1e300),
            (-1e300, -1.0),
            (-f64::MAX, -f64::MAX),
            (f64::NAN, -1.0),
            (-1.0, f64::NEG_INFINITY),
        ] {
            let g = geometry(4, 3, ltv1, ltv2);
            assert!(
                matches!(
                    g.window(UVIS_CHIP_SHAPE),
                    Err(EmbedError::WindowOutOfBounds { .. })
                ),
                "LTV ({ltv1}, {ltv2}) should not fit"
            );
        }
    }

    #[test]
    fn test_embed_then_crop_round_trips() {
        let (sci, err, dq) = planes(30, 40);
        let g = geometry(40, 30, -17.0, -5.0);
        let full = embed_subarray(sci.view(), err.view(), dq.view(), &g, (64, 96)).unwrap();
        assert_eq!(full.science.dim(), (64, 96));

        let (sci2, err2, dq2) = crop_to_window(&full);
        assert_eq!(sci2, sci);
        assert_eq!(err2, err);
        assert_eq!(dq2, dq);
    }

    #[test]
    fn test_outside_window_is_not_exposed() {
        let (sci, err, dq) = planes(3, 4);
        let g = geometry(4, 3, -2.0, -1.0);
        let full = embed_subarray(sci.view(), err.view(), dq.view(), &g, (6, 8)).unwrap();

        for ((r, c), &v) in full.dq.indexed_iter() {
            if full.window.rows().contains(&r) && full.window.cols().contains(&c) {
                assert_eq!(v, dq[(r - 1, c - 2)]);
            } else {
                assert_eq!(v, DQ_NOT_EXPOSED);
                assert_abs_diff_eq!(full.science[(r, c)], 0.0);
                assert_abs_diff_eq!(full.error[(r, c)], 0.0);
            }
        }
    }

    #[test]
    fn test_geometry_is_updated() {
        let (sci, err, dq) = planes(30, 400);
        let g = geometry(400, 30, -1000.0, -250.0);
        let full =
            embed_subarray(sci.view(), err.view(), dq.view(), &g, UVIS_CHIP_SHAPE).unwrap();
        assert_eq!(full.geometry.naxis1, 4096);
        assert_eq!(full.geometry.naxis2, 2051);
        assert_abs_diff_eq!(full.geometry.ltv1, 0.0);
        assert_abs_diff_eq!(full.geometry.ltv2, 0.0);
        assert_abs_diff_eq!(full.geometry.crpix1, 1100.5);
        assert_abs_diff_eq!(full.geometry.crpix2, 270.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let (sci, err, _) = planes(30, 40);
        let dq = Array2::zeros((30, 41));
        let g = geometry(40, 30, 0.0, 0.0);
        let result = embed_subarray(sci.view(), err.view(), dq.view(), &g, (64, 96));
        assert!(matches!(
            result,
            Err(EmbedError::ShapeMismatch { plane: "DQ", .. })
        ));
    }
}
