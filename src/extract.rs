//! Box-aperture extraction of 1D spectra.

use std::ops::Range;

use log::debug;
use ndarray::{prelude::*, Zip};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Can't extract a spectrum along an empty trace")]
    EmptyTrace,

    #[error("Aperture rows {y_min}..{y_max}, columns {x_min}..{x_max} is outside of the image with shape {shape:?}")]
    ApertureOutOfBounds {
        y_min: f64,
        y_max: f64,
        x_min: f64,
        x_max: f64,
        shape: (usize, usize),
    },

    #[error("The science image has shape {science:?}, but the error image has shape {error:?}")]
    ShapeMismatch {
        science: (usize, usize),
        error: (usize, usize),
    },

    #[error("The image has shape {got:?}, but the cutout has shape {expected:?}")]
    CutoutShape {
        got: (usize, usize),
        expected: (usize, usize),
    },
}

/// Counts summed over the rows of an aperture, one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSpectrum {
    pub counts: Array1<f64>,

    /// The quadrature sum of the errors of the summed pixels.
    pub counts_err: Array1<f64>,

    /// The image column of the first element of `counts`.
    pub x_min: usize,
}

/// Extract a spectrum by summing rows `y_min..y_max` (truncated to whole
/// pixels) of every column spanned by `trace_x`, from `floor(min(trace_x))`
/// up to and including `floor(max(trace_x))`.
///
/// The aperture is a rectangle; it does not follow the trace's
/// cross-dispersion curvature, so the rows must be wide enough to contain it.
/// The output has one value per aperture column, which is not necessarily the
/// length of `trace_x`.
pub fn extract_spectrum(
    science: ArrayView2<f64>,
    error: ArrayView2<f64>,
    y_min: f64,
    y_max: f64,
    trace_x: ArrayView1<f64>,
) -> Result<ExtractedSpectrum, ExtractError> {
    if science.dim() != error.dim() {
        return Err(ExtractError::ShapeMismatch {
            science: science.dim(),
            error: error.dim(),
        });
    }
    if trace_x.is_empty() {
        return Err(ExtractError::EmptyTrace);
    }

    let trace_min = trace_x.iter().copied().fold(f64::INFINITY, f64::min);
    let trace_max = trace_x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (rows, cols) = science.dim();
    let y_start = y_min.trunc();
    let y_end = y_max.trunc();
    let x_start = trace_min.floor();
    let x_end = trace_max.floor() + 1.0;
    if !(y_start >= 0.0 && x_start >= 0.0 && y_end <= rows as f64 && x_end <= cols as f64)
        || y_end <= y_start
    {
        return Err(ExtractError::ApertureOutOfBounds {
            y_min: y_start,
            y_max: y_end,
            x_min: x_start,
            x_max: x_end,
            shape: (rows, cols),
        });
    }
    let (y_start, y_end) = (y_start as usize, y_end as usize);
    let (x_start, x_end) = (x_start as usize, x_end as usize);
    debug!("Extracting rows {y_start}..{y_end}, columns {x_start}..{x_end}");

    let science = science.slice(s![y_start..y_end, x_start..x_end]);
    let error = error.slice(s![y_start..y_end, x_start..x_end]);
    let counts = science.sum_axis(Axis(0));
    let mut counts_err = Array1::zeros(x_end - x_start);
    Zip::from(&mut counts_err)
        .and(error.columns())
        .for_each(|err, column| *err = column.iter().map(|e| e * e).sum::<f64>().sqrt());

    Ok(ExtractedSpectrum {
        counts,
        counts_err,
        x_min: x_start,
    })
}

/// The part of a full frame around an extraction aperture, padded by a margin
/// so that spatial filters near the aperture's edges see real pixels. The
/// margin is clipped at the edges of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cutout {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Cutout {
    /// The cutout covering rows `y_min..y_max` and the columns spanned by
    /// `trace_x` (as [`extract_spectrum`] would use them) plus `margin` pixels
    /// on every side, within a frame of shape `full_shape`.
    pub fn new(
        trace_x: ArrayView1<f64>,
        y_min: f64,
        y_max: f64,
        margin: usize,
        full_shape: (usize, usize),
    ) -> Cutout {
        let (num_rows, num_cols) = full_shape;
        let x_min = trace_x.iter().copied().fold(f64::INFINITY, f64::min);
        let x_max = trace_x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let clamp = |v: f64, max: usize| (v.max(0.0) as usize).min(max);
        let range = |start: usize, end: usize| start.min(end)..end;

        let rows = range(
            clamp(y_min.trunc(), num_rows).saturating_sub(margin),
            clamp(y_max.trunc(), num_rows).saturating_add(margin).min(num_rows),
        );
        let cols = range(
            clamp(x_min.floor(), num_cols).saturating_sub(margin),
            clamp(x_max.floor() + 1.0, num_cols)
                .saturating_add(margin)
                .min(num_cols),
        );
        Cutout { rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    /// The cutout's view of a full-frame `image`.
    pub fn slice<'a, T>(&self, image: ArrayView2<'a, T>) -> ArrayView2<'a, T> {
        image.slice_move(s![self.rows.clone(), self.cols.clone()])
    }

    /// [`extract_spectrum`] on images that have already been cut out, with the
    /// aperture and trace given in full-frame pixels. The spectrum's `x_min`
    /// is a full-frame column too.
    pub fn extract(
        &self,
        science: ArrayView2<f64>,
        error: ArrayView2<f64>,
        y_min: f64,
        y_max: f64,
        trace_x: ArrayView1<f64>,
    ) -> Result<ExtractedSpectrum, ExtractError> {
        if science.dim() != self.shape() {
            return Err(ExtractError::CutoutShape {
                got: science.dim(),
                expected: self.shape(),
            });
        }
        let row_offset = self.rows.start as f64;
        let col_offset = self.cols.start as f64;
        let trace_x = trace_x.mapv(|x| x - col_offset);
        let mut spectrum = extract_spectrum(
            science,
            error,
            y_min - row_offset,
            y_max - row_offset,
            trace_x.view(),
        )?;
        spectrum.x_min += self.cols.start;
        Ok(spectrum)
    }
}
