//! Spectral trace fitting.
//!
//! A grism disperses the light of a source into a trace across the detector.
//! Given a dispersion model, [`fit_trace`] works out which pixels the trace of
//! a spectral order covers and what wavelength lands on each of them.

mod polynomial;

pub use polynomial::{FieldPolynomial, OrderDispersion, PolynomialDispersion, Sensitivity};

use std::path::PathBuf;

use log::{debug, trace, warn};
use ndarray::Array1;
use thiserror::Error;

use crate::{read::fits::FitsError, UVIS_CHIP_SHAPE};

/// The most pixels a trace may span. No order of a real grism is longer than
/// twice the width of the chip.
pub const MAX_TRACE_PIXELS: usize = 2 * UVIS_CHIP_SHAPE.1;

/// Dispersion solutions for the spectral orders of a grism.
///
/// All of the functions are evaluated for a source at (`x0`, `y0`) on the
/// direct image and are parameterised by `t`, which runs over the order from 0
/// to 1.
pub trait DispersionModel {
    /// The offset of the trace along the dispersion (x) axis at `t`.
    fn disp_x(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError>;

    /// The `t` at which the trace is `dx` pixels from the source along the
    /// dispersion axis.
    fn inv_disp_x(&self, order: &str, x0: f64, y0: f64, dx: f64) -> Result<f64, TraceError>;

    /// The cross-dispersion (y) offset of the trace at `t`.
    fn disp_y(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError>;

    /// The wavelength \[Angstrom\] at `t`.
    fn disp_l(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError>;

    /// The sensitivity of the order at `wavelength` \[Angstrom\].
    fn sensitivity(&self, order: &str, wavelength: f64) -> Result<f64, TraceError>;
}

/// Pixel positions of a trace along with the wavelength and sensitivity at
/// each of them. All arrays have the same length and are ordered by
/// increasing dispersion offset.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralTrace {
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub wavelength: Array1<f64>,
    pub sensitivity: Array1<f64>,
}

impl SpectralTrace {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("The dispersion model has no order '{0}'")]
    UnknownOrder(String),

    #[error("Order {order} disperses over {d0}..{d1} pixels, which is less than two pixels")]
    DegenerateDispersion { order: String, d0: f64, d1: f64 },

    #[error("Order {order} disperses over {d0}..{d1} pixels, which is more than {max} pixels")]
    DispersionTooLong {
        order: String,
        d0: f64,
        d1: f64,
        max: usize,
    },

    #[error("Couldn't invert the x dispersion of order {order} at offset {dx}: {reason}")]
    Inversion {
        order: String,
        dx: f64,
        reason: String,
    },

    #[error("Bad sensitivity curve: {0}")]
    Sensitivity(String),

    #[error("Couldn't parse dispersion model {}: {err}", file.display())]
    Json {
        file: PathBuf,
        err: serde_json::Error,
    },

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Fit the trace of `order` for a source at (`source_x`, `source_y`).
///
/// Every whole-pixel offset between the dispersion at `t` = 0 and `t` = 1 is
/// visited, and the pixels whose wavelength is within \[`wl_min`, `wl_max`\]
/// (inclusive) are kept. A trace with no pixels in that range is returned
/// empty.
pub fn fit_trace<M: DispersionModel + ?Sized>(
    model: &M,
    source_x: f64,
    source_y: f64,
    order: &str,
    wl_min: f64,
    wl_max: f64,
) -> Result<SpectralTrace, TraceError> {
    let mut ends = [
        model.disp_x(order, source_x, source_y, 0.0)?,
        model.disp_x(order, source_x, source_y, 1.0)?,
    ];
    ends.sort_unstable_by(f64::total_cmp);
    let [d0, d1] = ends;
    let num_offsets = (d1 - d0).ceil();
    if !num_offsets.is_finite() || num_offsets < 2.0 {
        return Err(TraceError::DegenerateDispersion {
            order: order.to_string(),
            d0,
            d1,
        });
    }
    if num_offsets > MAX_TRACE_PIXELS as f64 {
        return Err(TraceError::DispersionTooLong {
            order: order.to_string(),
            d0,
            d1,
            max: MAX_TRACE_PIXELS,
        });
    }
    let num_offsets = num_offsets as usize;
    debug!("Order {order} spans {num_offsets} pixels from offset {d0}");

    let mut x = vec![];
    let mut y = vec![];
    let mut wavelength = vec![];
    for i in 0..num_offsets {
        let dx = d0 + i as f64;
        let t = model.inv_disp_x(order, source_x, source_y, dx)?;
        let dy = model.disp_y(order, source_x, source_y, t)?;
        let wl = model.disp_l(order, source_x, source_y, t)?;
        trace!("dx {dx}: t {t}, dy {dy}, wavelength {wl}");
        if (wl_min..=wl_max).contains(&wl) {
            x.push(dx + source_x);
            y.push(dy + source_y);
            wavelength.push(wl);
        }
    }

    if wavelength.is_empty() {
        warn!("No pixels of order {order} have wavelengths between {wl_min} and {wl_max}");
    }
    let sensitivity = wavelength
        .iter()
        .map(|&wl| model.sensitivity(order, wl))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SpectralTrace {
        x: Array1::from(x),
        y: Array1::from(y),
        wavelength: Array1::from(wavelength),
        sensitivity: Array1::from(sensitivity),
    })
}
