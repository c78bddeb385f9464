//! Reduce a time series of WFC3/UVIS G280 2D spectra to a transit light curve.
//!
//! The stages are cosmic-ray removal (temporal and spatial), subarray
//! embedding, spectral trace fitting, aperture extraction and light-curve
//! synthesis.

pub mod cosmic_rays;
pub mod embed;
mod error;
pub mod extract;
pub mod light_curve;
pub mod read;
pub mod trace;
pub mod write;

use std::path::PathBuf;

use hifitime::Epoch;

pub use error::G280Error;

/// The number of rows in a UVIS chip.
pub const UVIS_CHIP_ROWS: usize = 2051;

/// The number of columns in a UVIS chip.
pub const UVIS_CHIP_COLS: usize = 4096;

/// The shape of a UVIS chip, in (rows, columns).
pub const UVIS_CHIP_SHAPE: (usize, usize) = (UVIS_CHIP_ROWS, UVIS_CHIP_COLS);

/// The data-quality code for pixels that were not exposed (i.e. outside of a
/// subarray).
pub const DQ_NOT_EXPOSED: i16 = 4;

#[derive(Debug, Clone)]
pub struct Exposure {
    /// The file this exposure was read from.
    pub path: PathBuf,

    /// The file name with the `_flt.fits` suffix removed, e.g.
    /// `iexr01abq`.
    pub rootname: String,

    /// The exposure's mid-time, derived from EXPSTART and EXPEND. Light curves
    /// are indexed by exposure order, but this is carried along so that the
    /// time axis can be written out.
    pub mid_time: Epoch,

    /// Was this exposure read out as a subarray?
    pub subarray: bool,
}
