//! Cosmic-ray removal for a time series of images.
//!
//! Temporal removal compares each pixel against the same pixel in all other
//! exposures; spatial removal compares each pixel against its neighbours in
//! the same exposure. Both return a corrected copy of the stack alongside a
//! mask of the pixels that were replaced; the input is never modified.

pub mod filters;
mod spatial;
mod temporal;

pub use spatial::{remove_spatial_outliers, remove_spatial_outliers_with_progress};
pub use temporal::{remove_temporal_outliers, remove_temporal_outliers_with_progress};

use ndarray::prelude::*;
use thiserror::Error;

/// A corrected stack of images, with shape (exposures, rows, columns).
#[derive(Debug, Clone)]
pub struct OutlierCorrection {
    /// The images with outliers replaced by median values.
    pub cleaned: Array3<f64>,

    /// `true` where a pixel was identified as an outlier. Same shape as
    /// `cleaned`.
    pub mask: Array3<bool>,
}

impl OutlierCorrection {
    /// The total number of flagged pixels across all exposures.
    pub fn num_flagged(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

#[derive(Error, Debug)]
pub enum CosmicRayError {
    #[error("The number of sigma must be a positive, finite number; got {0}")]
    InvalidSigma(f64),

    #[error("The filter kernel size must be at least 1")]
    InvalidKernel,

    #[error("Cannot remove cosmic rays from a stack with no exposures")]
    EmptyStack,
}

pub(crate) fn validate_sigma(n_sigma: f64) -> Result<(), CosmicRayError> {
    if n_sigma.is_finite() && n_sigma > 0.0 {
        Ok(())
    } else {
        Err(CosmicRayError::InvalidSigma(n_sigma))
    }
}
