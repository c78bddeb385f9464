use indicatif::ProgressBar;
use log::{debug, trace, warn};
use ndarray::{prelude::*, Zip};

use super::{filters::median, validate_sigma, CosmicRayError, OutlierCorrection};

/// Remove temporal cosmic rays from a stack of same-pointing exposures with
/// shape (exposures, rows, columns).
///
/// Each iteration computes the per-pixel median across exposures and the
/// root-mean-square deviation (RMSE) from it. A pixel is flagged in an
/// exposure when its absolute deviation from the median exceeds
/// `n_sigma * RMSE`, and is replaced with the median. Flags accumulate across
/// iterations; a pixel stays flagged once it has been flagged.
///
/// The outlier itself contributes to the RMSE, so an exposure can only deviate
/// by up to `sqrt(N)` RMSEs; `n_sigma` should be below that for outliers to be
/// detectable. With a single exposure, nothing is ever flagged.
pub fn remove_temporal_outliers(
    stack: ArrayView3<f64>,
    n_sigma: f64,
    n_iter: usize,
) -> Result<OutlierCorrection, CosmicRayError> {
    remove_temporal_outliers_with_progress(stack, n_sigma, n_iter, None)
}

/// As [`remove_temporal_outliers`], incrementing `progress_bar` after each
/// iteration.
pub fn remove_temporal_outliers_with_progress(
    stack: ArrayView3<f64>,
    n_sigma: f64,
    n_iter: usize,
    progress_bar: Option<&ProgressBar>,
) -> Result<OutlierCorrection, CosmicRayError> {
    validate_sigma(n_sigma)?;
    let num_exposures = stack.len_of(Axis(0));
    match num_exposures {
        0 => return Err(CosmicRayError::EmptyStack),
        1 => warn!("Only one exposure; no temporal outliers can be detected"),
        _ => (),
    }

    let mut cleaned = stack.to_owned();
    let mut mask = Array3::from_elem(stack.raw_dim(), false);

    for i_iter in 0..n_iter {
        // Every pixel's series is independent of the others, but each
        // iteration must see the fully-corrected stack of the last one.
        Zip::from(cleaned.lanes_mut(Axis(0)))
            .and(mask.lanes_mut(Axis(0)))
            .par_for_each(|series, flags| clean_pixel_series(series, flags, n_sigma));

        trace!(
            "Temporal iteration {i_iter}: {} pixels flagged so far",
            mask.iter().filter(|&&m| m).count()
        );
        if let Some(progress_bar) = progress_bar {
            progress_bar.inc(1);
        }
    }

    let correction = OutlierCorrection { cleaned, mask };
    debug!(
        "Flagged {} temporal outliers over {n_iter} iterations",
        correction.num_flagged()
    );
    Ok(correction)
}

/// One iteration of outlier removal on a single pixel's time series.
fn clean_pixel_series(
    mut series: ArrayViewMut1<f64>,
    mut flags: ArrayViewMut1<bool>,
    n_sigma: f64,
) {
    let mut values = series.to_vec();
    let median = median(&mut values);
    let mean_square =
        series.iter().map(|v| (v - median).powi(2)).sum::<f64>() / values.len() as f64;
    let rmse = mean_square.sqrt();
    let threshold = n_sigma * rmse;

    for (value, flag) in series.iter_mut().zip(flags.iter_mut()) {
        if (*value - median).abs() > threshold {
            *value = median;
            *flag = true;
        }
    }
}
