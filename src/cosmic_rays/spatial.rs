use indicatif::ProgressBar;
use log::{debug, trace, warn};
use ndarray::{prelude::*, Zip};
use rayon::prelude::*;

use super::{
    filters::{median_filter, std_filter},
    validate_sigma, CosmicRayError, OutlierCorrection,
};

/// Remove spatial cosmic rays from each image of a stack with shape
/// (exposures, rows, columns).
///
/// For every exposure, a pixel is flagged when its absolute deviation from the
/// local median exceeds `n_sigma` times the local (population) standard
/// deviation, both computed over a `kernel_size` × `kernel_size` window.
/// Flagged pixels are replaced with the local median. This is a single pass;
/// each exposure's mask only describes that exposure.
pub fn remove_spatial_outliers(
    stack: ArrayView3<f64>,
    n_sigma: f64,
    kernel_size: usize,
) -> Result<OutlierCorrection, CosmicRayError> {
    remove_spatial_outliers_with_progress(stack, n_sigma, kernel_size, None)
}

/// As [`remove_spatial_outliers`], incrementing `progress_bar` after each
/// exposure.
pub fn remove_spatial_outliers_with_progress(
    stack: ArrayView3<f64>,
    n_sigma: f64,
    kernel_size: usize,
    progress_bar: Option<&ProgressBar>,
) -> Result<OutlierCorrection, CosmicRayError> {
    validate_sigma(n_sigma)?;
    if kernel_size == 0 {
        return Err(CosmicRayError::InvalidKernel);
    }
    if stack.len_of(Axis(0)) == 0 {
        return Err(CosmicRayError::EmptyStack);
    }

    let mut cleaned = stack.to_owned();
    let mut mask = Array3::from_elem(stack.raw_dim(), false);

    // Exposures don't share anything, so they can be done in parallel.
    let num_clamped: usize = cleaned
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(mask.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .map(|(i_exposure, (image, image_mask))| {
            let num_clamped = clean_image(image, image_mask, n_sigma, kernel_size);
            trace!("Exposure {i_exposure}: {num_clamped} negative local variances clamped");
            if let Some(progress_bar) = progress_bar {
                progress_bar.inc(1);
            }
            num_clamped
        })
        .sum();

    if num_clamped > 0 {
        warn!("Clamped {num_clamped} slightly negative local variances to zero");
    }

    let correction = OutlierCorrection { cleaned, mask };
    debug!("Flagged {} spatial outliers", correction.num_flagged());
    Ok(correction)
}

/// Replace the outliers of a single image in place, returning the number of
/// pixels whose local variance had to be clamped.
fn clean_image(
    mut image: ArrayViewMut2<f64>,
    mut mask: ArrayViewMut2<bool>,
    n_sigma: f64,
    kernel_size: usize,
) -> usize {
    let local_median = median_filter(image.view(), kernel_size);
    let (local_std, num_clamped) = std_filter(image.view(), kernel_size);

    Zip::from(&mut image)
        .and(&mut mask)
        .and(&local_median)
        .and(&local_std)
        .for_each(|value, flag, &median, &std| {
            if (*value - median).abs() > n_sigma * std {
                *value = median;
                *flag = true;
            }
        });

    num_clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(num_rows: usize, num_cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((num_rows, num_cols), |(r, c)| {
            10.0 + 0.5 * (r + c) as f64
        })
    }

    #[test]
    fn test_spike_is_flagged_and_replaced() {
        let mut stack = Array3::from_elem((1, 7, 7), 10.0);
        stack[(0, 3, 3)] = 1000.0;

        let result = remove_spatial_outliers(stack.view(), 3.0, 3).unwrap();
        assert!(result.mask[(0, 3, 3)]);
        assert_eq!(result.num_flagged(), 1);
        assert_abs_diff_eq!(result.cleaned[(0, 3, 3)], 10.0);
        assert_abs_diff_eq!(stack[(0, 3, 3)], 1000.0);
    }

    #[test]
    fn test_exposures_are_independent() {
        let mut stack = Array3::zeros((3, 12, 12));
        for mut image in stack.outer_iter_mut() {
            image.assign(&ramp(12, 12));
        }
        stack[(1, 5, 5)] += 500.0;

        let result = remove_spatial_outliers(stack.view(), 3.0, 3).unwrap();
        assert_eq!(result.num_flagged(), 1);
        assert!(result.mask[(1, 5, 5)]);
        assert_abs_diff_eq!(result.cleaned[(1, 5, 5)], 15.0);
        assert_eq!(result.cleaned.index_axis(Axis(0), 0), ramp(12, 12));
        assert_eq!(result.cleaned.index_axis(Axis(0), 2), ramp(12, 12));
    }

    #[test]
    fn test_second_pass_flags_nothing() {
        let mut stack = Array3::zeros((2, 12, 12));
        for mut image in stack.outer_iter_mut() {
            image.assign(&ramp(12, 12));
        }
        stack[(0, 5, 5)] += 500.0;
        stack[(1, 8, 2)] -= 400.0;

        let first = remove_spatial_outliers(stack.view(), 3.0, 3).unwrap();
        assert_eq!(first.num_flagged(), 2);

        let second = remove_spatial_outliers(first.cleaned.view(), 3.0, 3).unwrap();
        assert_eq!(second.num_flagged(), 0);
        assert_eq!(second.cleaned, first.cleaned);
    }

    #[test]
    fn test_shape_is_preserved() {
        let stack = Array3::from_shape_fn((4, 5, 9), |(i, r, c)| (i + r * c) as f64);
        let result = remove_spatial_outliers(stack.view(), 3.0, 5).unwrap();
        assert_eq!(result.cleaned.dim(), (4, 5, 9));
        assert_eq!(result.mask.dim(), (4, 5, 9));
    }

    #[test]
    fn test_bad_arguments() {
        let stack = Array3::<f64>::zeros((2, 4, 4));
        assert!(matches!(
            remove_spatial_outliers(stack.view(), 3.0, 0),
            Err(CosmicRayError::InvalidKernel)
        ));
        assert!(matches!(
            remove_spatial_outliers(stack.view(), -1.0, 3),
            Err(CosmicRayError::InvalidSigma(_))
        ));
    }
}
