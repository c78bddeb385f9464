use log::{debug, warn};
use ndarray::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LightCurveError {
    #[error("There are {num_wavelengths} wavelengths, but the spectra have {num_bins} bins")]
    ShapeMismatch {
        num_wavelengths: usize,
        num_bins: usize,
    },
}

/// Band-integrated counts, one value per exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve {
    pub counts: Array1<f64>,

    /// The Poisson error of `counts` *relative* to `counts`, i.e.
    /// sqrt(counts) / counts. Use [`LightCurve::absolute_err`] for an error in
    /// counts.
    pub relative_err: Array1<f64>,
}

impl LightCurve {
    /// The error in units of counts.
    pub fn absolute_err(&self) -> Array1<f64> {
        &self.relative_err * &self.counts
    }
}

/// Sum each exposure's spectrum over the wavelengths strictly between `wl_min`
/// and `wl_max`.
///
/// `counts_time_series` has one row per exposure and one column per
/// wavelength. A window containing no wavelengths gives zero counts rather
/// than an error. Exposures without positive counts have a relative error of
/// zero.
pub fn make_light_curve(
    wavelength: ArrayView1<f64>,
    counts_time_series: ArrayView2<f64>,
    wl_min: f64,
    wl_max: f64,
) -> Result<LightCurve, LightCurveError> {
    let (num_exposures, num_bins) = counts_time_series.dim();
    if num_bins != wavelength.len() {
        return Err(LightCurveError::ShapeMismatch {
            num_wavelengths: wavelength.len(),
            num_bins,
        });
    }

    let selected: Vec<usize> = wavelength
        .iter()
        .enumerate()
        .filter(|(_, &wl)| wl > wl_min && wl < wl_max)
        .map(|(i, _)| i)
        .collect();
    debug!(
        "{} of {} wavelength bins are within ({wl_min}, {wl_max})",
        selected.len(),
        num_bins
    );

    let counts: Array1<f64> = counts_time_series
        .outer_iter()
        .map(|spectrum| selected.iter().map(|&i| spectrum[i]).sum::<f64>())
        .collect();
    let (relative_err, guarded) = relative_poisson_err(counts.view());
    if guarded.non_positive > 0 {
        warn!(
            "{} of {num_exposures} exposures have non-positive counts; their relative errors are set to 0",
            guarded.non_positive
        );
    }
    if guarded.nan > 0 {
        warn!(
            "{} of {num_exposures} exposures have NaN counts; their relative errors are set to 0",
            guarded.nan
        );
    }

    Ok(LightCurve {
        counts,
        relative_err,
    })
}

/// How many values [`relative_poisson_err`] couldn't take a Poisson error of.
#[derive(Debug, Default, PartialEq, Eq)]
struct GuardedCounts {
    non_positive: usize,
    nan: usize,
}

/// sqrt(c) / c for each of `counts`, or 0 where `c` isn't positive.
fn relative_poisson_err(counts: ArrayView1<f64>) -> (Array1<f64>, GuardedCounts) {
    let mut guarded = GuardedCounts::default();
    let relative_err = counts.mapv(|c| {
        if c > 0.0 {
            c.sqrt() / c
        } else {
            if c.is_nan() {
                guarded.nan += 1;
            } else {
                guarded.non_positive += 1;
            }
            0.0
        }
    });
    (relative_err, guarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_light_curve() {
        let wavelength = array![1000.0, 2000.0, 3000.0, 4000.0, 8000.0];
        let counts = array![
            [1.0, 2.0, 10.0, 20.0, 4.0],
            [1.0, 2.0, 40.0, 60.0, 4.0],
        ];
        let lc = make_light_curve(wavelength.view(), counts.view(), 2000.0, 8000.0).unwrap();
        // The bounds are exclusive.
        assert_eq!(lc.counts, array![30.0, 100.0]);
        assert_abs_diff_eq!(lc.relative_err[1], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(lc.absolute_err()[1], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lc.absolute_err()[0], 30.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_window_gives_zeros() {
        let wavelength = array![1000.0, 2000.0];
        let counts = Array2::from_elem((3, 2), 5.0);
        let lc = make_light_curve(wavelength.view(), counts.view(), 5000.0, 6000.0).unwrap();
        assert_eq!(lc.counts.len(), 3);
        assert_eq!(lc.relative_err.len(), 3);
        assert!(lc.counts.iter().all(|&c| c == 0.0));
        assert!(lc.relative_err.iter().all(|&e| e == 0.0));
    }

    #[test]
    fn test_non_positive_counts_are_guarded() {
        let wavelength = array![3000.0];
        let counts = array![[-4.0], [0.0], [4.0]];
        let lc = make_light_curve(wavelength.view(), counts.view(), 2000.0, 8000.0).unwrap();
        assert!(lc.relative_err.iter().all(|e| e.is_finite()));
        assert_eq!(lc.relative_err, array![0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_nan_counts_are_counted_separately() {
        let (relative_err, guarded) =
            relative_poisson_err(array![f64::NAN, -1.0, 0.0, 16.0].view());
        assert_eq!(relative_err, array![0.0, 0.0, 0.0, 0.25]);
        assert_eq!(
            guarded,
            GuardedCounts {
                non_positive: 2,
                nan: 1
            }
        );

        let wavelength = array![3000.0, 4000.0];
        let counts = array![[f64::NAN, 1.0], [2.0, 2.0]];
        let lc = make_light_curve(wavelength.view(), counts.view(), 2000.0, 8000.0).unwrap();
        assert!(lc.counts[0].is_nan());
        assert_eq!(lc.relative_err, array![0.0, 0.5]);
    }

    #[test]
    fn test_shape_mismatch() {
        let wavelength = array![3000.0, 4000.0];
        let counts = Array2::zeros((3, 5));
        assert!(matches!(
            make_light_curve(wavelength.view(), counts.view(), 2000.0, 8000.0),
            Err(LightCurveError::ShapeMismatch { .. })
        ));
    }
}
