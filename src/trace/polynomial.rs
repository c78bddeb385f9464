//! A field-dependent polynomial dispersion model, in the style of GRISMCONF.
//!
//! The model is described by a JSON file like:
//!
//! ```json
//! {
//!   "orders": {
//!     "+1": {
//!       "dispx": [[0.0], [1200.0, 0.01, 0.0]],
//!       "dispy": [[0.5], [-60.0]],
//!       "displ": [[1800.0], [6500.0]],
//!       "sensitivity": { "file": "sens_p1.fits" }
//!     }
//!   }
//! }
//! ```
//!
//! Entry `i` of `dispx` (and `dispy`, `displ`) holds the coefficients of
//! `t^i`. Each coefficient is itself a polynomial in the source position, with
//! terms ordered 1, x, y, x², xy, y², x³, …; missing terms are zero.
//!
//! Sensitivities are given either inline (`{"wavelength": [...],
//! "sensitivity": [...]}`) or as a FITS table with WAVELENGTH and SENSITIVITY
//! columns, resolved relative to the JSON file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use argmin::{
    core::{CostFunction, Error as ArgminError, Executor, State},
    solver::brent::BrentRoot,
};
use log::debug;
use serde::Deserialize;

use super::{DispersionModel, TraceError};
use crate::read::fits::{fits_get_col, fits_open, fits_open_hdu, FitsError};

/// Tolerance on `t` when numerically inverting DISPX.
const INVERSION_TOLERANCE: f64 = 1e-10;

/// A polynomial in `t` whose coefficients are polynomials in the source
/// position.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct FieldPolynomial(Vec<Vec<f64>>);

impl FieldPolynomial {
    pub fn new(coefficients: Vec<Vec<f64>>) -> FieldPolynomial {
        FieldPolynomial(coefficients)
    }

    /// The coefficients of `t^0`, `t^1`, ... for a source at (`x0`, `y0`).
    pub fn coefficients(&self, x0: f64, y0: f64) -> Vec<f64> {
        self.0
            .iter()
            .map(|field_terms| eval_field_terms(field_terms, x0, y0))
            .collect()
    }

    pub fn eval(&self, x0: f64, y0: f64, t: f64) -> f64 {
        // Horner
        self.coefficients(x0, y0)
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c)
    }
}

/// Evaluate 2D polynomial terms ordered 1, x, y, x², xy, y², ...
fn eval_field_terms(terms: &[f64], x: f64, y: f64) -> f64 {
    let mut sum = 0.0;
    let mut terms = terms.iter();
    for degree in 0.. {
        for y_power in 0..=degree {
            match terms.next() {
                Some(c) => sum += c * x.powi(degree - y_power) * y.powi(y_power),
                None => return sum,
            }
        }
    }
    sum
}

/// A tabulated sensitivity curve. Wavelengths are ascending; the curve is
/// linearly interpolated and is zero outside of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensitivity {
    wavelength: Vec<f64>,
    sensitivity: Vec<f64>,
}

impl Sensitivity {
    pub fn new(wavelength: Vec<f64>, sensitivity: Vec<f64>) -> Result<Sensitivity, TraceError> {
        if wavelength.len() != sensitivity.len() {
            return Err(TraceError::Sensitivity(format!(
                "{} wavelengths but {} sensitivities",
                wavelength.len(),
                sensitivity.len()
            )));
        }
        if wavelength.is_empty() {
            return Err(TraceError::Sensitivity("the table is empty".to_string()));
        }
        if wavelength.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(TraceError::Sensitivity(
                "wavelengths are not strictly ascending".to_string(),
            ));
        }
        Ok(Sensitivity {
            wavelength,
            sensitivity,
        })
    }

    /// Read the WAVELENGTH and SENSITIVITY columns of the first extension of
    /// a FITS file.
    pub fn from_fits<P: AsRef<Path>>(file: P) -> Result<Sensitivity, TraceError> {
        let file = file.as_ref();
        debug!("Reading sensitivity from {}", file.display());
        let read = || -> Result<(Vec<f64>, Vec<f64>), FitsError> {
            let mut fptr = fits_open(file)?;
            let hdu = fits_open_hdu(&mut fptr, 1)?;
            let wavelength = fits_get_col(&mut fptr, &hdu, "WAVELENGTH")?;
            let sensitivity = fits_get_col(&mut fptr, &hdu, "SENSITIVITY")?;
            Ok((wavelength, sensitivity))
        };
        let (wavelength, sensitivity) = read().map_err(|e| TraceError::Fits(e.in_file(file)))?;
        Sensitivity::new(wavelength, sensitivity)
    }

    pub fn eval(&self, wavelength: f64) -> f64 {
        let wls = &self.wavelength;
        let (first, last) = (wls[0], wls[wls.len() - 1]);
        if !(first..=last).contains(&wavelength) {
            return 0.0;
        }
        // The index of the first tabulated wavelength above `wavelength`.
        let upper = wls.partition_point(|&wl| wl <= wavelength);
        if upper == wls.len() {
            return self.sensitivity[wls.len() - 1];
        }
        let lower = upper - 1;
        let frac = (wavelength - wls[lower]) / (wls[upper] - wls[lower]);
        self.sensitivity[lower] + frac * (self.sensitivity[upper] - self.sensitivity[lower])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SensitivitySource {
    Inline {
        wavelength: Vec<f64>,
        sensitivity: Vec<f64>,
    },
    File {
        file: PathBuf,
    },
}

#[derive(Deserialize)]
struct OrderConfig {
    dispx: FieldPolynomial,
    dispy: FieldPolynomial,
    displ: FieldPolynomial,
    sensitivity: SensitivitySource,
}

#[derive(Deserialize)]
struct ModelConfig {
    orders: BTreeMap<String, OrderConfig>,
}

/// The dispersion solution of a single spectral order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDispersion {
    pub dispx: FieldPolynomial,
    pub dispy: FieldPolynomial,
    pub displ: FieldPolynomial,
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolynomialDispersion {
    orders: BTreeMap<String, OrderDispersion>,
}

impl PolynomialDispersion {
    pub fn new(orders: BTreeMap<String, OrderDispersion>) -> PolynomialDispersion {
        PolynomialDispersion { orders }
    }

    /// Read a model from a JSON file. Relative sensitivity file paths are
    /// relative to the JSON file's directory.
    pub fn from_json_file<P: AsRef<Path>>(file: P) -> Result<PolynomialDispersion, TraceError> {
        let file = file.as_ref();
        debug!("Reading dispersion model from {}", file.display());
        let contents = std::fs::read_to_string(file)?;
        let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_str(&contents, base_dir).map_err(|e| match e {
            TraceError::Json { err, .. } => TraceError::Json {
                file: file.to_path_buf(),
                err,
            },
            e => e,
        })
    }

    /// Parse a model from JSON text, resolving sensitivity files against
    /// `base_dir`.
    pub fn from_json_str(json: &str, base_dir: &Path) -> Result<PolynomialDispersion, TraceError> {
        let config: ModelConfig = serde_json::from_str(json).map_err(|err| TraceError::Json {
            file: PathBuf::new(),
            err,
        })?;

        let mut orders = BTreeMap::new();
        for (name, order) in config.orders {
            let sensitivity = match order.sensitivity {
                SensitivitySource::Inline {
                    wavelength,
                    sensitivity,
                } => Sensitivity::new(wavelength, sensitivity)?,
                SensitivitySource::File { file } => Sensitivity::from_fits(base_dir.join(file))?,
            };
            debug!(
                "Order {name}: DISPX has {} coefficients in t",
                order.dispx.0.len()
            );
            orders.insert(
                name,
                OrderDispersion {
                    dispx: order.dispx,
                    dispy: order.dispy,
                    displ: order.displ,
                    sensitivity,
                },
            );
        }
        Ok(PolynomialDispersion { orders })
    }

    pub fn orders(&self) -> impl Iterator<Item = &str> {
        self.orders.keys().map(|s| s.as_str())
    }

    fn order(&self, order: &str) -> Result<&OrderDispersion, TraceError> {
        self.orders
            .get(order)
            .ok_or_else(|| TraceError::UnknownOrder(order.to_string()))
    }
}

/// DISPX(t) - dx, the root of which is INVDISPX(dx).
struct DispXResidual {
    coefficients: Vec<f64>,
    dx: f64,
}

impl DispXResidual {
    fn eval(&self, t: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * t + c)
            - self.dx
    }
}

impl CostFunction for DispXResidual {
    type Param = f64;
    type Output = f64;

    fn cost(&self, t: &Self::Param) -> Result<Self::Output, ArgminError> {
        Ok(self.eval(*t))
    }
}

impl DispersionModel for PolynomialDispersion {
    fn disp_x(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError> {
        Ok(self.order(order)?.dispx.eval(x0, y0, t))
    }

    fn inv_disp_x(&self, order: &str, x0: f64, y0: f64, dx: f64) -> Result<f64, TraceError> {
        let coefficients = self.order(order)?.dispx.coefficients(x0, y0);
        let inversion_error = |reason: String| TraceError::Inversion {
            order: order.to_string(),
            dx,
            reason,
        };

        // Ignore trailing zero coefficients when deciding if DISPX is linear.
        let degree = coefficients
            .iter()
            .rposition(|&c| c != 0.0)
            .unwrap_or(0);
        match degree {
            0 => return Err(inversion_error("DISPX does not depend on t".to_string())),
            1 => return Ok((dx - coefficients[0]) / coefficients[1]),
            _ => (),
        }

        let residual = DispXResidual { coefficients, dx };
        // Most offsets are between DISPX(0) and DISPX(1), but allow some
        // extrapolation.
        let (t_min, t_max) = [(0.0, 1.0), (-1.0, 2.0)]
            .into_iter()
            .find(|&(lo, hi)| residual.eval(lo) * residual.eval(hi) <= 0.0)
            .ok_or_else(|| inversion_error("no root for t in [-1, 2]".to_string()))?;

        let solver = BrentRoot::new(t_min, t_max, INVERSION_TOLERANCE);
        let res = Executor::new(residual, solver)
            .configure(|state| state.max_iters(100))
            .run()
            .map_err(|e| inversion_error(e.to_string()))?;
        res.state
            .get_param()
            .copied()
            .ok_or_else(|| inversion_error("the solver didn't produce a solution".to_string()))
    }

    fn disp_y(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError> {
        Ok(self.order(order)?.dispy.eval(x0, y0, t))
    }

    fn disp_l(&self, order: &str, x0: f64, y0: f64, t: f64) -> Result<f64, TraceError> {
        Ok(self.order(order)?.displ.eval(x0, y0, t))
    }

    fn sensitivity(&self, order: &str, wavelength: f64) -> Result<f64, TraceError> {
        Ok(self.order(order)?.sensitivity.eval(wavelength))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::fit_trace;
    use approx::assert_abs_diff_eq;
    use fitsio::{
        tables::{ColumnDataType, ColumnDescription},
        FitsFile,
    };
    use tempfile::TempDir;

    const MODEL_JSON: &str = r#"{
        "orders": {
            "+1": {
                "dispx": [[0.0], [1000.0, 0.01]],
                "dispy": [[1.0], [0.0, 0.0, 0.002]],
                "displ": [[2000.0], [6000.0]],
                "sensitivity": {
                    "wavelength": [2000.0, 4000.0, 8000.0],
                    "sensitivity": [1.0, 3.0, 2.0]
                }
            },
            "-1": {
                "dispx": [[0.0], [-500.0], [-20.0]],
                "dispy": [[0.0]],
                "displ": [[2000.0], [6000.0]],
                "sensitivity": {
                    "wavelength": [2000.0, 8000.0],
                    "sensitivity": [0.5, 0.5]
                }
            }
        }
    }"#;

    fn model() -> PolynomialDispersion {
        PolynomialDispersion::from_json_str(MODEL_JSON, Path::new(".")).unwrap()
    }

    #[test]
    fn test_field_terms() {
        // 1 + 2x + 3y + 4x² + 5xy + 6y²
        let terms = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (x, y) = (2.0, 3.0);
        let expected = 1.0 + 4.0 + 9.0 + 16.0 + 30.0 + 54.0;
        assert_abs_diff_eq!(eval_field_terms(&terms, x, y), expected, epsilon = 1e-9);
        assert_abs_diff_eq!(eval_field_terms(&[], x, y), 0.0);
    }

    #[test]
    fn test_polynomial_in_t() {
        let p = FieldPolynomial::new(vec![vec![1.0], vec![2.0], vec![3.0]]);
        assert_abs_diff_eq!(p.eval(0.0, 0.0, 2.0), 1.0 + 4.0 + 12.0);
    }

    #[test]
    fn test_model_evaluation() {
        let m = model();
        assert_eq!(m.orders().collect::<Vec<_>>(), vec!["+1", "-1"]);
        // DISPX for +1 at x0 = 100 is 1001 t.
        assert_abs_diff_eq!(m.disp_x("+1", 100.0, 50.0, 0.5).unwrap(), 500.5, epsilon = 1e-12);
        assert_abs_diff_eq!(m.disp_y("+1", 100.0, 50.0, 0.5).unwrap(), 1.05, epsilon = 1e-12);
        assert_abs_diff_eq!(m.disp_l("+1", 100.0, 50.0, 0.25).unwrap(), 3500.0, epsilon = 1e-12);
        assert!(matches!(
            m.disp_x("+2", 0.0, 0.0, 0.0),
            Err(TraceError::UnknownOrder(_))
        ));
    }

    #[test]
    fn test_linear_inversion() {
        let m = model();
        let t = m.inv_disp_x("+1", 100.0, 50.0, 250.25).unwrap();
        assert_abs_diff_eq!(t, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_numerical_inversion() {
        let m = model();
        for &t in &[0.0, 0.1, 0.5, 0.9, 1.0, 1.3] {
            let dx = m.disp_x("-1", 0.0, 0.0, t).unwrap();
            let inverted = m.inv_disp_x("-1", 0.0, 0.0, dx).unwrap();
            assert_abs_diff_eq!(inverted, t, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_inversion_without_root() {
        let m = model();
        assert!(matches!(
            m.inv_disp_x("-1", 0.0, 0.0, 1e6),
            Err(TraceError::Inversion { .. })
        ));
    }

    #[test]
    fn test_sensitivity_interpolation() {
        let s = Sensitivity::new(vec![2000.0, 4000.0, 8000.0], vec![1.0, 3.0, 2.0]).unwrap();
        assert_abs_diff_eq!(s.eval(2000.0), 1.0);
        assert_abs_diff_eq!(s.eval(3000.0), 2.0);
        assert_abs_diff_eq!(s.eval(6000.0), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s.eval(8000.0), 2.0);
        assert_abs_diff_eq!(s.eval(1999.0), 0.0);
        assert_abs_diff_eq!(s.eval(8001.0), 0.0);
    }

    #[test]
    fn test_bad_sensitivity() {
        assert!(Sensitivity::new(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(Sensitivity::new(vec![], vec![]).is_err());
        assert!(Sensitivity::new(vec![2.0, 1.0], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_bad_json() {
        let result = PolynomialDispersion::from_json_str("{\"orders\": 5}", Path::new("."));
        assert!(matches!(result, Err(TraceError::Json { .. })));
    }

    #[test]
    fn test_sensitivity_from_fits_file() {
        let tmp_dir = TempDir::new().unwrap();
        let sens_path = tmp_dir.path().join("sens.fits");
        {
            let mut fptr = FitsFile::create(&sens_path).open().unwrap();
            let columns = [
                ColumnDescription::new("WAVELENGTH")
                    .with_type(ColumnDataType::Double)
                    .create()
                    .unwrap(),
                ColumnDescription::new("SENSITIVITY")
                    .with_type(ColumnDataType::Double)
                    .create()
                    .unwrap(),
            ];
            let hdu = fptr.create_table("SENS", &columns).unwrap();
            hdu.write_col(&mut fptr, "WAVELENGTH", &[2000.0_f64, 8000.0][..])
                .unwrap();
            hdu.write_col(&mut fptr, "SENSITIVITY", &[1.0_f64, 4.0][..])
                .unwrap();
        }
        let json_path = tmp_dir.path().join("model.json");
        std::fs::write(
            &json_path,
            r#"{"orders": {"+1": {
                "dispx": [[0.0], [1000.0]],
                "dispy": [[0.0]],
                "displ": [[2000.0], [6000.0]],
                "sensitivity": {"file": "sens.fits"}
            }}}"#,
        )
        .unwrap();

        let m = PolynomialDispersion::from_json_file(&json_path).unwrap();
        assert_abs_diff_eq!(m.sensitivity("+1", 5000.0).unwrap(), 2.5);

        let trace = fit_trace(&m, 10.0, 20.0, "+1", 2000.0, 8000.0).unwrap();
        assert_eq!(trace.len(), 1000);
        assert_abs_diff_eq!(trace.x[0], 10.0);
        assert_abs_diff_eq!(trace.y[0], 20.0);
        assert_abs_diff_eq!(trace.sensitivity[0], 1.0);
    }
}
