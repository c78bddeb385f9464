//! Writing full-frame _flt.fits files and light curves.

use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use itertools::izip;
use log::{debug, trace, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{
    embed::FullFramePlanes,
    light_curve::LightCurve,
    read::{
        fits::{
            fits_edit, fits_get_optional_key, fits_open_hdu, fits_update_key_f64,
            fits_update_key_i64, fits_update_key_logical, FitsError,
        },
        flt::full_frame_path,
        FltReader,
    },
    Exposure, G280Error,
};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error("Refusing to overwrite the input file {}", .0.display())]
    WouldOverwrite(PathBuf),

    #[error("{num_exposures} exposures were supplied, but the light curve has {num_points} points")]
    LengthMismatch {
        num_exposures: usize,
        num_points: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// The image extensions of a _flt.fits file that get resized.
const IMAGE_EXTENSIONS: [&str; 3] = ["SCI", "ERR", "DQ"];

/// Embed the subarray exposure `flt` into its full chip, writing the result to
/// `<out_dir>/<root>_f_flt.fits`. The input file is never modified.
///
/// Returns the path of the new file.
pub fn embedsub_file<P: AsRef<Path>, P2: AsRef<Path>>(
    flt: P,
    out_dir: P2,
) -> Result<PathBuf, G280Error> {
    let flt = flt.as_ref();
    let reader = FltReader::new(flt)?;
    if !reader.exposure.subarray {
        warn!(
            "{} is not a subarray exposure; the output will be a plain copy",
            flt.display()
        );
    }
    let full_frame = reader.read_full_frame()?;
    let output = write_full_frame_file(flt, out_dir, &full_frame)?;
    Ok(output)
}

/// Write already-embedded planes of the exposure `flt` to
/// `<out_dir>/<root>_f_flt.fits`. The input file is copied first so that all
/// of its other extensions and header cards survive.
pub fn write_full_frame_file<P: AsRef<Path>, P2: AsRef<Path>>(
    flt: P,
    out_dir: P2,
    planes: &FullFramePlanes,
) -> Result<PathBuf, WriteError> {
    let flt = flt.as_ref();
    let output = full_frame_path(flt, out_dir.as_ref());
    if output.exists() && output.canonicalize()? == flt.canonicalize()? {
        return Err(WriteError::WouldOverwrite(output));
    }
    debug!("Copying {} to {}", flt.display(), output.display());
    std::fs::copy(flt, &output)?;

    write_full_frame(&output, planes).map_err(|e| WriteError::Fits(e.in_file(&output)))?;
    Ok(output)
}

/// Replace the image planes of an existing _flt.fits file with full-frame data
/// and bring its headers in line with them.
pub(crate) fn write_full_frame(file: &Path, planes: &FullFramePlanes) -> Result<(), FitsError> {
    let mut fptr = fits_edit(file)?;
    let (num_rows, num_cols) = planes.science.dim();

    for extension in IMAGE_EXTENSIONS {
        let hdu = fits_open_hdu(&mut fptr, extension)?;
        let hdu = hdu.resize(&mut fptr, &[num_rows, num_cols])?;
        trace!("Resized {extension} to {num_rows}x{num_cols}");
        match extension {
            "SCI" => hdu.write_image(&mut fptr, &flatten(planes.science.iter()))?,
            "ERR" => hdu.write_image(&mut fptr, &flatten(planes.error.iter()))?,
            _ => hdu.write_image(&mut fptr, &flatten(planes.dq.iter()))?,
        }
        update_extension_keys(&mut fptr, extension, planes)?;
    }

    fits_update_key_i64(&mut fptr, "SCI", "SIZAXIS1", num_cols as i64)?;
    fits_update_key_i64(&mut fptr, "SCI", "SIZAXIS2", num_rows as i64)?;
    fits_update_key_logical(&mut fptr, 0, "SUBARRAY", false)?;
    Ok(())
}

fn flatten<'a, T: Copy + 'a>(values: impl Iterator<Item = &'a T>) -> Vec<T> {
    values.copied().collect()
}

/// Shift CRPIX and zero LTV on one extension, leaving absent keys absent.
fn update_extension_keys(
    fptr: &mut FitsFile,
    extension: &str,
    planes: &FullFramePlanes,
) -> Result<(), FitsError> {
    let window = planes.window;
    let hdu = fits_open_hdu(fptr, extension)?;
    let crpix1: Option<f64> = fits_get_optional_key(fptr, &hdu, "CRPIX1")?;
    let crpix2: Option<f64> = fits_get_optional_key(fptr, &hdu, "CRPIX2")?;
    let ltv1: Option<f64> = fits_get_optional_key(fptr, &hdu, "LTV1")?;
    let ltv2: Option<f64> = fits_get_optional_key(fptr, &hdu, "LTV2")?;

    if let Some(crpix1) = crpix1 {
        fits_update_key_f64(fptr, extension, "CRPIX1", crpix1 + window.x_min as f64)?;
    }
    if let Some(crpix2) = crpix2 {
        fits_update_key_f64(fptr, extension, "CRPIX2", crpix2 + window.y_min as f64)?;
    }
    if ltv1.is_some() {
        fits_update_key_f64(fptr, extension, "LTV1", 0.0)?;
    }
    if ltv2.is_some() {
        fits_update_key_f64(fptr, extension, "LTV2", 0.0)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct LightCurveRow<'a> {
    exposure: &'a str,
    mjd: f64,
    counts: f64,
    relative_error: f64,
    absolute_error: f64,
}

/// Write a light curve as CSV, one row per exposure.
pub fn write_light_curve<P: AsRef<Path>>(
    path: P,
    exposures: &[Exposure],
    light_curve: &LightCurve,
) -> Result<(), WriteError> {
    if exposures.len() != light_curve.counts.len() {
        return Err(WriteError::LengthMismatch {
            num_exposures: exposures.len(),
            num_points: light_curve.counts.len(),
        });
    }

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    let absolute_err = light_curve.absolute_err();
    for (exposure, &counts, &relative_error, &absolute_error) in izip!(
        exposures,
        &light_curve.counts,
        &light_curve.relative_err,
        &absolute_err
    ) {
        writer.serialize(LightCurveRow {
            exposure: &exposure.rootname,
            mjd: exposure.mid_time.to_mjd_utc_days(),
            counts,
            relative_error,
            absolute_error,
        })?;
    }
    writer.flush()?;
    debug!("Wrote {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        read::{
            fits::{fits_get_optional_logical_key, fits_get_required_key, fits_open},
            flt::tests::{test_planes, write_test_flt},
        },
        DQ_NOT_EXPOSED, UVIS_CHIP_SHAPE,
    };
    use approx::assert_abs_diff_eq;
    use hifitime::Epoch;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_embedsub_file() {
        let tmp_dir = TempDir::new().unwrap();
        let input = tmp_dir.path().join("sub01abq_flt.fits");
        let out_dir = tmp_dir.path().join("out");
        std::fs::create_dir(&out_dir).unwrap();
        let planes = test_planes(5, 8);
        write_test_flt(&input, &planes, (-1000.0, -250.0), (4.0, 2.5), 59000.0);
        let input_bytes = std::fs::read(&input).unwrap();

        let output = embedsub_file(&input, &out_dir).unwrap();
        assert_eq!(output, out_dir.join("sub01abq_f_flt.fits"));
        // The input is untouched.
        assert_eq!(std::fs::read(&input).unwrap(), input_bytes);

        let reader = FltReader::new(&output).unwrap();
        assert!(!reader.exposure.subarray);
        assert_eq!(reader.geometry.shape(), UVIS_CHIP_SHAPE);
        assert_abs_diff_eq!(reader.geometry.ltv1, 0.0);
        assert_abs_diff_eq!(reader.geometry.ltv2, 0.0);
        assert_abs_diff_eq!(reader.geometry.crpix1, 1004.0);
        assert_abs_diff_eq!(reader.geometry.crpix2, 252.5);

        let full = reader.read_planes().unwrap();
        assert_eq!(full.science.dim(), UVIS_CHIP_SHAPE);
        assert_abs_diff_eq!(full.science[(250, 1000)], planes.science[(0, 0)]);
        assert_abs_diff_eq!(full.error[(254, 1007)], planes.error[(4, 7)]);
        assert_eq!(full.dq[(0, 0)], DQ_NOT_EXPOSED);
        assert_abs_diff_eq!(full.science[(0, 0)], 0.0);

        let mut fptr = fits_open(&output).unwrap();
        let sci = fits_open_hdu(&mut fptr, "SCI").unwrap();
        let sizaxis1: i64 = fits_get_required_key(&mut fptr, &sci, "SIZAXIS1").unwrap();
        let sizaxis2: i64 = fits_get_required_key(&mut fptr, &sci, "SIZAXIS2").unwrap();
        assert_eq!((sizaxis2, sizaxis1), (2051, 4096));
        let dq = fits_open_hdu(&mut fptr, "DQ").unwrap();
        let ltv1: f64 = fits_get_required_key(&mut fptr, &dq, "LTV1").unwrap();
        assert_abs_diff_eq!(ltv1, 0.0);
        // CRPIX was only on SCI and shouldn't appear elsewhere.
        let crpix1: Option<f64> = fits_get_optional_key(&mut fptr, &dq, "CRPIX1").unwrap();
        assert!(crpix1.is_none());
        let primary = fits_open_hdu(&mut fptr, 0).unwrap();
        assert_eq!(
            fits_get_optional_logical_key(&mut fptr, &primary, "SUBARRAY").unwrap(),
            Some(false)
        );
    }

    #[test]
    fn test_write_light_curve() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("lc.csv");
        let exposures: Vec<Exposure> = (0..2)
            .map(|i| Exposure {
                path: PathBuf::from(format!("e{i}_flt.fits")),
                rootname: format!("e{i}"),
                mid_time: Epoch::from_mjd_utc(59000.0 + f64::from(i)),
                subarray: true,
            })
            .collect();
        let light_curve = LightCurve {
            counts: array![100.0, 400.0],
            relative_err: array![0.1, 0.05],
        };

        write_light_curve(&path, &exposures, &light_curve).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["exposure", "mjd", "counts", "relative_error", "absolute_error"]
        );
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][0], "e1");
        let absolute: f64 = records[1][4].parse().unwrap();
        assert_abs_diff_eq!(absolute, 20.0, epsilon = 1e-9);
        let mjd: f64 = records[0][1].parse().unwrap();
        assert_abs_diff_eq!(mjd, 59000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_write_light_curve_length_mismatch() {
        let tmp_dir = TempDir::new().unwrap();
        let light_curve = LightCurve {
            counts: array![1.0],
            relative_err: array![1.0],
        };
        let result = write_light_curve(tmp_dir.path().join("lc.csv"), &[], &light_curve);
        assert!(matches!(result, Err(WriteError::LengthMismatch { .. })));
    }
}
