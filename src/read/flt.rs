//! Reading calibrated WFC3/UVIS exposures (_flt.fits files).

use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use hifitime::{Duration, Epoch};
use log::debug;
use ndarray::prelude::*;

use super::fits::{
    fits_get_image, fits_get_optional_logical_key, fits_get_required_key, fits_open,
    fits_open_hdu, FitsError,
};
use crate::{
    embed::{embed_subarray, FullFramePlanes, SubarrayGeometry},
    Exposure, G280Error, UVIS_CHIP_SHAPE,
};

/// The science, error and data-quality planes of an exposure, exactly as they
/// are stored in the file.
#[derive(Debug, Clone)]
pub struct ImagePlanes {
    pub science: Array2<f32>,
    pub error: Array2<f32>,
    pub dq: Array2<i16>,
}

pub struct FltReader {
    /// Exposure metadata.
    pub exposure: Exposure,

    /// The geometry of the first SCI extension.
    pub geometry: SubarrayGeometry,
}

impl FltReader {
    /// Read the metadata of a _flt.fits file. The image planes are only read
    /// when asked for.
    pub fn new<P: AsRef<Path>>(flt: P) -> Result<FltReader, FitsError> {
        let flt = flt.as_ref();
        debug!("Using flt file: {}", flt.display());
        Self::new_inner(flt).map_err(|e| e.in_file(flt))
    }

    fn new_inner(flt: &Path) -> Result<FltReader, FitsError> {
        let mut flt_fptr = fits_open(flt)?;

        let primary_hdu = fits_open_hdu(&mut flt_fptr, 0)?;
        let exp_start: f64 = fits_get_required_key(&mut flt_fptr, &primary_hdu, "EXPSTART")?;
        let exp_end: f64 = fits_get_required_key(&mut flt_fptr, &primary_hdu, "EXPEND")?;
        let mid_time =
            Epoch::from_mjd_utc(exp_start) + Duration::from_days((exp_end - exp_start) / 2.0);
        let subarray = fits_get_optional_logical_key(&mut flt_fptr, &primary_hdu, "SUBARRAY")?;

        let geometry = read_geometry(&mut flt_fptr)?;
        debug!("NAXIS1, NAXIS2: {}, {}", geometry.naxis1, geometry.naxis2);
        debug!("LTV1, LTV2:     {}, {}", geometry.ltv1, geometry.ltv2);
        debug!("CRPIX1, CRPIX2: {}, {}", geometry.crpix1, geometry.crpix2);

        // Older products may lack SUBARRAY; anything smaller than a chip is a
        // subarray.
        let subarray = subarray.unwrap_or_else(|| geometry.shape() != UVIS_CHIP_SHAPE);

        Ok(FltReader {
            exposure: Exposure {
                path: flt.to_path_buf(),
                rootname: rootname(flt),
                mid_time,
                subarray,
            },
            geometry,
        })
    }

    /// Read the SCI, ERR and DQ planes (extension version 1 of each).
    pub fn read_planes(&self) -> Result<ImagePlanes, FitsError> {
        let flt = &self.exposure.path;
        let read = || -> Result<ImagePlanes, FitsError> {
            let mut flt_fptr = fits_open(flt)?;
            let hdu = fits_open_hdu(&mut flt_fptr, "SCI")?;
            let science = fits_get_image(&mut flt_fptr, &hdu)?;
            let hdu = fits_open_hdu(&mut flt_fptr, "ERR")?;
            let error = fits_get_image(&mut flt_fptr, &hdu)?;
            let hdu = fits_open_hdu(&mut flt_fptr, "DQ")?;
            let dq = fits_get_image(&mut flt_fptr, &hdu)?;
            Ok(ImagePlanes { science, error, dq })
        };
        read().map_err(|e| e.in_file(flt))
    }

    /// Read the image planes and place them on the full UVIS chip. Full-frame
    /// exposures come back unchanged (the window is the whole chip).
    pub fn read_full_frame(&self) -> Result<FullFramePlanes, G280Error> {
        let planes = self.read_planes()?;
        let full_frame = embed_subarray(
            planes.science.view(),
            planes.error.view(),
            planes.dq.view(),
            &self.geometry,
            UVIS_CHIP_SHAPE,
        )?;
        Ok(full_frame)
    }
}

/// Read the geometry keywords from the first SCI extension.
pub(crate) fn read_geometry(flt_fptr: &mut FitsFile) -> Result<SubarrayGeometry, FitsError> {
    let sci_hdu = fits_open_hdu(flt_fptr, "SCI")?;
    Ok(SubarrayGeometry {
        naxis1: fits_get_required_key(flt_fptr, &sci_hdu, "NAXIS1")?,
        naxis2: fits_get_required_key(flt_fptr, &sci_hdu, "NAXIS2")?,
        ltv1: fits_get_required_key(flt_fptr, &sci_hdu, "LTV1")?,
        ltv2: fits_get_required_key(flt_fptr, &sci_hdu, "LTV2")?,
        crpix1: fits_get_required_key(flt_fptr, &sci_hdu, "CRPIX1")?,
        crpix2: fits_get_required_key(flt_fptr, &sci_hdu, "CRPIX2")?,
    })
}

/// The file name without the "_flt.fits" (or just ".fits") suffix.
pub(crate) fn rootname(flt: &Path) -> String {
    let name = flt
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".fits").unwrap_or(&name);
    let name = name.strip_suffix("_flt").unwrap_or(name);
    name.to_string()
}

/// Where the full-frame copy of `flt` goes inside `out_dir`: `root_flt.fits`
/// becomes `root_f_flt.fits`.
pub fn full_frame_path(flt: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}_f_flt.fits", rootname(flt)))
}
