//! Thin wrappers over fitsio that turn failures into [`FitsError`]s.

use std::{
    ffi::CString,
    fmt::Display,
    os::raw::c_char,
    path::{Path, PathBuf},
    ptr,
};

use fitsio::{hdu::*, FitsFile};
use ndarray::Array2;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("Couldn't open {}: {err}", file.display())]
    Open {
        file: PathBuf,
        err: fitsio::errors::Error,
    },

    #[error("Couldn't open HDU {hdu}: {err}")]
    Hdu {
        hdu: String,
        err: fitsio::errors::Error,
    },

    #[error("Keyword {0} is missing")]
    MissingKey(String),

    #[error("Couldn't parse the value '{value}' of keyword {key}")]
    Parse { key: String, value: String },

    #[error("Expected a 2D image, but the HDU has shape {0:?}")]
    NotImage(Vec<usize>),

    #[error("Keyword {0} contains a nul byte")]
    InvalidKeyword(String),

    #[error("{}: {source}", file.display())]
    InFile {
        file: PathBuf,
        #[source]
        source: Box<FitsError>,
    },

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),
}

impl FitsError {
    /// Attach the name of the file being worked on to this error.
    pub(crate) fn in_file(self, file: &Path) -> FitsError {
        match self {
            // Already has a file name.
            e @ (FitsError::Open { .. } | FitsError::InFile { .. }) => e,
            e => FitsError::InFile {
                file: file.to_path_buf(),
                source: Box::new(e),
            },
        }
    }
}

/// Open a fits file.
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::open(file.as_ref()).map_err(|err| FitsError::Open {
        file: file.as_ref().to_path_buf(),
        err,
    })
}

/// Open a fits file for modification.
pub(crate) fn fits_edit<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::edit(file.as_ref()).map_err(|err| FitsError::Open {
        file: file.as_ref().to_path_buf(),
        err,
    })
}

/// Open a fits file's HDU. This also makes it the "current" HDU for any
/// low-level cfitsio calls that follow.
pub(crate) fn fits_open_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    fits_fptr
        .hdu(hdu_description)
        .map_err(|err| FitsError::Hdu {
            hdu: hdu_description.to_string(),
            err,
        })
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword, parsing it into the
/// desired type.
pub(crate) fn fits_get_optional_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<T>, FitsError> {
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(e) => match &e {
            fitsio::errors::Error::Fits(fe) => match fe.status {
                // KEY_NO_EXIST or VALUE_UNDEFINED
                202 | 204 => return Ok(None),
                _ => return Err(FitsError::Fitsio(e)),
            },
            _ => return Err(FitsError::Fitsio(e)),
        },
    };

    match unparsed_value.trim().parse() {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => Err(FitsError::Parse {
            key: keyword.to_string(),
            value: unparsed_value,
        }),
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword, pull out
/// the value of the keyword, parsing it into the desired type.
pub(crate) fn fits_get_required_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<T, FitsError> {
    match fits_get_optional_key(fits_fptr, hdu, keyword)? {
        Some(value) => Ok(value),
        None => Err(FitsError::MissingKey(keyword.to_string())),
    }
}

/// As [`fits_get_optional_key`], but for logical (T/F) keywords.
pub(crate) fn fits_get_optional_logical_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<bool>, FitsError> {
    let value: Option<String> = fits_get_optional_key(fits_fptr, hdu, keyword)?;
    match value.as_deref() {
        None => Ok(None),
        Some("T") => Ok(Some(true)),
        Some("F") => Ok(Some(false)),
        Some(other) => Err(FitsError::Parse {
            key: keyword.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Get a column from a fits file's HDU.
pub(crate) fn fits_get_col<T: fitsio::tables::ReadsCol>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Vec<T>, FitsError> {
    Ok(hdu.read_col(fits_fptr, keyword)?)
}

/// Get the shape of the 2D image on the supplied HDU, as (rows, columns).
pub(crate) fn fits_get_image_shape(hdu: &FitsHdu) -> Result<(usize, usize), FitsError> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => Ok((shape[0], shape[1])),
        HduInfo::ImageInfo { shape, .. } => Err(FitsError::NotImage(shape.clone())),
        _ => Err(FitsError::NotImage(vec![])),
    }
}

/// Given a FITS file pointer and a HDU, read the associated 2D image.
pub(crate) fn fits_get_image<T>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
) -> Result<Array2<T>, FitsError>
where
    Vec<T>: fitsio::images::ReadImage,
{
    let shape = fits_get_image_shape(hdu)?;
    let data: Vec<T> = hdu.read_image(fits_fptr)?;
    Array2::from_shape_vec(shape, data).map_err(|_| FitsError::NotImage(vec![shape.0, shape.1]))
}

fn keyword_to_cstring(keyword: &str) -> Result<CString, FitsError> {
    CString::new(keyword).map_err(|_| FitsError::InvalidKeyword(keyword.to_string()))
}

/// Set a floating-point keyword on a HDU, replacing the value (but not the
/// comment) if the keyword already exists.
///
/// fitsio's `write_key` always appends a new card, which would leave the old
/// value in front of the new one.
pub(crate) fn fits_update_key_f64<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
    keyword: &str,
    value: f64,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu_description)?;
    let keyword_ffi = keyword_to_cstring(keyword)?;
    let mut status = 0;
    unsafe {
        // ffukyd = fits_update_key_dbl
        fitsio_sys::ffukyd(
            fits_fptr.as_raw(),
            keyword_ffi.as_ptr() as *mut c_char,
            value,
            -15,
            ptr::null_mut(),
            &mut status,
        );
    }
    fitsio::errors::check_status(status)?;
    Ok(())
}

/// Set an integer keyword on a HDU. See [`fits_update_key_f64`].
pub(crate) fn fits_update_key_i64<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
    keyword: &str,
    value: i64,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu_description)?;
    let keyword_ffi = keyword_to_cstring(keyword)?;
    let mut status = 0;
    unsafe {
        // ffukyj = fits_update_key_lng
        fitsio_sys::ffukyj(
            fits_fptr.as_raw(),
            keyword_ffi.as_ptr() as *mut c_char,
            value,
            ptr::null_mut(),
            &mut status,
        );
    }
    fitsio::errors::check_status(status)?;
    Ok(())
}

/// Set a logical keyword on a HDU. See [`fits_update_key_f64`].
pub(crate) fn fits_update_key_logical<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
    keyword: &str,
    value: bool,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu_description)?;
    let keyword_ffi = keyword_to_cstring(keyword)?;
    let mut status = 0;
    unsafe {
        // ffukyl = fits_update_key_log
        fitsio_sys::ffukyl(
            fits_fptr.as_raw(),
            keyword_ffi.as_ptr() as *mut c_char,
            i32::from(value),
            ptr::null_mut(),
            &mut status,
        );
    }
    fitsio::errors::check_status(status)?;
    Ok(())
}
