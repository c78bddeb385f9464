use thiserror::Error;

use crate::{
    cosmic_rays::CosmicRayError, embed::EmbedError, extract::ExtractError,
    light_curve::LightCurveError, read::fits::FitsError, trace::TraceError, write::WriteError,
};

/// Any error that can come out of the pipeline.
#[derive(Error, Debug)]
pub enum G280Error {
    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    CosmicRay(#[from] CosmicRayError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    LightCurve(#[from] LightCurveError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("No pixels of the {order} trace fall between {wl_min} and {wl_max} Angstroms")]
    EmptyTrace { order: String, wl_min: f64, wl_max: f64 },

    #[error("No input files were supplied")]
    NoInputs,

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}
