pub mod fits;
pub mod flt;

pub use flt::{FltReader, ImagePlanes};
