//! `NIfTI` file format support.
//!
//! `NIfTI` (Neuroimaging Informatics Technology Initiative) is a standard format
//! for neuroimaging data. This module reads and writes single-file `.nii` and
//! `.nii.gz` streams, holding voxels as `f64` and the header block verbatim.

pub(crate) mod header;
pub(crate) mod image;
pub mod io;

pub use header::{DataType, NiftiHeader, NiftiVersion, SpatialUnits, TemporalUnits};
pub use image::NiftiImage;
pub use io::{
    decode, decode_bytes, encode, encode_uncompressed, is_gzip_name, load, save, GZIP_MAGIC,
};
