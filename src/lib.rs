//! # nilc
//!
//! Merge co-registered NIfTI label masks into a single labeled volume.
//!
//! Every voxel that is non-zero in any input mask is set to one label value in
//! the output. Spatial metadata (affine and header block) is taken verbatim from
//! the first input, and the result is written back as a gzip-compressed `.nii.gz`.
//!
//! ```ignore
//! use nilc::combine::{combine, CombineConfig, RawFile};
//!
//! let files = vec![
//!     RawFile::new("liver.nii.gz", std::fs::read("liver.nii.gz")?),
//!     RawFile::new("tumor.nii.gz", std::fs::read("tumor.nii.gz")?),
//! ];
//! let combined = combine(files, &CombineConfig::default().label("2"))?;
//! println!("{}", combined.before);
//! std::fs::write(&combined.filename, &combined.bytes)?;
//! ```

pub mod combine;
pub mod error;
pub mod nifti;

pub use combine::{
    combine, merge, output_filename, CombineConfig, CombineError, CombinedFile, LabelMerger,
    LabelValue, MergeError, MergeOutcome, RawFile, SummaryTable, VoxelSummary,
};
pub use error::{Error, Result};
pub use nifti::{DataType, NiftiHeader, NiftiImage};
