//! Decode, merge and re-encode a set of label masks.
//!
//! [`combine`] runs the whole pipeline for one request: every input is decoded
//! and folded into the [`LabelMerger`] in order, and the combined volume is
//! encoded as `.nii.gz`. The first failure aborts the run and nothing partial is
//! returned.

pub mod merge;
pub mod report;

pub use merge::{merge, LabelMerger, LabelValue, MergeError, MergeOutcome};
pub use report::{SummaryRow, SummaryTable, VoxelSummary};

use crate::error::Error;
use crate::nifti;
use thiserror::Error;
use tracing::{debug, info};

/// Suffix every combined output carries.
pub const OUTPUT_SUFFIX: &str = ".nii.gz";

/// A named input buffer, consumed once by decoding.
#[derive(Debug, Clone)]
pub struct RawFile {
    /// Filename, used for gzip selection and reporting.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl RawFile {
    /// Wrap a name and its bytes.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Parameters of a combine run.
#[derive(Debug, Clone)]
pub struct CombineConfig {
    /// Label value as entered; must parse as a number.
    pub label: String,
    /// Requested output filename (defaults to the first input's name).
    pub output_name: Option<String>,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            label: "1".to_string(),
            output_name: None,
        }
    }
}

impl CombineConfig {
    /// Set the label value.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the requested output filename.
    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct CombinedFile {
    /// Suggested filename, always ending in `.nii.gz`.
    pub filename: String,
    /// Gzip-compressed NIfTI stream.
    pub bytes: Vec<u8>,
    /// Unique values per input before merging.
    pub before: SummaryTable,
    /// Unique values of the combined volume, keyed by `filename`.
    pub after: SummaryTable,
}

/// Failure of a combine run, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum CombineError {
    /// An input could not be decoded.
    #[error("failed to decode '{filename}': {source}")]
    Decode {
        /// Offending input.
        filename: String,
        /// Underlying format error.
        #[source]
        source: Error,
    },

    /// Merging failed.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The combined volume could not be encoded.
    #[error("failed to encode combined volume: {0}")]
    Encode(#[source] Error),
}

/// Output filename for a run.
///
/// A missing or blank request falls back to the first input's name, and
/// `.nii.gz` is appended unless already present (so `mask.nii` becomes
/// `mask.nii.nii.gz`).
pub fn output_filename(requested: Option<&str>, first_input: &str) -> String {
    let base = match requested {
        Some(name) if !name.trim().is_empty() => name,
        _ => first_input,
    };
    if base.ends_with(OUTPUT_SUFFIX) {
        base.to_string()
    } else {
        format!("{base}{OUTPUT_SUFFIX}")
    }
}

/// Combine label masks into one labeled `.nii.gz`.
///
/// Inputs are processed strictly in order; the first input supplies the
/// header, affine and background of the result.
pub fn combine(files: Vec<RawFile>, config: &CombineConfig) -> Result<CombinedFile, CombineError> {
    let first_name = files
        .first()
        .map(|f| f.name.clone())
        .ok_or(MergeError::EmptySequence)?;
    let label: LabelValue = config.label.parse()?;
    let filename = output_filename(config.output_name.as_deref(), &first_name);

    let mut merger = LabelMerger::new(label);
    let count = files.len();
    for RawFile { name, bytes } in files {
        let volume = nifti::decode(&name, &bytes).map_err(|source| CombineError::Decode {
            filename: name.clone(),
            source,
        })?;
        drop(bytes);
        debug!(file = %name, shape = ?volume.shape(), "decoded input");
        merger.push(&name, volume)?;
    }

    let MergeOutcome {
        combined,
        summaries: before,
    } = merger.finish()?;

    let mut after = SummaryTable::new();
    after.insert(filename.clone(), VoxelSummary::of(combined.data()));

    let bytes = nifti::encode(&combined).map_err(CombineError::Encode)?;
    info!(
        inputs = count,
        label = label.value(),
        output = %filename,
        bytes = bytes.len(),
        "combined label masks"
    );

    Ok(CombinedFile {
        filename,
        bytes,
        before,
        after,
    })
}
