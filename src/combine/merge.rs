//! Label merging: fold a sequence of masks into one labeled volume.
//!
//! The first volume becomes the accumulator: its non-zero voxels are set to the
//! label and its zero voxels are kept. Each later volume then writes the label
//! wherever *its own* voxels are non-zero. The union of all non-zero masks ends
//! up labeled; everything else keeps the first volume's original values.

use super::report::{SummaryTable, VoxelSummary};
use crate::nifti::NiftiImage;
use ndarray::Zip;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Failures of the merge stage.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    /// No volumes were supplied.
    #[error("no volumes to combine")]
    EmptySequence,

    /// A later volume does not share the accumulator's voxel grid.
    #[error("shape mismatch for '{filename}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Offending input.
        filename: String,
        /// Accumulator shape (first input).
        expected: Vec<usize>,
        /// Shape of the offending input.
        got: Vec<usize>,
    },

    /// The label value is not a number.
    #[error("invalid label value '{0}': not a number")]
    InvalidLabel(String),
}

/// Scalar written into every foreground voxel.
///
/// Any number is accepted, including zero, negatives, infinities and NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelValue(f64);

impl LabelValue {
    /// Wrap a numeric label.
    pub const fn new(value: f64) -> Self {
        Self(value)
    }

    /// The numeric label.
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Default for LabelValue {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f64> for LabelValue {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl FromStr for LabelValue {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .map(Self)
            .map_err(|_| MergeError::InvalidLabel(s.to_string()))
    }
}

/// Result of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Combined volume: first input's header block with merged voxels.
    pub combined: NiftiImage,
    /// Per-input summaries captured before each input touched the accumulator.
    pub summaries: SummaryTable,
}

/// Incremental label merger.
///
/// Volumes are pushed in order; the first one pushed is moved into the merger
/// and mutated in place as the accumulator.
///
/// # Example
/// ```ignore
/// let mut merger = LabelMerger::new(LabelValue::new(2.0));
/// merger.push("liver.nii.gz", liver)?;
/// merger.push("tumor.nii.gz", tumor)?;
/// let outcome = merger.finish()?;
/// ```
#[derive(Debug)]
pub struct LabelMerger {
    label: LabelValue,
    accumulator: Option<NiftiImage>,
    summaries: SummaryTable,
}

impl LabelMerger {
    /// Start an empty merge run.
    pub fn new(label: LabelValue) -> Self {
        Self {
            label,
            accumulator: None,
            summaries: SummaryTable::new(),
        }
    }

    /// Fold one more volume into the accumulator.
    pub fn push(&mut self, filename: &str, volume: NiftiImage) -> Result<(), MergeError> {
        let label = self.label.value();

        let Some(accumulator) = self.accumulator.as_mut() else {
            // summary is taken before the first volume is relabeled
            self.summaries
                .insert(filename, VoxelSummary::of(volume.data()));
            let mut volume = volume;
            volume
                .data_mut()
                .mapv_inplace(|v| if v != 0.0 { label } else { v });
            debug!(filename, shape = ?volume.shape(), "accumulator initialised");
            self.accumulator = Some(volume);
            return Ok(());
        };

        if accumulator.shape() != volume.shape() {
            return Err(MergeError::ShapeMismatch {
                filename: filename.to_string(),
                expected: accumulator.shape().to_vec(),
                got: volume.shape().to_vec(),
            });
        }

        self.summaries
            .insert(filename, VoxelSummary::of(volume.data()));
        Zip::from(accumulator.data_mut())
            .and(volume.data())
            .for_each(|acc, &v| {
                if v != 0.0 {
                    *acc = label;
                }
            });
        debug!(filename, "volume merged");
        Ok(())
    }

    /// Finish the run, handing the accumulator over as the combined volume.
    pub fn finish(self) -> Result<MergeOutcome, MergeError> {
        let combined = self.accumulator.ok_or(MergeError::EmptySequence)?;
        Ok(MergeOutcome {
            combined,
            summaries: self.summaries,
        })
    }
}

/// Merge named volumes in iteration order.
pub fn merge<I, S>(volumes: I, label: LabelValue) -> Result<MergeOutcome, MergeError>
where
    I: IntoIterator<Item = (S, NiftiImage)>,
    S: AsRef<str>,
{
    let mut merger = LabelMerger::new(label);
    for (filename, volume) in volumes {
        merger.push(filename.as_ref(), volume)?;
    }
    merger.finish()
}
