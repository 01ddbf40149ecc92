//! In-memory NIfTI volume.

use super::header::{DataType, NiftiHeader, NiftiVersion};
use super::io::representable;
use crate::error::{Error, Result};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};

/// A decoded NIfTI volume: parsed header, verbatim header block, and voxels.
///
/// Voxels are always held as `f64` with the header's scaling already applied.
/// The header block is the exact byte range `[0, vox_offset)` of the source
/// stream (header plus any extensions) and is written back unchanged.
#[derive(Debug, Clone)]
pub struct NiftiImage {
    header: NiftiHeader,
    header_block: Vec<u8>,
    data: ArrayD<f64>,
}

impl NiftiImage {
    /// Build an image from an array and a voxel-to-world affine.
    ///
    /// The header is a fresh little-endian NIfTI-1 header (NIfTI-2 when any
    /// extent exceeds 32767) with `f32` storage.
    pub fn from_array(data: ArrayD<f64>, affine: [[f64; 4]; 4]) -> Self {
        let mut header = NiftiHeader::default();
        let shape = data.shape();
        header.ndim = shape.len().clamp(1, 7) as u8;
        for (slot, &extent) in header.dim.iter_mut().zip(shape) {
            *slot = extent as i64;
        }
        header.set_affine(affine);
        if header.requires_nifti2() {
            header.version = NiftiVersion::Nifti2;
            header.vox_offset = NiftiVersion::Nifti2.default_vox_offset();
        }

        let header_block = fresh_block(&header);
        Self {
            header,
            header_block,
            data,
        }
    }

    pub(crate) fn from_parts(header: NiftiHeader, header_block: Vec<u8>, data: ArrayD<f64>) -> Self {
        Self {
            header,
            header_block,
            data,
        }
    }

    /// Change the storage data type recorded in the header.
    ///
    /// Fails when a voxel cannot be stored exactly in `dtype`.
    pub fn with_dtype(mut self, dtype: DataType) -> Result<Self> {
        if let Some(v) = self.data.iter().copied().find(|&v| !representable(v, dtype)) {
            return Err(Error::DataTypeMismatch {
                expected: dtype.to_string(),
                got: format!("voxel value {v}"),
            });
        }
        self.header.patch_storage(&mut self.header_block, dtype)?;
        self.header.datatype = dtype;
        self.header.scl_slope = 1.0;
        self.header.scl_inter = 0.0;
        Ok(self)
    }

    /// Parsed header.
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    /// Verbatim header bytes, `[0, vox_offset)` of the source stream.
    pub fn header_block(&self) -> &[u8] {
        &self.header_block
    }

    /// Voxel values.
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Mutable voxel values. The shape cannot change through this view.
    pub fn data_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.data
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Storage data type declared by the header.
    pub fn dtype(&self) -> DataType {
        self.header.datatype
    }

    /// 4x4 voxel-to-world affine.
    pub fn affine(&self) -> [[f64; 4]; 4] {
        self.header.affine()
    }

    /// Voxel spacing from the header.
    pub fn spacing(&self) -> Vec<f64> {
        self.header.spacing()
    }
}

/// Serialized header padded out to `vox_offset` with a zeroed extension flag.
fn fresh_block(header: &NiftiHeader) -> Vec<u8> {
    let mut block = header.to_bytes();
    block.resize(header.vox_offset as usize, 0u8);
    block
}

/// Allocate an `f64` array in NIfTI (first axis fastest) memory order.
pub(crate) fn fortran_array(shape: &[usize], values: Vec<f64>) -> Result<ArrayD<f64>> {
    ArrayD::from_shape_vec(IxDyn(shape).f(), values)
        .map_err(|e| Error::ShapeMismatch(format!("voxel count does not fit {shape:?}: {e}")))
}
