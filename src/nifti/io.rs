//! NIfTI byte-stream decoding and encoding.
//!
//! - Compression is selected by filename: a `.gz` suffix means gzip, anything
//!   else is parsed as a bare `.nii` stream. Content is never sniffed.
//! - Gzip input is inflated single-shot with libdeflate, sized from the ISIZE
//!   trailer, with a streaming multi-member fallback.
//! - Output keeps the source header block byte-for-byte unless the voxel values
//!   no longer fit its storage type.

use super::header::{DataType, NiftiHeader};
use super::image::{fortran_array, NiftiImage};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::bufread::MultiGzDecoder;
use half::{bf16, f16};
use libdeflater::{CompressionLvl, Compressor, DecompressionError, Decompressor};
use ndarray::ArrayD;
use rayon::prelude::*;
use std::borrow::Cow;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Leading bytes of every gzip member (RFC 1952).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const GZIP_BUFFER_SIZE: usize = 256 * 1024;

/// Upper bound on the deflate expansion ratio.
const MAX_DEFLATE_RATIO: usize = 1032;

/// Whether a filename selects gzip decoding.
pub fn is_gzip_name(name: &str) -> bool {
    name.ends_with(".gz")
}

/// Decode a named NIfTI byte buffer.
///
/// `.gz`-suffixed names are inflated first; everything else is parsed as-is.
///
/// # Example
/// ```ignore
/// let bytes = std::fs::read("mask.nii.gz")?;
/// let img = nilc::nifti::decode("mask.nii.gz", &bytes)?;
/// ```
pub fn decode(name: &str, bytes: &[u8]) -> Result<NiftiImage> {
    if is_gzip_name(name) {
        decode_gzipped(bytes)
    } else {
        decode_bytes(bytes).map_err(|e| hint_misnamed_gzip(bytes, e))
    }
}

/// Decode an uncompressed single-file NIfTI stream.
pub fn decode_bytes(bytes: &[u8]) -> Result<NiftiImage> {
    let header = NiftiHeader::from_bytes(bytes)?;
    let offset = header.vox_offset as usize;
    let data_size = header.data_size();
    let end = offset
        .checked_add(data_size)
        .ok_or_else(|| Error::InvalidDimensions("data extent overflow".into()))?;

    if bytes.len() < end {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "image data truncated: stream has {} bytes, header requires {} (offset {} + data {})",
                bytes.len(),
                end,
                offset,
                data_size
            ),
        )));
    }

    let values = decode_voxels(&bytes[offset..end], &header);
    let data = fortran_array(&header.shape(), values)?;

    debug!(
        shape = ?header.shape(),
        dtype = %header.datatype,
        version = ?header.version,
        "decoded NIfTI volume"
    );

    Ok(NiftiImage::from_parts(header, bytes[..offset].to_vec(), data))
}

/// Encode an image as a gzip-compressed `.nii.gz` byte stream.
pub fn encode(image: &NiftiImage) -> Result<Vec<u8>> {
    let raw = encode_uncompressed(image)?;
    compress_gzip(&raw)
}

/// Encode an image as an uncompressed `.nii` byte stream.
///
/// The header block is copied verbatim when every voxel is exactly
/// representable in the header's storage type; otherwise storage is widened to
/// `f32` (or `f64`) and only the datatype, bitpix and scaling fields change.
pub fn encode_uncompressed(image: &NiftiImage) -> Result<Vec<u8>> {
    let header = image.header();
    let declared = header.shape();
    if declared.as_slice() != image.shape() {
        return Err(Error::ShapeMismatch(format!(
            "header declares shape {:?} but array has shape {:?}",
            declared,
            image.shape()
        )));
    }

    let offset = header.vox_offset as usize;
    let block = image.header_block();
    if block.len() != offset || block.len() < header.header_size() {
        return Err(Error::InvalidFileFormat(format!(
            "header block is {} bytes but vox_offset is {} (header size {})",
            block.len(),
            offset,
            header.header_size()
        )));
    }

    let (dtype, scaling) = choose_storage(header, image.data());

    let mut out = Vec::with_capacity(offset + image.data().len() * dtype.byte_size());
    out.extend_from_slice(block);
    if dtype != header.datatype {
        warn!(
            from = %header.datatype,
            to = %dtype,
            "voxel values do not fit source storage type, widening"
        );
        header.patch_storage(&mut out[..offset], dtype)?;
    }

    let voxels = if header.is_little_endian() {
        encode_voxels::<LittleEndian>(image.data(), dtype, scaling)
    } else {
        encode_voxels::<BigEndian>(image.data(), dtype, scaling)
    };
    out.extend_from_slice(&voxels);
    Ok(out)
}

/// Load a NIfTI image from file, selecting gzip by the `.gz` extension.
pub fn load<P: AsRef<Path>>(path: P) -> Result<NiftiImage> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    decode(&name, &bytes)
}

/// Save a NIfTI image; `.gz` paths are compressed, others written bare.
pub fn save<P: AsRef<Path>>(image: &NiftiImage, path: P) -> Result<()> {
    let path = path.as_ref();
    let is_gzipped = path.extension().is_some_and(|e| e == "gz");
    let bytes = if is_gzipped {
        encode(image)?
    } else {
        encode_uncompressed(image)?
    };
    std::fs::write(path, bytes)?;
    Ok(())
}

fn hint_misnamed_gzip(bytes: &[u8], err: Error) -> Error {
    if bytes.starts_with(&GZIP_MAGIC) {
        Error::InvalidFileFormat(format!(
            "{err} (stream starts with gzip magic bytes; name the file with a .gz suffix)"
        ))
    } else {
        err
    }
}

fn decode_gzipped(compressed: &[u8]) -> Result<NiftiImage> {
    let (output, used_streaming) = decompress_gzip_with_fallback(compressed)?;
    match decode_bytes(&output) {
        // ISIZE only describes the last member of a multi-member stream
        Err(Error::Io(e)) if !used_streaming && e.kind() == std::io::ErrorKind::UnexpectedEof => {
            decode_bytes(&decompress_gzip_streaming(compressed)?)
        }
        result => result,
    }
}

fn estimate_gzip_uncompressed_size(compressed: &[u8]) -> usize {
    // ISIZE per RFC 1952: "original input size modulo 2^32"
    if compressed.len() >= 4 {
        let trailer = &compressed[compressed.len() - 4..];
        u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as usize
    } else {
        compressed.len() * 4
    }
}

fn decompress_gzip_streaming(compressed: &[u8]) -> Result<Vec<u8>> {
    let cursor = std::io::Cursor::new(compressed);
    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(GZIP_BUFFER_SIZE, cursor));

    let capacity = estimate_gzip_uncompressed_size(compressed)
        .min(compressed.len().saturating_mul(MAX_DEFLATE_RATIO));
    let mut output = Vec::with_capacity(capacity);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Decompression(format!("gzip stream decode failed: {e}")))?;
    Ok(output)
}

fn decompress_gzip_with_fallback(compressed: &[u8]) -> Result<(Vec<u8>, bool)> {
    if !compressed.starts_with(&GZIP_MAGIC) {
        return Err(Error::Decompression(
            "stream does not start with gzip magic bytes".into(),
        ));
    }

    let estimated = estimate_gzip_uncompressed_size(compressed);
    if estimated > compressed.len().saturating_mul(MAX_DEFLATE_RATIO) {
        // trailer is not a plausible ISIZE (truncated or multi-member stream)
        return Ok((decompress_gzip_streaming(compressed)?, true));
    }

    let buffer_size = estimated.max(NiftiHeader::SIZE);
    let mut output = vec![0u8; buffer_size];
    let mut decompressor = Decompressor::new();

    match decompressor.gzip_decompress(compressed, &mut output) {
        Ok(written) => {
            output.truncate(written);
            Ok((output, false))
        }
        Err(DecompressionError::InsufficientSpace) => {
            drop(output);
            let output = decompress_gzip_streaming(compressed)?;
            Ok((output, true))
        }
        Err(e) => Err(Error::Decompression(format!("{e}"))),
    }
}

fn compress_gzip(raw: &[u8]) -> Result<Vec<u8>> {
    let mut compressor = Compressor::new(CompressionLvl::default());
    let mut compressed = vec![0u8; compressor.gzip_compress_bound(raw.len())];
    let written = compressor
        .gzip_compress(raw, &mut compressed)
        .map_err(|e| Error::Compression(format!("{e:?}")))?;
    compressed.truncate(written);
    Ok(compressed)
}

fn decode_voxels(raw: &[u8], header: &NiftiHeader) -> Vec<f64> {
    let mut values = if header.is_little_endian() {
        decode_raw::<LittleEndian>(raw, header.datatype)
    } else {
        decode_raw::<BigEndian>(raw, header.datatype)
    };
    if let Some((slope, inter)) = header.scaling() {
        values.par_iter_mut().for_each(|v| *v = *v * slope + inter);
    }
    values
}

fn decode_raw<E: ByteOrder>(raw: &[u8], dtype: DataType) -> Vec<f64> {
    raw.par_chunks_exact(dtype.byte_size())
        .map(|c| match dtype {
            DataType::UInt8 => c[0] as f64,
            DataType::Int8 => c[0] as i8 as f64,
            DataType::Int16 => E::read_i16(c) as f64,
            DataType::UInt16 => E::read_u16(c) as f64,
            DataType::Int32 => E::read_i32(c) as f64,
            DataType::UInt32 => E::read_u32(c) as f64,
            DataType::Int64 => E::read_i64(c) as f64,
            DataType::UInt64 => E::read_u64(c) as f64,
            DataType::Float16 => f16::from_bits(E::read_u16(c)).to_f64(),
            DataType::BFloat16 => bf16::from_bits(E::read_u16(c)).to_f64(),
            DataType::Float32 => E::read_f32(c) as f64,
            DataType::Float64 => E::read_f64(c),
        })
        .collect()
}

fn encode_voxels<E: ByteOrder>(
    data: &ArrayD<f64>,
    dtype: DataType,
    scaling: Option<(f64, f64)>,
) -> Vec<u8> {
    // NIfTI order is first axis fastest, i.e. row-major order of the transpose
    let transposed = data.t();
    let values: Cow<'_, [f64]> = match transposed.to_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None => Cow::Owned(transposed.iter().copied().collect()),
    };

    let width = dtype.byte_size();
    let mut out = vec![0u8; values.len() * width];
    out.par_chunks_exact_mut(width)
        .zip(values.par_iter())
        .for_each(|(chunk, &v)| write_value::<E>(chunk, unscale(v, scaling), dtype));
    out
}

fn write_value<E: ByteOrder>(chunk: &mut [u8], v: f64, dtype: DataType) {
    match dtype {
        DataType::UInt8 => chunk[0] = v as u8,
        DataType::Int8 => chunk[0] = v as i8 as u8,
        DataType::Int16 => E::write_i16(chunk, v as i16),
        DataType::UInt16 => E::write_u16(chunk, v as u16),
        DataType::Int32 => E::write_i32(chunk, v as i32),
        DataType::UInt32 => E::write_u32(chunk, v as u32),
        DataType::Int64 => E::write_i64(chunk, v as i64),
        DataType::UInt64 => E::write_u64(chunk, v as u64),
        DataType::Float16 => E::write_u16(chunk, f16::from_f64(v).to_bits()),
        DataType::BFloat16 => E::write_u16(chunk, bf16::from_f64(v).to_bits()),
        DataType::Float32 => E::write_f32(chunk, v as f32),
        DataType::Float64 => E::write_f64(chunk, v),
    }
}

fn unscale(v: f64, scaling: Option<(f64, f64)>) -> f64 {
    match scaling {
        Some((slope, inter)) => (v - inter) / slope,
        None => v,
    }
}

/// Storage type and scaling for writing `data` under `header`.
fn choose_storage(header: &NiftiHeader, data: &ArrayD<f64>) -> (DataType, Option<(f64, f64)>) {
    let scaling = header.scaling();
    let dtype = header.datatype;
    let fits_source = |v: f64| {
        let stored = unscale(v, scaling);
        if !representable(stored, dtype) {
            return false;
        }
        match scaling {
            Some((slope, inter)) => {
                let restored = stored * slope + inter;
                restored == v || (restored.is_nan() && v.is_nan())
            }
            None => true,
        }
    };

    if all_voxels(data, fits_source) {
        return (dtype, scaling);
    }
    if all_voxels(data, |v| representable(v, DataType::Float32)) {
        (DataType::Float32, None)
    } else {
        (DataType::Float64, None)
    }
}

fn all_voxels<F>(data: &ArrayD<f64>, pred: F) -> bool
where
    F: Fn(f64) -> bool + Sync,
{
    match data.as_slice_memory_order() {
        Some(slice) => slice.par_iter().all(|&v| pred(v)),
        None => data.iter().all(|&v| pred(v)),
    }
}

/// Whether `v` survives a store/load cycle in `dtype` unchanged.
pub(crate) fn representable(v: f64, dtype: DataType) -> bool {
    if v.is_nan() {
        return !dtype.is_integer();
    }
    match dtype {
        DataType::Float64 => true,
        DataType::Float32 => (v as f32) as f64 == v,
        DataType::Float16 => f16::from_f64(v).to_f64() == v,
        DataType::BFloat16 => bf16::from_f64(v).to_f64() == v,
        _ => {
            if !v.is_finite() || v.fract() != 0.0 {
                return false;
            }
            let (lo, hi) = integer_range(dtype);
            v >= lo && v < hi
        }
    }
}

/// Inclusive lower and exclusive upper bound of an integer storage type.
fn integer_range(dtype: DataType) -> (f64, f64) {
    match dtype {
        DataType::UInt8 => (0.0, 256.0),
        DataType::Int8 => (-128.0, 128.0),
        DataType::Int16 => (-32768.0, 32768.0),
        DataType::UInt16 => (0.0, 65536.0),
        DataType::Int32 => (-2147483648.0, 2147483648.0),
        DataType::UInt32 => (0.0, 4294967296.0),
        DataType::Int64 => (-9223372036854775808.0, 9223372036854775808.0),
        DataType::UInt64 => (0.0, 18446744073709551616.0),
        _ => (f64::NEG_INFINITY, f64::INFINITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::{IxDyn, ShapeBuilder};
    use std::io::Write;
    use tempfile::tempdir;

    fn identity() -> [[f64; 4]; 4] {
        [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    fn create_f_order_array(data: Vec<f64>, shape: Vec<usize>) -> ArrayD<f64> {
        let c_order = ArrayD::from_shape_vec(shape.clone(), data).unwrap();
        let mut f_order = ArrayD::zeros(IxDyn(&shape).f());
        f_order.assign(&c_order);
        f_order
    }

    fn ramp_image() -> NiftiImage {
        let data = create_f_order_array((0..1000).map(|i| i as f64).collect(), vec![10, 10, 10]);
        NiftiImage::from_array(data, identity())
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        let img = ramp_image();
        let bytes = encode_uncompressed(&img).unwrap();
        assert_eq!(bytes.len(), 352 + 1000 * 4);

        let loaded = decode("ramp.nii", &bytes).unwrap();
        assert_eq!(loaded.shape(), &[10, 10, 10]);
        assert_eq!(loaded.data(), img.data());
        assert_eq!(loaded.header_block(), img.header_block());
    }

    #[test]
    fn test_roundtrip_gzipped() {
        let data = create_f_order_array((0..1000).map(|i| i as f64).collect(), vec![10, 10, 10]);
        let affine = [
            [2.0, 0.0, 0.0, -10.0],
            [0.0, 2.0, 0.0, -10.0],
            [0.0, 0.0, 2.0, -10.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let img = NiftiImage::from_array(data.clone(), affine);

        let bytes = encode(&img).unwrap();
        assert!(bytes.starts_with(&GZIP_MAGIC));

        let loaded = decode("ramp.nii.gz", &bytes).unwrap();
        assert_eq!(loaded.affine(), affine);
        assert_eq!(loaded.data(), &data);
    }

    #[test]
    fn test_multimember_gzip_fallback() {
        let img = ramp_image();
        let bytes = encode_uncompressed(&img).unwrap();
        let split = bytes.len() / 2;

        let mut multi_member = Vec::new();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&bytes[..split]).unwrap();
        multi_member.extend(encoder.finish().unwrap());

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&bytes[split..]).unwrap();
        multi_member.extend(encoder.finish().unwrap());

        let loaded = decode("multi.nii.gz", &multi_member).unwrap();
        assert_eq!(loaded.data(), img.data());
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let bytes = encode(&ramp_image()).unwrap();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(decode("ramp.nii.gz", truncated).is_err());
    }

    #[test]
    fn test_gz_name_with_plain_bytes_fails() {
        let bytes = encode_uncompressed(&ramp_image()).unwrap();
        let err = decode("ramp.nii.gz", &bytes).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
    }

    #[test]
    fn test_misnamed_gzip_reports_hint() {
        let bytes = encode(&ramp_image()).unwrap();
        let err = decode("ramp.nii", &bytes).unwrap_err();
        assert!(err.to_string().contains("gzip magic"));
    }

    #[test]
    fn test_truncated_data_fails() {
        let bytes = encode_uncompressed(&ramp_image()).unwrap();
        let err = decode_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(err.to_string().contains("image data truncated"));
    }

    #[test]
    fn test_big_endian_int16_decode() {
        let mut header = NiftiHeader::default();
        header.little_endian = false;
        header.dim = [2, 2, 1, 1, 1, 1, 1];
        header.datatype = DataType::Int16;

        let mut bytes = header.to_bytes();
        bytes.resize(352, 0);
        for v in [1i16, -2, 300, 0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }

        let img = decode_bytes(&bytes).unwrap();
        assert_eq!(img.data()[[0, 0, 0]], 1.0);
        assert_eq!(img.data()[[1, 0, 0]], -2.0);
        assert_eq!(img.data()[[0, 1, 0]], 300.0);

        // re-encoded in the source byte order, header block untouched
        assert_eq!(encode_uncompressed(&img).unwrap(), bytes);
    }

    #[test]
    fn test_scaling_applied_and_inverted() {
        let mut header = NiftiHeader::default();
        header.dim = [3, 1, 1, 1, 1, 1, 1];
        header.datatype = DataType::UInt8;
        header.scl_slope = 0.5;
        header.scl_inter = 10.0;

        let mut bytes = header.to_bytes();
        bytes.resize(352, 0);
        bytes.extend_from_slice(&[0u8, 2, 4]);

        let img = decode_bytes(&bytes).unwrap();
        let values: Vec<f64> = img.data().iter().copied().collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0]);
        assert_eq!(encode_uncompressed(&img).unwrap(), bytes);
    }

    #[test]
    fn test_widening_when_values_do_not_fit() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1]), vec![0.0, 1.0]).unwrap();
        let mut img = NiftiImage::from_array(data, identity())
            .with_dtype(DataType::UInt8)
            .unwrap();
        img.data_mut()[[1, 0, 0]] = 2.5;

        let bytes = encode_uncompressed(&img).unwrap();
        let reloaded = decode_bytes(&bytes).unwrap();
        assert_eq!(reloaded.dtype(), DataType::Float32);
        assert_eq!(reloaded.data()[[1, 0, 0]], 2.5);

        img.data_mut()[[1, 0, 0]] = 0.1;
        let reloaded = decode_bytes(&encode_uncompressed(&img).unwrap()).unwrap();
        assert_eq!(reloaded.dtype(), DataType::Float64);
        assert_eq!(reloaded.data()[[1, 0, 0]], 0.1);
    }

    #[test]
    fn test_extensions_pass_through() {
        let mut header = NiftiHeader::default();
        header.dim = [2, 1, 1, 1, 1, 1, 1];
        header.datatype = DataType::UInt8;
        header.vox_offset = 368;

        let mut bytes = header.to_bytes();
        bytes.extend_from_slice(&[1, 0, 0, 0]); // extension flag
        bytes.extend_from_slice(&16i32.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(b"abcdefgh");
        assert_eq!(bytes.len(), 368);
        bytes.extend_from_slice(&[7u8, 0]);

        let img = decode_bytes(&bytes).unwrap();
        assert_eq!(img.header_block(), &bytes[..368]);
        assert_eq!(encode_uncompressed(&img).unwrap(), bytes);
    }

    #[test]
    fn test_encode_rejects_rank_disagreement() {
        let mut img = ramp_image();
        *img.data_mut() = ArrayD::zeros(IxDyn(&[10, 100]));
        let err = encode(&img).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_representable() {
        assert!(representable(255.0, DataType::UInt8));
        assert!(!representable(256.0, DataType::UInt8));
        assert!(!representable(-1.0, DataType::UInt16));
        assert!(!representable(1.5, DataType::Int32));
        assert!(!representable(f64::NAN, DataType::Int16));
        assert!(representable(f64::NAN, DataType::Float32));
        assert!(representable(0.5, DataType::Float16));
        assert!(!representable(0.1, DataType::Float32));
        assert!(!representable(9223372036854775808.0, DataType::Int64));
    }

    #[test]
    fn test_save_and_load_paths() {
        let dir = tempdir().unwrap();
        let img = ramp_image();

        for name in ["plain.nii", "packed.nii.gz"] {
            let path = dir.path().join(name);
            save(&img, &path).unwrap();
            let loaded = load(&path).unwrap();
            assert_eq!(loaded.data(), img.data());
        }

        let packed = std::fs::read(dir.path().join("packed.nii.gz")).unwrap();
        assert!(packed.starts_with(&GZIP_MAGIC));
    }
}
