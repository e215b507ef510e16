//! Pixel fingerprint of a face crop.
//!
//! The crop is resized to 128×128, histogram-equalized, flattened row-major
//! and L2-normalized, so the dot product of two fingerprints is their cosine
//! similarity. Stored encodings are little-endian f64 blobs.

use crate::imgproc;
use image::{GrayImage, RgbImage};
use thiserror::Error;

/// Side length of the square the face crop is resized to.
pub const FINGERPRINT_SIDE: u32 = 128;
/// Number of values in a freshly extracted fingerprint.
pub const FINGERPRINT_DIM: usize = (FINGERPRINT_SIDE * FINGERPRINT_SIDE) as usize;

#[derive(Error, Debug, PartialEq)]
pub enum FingerprintError {
    #[error("face crop is empty")]
    EmptyCrop,
    #[error("face crop has no contrast to normalize")]
    ZeroNorm,
    #[error("encoded fingerprint length {0} is not a non-zero multiple of 8")]
    InvalidEncoding(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    values: Vec<f64>,
}

impl Fingerprint {
    /// Wrap raw values without normalizing them.
    pub fn from_values(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Fingerprint a grayscale face crop.
    pub fn extract(face: &GrayImage) -> Result<Self, FingerprintError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(FingerprintError::EmptyCrop);
        }
        Self::from_square(&imgproc::resize_bilinear(face, FINGERPRINT_SIDE, FINGERPRINT_SIDE))
    }

    /// Fingerprint a color face crop. The crop is resized before it is
    /// converted to grayscale.
    pub fn extract_rgb(face: &RgbImage) -> Result<Self, FingerprintError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(FingerprintError::EmptyCrop);
        }
        let resized = imgproc::resize_bilinear(face, FINGERPRINT_SIDE, FINGERPRINT_SIDE);
        Self::from_square(&imgproc::rgb_to_gray(&resized))
    }

    fn from_square(square: &GrayImage) -> Result<Self, FingerprintError> {
        let equalized = imgproc::equalize_hist(square);

        let raw: Vec<f64> = equalized.as_raw().iter().map(|&p| p as f64).collect();
        let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(FingerprintError::ZeroNorm);
        }

        Ok(Self {
            values: raw.into_iter().map(|v| v / norm).collect(),
        })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dot-product similarity, or `None` when the dimensions differ.
    pub fn similarity(&self, other: &Fingerprint) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| a * b)
                .sum(),
        )
    }

    /// Encode as a little-endian f64 blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 8);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode a little-endian f64 blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FingerprintError> {
        if bytes.is_empty() || bytes.len() % 8 != 0 {
            return Err(FingerprintError::InvalidEncoding(bytes.len()));
        }
        let values = bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_le_bytes(buf)
            })
            .collect();
        Ok(Self { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    #[test]
    fn test_extract_is_unit_length() {
        let fp = Fingerprint::extract(&gradient(90, 70)).unwrap();
        assert_eq!(fp.len(), FINGERPRINT_DIM);
        let norm: f64 = fp.values().iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let fp = Fingerprint::extract(&gradient(64, 64)).unwrap();
        let sim = fp.similarity(&fp).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_brightness_shift_still_matches() {
        // Equalization removes a uniform brightness offset.
        let base = gradient(128, 128);
        let brighter = GrayImage::from_fn(128, 128, |x, y| {
            Luma([base.get_pixel(x, y).0[0] / 2 + 40])
        });
        let a = Fingerprint::extract(&GrayImage::from_fn(128, 128, |x, y| {
            Luma([base.get_pixel(x, y).0[0] / 2])
        }))
        .unwrap();
        let b = Fingerprint::extract(&brighter).unwrap();
        assert!(a.similarity(&b).unwrap() > 0.999);
    }

    #[test]
    fn test_color_crop_resized_before_gray() {
        let face = RgbImage::from_fn(90, 70, |x, y| {
            image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
        });
        let small = imgproc::resize_bilinear(&face, FINGERPRINT_SIDE, FINGERPRINT_SIDE);
        let expected = Fingerprint::extract(&imgproc::rgb_to_gray(&small)).unwrap();
        assert_eq!(Fingerprint::extract_rgb(&face).unwrap(), expected);
        assert_eq!(
            Fingerprint::extract_rgb(&RgbImage::new(0, 4)).unwrap_err(),
            FingerprintError::EmptyCrop
        );
    }

    #[test]
    fn test_empty_crop_rejected() {
        let err = Fingerprint::extract(&GrayImage::new(0, 10)).unwrap_err();
        assert_eq!(err, FingerprintError::EmptyCrop);
    }

    #[test]
    fn test_black_crop_has_zero_norm() {
        let err = Fingerprint::extract(&GrayImage::new(32, 32)).unwrap_err();
        assert_eq!(err, FingerprintError::ZeroNorm);
    }

    #[test]
    fn test_bytes_layout_is_little_endian_f64() {
        let fp = Fingerprint::from_values(vec![1.0, -0.5]);
        let bytes = fp.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert_eq!(Fingerprint::from_bytes(&bytes).unwrap(), fp);
    }

    #[test]
    fn test_bad_encoding_rejected() {
        assert_eq!(
            Fingerprint::from_bytes(&[0u8; 12]).unwrap_err(),
            FingerprintError::InvalidEncoding(12)
        );
        assert!(Fingerprint::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_dimension_mismatch_has_no_similarity() {
        let a = Fingerprint::from_values(vec![1.0, 0.0]);
        let b = Fingerprint::from_values(vec![1.0]);
        assert_eq!(a.similarity(&b), None);
    }
}
