//! Grayscale image primitives shared by the detector and the fingerprint.
//!
//! Resizing and equalization follow OpenCV's `INTER_LINEAR` and
//! `equalizeHist` so fingerprints stay comparable with encodings produced by
//! OpenCV-based tooling.

use crate::types::FaceRect;
use image::{GrayImage, ImageBuffer, Pixel, RgbImage};

/// Convert RGB to luma with the ITU-R BT.601 weights OpenCV uses.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = rgb.dimensions();
    let mut gray = GrayImage::new(w, h);
    for (src, dst) in rgb.pixels().zip(gray.pixels_mut()) {
        let [r, g, b] = src.0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        dst.0[0] = y.round().clamp(0.0, 255.0) as u8;
    }
    gray
}

/// Bilinear resize with half-pixel centers and clamped borders. Works on any
/// 8-bit pixel type; channels are interpolated independently.
pub fn resize_bilinear<P>(src: &ImageBuffer<P, Vec<u8>>, new_w: u32, new_h: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    let mut out = ImageBuffer::new(new_w as u32, new_h as u32);
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return out;
    }

    let channels = P::CHANNEL_COUNT as usize;
    let frame = src.as_raw();
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;
    let resized: &mut [u8] = &mut out;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
        let fy = if src_y < 0.0 { 0.0 } else { fy };

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fx = if src_x < 0.0 { 0.0 } else { fx };

            for c in 0..channels {
                let at = |px: usize, py: usize| frame[(py * width + px) * channels + c] as f32;
                let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + at(x1, y0) * fx * (1.0 - fy)
                    + at(x0, y1) * (1.0 - fx) * fy
                    + at(x1, y1) * fx * fy;
                resized[(y * new_w + x) * channels + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Global histogram equalization.
///
/// The lowest occupied bin maps to 0 and the cumulative count above it is
/// stretched to 255. A single-valued image is returned unchanged.
pub fn equalize_hist(src: &GrayImage) -> GrayImage {
    let data = src.as_raw();
    let total = data.len();
    let mut out = src.clone();
    if total == 0 {
        return out;
    }

    let mut hist = [0usize; 256];
    for &p in data {
        hist[p as usize] += 1;
    }

    let first = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if hist[first] == total {
        return out;
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0usize;
    for i in (first + 1)..256 {
        sum += hist[i];
        lut[i] = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    for p in out.iter_mut() {
        *p = lut[*p as usize];
    }
    out
}

/// Copy the part of `rect` that lies inside the image.
pub fn crop<P>(src: &ImageBuffer<P, Vec<u8>>, rect: FaceRect) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let x0 = rect.x.min(src.width());
    let y0 = rect.y.min(src.height());
    let x1 = rect.x.saturating_add(rect.width).min(src.width());
    let y1 = rect.y.saturating_add(rect.height).min(src.height());
    image::imageops::crop_imm(src, x0, y0, x1 - x0, y1 - y0).to_image()
}

/// Summed-area tables of pixel values and squared pixel values.
///
/// Both tables are `(width + 1) × (height + 1)` with a zero first row and
/// column, so any rectangle sum is four lookups.
pub struct IntegralImage {
    width: usize,
    height: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(src: &GrayImage) -> Self {
        let width = src.width() as usize;
        let height = src.height() as usize;
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq_sum = vec![0u64; stride * (height + 1)];
        let data = src.as_raw();

        for y in 0..height {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let p = data[y * width + x] as u64;
                row += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }

        Self {
            width,
            height,
            sum,
            sq_sum,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Sum of pixels in `[x, x + w) × [y, y + h)`.
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::lookup(&self.sum, self.width + 1, x, y, w, h)
    }

    /// Sum of squared pixels in `[x, x + w) × [y, y + h)`.
    pub fn rect_sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::lookup(&self.sq_sum, self.width + 1, x, y, w, h)
    }

    fn lookup(table: &[u64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let a = table[y * stride + x];
        let b = table[y * stride + x + w];
        let c = table[(y + h) * stride + x];
        let d = table[(y + h) * stride + x + w];
        d + a - b - c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_rgb_to_gray_weights() {
        let mut rgb = RgbImage::new(3, 1);
        rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([0, 255, 0]));
        rgb.put_pixel(2, 0, Rgb([0, 0, 255]));
        let gray = rgb_to_gray(&rgb);
        assert_eq!(gray.as_raw(), &vec![76, 150, 29]);
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = GrayImage::from_pixel(100, 100, Luma([128]));
        let up = resize_bilinear(&src, 200, 200);
        assert!(up.as_raw().iter().all(|&p| p == 128));
        let down = resize_bilinear(&src, 37, 53);
        assert_eq!(down.dimensions(), (37, 53));
        assert!(down.as_raw().iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_halving_averages_pairs() {
        // 4x1 row [0, 100, 200, 255] halved: centers fall between pixel pairs.
        let src = GrayImage::from_raw(4, 1, vec![0, 100, 200, 255]).unwrap();
        let out = resize_bilinear(&src, 2, 1);
        assert_eq!(out.as_raw(), &vec![50, 228]);
    }

    #[test]
    fn test_resize_rgb_keeps_channels_apart() {
        let src = RgbImage::from_raw(2, 1, vec![0, 100, 200, 100, 200, 0]).unwrap();
        let out = resize_bilinear(&src, 1, 1);
        assert_eq!(out.get_pixel(0, 0).0, [50, 150, 100]);
    }

    #[test]
    fn test_resize_empty_source() {
        let src = GrayImage::new(0, 0);
        let out = resize_bilinear(&src, 4, 4);
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn test_equalize_spreads_range() {
        let src = GrayImage::from_raw(4, 1, vec![100, 101, 102, 103]).unwrap();
        let eq = equalize_hist(&src);
        assert_eq!(eq.as_raw(), &vec![0, 85, 170, 255]);
    }

    #[test]
    fn test_equalize_single_value_unchanged() {
        let src = GrayImage::from_pixel(8, 8, Luma([42]));
        let eq = equalize_hist(&src);
        assert_eq!(eq.as_raw(), src.as_raw());
    }

    #[test]
    fn test_crop_clips_to_bounds() {
        let src = GrayImage::from_pixel(10, 10, Luma([7]));
        let rect = FaceRect { x: 6, y: 8, width: 10, height: 10 };
        let out = crop(&src, rect);
        assert_eq!(out.dimensions(), (4, 2));

        let outside = FaceRect { x: 20, y: 20, width: 5, height: 5 };
        assert_eq!(crop(&src, outside).dimensions(), (0, 0));
    }

    #[test]
    fn test_integral_sums() {
        // 3x2 image:
        // 1 2 3
        // 4 5 6
        let src = GrayImage::from_raw(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let ii = IntegralImage::new(&src);
        assert_eq!(ii.rect_sum(0, 0, 3, 2), 21);
        assert_eq!(ii.rect_sum(1, 0, 2, 2), 16);
        assert_eq!(ii.rect_sum(2, 1, 1, 1), 6);
        assert_eq!(ii.rect_sq_sum(0, 1, 3, 1), 16 + 25 + 36);
    }
}
