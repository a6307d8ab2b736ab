//! Fitting frames onto surfaces and converting them to the wire format.

use anyhow::{Context, Result};
use common::FitMode;
use fast_image_resize as fr;
use image::{Rgba, RgbaImage};

/// Lay `frame` out on a `width` x `height` canvas.
///
/// [`FitMode::Fill`] scales to cover the canvas and crops the overflow
/// evenly. [`FitMode::Preserve`] keeps the native size, centered on black
/// and cropped when larger than the canvas.
pub fn compose(frame: &RgbaImage, width: u32, height: u32, mode: FitMode) -> Result<RgbaImage> {
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot compose onto an empty {}x{} surface", width, height);
    }
    if frame.dimensions() == (width, height) {
        return Ok(frame.clone());
    }

    match mode {
        FitMode::Fill => fill(frame, width, height),
        FitMode::Preserve => Ok(center(frame, width, height)),
    }
}

fn fill(frame: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    let (src_width, src_height) = frame.dimensions();
    if src_width == 0 || src_height == 0 {
        return Ok(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])));
    }

    let scale = (width as f64 / src_width as f64).max(height as f64 / src_height as f64);
    let scaled_width = ((src_width as f64 * scale).ceil() as u32).max(width);
    let scaled_height = ((src_height as f64 * scale).ceil() as u32).max(height);

    let resized = resize(frame, scaled_width, scaled_height)?;

    let x_offset = (scaled_width - width) / 2;
    let y_offset = (scaled_height - height) / 2;
    Ok(image::imageops::crop_imm(&resized, x_offset, y_offset, width, height).to_image())
}

fn center(frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let x = (i64::from(width) - i64::from(frame.width())) / 2;
    let y = (i64::from(height) - i64::from(frame.height())) / 2;
    image::imageops::overlay(&mut canvas, frame, x, y);
    canvas
}

fn resize(frame: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    let src = fr::images::Image::from_vec_u8(
        frame.width(),
        frame.height(),
        frame.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .context("Failed to create source image")?;

    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
        )
        .context("Failed to resize frame")?;

    RgbaImage::from_raw(width, height, dst.into_vec()).context("Failed to create resized frame")
}

/// Write `rgba` into `out` as ARGB8888 in native (little-endian BGRA) order.
pub fn rgba_to_argb8888(rgba: &RgbaImage, out: &mut [u8]) -> Result<()> {
    let expected = rgba.as_raw().len();
    if out.len() != expected {
        anyhow::bail!(
            "Buffer size mismatch: expected {}, got {}",
            expected,
            out.len()
        );
    }

    for (src, dst) in rgba.as_raw().chunks_exact(4).zip(out.chunks_exact_mut(4)) {
        dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    #[test]
    fn test_same_size_is_passthrough() {
        let frame = RgbaImage::from_pixel(4, 3, RED);
        let out = compose(&frame, 4, 3, FitMode::Preserve).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn test_fill_covers_surface() {
        // Wide content on a square surface: scaled to height, sides cropped.
        let frame = RgbaImage::from_pixel(40, 10, RED);
        let out = compose(&frame, 20, 20, FitMode::Fill).unwrap();

        assert_eq!(out.dimensions(), (20, 20));
        for pixel in [out.get_pixel(0, 0), out.get_pixel(19, 19)] {
            assert!(pixel[0] > 250 && pixel[1] < 5 && pixel[3] > 250);
        }
    }

    #[test]
    fn test_preserve_letterboxes_small_content() {
        let frame = RgbaImage::from_pixel(2, 2, RED);
        let out = compose(&frame, 6, 6, FitMode::Preserve).unwrap();

        assert_eq!(*out.get_pixel(0, 0), BLACK);
        assert_eq!(*out.get_pixel(2, 2), RED);
        assert_eq!(*out.get_pixel(3, 3), RED);
        assert_eq!(*out.get_pixel(5, 5), BLACK);
    }

    #[test]
    fn test_preserve_crops_large_content() {
        let mut frame = RgbaImage::from_pixel(10, 10, BLACK);
        frame.put_pixel(5, 5, RED);
        let out = compose(&frame, 2, 2, FitMode::Preserve).unwrap();

        assert_eq!(out.dimensions(), (2, 2));
        // Offset is (2 - 10) / 2 = -4, so source (5, 5) lands on (1, 1).
        assert_eq!(*out.get_pixel(1, 1), RED);
    }

    #[test]
    fn test_zero_sized_surface_is_rejected() {
        let frame = RgbaImage::from_pixel(2, 2, RED);
        assert!(compose(&frame, 0, 10, FitMode::Fill).is_err());
    }

    #[test]
    fn test_rgba_to_argb8888() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 255, 128]));

        let mut argb = vec![0u8; 8];
        rgba_to_argb8888(&img, &mut argb).unwrap();
        assert_eq!(argb, vec![0, 0, 255, 255, 255, 0, 0, 128]);

        let mut short = vec![0u8; 4];
        assert!(rgba_to_argb8888(&img, &mut short).is_err());
    }
}
