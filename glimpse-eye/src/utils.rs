//! Utility functions for vision processing

use crate::error::VisionError;
use image::imageops::FilterType;
use image::DynamicImage;

/// Decode uploaded bytes into an image, sniffing the format
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VisionError> {
    if bytes.is_empty() {
        return Err(VisionError::Decode("Image data is empty".to_string()));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| VisionError::Decode(format!("Unsupported or corrupt image: {}", e)))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(VisionError::Decode("Image has zero size".to_string()));
    }

    Ok(image)
}

/// Resize to `size`×`size` and lay out as planar RGB float32 in `[0, 1]`
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
pub fn to_chw_tensor(image: &DynamicImage, size: u32) -> Result<Vec<f32>, VisionError> {
    if size == 0 {
        return Err(VisionError::Processing("Target size cannot be zero".to_string()));
    }

    let plane = (size as usize)
        .checked_mul(size as usize)
        .ok_or_else(|| VisionError::Processing("Target size would overflow".to_string()))?;

    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let mut tensor = vec![0.0f32; plane * 3];

    for (i, pixel) in rgb.pixels().enumerate() {
        tensor[i] = f32::from(pixel[0]) / 255.0;
        tensor[plane + i] = f32::from(pixel[1]) / 255.0;
        tensor[2 * plane + i] = f32::from(pixel[2]) / 255.0;
    }

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img.clone())
            .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_image_png() {
        let img = RgbImage::from_pixel(7, 5, Rgb([10, 20, 30]));
        let decoded = decode_image(&png_bytes(&img)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
    }

    #[test]
    fn test_decode_image_empty() {
        assert!(decode_image(&[]).unwrap_err().is_input_error());
    }

    #[test]
    fn test_decode_image_garbage() {
        assert!(decode_image(b"definitely not an image").unwrap_err().is_input_error());
    }

    #[test]
    fn test_to_chw_tensor_layout() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 51])));
        let tensor = to_chw_tensor(&img, 2).unwrap();
        assert_eq!(tensor.len(), 12);
        assert!(tensor[..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(tensor[4..8].iter().all(|v| v.abs() < 1e-6));
        assert!(tensor[8..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_to_chw_tensor_zero_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        assert!(to_chw_tensor(&img, 0).is_err());
    }
}
