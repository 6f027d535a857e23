use crate::error::{Error, Result};
use image::GenericImageView;
use image::Pixel;
use num::cast::ToPrimitive;
use num::Bounded;

/// Mean absolute per-channel difference of two images, from 0 (identical) to
/// 1 (every channel at opposite extremes).
pub fn mean_abs_difference<Img: GenericImageView>(image1: &Img, image2: &Img) -> Result<f32> {
    if image1.dimensions() != image2.dimensions() {
        let (w1, h1) = image1.dimensions();
        let (w2, h2) = image2.dimensions();
        return Err(Error::ShapeMismatch {
            expected: vec![h1 as usize, w1 as usize],
            actual: vec![h2 as usize, w2 as usize],
        });
    }

    let mut diff: f64 = 0.0;
    let mut samples: u64 = 0;

    for (x, y, pixel1) in image1.pixels() {
        let pixel2 = image2.get_pixel(x, y);
        for (c1, c2) in pixel1.channels().iter().zip(pixel2.channels()) {
            let c1 = c1.to_f64().unwrap_or_default();
            let c2 = c2.to_f64().unwrap_or_default();
            diff += (c1 - c2).abs();
            samples += 1;
        }
    }

    if samples == 0 {
        return Ok(0.0);
    }

    let max = <<Img::Pixel as Pixel>::Subpixel as Bounded>::max_value()
        .to_f64()
        .unwrap_or(1.0);
    Ok((diff / (samples as f64 * max)) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn identical_images_do_not_differ() {
        let image = RgbImage::from_fn(5, 3, |x, y| Rgb([x as u8, y as u8, 9]));
        assert_eq!(mean_abs_difference(&image, &image).unwrap(), 0.0);
    }

    #[test]
    fn opposite_images_differ_fully() {
        let black = RgbImage::new(4, 4);
        let white = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        assert_eq!(mean_abs_difference(&black, &white).unwrap(), 1.0);
    }

    #[test]
    fn partial_difference() {
        let a = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let b = RgbImage::from_pixel(2, 2, Rgb([51, 0, 0]));
        let diff = mean_abs_difference(&a, &b).unwrap();
        assert!((diff - 0.2 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn size_mismatch() {
        let a = RgbImage::new(2, 2);
        let b = RgbImage::new(2, 3);
        assert!(mean_abs_difference(&a, &b).is_err());
    }
}
