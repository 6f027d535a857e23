//! Conversion between pixels on disk and the normalized `(1, 3, H, W)` tensors
//! the feature extractor consumes.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::Path;

/// Per-channel mean of the ImageNet training set.
pub const IMAGE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation of the ImageNet training set.
pub const IMAGE_STD: [f32; 3] = [0.229, 0.224, 0.225];

fn channel_stats(device: &Device) -> Result<(Tensor, Tensor)> {
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((1, 3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((1, 3, 1, 1))?;
    Ok((mean, std))
}

/// Opens an image and resizes it to exactly `width` x `height`.
pub fn open_rgb<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let image = image::io::Reader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(image
        .resize_exact(width, height, FilterType::Triangle)
        .into_rgb8())
}

pub fn load_image<P: AsRef<Path>>(
    path: P,
    width: u32,
    height: u32,
    device: &Device,
) -> Result<Tensor> {
    let image = open_rgb(path, width, height)?;
    image_to_tensor(&image, device)
}

pub fn image_to_tensor(image: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let (mean, std) = channel_stats(device)?;
    let tensor = Tensor::from_vec(
        image.as_raw().clone(),
        (height as usize, width as usize, 3),
        device,
    )?
    .permute((2, 0, 1))?
    .unsqueeze(0)?
    .to_dtype(DType::F32)?
    .affine(1.0 / 255.0, 0.0)?
    .broadcast_sub(&mean)?
    .broadcast_div(&std)?;
    Ok(tensor)
}

/// Inverse of [`image_to_tensor`]; values outside the displayable range are clamped.
pub fn tensor_to_image(tensor: &Tensor) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dims4()?;
    if batch != 1 || channels != 3 {
        return Err(Error::ShapeMismatch {
            expected: vec![1, 3, height, width],
            actual: tensor.dims().to_vec(),
        });
    }

    let (mean, std) = channel_stats(tensor.device())?;
    let raw = tensor
        .broadcast_mul(&std)?
        .broadcast_add(&mean)?
        .clamp(0f32, 1f32)?
        .affine(255.0, 0.0)?
        .round()?
        .to_dtype(DType::U8)?
        .squeeze(0)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<u8>()?;

    RgbImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| Error::ShapeMismatch {
        expected: vec![height, width, 3],
        actual: tensor.dims().to_vec(),
    })
}

/// Writes a tensor as an image; the format follows the file extension.
pub fn save_image<P: AsRef<Path>>(tensor: &Tensor, path: P) -> Result<()> {
    tensor_to_image(tensor)?.save(path)?;
    Ok(())
}
