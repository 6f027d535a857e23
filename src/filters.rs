use crate::error::{Error, Result};
use crossbeam::thread;
use image::imageops::{self, FilterType};
use image::RgbImage;
use imageproc::filter::filter3x3;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A deterministic image-to-image transformation.
pub trait ImageFilter: fmt::Debug + Send + Sync {
    fn apply(&self, image: &RgbImage) -> RgbImage;
}

/// Laplacian edge detector. The outermost rows and columns have no full
/// neighbourhood and keep their source pixels.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FindEdges;

const EDGE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

impl ImageFilter for FindEdges {
    fn apply(&self, image: &RgbImage) -> RgbImage {
        let mut edges = filter3x3::<_, f32, u8>(image, &EDGE_KERNEL);
        let (width, height) = image.dimensions();
        for (x, y, pixel) in image.enumerate_pixels() {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                edges.put_pixel(x, y, *pixel);
            }
        }
        edges
    }
}

/// Cuts out a rectangle. Parts of the rectangle outside the source stay black.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ImageFilter for Crop {
    fn apply(&self, image: &RgbImage) -> RgbImage {
        let mut canvas = RgbImage::new(self.width, self.height);
        let view = imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image();
        imageops::replace(&mut canvas, &view, 0, 0);
        canvas
    }
}

/// Bicubic resize to an exact size.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl ImageFilter for Resize {
    fn apply(&self, image: &RgbImage) -> RgbImage {
        imageops::resize(image, self.width, self.height, FilterType::CatmullRom)
    }
}

/// Keeps the `bits` most significant bits of every channel.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Posterize {
    bits: u8,
}

impl Posterize {
    pub fn new(bits: u8) -> Result<Self> {
        if !(1..=8).contains(&bits) {
            return Err(Error::InvalidFilter(format!("posterize to {} bits", bits)));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }
}

impl ImageFilter for Posterize {
    fn apply(&self, image: &RgbImage) -> RgbImage {
        let mask = !(0xFFu8 >> self.bits);
        let mut output = image.clone();
        for channel in output.iter_mut() {
            *channel &= mask;
        }
        output
    }
}

/// Filters applied in order.
#[derive(Debug, Default)]
pub struct Pipeline {
    filters: Vec<Box<dyn ImageFilter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Edges, a 300x300 crop at (100, 100), a 224x224 resize, then 4-bit posterize.
    pub fn standard() -> Self {
        Self::new()
            .then(FindEdges)
            .then(Crop {
                x: 100,
                y: 100,
                width: 300,
                height: 300,
            })
            .then(Resize {
                width: 224,
                height: 224,
            })
            .then(Posterize { bits: 4 })
    }

    pub fn then<F: ImageFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let mut image = image.clone();
        for filter in &self.filters {
            image = filter.apply(&image);
        }
        image
    }

    /// Runs the pipeline over every image on one scoped thread per CPU.
    pub fn apply_all(&self, images: &[RgbImage]) -> Vec<RgbImage> {
        self.apply_all_with(images, default_workers())
    }

    /// Runs the pipeline over every image on at most `workers` scoped threads,
    /// each taking a contiguous run of images. Output order follows input order.
    pub fn apply_all_with(&self, images: &[RgbImage], workers: usize) -> Vec<RgbImage> {
        if images.is_empty() {
            return Vec::new();
        }
        let chunk_size = (images.len() + workers.max(1) - 1) / workers.max(1);

        let result = thread::scope(|s| {
            let handles: Vec<_> = images
                .chunks(chunk_size)
                .map(|chunk| {
                    s.spawn(move |_| chunk.iter().map(|image| self.apply(image)).collect::<Vec<_>>())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<std::thread::Result<Vec<_>>>()
        });
        match result {
            Ok(Ok(outputs)) => outputs.into_iter().flatten().collect(),
            Ok(Err(panic)) | Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Number of worker threads for batch filtering.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// `{stem}-filtered.png` for every input. Inputs sharing a stem get a
/// numeric suffix so no two outputs collide.
pub fn output_file_names<P: AsRef<Path>>(inputs: &[P]) -> Vec<String> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input
                .as_ref()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("image");
            let mut name = format!("{}-filtered.png", stem);
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{}-{}-filtered.png", stem, n);
                n += 1;
            }
            name
        })
        .collect()
}

fn parse_dimensions(name: &str, body: &str, count: usize) -> Result<Vec<u32>> {
    let values = body
        .split('x')
        .map(|value| value.parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::InvalidFilter(name.to_owned()))?;
    if values.len() != count {
        return Err(Error::InvalidFilter(name.to_owned()));
    }
    Ok(values)
}

/// Parses a dash-separated option string such as
/// `edges-c100x100x300x300-r224x224-p4`.
impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut pipeline = Pipeline::new();
        for option in s.split('-').filter(|option| !option.is_empty()) {
            pipeline = if option == "edges" {
                pipeline.then(FindEdges)
            } else if let Some(body) = option.strip_prefix('c') {
                let v = parse_dimensions(option, body, 4)?;
                if v[2] == 0 || v[3] == 0 {
                    return Err(Error::InvalidFilter(option.to_owned()));
                }
                pipeline.then(Crop {
                    x: v[0],
                    y: v[1],
                    width: v[2],
                    height: v[3],
                })
            } else if let Some(body) = option.strip_prefix('r') {
                let v = parse_dimensions(option, body, 2)?;
                if v[0] == 0 || v[1] == 0 {
                    return Err(Error::InvalidFilter(option.to_owned()));
                }
                pipeline.then(Resize {
                    width: v[0],
                    height: v[1],
                })
            } else if let Some(body) = option.strip_prefix('p') {
                let bits = body
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidFilter(option.to_owned()))?;
                pipeline.then(Posterize::new(bits)?)
            } else {
                return Err(Error::InvalidFilter(option.to_owned()));
            };
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 7 % 256) as u8,
                (y * 13 % 256) as u8,
                ((x + y) * 3 % 256) as u8,
            ])
        })
    }

    #[test]
    fn edges_of_flat_image_are_black_inside() {
        let flat = RgbImage::from_pixel(10, 10, Rgb([120, 30, 200]));
        let edges = FindEdges.apply(&flat);
        for (x, y, pixel) in edges.enumerate_pixels() {
            if (1..9).contains(&x) && (1..9).contains(&y) {
                assert_eq!(pixel.0, [0, 0, 0], "({}, {})", x, y);
            } else {
                assert_eq!(pixel.0, [120, 30, 200], "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn edges_keep_source_border() {
        let image = sample(7, 5);
        let edges = FindEdges.apply(&image);
        for x in 0..7 {
            assert_eq!(edges.get_pixel(x, 0), image.get_pixel(x, 0));
            assert_eq!(edges.get_pixel(x, 4), image.get_pixel(x, 4));
        }
        for y in 0..5 {
            assert_eq!(edges.get_pixel(0, y), image.get_pixel(0, y));
            assert_eq!(edges.get_pixel(6, y), image.get_pixel(6, y));
        }
        // Linear ramps have no curvature.
        assert_eq!(edges.get_pixel(3, 2).0, [0, 0, 0]);
    }

    #[test]
    fn edges_find_a_bright_dot() {
        let mut image = RgbImage::new(5, 5);
        image.put_pixel(2, 2, Rgb([10, 10, 10]));
        let edges = FindEdges.apply(&image);
        assert_eq!(edges.get_pixel(2, 2).0, [80, 80, 80]);
        // Neighbours go negative and clamp to zero.
        assert_eq!(edges.get_pixel(1, 2).0, [0, 0, 0]);
    }

    #[test]
    fn crop_pads_outside_source() {
        let image = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        let cropped = Crop {
            x: 2,
            y: 2,
            width: 4,
            height: 4,
        }
        .apply(&image);
        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(1, 1).0, [9, 9, 9]);
        assert_eq!(cropped.get_pixel(2, 2).0, [0, 0, 0]);
    }

    #[test]
    fn posterize_masks_low_bits() {
        let image = RgbImage::from_pixel(1, 1, Rgb([0xFF, 0x1F, 0x80]));
        let output = Posterize::new(4).unwrap().apply(&image);
        assert_eq!(output.get_pixel(0, 0).0, [0xF0, 0x10, 0x80]);
        assert!(Posterize::new(0).is_err());
        assert!(Posterize::new(9).is_err());
        let identity = Posterize::new(8).unwrap().apply(&image);
        assert_eq!(identity, image);
    }

    #[test]
    fn posterize_is_idempotent() {
        let posterize = Posterize::new(3).unwrap();
        let once = posterize.apply(&sample(30, 20));
        assert_eq!(posterize.apply(&once), once);
    }

    #[test]
    fn standard_pipeline_output() {
        let pipeline = Pipeline::standard();
        let image = sample(500, 420);
        let output = pipeline.apply(&image);
        assert_eq!(output.dimensions(), (224, 224));
        assert!(output.iter().all(|channel| channel & 0x0F == 0));
        // Pure: same input, same output.
        assert_eq!(pipeline.apply(&image), output);
    }

    #[test]
    fn parse_option_string() {
        let pipeline: Pipeline = "edges-c100x100x300x300-r224x224-p4".parse().unwrap();
        assert_eq!(pipeline.len(), 4);
        let image = sample(450, 450);
        assert_eq!(pipeline.apply(&image), Pipeline::standard().apply(&image));

        assert!("".parse::<Pipeline>().unwrap().is_empty());
        assert!("blur".parse::<Pipeline>().is_err());
        assert!("r224".parse::<Pipeline>().is_err());
        assert!("c1x2x0x4".parse::<Pipeline>().is_err());
        assert!("p12".parse::<Pipeline>().is_err());
    }

    #[test]
    fn apply_all_with_few_workers() {
        let pipeline: Pipeline = "r4x4-p3".parse().unwrap();
        let images: Vec<_> = (0..10).map(|i| sample(5 + i, 9)).collect();
        let sequential: Vec<_> = images.iter().map(|image| pipeline.apply(image)).collect();
        for workers in [0, 1, 3, 10, 32] {
            assert_eq!(pipeline.apply_all_with(&images, workers), sequential);
        }
        assert!(pipeline.apply_all_with(&[], 4).is_empty());
    }

    #[test]
    fn output_names_do_not_collide() {
        let inputs = ["a/cat.jpg", "b/cat.png", "dog.jpg", "c/cat.jpeg", "cat-2.png"];
        assert_eq!(
            output_file_names(&inputs),
            vec![
                "cat-filtered.png",
                "cat-2-filtered.png",
                "dog-filtered.png",
                "cat-3-filtered.png",
                "cat-2-2-filtered.png",
            ]
        );
    }

    #[test]
    fn apply_all_keeps_order() {
        let pipeline: Pipeline = "r8x8-p2".parse().unwrap();
        let images = vec![sample(20, 10), sample(13, 31), sample(8, 8)];
        let outputs = pipeline.apply_all(&images);
        assert_eq!(outputs.len(), 3);
        for (image, output) in images.iter().zip(&outputs) {
            assert_eq!(&pipeline.apply(image), output);
        }
    }
}
