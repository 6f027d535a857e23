use image::{Rgb, RgbImage};
use restyle::filters::{Crop, FindEdges, ImageFilter, Posterize, Resize};
use restyle::Pipeline;

fn checkerboard(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if (x / 16 + y / 16) % 2 == 0 {
            Rgb([200, 180, 160])
        } else {
            Rgb([20, 40, 60])
        }
    })
}

#[test]
fn builder_matches_standard() {
    let built = Pipeline::new()
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
        .then(Posterize::new(4).unwrap());

    let image = checkerboard(480, 480);
    let output = built.apply(&image);
    assert_eq!(output, Pipeline::standard().apply(&image));
    assert_eq!(output.dimensions(), (224, 224));
}

#[test]
fn small_inputs_are_padded() {
    // Smaller than the crop origin: the crop is all padding.
    let image = checkerboard(64, 64);
    let output = Pipeline::standard().apply(&image);
    assert_eq!(output.dimensions(), (224, 224));
    assert!(output.pixels().all(|pixel| pixel.0 == [0, 0, 0]));
}

#[test]
fn final_posterize_is_a_fixed_point() {
    let pipeline = Pipeline::standard();
    let output = pipeline.apply(&checkerboard(512, 400));
    let again = Posterize::new(4).unwrap().apply(&output);
    assert_eq!(again, output);
}

#[test]
fn batch_equals_sequential() {
    let pipeline = Pipeline::standard();
    let images: Vec<_> = (0..4).map(|i| checkerboard(420 + i * 10, 410)).collect();
    let batch = pipeline.apply_all(&images);
    let sequential: Vec<_> = images.iter().map(|image| pipeline.apply(image)).collect();
    assert_eq!(batch, sequential);
}
