use crate::error::{Error, Result};
use crate::settings::{LayerWeight, Settings};
use crate::vgg::{FeatureExtractor, Layer};
use candle_core::Tensor;

/// Channel correlations of a `(1, C, H, W)` feature map as a `(C, C)` matrix.
pub fn gram_matrix(feature: &Tensor) -> Result<Tensor> {
    let (_, channels, height, width) = feature.dims4()?;
    let x = feature.reshape((channels, height * width))?;
    Ok(x.matmul(&x.t()?)?)
}

/// Scale constants of the two loss terms.
///
/// `pixels` is the pixel count of the optimized image and `channels` its
/// color channel count.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Normalization {
    pub pixels: f64,
    pub channels: f64,
}

impl Normalization {
    pub fn new(pixels: usize, channels: usize) -> Self {
        Self {
            pixels: pixels as f64,
            channels: channels as f64,
        }
    }
}

fn check_shapes(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.dims() != b.dims() {
        return Err(Error::ShapeMismatch {
            expected: b.dims().to_vec(),
            actual: a.dims().to_vec(),
        });
    }
    Ok(())
}

pub fn content_loss(noise: &Tensor, target: &Tensor, norm: Normalization) -> Result<Tensor> {
    check_shapes(noise, target)?;
    let sum = (noise - target)?.sqr()?.sum_all()?;
    Ok(sum.affine(1.0 / (2.0 * norm.pixels * norm.channels), 0.0)?)
}

/// Takes Gram matrices, not raw features.
pub fn style_loss(noise_gram: &Tensor, target_gram: &Tensor, norm: Normalization) -> Result<Tensor> {
    check_shapes(noise_gram, target_gram)?;
    let sum = (noise_gram - target_gram)?.sqr()?.sum_all()?;
    let scale = 4.0 * norm.pixels.powi(2) * norm.channels.powi(2);
    Ok(sum.affine(1.0 / scale, 0.0)?)
}

/// Loss of one evaluation. `total` stays attached to the autograd graph; the
/// components are detached values for reporting.
pub struct Evaluation {
    pub total: Tensor,
    pub content: f32,
    pub style: f32,
}

/// Precomputed targets and weights of the style transfer objective.
pub struct StyleObjective {
    content_layers: Vec<LayerWeight>,
    style_layers: Vec<LayerWeight>,
    layers: Vec<Layer>,
    content_targets: Vec<Tensor>,
    style_targets: Vec<Tensor>,
    content_factor: f64,
    style_factor: f64,
    norm: Normalization,
}

impl StyleObjective {
    pub fn new<E: FeatureExtractor>(
        extractor: &E,
        content_image: &Tensor,
        style_image: &Tensor,
        settings: &Settings,
    ) -> Result<Self> {
        // Both images must already have the configured size, or `M` is wrong.
        let expected = [1, 3, settings.height as usize, settings.width as usize];
        for image in [content_image, style_image] {
            if image.dims() != expected {
                return Err(Error::ShapeMismatch {
                    expected: expected.to_vec(),
                    actual: image.dims().to_vec(),
                });
            }
        }

        let content_layers = settings.content_layers.clone();
        let style_layers = settings.style_layers.clone();

        let content_targets = extractor
            .extract(content_image, &layers_of(&content_layers))?
            .into_iter()
            .map(|feature| feature.detach())
            .collect();
        let style_targets = extractor
            .extract(style_image, &layers_of(&style_layers))?
            .iter()
            .map(|feature| Ok(gram_matrix(feature)?.detach()))
            .collect::<Result<Vec<_>>>()?;

        let layers = layers_of(&content_layers)
            .into_iter()
            .chain(layers_of(&style_layers))
            .collect();

        Ok(Self {
            content_layers,
            style_layers,
            layers,
            content_targets,
            style_targets,
            content_factor: settings.content_loss_factor as f64,
            style_factor: settings.style_loss_factor as f64,
            norm: Normalization::new(settings.pixels(), 3),
        })
    }

    pub fn evaluate<E: FeatureExtractor>(&self, extractor: &E, image: &Tensor) -> Result<Evaluation> {
        // One forward pass serves both terms.
        let mut features = extractor.extract(image, &self.layers)?;
        let style_features = features.split_off(self.content_layers.len());

        let mut content = Tensor::zeros((), image.dtype(), image.device())?;
        for ((feature, target), weighted) in features
            .iter()
            .zip(&self.content_targets)
            .zip(&self.content_layers)
        {
            let loss = content_loss(feature, target, self.norm)?;
            content = (content + loss.affine(weighted.weight as f64, 0.0)?)?;
        }

        let mut style = Tensor::zeros((), image.dtype(), image.device())?;
        for ((feature, target), weighted) in style_features
            .iter()
            .zip(&self.style_targets)
            .zip(&self.style_layers)
        {
            let loss = style_loss(&gram_matrix(feature)?, target, self.norm)?;
            style = (style + loss.affine(weighted.weight as f64, 0.0)?)?;
        }

        let content = content.affine(self.content_factor, 0.0)?;
        let style = style.affine(self.style_factor, 0.0)?;
        let total = (&content + &style)?;

        Ok(Evaluation {
            content: content.to_scalar::<f32>()?,
            style: style.to_scalar::<f32>()?,
            total,
        })
    }
}

fn layers_of(weights: &[LayerWeight]) -> Vec<Layer> {
    weights.iter().map(|weighted| weighted.layer).collect()
}
