use crate::error::{Error, Result};
use crate::vgg::Layer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A feature layer together with its share of the content or style loss.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeight {
    pub layer: Layer,
    pub weight: f32,
}

impl LayerWeight {
    pub fn new(layer: Layer, weight: f32) -> Self {
        Self { layer, weight }
    }
}

/// Constants of one style transfer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub content_layers: Vec<LayerWeight>,
    pub style_layers: Vec<LayerWeight>,
    pub content_loss_factor: f32,
    pub style_loss_factor: f32,
    pub width: u32,
    pub height: u32,
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub learning_rate: f64,
    /// Half-width of the uniform noise mixed into the starting image.
    pub noise_amplitude: f32,
    pub seed: Option<u64>,
    pub content_image: PathBuf,
    pub style_image: PathBuf,
    pub weights: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content_layers: vec![
                LayerWeight::new(Layer::Block4Conv2, 0.5),
                LayerWeight::new(Layer::Block5Conv2, 0.5),
            ],
            style_layers: vec![
                LayerWeight::new(Layer::Block1Conv1, 0.2),
                LayerWeight::new(Layer::Block2Conv1, 0.2),
                LayerWeight::new(Layer::Block3Conv1, 0.2),
                LayerWeight::new(Layer::Block4Conv1, 0.2),
                LayerWeight::new(Layer::Block5Conv1, 0.2),
            ],
            content_loss_factor: 1.0,
            style_loss_factor: 100.0,
            width: 450,
            height: 300,
            epochs: 20,
            steps_per_epoch: 100,
            learning_rate: 0.03,
            noise_amplitude: 0.2,
            seed: None,
            content_image: PathBuf::from("images/content.jpg"),
            style_image: PathBuf::from("images/style.jpg"),
            weights: PathBuf::from("models/vgg19.safetensors"),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let string = fs::read_to_string(path)?;
        let settings: Self = serde_yaml::from_str(&string)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let string = serde_yaml::to_string(self)?;
        fs::write(path, string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "image size {}x{} has no pixels",
                self.width, self.height
            )));
        }
        if self.epochs == 0 || self.steps_per_epoch == 0 {
            return Err(invalid("epochs and steps_per_epoch must be positive"));
        }
        if self.content_layers.is_empty() || self.style_layers.is_empty() {
            return Err(invalid("content_layers and style_layers must not be empty"));
        }
        if let Some(deepest) = self
            .content_layers
            .iter()
            .chain(&self.style_layers)
            .map(|weighted| weighted.layer)
            .max()
        {
            let min = deepest.min_input_size();
            if self.width < min || self.height < min {
                return Err(invalid(format!(
                    "image size {}x{} is too small for {}, which needs at least {}x{}",
                    self.width,
                    self.height,
                    deepest.name(),
                    min,
                    min
                )));
            }
        }
        for weighted in self.content_layers.iter().chain(&self.style_layers) {
            if !non_negative(weighted.weight) {
                return Err(invalid(format!(
                    "weight {} of {} must be finite and non-negative",
                    weighted.weight,
                    weighted.layer.name()
                )));
            }
        }
        if !non_negative(self.content_loss_factor) || !non_negative(self.style_loss_factor) {
            return Err(invalid("loss factors must be finite and non-negative"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid("learning_rate must be positive"));
        }
        if !non_negative(self.noise_amplitude) {
            return Err(invalid("noise_amplitude must be finite and non-negative"));
        }
        Ok(())
    }

    /// Number of pixels per image, the `M` of the loss normalization.
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

fn non_negative(x: f32) -> bool {
    x.is_finite() && x >= 0.0
}

fn invalid<S: Into<String>>(message: S) -> Error {
    Error::InvalidSettings(message.into())
}
