use crate::error::{Error, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

// (convolutions, output channels) per block; every block ends in a 2x2 max pool.
const BLOCKS: [(usize, usize); 5] = [(2, 64), (2, 128), (4, 256), (4, 512), (4, 512)];

/// The post-activation output of one VGG19 convolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Block1Conv1,
    Block1Conv2,
    Block2Conv1,
    Block2Conv2,
    Block3Conv1,
    Block3Conv2,
    Block3Conv3,
    Block3Conv4,
    Block4Conv1,
    Block4Conv2,
    Block4Conv3,
    Block4Conv4,
    Block5Conv1,
    Block5Conv2,
    Block5Conv3,
    Block5Conv4,
}

impl Layer {
    pub const ALL: [Layer; 16] = [
        Layer::Block1Conv1,
        Layer::Block1Conv2,
        Layer::Block2Conv1,
        Layer::Block2Conv2,
        Layer::Block3Conv1,
        Layer::Block3Conv2,
        Layer::Block3Conv3,
        Layer::Block3Conv4,
        Layer::Block4Conv1,
        Layer::Block4Conv2,
        Layer::Block4Conv3,
        Layer::Block4Conv4,
        Layer::Block5Conv1,
        Layer::Block5Conv2,
        Layer::Block5Conv3,
        Layer::Block5Conv4,
    ];

    /// Position among the sixteen convolutions.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Layer::Block1Conv1 => "block1_conv1",
            Layer::Block1Conv2 => "block1_conv2",
            Layer::Block2Conv1 => "block2_conv1",
            Layer::Block2Conv2 => "block2_conv2",
            Layer::Block3Conv1 => "block3_conv1",
            Layer::Block3Conv2 => "block3_conv2",
            Layer::Block3Conv3 => "block3_conv3",
            Layer::Block3Conv4 => "block3_conv4",
            Layer::Block4Conv1 => "block4_conv1",
            Layer::Block4Conv2 => "block4_conv2",
            Layer::Block4Conv3 => "block4_conv3",
            Layer::Block4Conv4 => "block4_conv4",
            Layer::Block5Conv1 => "block5_conv1",
            Layer::Block5Conv2 => "block5_conv2",
            Layer::Block5Conv3 => "block5_conv3",
            Layer::Block5Conv4 => "block5_conv4",
        }
    }

    /// Number of 2x2 max pools the image passes before reaching this layer.
    pub fn pools_before(self) -> usize {
        let mut convs = 0;
        BLOCKS
            .iter()
            .take_while(|&&(count, _)| {
                convs += count;
                convs <= self.index()
            })
            .count()
    }

    /// Smallest image side that still leaves one pixel at this layer.
    pub fn min_input_size(self) -> u32 {
        1 << self.pools_before()
    }
}

/// Something that maps an image tensor to intermediate activations.
pub trait FeatureExtractor {
    /// Returns one `(1, C, H, W)` activation per requested layer, in request order.
    fn extract(&self, image: &Tensor, layers: &[Layer]) -> Result<Vec<Tensor>>;
}

struct Stage {
    conv: Conv2d,
    // Max pool after the ReLU when this convolution closes a block.
    pool: bool,
}

/// Convolutional half of VGG19. Weights are plain tensors, so gradients never
/// reach them.
pub struct Vgg19 {
    stages: Vec<Stage>,
}

impl Vgg19 {
    /// Builds the network from a var builder with torchvision naming
    /// (`features.{i}.weight`, `features.{i}.bias`).
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("features");
        let config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut stages = Vec::with_capacity(Layer::ALL.len());
        let mut in_channels = 3;
        let mut feature = 0;
        for &(count, channels) in &BLOCKS {
            for i in 0..count {
                let conv = candle_nn::conv2d(in_channels, channels, 3, config, vb.pp(feature))?;
                stages.push(Stage {
                    conv,
                    pool: i + 1 == count,
                });
                in_channels = channels;
                // conv, relu
                feature += 2;
            }
            // max pool
            feature += 1;
        }

        Ok(Self { stages })
    }

    /// Memory-maps pretrained weights from a safetensors file.
    pub fn load<P: AsRef<Path>>(weights: P, device: &Device) -> Result<Self> {
        let weights = weights.as_ref();
        if !weights.exists() {
            return Err(Error::MissingInput(weights.to_path_buf()));
        }
        // SAFETY: the file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        Self::new(vb)
    }
}

impl FeatureExtractor for Vgg19 {
    fn extract(&self, image: &Tensor, layers: &[Layer]) -> Result<Vec<Tensor>> {
        let deepest = match layers.iter().map(|layer| layer.index()).max() {
            Some(deepest) => deepest,
            None => return Ok(Vec::new()),
        };

        let mut activations = Vec::with_capacity(deepest + 1);
        let mut xs = image.clone();
        for stage in &self.stages[..=deepest] {
            xs = stage.conv.forward(&xs)?.relu()?;
            activations.push(xs.clone());
            if stage.pool {
                xs = xs.max_pool2d(2)?;
            }
        }

        Ok(layers
            .iter()
            .map(|layer| activations[layer.index()].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn layer_names_match_serde() {
        for layer in Layer::ALL {
            let yaml = serde_yaml::to_string(&layer).unwrap();
            assert!(yaml.contains(layer.name()), "{} vs {}", yaml, layer.name());
            assert_eq!(Layer::ALL[layer.index()], layer);
        }
    }

    #[test]
    fn pools_per_block() {
        assert_eq!(Layer::Block1Conv2.pools_before(), 0);
        assert_eq!(Layer::Block2Conv1.pools_before(), 1);
        assert_eq!(Layer::Block3Conv4.pools_before(), 2);
        assert_eq!(Layer::Block4Conv1.pools_before(), 3);
        assert_eq!(Layer::Block5Conv4.pools_before(), 4);
        assert_eq!(Layer::Block5Conv2.min_input_size(), 16);
    }

    #[test]
    fn torchvision_weight_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Vgg19::new(vb).unwrap();

        let data = varmap.data().lock().unwrap();
        assert_eq!(data.len(), 32);
        for name in ["features.0.weight", "features.5.bias", "features.19.weight", "features.34.bias"] {
            assert!(data.contains_key(name), "{}", name);
        }
        assert_eq!(data["features.28.weight"].dims(), &[512, 512, 3, 3]);
    }

    #[test]
    fn extract_shapes_in_request_order() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let vgg = Vgg19::new(vb).unwrap();

        let image = Tensor::zeros((1, 3, 32, 48), DType::F32, &Device::Cpu).unwrap();
        let layers = [Layer::Block3Conv1, Layer::Block1Conv1, Layer::Block5Conv2];
        let features = vgg.extract(&image, &layers).unwrap();

        assert_eq!(features.len(), 3);
        assert_eq!(features[0].dims(), &[1, 256, 8, 12]);
        assert_eq!(features[1].dims(), &[1, 64, 32, 48]);
        assert_eq!(features[2].dims(), &[1, 512, 2, 3]);
        assert!(vgg.extract(&image, &[]).unwrap().is_empty());
    }
}
