use crate::common;
use crate::error::Result;
use crate::imaging;
use crate::loss::{Evaluation, StyleObjective};
use crate::settings::Settings;
use crate::vgg::FeatureExtractor;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

/// Starting point of the optimization: the content image averaged with
/// uniform noise in `[-amplitude, amplitude]`.
pub fn initial_noise_image<R: Rng + ?Sized>(
    content: &Tensor,
    amplitude: f32,
    rng: &mut R,
) -> Result<Tensor> {
    let noise: Vec<f32> = (0..content.elem_count())
        .map(|_| {
            if amplitude > 0.0 {
                rng.gen_range(-amplitude..amplitude)
            } else {
                0.0
            }
        })
        .collect();
    let noise = Tensor::from_vec(noise, content.dims(), content.device())?;
    Ok((content + noise)?.affine(0.5, 0.0)?)
}

/// What the run looked like after one epoch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// 1-based.
    pub epoch: usize,
    pub path: PathBuf,
    pub loss: f32,
    /// Fraction of all steps done, from 0 to 1.
    pub progress: f32,
    /// Mean absolute pixel change since the previous snapshot.
    pub change: f32,
}

/// Receives progress of a run.
pub trait Observer {
    fn on_step(&mut self, _epoch: usize, _step: usize, _evaluation: &Evaluation) {}

    fn on_epoch(&mut self, _snapshot: &Snapshot) {}
}

/// Observer that ignores everything.
impl Observer for () {}

pub struct StyleTransfer<'a, E: FeatureExtractor> {
    extractor: &'a E,
    objective: StyleObjective,
    image: Var,
    optimizer: AdamW,
    settings: Settings,
}

impl<'a, E: FeatureExtractor> StyleTransfer<'a, E> {
    pub fn new(
        extractor: &'a E,
        content: &Tensor,
        style: &Tensor,
        settings: &Settings,
    ) -> Result<Self> {
        settings.validate()?;
        let objective = StyleObjective::new(extractor, content, style, settings)?;

        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let image = Var::from_tensor(&initial_noise_image(
            content,
            settings.noise_amplitude,
            &mut rng,
        )?)?;

        let optimizer = AdamW::new(
            vec![image.clone()],
            ParamsAdamW {
                lr: settings.learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-7,
                weight_decay: 0.0,
            },
        )?;

        Ok(Self {
            extractor,
            objective,
            image,
            optimizer,
            settings: settings.clone(),
        })
    }

    /// The image being optimized.
    pub fn image(&self) -> &Tensor {
        self.image.as_tensor()
    }

    pub fn evaluate(&self) -> Result<Evaluation> {
        self.objective.evaluate(self.extractor, self.image.as_tensor())
    }

    /// One gradient step. Returns the evaluation from before the update.
    pub fn step(&mut self) -> Result<Evaluation> {
        let evaluation = self.evaluate()?;
        self.optimizer.backward_step(&evaluation.total)?;
        Ok(evaluation)
    }

    /// Runs every epoch, writing `{epoch}.jpg` into the output directory after each.
    pub fn run<O: Observer + ?Sized>(&mut self, observer: &mut O) -> Result<Vec<Snapshot>> {
        let epochs = self.settings.epochs;
        let steps = self.settings.steps_per_epoch;
        let output_dir = self.settings.output_dir.clone();
        fs::create_dir_all(&output_dir)?;

        let mut snapshots = Vec::with_capacity(epochs);
        let mut previous: RgbImage = imaging::tensor_to_image(self.image())?;
        let start = Instant::now();

        for epoch in 1..=epochs {
            let mut loss = 0.0;
            for step in 1..=steps {
                let evaluation = self.step()?;
                loss = evaluation.content + evaluation.style;
                debug!(
                    epoch,
                    step,
                    loss,
                    content = evaluation.content,
                    style = evaluation.style,
                    "step"
                );
                observer.on_step(epoch, step, &evaluation);
            }

            let current = imaging::tensor_to_image(self.image())?;
            let path = output_dir.join(format!("{}.jpg", epoch));
            current.save(&path)?;

            let snapshot = Snapshot {
                epoch,
                path,
                loss,
                progress: epoch as f32 / epochs as f32,
                change: common::mean_abs_difference(&previous, &current)?,
            };
            info!(
                epoch,
                epochs,
                loss,
                change = snapshot.change,
                elapsed = ?start.elapsed(),
                path = %snapshot.path.display(),
                "epoch done"
            );
            observer.on_epoch(&snapshot);

            snapshots.push(snapshot);
            previous = current;
        }

        Ok(snapshots)
    }
}
