use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use restyle::imaging;
use restyle::loss::Evaluation;
use restyle::{Observer, Settings, Snapshot, StyleTransfer, Vgg19};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Repaints a content image in the style of another image.
#[derive(Parser)]
#[command(name = "stylize")]
struct Args {
    /// YAML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    content: Option<PathBuf>,
    #[arg(long)]
    style: Option<PathBuf>,
    /// VGG19 weights in safetensors format
    #[arg(long)]
    weights: Option<PathBuf>,
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    steps: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn settings(self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => Settings::default(),
        };
        if let Some(content) = self.content {
            settings.content_image = content;
        }
        if let Some(style) = self.style {
            settings.style_image = style;
        }
        if let Some(weights) = self.weights {
            settings.weights = weights;
        }
        if let Some(output_dir) = self.output_dir {
            settings.output_dir = output_dir;
        }
        if let Some(epochs) = self.epochs {
            settings.epochs = epochs;
        }
        if let Some(steps) = self.steps {
            settings.steps_per_epoch = steps;
        }
        if self.seed.is_some() {
            settings.seed = self.seed;
        }
        settings.validate()?;
        Ok(settings)
    }
}

struct Progress {
    steps_per_epoch: usize,
}

impl Observer for Progress {
    fn on_step(&mut self, epoch: usize, step: usize, evaluation: &Evaluation) {
        if step % 10 == 0 || step == self.steps_per_epoch {
            info!(
                "Epoch {} [{}/{}] loss: {:.4}",
                epoch,
                step,
                self.steps_per_epoch,
                evaluation.content + evaluation.style
            );
        }
    }

    fn on_epoch(&mut self, snapshot: &Snapshot) {
        info!(
            "{:>3.0}% saved {}",
            snapshot.progress * 100.0,
            snapshot.path.display()
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restyle=info,stylize=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let settings = Args::parse().settings()?;
    let device = Device::cuda_if_available(0)?;

    let vgg = Vgg19::load(&settings.weights, &device)
        .with_context(|| format!("failed to load {}", settings.weights.display()))?;
    let content = imaging::load_image(
        &settings.content_image,
        settings.width,
        settings.height,
        &device,
    )
    .context("failed to load content image")?;
    let style = imaging::load_image(
        &settings.style_image,
        settings.width,
        settings.height,
        &device,
    )
    .context("failed to load style image")?;

    info!(
        "{} epochs x {} steps at {}x{}",
        settings.epochs, settings.steps_per_epoch, settings.width, settings.height
    );

    let mut transfer = StyleTransfer::new(&vgg, &content, &style, &settings)?;
    let mut progress = Progress {
        steps_per_epoch: settings.steps_per_epoch,
    };
    let snapshots = transfer.run(&mut progress)?;

    if let Some(last) = snapshots.last() {
        info!("done, final image at {}", last.path.display());
    }
    Ok(())
}
