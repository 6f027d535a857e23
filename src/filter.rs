use anyhow::{Context, Result};
use clap::Parser;
use restyle::filters;
use restyle::Pipeline;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs a fixed chain of image filters over each input.
#[derive(Parser)]
#[command(name = "filter")]
struct Args {
    /// Dash-separated filters: `edges`, `c{x}x{y}x{w}x{h}`, `r{w}x{h}`, `p{bits}`
    #[arg(short, long, default_value = "edges-c100x100x300x300-r224x224-p4")]
    pipeline: String,
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restyle=info,filter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    let args = Args::parse();
    let pipeline: Pipeline = args.pipeline.parse()?;
    let names = filters::output_file_names(&args.inputs);
    fs::create_dir_all(&args.output_dir)?;

    // Decode only one batch at a time.
    let workers = filters::default_workers();
    for (inputs, names) in args.inputs.chunks(workers).zip(names.chunks(workers)) {
        let mut images = Vec::with_capacity(inputs.len());
        for input in inputs {
            let image = image::open(input)
                .with_context(|| format!("failed to open {}", input.display()))?
                .into_rgb8();
            images.push(image);
        }

        let outputs = pipeline.apply_all_with(&images, workers);
        for ((input, name), output) in inputs.iter().zip(names).zip(&outputs) {
            let path = args.output_dir.join(name);
            output
                .save(&path)
                .with_context(|| format!("failed to save {}", path.display()))?;
            info!("{} -> {}", input.display(), path.display());
        }
    }
    Ok(())
}
