//! saliency-rs CLI for image classification with Grad-CAM explanations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saliency_core::{DeviceKind, LayerKind, ModelSize, RawSettings};
use saliency_models::{arch_name, EfficientNetV2Config};

#[derive(Parser)]
#[command(name = "saliency")]
#[command(author, version)]
#[command(about = "Classify an image and explain the top predictions with Grad-CAM")]
#[command(long_about = "saliency-rs: ImageNet classification with Grad-CAM heatmap overlays.

Every option of `run` can also be given through the environment variable
shown in its help text, or through a `.env` file in the working directory.
Command-line values take precedence, then the process environment, then `.env`.

EXAMPLES:
  # Classify with the small model on the CPU
  saliency run --model-size small --device cpu --image dog.jpg

  # Same, configured through the environment
  MODEL_SIZE=large DEVICE=cpu IMAGE_PATH=dog.jpg saliency run

  # Explain an earlier layer instead of the last spatial one
  saliency run --model-size small --device cpu --image dog.jpg --layer stage5

  # Convert downloaded torchvision weights to a Burn record
  saliency convert --model-size small --input efficientnet_v2_s-dd5fe13b.pth

  # List layers that can be explained
  saliency layers --model-size large

WEIGHTS:
  The weights directory holds the torchvision state dicts as downloaded
  (efficientnet_v2_s-dd5fe13b.pth, efficientnet_v2_l-59c71312.pth) or the
  efficientnet_v2_s.mpk / efficientnet_v2_l.mpk records `convert` writes.
  ImageNet class names are built in.")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an image and write Grad-CAM overlays for the top-K classes
    Run(RunArgs),
    /// Convert torchvision weights into a Burn record
    Convert {
        /// Model variant: small or large
        #[arg(long, env = "MODEL_SIZE", default_value = "small", value_name = "SIZE")]
        model_size: String,

        /// torchvision state dict (.pth)
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Directory to write the record into
        #[arg(long, env = "WEIGHTS_DIR", default_value = "weights", value_name = "DIR")]
        weights: PathBuf,
    },
    /// List the layers of a model variant
    Layers {
        /// Model variant: small or large
        #[arg(long, env = "MODEL_SIZE", default_value = "small", value_name = "SIZE")]
        model_size: String,
    },
    /// Show which compute devices this build can use
    Devices,
}

#[derive(Args)]
struct RunArgs {
    /// Model variant: small or large
    #[arg(long, env = "MODEL_SIZE", value_name = "SIZE")]
    model_size: Option<String>,

    /// Compute device: cpu, cuda or mps
    #[arg(long, env = "DEVICE", value_name = "DEVICE")]
    device: Option<String>,

    /// Image to classify
    #[arg(long, env = "IMAGE_PATH", value_name = "PATH")]
    image: Option<String>,

    /// Directory for overlays and predictions.json [default: output]
    #[arg(long, env = "OUTPUT_DIR", value_name = "DIR")]
    output: Option<String>,

    /// Directory holding model weights and labels [default: weights]
    #[arg(long, env = "WEIGHTS_DIR", value_name = "DIR")]
    weights: Option<String>,

    /// Number of predictions to explain [default: 5]
    #[arg(long, env = "TOP_K", value_name = "K")]
    top_k: Option<String>,

    /// Heatmap weight in the overlay, between 0 and 1 [default: 0.5]
    #[arg(long, env = "ALPHA", value_name = "ALPHA")]
    alpha: Option<String>,

    /// Layer to explain [default: last spatial layer]
    #[arg(long, env = "TARGET_LAYER", value_name = "NAME")]
    layer: Option<String>,
}

impl From<RunArgs> for RawSettings {
    fn from(args: RunArgs) -> Self {
        RawSettings {
            model_size: args.model_size,
            device: args.device,
            image_path: args.image,
            output_dir: args.output,
            weights_dir: args.weights,
            top_k: args.top_k,
            alpha: args.alpha,
            target_layer: args.layer,
        }
    }
}

fn main() -> Result<()> {
    // Values already in the environment win over the file.
    let env_file = dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Convert {
            model_size,
            input,
            weights,
        } => handle_convert(&model_size, input, weights),
        Commands::Layers { model_size } => handle_layers(&model_size),
        Commands::Devices => handle_devices(),
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    let config = RawSettings::from(args)
        .validate()
        .context("Invalid configuration")?;

    println!("Using model size: {}", config.model_size);
    println!("Using device: {}", config.device);
    println!("Using image path: {}", config.image_path.display());

    let report = saliency_pipeline::run(&config)
        .with_context(|| format!("Failed to explain {}", config.image_path.display()))?;

    println!();
    print!("{}", report.listing());
    println!();
    for artifact in &report.artifacts {
        println!(" Saved: {}", artifact.path.display());
    }
    println!(
        " Saved: {}",
        config.output_dir.join(saliency_pipeline::REPORT_FILE).display()
    );

    Ok(())
}

fn handle_convert(model_size: &str, input: PathBuf, weights: PathBuf) -> Result<()> {
    let size = ModelSize::parse(model_size)?;
    println!("Converting {} for {}", input.display(), arch_name(size));

    let path = saliency_pipeline::convert_weights(size, &input, &weights)
        .with_context(|| format!("Failed to convert {}", input.display()))?;
    println!(" Saved: {}", path.display());
    Ok(())
}

fn handle_layers(model_size: &str) -> Result<()> {
    let size = ModelSize::parse(model_size)?;
    let config = EfficientNetV2Config::for_size(size);
    let layers = config.layers();
    let target = layers.iter().rposition(|l| l.kind == LayerKind::Spatial);

    println!("{} ({} classes)", arch_name(size), config.num_classes);
    println!("─────────────────────────────────────────");
    for (i, layer) in layers.iter().enumerate() {
        let kind = match layer.kind {
            LayerKind::Spatial => "spatial",
            LayerKind::Flat => "flat",
        };
        let marker = if Some(i) == target { "  <- default Grad-CAM target" } else { "" };
        println!("{:>3}  {:<12} {}{}", i, layer.name, kind, marker);
    }
    Ok(())
}

fn handle_devices() -> Result<()> {
    println!("Compute devices:");
    for device in DeviceKind::ALL {
        let status = match device.ensure_available() {
            Ok(()) => "available".to_string(),
            Err(e) => e.to_string(),
        };
        println!("  {:<5} {}", device.as_str(), status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_map_to_settings() {
        let cli = Cli::try_parse_from([
            "saliency",
            "run",
            "--model-size",
            "large",
            "--device",
            "cpu",
            "--image",
            "dog.jpg",
            "--top-k",
            "3",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let raw = RawSettings::from(args);
        assert_eq!(raw.model_size.as_deref(), Some("large"));
        assert_eq!(raw.image_path.as_deref(), Some("dog.jpg"));
        assert_eq!(raw.top_k.as_deref(), Some("3"));
    }

    #[test]
    fn test_convert_args() {
        let cli = Cli::try_parse_from([
            "saliency",
            "convert",
            "--model-size",
            "large",
            "--input",
            "efficientnet_v2_l-59c71312.pth",
            "--weights",
            "out",
        ])
        .unwrap();
        let Commands::Convert {
            model_size,
            input,
            weights,
        } = cli.command
        else {
            panic!("expected convert");
        };
        assert_eq!(model_size, "large");
        assert_eq!(input, PathBuf::from("efficientnet_v2_l-59c71312.pth"));
        assert_eq!(weights, PathBuf::from("out"));
    }

    #[test]
    fn test_env_file_feeds_run_settings() {
        let dir = std::env::temp_dir().join(format!("saliency-cli-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let env_file = dir.join(".env");
        std::fs::write(&env_file, "MODEL_SIZE=large\nDEVICE=cpu\nIMAGE_PATH=from_env_file.jpg\n").unwrap();

        dotenvy::from_path_override(&env_file).unwrap();
        let cli = Cli::try_parse_from(["saliency", "run", "--device", "mps"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let raw = RawSettings::from(args);
        assert_eq!(raw.model_size.as_deref(), Some("large"));
        assert_eq!(raw.image_path.as_deref(), Some("from_env_file.jpg"));
        // Command-line values still take precedence.
        assert_eq!(raw.device.as_deref(), Some("mps"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_verbosity_is_global() {
        let cli = Cli::try_parse_from(["saliency", "layers", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
