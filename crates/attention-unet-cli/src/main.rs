//! attention-unet CLI
//!
//! Builds a 3D attention U-Net from a JSON configuration on the CPU and
//! smoke-tests it.
//!
//! Supports:
//! - `smoke`: one forward pass on a random batch, checking the output size
//! - `summary`: layer layout and parameter count

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use attention_unet_blocks::{test_forward, AttentionUnet, AttentionUnetConfig, BlockError};
use attention_unet_hooks::{CaptureOptions, Hook, Hooked};
use burn::prelude::*;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "attention-unet")]
#[command(about = "Build and smoke-test 3D attention U-Net configurations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one forward pass on a random batch
    Smoke {
        /// Model configuration (JSON); defaults to the small preset
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input depth
        #[arg(long, default_value = "16")]
        depth: usize,

        /// Input height
        #[arg(long, default_value = "16")]
        height: usize,

        /// Input width
        #[arg(long, default_value = "16")]
        width: usize,

        /// Accept outputs whose spatial size differs from the input
        #[arg(long)]
        no_size_check: bool,
    },

    /// Print the layer layout and parameter count
    Summary {
        /// Model configuration (JSON); defaults to the small preset
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Mean and standard deviation of a captured tensor
#[derive(Debug, Clone, Copy)]
struct Stats {
    mean: f32,
    std: f32,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let device = NdArrayDevice::Cpu;

    match cli.command {
        Commands::Smoke {
            config,
            depth,
            height,
            width,
            no_size_check,
        } => {
            let config = load_config(config.as_deref())?;
            let model = build(&config, &device)?;
            smoke(model, [depth, height, width], !no_size_check, &device)
        }
        Commands::Summary { config } => {
            let config = load_config(config.as_deref())?;
            let model = build(&config, &device)?;
            summary(&config, &model);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

fn load_config(path: Option<&Path>) -> Result<AttentionUnetConfig> {
    let Some(path) = path else {
        tracing::info!("no configuration given, using the small preset");
        return Ok(AttentionUnetConfig::small());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn build(config: &AttentionUnetConfig, device: &NdArrayDevice) -> Result<AttentionUnet<Backend>> {
    let model = config
        .init::<Backend>(device)
        .context("Invalid model configuration")?;
    tracing::info!(
        levels = config.levels(),
        parameters = model.num_parameters(),
        "model built"
    );
    Ok(model)
}

fn smoke(
    model: AttentionUnet<Backend>,
    size: [usize; 3],
    check_size: bool,
    device: &NdArrayDevice,
) -> Result<()> {
    if size.contains(&0) {
        bail!("Input size must be non-zero, got {size:?}");
    }
    let out_channels = model.out_channels();

    let hooked = Hooked::new(model);
    let stats = Hook::new(
        hooked.forward_hooks(),
        |_: &AttentionUnet<Backend>, _: &_, output: &Tensor<Backend, 5>| Stats {
            mean: output.clone().mean().into_scalar(),
            std: output.clone().flatten::<1>(0, 4).var(0).sqrt().into_scalar(),
        },
        CaptureOptions::<Backend>::new(),
    );

    let out = match test_forward::<Backend, _>(&hooked, size, check_size, device) {
        Ok(out) => out,
        Err(err @ BlockError::SizeMismatch { .. }) => {
            bail!("{err} (rerun with --no-size-check to accept it)")
        }
        Err(err) => return Err(err.into()),
    };

    let [depth, height, width] = size;
    println!(
        "Input:  [2, {}, {depth}, {height}, {width}]",
        hooked.module().in_channels()
    );
    println!("Output: {:?} ({out_channels} classes)", out.dims());
    if let Some(Stats { mean, std }) = stats.stored() {
        println!("Logits: mean {mean:.4}, std {std:.4}");
    }
    Ok(())
}

fn summary(config: &AttentionUnetConfig, model: &AttentionUnet<Backend>) {
    println!("Attention U-Net");
    println!("  Input channels:  {}", config.in_channels);
    println!("  Output channels: {}", config.out_channels);
    println!("  Block kind:      {:?}", config.block_kind);
    println!("  Attention gates: {}", config.spatial_attention);
    println!();

    println!(
        "  stem     {} -> {}",
        model.stem.in_channels(),
        model.stem.out_channels()
    );
    for (level, chain) in model.encoder.iter().enumerate() {
        println!(
            "  encoder  level {}: {} blocks -> {} channels",
            level + 1,
            chain.len(),
            chain.out_channels()
        );
    }
    for (i, block) in model.decoder.iter().enumerate() {
        let supervised = if i < model.supervision.len() {
            " (+ supervision head)"
        } else {
            ""
        };
        println!(
            "  decoder  block {}: -> {} channels{supervised}",
            i + 1,
            block.out_channels()
        );
    }
    println!(
        "  head     {} -> {}",
        model.head.in_channels(),
        model.head.out_channels()
    );
    println!();
    println!("  Parameters: {}", model.num_parameters());
}
