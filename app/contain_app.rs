use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use contain::layer::{Layer, StaticLayer};
use contain::{Appender, ContainConfig};

#[derive(Parser, Debug)]
#[clap(name = "contain app")]
struct Opt {
    /// Config file, json or yaml.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Base image reference, overrides the config file.
    #[clap(long)]
    base: Option<String>,

    /// Reference to push the result to.
    #[clap(long, env = "IMAGE")]
    tag: Option<String>,

    #[clap(long, env = "PLATFORMS", value_delimiter = ',')]
    platforms: Vec<String>,

    /// Uncompressed tar archive to append, in order. May be repeated.
    #[clap(long = "layer")]
    layers: Vec<PathBuf>,

    #[clap(long)]
    verbose: bool,
}

fn load_config(opt: &Opt) -> Result<ContainConfig, anyhow::Error> {
    let mut config = match &opt.config {
        Some(path) => {
            if !path.exists() {
                bail!("Path for config passed in does not exist: {:#?}", path);
            }
            ContainConfig::parse_file(path)?
        }
        None => ContainConfig::default(),
    };

    if let Some(base) = &opt.base {
        config.base = base.clone();
    }
    if let Some(tag) = &opt.tag {
        config.tag = Some(tag.clone());
    }
    if !opt.platforms.is_empty() {
        config.platforms = opt
            .platforms
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    if config.base.is_empty() {
        bail!("No base image given, set base in the config file or pass --base");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();

    let default_level = if opt.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_config(&opt)?;
    let mut appender = Appender::new(config)?;

    if let Err(e) = appender.resolve_base().await {
        tracing::error!(error = ?e, "Failed to get base image");
        return Err(e.into());
    }
    let layer_type = appender.layer_type()?;

    let mut layers: Vec<Arc<dyn Layer>> = Vec::with_capacity(opt.layers.len());
    for path in opt.layers.iter() {
        let tar = std::fs::read(path)
            .with_context(|| format!("Reading layer archive {:?}", path))?;
        let layer = StaticLayer::from_tar(&tar, layer_type)?;
        tracing::debug!(
            path = %path.display(),
            digest = %layer.digest(),
            size = layer.size(),
            "Built layer"
        );
        layers.push(Arc::new(layer));
    }

    let digest = appender.append(layers).await?;
    println!("{}", digest);

    Ok(())
}
