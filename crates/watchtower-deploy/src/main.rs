//! watchtower-deploy binary.
//!
//! Resolves a stack identifier and runs the matching flow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use watchtower_deploy::builder::{DockerImageBuilder, RecordingBuilder};
use watchtower_deploy::gateway::{ImageBuilder, MemoryGateway};
use watchtower_deploy::{create_gateways, DeployConfig, Gateways, Orchestrator};

#[derive(Parser)]
#[command(name = "watchtower-deploy")]
#[command(about = "Build and deploy the watchtower service")]
#[command(version)]
struct Cli {
    /// Stack to run: build, infra, stage, prod, or any name containing "ephemeral"
    stack: String,

    /// Configuration file
    #[arg(short, long, default_value = "deploy.toml")]
    config: PathBuf,

    /// Record intents in memory and print them instead of applying them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "watchtower_deploy=info"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Reject bad stacks before reading config or git state.
    let flow = watchtower_deploy::resolve(&cli.stack)?;

    let config = DeployConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let identity = config.release.identity().await?;
    let npm_token = std::env::var("NPM_TOKEN").unwrap_or_default();

    info!(stack = %cli.stack, dry_run = cli.dry_run, "configuration loaded");

    if cli.dry_run {
        let gateway = Arc::new(MemoryGateway::new());
        let builder = Arc::new(RecordingBuilder::new());
        let orchestrator = Orchestrator::new(
            config,
            identity,
            Gateways::shared(gateway.clone()),
            builder.clone(),
        )
        .with_npm_token(npm_token);

        let output = orchestrator.run(flow).await?;

        let snapshot = serde_json::json!({
            "builds": builder.requests(),
            "resources": gateway.snapshot(),
            "outputs": output.lines(),
        });
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let gateways = create_gateways(&config.cluster)?;
    let builder: Arc<dyn ImageBuilder> = Arc::new(DockerImageBuilder::new(config.build.push));
    let orchestrator =
        Orchestrator::new(config, identity, gateways, builder).with_npm_token(npm_token);

    let output = orchestrator.run(flow).await?;
    for line in output.lines() {
        println!("{line}");
    }

    Ok(())
}
