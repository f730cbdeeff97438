use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ota_core::AgentConfig;
use tracing::{error, info};

mod commands;
mod host;

#[derive(Parser, Debug)]
#[command(author, version, about = "OTA update agent (host driver)", long_about = None)]
struct Args {
    /// Agent configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Partition directory, overrides the config file
    #[arg(long)]
    dir: Option<String>,

    /// Update topic, overrides the config file
    #[arg(long)]
    topic: Option<String>,

    /// Trust anchor PEM, overrides the config file
    #[arg(long)]
    trust_anchor: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a factory partition layout from an image
    Init {
        /// Packed image to install in ota_0
        image: PathBuf,
    },
    /// Pack a raw body into an update image
    Pack {
        /// Raw application body
        body: PathBuf,
        /// Output image path
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        version: String,
        /// Build timestamp, defaults to now
        #[arg(long)]
        build_timestamp: Option<String>,
    },
    /// Show the boot record and slot contents
    Status,
    /// Run boot reconciliation
    Boot,
    /// Deliver one notification and wait for the session
    Notify {
        /// JSON payload, e.g. {"version":"1.1.0","url":"file:///tmp/fw.bin"}
        payload: String,
    },
    /// Boot, bring the link up and handle "<topic> <payload>" lines from stdin
    Run,
    /// Simulate a power cycle through the bootloader
    Reset,
    /// Write the effective configuration to a file
    WriteConfig {
        path: PathBuf,
    },
}

fn load_config(args: &Args) -> anyhow::Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => AgentConfig::load_from_file(path)?,
        None => AgentConfig::default(),
    };
    if let Some(dir) = &args.dir {
        config.partition_dir = dir.clone();
    }
    if let Some(topic) = &args.topic {
        config.update_topic = topic.clone();
    }
    if let Some(pem) = &args.trust_anchor {
        config.trust_anchor_path = Some(pem.clone());
    }
    Ok(config)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    match args.command {
        Command::Init { image } => commands::init(&config, &image),
        Command::Pack {
            body,
            out,
            project,
            version,
            build_timestamp,
        } => commands::pack(&body, &out, &project, &version, build_timestamp),
        Command::Status => commands::status(&config),
        Command::Boot => commands::boot(&config),
        Command::Notify { payload } => commands::notify(&config, payload.as_bytes()),
        Command::Run => commands::run_loop(&config, std::io::stdin().lock()),
        Command::Reset => commands::reset(&config),
        Command::WriteConfig { path } => {
            config.save_to_file(&path)?;
            info!(path = %path.display(), "Configuration written");
            Ok(())
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
