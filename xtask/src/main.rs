use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ota_core::{FirmwareIdentity, ImageDescriptor, pack_image};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Run the agent CLI, forwarding extra arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Write a pair of demo images (factory 1.0.0 and update 1.1.0)
    DemoImages {
        #[arg(long, default_value = "target/demo")]
        out: PathBuf,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn demo_images(out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)?;
    let body: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 253) as u8).collect();
    for version in ["1.0.0", "1.1.0"] {
        let descriptor =
            ImageDescriptor::new(FirmwareIdentity::new("demo-node", version, "Jan 01 2026 00:00:00"));
        let path = out.join(format!("demo-node-{version}.bin"));
        std::fs::write(&path, pack_image(&descriptor, &body)?)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let mut full = vec!["run", "-p", "ota-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Run")?;
        }
        Commands::DemoImages { out } => demo_images(out)?,
    }

    Ok(())
}
