// Vagrant Provider - Main Entry Point
//
// CLI front end for the provider operations. Results are printed as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use vagrant_provider::config::Config;
use vagrant_provider::{metrics, CallKind, Collaborators, VagrantProvider, VmRequest};

/// Vagrant cloud provider driver
#[derive(Parser, Debug)]
#[command(name = "vagrant-provider")]
#[command(version = "0.1.0")]
#[command(about = "Node lifecycle driver for Vagrant-backed clouds", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the XDG config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a node and optionally bootstrap it
    Create {
        /// Node name
        name: String,

        /// Profile to use
        #[arg(long)]
        profile: Option<String>,

        /// Skip the bootstrap step
        #[arg(long)]
        no_deploy: bool,

        /// SSH host used to verify the node
        #[arg(long)]
        ssh_host: Option<String>,

        /// SSH port used to verify the node
        #[arg(long)]
        ssh_port: Option<u16>,
    },
    /// Destroy a node according to its profile
    Destroy {
        /// Node name
        name: String,
    },
    /// Reboot a node
    Reboot {
        /// Node name
        name: String,
    },
    /// List nodes managed by this driver
    List,
    /// List nodes with all their grains
    ListFull,
    /// List selected fields of every node
    ListSelect {
        /// Comma separated field names
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
    },
    /// Show the grains of one node
    Show {
        /// Node name
        name: String,
    },
    /// List profiles (this provider's images)
    AvailImages,
    /// List locations (always empty)
    AvailLocations,
    /// List sizes (always empty)
    AvailSizes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(&config, args.verbose)?;
    if let Err(e) = metrics::init() {
        tracing::debug!("Metrics registry unavailable: {}", e);
    }

    let provider = VagrantProvider::new(&config, Collaborators::from_config(&config))
        .context("Failed to set up provider")?;

    match args.command {
        Some(Commands::Create {
            name,
            profile,
            no_deploy,
            ssh_host,
            ssh_port,
        }) => {
            let mut request = VmRequest::new(name);
            request.deploy = !no_deploy;
            request.profile = profile;
            request.driver = Some(provider.driver().to_string());
            request.ssh_host = ssh_host;
            request.ssh_port = ssh_port;
            print_json(&provider.create(&request).await?)?;
        }
        Some(Commands::Destroy { name }) => {
            print_json(&provider.destroy(&name, CallKind::Action).await?)?;
        }
        Some(Commands::Reboot { name }) => {
            print_json(&provider.reboot(&name, CallKind::Action).await?)?;
        }
        Some(Commands::List) => {
            print_json(&provider.list(CallKind::Function).await?)?;
        }
        Some(Commands::ListFull) => {
            print_json(&provider.list_full(CallKind::Function).await?)?;
        }
        Some(Commands::ListSelect { fields }) => {
            print_json(&provider.list_select(&fields, CallKind::Function).await?)?;
        }
        Some(Commands::Show { name }) => {
            print_json(&provider.show_instance(&name, CallKind::Action).await?)?;
        }
        Some(Commands::AvailImages) => print_json(&provider.avail_images())?,
        Some(Commands::AvailLocations) => print_json(&provider.avail_locations())?,
        Some(Commands::AvailSizes) => print_json(&provider.avail_sizes())?,
        None => {
            info!("No command specified. Use \"vagrant-provider --help\" for usage.");
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // Logs go to stderr so stdout carries only JSON results.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
