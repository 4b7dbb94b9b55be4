//! deskpipe CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use deskpipe::{
    commands::{
        cmd_init, cmd_rebuild, cmd_status, print_report, print_status, RebuildOptions,
        RebuildTarget,
    },
    config::Config,
    error::{Error, Result},
    progress::LogWriterFactory,
    warehouse::Warehouse,
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deskpipe")]
#[command(version, about = "Unify support tickets and keep embeddings fresh", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the warehouse schema
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Run a pipeline end to end
    Rebuild {
        /// Pipeline to run
        #[arg(value_enum)]
        target: RebuildTarget,

        /// Remove a lock left behind by a crashed run first
        #[arg(long)]
        force_unlock: bool,
    },

    /// Show warehouse status and recent runs
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { force } => {
            let base_dir = cli.config.as_deref().map(base_dir_for);
            let config = cmd_init(base_dir, force).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "config": config.paths.config_file,
                        "warehouse": config.paths.db_file,
                    })
                );
            } else {
                println!("✓ deskpipe initialized at {:?}", config.paths.base_dir);
                println!("  Config: {}", config.paths.config_file.display());
                println!("  Warehouse: {}", config.paths.db_file.display());
                println!("\nNext steps:");
                println!("  1. Point the capability backend URLs at your services");
                println!("  2. Load forms, chats, emails and products into the warehouse");
                println!("  3. deskpipe rebuild tickets");
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "deskpipe", &mut std::io::stdout());
        }

        Commands::Rebuild {
            target,
            force_unlock,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let wh = Warehouse::connect(&config).await?;
            let report = cmd_rebuild(
                &config,
                &wh,
                RebuildOptions {
                    target,
                    force_unlock,
                },
            )
            .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }

        Commands::Status => {
            let config = load_config(cli.config.as_deref())?;
            let wh = Warehouse::connect(&config).await?;
            let status = cmd_status(&config, &wh).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

/// `--config` may name the TOML file or the directory holding it
fn base_dir_for(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "toml") {
        path.parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir)
    } else {
        path.to_path_buf()
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) if p.is_dir() => p.join("config.toml"),
        Some(p) => p.to_path_buf(),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
