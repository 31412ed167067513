// Copyright 2026 Job Harvest Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use job_harvest::cli;
use job_harvest::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "job-harvest",
    about = "Job Harvest: resumable job-listing harvester",
    version,
    after_help = "Run 'job-harvest <command> --help' for details on each command."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest every configured search combination
    Run {
        /// Path to the TOML config
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Override the store file from the config
        #[arg(long)]
        output: Option<PathBuf>,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
    },
    /// Rewrite a store file into the current schema
    Migrate {
        /// Store file
        #[arg(long)]
        output: PathBuf,
    },
    /// Show store statistics
    Status {
        /// Store file
        #[arg(long, default_value = "output.csv")]
        output: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "job_harvest=debug"
    } else {
        "job_harvest=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        logs.json().init();
    } else {
        logs.init();
    }

    let result = match cli.command {
        Commands::Run {
            config,
            output,
            headful,
        } => cli::run_cmd::run(&config, output, headful).await,
        Commands::Migrate { output } => cli::store_cmd::migrate(&output).await,
        Commands::Status { output } => cli::store_cmd::status(&output).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "job-harvest", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
