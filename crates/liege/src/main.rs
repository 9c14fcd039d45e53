// ABOUTME: liege CLI entry point.
// ABOUTME: Provides init, supervise, worker, and reload subcommands.

use clap::{Parser, Subcommand};
use liege::{
    config_path, run_init, run_supervisor, run_worker, send_reload, SupervisorRunOptions,
    WorkerCommand, WorkerRunOptions,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "liege")]
#[command(about = "Master/worker process supervisor with rolling reloads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new configuration file
    Init {
        /// Path to configuration file
        #[arg(long, env = "LIEGE_CONFIG")]
        config: Option<PathBuf>,
        /// Pool size
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Program each worker runs
        #[arg(long)]
        program: String,
        /// Arguments for the program
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run the coordinator
    Supervise {
        /// Path to configuration file
        #[arg(long, env = "LIEGE_CONFIG")]
        config: Option<PathBuf>,
        /// Override the configured pool size
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run a single worker (internal, spawned by the coordinator)
    #[command(hide = true)]
    Worker {
        /// Path to configuration file
        #[arg(long, env = "LIEGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Ask a running coordinator to reload its workers
    Reload {
        /// Path to configuration file
        #[arg(long, env = "LIEGE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            config,
            workers,
            program,
            args,
        } => run_init(
            &config_path(config)?,
            WorkerCommand::new(program, args),
            workers,
        ),
        Commands::Supervise { config, workers } => {
            run_supervisor(SupervisorRunOptions {
                config_path: config_path(config)?,
                workers,
            })
            .await
        }
        Commands::Worker { config } => {
            let code = run_worker(WorkerRunOptions {
                config_path: config_path(config)?,
            })
            .await?;
            std::process::exit(code);
        }
        Commands::Reload { config } => {
            let pid = send_reload(&config_path(config)?)?;
            println!("Sent reload signal to {}", pid);
            Ok(())
        }
    }
}
