use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use testflow::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testflow")]
#[command(about = "Run distributed integration-test workflows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file and write its report
    Run {
        /// Path to the workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum number of concurrently running steps
        #[arg(short, long, default_value_t = 4)]
        parallel: usize,

        /// Run timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Where to write the JSON report (stdout when omitted)
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Validate a workflow file without running it
    Check {
        /// Path to the workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli).await {
        Ok(passed) => {
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            file,
            parallel,
            timeout,
            report,
        } => {
            let workflow = WorkflowLoader::load_file(&file)?;

            let config = EngineConfig {
                max_parallel: parallel,
                run_timeout: timeout.map(Duration::from_secs),
                ..EngineConfig::default()
            };
            let engine = Engine::new(config, Arc::new(ProcessProvisioner::new()))?;
            let run_report = engine.run(workflow).await?;

            let json = serde_json::to_string_pretty(&run_report)?;
            match report {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{}", json),
            }

            Ok(run_report.passed)
        }

        Commands::Check { file } => {
            let workflow = WorkflowLoader::load_file(&file)?;
            StepGraph::build(&workflow.tests)?;
            println!("{}: {} steps, dependency graph ok", file.display(), workflow.tests.len());
            Ok(true)
        }
    }
}
