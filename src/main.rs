use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use synapsenet::config::Config;
use synapsenet::llm::HttpLlmClient;
use synapsenet::orchestrator::Orchestrator;
use synapsenet::server;

#[derive(Parser, Debug)]
#[command(
    name = "synapsenet",
    version,
    about = "Autonomous program repair: diagnose a failing test suite, patch it, validate the fix."
)]
struct Cli {
    /// Path to YAML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one repair task to completion
    Run {
        /// Natural-language description of the defect
        task: String,
    },
    /// Serve the HTTP control plane
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Write a sample config file
    InitConfig {
        #[arg(long, default_value = "synapsenet.yaml")]
        out: PathBuf,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::InitConfig { out } => {
            std::fs::write(&out, Config::sample_yaml())?;
            println!("Wrote sample config to {}", out.display());
            Ok(())
        }
        Commands::Run { task } => {
            let orchestrator = build_orchestrator(cli.config.as_ref())?;
            let result = orchestrator.run_task(&task).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.success {
                Ok(())
            } else {
                std::process::exit(1)
            }
        }
        Commands::Serve { port } => {
            let orchestrator = Arc::new(build_orchestrator(cli.config.as_ref())?);
            server::serve(orchestrator, port).await
        }
    }
}

fn build_orchestrator(config_path: Option<&PathBuf>) -> Result<Orchestrator> {
    let config = Config::load_with_env(config_path)?;
    config.validate()?;
    let llm = Arc::new(HttpLlmClient::new(&config.llm)?);
    Orchestrator::new(config, llm)
}
