//! IP decision pipeline CLI.

use aegis_ip_decision::scheduler::{KeyRotationScheduler, MemoryKeyStore, RandomKeyGenerator};
use aegis_ip_decision::{Config, DecisionPipeline, DecisionRequest};
use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aegis-ip-decision")]
#[command(about = "Allow, flag or deny IP addresses using concurrent threat intelligence lookups")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "ip-decision.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide on one or more IP addresses
    Check {
        /// Addresses to check
        #[arg(required = true)]
        ips: Vec<String>,

        /// Organisation credential attached to every request
        #[arg(long)]
        org_key: Option<String>,
    },
    /// Print the aggregate counters
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if args.config.exists() {
        info!(config = %args.config.display(), "Loading configuration");
        Config::load(&args.config)?
    } else {
        info!(config = %args.config.display(), "Configuration file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        config
    };

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let Some(command) = args.command else {
        anyhow::bail!("no command given (try `check <IP>` or `metrics`)");
    };

    let pipeline = DecisionPipeline::from_config(&config)?;

    let rotation = config.key_rotation.enabled.then(|| {
        KeyRotationScheduler::new(
            pipeline.counters(),
            Arc::new(MemoryKeyStore::new()),
            Arc::new(RandomKeyGenerator),
        )
        .start(config.key_rotation.interval())
    });

    let outcome = run(&pipeline, command).await;

    if let Some(handle) = rotation {
        handle.stop().await;
    }

    outcome
}

async fn run(pipeline: &DecisionPipeline, command: Command) -> Result<()> {
    match command {
        Command::Check { ips, org_key } => {
            let requests: Vec<DecisionRequest> = ips
                .into_iter()
                .map(|ip| DecisionRequest {
                    subject: ip,
                    org_credential: org_key.clone(),
                })
                .collect();

            let results = join_all(requests.iter().map(|r| pipeline.decide(r))).await;

            let mut failures = 0usize;
            for (request, result) in requests.iter().zip(results) {
                match result {
                    Ok(decision) => println!("{}", serde_json::to_string(&decision)?),
                    Err(e) => {
                        failures += 1;
                        if e.is_client_error() {
                            error!(subject = %request.subject, error = %e, "Rejected subject");
                        } else {
                            error!(subject = %request.subject, error = %e, "Decision failed");
                        }
                    }
                }
            }

            if failures > 0 {
                anyhow::bail!("{} of {} checks failed", failures, requests.len());
            }
            Ok(())
        }
        Command::Metrics => {
            let counters = pipeline.metrics().await?;
            println!("{}", serde_json::to_string_pretty(&counters)?);
            Ok(())
        }
    }
}
