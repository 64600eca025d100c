use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use localbus::{
    cli::{Cli, Command},
    script::run_script,
    BusConfig, EventBus, InMemoryEventBus,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = BusConfig::load(&cli)?;
    let filter = EnvFilter::try_new(&cfg.log_filter)
        .with_context(|| format!("invalid log filter {:?}", cfg.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let bus = InMemoryEventBus::with_config(&cfg);
    let mut stdout = tokio::io::stdout();

    match cli.command.unwrap_or(Command::Replay { script: None }) {
        Command::Replay { script: Some(path) } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening script {}", path.display()))?;
            info!(script = %path.display(), "replaying script");
            run_script(&bus, &mut BufReader::new(file), &mut stdout).await?;
        }
        Command::Replay { script: None } => {
            info!("replaying script from stdin");
            run_script(&bus, &mut BufReader::new(tokio::io::stdin()), &mut stdout).await?;
        }
        Command::Info => {
            println!("{:<20} {}", "event_bus_id", bus.event_bus_id());
            println!("{:<20} {}", "instance_id", bus.instance_id());
            println!("{:<20} {}", "failure_policy", cfg.failure_policy);
            println!("{:<20} {}", "reject_duplicate_ids", cfg.reject_duplicate_ids);
            println!("{:<20} {}", "log_filter", cfg.log_filter);
        }
    }
    Ok(())
}
