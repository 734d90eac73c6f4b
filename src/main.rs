use anyhow::Context;
use clap::Parser;

use sonar_export::cli::Cli;
use sonar_export::settings::{FileSettings, LogLevel, Settings};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => FileSettings::load(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => FileSettings::default(),
    };

    let settings = Settings::from_process_env(&cli.overrides(), &file)?;
    init_tracing(settings.log_level)?;

    let status = sonar_export::app::run(&settings).await?;
    Ok(status.code())
}

fn init_tracing(level: LogLevel) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}
