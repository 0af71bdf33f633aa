use std::path::Path;

use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use winsentry::{
    Engine,
    config::{Config, read_config_file},
    util::{apply_env_overrides, get_config_path},
};

#[derive(Debug, Clone, Parser)]
#[command(about = "Runs the WinSentry monitoring engine")]
struct Args {
    /// Config file (defaults to $WINSENTRY_CONFIG or ./winsentry.json)
    #[arg(short)]
    file: Option<String>,

    /// Log level for the engine
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("winsentry", level),
        ("winsentry_engine", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        read_config_file(path)
    } else {
        warn!("config file {path} not found, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(get_config_path);
    let mut config = load_config(&path)?;
    apply_env_overrides(&mut config);

    let engine = match Engine::start(config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine failed to start: {e}");
            return Err(e.into());
        }
    };

    info!("monitoring {} targets, press Ctrl-C to stop", engine.list_targets().await.len());

    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;

    Ok(())
}
