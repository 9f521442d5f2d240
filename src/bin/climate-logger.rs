use clap::Parser;
use climate_logger::{devices::gmw90, FileStore, PollingLogger};
use log::{error, LevelFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about=None)]
struct Cli {
    /// Serial device the GMW90 is attached to
    #[arg(env = "GMW90_DEVICE", default_value = "/dev/ttyUSB0")]
    device: String,

    /// Directory for the monthly CSV files and the error log
    #[arg(long, env = "GMW90_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// File holding the latest reading
    #[arg(long, env = "GMW90_SNAPSHOT", default_value = "newest")]
    snapshot: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut logger = pretty_env_logger::formatted_builder();
    logger.filter_level(LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let Cli {
        device,
        data_dir,
        snapshot,
    } = Cli::parse();

    let storage = FileStore::create(data_dir, snapshot).await?;
    let device = gmw90::open(&device).await?;

    PollingLogger::new(device, storage)
        .run_until(shutdown())
        .await
}

async fn shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C, running until killed: {}", e);
        std::future::pending::<()>().await
    }
}

#[test]
fn verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
