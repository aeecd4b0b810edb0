use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use gridfall::events::FileEventSink;
use gridfall::store::{FileStore, Storage};
use gridfall::{Config, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    info!(port = config.port, data_dir = %config.data_dir.display(), "starting gridfall");

    let store = FileStore::open(&config.data_dir)?;
    let events = Box::new(FileEventSink::new(&config.data_dir));
    let engine: Arc<Engine> = Engine::new(config, Storage::file_only(store), events);

    gridfall::server::serve(engine).await
}
