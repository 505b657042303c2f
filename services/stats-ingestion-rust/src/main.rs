//! NHL Statistics Ingestion Service v1.0
//!
//! One-shot incremental sync: reads the watermark, fetches everything from
//! the watermark through today, commits it in one transaction and exits.

use anyhow::Result;
use chrono::Local;
use stats_ingestion::loader::connect_db_with_retry;
use stats_ingestion::{
    Config, FileWatermarkStore, HttpTransport, PgLoader, Pipeline, StatsClient,
};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stats_ingestion=info".parse()?),
        )
        .init();

    info!("NHL Statistics Ingestion Service v1.0");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };

    let transport = HttpTransport::new(&config)?;
    let client = StatsClient::new(transport);
    let watermark = FileWatermarkStore::new(&config.watermark_path);

    let pool = connect_db_with_retry(&config.database_url, config.db_connect_retries).await?;
    let loader = PgLoader::new(pool.clone());

    let mut pipeline = Pipeline::new(client, watermark, loader, config.pipeline_options());
    let today = Local::now().date_naive();
    let result = pipeline.run(today).await;

    // Release the connection on every exit path; uncommitted work is discarded.
    pool.close().await;

    match result {
        Ok(report) => {
            info!(
                "Sync completed for window {}: {}",
                report.window, report.counts
            );
            Ok(())
        }
        Err(e) => {
            error!("Sync aborted: {:?}", e);
            Err(e)
        }
    }
}
