//! NHL Statistics Ingestion Service
//!
//! Pulls conferences, divisions, teams, rosters, schedules and play-by-play
//! from the NHL stats API and upserts them into Postgres. A watermark file
//! records how far ingestion has progressed so each run only fetches
//! `[watermark, today + 1)`.

pub mod api;
pub mod config;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod transport;
pub mod watermark;

pub use api::StatsClient;
pub use config::Config;
pub use loader::{Loader, PgLoader, UnitOfWork};
pub use model::RecordBatch;
pub use pipeline::{Pipeline, PipelineOptions, PipelineState, RunReport, WatermarkPolicy};
pub use transport::{HttpTransport, Transport};
pub use watermark::{FetchWindow, FileWatermarkStore};
