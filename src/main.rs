//! # Transcript Access Service - Main Entry Point
//!
//! Loads configuration, wires the stores into the API server and starts it.
//!
//! ## Environment Variables
//! - `RUST_LOG`: log filter (default: `info`)
//! - `TRANSCRIPT_HOST` / `TRANSCRIPT_PORT`: bind address (default: 127.0.0.1:3000)
//! - `TRANSCRIPT_DATABASE_URL`: (Optional) Postgres URL; in-memory records when unset
//! - `TRANSCRIPT_NONCE_TTL_SECONDS`, `TRANSCRIPT_SESSION_TTL_MINUTES`,
//!   `TRANSCRIPT_DEFAULT_EXPIRY_MINUTES`: lifetimes

use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use std::sync::Arc;

use transcript_access::services::api_server::ApiServer;
use transcript_access::storage::{MemoryKeyStore, MemoryRecordStore, PgRecordStore, RecordStore};
use transcript_access::utils::config::Settings;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load `.env` and initialise logging
/// 2. Load layered settings
/// 3. Connect the record store
/// 4. Start API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load configuration")?;

    let records: Arc<dyn RecordStore> = match &settings.database_url {
        Some(url) => {
            let store = PgRecordStore::connect(url, settings.database_max_connections)
                .await
                .context("failed to initialise Postgres record store")?;
            info!("using Postgres record store");
            Arc::new(store)
        }
        None => {
            warn!("TRANSCRIPT_DATABASE_URL not set; records are kept in memory only");
            Arc::new(MemoryRecordStore::new())
        }
    };
    // Nonces and sessions are short-lived and always kept in process.
    let keys = Arc::new(MemoryKeyStore::new());

    let api_server = ApiServer::new(keys, records, &settings);
    api_server.run(settings.bind_addr()).await
}
