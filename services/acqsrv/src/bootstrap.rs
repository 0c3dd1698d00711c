//! Service bootstrap
//!
//! Argument parsing, logging initialization and mapping seed loading shared
//! by the binary and the validation mode.

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::AcqSrvConfig;
use crate::error::Result;
use crate::mapping::MappingStore;

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "acqsrv", about = "FieldGate acquisition service")]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "acqsrv.yaml", env = "ACQSRV_CONFIG")]
    pub config: String,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,

    /// Directory for file logging; stderr only when absent
    #[arg(long, env = "ACQSRV_LOG_DIR")]
    pub log_dir: Option<String>,
}

/// Initialize tracing with env-filter; file logging when a directory is set
///
/// The returned guard must stay alive for the process lifetime, dropping it
/// flushes and stops the background writer.
pub fn initialize_logging(args: &Args) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "acqsrv.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        },
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        },
    }
}

/// Load configured mapping seed sets into the store
///
/// Runs the same validation as the runtime configuration boundary, so an
/// invalid seed set fails startup (and `--validate`) instead of surfacing
/// at decode time.
pub fn load_mapping_seeds(config: &AcqSrvConfig, store: &MappingStore) -> Result<()> {
    for set in &config.product_mappings {
        store.set_product_mappings(&set.product_id, set.mappings.clone())?;
    }
    for set in &config.device_mappings {
        store.batch_save_device(&set.device_id, set.mappings.clone())?;
    }
    Ok(())
}
