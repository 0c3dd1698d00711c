//! Acquisition Service (`acqsrv`)
//!
//! Standalone binary: loads configuration, seeds the mapping store, builds
//! and seals the driver registry, starts one session per enabled device and
//! logs emitted data points (the external sink boundary) until shutdown.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use errors::{FieldError, FieldResult};

use acqsrv::bootstrap::{self, Args};
use acqsrv::config::DeviceDirectory;
use acqsrv::mapping::{MappingResolver, MappingStore};
use acqsrv::registry::create_default_registry;
use acqsrv::runtime::SessionManager;
use acqsrv::AcqSrvConfig;

#[tokio::main]
async fn main() -> FieldResult<()> {
    let args = Args::parse();
    let _log_guard = bootstrap::initialize_logging(&args);

    info!("FieldGate acquisition service starting");

    let config = AcqSrvConfig::load(&args.config).map_err(FieldError::from)?;

    // Validation mode: check devices and mapping seeds, then exit
    if args.validate {
        let scratch = MappingStore::new();
        bootstrap::load_mapping_seeds(&config, &scratch).map_err(FieldError::from)?;
        info!("Validation completed successfully");
        return Ok(());
    }

    let store = Arc::new(MappingStore::new());
    bootstrap::load_mapping_seeds(&config, &store).map_err(FieldError::from)?;

    let directory = Arc::new(DeviceDirectory::from_profiles(config.devices.clone()));
    let resolver = Arc::new(MappingResolver::new(store.clone(), directory.clone()));

    let registry = Arc::new(create_default_registry().map_err(FieldError::from)?);
    registry.seal();
    for descriptor in registry.descriptors() {
        info!(
            driver_type = %descriptor.driver_type,
            name = %descriptor.name,
            "driver registered"
        );
    }

    let (event_tx, mut event_rx) = mpsc::channel(config.limits.event_queue_capacity);
    let manager = Arc::new(SessionManager::new(
        registry,
        resolver,
        directory,
        config.limits.clone(),
        config.reconnect.clone(),
        event_tx,
    ));

    // Sink boundary: standalone, decoded data points are logged; an
    // embedding application would hand the receiver to its pipeline instead.
    let sink = tokio::spawn(async move {
        while let Some(point) = event_rx.recv().await {
            info!(
                device = %point.device_id,
                identifier = %point.identifier,
                value = %point.value,
                address = point.register_address,
                "data point"
            );
        }
    });

    let started = manager.start_all().await;
    info!(started, "acquisition service running");

    tokio::signal::ctrl_c().await.map_err(FieldError::Io)?;
    info!("shutdown signal received");

    manager.shutdown_all().await;
    drop(manager); // releases the event sender so the sink drains and exits
    let _ = sink.await;

    info!("acquisition service stopped");
    Ok(())
}
