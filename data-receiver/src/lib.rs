pub mod allow_list;
pub mod api;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod metrics_defs;
pub mod registry;
pub mod service;
pub mod upsert;

#[cfg(test)]
mod testutils;

use errors::DataReceiverError;
use registry::EntityRegistry;
use row_store::RowStore;
use service::DataReceiverService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use upsert::UpsertEngine;

pub async fn run(config: config::Config) -> Result<(), DataReceiverError> {
    config.validate()?;
    let registry = Arc::new(EntityRegistry::from_config(&config)?);

    let ready = Arc::new(AtomicBool::new(false));
    let ready_probe = ready.clone();
    let admin_service =
        AdminService::<_, DataReceiverError>::new(move || ready_probe.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    let receiver_task = async {
        let store = row_store::open(&config.store, registry.descriptors().to_vec()).await?;
        for descriptor in registry.descriptors() {
            let rows = store.count(descriptor.name()).await?;
            tracing::info!(entity = descriptor.name(), rows, "Table ready");
        }

        let engine = UpsertEngine::new(registry.clone(), Arc::new(store));
        let service = DataReceiverService::new(&config, engine)?;
        ready.store(true, Ordering::Relaxed);

        run_http_service(&config.listener.host, config.listener.port, service).await?;
        Ok::<_, DataReceiverError>(())
    };

    tokio::try_join!(admin_task, receiver_task)?;
    Ok(())
}
