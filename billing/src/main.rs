use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;
use vpnshop_billing::provisioning::{OfflineProvisioner, Provisioner, ProvisioningGateway, RemnawaveClient};
use vpnshop_billing::{handlers, worker, AppState, SERVICE_NAME};
use vpnshop_config::AppConfig;
use vpnshop_database::{Database, DatabaseConfig, LedgerStore, MemoryLedgerStore};
use vpnshop_observability::{init_tracing, TracingConfig};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(TracingConfig::for_service(SERVICE_NAME));

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(admins = config.admin.len(), "Configuration loaded");

    let store: Arc<dyn LedgerStore> = match config.database.url.clone() {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let database = Database::new(&DatabaseConfig::new(url, config.database.max_connections)).await?;
            database.migrate().await?;
            tracing::info!("Database connection established, migrations applied");
            Arc::new(database.ledger_store())
        }
        None => {
            tracing::warn!("DATABASE_URL not set - using the in-process store, state is lost on restart");
            Arc::new(MemoryLedgerStore::new())
        }
    };

    let provisioning = &config.provisioning;
    let provisioner: Arc<dyn Provisioner> = match provisioning.api_url.as_deref() {
        Some(url) => {
            tracing::info!(url = %url, "Provisioning through Remnawave");
            Arc::new(RemnawaveClient::new(
                url,
                provisioning.api_key.clone(),
                provisioning.secret_key.clone(),
                provisioning.timeout,
            )?)
        }
        None => {
            tracing::warn!("REMNAWAVE_API_URL not set - remote subscriptions are not provisioned");
            Arc::new(OfflineProvisioner::new())
        }
    };
    let gateway = ProvisioningGateway::new(provisioner, provisioning.timeout);

    let state = AppState::new(store, gateway, config.clone());

    tokio::spawn(worker::maintenance_task(
        state.services.clone(),
        config.maintenance.sweep_interval,
        config.maintenance.expiring_notice_days,
    ));

    let port = config.server.port;
    tracing::info!(port, "Starting {}", SERVICE_NAME);

    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}
