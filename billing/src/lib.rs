//! Ledger and subscription lifecycle of the VPN storefront.
//!
//! The engines live in [`services`]; [`handlers`] exposes them over HTTP to the
//! bot front-end and payment webhooks, and [`worker`] runs the periodic
//! maintenance sweep.

pub mod errors;
pub mod handlers;
pub mod provisioning;
pub mod services;
pub mod worker;

use std::sync::Arc;

use vpnshop_config::AppConfig;
use vpnshop_database::LedgerStore;

pub use errors::ServiceError;
pub use services::Services;

pub const SERVICE_NAME: &str = "vpnshop-billing";

/// Shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub gateway: provisioning::ProvisioningGateway,
    pub store: Arc<dyn LedgerStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: provisioning::ProvisioningGateway, config: Arc<AppConfig>) -> Self {
        Self {
            services: Services::new(store.clone(), gateway.clone(), config.clone()),
            gateway,
            store,
            config,
        }
    }
}
