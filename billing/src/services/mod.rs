pub mod ledger;
pub mod payments;
pub mod promo_codes;
pub mod referrals;
pub mod retry;
pub mod subscriptions;
pub mod users;

pub use ledger::LedgerService;
pub use payments::{PaymentRequest, PaymentService};
pub use promo_codes::{PromoCodeDraft, PromoCodeService, Redemption, RedemptionEffect};
pub use referrals::ReferralService;
pub use subscriptions::{PurchaseRequest, SubscriptionService, TrialParams};
pub use users::UserService;

use std::sync::Arc;

use vpnshop_config::AppConfig;
use vpnshop_database::LedgerStore;

use crate::provisioning::ProvisioningGateway;

/// Every engine wired to the same store, gateway and configuration.
#[derive(Clone)]
pub struct Services {
    pub users: UserService,
    pub ledger: LedgerService,
    pub subscriptions: SubscriptionService,
    pub promo_codes: PromoCodeService,
    pub referrals: ReferralService,
    pub payments: PaymentService,
}

impl Services {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: ProvisioningGateway, config: Arc<AppConfig>) -> Self {
        Self {
            users: UserService::new(store.clone(), config.clone()),
            ledger: LedgerService::new(store.clone(), config.maintenance.max_conflict_retries),
            subscriptions: SubscriptionService::new(store.clone(), gateway.clone(), config.clone()),
            promo_codes: PromoCodeService::new(store.clone(), gateway, config.clone()),
            referrals: ReferralService::new(store.clone(), config.clone()),
            payments: PaymentService::new(store, config),
        }
    }
}
