use std::sync::Arc;

use tollbooth_core::{
    btcpay::BtcPayClient, cache::LedgerCache, config::Config, store::Store,
    verifier::DashMapTokenStore,
};

use crate::rate_limit::RateLimit;

pub struct RocketState {
    pub cache: Arc<LedgerCache<Store>>,
    pub btcpay: Arc<BtcPayClient>,
    pub token_store: Arc<DashMapTokenStore>,
    pub config: Config,
    pub rate_limit: RateLimit,
}
