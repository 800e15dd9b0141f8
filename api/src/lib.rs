//! This library contains definitions for the API layer.

use std::sync::Arc;

use rocket::{Build, Rocket};
use tollbooth_core::{
    btcpay::BtcPayClient, cache::LedgerCache, config::Config, store::Store,
    verifier::DashMapTokenStore,
};

mod access;
mod error;
mod rate_limit;
mod routes;
mod state;

pub use rate_limit::RateLimit;
pub use state::RocketState;

pub fn register(
    rocket: Rocket<Build>,
    cache: Arc<LedgerCache<Store>>,
    btcpay: Arc<BtcPayClient>,
    token_store: Arc<DashMapTokenStore>,
    config: Config,
    rate_limit: RateLimit,
) -> Rocket<Build> {
    routes::register(
        rocket,
        RocketState {
            cache,
            btcpay,
            token_store,
            config,
            rate_limit,
        },
    )
}
