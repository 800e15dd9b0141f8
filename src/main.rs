use std::sync::Arc;
use std::time::Duration;

use rocket::{launch, Build, Rocket};
use serde::Deserialize;
use tollbooth_core::{
    btcpay::BtcPayClient,
    cache::LedgerCache,
    config::Config as CoreConfig,
    store::{InMemoryStore, Store},
    verifier::DashMapTokenStore,
};

fn default_cache_capacity() -> usize {
    10_000
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_flush_retries() -> u32 {
    2
}

fn default_flush_retry_delay_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize)]
struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    capacity: usize,
    #[serde(default = "default_flush_interval_secs")]
    flush_interval_secs: u64,
    #[serde(default = "default_flush_retries")]
    flush_retries: u32,
    #[serde(default = "default_flush_retry_delay_ms")]
    flush_retry_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
            flush_retries: default_flush_retries(),
            flush_retry_delay_ms: default_flush_retry_delay_ms(),
        }
    }
}

fn default_rate_limit() -> usize {
    60
}

fn default_rate_limit_span_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    limit: usize,
    #[serde(default = "default_rate_limit_span_secs")]
    span_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            span_secs: default_rate_limit_span_secs(),
        }
    }
}

impl RateLimitConfig {
    fn into_rate_limit(self) -> api::RateLimit {
        api::RateLimit::new(self.limit, Duration::from_secs(self.span_secs))
    }
}

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(flatten)]
    core: CoreConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    rate_limit: RateLimitConfig,
}

#[launch]
async fn rocket() -> _ {
    start_server().await
}

async fn start_server() -> Rocket<Build> {
    env_logger::init();

    let rocket = Rocket::build();
    let config: Config = rocket.figment().extract().unwrap();

    let store: Arc<Store> = Arc::new(InMemoryStore::new());
    let cache = Arc::new(LedgerCache::new(
        store,
        config.cache.capacity,
        Duration::from_secs(config.cache.flush_interval_secs),
        config.cache.flush_retries,
        Duration::from_millis(config.cache.flush_retry_delay_ms),
    ));
    let _flush_handle = cache.start_background_flush();

    let btcpay = Arc::new(BtcPayClient::new(
        &config.core.btcpay_host,
        config.core.btcpay_store_id.clone(),
        config.core.btcpay_api_key.clone(),
    ));
    let token_store = Arc::new(DashMapTokenStore::new());

    api::register(
        rocket,
        cache,
        btcpay,
        token_store,
        config.core,
        config.rate_limit.into_rate_limit(),
    )
}
