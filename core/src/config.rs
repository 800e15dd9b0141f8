//! Deployment configuration. Read once at startup by the root binary via
//! Rocket's figment, the same way the teacher's `src/main.rs` assembles its
//! own config — this core does not own a generic config-loading framework,
//! it just declares the shape of what it needs.

use serde::Deserialize;

fn default_tier_config() -> String {
    "{}".to_owned()
}

fn default_user_tiers() -> String {
    "{}".to_owned()
}

fn default_royalty_percent() -> f64 {
    0.02
}

fn default_royalty_min_sats() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub btcpay_host: String,
    pub btcpay_store_id: String,
    pub btcpay_api_key: String,
    #[serde(default = "default_tier_config")]
    pub btcpay_tier_config: String,
    #[serde(default = "default_user_tiers")]
    pub btcpay_user_tiers: String,
    #[serde(default)]
    pub seed_balance_sats: Option<i64>,
    #[serde(default)]
    pub tollbooth_royalty_address: Option<String>,
    #[serde(default = "default_royalty_percent")]
    pub tollbooth_royalty_percent: f64,
    #[serde(default = "default_royalty_min_sats")]
    pub tollbooth_royalty_min_sats: i64,
    #[serde(default)]
    pub authority_public_key: Option<String>,
    #[serde(default)]
    pub authority_url: Option<String>,
}
