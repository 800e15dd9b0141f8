//! Tier resolution: two untyped JSON config strings map a user to a credit
//! multiplier. Malformed JSON in either never blocks a purchase — it falls
//! back to the default tier, with a warning.

use serde_json::Value;

use crate::ids::UserId;

pub const DEFAULT_TIER: &str = "default";
pub const DEFAULT_MULTIPLIER: i64 = 1;

/// Resolves `user_id`'s tier name and credit multiplier from the two
/// JSON-encoded config strings. Any parse failure, or a user/tier with no
/// entry, falls back to `("default", 1)`.
pub fn resolve_tier(user_id: &UserId, tier_config_json: &str, user_tiers_json: &str) -> (String, i64) {
    let tier_config: Value = match serde_json::from_str(tier_config_json) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("btcpay_tier_config is malformed JSON: {e}");
            return (DEFAULT_TIER.to_owned(), DEFAULT_MULTIPLIER);
        }
    };
    let user_tiers: Value = match serde_json::from_str(user_tiers_json) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("btcpay_user_tiers is malformed JSON: {e}");
            return (DEFAULT_TIER.to_owned(), DEFAULT_MULTIPLIER);
        }
    };

    let tier_name = user_tiers
        .get(user_id.as_str())
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TIER)
        .to_owned();

    let multiplier = tier_config
        .get(&tier_name)
        .or_else(|| tier_config.get(DEFAULT_TIER))
        .and_then(|t| t.get("credit_multiplier"))
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_MULTIPLIER);

    (tier_name, multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_tier() {
        let tier_config = r#"{"vip": {"credit_multiplier": 100}, "default": {"credit_multiplier": 1}}"#;
        let user_tiers = r#"{"u1": "vip"}"#;
        let (tier, mult) = resolve_tier(&UserId::from("u1"), tier_config, user_tiers);
        assert_eq!(tier, "vip");
        assert_eq!(mult, 100);
    }

    #[test]
    fn falls_back_to_default_for_unknown_user() {
        let tier_config = r#"{"default": {"credit_multiplier": 5}}"#;
        let (tier, mult) = resolve_tier(&UserId::from("unknown"), tier_config, "{}");
        assert_eq!(tier, "default");
        assert_eq!(mult, 5);
    }

    #[test]
    fn malformed_tier_config_falls_back() {
        let (tier, mult) = resolve_tier(&UserId::from("u1"), "not json", "{}");
        assert_eq!(tier, DEFAULT_TIER);
        assert_eq!(mult, DEFAULT_MULTIPLIER);
    }

    #[test]
    fn malformed_user_tiers_falls_back() {
        let (tier, mult) = resolve_tier(&UserId::from("u1"), "{}", "not json");
        assert_eq!(tier, DEFAULT_TIER);
        assert_eq!(mult, DEFAULT_MULTIPLIER);
    }
}
