use sha2::{Digest, Sha256};

use crate::{Direction, Tier, TradeLevels};

/// Length of the hex fingerprint kept on signals and trades.
pub const HASH_LEN: usize = 16;

/// Stable fingerprint of a setup: symbol, direction, tier and the levels
/// rounded to `price_step`, so that a re-scored setup a few ticks away still
/// collides with the one already seen.
pub fn setup_hash(
    symbol: &str,
    direction: Direction,
    tier: Tier,
    levels: Option<&TradeLevels>,
    price_step: f64,
) -> String {
    let rounded = |v: f64| round_to_step(v, price_step);
    let prices = match levels {
        Some(l) => format!(
            "{}|{}|{}|{}",
            rounded(l.entry),
            rounded(l.stop_loss),
            rounded(l.take_profit_1),
            rounded(l.take_profit_2)
        ),
        None => "-|-|-|-".to_string(),
    };
    let key = format!("{symbol}|{direction}|{tier}|{prices}");
    digest(&key)
}

/// Fingerprint for an exit notice of a given trade reaching a given status.
pub fn exit_hash(trade_id: &str, status: &str) -> String {
    digest(&format!("exit|{trade_id}|{status}"))
}

fn digest(key: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(key.as_bytes()));
    hex.truncate(HASH_LEN);
    hex
}

fn round_to_step(value: f64, step: f64) -> String {
    if !value.is_finite() {
        return "nan".to_string();
    }
    if step > 0.0 && step.is_finite() {
        let snapped = (value / step).round() * step;
        format!("{snapped:.4}")
    } else {
        format!("{value:.4}")
    }
}
