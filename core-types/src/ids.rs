// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Deterministic identifiers for sweep clusters.

use blake3::Hasher;

/// Prints landing in the same 100 ms bucket on one contract share an id.
pub const SWEEP_BUCKET_MS: i64 = 100;

/// Mint the sweep id for a contract at a point in time. Pure function of
/// (symbol, time bucket) so concurrent sessions mint identical ids for the
/// same burst.
pub fn sweep_id(symbol: &str, processed_at_ms: i64) -> String {
    let bucket = processed_at_ms.div_euclid(SWEEP_BUCKET_MS);
    let mut hasher = Hasher::new();
    hasher.update(&(symbol.len() as u32).to_le_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update(&bucket.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bucket_same_id() {
        let a = sweep_id("O:AMD251219C00155000", 1_700_000_000_020);
        let b = sweep_id("O:AMD251219C00155000", 1_700_000_000_099);
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_buckets_differ() {
        let a = sweep_id("O:AMD251219C00155000", 1_700_000_000_099);
        let b = sweep_id("O:AMD251219C00155000", 1_700_000_000_100);
        assert_ne!(a, b);
    }

    #[test]
    fn symbols_do_not_collide() {
        let a = sweep_id("O:AMD251219C00155000", 1_700_000_000_000);
        let b = sweep_id("O:NVDA251219C00155000", 1_700_000_000_000);
        assert_ne!(a, b);
    }
}
