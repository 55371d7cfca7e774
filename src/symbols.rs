//! Symbol normalization: venue-specific tickers → canonical `BASE-USD`.

/// Alias table for historically inconsistent bases. A hit returns the target
/// directly, before any suffix handling. Keys are matched case-insensitively.
const ALIASES: &[(&str, &str)] = &[
    ("XBT", "BTC-USD"),
    ("XBTUSD", "BTC-USD"),
    ("XBT-PERP", "BTC-USD"),
    ("WETH", "ETH-USD"),
    ("WETHUSD", "ETH-USD"),
    ("KPEPE", "PEPE-USD"),
    ("1000PEPE", "PEPE-USD"),
    ("KBONK", "BONK-USD"),
    ("1000BONK", "BONK-USD"),
];

/// Quote/contract suffixes, longest first. One pass: each suffix is stripped
/// at most once, in order, so `BTC-USD-PERP` → `BTC-USD` → `BTC`.
const SUFFIXES: &[&str] = &["-PERP", "_PERP", "PERP", "_USDC", "USDT", "-USD", "USD"];

/// Normalize a venue-specific ticker to canonical `BASE-USD`.
///
/// Idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();

    for (alias, target) in ALIASES {
        if trimmed.eq_ignore_ascii_case(alias) {
            return (*target).to_string();
        }
    }

    let mut base = trimmed.to_ascii_uppercase();
    for suffix in SUFFIXES {
        if base.len() > suffix.len() {
            if let Some(stripped) = base.strip_suffix(suffix) {
                base = stripped.to_string();
            }
        }
    }

    format!("{base}-USD")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_stripping() {
        assert_eq!(normalize("BTC"), "BTC-USD");
        assert_eq!(normalize("BTC-USD"), "BTC-USD");
        assert_eq!(normalize("BTCUSDT"), "BTC-USD");
        assert_eq!(normalize("BTC-USD-PERP"), "BTC-USD");
        assert_eq!(normalize("SOL-PERP"), "SOL-USD");
        assert_eq!(normalize("ETH_USDC"), "ETH-USD");
        assert_eq!(normalize("eth_perp"), "ETH-USD");
        assert_eq!(normalize("XRPUSD"), "XRP-USD");
    }

    #[test]
    fn test_aliases() {
        assert_eq!(normalize("XBT"), "BTC-USD");
        assert_eq!(normalize("xbtusd"), "BTC-USD");
        assert_eq!(normalize("kPEPE"), "PEPE-USD");
        assert_eq!(normalize("1000BONK"), "BONK-USD");
        assert_eq!(normalize("WETH"), "ETH-USD");
    }

    #[test]
    fn test_idempotence() {
        for raw in [
            "BTC", "BTCUSDT", "BTC-USD-PERP", "SOL-PERP", "ETH_USDC", "kPEPE", "XBT", "DOGEUSD",
            "1000PEPE", "HYPE",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_fixed_point() {
        assert_eq!(normalize("PEPE-USD"), "PEPE-USD");
        assert_eq!(normalize("BONK-USD"), "BONK-USD");
    }

    #[test]
    fn test_whitespace_and_case() {
        assert_eq!(normalize("  btcusdt "), "BTC-USD");
    }
}
