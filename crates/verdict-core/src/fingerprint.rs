//! Deterministic cache fingerprints
//!
//! A fingerprint is the memoization key for a fully-aggregated result: two
//! requests with the same normalized identifying parameters must map to the
//! same key, so the second one can be served from cache without a dispatch.

use chrono::NaiveDate;

/// Fingerprint for a single-ticker analysis request.
pub fn single(symbol: &str, quantity: u32, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "single:{}:{quantity}:{start}:{end}",
        normalize_symbol(symbol)
    )
}

/// Fingerprint for a portfolio-wide request.
///
/// Symbol order in the request must not matter, so the normalized list is
/// sorted before joining.
pub fn portfolio(user: &str, symbols: &[String]) -> String {
    let mut normalized: Vec<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();
    normalized.sort();
    normalized.dedup();
    format!("portfolio:{}:{}", user.trim(), normalized.join(","))
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_single_normalizes_symbol() {
        let a = single(" aapl ", 10, day(1), day(31));
        let b = single("AAPL", 10, day(1), day(31));
        assert_eq!(a, b);
        assert_eq!(a, "single:AAPL:10:2024-01-01:2024-01-31");
    }

    #[test]
    fn test_single_distinguishes_parameters() {
        let base = single("AAPL", 10, day(1), day(31));
        assert_ne!(base, single("AAPL", 11, day(1), day(31)));
        assert_ne!(base, single("AAPL", 10, day(2), day(31)));
        assert_ne!(base, single("MSFT", 10, day(1), day(31)));
    }

    #[test]
    fn test_portfolio_is_order_insensitive() {
        let a = portfolio("user-1", &["msft".to_string(), "AAPL".to_string()]);
        let b = portfolio("user-1", &["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a, "portfolio:user-1:AAPL,MSFT");
    }

    #[test]
    fn test_portfolio_is_user_scoped() {
        let symbols = vec!["AAPL".to_string()];
        assert_ne!(portfolio("alice", &symbols), portfolio("bob", &symbols));
    }
}
