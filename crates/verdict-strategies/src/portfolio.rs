//! Portfolio-level vote folding shared by the portfolio worker variants

use serde_json::json;
use verdict_core::Decision;

/// Fold per-instrument decisions into one portfolio verdict.
///
/// BUY iff at least half of the instruments individually resolve BUY.
/// `ERROR` entries stay in the denominator: a portfolio where most
/// instruments could not be evaluated is not a buy signal.
pub fn fold_decisions(decisions: &[Decision]) -> Decision {
    if decisions.is_empty() {
        return Decision::NoBuy;
    }
    let buys = decisions.iter().filter(|d| **d == Decision::Buy).count();
    if buys * 2 >= decisions.len() {
        Decision::Buy
    } else {
        Decision::NoBuy
    }
}

/// One per-instrument line for a portfolio result payload.
pub fn detail(symbol: &str, decision: Decision, reason: &str) -> serde_json::Value {
    json!({
        "symbol": symbol,
        "decision": decision,
        "reason": reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_half_is_buy() {
        let decisions = [Decision::Buy, Decision::NoBuy];
        assert_eq!(fold_decisions(&decisions), Decision::Buy);
    }

    #[test]
    fn test_minority_buy_is_no_buy() {
        let decisions = [Decision::Buy, Decision::NoBuy, Decision::NoBuy];
        assert_eq!(fold_decisions(&decisions), Decision::NoBuy);
    }

    #[test]
    fn test_errors_dilute_the_vote() {
        let decisions = [Decision::Buy, Decision::Error, Decision::Error];
        assert_eq!(fold_decisions(&decisions), Decision::NoBuy);
    }

    #[test]
    fn test_empty_portfolio_is_no_buy() {
        assert_eq!(fold_decisions(&[]), Decision::NoBuy);
    }
}
