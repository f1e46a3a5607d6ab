//! Pure decision combiner
//!
//! Folds the set of strategy verdicts for one correlation id into a single
//! recommendation. Regression is informational (it carries the prediction and
//! chart data) and does not vote; `ERROR` results count toward the expected
//! message quota but toward neither side of the vote.

use crate::envelope::{Decision, OverallDecision, StrategyResult};

/// Combine strategy verdicts into one overall decision.
///
/// `BUY_OVERALL` iff buy votes strictly exceed no-buy votes. Deterministic
/// and order-independent: only counts matter.
pub fn combine_votes(results: &[StrategyResult]) -> OverallDecision {
    let mut buys = 0usize;
    let mut no_buys = 0usize;

    for result in results.iter().filter(|r| r.strategy.votes()) {
        match result.decision {
            Decision::Buy => buys += 1,
            Decision::NoBuy => no_buys += 1,
            Decision::Error => {}
        }
    }

    if buys > no_buys {
        OverallDecision::BuyOverall
    } else {
        OverallDecision::NoBuyOverall
    }
}
