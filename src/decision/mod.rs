//! Score fusion and action mapping.
//!
//! Combines the quantitative score, the qualitative adjustment and the fuse
//! level into a bounded final score and a discrete decision. The risk policy
//! cannot be outvoted: at fuse level 2 or above the qualitative adjustment is
//! overridden outright.

use serde::Serialize;

use crate::advisory::AdvisoryOutcome;
use crate::risk::{FuseLevel, RiskAssessment};

/// Adjustment forced in when the circuit breaker vetoes the advisory.
const VETO_ADJUSTMENT: i64 = -50;
/// Final score at or above which a buy is considered.
const BUY_SCORE: f64 = 70.0;
/// Final score at or below which the position is liquidated.
const SELL_SCORE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }
}

/// Final per-instrument decision for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub action: Action,
    /// Quote-currency amount to deploy; positive only for buys
    pub amount: u64,
    /// Fused score, clamped to 0-100
    pub final_score: f64,
}

/// Stateless fuser parameterized on the configured base investment amount.
#[derive(Debug, Clone, Copy)]
pub struct DecisionFuser {
    base_invest_amount: f64,
}

impl DecisionFuser {
    pub fn new(base_invest_amount: f64) -> Self {
        Self { base_invest_amount }
    }

    pub fn fuse(
        &self,
        quant_score: f64,
        advisory: &AdvisoryOutcome,
        risk: &RiskAssessment,
    ) -> Decision {
        let mut adjustment = advisory.adjustment();
        if risk.fuse_level >= FuseLevel::Restricted {
            log::warn!(
                "fuse level {} active, overriding advisory adjustment {} -> {}",
                risk.fuse_level.as_u8(),
                adjustment,
                VETO_ADJUSTMENT
            );
            adjustment = VETO_ADJUSTMENT;
        }

        let final_score = (quant_score + adjustment as f64).clamp(0.0, 100.0);

        let (action, amount) = if final_score >= BUY_SCORE && risk.fuse_level < FuseLevel::Restricted
        {
            let amount = (self.base_invest_amount * risk.max_position_ratio).floor() as u64;
            (Action::Buy, amount)
        } else if final_score <= SELL_SCORE || risk.fuse_level == FuseLevel::Liquidate {
            (Action::Sell, 0)
        } else {
            (Action::Hold, 0)
        };

        Decision {
            action,
            amount,
            final_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::AdvisoryReview;
    use assert_matches::assert_matches;

    fn risk_at(level: FuseLevel) -> RiskAssessment {
        RiskAssessment {
            fuse_level: level,
            max_position_ratio: level.max_position_ratio(),
            risk_msg: String::new(),
        }
    }

    fn adjusted(adjustment: i64) -> AdvisoryOutcome {
        AdvisoryOutcome::Ok(AdvisoryReview {
            adjustment,
            ..AdvisoryReview::default()
        })
    }

    #[test]
    fn veto_caps_score_regardless_of_inputs() {
        let fuser = DecisionFuser::new(1000.0);
        for level in [FuseLevel::Restricted, FuseLevel::Liquidate] {
            for quant in [0.0, 40.0, 80.0, 100.0] {
                for adj in [-30, 0, 30] {
                    let d = fuser.fuse(quant, &adjusted(adj), &risk_at(level));
                    assert!(d.final_score <= 50.0, "quant={quant} adj={adj}");
                    assert_ne!(d.action, Action::Buy);
                }
            }
        }
    }

    #[test]
    fn branches_are_exclusive_and_exhaustive() {
        let fuser = DecisionFuser::new(1000.0);
        for level in [
            FuseLevel::Normal,
            FuseLevel::Caution,
            FuseLevel::Restricted,
            FuseLevel::Liquidate,
        ] {
            for quant in (0..=100).step_by(5) {
                let d = fuser.fuse(quant as f64, &adjusted(0), &risk_at(level));
                let buy = d.final_score >= 70.0 && level < FuseLevel::Restricted;
                let sell = d.final_score <= 30.0 || level == FuseLevel::Liquidate;
                let expected = if buy {
                    Action::Buy
                } else if sell {
                    Action::Sell
                } else {
                    Action::Hold
                };
                assert_eq!(d.action, expected, "quant={quant} level={level:?}");
                if d.action != Action::Buy {
                    assert_eq!(d.amount, 0);
                }
            }
        }
    }

    #[test]
    fn forced_liquidation_sells_despite_bullish_inputs() {
        // deep single-day drop: level 3, ratio 0.0
        let d = DecisionFuser::new(1000.0).fuse(95.0, &adjusted(30), &risk_at(FuseLevel::Liquidate));
        assert_matches!(d.action, Action::Sell);
        assert_eq!(d.amount, 0);
        assert!(d.final_score <= 50.0);
    }

    #[test]
    fn clean_buy_uses_full_base_amount() {
        let d = DecisionFuser::new(1000.0).fuse(80.0, &adjusted(10), &risk_at(FuseLevel::Normal));
        assert_matches!(d.action, Action::Buy);
        assert_eq!(d.amount, 1000);
        assert!((d.final_score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn caution_level_halves_the_buy() {
        let d = DecisionFuser::new(1000.0).fuse(75.0, &adjusted(0), &risk_at(FuseLevel::Caution));
        assert_matches!(d.action, Action::Buy);
        assert_eq!(d.amount, 500);
        assert!((d.final_score - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unavailable_advisory_contributes_zero() {
        let outcome = AdvisoryOutcome::unavailable("timeout");
        let d = DecisionFuser::new(1000.0).fuse(72.0, &outcome, &risk_at(FuseLevel::Normal));
        assert!((d.final_score - 72.0).abs() < f64::EPSILON);
        assert_matches!(d.action, Action::Buy);
    }

    #[test]
    fn score_is_clamped_at_both_ends() {
        let fuser = DecisionFuser::new(1000.0);
        let hi = fuser.fuse(95.0, &adjusted(30), &risk_at(FuseLevel::Normal));
        assert!((hi.final_score - 100.0).abs() < f64::EPSILON);
        let lo = fuser.fuse(10.0, &adjusted(-30), &risk_at(FuseLevel::Normal));
        assert!(lo.final_score.abs() < f64::EPSILON);
        assert_matches!(lo.action, Action::Sell);
    }

    #[test]
    fn fractional_amounts_floor() {
        let d = DecisionFuser::new(999.0).fuse(75.0, &adjusted(0), &risk_at(FuseLevel::Caution));
        assert_eq!(d.amount, 499); // floor(999 * 0.5)
    }
}
