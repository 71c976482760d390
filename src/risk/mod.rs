//! Layered circuit-breaker risk policy.
//!
//! A pure, total function from (instrument, snapshot, market volatility) to a
//! [`RiskAssessment`]. The policy is an explicit ordered rule list - most
//! severe first, first match wins - so each threshold stays independently
//! configurable and testable.

use serde::Serialize;

use crate::config::RiskControlConfig;
use crate::indicators::IndicatorSnapshot;

/// Volume ratio below which a decline counts as "low-volume grinding".
const LOW_VOLUME_RATIO: f64 = 0.7;

/// Market volatility below which the regime is flagged as low-opportunity.
const LOW_VOLATILITY: f64 = 0.005;

/// Circuit-breaker severity. Higher = more restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum FuseLevel {
    Normal,
    Caution,
    Restricted,
    Liquidate,
}

impl FuseLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            FuseLevel::Normal => 0,
            FuseLevel::Caution => 1,
            FuseLevel::Restricted => 2,
            FuseLevel::Liquidate => 3,
        }
    }

    /// Fixed, total mapping from severity to the position-size cap.
    pub fn max_position_ratio(self) -> f64 {
        match self {
            FuseLevel::Normal => 1.0,
            FuseLevel::Caution => 0.5,
            FuseLevel::Restricted => 0.2,
            FuseLevel::Liquidate => 0.0,
        }
    }
}

/// Outcome of the risk policy for one instrument and cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub fuse_level: FuseLevel,
    pub max_position_ratio: f64,
    pub risk_msg: String,
}

impl RiskAssessment {
    fn at(level: FuseLevel, risk_msg: String) -> Self {
        Self {
            fuse_level: level,
            max_position_ratio: level.max_position_ratio(),
            risk_msg,
        }
    }
}

/// Deterministic threshold checker, constructed once from validated config.
#[derive(Debug, Clone, Copy)]
pub struct RiskController {
    thresholds: RiskControlConfig,
}

impl RiskController {
    pub fn new(thresholds: RiskControlConfig) -> Self {
        Self { thresholds }
    }

    /// Evaluate the ordered rule ladder for one instrument.
    pub fn analyze(
        &self,
        name: &str,
        snapshot: &IndicatorSnapshot,
        volatility: f64,
    ) -> RiskAssessment {
        let pct_change = snapshot.pct_change;
        let volume_ratio = snapshot.volume_ratio;
        let t = &self.thresholds;

        // (predicate, outcome) pairs, most severe first. First match wins.
        let rules = [
            (
                pct_change <= t.fuse_level_3_drop,
                FuseLevel::Liquidate,
                format!(
                    "level-3 fuse tripped ({:.2}% drop): forced liquidation",
                    pct_change * 100.0
                ),
            ),
            (
                pct_change <= t.fuse_level_2_drop,
                FuseLevel::Restricted,
                format!(
                    "level-2 fuse tripped ({:.2}% drop): no heavy positions",
                    pct_change * 100.0
                ),
            ),
            (
                pct_change < t.fuse_level_1_drop && volume_ratio < LOW_VOLUME_RATIO,
                FuseLevel::Caution,
                format!(
                    "level-1 fuse tripped (low-volume grinding decline, VR {:.2}): proceed with caution",
                    volume_ratio
                ),
            ),
        ];

        for (matched, level, msg) in rules {
            if matched {
                match level {
                    FuseLevel::Liquidate => log::error!("[{name}] {msg}"),
                    _ => log::warn!("[{name}] {msg}"),
                }
                return RiskAssessment::at(level, msg);
            }
        }

        let mut msg = "risk checks normal".to_string();
        if volatility < LOW_VOLATILITY {
            // advisory only, never blocks
            msg.push_str("; market volatility is very low, a low-opportunity regime");
        }
        RiskAssessment::at(FuseLevel::Normal, msg)
    }
}
