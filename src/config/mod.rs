//! Configuration module for the advisory engine.
//!
//! Configuration is a single YAML file. Loading performs the startup
//! validation pass; a misordered fuse ladder or a non-positive investment
//! amount is rejected here and nowhere else.

use crate::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global engine settings
    pub global: GlobalConfig,

    /// Instruments to analyze each cycle
    pub funds: Vec<FundConfig>,

    /// Optional report delivery settings
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
}

/// Global engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Base investment amount per buy decision, in quote currency units
    pub base_invest_amount: f64,

    /// Worker pool size. Sized for upstream rate limits, not CPU parallelism.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Path of the persisted signal/position ledger
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    /// Circuit-breaker thresholds
    #[serde(default)]
    pub risk_control: RiskControlConfig,
}

/// Circuit-breaker thresholds, expressed as fractional day-over-day drops.
/// More negative = more severe; the ladder must satisfy
/// `fuse_level_3_drop < fuse_level_2_drop < fuse_level_1_drop < 0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskControlConfig {
    #[serde(default = "default_fuse_1")]
    pub fuse_level_1_drop: f64,
    #[serde(default = "default_fuse_2")]
    pub fuse_level_2_drop: f64,
    #[serde(default = "default_fuse_3")]
    pub fuse_level_3_drop: f64,
}

/// A single tracked instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundConfig {
    /// Exchange code, e.g. "512880"
    pub code: String,
    /// Human readable name
    pub name: String,
    /// Keyword used when pulling sector headlines; falls back to `name`
    #[serde(default)]
    pub sector_keyword: Option<String>,
}

impl FundConfig {
    /// Keyword for sector headline retrieval.
    pub fn keyword(&self) -> &str {
        self.sector_keyword.as_deref().unwrap_or(&self.name)
    }
}

/// Report delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook endpoint that receives the rendered HTML digest
    pub webhook_url: String,
}

fn default_max_workers() -> usize {
    2
}

fn default_ledger_path() -> String {
    "portfolio.json".to_string()
}

fn default_fuse_1() -> f64 {
    -0.015
}

fn default_fuse_2() -> f64 {
    -0.04
}

fn default_fuse_3() -> f64 {
    -0.06
}

impl Default for RiskControlConfig {
    fn default() -> Self {
        Self {
            fuse_level_1_drop: default_fuse_1(),
            fuse_level_2_drop: default_fuse_2(),
            fuse_level_3_drop: default_fuse_3(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig {
                base_invest_amount: 1000.0,
                max_workers: default_max_workers(),
                ledger_path: default_ledger_path(),
                risk_control: RiskControlConfig::default(),
            },
            funds: vec![FundConfig {
                code: "510300".to_string(),
                name: "CSI 300 ETF".to_string(),
                sector_keyword: None,
            }],
            notify: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file (YAML).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Violations are configuration errors, never
    /// runtime ones.
    pub fn validate(&self) -> Result<()> {
        if self.global.base_invest_amount <= 0.0 {
            return Err(Error::ConfigError(format!(
                "base_invest_amount must be positive, got {}",
                self.global.base_invest_amount
            )));
        }
        if self.global.max_workers == 0 {
            return Err(Error::ConfigError(
                "max_workers must be at least 1".to_string(),
            ));
        }
        let rc = &self.global.risk_control;
        let ordered = rc.fuse_level_3_drop < rc.fuse_level_2_drop
            && rc.fuse_level_2_drop < rc.fuse_level_1_drop
            && rc.fuse_level_1_drop < 0.0;
        if !ordered {
            return Err(Error::ConfigError(format!(
                "fuse thresholds must satisfy level3 < level2 < level1 < 0, got {} / {} / {}",
                rc.fuse_level_3_drop, rc.fuse_level_2_drop, rc.fuse_level_1_drop
            )));
        }
        if self.funds.is_empty() {
            return Err(Error::ConfigError("no funds configured".to_string()));
        }
        Ok(())
    }

    /// Default configuration rendered as YAML, used by `ironquant init`.
    pub fn default_yaml() -> String {
        serde_yaml::to_string(&Config::default()).expect("default config serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_misordered_fuse_ladder() {
        let mut config = Config::default();
        config.global.risk_control.fuse_level_2_drop = -0.08; // below level 3
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fuse thresholds"));
    }

    #[test]
    fn rejects_non_positive_invest_amount() {
        let mut config = Config::default();
        config.global.base_invest_amount = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip() {
        let config: Config = serde_yaml::from_str(&Config::default_yaml()).unwrap();
        assert_eq!(config.funds.len(), 1);
        assert_eq!(config.global.max_workers, 2);
    }

    #[test]
    fn parses_minimal_yaml() {
        let raw = r#"
global:
  base_invest_amount: 500
funds:
  - code: "512880"
    name: "Securities ETF"
    sector_keyword: "brokerage"
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.global.ledger_path, "portfolio.json");
        assert_eq!(config.funds[0].keyword(), "brokerage");
        assert!(
            (config.global.risk_control.fuse_level_3_drop + 0.06).abs() < f64::EPSILON
        );
    }
}
