//! Per-cycle orchestration.
//!
//! Instruments are processed independently on a small worker pool whose size
//! reflects upstream rate limits, not CPU parallelism. The indicator pipeline
//! and risk controller are pure; the ledger serializes its own mutations. A
//! failed instrument yields no report and never aborts its siblings.

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::advisory::{Advisor, AdvisoryClient, AdvisoryOutcome};
use crate::config::{Config, FundConfig};
use crate::decision::{Decision, DecisionFuser};
use crate::indicators::{self, IndicatorSnapshot};
use crate::ledger::{Ledger, Position, SignalEntry};
use crate::market_data::{DataFetcher, MarketDataSource};
use crate::risk::{RiskAssessment, RiskController};
use crate::utils::time::exchange_now;

/// Keyword used when pulling market-wide headlines.
const MACRO_KEYWORD: &str = "macro";

/// Everything downstream rendering/notification consumers need for one
/// instrument and cycle.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentReport {
    pub code: String,
    pub name: String,
    pub snapshot: IndicatorSnapshot,
    pub risk: RiskAssessment,
    pub advisory: AdvisoryOutcome,
    pub decision: Decision,
    pub position: Position,
    pub signal_history: Vec<SignalEntry>,
}

/// Output of one full cycle. Failed instruments are simply absent.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub volatility: f64,
    pub reports: Vec<InstrumentReport>,
}

pub struct AdvisorEngine {
    config: Config,
    market: Arc<dyn MarketDataSource>,
    advisor: Option<Arc<dyn Advisor>>,
    risk: RiskController,
    fuser: DecisionFuser,
    ledger: Arc<Ledger>,
}

impl AdvisorEngine {
    /// Build the production engine: HTTP data fetcher, env-configured
    /// advisory, ledger at the configured path.
    pub fn new(config: Config) -> crate::Result<Self> {
        config.validate()?;
        let advisor = AdvisoryClient::from_env().map(|c| Arc::new(c) as Arc<dyn Advisor>);
        if advisor.is_none() {
            log::warn!("LLM_API_KEY not set; qualitative reviews disabled for this run");
        }
        let ledger = Arc::new(Ledger::open(&config.global.ledger_path));
        Ok(Self::with_parts(
            config,
            Arc::new(DataFetcher::new()),
            advisor,
            ledger,
        ))
    }

    /// Dependency-injecting constructor for tests and embedders.
    pub fn with_parts(
        config: Config,
        market: Arc<dyn MarketDataSource>,
        advisor: Option<Arc<dyn Advisor>>,
        ledger: Arc<Ledger>,
    ) -> Self {
        let risk = RiskController::new(config.global.risk_control);
        let fuser = DecisionFuser::new(config.global.base_invest_amount);
        Self {
            config,
            market,
            advisor,
            risk,
            fuser,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Run one advisory cycle over every configured instrument.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let now = exchange_now();
        let today = now.date_naive();
        let local_now = now.naive_local();

        self.ledger.advance_day();

        let volatility = self.market.market_volatility().await;
        let macro_summary = match &self.advisor {
            Some(advisor) => advisor.headlines(MACRO_KEYWORD).await.join(" | "),
            None => String::new(),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.global.max_workers));
        let handles: Vec<_> = self
            .config
            .funds
            .iter()
            .cloned()
            .map(|fund| {
                let semaphore = Arc::clone(&semaphore);
                let market = Arc::clone(&self.market);
                let advisor = self.advisor.clone();
                let ledger = Arc::clone(&self.ledger);
                let risk = self.risk;
                let fuser = self.fuser;
                let macro_summary = macro_summary.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    process_fund(
                        fund,
                        market,
                        advisor,
                        ledger,
                        risk,
                        fuser,
                        volatility,
                        macro_summary,
                        local_now,
                        today,
                    )
                    .await
                })
            })
            .collect();

        let mut reports = Vec::new();
        for (result, fund) in join_all(handles).await.into_iter().zip(&self.config.funds) {
            match result {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => log::info!("{} skipped this cycle", fund.name),
                Err(e) => log::error!("worker for {} aborted: {e}", fund.name),
            }
        }
        CycleOutcome {
            volatility,
            reports,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_fund(
    fund: FundConfig,
    market: Arc<dyn MarketDataSource>,
    advisor: Option<Arc<dyn Advisor>>,
    ledger: Arc<Ledger>,
    risk: RiskController,
    fuser: DecisionFuser,
    volatility: f64,
    macro_summary: String,
    now: NaiveDateTime,
    today: NaiveDate,
) -> Option<InstrumentReport> {
    log::info!("analyzing {} ({})", fund.name, fund.code);

    let series = match market.fetch_history(&fund.code).await {
        Ok(series) => series,
        Err(e) => {
            log::warn!("no market data for {}: {e}", fund.name);
            return None;
        }
    };

    // empty snapshot means skip: no ledger mutation, no decision
    let snapshot = indicators::calculate(series, now)?;
    let assessment = risk.analyze(&fund.name, &snapshot, volatility);

    let advisory = match &advisor {
        Some(advisor) => {
            let sector_news = advisor.headlines(fund.keyword()).await;
            advisor
                .review(&fund.name, &snapshot, &assessment, &macro_summary, &sector_news)
                .await
        }
        None => AdvisoryOutcome::unavailable("advisory not configured"),
    };

    let decision = fuser.fuse(snapshot.quant_score, &advisory, &assessment);
    ledger.commit_decision(&fund.code, &decision, snapshot.close, today);

    log::info!(
        "{}: {} (score {:.0}, fuse level {}, amount {})",
        fund.name,
        decision.action.label(),
        decision.final_score,
        assessment.fuse_level.as_u8(),
        decision.amount
    );

    let position = ledger.get_position(&fund.code);
    let signal_history = ledger.get_signal_history(&fund.code);
    Some(InstrumentReport {
        code: fund.code,
        name: fund.name,
        snapshot,
        risk: assessment,
        advisory,
        decision,
        position,
        signal_history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::AdvisoryReview;
    use crate::config::{FundConfig, GlobalConfig, RiskControlConfig};
    use crate::decision::Action;
    use crate::market_data::{Candle, PriceSeries};
    use crate::utils::error::{Error, Result};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;

    struct StaticMarket {
        series: HashMap<String, PriceSeries>,
    }

    #[async_trait]
    impl MarketDataSource for StaticMarket {
        async fn fetch_history(&self, code: &str) -> Result<PriceSeries> {
            self.series
                .get(code)
                .cloned()
                .ok_or_else(|| Error::DataError(format!("no data for {code}")))
        }

        async fn market_volatility(&self) -> f64 {
            0.015
        }
    }

    struct StaticAdvisor {
        adjustment: i64,
    }

    #[async_trait]
    impl Advisor for StaticAdvisor {
        async fn headlines(&self, _keyword: &str) -> Vec<String> {
            vec!["headline".to_string()]
        }

        async fn review(
            &self,
            _fund_name: &str,
            _snapshot: &IndicatorSnapshot,
            _risk: &RiskAssessment,
            _macro_summary: &str,
            _sector_news: &[String],
        ) -> AdvisoryOutcome {
            AdvisoryOutcome::Ok(AdvisoryReview {
                adjustment: self.adjustment,
                ..AdvisoryReview::default()
            })
        }
    }

    fn rising_series(n: usize) -> PriceSeries {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        PriceSeries::from_bars(
            (0..n)
                .map(|i| {
                    let close = 1.0 * 1.01_f64.powi(i as i32);
                    Candle {
                        date: start + Duration::days(i as i64),
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: 100.0,
                    }
                })
                .collect(),
        )
    }

    fn config(funds: Vec<FundConfig>, ledger_path: &str) -> Config {
        Config {
            global: GlobalConfig {
                base_invest_amount: 1000.0,
                max_workers: 2,
                ledger_path: ledger_path.to_string(),
                risk_control: RiskControlConfig::default(),
            },
            funds,
            notify: None,
        }
    }

    fn fund(code: &str, name: &str) -> FundConfig {
        FundConfig {
            code: code.to_string(),
            name: name.to_string(),
            sector_keyword: None,
        }
    }

    #[tokio::test]
    async fn empty_series_skips_instrument_without_ledger_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.json");
        let engine = AdvisorEngine::with_parts(
            config(vec![fund("000001", "Empty")], ledger_path.to_str().unwrap()),
            Arc::new(StaticMarket {
                series: HashMap::from([("000001".to_string(), PriceSeries::default())]),
            }),
            None,
            Arc::new(Ledger::open(&ledger_path)),
        );
        let outcome = engine.run_cycle().await;
        assert!(outcome.reports.is_empty());
        assert!(engine.ledger().get_signal_history("000001").is_empty());
    }

    #[tokio::test]
    async fn one_failing_instrument_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.json");
        let engine = AdvisorEngine::with_parts(
            config(
                vec![fund("000001", "Broken"), fund("510300", "Healthy")],
                ledger_path.to_str().unwrap(),
            ),
            Arc::new(StaticMarket {
                series: HashMap::from([("510300".to_string(), rising_series(60))]),
            }),
            Some(Arc::new(StaticAdvisor { adjustment: 10 })),
            Arc::new(Ledger::open(&ledger_path)),
        );
        let outcome = engine.run_cycle().await;
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].code, "510300");
        assert!(outcome.reports[0].advisory.is_available());
    }

    #[tokio::test]
    async fn buy_decision_lands_in_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.json");
        let engine = AdvisorEngine::with_parts(
            config(vec![fund("510300", "Index")], ledger_path.to_str().unwrap()),
            Arc::new(StaticMarket {
                series: HashMap::from([("510300".to_string(), rising_series(60))]),
            }),
            Some(Arc::new(StaticAdvisor { adjustment: 30 })),
            Arc::new(Ledger::open(&ledger_path)),
        );
        let outcome = engine.run_cycle().await;
        assert_eq!(outcome.reports.len(), 1);
        let report = &outcome.reports[0];
        assert_eq!(report.decision.action, Action::Buy);
        assert_eq!(report.decision.amount, 1000);
        assert!(report.position.shares > 0.0);
        assert_eq!(report.signal_history.len(), 1);
    }

    #[tokio::test]
    async fn advisory_absence_is_marked_not_silent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.json");
        let engine = AdvisorEngine::with_parts(
            config(vec![fund("510300", "Index")], ledger_path.to_str().unwrap()),
            Arc::new(StaticMarket {
                series: HashMap::from([("510300".to_string(), rising_series(60))]),
            }),
            None,
            Arc::new(Ledger::open(&ledger_path)),
        );
        let outcome = engine.run_cycle().await;
        assert_eq!(outcome.reports.len(), 1);
        let report = &outcome.reports[0];
        assert!(!report.advisory.is_available());
        assert!(report.advisory.conclusion().contains("unavailable"));
    }
}
