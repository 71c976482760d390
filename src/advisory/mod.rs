//! Qualitative advisory integration.
//!
//! An external investment-committee review (an LLM behind an OpenAI-compatible
//! chat endpoint) contributes a signed adjustment to the quantitative score
//! plus a short narrative. The raw reply is unstructured text; everything is
//! normalized at this boundary into [`AdvisoryOutcome`], and the decision
//! fuser only ever observes that tagged form. Failure of any kind degrades to
//! `Unavailable` - the advisory step must never block a decision.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::indicators::IndicatorSnapshot;
use crate::risk::RiskAssessment;

static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Parsed committee review.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdvisoryReview {
    /// Signed delta to the quant score, nominally -30..=30
    pub adjustment: i64,
    pub bull_view: String,
    pub bear_view: String,
    pub conclusion: String,
    pub risk_alert: String,
}

/// Normalized advisory result. The only shape downstream code sees.
#[derive(Debug, Clone, Serialize)]
pub enum AdvisoryOutcome {
    Ok(AdvisoryReview),
    Unavailable { reason: String },
}

impl AdvisoryOutcome {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        AdvisoryOutcome::Unavailable {
            reason: reason.into(),
        }
    }

    /// Effective adjustment: zero when the advisory was unavailable.
    pub fn adjustment(&self) -> i64 {
        match self {
            AdvisoryOutcome::Ok(review) => review.adjustment,
            AdvisoryOutcome::Unavailable { .. } => 0,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AdvisoryOutcome::Ok(_))
    }

    /// Narrative for reports; an explicit placeholder when unavailable.
    pub fn conclusion(&self) -> String {
        match self {
            AdvisoryOutcome::Ok(review) => review.conclusion.clone(),
            AdvisoryOutcome::Unavailable { reason } => {
                format!("advisory unavailable ({reason})")
            }
        }
    }
}

/// Seam between the engine and the advisory backend.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Best-effort headline retrieval; empty on failure.
    async fn headlines(&self, keyword: &str) -> Vec<String>;

    /// Run the committee review for one instrument.
    async fn review(
        &self,
        fund_name: &str,
        snapshot: &IndicatorSnapshot,
        risk: &RiskAssessment,
        macro_summary: &str,
        sector_news: &[String],
    ) -> AdvisoryOutcome;
}

/// OpenAI-compatible chat-completions client.
pub struct AdvisoryClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AdvisoryClient {
    /// Build from `LLM_API_KEY` / `LLM_BASE_URL` / `LLM_MODEL`. Returns `None`
    /// when no key is configured; the engine then treats every instrument as
    /// advisory-unavailable.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build http client");
        Some(Self {
            http,
            api_key,
            base_url,
            model,
        })
    }

    fn build_prompt(
        &self,
        fund_name: &str,
        snapshot: &IndicatorSnapshot,
        risk: &RiskAssessment,
        macro_summary: &str,
        sector_news: &[String],
    ) -> String {
        let money_flow = if snapshot.obv_slope > 1.0 {
            "accumulating"
        } else if snapshot.obv_slope < -1.0 {
            "distributing"
        } else {
            "range-bound"
        };
        let volume_status = if snapshot.volume_ratio < 0.6 {
            "liquidity drying up"
        } else if snapshot.volume_ratio > 2.0 {
            "heavy expansion"
        } else {
            "moderate"
        };
        let bollinger_status = if snapshot.bollinger_pct_b > 1.0 {
            "above the upper band"
        } else if snapshot.bollinger_pct_b < 0.0 {
            "below the lower band"
        } else {
            "inside the bands"
        };
        // char-wise so multi-byte headlines cannot split a code point
        let macro_summary: String = macro_summary.chars().take(400).collect();
        let sector: String = sector_news.join(" | ").chars().take(400).collect();

        format!(
            r#"You are the investment committee for a daily ETF advisory desk.
Debate the instrument below and converge on a single verdict.

HARD RISK-CONTROL VERDICT (cannot be outvoted):
- fuse level: {fuse} (0=normal, 3=forced liquidation)
- risk officer: {risk_msg}
- if the fuse level is 2 or higher the chairman must defend or liquidate,
  and the adjustment must be negative.

INSTRUMENT DOSSIER:
- name: {fund_name}
- weekly trend: {weekly}
- MACD: {macd_trend} (hist {hist:.3})
- RSI: {rsi:.1}
- Bollinger: {bollinger_status}
- money flow: {money_flow} (OBV slope {obv:.2})
- volume: {volume_status} (VR {vr:.2})

HEADLINES:
- macro: {macro_summary}
- sector: {sector}

PARTICIPANTS:
1. Growth officer: argue the long case. Silent if a fuse has tripped.
2. Risk officer: argue the risks. If a fuse has tripped, restate the verdict.
3. Chairman: weigh both against the hard risk-control verdict and decide.

Reply with a single JSON object only:
{{
    "bull_view": "...",
    "bear_view": "...",
    "chairman_conclusion": "...",
    "adjustment": <integer between -30 and 30>,
    "risk_alert": "..."
}}"#,
            fuse = risk.fuse_level.as_u8(),
            risk_msg = risk.risk_msg,
            weekly = snapshot.weekly_trend.label(),
            macd_trend = snapshot.macd.trend.label(),
            hist = snapshot.macd.hist,
            rsi = snapshot.rsi,
            obv = snapshot.obv_slope,
            vr = snapshot.volume_ratio,
        )
    }
}

#[async_trait]
impl Advisor for AdvisoryClient {
    async fn headlines(&self, keyword: &str) -> Vec<String> {
        let url = "https://feed.mix.sina.com.cn/api/roll/get";
        let resp = self
            .http
            .get(url)
            .query(&[
                ("pageid", "153"),
                ("lid", "2516"),
                ("num", "30"),
                ("page", "1"),
            ])
            .send()
            .await;
        let body: Value = match resp {
            Ok(r) => match r.json().await {
                Ok(v) => v,
                Err(e) => {
                    log::debug!("headline feed returned non-JSON: {e}");
                    return Vec::new();
                }
            },
            Err(e) => {
                log::debug!("headline feed unreachable: {e}");
                return Vec::new();
            }
        };
        let titles: Vec<String> = body
            .pointer("/result/data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let matched: Vec<String> = titles
            .iter()
            .filter(|t| t.contains(keyword))
            .cloned()
            .collect();
        if matched.is_empty() {
            // keyword too narrow for the roll feed; return the freshest slice
            titles.into_iter().take(10).collect()
        } else {
            matched
        }
    }

    async fn review(
        &self,
        fund_name: &str,
        snapshot: &IndicatorSnapshot,
        risk: &RiskAssessment,
        macro_summary: &str,
        sector_news: &[String],
    ) -> AdvisoryOutcome {
        let prompt = self.build_prompt(fund_name, snapshot, risk, macro_summary, sector_news);
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.3,
            "max_tokens": 1000,
        });

        log::info!(
            "committee review for {fund_name} (fuse level {})",
            risk.fuse_level.as_u8()
        );
        let response = match self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::error!("advisory request failed for {fund_name}: {e}");
                return AdvisoryOutcome::unavailable(e.to_string());
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            log::error!("advisory endpoint returned {status} for {fund_name}");
            return AdvisoryOutcome::unavailable(format!("http {status}"));
        }
        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return AdvisoryOutcome::unavailable(format!("bad payload: {e}")),
        };
        let content = match body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            Some(c) => c,
            None => return AdvisoryOutcome::unavailable("reply carried no content"),
        };
        log::debug!("committee minutes for {fund_name}:\n{content}");
        parse_review(content)
    }
}

/// Extract and parse the first JSON object embedded in the reply text.
pub(crate) fn parse_review(content: &str) -> AdvisoryOutcome {
    let Some(block) = JSON_BLOCK.find(content) else {
        return AdvisoryOutcome::unavailable("reply carried no JSON object");
    };
    let raw: Value = match serde_json::from_str(block.as_str()) {
        Ok(v) => v,
        Err(e) => return AdvisoryOutcome::unavailable(format!("unparseable JSON: {e}")),
    };
    let adjustment = raw
        .get("adjustment")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
        .unwrap_or(0);
    let text = |key: &str| {
        raw.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    AdvisoryOutcome::Ok(AdvisoryReview {
        adjustment,
        bull_view: text("bull_view"),
        bear_view: text("bear_view"),
        conclusion: text("chairman_conclusion"),
        risk_alert: text("risk_alert"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_reply() {
        let outcome = parse_review(
            r#"{"bull_view":"b","bear_view":"r","chairman_conclusion":"hold","adjustment":12,"risk_alert":"none"}"#,
        );
        match outcome {
            AdvisoryOutcome::Ok(review) => {
                assert_eq!(review.adjustment, 12);
                assert_eq!(review.conclusion, "hold");
            }
            AdvisoryOutcome::Unavailable { reason } => panic!("unexpected: {reason}"),
        }
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let outcome = parse_review(
            "Here are the minutes.\n```json\n{\"chairman_conclusion\": \"trim\", \"adjustment\": -8.4}\n```\nEnd.",
        );
        assert_eq!(outcome.adjustment(), -8);
        assert!(outcome.is_available());
    }

    #[test]
    fn missing_fields_default_to_neutral() {
        let outcome = parse_review("{\"chairman_conclusion\": \"wait\"}");
        assert_eq!(outcome.adjustment(), 0);
        assert!(outcome.is_available());
    }

    #[test]
    fn garbled_reply_degrades_to_unavailable() {
        let outcome = parse_review("no json here at all");
        assert!(!outcome.is_available());
        assert_eq!(outcome.adjustment(), 0);
        assert!(outcome.conclusion().contains("unavailable"));
    }
}
