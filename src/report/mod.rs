//! HTML digest rendering and delivery.
//!
//! Rendering is plain string assembly; delivery POSTs the digest to a
//! configured webhook. Both are best-effort consumers of the cycle output
//! and can never fail a cycle.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::decision::Action;
use crate::engine::{CycleOutcome, InstrumentReport};

/// Render the per-cycle HTML digest.
pub fn render_html(outcome: &CycleOutcome) -> String {
    let mut html = format!(
        "<h1>IronQuant daily advisory</h1><p>market volatility: {:.2}%</p>",
        outcome.volatility * 100.0
    );
    if outcome.reports.is_empty() {
        html.push_str("<p>No instruments produced a decision this cycle.</p>");
    }
    for report in &outcome.reports {
        html.push_str(&render_card(report));
    }
    html
}

fn render_card(report: &InstrumentReport) -> String {
    // mainland convention: red marks buying strength, green selling
    let color = match report.decision.action {
        Action::Buy => "red",
        Action::Sell => "green",
        Action::Hold => "gray",
    };
    let advisory_line = if report.advisory.is_available() {
        escape(&report.advisory.conclusion())
    } else {
        format!("<i>{}</i>", escape(&report.advisory.conclusion()))
    };
    format!(
        "<div style='border:1px solid #ccc; padding:10px; margin:5px;'>\
         <h3>{name} <span style='color:{color}'>{action}</span></h3>\
         <p>score: {score:.0} (fuse level {fuse}) | amount: {amount}</p>\
         <p>risk: {risk}</p>\
         <p>committee: {advisory}</p>\
         <p>position: {shares:.2} shares @ {cost:.3}, held {days}d</p>\
         </div>",
        name = escape(&report.name),
        color = color,
        action = report.decision.action.label(),
        score = report.decision.final_score,
        fuse = report.risk.fuse_level.as_u8(),
        amount = report.decision.amount,
        risk = escape(&report.risk.risk_msg),
        advisory = advisory_line,
        shares = report.position.shares,
        cost = report.position.cost,
        days = report.position.held_days,
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Webhook delivery of the rendered digest.
pub struct Notifier {
    webhook_url: Option<String>,
    http: Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("failed to build http client");
        Self { webhook_url, http }
    }

    /// Post the digest; failures are logged, never propagated.
    pub async fn deliver(&self, subject: &str, html: &str) {
        let Some(url) = &self.webhook_url else {
            log::info!("no webhook configured, digest not delivered");
            return;
        };
        let payload = json!({ "subject": subject, "content": html });
        match self.http.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                log::info!("digest delivered to webhook");
            }
            Ok(resp) => log::warn!("webhook returned {}", resp.status()),
            Err(e) => log::warn!("webhook delivery failed: {e}"),
        }
    }
}
