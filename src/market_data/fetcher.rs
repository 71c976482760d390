//! Multi-provider market data retrieval with fallback.
//!
//! Provider order: EastMoney kline -> Sina daily kline -> Yahoo chart API.
//! During trading hours a realtime quote is stitched onto the tail of the
//! history as a synthetic "today" bar. Per-provider failures are logged and
//! swallowed; only a fully dry chain surfaces as a `DataError`.

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use statrs::statistics::Statistics;
use std::time::Duration;
use url::Url;

use crate::market_data::{Candle, PriceSeries};
use crate::utils::error::{Error, Result};
use crate::utils::time::{exchange_now, is_trading_time};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

/// CSI 300, used as the market-wide volatility reference.
const MARKET_INDEX_SECID: &str = "1.000300";

/// Volatility returned when the probe fails.
pub const DEFAULT_VOLATILITY: f64 = 0.015;

/// Seam between the engine and the provider chain, so tests can inject
/// canned series.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Full daily history for an instrument, oldest first, no duplicate dates.
    async fn fetch_history(&self, code: &str) -> Result<PriceSeries>;

    /// Market-wide volatility (fractional std-dev of daily returns).
    async fn market_volatility(&self) -> f64;
}

/// HTTP-backed implementation of [`MarketDataSource`].
pub struct DataFetcher {
    http: Client,
}

impl Default for DataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DataFetcher {
    pub fn new() -> Self {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build http client");
        Self { http }
    }

    /// `1.` prefix for Shanghai-listed codes, `0.` for Shenzhen.
    fn secid(code: &str) -> String {
        if code.starts_with('5') || code.starts_with('6') {
            format!("1.{code}")
        } else {
            format!("0.{code}")
        }
    }

    /// GET a JSON document with one retry.
    async fn get_json(&self, url: Url) -> Result<Value> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..2u8 {
            if attempt > 0 {
                log::warn!("retrying {} after failure", url.host_str().unwrap_or("request"));
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            let outcome = async {
                let resp = self.http.get(url.clone()).send().await?.error_for_status()?;
                Ok::<Value, reqwest::Error>(resp.json::<Value>().await?)
            }
            .await;
            match outcome {
                Ok(v) => return Ok(v),
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::DataError("request failed".to_string())))
    }

    /// Primary provider: EastMoney daily kline.
    async fn eastmoney_daily(&self, code: &str) -> Result<PriceSeries> {
        let url = Url::parse_with_params(
            "https://push2his.eastmoney.com/api/qt/stock/kline/get",
            &[
                ("secid", Self::secid(code).as_str()),
                ("klt", "101"),
                ("fqt", "1"),
                ("beg", "20200101"),
                ("end", "20500101"),
                ("fields1", "f1,f2,f3,f4,f5,f6"),
                ("fields2", "f51,f52,f53,f54,f55,f56"),
            ],
        )
        .map_err(|e| Error::DataError(e.to_string()))?;
        let body = self.get_json(url).await?;
        let klines = body
            .pointer("/data/klines")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::DataError(format!("eastmoney: no klines for {code}")))?;
        let bars = klines
            .iter()
            .filter_map(Value::as_str)
            .filter_map(parse_kline_row)
            .collect::<Vec<_>>();
        Ok(PriceSeries::from_bars(bars))
    }

    /// Fallback provider: Sina daily kline.
    async fn sina_daily(&self, code: &str) -> Result<PriceSeries> {
        let symbol = if code.starts_with('5') || code.starts_with('6') {
            format!("sh{code}")
        } else {
            format!("sz{code}")
        };
        let url = Url::parse_with_params(
            "https://quotes.sina.cn/cn/api/json_v2.php/CN_MarketDataService.getKLineData",
            &[
                ("symbol", symbol.as_str()),
                ("scale", "240"),
                ("ma", "no"),
                ("datalen", "1023"),
            ],
        )
        .map_err(|e| Error::DataError(e.to_string()))?;
        let body = self.get_json(url).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| Error::DataError(format!("sina: unexpected payload for {code}")))?;
        let bars = rows
            .iter()
            .filter_map(|row| {
                let date: NaiveDate = row.get("day")?.as_str()?.parse().ok()?;
                Some(Candle {
                    date,
                    open: json_num(row.get("open")?),
                    high: json_num(row.get("high")?),
                    low: json_num(row.get("low")?),
                    close: json_num(row.get("close")?),
                    volume: json_num(row.get("volume")?),
                })
            })
            .collect::<Vec<_>>();
        Ok(PriceSeries::from_bars(bars))
    }

    /// Last-resort provider: Yahoo chart API.
    async fn yahoo_daily(&self, code: &str) -> Result<PriceSeries> {
        let suffix = if code.starts_with('5') || code.starts_with('6') {
            ".SS"
        } else {
            ".SZ"
        };
        let url = Url::parse_with_params(
            &format!("https://query1.finance.yahoo.com/v8/finance/chart/{code}{suffix}"),
            &[("range", "1y"), ("interval", "1d")],
        )
        .map_err(|e| Error::DataError(e.to_string()))?;
        let body = self.get_json(url).await?;
        let result = body
            .pointer("/chart/result/0")
            .ok_or_else(|| Error::DataError(format!("yahoo: no chart result for {code}")))?;
        let timestamps = result
            .pointer("/timestamp")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::DataError("yahoo: missing timestamps".to_string()))?;
        let quote = result
            .pointer("/indicators/quote/0")
            .ok_or_else(|| Error::DataError("yahoo: missing quote block".to_string()))?;
        let field = |name: &str, i: usize| -> f64 {
            quote
                .pointer(&format!("/{name}/{i}"))
                .map(json_num)
                .unwrap_or(f64::NAN)
        };
        let bars = timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let secs = ts.as_i64()?;
                let date = chrono::DateTime::from_timestamp(secs, 0)?.date_naive();
                Some(Candle {
                    date,
                    open: field("open", i),
                    high: field("high", i),
                    low: field("low", i),
                    close: field("close", i),
                    volume: field("volume", i),
                })
            })
            .collect::<Vec<_>>();
        Ok(PriceSeries::from_bars(bars))
    }

    /// Realtime quote, used to synthesize the in-flight "today" bar.
    async fn realtime_snapshot(&self, code: &str, today: NaiveDate) -> Option<Candle> {
        let url = Url::parse_with_params(
            "https://push2.eastmoney.com/api/qt/stock/get",
            &[
                ("secid", Self::secid(code).as_str()),
                ("fields", "f43,f44,f45,f46,f47,f59"),
            ],
        )
        .ok()?;
        let body = self.get_json(url).await.ok()?;
        let data = body.get("data")?;
        let digits = data.get("f59").and_then(Value::as_u64).unwrap_or(2) as i32;
        let scale = 10f64.powi(digits);
        let price = |key: &str| data.get(key).and_then(Value::as_f64).map(|v| v / scale);
        let close = price("f43").filter(|p| *p > 0.0)?;
        Some(Candle {
            date: today,
            open: price("f46").unwrap_or(close),
            high: price("f44").unwrap_or(close),
            low: price("f45").unwrap_or(close),
            close,
            volume: data.get("f47").and_then(Value::as_f64).unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl MarketDataSource for DataFetcher {
    async fn fetch_history(&self, code: &str) -> Result<PriceSeries> {
        // Soft jitter so a burst of workers does not hammer the upstream.
        let delay = rand::thread_rng().gen_range(300..900);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let mut series = self.eastmoney_daily(code).await.unwrap_or_else(|e| {
            log::warn!("eastmoney failed for {code}: {e}");
            PriceSeries::default()
        });
        if series.is_empty() {
            series = self.sina_daily(code).await.unwrap_or_else(|e| {
                log::warn!("sina failed for {code}: {e}");
                PriceSeries::default()
            });
        }
        if series.is_empty() {
            series = self.yahoo_daily(code).await.unwrap_or_else(|e| {
                log::warn!("yahoo failed for {code}: {e}");
                PriceSeries::default()
            });
        }
        if series.is_empty() {
            return Err(Error::DataError(format!(
                "no provider returned history for {code}"
            )));
        }

        let now = exchange_now();
        if is_trading_time(&now) {
            if let Some(candle) = self.realtime_snapshot(code, now.date_naive()).await {
                series.merge_snapshot(candle);
            }
        }
        Ok(series)
    }

    async fn market_volatility(&self) -> f64 {
        let url = match Url::parse_with_params(
            "https://push2his.eastmoney.com/api/qt/stock/kline/get",
            &[
                ("secid", MARKET_INDEX_SECID),
                ("klt", "101"),
                ("fqt", "1"),
                ("lmt", "40"),
                ("end", "20500101"),
                ("fields1", "f1,f2,f3,f4,f5,f6"),
                ("fields2", "f51,f53"),
            ],
        ) {
            Ok(u) => u,
            Err(_) => return DEFAULT_VOLATILITY,
        };
        let closes = match self.get_json(url).await {
            Ok(body) => body
                .pointer("/data/klines")
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(Value::as_str)
                        .filter_map(|row| row.split(',').nth(1)?.parse::<f64>().ok())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
            Err(e) => {
                log::warn!("volatility probe failed: {e}");
                return DEFAULT_VOLATILITY;
            }
        };
        let vol = volatility_from_closes(&closes, 20);
        log::info!("market volatility (20d): {:.2}%", vol * 100.0);
        vol
    }
}

/// Std-dev of the last `window` daily pct-changes; defaults when the sample
/// is too small.
fn volatility_from_closes(closes: &[f64], window: usize) -> f64 {
    if closes.len() < window + 1 {
        return DEFAULT_VOLATILITY;
    }
    let changes: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let tail = &changes[changes.len() - window..];
    let sd = tail.iter().copied().std_dev();
    if sd.is_finite() {
        sd
    } else {
        DEFAULT_VOLATILITY
    }
}

/// EastMoney kline row: `date,open,close,high,low,volume`.
fn parse_kline_row(row: &str) -> Option<Candle> {
    let mut parts = row.split(',');
    let date: NaiveDate = parts.next()?.parse().ok()?;
    let open = parts.next()?.parse().ok()?;
    let close = parts.next()?.parse().ok()?;
    let high = parts.next()?.parse().ok()?;
    let low = parts.next()?.parse().ok()?;
    let volume = parts.next()?.parse().ok()?;
    Some(Candle {
        date,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Providers disagree on numbers-vs-strings; accept both.
fn json_num(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_row() {
        let bar = parse_kline_row("2024-03-04,1.101,1.120,1.125,1.095,834501").unwrap();
        assert_eq!(bar.date, "2024-03-04".parse::<NaiveDate>().unwrap());
        assert!((bar.open - 1.101).abs() < 1e-9);
        assert!((bar.close - 1.120).abs() < 1e-9);
        assert!((bar.high - 1.125).abs() < 1e-9);
        assert!((bar.low - 1.095).abs() < 1e-9);
        assert!((bar.volume - 834501.0).abs() < 1e-9);
        assert!(parse_kline_row("garbage").is_none());
    }

    #[test]
    fn secid_prefixes() {
        assert_eq!(DataFetcher::secid("510300"), "1.510300");
        assert_eq!(DataFetcher::secid("600519"), "1.600519");
        assert_eq!(DataFetcher::secid("159915"), "0.159915");
    }

    #[test]
    fn volatility_falls_back_on_short_sample() {
        assert!((volatility_from_closes(&[1.0, 1.01], 20) - DEFAULT_VOLATILITY).abs() < 1e-12);
    }

    #[test]
    fn volatility_of_flat_series_is_zero() {
        let closes = vec![10.0; 30];
        assert!(volatility_from_closes(&closes, 20).abs() < 1e-12);
    }

    #[test]
    fn json_num_accepts_strings_and_numbers() {
        assert!((json_num(&serde_json::json!("1.25")) - 1.25).abs() < 1e-9);
        assert!((json_num(&serde_json::json!(2.5)) - 2.5).abs() < 1e-9);
        assert!(json_num(&serde_json::json!(null)).is_nan());
    }
}
