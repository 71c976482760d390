//! Technical indicator pipeline.
//!
//! Turns a daily price/volume series into a fixed-shape snapshot. The whole
//! derivation is all-or-nothing: any fault anywhere degrades the call to
//! `None`, which callers treat as "skip this instrument for the cycle".

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::Next;

use crate::market_data::{Candle, PriceSeries};
use crate::utils::error::{Error, Result};
use crate::utils::time::{elapsed_trade_minutes, market_close, FULL_SESSION_MINUTES};

/// Minimum history length for a usable snapshot.
pub const MIN_BARS: usize = 30;

/// Shape of the MACD histogram relative to the previous bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MacdTrend {
    GoldenCross,
    DeathCross,
    RedShrinking,
    GreenShrinking,
}

impl MacdTrend {
    pub fn label(&self) -> &'static str {
        match self {
            MacdTrend::GoldenCross => "golden-cross",
            MacdTrend::DeathCross => "death-cross",
            MacdTrend::RedShrinking => "red-shrinking",
            MacdTrend::GreenShrinking => "green-shrinking",
        }
    }
}

/// Weekly close versus its 5-week moving average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WeeklyTrend {
    Up,
    Down,
    Unknown,
}

impl WeeklyTrend {
    pub fn label(&self) -> &'static str {
        match self {
            WeeklyTrend::Up => "UP",
            WeeklyTrend::Down => "DOWN",
            WeeklyTrend::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MacdSummary {
    pub line: f64,
    pub signal: f64,
    pub hist: f64,
    pub trend: MacdTrend,
}

/// Derived per-cycle indicator snapshot. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSnapshot {
    /// RSI(14), 0-100
    pub rsi: f64,
    pub macd: MacdSummary,
    /// Bollinger %B(20,2)
    pub bollinger_pct_b: f64,
    /// Last volume over its 5-bar moving average
    pub volume_ratio: f64,
    /// OBV 10-bar slope, scaled by 1e4
    pub obv_slope: f64,
    pub weekly_trend: WeeklyTrend,
    /// Last close
    pub close: f64,
    /// Day-over-day fractional change
    pub pct_change: f64,
    /// Baseline technical score, 0-100
    pub quant_score: f64,
}

impl Default for IndicatorSnapshot {
    /// Neutral snapshot: mid-band, average volume, flat momentum.
    fn default() -> Self {
        Self {
            rsi: 50.0,
            macd: MacdSummary {
                line: 0.0,
                signal: 0.0,
                hist: 0.0,
                trend: MacdTrend::DeathCross,
            },
            bollinger_pct_b: 0.5,
            volume_ratio: 1.0,
            obv_slope: 0.0,
            weekly_trend: WeeklyTrend::Unknown,
            close: 0.0,
            pct_change: 0.0,
            quant_score: 50.0,
        }
    }
}

/// Run the full pipeline for one instrument.
///
/// `now` is the exchange-local wall clock, injected so the intraday volume
/// projection is deterministic under test.
pub fn calculate(mut series: PriceSeries, now: NaiveDateTime) -> Option<IndicatorSnapshot> {
    if series.len() < MIN_BARS {
        log::debug!(
            "insufficient history ({} bars, need {}), skipping",
            series.len(),
            MIN_BARS
        );
        return None;
    }
    project_intraday_volume(&mut series, now);
    match derive(&series) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            log::error!("indicator derivation failed: {e}");
            None
        }
    }
}

/// Scale the in-flight "today" volume up to a full-session estimate.
///
/// Applies only while today's session is still open and more than 15 trading
/// minutes have elapsed. Damping is 0.9 during the morning session and 1.05
/// once the afternoon session has opened.
fn project_intraday_volume(series: &mut PriceSeries, now: NaiveDateTime) {
    let today = now.date();
    let before_close = now.time() < market_close();
    let Some(last) = series.last_mut() else {
        return;
    };
    if last.date != today || !before_close {
        return;
    }
    let elapsed = elapsed_trade_minutes(now.time());
    if elapsed <= 15 {
        return;
    }
    let mut multiplier = f64::from(FULL_SESSION_MINUTES) / f64::from(elapsed);
    multiplier *= if elapsed < 120 { 0.9 } else { 1.05 };
    last.volume *= multiplier;
}

fn derive(series: &PriceSeries) -> Result<IndicatorSnapshot> {
    let mut closes = series.closes();
    let mut volumes = series.volumes();
    fill_gaps(&mut closes);
    fill_gaps(&mut volumes);
    if closes.iter().chain(volumes.iter()).any(|v| !v.is_finite()) {
        return Err(Error::DataError(
            "series contains no finite values to fill from".to_string(),
        ));
    }
    let n = closes.len();
    let close = closes[n - 1];

    // RSI(14)
    let mut rsi_ind = RelativeStrengthIndex::new(14).map_err(|e| Error::DataError(e.to_string()))?;
    let mut rsi = 50.0;
    for &c in &closes {
        rsi = rsi_ind.next(c);
    }

    // MACD(12,26,9) with histogram-shape trend
    let mut macd_ind = MovingAverageConvergenceDivergence::new(12, 26, 9).map_err(|e| Error::DataError(e.to_string()))?;
    let mut prev_hist = 0.0;
    let mut out = macd_ind.next(closes[0]);
    for &c in &closes[1..] {
        prev_hist = out.histogram;
        out = macd_ind.next(c);
    }
    let hist = out.histogram;
    let trend = if hist > 0.0 && hist < prev_hist {
        MacdTrend::RedShrinking
    } else if hist < 0.0 && hist > prev_hist {
        MacdTrend::GreenShrinking
    } else if hist > 0.0 {
        MacdTrend::GoldenCross
    } else {
        MacdTrend::DeathCross
    };
    let macd = MacdSummary {
        line: out.macd,
        signal: out.signal,
        hist,
        trend,
    };

    // Bollinger %B(20,2)
    let mut bb_ind = BollingerBands::new(20, 2.0).map_err(|e| Error::DataError(e.to_string()))?;
    let mut bb = bb_ind.next(closes[0]);
    for &c in &closes[1..] {
        bb = bb_ind.next(c);
    }
    let width = bb.upper - bb.lower;
    let bollinger_pct_b = if width.abs() < f64::EPSILON {
        0.5
    } else {
        (close - bb.lower) / width
    };

    // Volume ratio against the 5-bar average
    let mut sma_vol = SimpleMovingAverage::new(5).map_err(|e| Error::DataError(e.to_string()))?;
    let mut avg_vol = 0.0;
    for &v in &volumes {
        avg_vol = sma_vol.next(v);
    }
    let volume_ratio = if avg_vol > 0.0 {
        volumes[n - 1] / avg_vol
    } else {
        1.0
    };

    let obv_slope = obv_slope(&closes, &volumes);
    let weekly_trend = weekly_trend(series.bars(), &closes);

    let pct_change = if n >= 2 && closes[n - 2] != 0.0 {
        (closes[n - 1] - closes[n - 2]) / closes[n - 2]
    } else {
        0.0
    };

    let quant_score = quant_score(
        rsi,
        trend,
        bollinger_pct_b,
        weekly_trend,
        volume_ratio,
        obv_slope,
        pct_change,
    );

    Ok(IndicatorSnapshot {
        rsi,
        macd,
        bollinger_pct_b,
        volume_ratio,
        obv_slope,
        weekly_trend,
        close,
        pct_change,
        quant_score,
    })
}

/// Forward-fill, then backward-fill, non-finite entries in place.
fn fill_gaps(values: &mut [f64]) {
    let mut last = f64::NAN;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = *v;
        } else if last.is_finite() {
            *v = last;
        }
    }
    let mut next = f64::NAN;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            next = *v;
        } else if next.is_finite() {
            *v = next;
        }
    }
}

/// On-balance volume 10-bar slope, scaled down by 1e4. Zero when the series
/// is too short to span ten intervals.
fn obv_slope(closes: &[f64], volumes: &[f64]) -> f64 {
    let n = closes.len();
    if n < 11 {
        return 0.0;
    }
    let mut obv = Vec::with_capacity(n);
    let mut acc = 0.0;
    obv.push(acc);
    for i in 1..n {
        if closes[i] > closes[i - 1] {
            acc += volumes[i];
        } else if closes[i] < closes[i - 1] {
            acc -= volumes[i];
        }
        obv.push(acc);
    }
    ((obv[n - 1] - obv[n - 11]) / 10.0) / 10_000.0
}

/// Resample to ISO-week last closes and compare against the 5-week average.
fn weekly_trend(bars: &[Candle], closes: &[f64]) -> WeeklyTrend {
    let mut weekly: Vec<f64> = Vec::new();
    let mut current_week: Option<(i32, u32)> = None;
    for (bar, &close) in bars.iter().zip(closes) {
        let iso = bar.date.iso_week();
        let key = (iso.year(), iso.week());
        if current_week == Some(key) {
            if let Some(last) = weekly.last_mut() {
                *last = close;
            }
        } else {
            weekly.push(close);
            current_week = Some(key);
        }
    }
    if weekly.len() < 5 {
        return WeeklyTrend::Unknown;
    }
    let ma5 = weekly[weekly.len() - 5..].iter().sum::<f64>() / 5.0;
    if weekly[weekly.len() - 1] > ma5 {
        WeeklyTrend::Up
    } else {
        WeeklyTrend::Down
    }
}

/// Baseline technical score: 50 plus bounded contributions from each
/// indicator family, clamped to 0-100.
fn quant_score(
    rsi: f64,
    macd_trend: MacdTrend,
    pct_b: f64,
    weekly: WeeklyTrend,
    volume_ratio: f64,
    obv_slope: f64,
    pct_change: f64,
) -> f64 {
    let mut score: f64 = 50.0;

    score += match macd_trend {
        MacdTrend::GoldenCross => 10.0,
        MacdTrend::GreenShrinking => 5.0,
        MacdTrend::RedShrinking => -5.0,
        MacdTrend::DeathCross => -10.0,
    };

    if rsi < 30.0 {
        score += 10.0; // oversold
    } else if rsi > 70.0 {
        score -= 10.0; // overbought
    }

    score += match weekly {
        WeeklyTrend::Up => 10.0,
        WeeklyTrend::Down => -10.0,
        WeeklyTrend::Unknown => 0.0,
    };

    if pct_b < 0.0 {
        score += 5.0;
    } else if pct_b > 1.0 {
        score -= 5.0;
    }

    if volume_ratio > 1.5 && pct_change > 0.0 {
        score += 5.0; // expansion on an up day
    } else if volume_ratio < 0.7 {
        score -= 5.0; // liquidity drying up
    }

    if obv_slope > 1.0 {
        score += 5.0;
    } else if obv_slope < -1.0 {
        score -= 5.0;
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(n: usize, close_fn: impl Fn(usize) -> f64, volume: f64) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bars = (0..n)
            .map(|i| {
                let close = close_fn(i);
                Candle {
                    date: start + Duration::days(i as i64),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume,
                }
            })
            .collect();
        PriceSeries::from_bars(bars)
    }

    fn noon(date: &str, h: u32, m: u32) -> NaiveDateTime {
        date.parse::<NaiveDate>()
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn short_series_yields_no_snapshot() {
        let s = series(MIN_BARS - 1, |i| 1.0 + i as f64 * 0.01, 100.0);
        assert!(calculate(s, noon("2024-06-03", 16, 0)).is_none());
        assert!(calculate(PriceSeries::default(), noon("2024-06-03", 16, 0)).is_none());
    }

    #[test]
    fn rising_series_snapshot() {
        let s = series(60, |i| 1.0 * 1.01_f64.powi(i as i32), 100.0);
        let snap = calculate(s, noon("2024-06-03", 16, 0)).unwrap();
        assert!(snap.rsi > 70.0 && snap.rsi <= 100.0);
        assert!(snap.macd.hist > 0.0);
        assert_eq!(snap.weekly_trend, WeeklyTrend::Up);
        assert!((snap.pct_change - 0.01).abs() < 1e-9);
        assert!((snap.volume_ratio - 1.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&snap.quant_score));
    }

    #[test]
    fn pct_change_matches_last_two_closes() {
        let s = series(40, |i| if i == 39 { 0.98 } else { 1.0 }, 100.0);
        let snap = calculate(s, noon("2024-06-03", 16, 0)).unwrap();
        assert!((snap.pct_change + 0.02).abs() < 1e-9);
    }

    #[test]
    fn fill_gaps_interpolates_edges() {
        let mut v = [f64::NAN, 1.0, f64::NAN, 2.0, f64::NAN];
        fill_gaps(&mut v);
        assert_eq!(v, [1.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn morning_projection_scales_volume() {
        // 60 elapsed minutes at 10:30 -> 240/60 * 0.9 = 3.6x
        let mut s = series(31, |i| 1.0 + i as f64 * 0.001, 100.0);
        let last_date = s.last().unwrap().date;
        let now = last_date.and_hms_opt(10, 30, 0).unwrap();
        project_intraday_volume(&mut s, now);
        assert!((s.last().unwrap().volume - 360.0).abs() < 1e-9);
    }

    #[test]
    fn lunch_break_projection_uses_frozen_counter() {
        // counter frozen at 120 -> 240/120 * 1.05 = 2.1x
        let mut s = series(31, |i| 1.0 + i as f64 * 0.001, 100.0);
        let last_date = s.last().unwrap().date;
        let now = last_date.and_hms_opt(12, 30, 0).unwrap();
        project_intraday_volume(&mut s, now);
        assert!((s.last().unwrap().volume - 210.0).abs() < 1e-9);
    }

    #[test]
    fn projection_skips_thin_early_sample() {
        let mut s = series(31, |i| 1.0 + i as f64 * 0.001, 100.0);
        let last_date = s.last().unwrap().date;
        let now = last_date.and_hms_opt(9, 40, 0).unwrap();
        project_intraday_volume(&mut s, now);
        assert!((s.last().unwrap().volume - 100.0).abs() < 1e-9);
    }

    #[test]
    fn projection_skips_stale_last_bar() {
        let mut s = series(31, |i| 1.0 + i as f64 * 0.001, 100.0);
        let next_day = s.last().unwrap().date + Duration::days(1);
        let now = next_day.and_hms_opt(10, 30, 0).unwrap();
        project_intraday_volume(&mut s, now);
        assert!((s.last().unwrap().volume - 100.0).abs() < 1e-9);
    }

    #[test]
    fn projection_skips_after_close() {
        let mut s = series(31, |i| 1.0 + i as f64 * 0.001, 100.0);
        let last_date = s.last().unwrap().date;
        let now = last_date.and_hms_opt(15, 30, 0).unwrap();
        project_intraday_volume(&mut s, now);
        assert!((s.last().unwrap().volume - 100.0).abs() < 1e-9);
    }

    #[test]
    fn obv_slope_short_series_is_zero() {
        let closes = vec![1.0; 10];
        let volumes = vec![100.0; 10];
        assert_eq!(obv_slope(&closes, &volumes), 0.0);
    }

    #[test]
    fn obv_slope_tracks_accumulation() {
        // strictly rising closes: OBV gains `volume` per bar
        let closes: Vec<f64> = (0..20).map(|i| 1.0 + i as f64 * 0.01).collect();
        let volumes = vec![50_000.0; 20];
        // ten intervals of +50k each -> slope 50k / 1e4 = 5.0
        assert!((obv_slope(&closes, &volumes) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn weekly_trend_unknown_for_few_weeks() {
        let s = series(10, |i| 1.0 + i as f64 * 0.01, 100.0);
        let snap_trend = weekly_trend(s.bars(), &s.closes());
        assert_eq!(snap_trend, WeeklyTrend::Unknown);
    }

    #[test]
    fn weekly_trend_down_for_falling_series() {
        let s = series(60, |i| 2.0 - i as f64 * 0.01, 100.0);
        assert_eq!(weekly_trend(s.bars(), &s.closes()), WeeklyTrend::Down);
    }

    #[test]
    fn quant_score_stays_bounded() {
        let hi = quant_score(20.0, MacdTrend::GoldenCross, -0.1, WeeklyTrend::Up, 2.0, 3.0, 0.02);
        let lo = quant_score(80.0, MacdTrend::DeathCross, 1.2, WeeklyTrend::Down, 0.5, -3.0, -0.02);
        assert!((0.0..=100.0).contains(&hi));
        assert!((0.0..=100.0).contains(&lo));
        assert!(hi > lo);
    }
}
