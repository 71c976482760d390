//! Market data types and retrieval.

pub mod fetcher;

pub use fetcher::{DataFetcher, MarketDataSource};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single daily bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Chronologically ordered, date-deduplicated daily bars.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    bars: Vec<Candle>,
}

impl PriceSeries {
    /// Build a series from arbitrary bars: sorted ascending by date, with the
    /// last bar winning on duplicate dates.
    pub fn from_bars(bars: Vec<Candle>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Candle> = BTreeMap::new();
        for bar in bars {
            by_date.insert(bar.date, bar);
        }
        Self {
            bars: by_date.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Candle] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.last()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut Candle> {
        self.bars.last_mut()
    }

    /// Stitch a live snapshot in as the synthetic "today" bar: replaces the
    /// last bar when it carries the same date, appends otherwise.
    pub fn merge_snapshot(&mut self, candle: Candle) {
        match self.bars.last_mut() {
            Some(last) if last.date == candle.date => *last = candle,
            Some(last) if last.date < candle.date => self.bars.push(candle),
            Some(_) => {
                // snapshot older than history tail; re-normalize
                let mut bars = std::mem::take(&mut self.bars);
                bars.push(candle);
                *self = Self::from_bars(bars);
            }
            None => self.bars.push(candle),
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }
}
