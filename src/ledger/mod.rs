//! Durable per-instrument signal/position ledger.
//!
//! The ledger is the only shared mutable state in the system. All operations
//! serialize behind an internal lock - callers never see it - and every
//! mutation writes the full snapshot through to disk immediately. A missing
//! or corrupt store file is an empty initial state, never an error; a failed
//! write keeps the in-memory state authoritative for the rest of the cycle.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::decision::{Action, Decision};

/// Most recent entries kept per instrument.
pub const SIGNAL_HISTORY_CAP: usize = 30;

/// Classified signal, one letter per decision kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalClass {
    B,
    S,
    H,
}

impl From<Action> for SignalClass {
    fn from(action: Action) -> Self {
        match action {
            Action::Buy => SignalClass::B,
            Action::Sell => SignalClass::S,
            Action::Hold => SignalClass::H,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEntry {
    pub date: NaiveDate,
    #[serde(rename = "s")]
    pub class: SignalClass,
}

/// Open position. `cost` is meaningful only while `shares > 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub shares: f64,
    pub cost: f64,
    pub held_days: u32,
}

/// Persisted layout: two keyed collections, rewritten in full on mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    #[serde(default)]
    positions: HashMap<String, Position>,
    #[serde(default)]
    signals: HashMap<String, Vec<SignalEntry>>,
}

pub struct Ledger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open the ledger at `path`, tolerating a missing or corrupt file.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!(
                    "ledger file {} is corrupt ({e}), starting from empty state",
                    path.display()
                );
                LedgerState::default()
            }),
            Err(_) => LedgerState::default(),
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // a worker that panicked mid-cycle must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Full-snapshot write-through. Failure is logged, never propagated; the
    /// in-memory state stays authoritative.
    fn persist(&self, state: &LedgerState) {
        let payload = match serde_json::to_string_pretty(state) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("ledger serialization failed: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, payload) {
            log::warn!(
                "ledger write to {} failed: {e}; in-memory state remains authoritative",
                self.path.display()
            );
        }
    }

    pub fn get_position(&self, code: &str) -> Position {
        self.lock().positions.get(code).copied().unwrap_or_default()
    }

    pub fn get_signal_history(&self, code: &str) -> Vec<SignalEntry> {
        self.lock().signals.get(code).cloned().unwrap_or_default()
    }

    /// Append today's classified signal unless one was already recorded
    /// today; truncate to the most recent [`SIGNAL_HISTORY_CAP`] entries.
    pub fn record_signal(&self, code: &str, action: Action, today: NaiveDate) {
        let mut state = self.lock();
        Self::record_signal_locked(&mut state, code, action, today);
        self.persist(&state);
    }

    /// Apply a fill. Buys accumulate shares at a weighted-average cost and
    /// reset the holding clock; sells liquidate the whole position.
    pub fn apply_trade(&self, code: &str, amount: f64, price: f64, is_sell: bool) {
        let mut state = self.lock();
        Self::apply_trade_locked(&mut state, code, amount, price, is_sell);
        self.persist(&state);
    }

    /// Age every open position by one day. Intended once per cycle start.
    pub fn advance_day(&self) {
        let mut state = self.lock();
        for position in state.positions.values_mut() {
            position.held_days += 1;
        }
        self.persist(&state);
    }

    /// Record the cycle outcome for one instrument: signal plus any trade,
    /// in a single lock scope so concurrently finishing workers cannot
    /// interleave partial updates.
    pub fn commit_decision(&self, code: &str, decision: &Decision, price: f64, today: NaiveDate) {
        let mut state = self.lock();
        Self::record_signal_locked(&mut state, code, decision.action, today);
        match decision.action {
            Action::Buy if decision.amount > 0 => {
                Self::apply_trade_locked(&mut state, code, decision.amount as f64, price, false);
            }
            Action::Sell => {
                Self::apply_trade_locked(&mut state, code, 0.0, price, true);
            }
            _ => {}
        }
        self.persist(&state);
    }

    fn record_signal_locked(
        state: &mut LedgerState,
        code: &str,
        action: Action,
        today: NaiveDate,
    ) {
        let history = state.signals.entry(code.to_string()).or_default();
        if history.last().map(|entry| entry.date) == Some(today) {
            return;
        }
        history.push(SignalEntry {
            date: today,
            class: action.into(),
        });
        if history.len() > SIGNAL_HISTORY_CAP {
            let excess = history.len() - SIGNAL_HISTORY_CAP;
            history.drain(..excess);
        }
    }

    fn apply_trade_locked(
        state: &mut LedgerState,
        code: &str,
        amount: f64,
        price: f64,
        is_sell: bool,
    ) {
        let position = state.positions.entry(code.to_string()).or_default();
        if is_sell {
            // full liquidation only; partial trimming is a non-feature
            position.shares = 0.0;
            position.cost = 0.0;
            return;
        }
        if price <= 0.0 || amount <= 0.0 {
            log::warn!("ignoring buy with non-positive amount/price for {code}");
            return;
        }
        let bought = amount / price;
        let total_cost = position.shares * position.cost + amount;
        position.shares += bought;
        position.cost = total_cost / position.shares;
        position.held_days = 0;
    }
}
