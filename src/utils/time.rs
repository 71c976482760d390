//! Exchange-session clock helpers.
//!
//! The venue trades 09:30-11:30 and 13:00-15:00 local time. Everything here
//! takes an explicit instant so callers (and tests) control the clock; only
//! [`exchange_now`] touches the wall clock.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Asia::Shanghai;
use chrono_tz::Tz;

/// Minutes per full trading day (two 120-minute sessions).
pub const FULL_SESSION_MINUTES: u32 = 240;

const OPEN_AM: u32 = 9 * 60 + 30;
const CLOSE_AM: u32 = 11 * 60 + 30;
const OPEN_PM: u32 = 13 * 60;
const CLOSE_PM: u32 = 15 * 60;

/// Current instant in the exchange timezone.
pub fn exchange_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&Shanghai)
}

/// Market close as a local time-of-day.
pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).expect("valid time")
}

/// Elapsed trading minutes at `t` on a 0-240 scale.
///
/// The lunch break freezes the counter at 120; anything after the afternoon
/// close saturates at 240.
pub fn elapsed_trade_minutes(t: NaiveTime) -> u32 {
    let m = t.hour() * 60 + t.minute();
    if m < OPEN_AM {
        0
    } else if m <= CLOSE_AM {
        m - OPEN_AM
    } else if m < OPEN_PM {
        120
    } else if m <= CLOSE_PM {
        120 + (m - OPEN_PM)
    } else {
        FULL_SESSION_MINUTES
    }
}

/// Whether `now` falls inside the continuous trading window of a weekday.
pub fn is_trading_time(now: &DateTime<Tz>) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let m = now.hour() * 60 + now.minute();
    (OPEN_AM..=CLOSE_PM).contains(&m)
}
