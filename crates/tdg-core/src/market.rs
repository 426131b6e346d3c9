//! Market data models and payload normalization.
//!
//! Upstream REST endpoints return positional arrays. When the gateway is
//! configured to transform, those arrays are lifted into labeled objects
//! before delivery; otherwise they pass through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TdgError, TdgResult};

/// One OHLCV candle. Wire form: `[mts, open, close, high, low, volume]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub mts: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

impl Candle {
    /// Parse a raw wire candle.
    pub fn from_raw(raw: &Value) -> TdgResult<Self> {
        let items = as_entry(raw, 6, "candle")?;
        Ok(Self {
            mts: i64_at(items, 0, "candle mts")?,
            open: f64_at(items, 1, "candle open")?,
            close: f64_at(items, 2, "candle close")?,
            high: f64_at(items, 3, "candle high")?,
            low: f64_at(items, 4, "candle low")?,
            volume: f64_at(items, 5, "candle volume")?,
        })
    }
}

/// One public trade. Wire form: `[id, mts, amount, price]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub mts: i64,
    pub amount: f64,
    pub price: f64,
}

impl Trade {
    /// Parse a raw wire trade.
    pub fn from_raw(raw: &Value) -> TdgResult<Self> {
        let items = as_entry(raw, 4, "trade")?;
        Ok(Self {
            id: i64_at(items, 0, "trade id")?,
            mts: i64_at(items, 1, "trade mts")?,
            amount: f64_at(items, 2, "trade amount")?,
            price: f64_at(items, 3, "trade price")?,
        })
    }
}

/// A tradable market: pair name plus the venues it is listed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub exchange: bool,
    pub margin: bool,
}

/// Normalize raw wire candles into labeled objects. Entries that do not
/// parse are skipped; upstream payloads are untrusted.
pub fn normalize_candles(raw: &[Value]) -> Vec<Value> {
    raw.iter()
        .filter_map(|entry| Candle::from_raw(entry).ok())
        .filter_map(|candle| serde_json::to_value(candle).ok())
        .collect()
}

/// Normalize raw wire trades into labeled objects, skipping entries that
/// do not parse.
pub fn normalize_trades(raw: &[Value]) -> Vec<Value> {
    raw.iter()
        .filter_map(|entry| Trade::from_raw(entry).ok())
        .filter_map(|trade| serde_json::to_value(trade).ok())
        .collect()
}

fn as_entry<'a>(raw: &'a Value, min_len: usize, what: &str) -> TdgResult<&'a [Value]> {
    let items = raw
        .as_array()
        .ok_or_else(|| TdgError::Codec(format!("{what} is not an array")))?;
    if items.len() < min_len {
        return Err(TdgError::Codec(format!(
            "{what} has {} fields, expected at least {min_len}",
            items.len()
        )));
    }
    Ok(items)
}

fn i64_at(items: &[Value], idx: usize, what: &str) -> TdgResult<i64> {
    items[idx]
        .as_i64()
        .ok_or_else(|| TdgError::Codec(format!("{what} is not an integer")))
}

fn f64_at(items: &[Value], idx: usize, what: &str) -> TdgResult<f64> {
    items[idx]
        .as_f64()
        .ok_or_else(|| TdgError::Codec(format!("{what} is not a number")))
}
