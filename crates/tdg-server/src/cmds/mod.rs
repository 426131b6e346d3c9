//! Command handlers, one module per wire command.
//!
//! Handlers parse positional arguments, do the work, and queue response
//! frames on the originating client. They return `Err` for anything the
//! client should hear about; the dispatcher turns that into an
//! `["error", ...]` frame.

pub mod exec_bt;
pub mod get_bts;
pub mod get_candles;
pub mod get_markets;
pub mod get_trades;

use serde_json::Value;
use tdg_core::{TdgError, TdgResult};

/// Positional string argument.
pub(crate) fn str_arg(args: &[Value], idx: usize, name: &str) -> TdgResult<String> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(TdgError::BadRequest(format!("{name} must be a string"))),
        None => Err(TdgError::BadRequest(format!("missing {name} argument"))),
    }
}

/// Positional integer argument (epoch milliseconds and the like).
pub(crate) fn int_arg(args: &[Value], idx: usize, name: &str) -> TdgResult<i64> {
    match args.get(idx) {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| TdgError::BadRequest(format!("{name} must be an integer"))),
        None => Err(TdgError::BadRequest(format!("missing {name} argument"))),
    }
}

/// Positional boolean argument, defaulted when omitted or null.
pub(crate) fn bool_arg(args: &[Value], idx: usize, name: &str, default: bool) -> TdgResult<bool> {
    match args.get(idx) {
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::Null) | None => Ok(default),
        Some(_) => Err(TdgError::BadRequest(format!("{name} must be a boolean"))),
    }
}
