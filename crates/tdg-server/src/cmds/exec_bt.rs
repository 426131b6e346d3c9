//! `exec.bt` — replay a historical range to the requesting client.
//!
//! Frame order: `bt.start`, then candles and trades interleaved by event
//! time, then `bt.end`. The finished run is recorded for `get.bts`.

use serde_json::{json, Value};
use tdg_core::{frame_encode, Command, TdgResult};
use tracing::info;

use crate::bt::{generate_run_id, now_ms, BacktestMeta};
use crate::registry::ClientHandle;
use crate::server::ServerCtx;

use super::{bool_arg, int_arg, str_arg};

struct BtRequest {
    symbol: String,
    tf: String,
    start: i64,
    end: i64,
    include_candles: bool,
    include_trades: bool,
}

pub async fn handle(ctx: &ServerCtx, client: &ClientHandle, command: &Command) -> TdgResult<()> {
    let request = parse_args(&command.args)?;

    let candles = if request.include_candles {
        ctx.rest
            .candles(&request.symbol, &request.tf, request.start, request.end)
            .await?
    } else {
        Vec::new()
    };
    let trades = if request.include_trades {
        ctx.rest
            .trades(&request.symbol, request.start, request.end)
            .await?
    } else {
        Vec::new()
    };

    let launched_at = now_ms();
    info!(
        client_id = client.id,
        symbol = %request.symbol,
        tf = %request.tf,
        candles = candles.len(),
        trades = trades.len(),
        "backtest stream starting"
    );

    let range = vec![
        json!(request.symbol),
        json!(request.tf),
        json!(request.start),
        json!(request.end),
    ];
    client.send(frame_encode("bt.start", range.clone())).await;
    let (candle_count, trade_count) =
        stream_interleaved(client, &request.symbol, candles, trades).await;
    client.send(frame_encode("bt.end", range)).await;

    ctx.backtests
        .record(BacktestMeta {
            id: generate_run_id(),
            symbol: request.symbol,
            tf: request.tf,
            start: request.start,
            end: request.end,
            candles: candle_count,
            trades: trade_count,
            launched_at,
        })
        .await;
    Ok(())
}

fn parse_args(args: &[Value]) -> TdgResult<BtRequest> {
    Ok(BtRequest {
        symbol: str_arg(args, 0, "symbol")?,
        tf: str_arg(args, 1, "tf")?,
        start: int_arg(args, 2, "start")?,
        end: int_arg(args, 3, "end")?,
        include_candles: bool_arg(args, 4, "include_candles", true)?,
        include_trades: bool_arg(args, 5, "include_trades", false)?,
    })
}

/// Stream both series in event-time order. Ties go to the candle so the
/// bar is on the books before the trades inside it.
async fn stream_interleaved(
    client: &ClientHandle,
    symbol: &str,
    candles: Vec<Value>,
    trades: Vec<Value>,
) -> (usize, usize) {
    let counts = (candles.len(), trades.len());
    let mut candles = candles.into_iter().peekable();
    let mut trades = trades.into_iter().peekable();

    loop {
        let take_candle = match (candles.peek(), trades.peek()) {
            (Some(candle), Some(trade)) => candle_mts(candle) <= trade_mts(trade),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        if take_candle {
            if let Some(candle) = candles.next() {
                client
                    .send(frame_encode("bt.candle", vec![json!(symbol), candle]))
                    .await;
            }
        } else if let Some(trade) = trades.next() {
            client
                .send(frame_encode("bt.trade", vec![json!(symbol), trade]))
                .await;
        }
    }

    counts
}

// Event time of an entry, whichever shape it arrived in. Raw candles
// carry mts at index 0, raw trades at index 1.
fn candle_mts(value: &Value) -> i64 {
    entry_mts(value, 0)
}

fn trade_mts(value: &Value) -> i64 {
    entry_mts(value, 1)
}

fn entry_mts(value: &Value, raw_idx: usize) -> i64 {
    match value {
        Value::Array(items) => items.get(raw_idx).and_then(Value::as_i64).unwrap_or(0),
        Value::Object(map) => map.get("mts").and_then(Value::as_i64).unwrap_or(0),
        _ => 0,
    }
}
