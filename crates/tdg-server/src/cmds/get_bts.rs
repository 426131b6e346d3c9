//! `get.bts` — deliver the recorded backtest runs.

use serde_json::Value;
use tdg_core::{frame_encode, Command, TdgResult};

use crate::registry::ClientHandle;
use crate::server::ServerCtx;

pub async fn handle(ctx: &ServerCtx, client: &ClientHandle, _command: &Command) -> TdgResult<()> {
    let runs = ctx.backtests.list().await;
    let mut payload = Vec::with_capacity(runs.len());
    for run in runs {
        payload.push(serde_json::to_value(run)?);
    }

    client
        .send(frame_encode("data.bts", vec![Value::Array(payload)]))
        .await;
    Ok(())
}
