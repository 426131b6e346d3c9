//! `get.trades` — fetch a public-trade range and deliver it in one frame.

use serde_json::{json, Value};
use tdg_core::{frame_encode, Command, TdgResult};
use tracing::debug;

use crate::registry::ClientHandle;
use crate::server::ServerCtx;

use super::{int_arg, str_arg};

pub async fn handle(ctx: &ServerCtx, client: &ClientHandle, command: &Command) -> TdgResult<()> {
    let (symbol, start, end) = parse_args(&command.args)?;

    let trades = ctx.rest.trades(&symbol, start, end).await?;
    debug!(
        client_id = client.id,
        symbol = %symbol,
        count = trades.len(),
        "trades fetched"
    );

    client
        .send(frame_encode(
            "data.trades",
            vec![
                json!(symbol),
                json!(start),
                json!(end),
                Value::Array(trades),
            ],
        ))
        .await;
    Ok(())
}

fn parse_args(args: &[Value]) -> TdgResult<(String, i64, i64)> {
    Ok((
        str_arg(args, 0, "symbol")?,
        int_arg(args, 1, "start")?,
        int_arg(args, 2, "end")?,
    ))
}
