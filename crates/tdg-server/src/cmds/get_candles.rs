//! `get.candles` — fetch a candle range and deliver it in one frame.

use serde_json::{json, Value};
use tdg_core::{frame_encode, Command, TdgResult};
use tracing::debug;

use crate::registry::ClientHandle;
use crate::server::ServerCtx;

use super::{int_arg, str_arg};

pub async fn handle(ctx: &ServerCtx, client: &ClientHandle, command: &Command) -> TdgResult<()> {
    let (symbol, tf, start, end) = parse_args(&command.args)?;

    let candles = ctx.rest.candles(&symbol, &tf, start, end).await?;
    debug!(
        client_id = client.id,
        symbol = %symbol,
        tf = %tf,
        count = candles.len(),
        "candles fetched"
    );

    client
        .send(frame_encode(
            "data.candles",
            vec![
                json!(symbol),
                json!(tf),
                json!(start),
                json!(end),
                Value::Array(candles),
            ],
        ))
        .await;
    Ok(())
}

fn parse_args(args: &[Value]) -> TdgResult<(String, String, i64, i64)> {
    Ok((
        str_arg(args, 0, "symbol")?,
        str_arg(args, 1, "tf")?,
        int_arg(args, 2, "start")?,
        int_arg(args, 3, "end")?,
    ))
}
