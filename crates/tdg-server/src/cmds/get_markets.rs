//! `get.markets` — deliver the tradable market list.

use serde_json::Value;
use tdg_core::{frame_encode, Command, TdgResult};

use crate::registry::ClientHandle;
use crate::server::ServerCtx;

pub async fn handle(ctx: &ServerCtx, client: &ClientHandle, _command: &Command) -> TdgResult<()> {
    let markets = ctx.rest.markets().await?;
    client
        .send(frame_encode("data.markets", vec![Value::Array(markets)]))
        .await;
    Ok(())
}
