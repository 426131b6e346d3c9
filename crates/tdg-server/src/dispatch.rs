//! Inbound command dispatch.
//!
//! Resolves each decoded frame against the closed command set and runs
//! the handler under a guard: a handler error is reported to the
//! originating client as an `["error", ...]` frame and never tears down
//! the connection or the server. Unknown commands are logged and
//! dropped.

use serde_json::Value;
use tracing::{debug, error};

use tdg_core::{frame_encode, Command, CommandName, TAG_ERROR};

use crate::cmds;
use crate::registry::ClientHandle;
use crate::server::ServerCtx;

pub async fn dispatch(ctx: &ServerCtx, client: &ClientHandle, frame: Vec<Value>) {
    let head = frame.first().and_then(Value::as_str).map(str::to_owned);
    let Some(command) = Command::from_frame(frame) else {
        match head {
            Some(name) => {
                debug!(client_id = client.id, command = %name, "unknown command, dropping frame")
            }
            None => debug!(client_id = client.id, "frame without string command name, dropping"),
        }
        return;
    };

    debug!(
        client_id = client.id,
        command = command.name.as_str(),
        "dispatching command"
    );

    let result = match command.name {
        CommandName::ExecBt => cmds::exec_bt::handle(ctx, client, &command).await,
        CommandName::GetBts => cmds::get_bts::handle(ctx, client, &command).await,
        CommandName::GetCandles => cmds::get_candles::handle(ctx, client, &command).await,
        CommandName::GetMarkets => cmds::get_markets::handle(ctx, client, &command).await,
        CommandName::GetTrades => cmds::get_trades::handle(ctx, client, &command).await,
    };

    if let Err(e) = result {
        error!(
            client_id = client.id,
            command = command.name.as_str(),
            error = %e,
            "command handler failed"
        );
        client
            .send(frame_encode(TAG_ERROR, vec![Value::String(e.to_string())]))
            .await;
    }
}
