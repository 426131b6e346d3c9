//! The closed set of gateway commands.

use serde_json::Value;

/// Commands understood by the gateway. The set is fixed at compile time;
/// anything else on the wire is dropped as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    ExecBt,
    GetBts,
    GetCandles,
    GetMarkets,
    GetTrades,
}

impl CommandName {
    /// Resolve a wire command name. `None` means unknown: the dispatcher
    /// logs it and drops the frame, it is never a connection error.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "exec.bt" => Some(Self::ExecBt),
            "get.bts" => Some(Self::GetBts),
            "get.candles" => Some(Self::GetCandles),
            "get.markets" => Some(Self::GetMarkets),
            "get.trades" => Some(Self::GetTrades),
            _ => None,
        }
    }

    /// Wire spelling of this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecBt => "exec.bt",
            Self::GetBts => "get.bts",
            Self::GetCandles => "get.candles",
            Self::GetMarkets => "get.markets",
            Self::GetTrades => "get.trades",
        }
    }
}

/// A parsed inbound frame: recognized command name plus its positional
/// arguments (frame elements after the name).
#[derive(Debug, Clone)]
pub struct Command {
    pub name: CommandName,
    pub args: Vec<Value>,
}

impl Command {
    /// Build a command from a decoded frame.
    ///
    /// Returns `None` when the first element is missing, not a string,
    /// or not a recognized command name. All three cases are treated the
    /// same way: unknown command, dropped.
    pub fn from_frame(frame: Vec<Value>) -> Option<Self> {
        let name = frame.first()?.as_str().and_then(CommandName::parse)?;
        let args = frame.into_iter().skip(1).collect();
        Some(Self { name, args })
    }
}
