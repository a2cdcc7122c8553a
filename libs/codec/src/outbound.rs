//! Outbound commands to the venue execution client

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::{Direction, InstrumentId};

/// Command verbs understood by the execution client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    GoLong,
    GoShort,
    ClosePosition,
    UpdateStop,
}

impl CommandKind {
    /// Entry verb for a direction; `Hold` has none
    pub fn entry_for(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Long => Some(CommandKind::GoLong),
            Direction::Short => Some(CommandKind::GoShort),
            Direction::Hold => None,
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(self, CommandKind::GoLong | CommandKind::GoShort)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::GoLong => "go_long",
            CommandKind::GoShort => "go_short",
            CommandKind::ClosePosition => "close_position",
            CommandKind::UpdateStop => "update_stop",
        }
    }
}

/// One trading command
///
/// Price fields are always present on the wire, `null` when not applicable
/// to the verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: CommandKind,
    pub command_id: u64,
    pub instrument: InstrumentId,
    pub quantity: u64,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Every line the engine writes to an execution client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Command(CommandMessage),
    Heartbeat { timestamp: DateTime<Utc> },
}

impl OutboundMessage {
    pub fn command_id(&self) -> Option<u64> {
        match self {
            OutboundMessage::Command(command) => Some(command.command_id),
            OutboundMessage::Heartbeat { .. } => None,
        }
    }
}

impl From<CommandMessage> for OutboundMessage {
    fn from(command: CommandMessage) -> Self {
        OutboundMessage::Command(command)
    }
}
