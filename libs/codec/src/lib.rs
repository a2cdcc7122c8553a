//! # Torq Decision Engine Codec
//!
//! Wire format between the engine and execution clients: newline-delimited
//! JSON, one object per line, tagged by a `type` field.
//!
//! ## Inbound
//! - `market_data`, `strategy_status`, `instrument_registration`
//! - `trade_entry`, `trade_completed`, `command_ack`, `heartbeat`
//!
//! Every inbound line is validated once here. A line that fails decoding is
//! reported as a recoverable [`ProtocolError`]; the connection stays up.
//!
//! ## Outbound
//! - `command` with verbs `go_long`, `go_short`, `close_position`, `update_stop`
//! - `heartbeat`
//!
//! ## Monitoring
//! - `engine_status` envelopes for dashboard clients
//!
//! ## What This Crate Does NOT Contain
//! - Socket handling (belongs in network/)
//! - Domain state (belongs in libs/types)

pub mod error;
pub mod framing;
pub mod inbound;
pub mod outbound;
pub mod status;

pub use error::ProtocolError;
pub use framing::{check_line_length, decode_line, encode_line, encode_value};
pub use inbound::{
    AckStatus, CommandAck, Inbound, PositionReport, Registration, TradeCompleted, TradeEntry,
    INBOUND_TYPES,
};
pub use outbound::{CommandKind, CommandMessage, OutboundMessage};
pub use status::{heartbeat_message, status_message, ENGINE_STATUS};
