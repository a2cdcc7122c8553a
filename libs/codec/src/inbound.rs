//! Inbound messages from the venue execution client
//!
//! Every line is decoded into a wire struct, then validated once into an
//! [`Inbound`] variant. Downstream stages never re-check these fields.
//!
//! Missing optional market fields are tolerated: they are filled from the last
//! price and the snapshot's quality score is lowered instead of rejecting it.

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use types::{Direction, InstrumentId, MarketSnapshot};

/// Quality lost per missing or repaired market field
const QUALITY_PENALTY_PER_FIELD: f64 = 0.1;

/// Message type tags accepted on the inbound stream
pub const INBOUND_TYPES: &[&str] = &[
    "market_data",
    "strategy_status",
    "instrument_registration",
    "trade_entry",
    "trade_completed",
    "command_ack",
    "heartbeat",
];

/// Raw `market_data` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataWire {
    pub instrument: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub indicators: BTreeMap<String, Option<f64>>,
}

/// Raw `strategy_status` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatusWire {
    pub instrument: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(alias = "position")]
    pub position_size: i64,
    /// Optional "long" / "short" / "flat" when the venue reports unsigned size
    #[serde(default)]
    pub market_position: Option<String>,
    #[serde(default)]
    pub average_price: Option<Decimal>,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
}

/// Raw `instrument_registration` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationWire {
    pub instrument: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
}

/// Raw `trade_entry` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntryWire {
    pub instrument: String,
    pub side: String,
    pub quantity: u64,
    pub price: Decimal,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command_id: Option<u64>,
}

/// Raw `trade_completed` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCompletedWire {
    pub instrument: String,
    pub side: String,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    #[serde(default)]
    pub pnl: Option<Decimal>,
    #[serde(default)]
    pub exit_reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command_id: Option<u64>,
}

/// Raw `command_ack` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAckWire {
    pub instrument: String,
    pub command_id: u64,
    #[serde(default = "default_ack_status")]
    pub status: AckStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_ack_status() -> AckStatus {
    AckStatus::Accepted
}

/// Venue verdict on a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Accepted,
    Rejected,
    Filled,
}

/// Externally reported position, authoritative for reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReport {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    /// Signed size, 0 when flat
    pub size: i64,
    pub average_price: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub instrument: InstrumentId,
    pub account: Option<String>,
    pub client: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeEntry {
    pub instrument: InstrumentId,
    pub side: Direction,
    pub quantity: u64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub command_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeCompleted {
    pub instrument: InstrumentId,
    pub side: Direction,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Venue-computed P&L, preferred over a local computation when present
    pub pnl: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub command_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub instrument: InstrumentId,
    pub command_id: u64,
    pub status: AckStatus,
    pub reason: Option<String>,
}

/// Validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    MarketData(MarketSnapshot),
    StrategyStatus(PositionReport),
    Registration(Registration),
    TradeEntry(TradeEntry),
    TradeCompleted(TradeCompleted),
    CommandAck(CommandAck),
    Heartbeat,
}

impl Inbound {
    /// Instrument the message concerns, if any
    pub fn instrument(&self) -> Option<&InstrumentId> {
        match self {
            Inbound::MarketData(snapshot) => Some(&snapshot.instrument),
            Inbound::StrategyStatus(report) => Some(&report.instrument),
            Inbound::Registration(registration) => Some(&registration.instrument),
            Inbound::TradeEntry(entry) => Some(&entry.instrument),
            Inbound::TradeCompleted(completed) => Some(&completed.instrument),
            Inbound::CommandAck(ack) => Some(&ack.instrument),
            Inbound::Heartbeat => None,
        }
    }
}

fn parse_side(message_type: &'static str, side: &str) -> Result<Direction, ProtocolError> {
    match side.trim().to_ascii_lowercase().as_str() {
        "long" | "buy" => Ok(Direction::Long),
        "short" | "sell" | "sellshort" => Ok(Direction::Short),
        other => Err(ProtocolError::invalid(
            message_type,
            format!("unrecognized side '{}'", other),
        )),
    }
}

fn positive(
    message_type: &'static str,
    field: &str,
    value: Decimal,
) -> Result<Decimal, ProtocolError> {
    if value <= Decimal::ZERO {
        return Err(ProtocolError::invalid(
            message_type,
            format!("{} must be positive, got {}", field, value),
        ));
    }
    Ok(value)
}

impl MarketDataWire {
    pub fn validate(self, now: DateTime<Utc>) -> Result<MarketSnapshot, ProtocolError> {
        const TYPE: &str = "market_data";
        let instrument = InstrumentId::new(&self.instrument)?;
        let price = self
            .price
            .ok_or_else(|| ProtocolError::invalid(TYPE, "price is required"))?;
        let price = positive(TYPE, "price", price)?;

        let mut repaired = 0usize;

        let volume = match self.volume {
            Some(v) if v >= Decimal::ZERO => v,
            _ => {
                repaired += 1;
                Decimal::ZERO
            }
        };

        let mut bid = match self.bid {
            Some(b) if b > Decimal::ZERO => b,
            _ => {
                repaired += 1;
                price
            }
        };
        let mut ask = match self.ask {
            Some(a) if a > Decimal::ZERO => a,
            _ => {
                repaired += 1;
                price
            }
        };
        if bid > ask {
            repaired += 1;
            bid = price;
            ask = price;
        }

        let mut indicators = BTreeMap::new();
        for (key, value) in self.indicators {
            match value {
                Some(v) if v.is_finite() => {
                    indicators.insert(key, v);
                }
                _ => repaired += 1,
            }
        }

        let quality = (1.0 - QUALITY_PENALTY_PER_FIELD * repaired as f64).max(0.0);

        let mut snapshot = MarketSnapshot::new(
            instrument,
            self.timestamp.unwrap_or(now),
            price,
            volume,
            bid,
            ask,
        )
        .with_quality(quality);
        snapshot.indicators = indicators;
        Ok(snapshot)
    }
}

impl StrategyStatusWire {
    pub fn validate(self, now: DateTime<Utc>) -> Result<PositionReport, ProtocolError> {
        const TYPE: &str = "strategy_status";
        let instrument = InstrumentId::new(&self.instrument)?;

        let market_position = self.market_position.as_deref().map(str::to_ascii_lowercase);
        let size = match market_position.as_deref() {
            Some("flat") => 0,
            Some("long") => self.position_size.saturating_abs(),
            Some("short") => -self.position_size.saturating_abs(),
            Some(other) => {
                return Err(ProtocolError::invalid(
                    TYPE,
                    format!("unrecognized market_position '{}'", other),
                ))
            }
            None => self.position_size,
        };

        if size != 0 {
            if let Some(avg) = self.average_price {
                positive(TYPE, "average_price", avg)?;
            }
        }

        Ok(PositionReport {
            instrument,
            timestamp: self.timestamp.unwrap_or(now),
            size,
            average_price: self.average_price.filter(|p| *p > Decimal::ZERO),
            last_price: self.last_price.filter(|p| *p > Decimal::ZERO),
            realized_pnl: self.realized_pnl,
        })
    }
}

impl RegistrationWire {
    pub fn validate(self) -> Result<Registration, ProtocolError> {
        Ok(Registration {
            instrument: InstrumentId::new(&self.instrument)?,
            account: self.account,
            client: self.client,
        })
    }
}

impl TradeEntryWire {
    pub fn validate(self, now: DateTime<Utc>) -> Result<TradeEntry, ProtocolError> {
        const TYPE: &str = "trade_entry";
        if self.quantity == 0 {
            return Err(ProtocolError::invalid(TYPE, "quantity must be non-zero"));
        }
        Ok(TradeEntry {
            instrument: InstrumentId::new(&self.instrument)?,
            side: parse_side(TYPE, &self.side)?,
            quantity: self.quantity,
            price: positive(TYPE, "price", self.price)?,
            timestamp: self.timestamp.unwrap_or(now),
            command_id: self.command_id,
        })
    }
}

impl TradeCompletedWire {
    pub fn validate(self, now: DateTime<Utc>) -> Result<TradeCompleted, ProtocolError> {
        const TYPE: &str = "trade_completed";
        if self.quantity == 0 {
            return Err(ProtocolError::invalid(TYPE, "quantity must be non-zero"));
        }
        Ok(TradeCompleted {
            instrument: InstrumentId::new(&self.instrument)?,
            side: parse_side(TYPE, &self.side)?,
            quantity: self.quantity,
            entry_price: positive(TYPE, "entry_price", self.entry_price)?,
            exit_price: positive(TYPE, "exit_price", self.exit_price)?,
            pnl: self.pnl,
            exit_reason: self.exit_reason,
            timestamp: self.timestamp.unwrap_or(now),
            command_id: self.command_id,
        })
    }
}

impl CommandAckWire {
    pub fn validate(self) -> Result<CommandAck, ProtocolError> {
        Ok(CommandAck {
            instrument: InstrumentId::new(&self.instrument)?,
            command_id: self.command_id,
            status: self.status,
            reason: self.reason,
        })
    }
}
