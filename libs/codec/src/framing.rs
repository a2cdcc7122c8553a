//! Newline-delimited JSON framing
//!
//! One JSON object per line. Decoding dispatches on the `type` tag, so an
//! unknown tag is reported as [`ProtocolError::UnknownType`] rather than a
//! generic parse failure.

use crate::error::ProtocolError;
use crate::inbound::{
    CommandAckWire, Inbound, MarketDataWire, RegistrationWire, StrategyStatusWire,
    TradeCompletedWire, TradeEntryWire,
};
use crate::outbound::OutboundMessage;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Characters of an offending line kept in error messages
const EXCERPT_CHARS: usize = 120;

fn excerpt(line: &str) -> String {
    line.chars().take(EXCERPT_CHARS).collect()
}

fn parse_wire<T: DeserializeOwned>(value: Value, line: &str) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed {
        excerpt: excerpt(line),
        source,
    })
}

/// Reject lines longer than `max` bytes before any parsing
pub fn check_line_length(len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::MessageTooLarge { size: len, max });
    }
    Ok(())
}

/// Decode and validate one inbound line
///
/// `now` stamps messages that arrive without a timestamp.
pub fn decode_line(line: &str, now: DateTime<Utc>) -> Result<Inbound, ProtocolError> {
    let line = line.trim();
    let value: Value = serde_json::from_str(line).map_err(|source| ProtocolError::Malformed {
        excerpt: excerpt(line),
        source,
    })?;

    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::invalid("message", "missing string field 'type'"))?
        .to_string();

    let inbound = match message_type.as_str() {
        "market_data" => Inbound::MarketData(parse_wire::<MarketDataWire>(value, line)?.validate(now)?),
        "strategy_status" => {
            Inbound::StrategyStatus(parse_wire::<StrategyStatusWire>(value, line)?.validate(now)?)
        }
        "instrument_registration" => {
            Inbound::Registration(parse_wire::<RegistrationWire>(value, line)?.validate()?)
        }
        "trade_entry" => Inbound::TradeEntry(parse_wire::<TradeEntryWire>(value, line)?.validate(now)?),
        "trade_completed" => {
            Inbound::TradeCompleted(parse_wire::<TradeCompletedWire>(value, line)?.validate(now)?)
        }
        "command_ack" => Inbound::CommandAck(parse_wire::<CommandAckWire>(value, line)?.validate()?),
        "heartbeat" => Inbound::Heartbeat,
        _ => return Err(ProtocolError::UnknownType { message_type }),
    };

    tracing::trace!(message_type = %message_type, "decoded inbound line");
    Ok(inbound)
}

/// Encode one outbound message as a newline-terminated line
pub fn encode_line(message: &OutboundMessage) -> Result<String, ProtocolError> {
    encode_value(message)
}

/// Encode any serializable value as a newline-terminated line
pub fn encode_value<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::AckStatus;
    use crate::outbound::{CommandKind, CommandMessage};
    use rust_decimal_macros::dec;
    use types::{Direction, InstrumentId};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-14T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_market_data_full() {
        let line = r#"{"type":"market_data","instrument":"ES 06-25","price":4500.25,"volume":1200,"bid":4500.0,"ask":4500.5,"indicators":{"momentum":0.4,"volatility":1.2},"timestamp":"2025-03-14T14:59:59Z"}"#;
        let Inbound::MarketData(snapshot) = decode_line(line, now()).unwrap() else {
            panic!("expected market data");
        };
        assert_eq!(snapshot.instrument.as_str(), "ES 06-25");
        assert_eq!(snapshot.price, dec!(4500.25));
        assert_eq!(snapshot.quality, 1.0);
        assert_eq!(snapshot.indicator("momentum"), Some(0.4));
        assert_ne!(snapshot.timestamp, now());
    }

    #[test]
    fn test_market_data_missing_fields_lower_quality() {
        let line = r#"{"type":"market_data","instrument":"NQ","price":18000,"indicators":{"oscillator":null}}"#;
        let Inbound::MarketData(snapshot) = decode_line(line, now()).unwrap() else {
            panic!("expected market data");
        };
        // volume, bid, ask and one null indicator repaired
        assert!((snapshot.quality - 0.6).abs() < 1e-9);
        assert_eq!(snapshot.bid, dec!(18000));
        assert_eq!(snapshot.ask, dec!(18000));
        assert!(snapshot.indicators.is_empty());
        assert_eq!(snapshot.timestamp, now());
    }

    #[test]
    fn test_market_data_rejects_bad_price() {
        let missing = r#"{"type":"market_data","instrument":"ES"}"#;
        assert!(matches!(
            decode_line(missing, now()),
            Err(ProtocolError::InvalidField { message_type: "market_data", .. })
        ));

        let negative = r#"{"type":"market_data","instrument":"ES","price":-1}"#;
        assert!(decode_line(negative, now()).is_err());

        let empty_instrument = r#"{"type":"market_data","instrument":"  ","price":10}"#;
        assert!(decode_line(empty_instrument, now()).is_err());
    }

    #[test]
    fn test_strategy_status_signed_and_unsigned() {
        let signed = r#"{"type":"strategy_status","instrument":"ES","position_size":-2,"average_price":4500}"#;
        let Inbound::StrategyStatus(report) = decode_line(signed, now()).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(report.size, -2);
        assert_eq!(report.average_price, Some(dec!(4500)));

        let unsigned = r#"{"type":"strategy_status","instrument":"ES","position":3,"market_position":"Short"}"#;
        let Inbound::StrategyStatus(report) = decode_line(unsigned, now()).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(report.size, -3);

        let flat = r#"{"type":"strategy_status","instrument":"ES","position_size":0,"average_price":0}"#;
        let Inbound::StrategyStatus(report) = decode_line(flat, now()).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(report.size, 0);
        assert_eq!(report.average_price, None);
    }

    #[test]
    fn test_trade_messages() {
        let entry = r#"{"type":"trade_entry","instrument":"ES","side":"Buy","quantity":1,"price":4500.25,"command_id":7}"#;
        let Inbound::TradeEntry(entry) = decode_line(entry, now()).unwrap() else {
            panic!("expected entry");
        };
        assert_eq!(entry.side, Direction::Long);
        assert_eq!(entry.command_id, Some(7));

        let completed = r#"{"type":"trade_completed","instrument":"ES","side":"long","quantity":1,"entry_price":4500,"exit_price":4490,"exit_reason":"Stop loss"}"#;
        let Inbound::TradeCompleted(completed) = decode_line(completed, now()).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(completed.exit_price, dec!(4490));
        assert_eq!(completed.pnl, None);

        let bad_side = r#"{"type":"trade_entry","instrument":"ES","side":"sideways","quantity":1,"price":1}"#;
        assert!(decode_line(bad_side, now()).is_err());
    }

    #[test]
    fn test_ack_registration_heartbeat() {
        let ack = r#"{"type":"command_ack","instrument":"ES","command_id":3,"status":"rejected","reason":"margin"}"#;
        let Inbound::CommandAck(ack) = decode_line(ack, now()).unwrap() else {
            panic!("expected ack");
        };
        assert_eq!(ack.status, AckStatus::Rejected);

        let registration = r#"{"type":"instrument_registration","instrument":"CL","account":"Sim101"}"#;
        let inbound = decode_line(registration, now()).unwrap();
        assert_eq!(inbound.instrument().map(|i| i.as_str()), Some("CL"));

        assert_eq!(decode_line(r#"{"type":"heartbeat"}"#, now()).unwrap(), Inbound::Heartbeat);
    }

    #[test]
    fn test_malformed_and_unknown() {
        let err = decode_line("{not json", now()).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
        assert!(err.is_recoverable());

        let err = decode_line(r#"{"type":"order_book","instrument":"ES"}"#, now()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType { ref message_type } if message_type == "order_book"));

        let err = decode_line(r#"{"instrument":"ES"}"#, now()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { .. }));

        let err = decode_line(r#"{"type":"trade_entry","instrument":"ES"}"#, now()).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_line_length_guard() {
        assert!(check_line_length(10, 10).is_ok());
        let err = check_line_length(11, 10).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_encode_command_line() {
        let command = CommandMessage {
            command: CommandKind::GoLong,
            command_id: 42,
            instrument: InstrumentId::new("ES").unwrap(),
            quantity: 1,
            price: Some(dec!(4500.25)),
            stop_loss: Some(dec!(4495.25)),
            target: Some(dec!(4510.25)),
            reason: "strong long".to_string(),
            timestamp: now(),
        };
        let line = encode_line(&command.into()).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "command");
        assert_eq!(value["command"], "go_long");
        assert_eq!(value["command_id"], 42);
        assert_eq!(value["instrument"], "ES");
        assert_eq!(value["stop_loss"], 4495.25);
    }

    #[test]
    fn test_encode_close_keeps_null_fields() {
        let command = CommandMessage {
            command: CommandKind::ClosePosition,
            command_id: 1,
            instrument: InstrumentId::new("ES").unwrap(),
            quantity: 2,
            price: None,
            stop_loss: None,
            target: None,
            reason: "trailing".to_string(),
            timestamp: now(),
        };
        let line = encode_line(&OutboundMessage::Command(command)).unwrap();
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert!(value["stop_loss"].is_null());
        assert!(value.get("target").is_some());
    }
}
