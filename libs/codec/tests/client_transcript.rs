//! Decoding a recorded execution-client session line by line

use chrono::{TimeZone, Utc};
use codec::{decode_line, AckStatus, Inbound, ProtocolError};
use rust_decimal_macros::dec;
use types::Direction;

const TRANSCRIPT: &str = r#"{"type":"instrument_registration","instrument":"ES","account":"sim-01","client":"nt8"}
{"type":"heartbeat"}
{"type":"market_data","instrument":"ES","timestamp":"2025-03-14T14:30:00Z","price":4500.25,"volume":120,"bid":4500.0,"ask":4500.5}
{"type":"market_data","instrument":"ES","price":4500.5}
{"type":"market_data","instrument":"ES","price":-1}
{"type":"trade_entry","instrument":"ES","side":"Buy","quantity":1,"price":4500.5,"command_id":1}
{"type":"command_ack","instrument":"ES","command_id":2,"status":"rejected","reason":"stop through market"}
{"type":"strategy_status","instrument":"ES","position_size":1,"market_position":"Long","average_price":4500.5}
garbage
{"type":"trade_completed","instrument":"ES","side":"long","quantity":1,"entry_price":4500.5,"exit_price":4510.0,"exit_reason":"Profit target","command_id":3}
{"type":"order_book","instrument":"ES"}
"#;

#[test]
fn test_transcript_decodes_valid_lines_and_reports_the_rest() {
    let now = Utc.with_ymd_and_hms(2025, 3, 14, 14, 31, 0).unwrap();
    let results: Vec<Result<Inbound, ProtocolError>> =
        TRANSCRIPT.lines().map(|line| decode_line(line, now)).collect();

    assert_eq!(results.len(), 11);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 8);

    match &results[0] {
        Ok(Inbound::Registration(registration)) => {
            assert_eq!(registration.instrument.as_str(), "ES");
            assert_eq!(registration.account.as_deref(), Some("sim-01"));
        }
        other => panic!("expected registration, got {:?}", other),
    }
    assert!(matches!(results[1], Ok(Inbound::Heartbeat)));

    let Ok(Inbound::MarketData(full)) = &results[2] else {
        panic!("expected market data");
    };
    assert_eq!(full.price, dec!(4500.25));
    assert_eq!(full.quality, 1.0);

    // Missing volume, bid and ask are repaired and the quality drops
    let Ok(Inbound::MarketData(sparse)) = &results[3] else {
        panic!("expected market data");
    };
    assert_eq!(sparse.timestamp, now);
    assert_eq!(sparse.bid, dec!(4500.5));
    assert!(sparse.quality < 1.0);

    assert!(results[4].is_err());

    let Ok(Inbound::TradeEntry(entry)) = &results[5] else {
        panic!("expected trade entry");
    };
    assert_eq!(entry.side, Direction::Long);
    assert_eq!(entry.command_id, Some(1));

    let Ok(Inbound::CommandAck(ack)) = &results[6] else {
        panic!("expected ack");
    };
    assert_eq!(ack.status, AckStatus::Rejected);

    let Ok(Inbound::StrategyStatus(report)) = &results[7] else {
        panic!("expected strategy status");
    };
    assert_eq!(report.size, 1);

    assert!(matches!(results[8], Err(ProtocolError::Malformed { .. })));

    let Ok(Inbound::TradeCompleted(completed)) = &results[9] else {
        panic!("expected trade completed");
    };
    assert_eq!(completed.exit_price - completed.entry_price, dec!(9.5));

    assert!(matches!(results[10], Err(ProtocolError::UnknownType { .. })));
}

#[test]
fn test_every_decoded_message_names_its_instrument() {
    let now = Utc::now();
    for line in TRANSCRIPT.lines() {
        if let Ok(message) = decode_line(line, now) {
            let instrument = message.instrument().map(|i| i.as_str());
            match message {
                Inbound::Heartbeat => assert!(instrument.is_none()),
                _ => assert_eq!(instrument, Some("ES")),
            }
        }
    }
}
