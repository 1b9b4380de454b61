//! Framing and CRC Tests
//!
//! Wire layout of requests, checksum placement and received-frame parsing.
//! Run with: cargo test --no-default-features --features std --test packet_tests

use dtu_firmware::command::encode_info_request;
use dtu_firmware::config::InverterConfig;
use dtu_firmware::crc::{check_crc8, crc16, crc8};
use dtu_firmware::inverter::InverterLink;
use dtu_firmware::packet::{RadioPacket, TxBuffer, ALL_FRAMES, HEADER_LEN, TX_REQ_INFO};
use dtu_firmware::types::{DtuSerial, InfoCmd, InverterSerial};

const REALTIME_REQUEST: [u8; 27] = [
    0x15, 0x72, 0x22, 0x00, 0x03, 0x81, 0x00, 0x17, 0x65, 0x80, 0x0b, 0x00, 0x65, 0x53, 0xf1, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x77, 0x8b,
];

fn link() -> InverterLink {
    InverterLink::new(
        0,
        InverterConfig {
            serial: InverterSerial::new(0x1141_7222_0003).unwrap(),
            ..InverterConfig::default()
        },
    )
}

// =============================================================================
// Request Layout Tests
// =============================================================================

#[test]
fn realtime_request_matches_reference_frame() {
    let mut tx = TxBuffer::new();
    let enc = encode_info_request(
        &mut tx,
        &link(),
        DtuSerial::DEFAULT,
        InfoCmd::RealTimeRunData,
        1_700_000_000,
        0,
    );
    assert_eq!(enc.len, 24);
    assert!(enc.crc16);

    let len = tx.finalize(enc.len, enc.crc16);
    assert_eq!(len, 27);
    assert_eq!(tx.frame(len), &REALTIME_REQUEST);
}

#[test]
fn crc16_covers_payload_only() {
    let payload = &REALTIME_REQUEST[HEADER_LEN..24];
    assert_eq!(crc16(payload), 0x0577);
}

#[test]
fn crc8_covers_everything_before_it() {
    assert_eq!(crc8(&REALTIME_REQUEST[..26]), 0x8b);
    assert!(check_crc8(&REALTIME_REQUEST));
}

#[test]
fn short_frame_gets_crc8_only() {
    let mut tx = TxBuffer::new();
    tx.build_header([0x72, 0x22, 0x00, 0x03], [0x81, 0x00, 0x17, 0x65], TX_REQ_INFO, 0x81);
    let len = tx.finalize(HEADER_LEN, true);
    assert_eq!(len, 11);
    assert_eq!(tx.byte(10), 0x34);
    assert!(check_crc8(tx.frame(len)));
}

#[test]
fn finalize_never_exceeds_frame_size() {
    let mut tx = TxBuffer::new();
    tx.build_header([1, 2, 3, 4], [5, 6, 7, 8], TX_REQ_INFO, ALL_FRAMES);
    let len = tx.finalize(40, true);
    assert_eq!(len, 32);
    assert!(check_crc8(tx.frame(len)));
}

// =============================================================================
// Received Frame Tests
// =============================================================================

#[test]
fn received_frame_fields() {
    let mut raw = [0u8; 16];
    raw[0] = 0x95;
    raw[1..5].copy_from_slice(&[0x72, 0x22, 0x00, 0x03]);
    raw[5..9].copy_from_slice(&[0x81, 0x00, 0x17, 0x65]);
    raw[9] = 0x83;
    raw[15] = crc8(&raw[..15]);

    let frame = RadioPacket::new(&raw, 61, -64, 120);
    assert_eq!(frame.message_id(), 0x95);
    assert_eq!(frame.frame_index(), 0x83);
    assert!(frame.is_from(&[0x72, 0x22, 0x00, 0x03]));
    assert!(!frame.is_from(&[0x72, 0x22, 0x00, 0x04]));
    assert_eq!(frame.payload().len(), 5);
    assert!(frame.crc_ok());
}

#[test]
fn oversized_frame_is_truncated() {
    let raw = [0xAAu8; 40];
    let frame = RadioPacket::new(&raw, 3, -75, 0);
    assert_eq!(frame.len(), 32);
}

#[test]
fn header_only_frame_has_no_sender() {
    let raw = [0x95, 0x72, 0x22, 0x00, 0x03, 0, 0, 0, 0, 0x81];
    let frame = RadioPacket::new(&raw, 3, -75, 0);
    assert!(!frame.is_from(&[0x72, 0x22, 0x00, 0x03]));
    assert!(frame.payload().is_empty());
}

#[test]
fn corrupted_frame_fails_crc() {
    let mut raw = REALTIME_REQUEST;
    raw[12] ^= 0x01;
    assert!(!RadioPacket::new(&raw, 3, -64, 0).crc_ok());
}
