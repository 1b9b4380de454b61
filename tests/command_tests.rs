//! Command Encoder Tests
//!
//! Device control, info and channel commands for both inverter dialects.
//! Run with: cargo test --no-default-features --features std --test command_tests

use dtu_firmware::command::{
    dred_code, encode_device_control, encode_info_request, encode_single_frame_request,
    encode_switch_channel, DredCode, EncodeError,
};
use dtu_firmware::config::InverterConfig;
use dtu_firmware::inverter::InverterLink;
use dtu_firmware::packet::{TxBuffer, TX_REQ_DEVCONTROL, TX_REQ_DREDCONTROL, TX_REQ_INFO};
use dtu_firmware::types::{
    DevControl, DtuSerial, Generation, InfoCmd, InverterSerial, LimitKind, PowerLimit,
};

fn link(generation: Generation, rated_power_w: u16) -> InverterLink {
    InverterLink::new(
        0,
        InverterConfig {
            serial: InverterSerial::new(0x1161_1234_5678).unwrap(),
            generation,
            rated_power_w,
            ..InverterConfig::default()
        },
    )
}

fn limit(watts: u16, kind: LimitKind) -> DevControl {
    DevControl::ActivePowerLimit(PowerLimit::from_whole(watts, kind))
}

// =============================================================================
// Generation X Tests
// =============================================================================

#[test]
fn genx_power_limit_layout() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    let enc = encode_device_control(
        &mut tx,
        &iv,
        DtuSerial::DEFAULT,
        limit(400, LimitKind::AbsoluteNonPersistent),
    )
    .unwrap();

    assert_eq!(enc.len, 16);
    assert!(enc.crc16);
    assert_eq!(tx.byte(0), TX_REQ_DEVCONTROL);
    assert_eq!(&tx.frame(16)[1..5], &[0x12, 0x34, 0x56, 0x78]);
    assert_eq!(tx.byte(9), 0x81);
    assert_eq!(&tx.frame(16)[10..16], &[0x0b, 0x00, 0x0f, 0xa0, 0x00, 0x00]);
}

#[test]
fn genx_persistent_relative_setting() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, limit(50, LimitKind::RelativePersistent)).unwrap();
    assert_eq!(&tx.frame(16)[12..16], &[0x01, 0xf4, 0x01, 0x01]);
}

#[test]
fn genx_simple_commands_have_no_value() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, DevControl::TurnOff).unwrap();
    assert_eq!(enc.len, 12);
    assert_eq!(&tx.frame(12)[10..12], &[0x01, 0x00]);

    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, DevControl::Restart).unwrap();
    assert_eq!(enc.len, 12);
    assert_eq!(tx.byte(10), 0x02);
}

#[test]
fn genx_alarm_request_carries_alarm_id() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    let enc = encode_info_request(&mut tx, &iv, DtuSerial::DEFAULT, InfoCmd::AlarmData, 0x1234_5678, 7);
    assert_eq!(enc.len, 24);
    assert_eq!(&tx.frame(24)[10..20], &[0x11, 0x00, 0x12, 0x34, 0x56, 0x78, 0, 0, 0x00, 0x07]);
}

#[test]
fn single_frame_request() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    let enc = encode_single_frame_request(&mut tx, &iv, DtuSerial::DEFAULT, 2);
    assert_eq!(enc.len, 10);
    assert_eq!(tx.byte(0), TX_REQ_INFO);
    assert_eq!(tx.byte(9), 0x82);
    // CRC16 is requested but the frame is too short to carry it
    assert_eq!(tx.finalize(enc.len, enc.crc16), 11);
}

#[test]
fn switch_channel_command() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::X, 0);
    let enc = encode_switch_channel(&mut tx, &iv, DtuSerial::DEFAULT, 0x14);
    assert_eq!(enc.len, 14);
    assert_eq!(tx.byte(0), 0x56);
    assert_eq!(tx.byte(9), 0x02);
    assert_eq!(&tx.frame(14)[10..14], &[0x15, 0x21, 0x14, 0x14]);
}

// =============================================================================
// Generation Y Tests
// =============================================================================

#[test]
fn legacy_on_off() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y2, 600);

    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, DevControl::TurnOn).unwrap();
    assert_eq!(enc.len, 11);
    assert!(!enc.crc16);
    assert_eq!(&tx.frame(11)[9..11], &[0x55, 0xAA]);

    encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, DevControl::TurnOff).unwrap();
    assert_eq!(&tx.frame(11)[9..11], &[0xAA, 0x55]);
}

#[test]
fn legacy_persistent_limit_uses_dred() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y1, 1000);
    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, limit(300, LimitKind::AbsolutePersistent)).unwrap();
    assert_eq!(enc.len, 11);
    assert_eq!(tx.byte(0), TX_REQ_DREDCONTROL);
    assert_eq!(&tx.frame(11)[9..11], &[0xAA, 0x55]);
}

#[test]
fn legacy_persistent_limit_without_change_is_not_sent() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y2, 1000);
    let result = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, limit(1500, LimitKind::AbsolutePersistent));
    assert_eq!(result, Err(EncodeError::NoDredChange));
}

#[test]
fn legacy_absolute_non_persistent_limit() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y2, 0);
    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, limit(400, LimitKind::AbsoluteNonPersistent)).unwrap();
    assert_eq!(enc.len, 14);
    assert_eq!(&tx.frame(14)[9..14], &[0x5A, 0x5A, 100, 0x0f, 0xa0]);
}

#[test]
fn legacy_relative_non_persistent_limit() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y2, 600);
    let enc = encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, limit(50, LimitKind::RelativeNonPersistent)).unwrap();
    assert_eq!(enc.len, 14);
    assert_eq!(&tx.frame(14)[9..14], &[0x5A, 0x5A, 50, 0x0b, 0xb8]);

    let unknown = link(Generation::Y2, 0);
    let enc = encode_device_control(&mut tx, &unknown, DtuSerial::DEFAULT, limit(50, LimitKind::RelativeNonPersistent)).unwrap();
    assert_eq!(enc.len, 12);
}

#[test]
fn legacy_rejects_unsupported_commands() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y1, 600);
    assert_eq!(
        encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, DevControl::Lock),
        Err(EncodeError::Unsupported(3))
    );
    let reactive = DevControl::ReactivePowerLimit(PowerLimit::from_whole(10, LimitKind::AbsoluteNonPersistent));
    assert_eq!(
        encode_device_control(&mut tx, &iv, DtuSerial::DEFAULT, reactive),
        Err(EncodeError::Unsupported(12))
    );
}

#[test]
fn legacy_info_request() {
    let mut tx = TxBuffer::new();
    let iv = link(Generation::Y1, 0);
    let enc = encode_info_request(&mut tx, &iv, DtuSerial::DEFAULT, InfoCmd::MiChannel1, 1_700_000_000, 0);
    assert_eq!(enc.len, 10);
    assert!(!enc.crc16);
    assert_eq!(tx.byte(0), 0x09);
    assert_eq!(tx.byte(9), 0x09);
}

// =============================================================================
// DRED Table Tests
// =============================================================================

#[test]
fn dred_shutdown_needs_unknown_rating() {
    assert_eq!(dred_code(0, None), Some(DredCode::Shutdown));
    assert_eq!(dred_code(0, Some(800)), Some(DredCode::LimitLow));
}

#[test]
fn dred_bands() {
    assert_eq!(dred_code(199, Some(800)), Some(DredCode::LimitLow));
    assert_eq!(dred_code(600, Some(800)), Some(DredCode::LimitMid));
    assert_eq!(dred_code(800, Some(800)), Some(DredCode::LimitHigh));
    assert_eq!(dred_code(1200, Some(800)), None);
    assert_eq!(dred_code(1601, Some(800)), Some(DredCode::Unrestricted));
}

#[test]
fn dred_unknown_rating_limits_low() {
    assert_eq!(dred_code(5000, None), Some(DredCode::LimitLow));
}
