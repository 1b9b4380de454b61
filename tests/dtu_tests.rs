//! DTU Loop Tests
//!
//! End-to-end runs of the application core against scripted radios:
//! send scheduling, reassembly, retransmits, device control results and
//! the day/night gate.
//! Run with: cargo test --no-default-features --features std --test dtu_tests

use std::collections::VecDeque;

use dtu_firmware::command::Encoded;
use dtu_firmware::config::{DtuConfig, InverterConfig, SunConfig};
use dtu_firmware::dtu::{Dtu, PayloadSink};
use dtu_firmware::inverter::InverterLink;
use dtu_firmware::packet::{RadioPacket, TxBuffer};
use dtu_firmware::radio::queue::FrameQueue;
use dtu_firmware::radio::{PollResult, Radio, RadioError};
use dtu_firmware::scheduler::Trigger;
use dtu_firmware::types::{DevControl, DtuSerial, Generation, InfoCmd, InverterSerial, RadioBackend};

const SERIAL_A: u64 = 0x1141_7222_0003;
const SERIAL_B: u64 = 0x1161_1234_5678;
const ADDR_A: [u8; 4] = [0x72, 0x22, 0x00, 0x03];
const ADDR_B: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
const OTHER: [u8; 4] = [0x99, 0x99, 0x99, 0x99];

/// 2024-06-21 00:00 UTC, night in Berlin
const BERLIN_NIGHT: u32 = 1_718_928_000;
const NOON: u32 = 1_718_964_000;

// =============================================================================
// Test Doubles
// =============================================================================

/// Radio answering each request with the next scripted set of frames
#[derive(Default)]
struct ScriptedRadio {
    disabled: bool,
    tx: TxBuffer,
    queue: FrameQueue,
    sent: Vec<Vec<u8>>,
    script: VecDeque<Vec<RadioPacket>>,
    pending: Option<PollResult>,
}

impl ScriptedRadio {
    fn answer(&mut self, frames: Vec<RadioPacket>) {
        self.script.push_back(frames);
    }

    fn sent_to(&self, n: usize) -> [u8; 4] {
        let f = &self.sent[n];
        [f[1], f[2], f[3], f[4]]
    }
}

impl Radio for ScriptedRadio {
    fn tx_buffer(&mut self) -> &mut TxBuffer {
        &mut self.tx
    }

    fn dtu_serial(&self) -> DtuSerial {
        DtuSerial::DEFAULT
    }

    fn frames(&mut self) -> &mut FrameQueue {
        &mut self.queue
    }

    fn is_enabled(&self) -> bool {
        !self.disabled
    }

    fn is_chip_connected(&self) -> bool {
        !self.disabled
    }

    fn send_packet(
        &mut self,
        iv: &mut InverterLink,
        frame: Encoded,
        _now_ms: u32,
        _is_retransmit: bool,
    ) -> Result<(), RadioError> {
        if self.disabled {
            return Err(RadioError::HardwareAbsent);
        }
        let len = self.tx.finalize(frame.len, frame.crc16);
        self.sent.push(self.tx.frame(len).to_vec());
        iv.tx_count += 1;

        let frames = self.script.pop_front().unwrap_or_default();
        let mut result = PollResult::default();
        for f in frames {
            result.got_fragment = true;
            if self.queue.push(f, iv.generation()) == Ok(true) {
                result.got_last = true;
            }
        }
        if result.got_fragment {
            result.finished = true;
        } else {
            result.timed_out = true;
        }
        self.pending = Some(result);
        Ok(())
    }

    fn poll(&mut self, _now_ms: u32) -> PollResult {
        self.pending.take().unwrap_or_default()
    }

    fn is_busy(&self, _now_ms: u32) -> bool {
        false
    }
}

#[derive(Default)]
struct Recorder {
    frames: Vec<(u8, u8)>,
    zeroed: Vec<u8>,
    results: Vec<(u8, u8, bool)>,
}

impl PayloadSink for Recorder {
    fn on_frame(&mut self, iv: &InverterLink, frame: &RadioPacket) {
        self.frames.push((iv.index(), frame.frame_index()));
    }

    fn on_zero_values(&mut self, iv: &InverterLink) {
        self.zeroed.push(iv.index());
    }

    fn on_command_result(&mut self, iv: &InverterLink, cmd: u8, ok: bool) {
        self.results.push((iv.index(), cmd, ok));
    }
}

type TestDtu = Dtu<ScriptedRadio, ScriptedRadio, Recorder>;

fn frame(addr: [u8; 4], id: u8, index: u8) -> RadioPacket {
    let mut tx = TxBuffer::new();
    tx.build_header(addr, DtuSerial::DEFAULT.address_bytes(), id, index);
    tx.put(10, &[0x01, 0x02, 0x03, 0x04]);
    let len = tx.finalize(14, false);
    RadioPacket::new(tx.frame(len), 3, -64, 20)
}

fn inverter(serial: u64) -> InverterConfig {
    InverterConfig {
        serial: InverterSerial::new(serial).unwrap(),
        ..InverterConfig::default()
    }
}

fn dtu_with(config: DtuConfig, inverters: &[InverterConfig]) -> TestDtu {
    let mut dtu = Dtu::new(config, ScriptedRadio::default(), ScriptedRadio::default(), Recorder::default());
    for iv in inverters {
        dtu.add_inverter(iv.clone()).unwrap();
    }
    dtu.setup(0).unwrap();
    dtu
}

fn run(dtu: &mut TestDtu, from_ms: u32, to_ms: u32) {
    for t in from_ms..=to_ms {
        dtu.tick(t);
    }
}

// =============================================================================
// Send Scheduling
// =============================================================================

#[test]
fn nothing_sent_before_time_sync() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    run(&mut dtu, 1, 20);
    assert!(dtu.nrf_mut().sent.is_empty());

    dtu.set_timestamp(NOON);
    dtu.request_send();
    run(&mut dtu, 21, 25);
    assert_eq!(dtu.nrf_mut().sent.len(), 1);
    assert_eq!(dtu.nrf_mut().sent_to(0), ADDR_A);
}

#[test]
fn inverters_are_polled_round_robin() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A), inverter(SERIAL_B)]);
    dtu.set_timestamp(NOON);

    dtu.tick(1);
    dtu.tick(15_001);
    dtu.tick(30_001);

    let nrf = dtu.nrf_mut();
    assert_eq!(nrf.sent.len(), 3);
    assert_eq!(nrf.sent_to(0), ADDR_A);
    assert_eq!(nrf.sent_to(1), ADDR_B);
    assert_eq!(nrf.sent_to(2), ADDR_A);
}

#[test]
fn disabled_inverter_is_skipped() {
    let mut off = inverter(SERIAL_A);
    off.enabled = false;
    let mut dtu = dtu_with(DtuConfig::default(), &[off, inverter(SERIAL_B)]);
    dtu.set_timestamp(NOON);

    dtu.tick(1);
    dtu.tick(15_001);
    let nrf = dtu.nrf_mut();
    assert_eq!(nrf.sent.len(), 2);
    assert!(nrf.sent.iter().all(|f| f[1..5] == ADDR_B));
}

#[test]
fn sub_ghz_inverter_uses_cmt_radio() {
    let mut iv = inverter(SERIAL_A);
    iv.backend = RadioBackend::Cmt;
    let mut dtu = dtu_with(DtuConfig::default(), &[iv]);
    dtu.set_timestamp(NOON);
    dtu.tick(1);

    assert!(dtu.nrf_mut().sent.is_empty());
    assert_eq!(dtu.cmt_mut().sent.len(), 1);
}

#[test]
fn reconnect_restarts_sending() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.tick(5_000);
    dtu.on_reconnect();
    assert_eq!(dtu.scheduler().trigger("tickSend"), Some(Trigger::After(0)));
    assert!(dtu.scheduler().is_scheduled("stats"));
}

// =============================================================================
// Exchanges
// =============================================================================

#[test]
fn complete_response_is_forwarded() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    dtu.nrf_mut().answer(vec![
        frame(ADDR_A, 0x95, 0x01),
        frame(ADDR_A, 0x95, 0x02),
        frame(ADDR_A, 0x95, 0x83),
    ]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.statistics().complete, 1);
    assert_eq!(dtu.statistics().frames_received, 3);
    assert_eq!(dtu.sink().frames, vec![(0, 0x01), (0, 0x02), (0, 0x83)]);
    assert!(!dtu.is_exchange_active());
    assert_eq!(dtu.inverters().get(0).unwrap().last_rx_ts, NOON);
}

#[test]
fn missing_frame_is_requested_again() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x01), frame(ADDR_A, 0x95, 0x83)]);
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x02)]);

    run(&mut dtu, 1, 10);

    let nrf = dtu.nrf_mut();
    assert_eq!(nrf.sent.len(), 2);
    assert_eq!(nrf.sent[1][0], 0x15);
    assert_eq!(nrf.sent[1][9], 0x82);
    assert_eq!(dtu.statistics().retransmits, 1);
    assert_eq!(dtu.statistics().complete, 1);
    assert_eq!(dtu.statistics().partial_failures, 0);
}

#[test]
fn retransmits_are_bounded() {
    let config = DtuConfig {
        max_retransmits: 2,
        ..DtuConfig::default()
    };
    let mut dtu = dtu_with(config, &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x01), frame(ADDR_A, 0x95, 0x83)]);
    // the retransmit answers carry nothing useful
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x01)]);
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x01)]);

    run(&mut dtu, 1, 20);

    assert_eq!(dtu.nrf_mut().sent.len(), 3);
    assert_eq!(dtu.statistics().retransmits, 2);
    assert_eq!(dtu.statistics().partial_failures, 1);
    assert!(!dtu.is_exchange_active());
}

#[test]
fn silent_inverter_moves_to_next_channel() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);

    run(&mut dtu, 1, 3);

    assert_eq!(dtu.statistics().no_answer, 1);
    assert_eq!(dtu.inverters().get(0).unwrap().tx_channel, 1);
    assert!(!dtu.is_exchange_active());
}

#[test]
fn queued_request_finishes_on_completion() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    assert!(dtu.enqueue_command(0, InfoCmd::AlarmData));
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x81)]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.nrf_mut().sent[0][10], 0x11);
    assert_eq!(dtu.inverters().get(0).unwrap().queued_len(), 0);
    assert_eq!(dtu.inverters().get(0).unwrap().queued_cmd(), InfoCmd::RealTimeRunData);
}

#[test]
fn unanswered_queued_request_gives_way_to_realtime_data() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    assert!(dtu.enqueue_command(0, InfoCmd::SystemConfig));

    dtu.tick(1);
    dtu.tick(15_001);
    dtu.tick(30_001);

    let nrf = dtu.nrf_mut();
    assert_eq!(nrf.sent.len(), 3);
    assert_eq!(nrf.sent[0][10], 0x05);
    assert_eq!(nrf.sent[1][10], 0x0B);
    assert_eq!(nrf.sent[2][10], 0x0B);
    assert_eq!(dtu.statistics().no_answer, 3);
    assert_eq!(dtu.inverters().get(0).unwrap().queued_len(), 0);
}

#[test]
fn incomplete_queued_request_is_dropped() {
    let config = DtuConfig {
        max_retransmits: 0,
        ..DtuConfig::default()
    };
    let mut dtu = dtu_with(config, &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    assert!(dtu.enqueue_command(0, InfoCmd::AlarmData));
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0x95, 0x01)]);

    run(&mut dtu, 1, 5);
    assert_eq!(dtu.statistics().partial_failures, 1);
    assert_eq!(dtu.inverters().get(0).unwrap().queued_cmd(), InfoCmd::RealTimeRunData);

    dtu.tick(15_001);
    assert_eq!(dtu.nrf_mut().sent[1][10], 0x0B);
}

#[test]
fn corrupted_frames_are_counted() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    let mut bytes = frame(ADDR_A, 0x95, 0x01).as_bytes().to_vec();
    bytes[11] ^= 0xFF;
    dtu.nrf_mut().answer(vec![RadioPacket::new(&bytes, 3, -64, 20)]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.statistics().crc_failures, 1);
    assert_eq!(dtu.statistics().frames_received, 0);
    assert!(dtu.sink().frames.is_empty());
}

#[test]
fn frames_from_unknown_inverters_are_counted() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    dtu.nrf_mut().answer(vec![frame(OTHER, 0x95, 0x81)]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.statistics().foreign_frames, 1);
    assert!(dtu.sink().frames.is_empty());
}

// =============================================================================
// Device Control
// =============================================================================

#[test]
fn accepted_control_refreshes_config() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    assert!(dtu.set_device_control(0, DevControl::TurnOff));
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0xD1, 0x81)]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.nrf_mut().sent[0][0], 0x51);
    assert_eq!(dtu.sink().results, vec![(0, 1, true)]);
    let link = dtu.inverters().get(0).unwrap();
    assert_eq!(link.queued_cmd(), InfoCmd::SystemConfig);
    assert!(link.pending_control().is_none());
}

#[test]
fn failed_control_is_kept_for_next_slot() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(NOON);
    dtu.set_device_control(0, DevControl::Restart);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.sink().results, vec![(0, 2, false)]);
    assert_eq!(dtu.inverters().get(0).unwrap().pending_control(), Some(DevControl::Restart));
}

#[test]
fn legacy_control_does_not_queue_config() {
    let mut iv = inverter(SERIAL_A);
    iv.generation = Generation::Y2;
    let mut dtu = dtu_with(DtuConfig::default(), &[iv]);
    dtu.set_timestamp(NOON);
    dtu.set_device_control(0, DevControl::TurnOn);
    dtu.nrf_mut().answer(vec![frame(ADDR_A, 0xD1, 0x00)]);

    run(&mut dtu, 1, 5);

    assert_eq!(dtu.sink().results, vec![(0, 0, true)]);
    assert_eq!(dtu.inverters().get(0).unwrap().queued_len(), 0);
}

#[test]
fn unknown_inverter_rejected() {
    let mut dtu = dtu_with(DtuConfig::default(), &[inverter(SERIAL_A)]);
    assert!(!dtu.enqueue_command(3, InfoCmd::AlarmData));
    assert!(!dtu.set_device_control(3, DevControl::TurnOn));
    assert_eq!(dtu.change_frequency(3, 868_000, 0), Err(RadioError::HardwareAbsent));
}

// =============================================================================
// Day/Night Gate
// =============================================================================

fn berlin() -> DtuConfig {
    DtuConfig {
        sun: SunConfig {
            latitude: 52.52,
            longitude: 13.40,
            disable_night_comm: true,
            ..SunConfig::default()
        },
        reset_values_at_night: true,
        ..DtuConfig::default()
    }
}

#[test]
fn night_suspends_polling() {
    let mut night_owl = inverter(SERIAL_B);
    night_owl.ignore_night = true;
    let mut dtu = dtu_with(berlin(), &[inverter(SERIAL_A), night_owl]);
    dtu.set_timestamp(BERLIN_NIGHT);

    dtu.tick(1);
    assert!(dtu.sun_window().is_some());
    assert!(!dtu.inverters().get(0).unwrap().comm_enabled);
    assert!(dtu.inverters().get(1).unwrap().comm_enabled);
    assert!(dtu.scheduler().is_scheduled("comm gate"));

    let before = dtu.nrf_mut().sent.len();
    dtu.tick(15_001);
    dtu.tick(30_001);
    let nrf = dtu.nrf_mut();
    assert_eq!(nrf.sent.len(), before + 2);
    assert!(nrf.sent[before..].iter().all(|f| f[1..5] == ADDR_B));
    assert_eq!(dtu.sink().zeroed, vec![0]);
}

#[test]
fn sunrise_resumes_polling() {
    let mut dtu = dtu_with(berlin(), &[inverter(SERIAL_A)]);
    dtu.set_timestamp(BERLIN_NIGHT);
    dtu.tick(1);
    assert!(!dtu.any_comm_enabled());

    // about 40 minutes after sunrise
    dtu.tick(12_000_000);
    assert!(dtu.any_comm_enabled());
}

#[test]
fn gate_ignored_when_night_comm_allowed() {
    let mut config = berlin();
    config.sun.disable_night_comm = false;
    let mut dtu = dtu_with(config, &[inverter(SERIAL_A)]);
    dtu.set_timestamp(BERLIN_NIGHT);
    dtu.tick(1);

    assert!(dtu.any_comm_enabled());
    assert_eq!(dtu.nrf_mut().sent.len(), 1);
}
