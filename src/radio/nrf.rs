//! 2.4 GHz back-end (nRF24L01+)
//!
//! Requests go out on the inverter's heuristic channel with hardware
//! auto-ack. The answer arrives on a channel offset from the TX channel;
//! while nothing is heard the receiver hops between candidate channels.
//!
//! ```text
//!            send_packet
//!   Idle ───────────────▶ TxPending ──tx irq──▶ RxListen ◀──┐
//!    ▲                        │                    │  hop    │
//!    │ last frame             │ timeout            ▼         │
//!    └────────────────────────┴──────────── RxChannelSwitch ─┘
//!                                                  │ timeout
//!                                                  ▼
//!                                              RxTimeout
//! ```

use crate::command::Encoded;
use crate::config::{
    NrfConfig, DURATION_LISTEN_MIN_MS, DURATION_PAUSE_LASTFR_MS, DURATION_TXFRAME_MS,
    MAX_RF_PAYLOAD_SIZE, NRF_CHANNEL_LIST, NRF_MAX_DRAIN, RF_CHANNELS, RSSI_STRONG_DBM,
    RSSI_WEAK_DBM,
};
use crate::inverter::InverterLink;
use crate::packet::{RadioPacket, TxBuffer, ALL_FRAMES, TX_REQ_INFO};
use crate::types::{DtuSerial, Generation};

use super::queue::FrameQueue;
use super::{IrqFlag, PollResult, Radio, RadioCore, RadioError, TxTarget};

#[cfg(feature = "embedded")]
use defmt::{debug, info, warn};
#[cfg(not(feature = "embedded"))]
use log::{debug, info, warn};

/// Auto-retransmit delay setting (3 = 1000 us)
const ARD_SETTING: u8 = 3;

/// Auto-retransmit count
const ARC_DEFAULT: u8 = 15;

/// Interrupt sources reported by the chip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IrqSources {
    /// Frame sent and acknowledged
    pub tx_ok: bool,
    /// Retransmits exhausted
    pub tx_fail: bool,
    /// Frame in the RX FIFO
    pub rx_ready: bool,
}

/// Operations the back-end needs from an nRF24L01+ driver
pub trait Nrf24 {
    /// Driver error
    type Error;

    /// Configure for 250 kbps, dynamic payloads, CRC16 and the DTU pipe
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn init(&mut self, dtu_address: &[u8; 5]) -> Result<(), Self::Error>;

    /// Check that the chip answers on the bus
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn is_connected(&mut self) -> Result<bool, Self::Error>;

    /// PA level 0..=3
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn set_pa_level(&mut self, level: u8) -> Result<(), Self::Error>;

    /// Auto-retransmit delay and count
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn set_retries(&mut self, delay: u8, count: u8) -> Result<(), Self::Error>;

    /// RF channel 0..=125
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    /// TX address (also used for the auto-ack pipe)
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn open_writing_pipe(&mut self, address: &[u8; 5]) -> Result<(), Self::Error>;

    /// Enter RX mode
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn start_listening(&mut self) -> Result<(), Self::Error>;

    /// Leave RX mode
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn stop_listening(&mut self) -> Result<(), Self::Error>;

    /// Empty the TX FIFO
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn flush_tx(&mut self) -> Result<(), Self::Error>;

    /// Empty the RX FIFO
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn flush_rx(&mut self) -> Result<(), Self::Error>;

    /// Load a frame and start transmitting without waiting
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn start_fast_write(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Read and clear the interrupt sources
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn what_happened(&mut self) -> Result<IrqSources, Self::Error>;

    /// Check for a frame in the RX FIFO
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn available(&mut self) -> Result<bool, Self::Error>;

    /// Length of the frame at the RX FIFO head
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn payload_size(&mut self) -> Result<u8, Self::Error>;

    /// Pop the frame at the RX FIFO head
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Received power detector (above -64 dBm)
    ///
    /// # Errors
    ///
    /// Bus errors of the driver.
    fn received_power_detected(&mut self) -> Result<bool, Self::Error>;
}

/// Link state of the 2.4 GHz back-end
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NrfState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Frame handed to the chip, waiting for the TX interrupt
    TxPending,
    /// Listening on a channel
    RxListen,
    /// Listening after a hop
    RxChannelSwitch,
    /// Listen window expired
    RxTimeout,
}

impl NrfState {
    /// Check if the receiver is on
    #[must_use]
    pub const fn is_listening(self) -> bool {
        matches!(self, Self::RxListen | Self::RxChannelSwitch)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for NrfState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Idle => defmt::write!(f, "IDLE"),
            Self::TxPending => defmt::write!(f, "TX"),
            Self::RxListen => defmt::write!(f, "RX"),
            Self::RxChannelSwitch => defmt::write!(f, "RX-HOP"),
            Self::RxTimeout => defmt::write!(f, "RX-TIMEOUT"),
        }
    }
}

/// RX channel index paired with a TX channel index
#[must_use]
pub const fn rx_channel_index(tx_index: usize, generation: Generation) -> usize {
    (tx_index + generation.rx_channel_offset()) % RF_CHANNELS
}

/// 2.4 GHz back-end
pub struct NrfRadio<'a, C: Nrf24> {
    chip: C,
    core: RadioCore<'a>,
    enabled: bool,
    connected: bool,
    pa_level: u8,
    state: NrfState,
    target: Option<TxTarget>,
    tx_idx: usize,
    rx_idx: usize,
    temp_rx_idx: usize,
    timeslot_start: u32,
    last_irq_ms: u32,
    tx_ms: u32,
    inner_timeout: u32,
    loop_channels: bool,
    rx_pendular: bool,
    rx_init: bool,
    tx_retries: u8,
    /// Retransmit count applied on the next fresh request
    pub tx_retries_next: u8,
}

impl<'a, C: Nrf24> NrfRadio<'a, C> {
    /// Create the back-end; call [`Self::setup`] before use
    pub fn new(chip: C, irq: &'a IrqFlag, config: &NrfConfig, dtu_serial: DtuSerial) -> Self {
        Self {
            chip,
            core: RadioCore::new(irq, dtu_serial),
            enabled: config.enabled,
            connected: false,
            pa_level: config.pa_level & 0x03,
            state: NrfState::Idle,
            target: None,
            tx_idx: 0,
            rx_idx: 0,
            temp_rx_idx: 0,
            timeslot_start: 0,
            last_irq_ms: 0,
            tx_ms: 0,
            inner_timeout: DURATION_LISTEN_MIN_MS,
            loop_channels: false,
            rx_pendular: false,
            rx_init: true,
            tx_retries: ARC_DEFAULT,
            tx_retries_next: ARC_DEFAULT,
        }
    }

    /// Configure the chip; returns whether it answered
    pub fn setup(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        let dtu_address = self.core.dtu_serial.pipe_address();
        let result = self.configure(&dtu_address);

        self.connected = matches!(result, Ok(true));
        if self.connected {
            info!("nRF24 ready, DTU serial {:x}", self.core.dtu_serial.as_u32());
        } else {
            warn!("nRF24 can't be reached, check the wiring");
        }
        self.connected
    }

    /// Current link state
    #[must_use]
    pub const fn state(&self) -> NrfState {
        self.state
    }

    /// Channel index used for the last transmission
    #[must_use]
    pub const fn tx_channel_index(&self) -> usize {
        self.tx_idx
    }

    /// Channel index currently listened on
    #[must_use]
    pub const fn rx_channel_index(&self) -> usize {
        self.temp_rx_idx
    }

    /// Shared state
    #[must_use]
    pub fn core(&self) -> &RadioCore<'a> {
        &self.core
    }

    /// The wrapped chip driver
    pub fn chip_mut(&mut self) -> &mut C {
        &mut self.chip
    }

    fn configure(&mut self, dtu_address: &[u8; 5]) -> Result<bool, C::Error> {
        self.chip.init(dtu_address)?;
        self.chip.set_retries(ARD_SETTING, ARC_DEFAULT)?;
        self.chip.set_pa_level(self.pa_level)?;
        self.chip.is_connected()
    }

    fn transmit(&mut self, iv: &InverterLink, frame: &[u8], is_retransmit: bool) -> Result<(), C::Error> {
        self.chip.set_pa_level(iv.config.pa_level & 0x03)?;
        self.chip.stop_listening()?;
        self.chip.flush_rx()?;
        if !is_retransmit && self.tx_retries != self.tx_retries_next {
            self.chip.set_retries(ARD_SETTING, self.tx_retries_next)?;
            self.tx_retries = self.tx_retries_next;
        }
        self.chip.set_channel(NRF_CHANNEL_LIST[self.tx_idx])?;
        self.chip.open_writing_pipe(&iv.serial().pipe_address())?;
        self.chip.start_fast_write(frame)
    }

    fn service(&mut self, now_ms: u32, out: &mut PollResult) -> Result<(), C::Error> {
        if !self.core.irq().take() {
            self.check_timers(now_ms, out)?;
            return Ok(());
        }

        let sources = self.chip.what_happened()?;
        let Some(target) = self.target else {
            return Ok(());
        };
        self.core.mark_irq();
        self.last_irq_ms = now_ms;

        if sources.tx_ok || sources.tx_fail {
            self.chip.flush_tx()?;
            if self.state.is_listening() {
                warn!("unexpected tx irq");
                return Ok(());
            }
            if self.state == NrfState::TxPending {
                out.acked = sources.tx_ok;
                self.start_rx(now_ms, &target)?;
            }
        }

        if sources.rx_ready && self.state.is_listening() {
            if self.drain_fifo(now_ms, &target, out)? {
                self.state = NrfState::Idle;
                self.core.wait.start(now_ms, DURATION_PAUSE_LASTFR_MS);
                self.chip.stop_listening()?;
                out.finished = true;
            } else {
                self.inner_timeout = DURATION_LISTEN_MIN_MS;
                self.timeslot_start = now_ms;
                if !self.loop_channels {
                    if self.rx_init {
                        self.rx_init = false;
                        self.temp_rx_idx = (self.rx_idx + 4) % RF_CHANNELS;
                        self.chip.set_channel(NRF_CHANNEL_LIST[self.temp_rx_idx])?;
                    } else {
                        self.rx_idx = self.temp_rx_idx;
                    }
                }
            }
        }
        Ok(())
    }

    fn start_rx(&mut self, now_ms: u32, target: &TxTarget) -> Result<(), C::Error> {
        self.rx_idx = rx_channel_index(self.tx_idx, target.generation);
        self.chip.set_channel(NRF_CHANNEL_LIST[self.rx_idx])?;
        self.chip.start_listening()?;
        self.timeslot_start = now_ms;
        self.temp_rx_idx = self.rx_idx;
        self.rx_pendular = false;
        self.rx_init = true;
        self.loop_channels = target.generation.is_legacy() && (target.cmd == 0x09 || target.cmd == 0x11);
        self.inner_timeout = DURATION_LISTEN_MIN_MS;
        self.state = NrfState::RxListen;
        Ok(())
    }

    fn check_timers(&mut self, now_ms: u32, out: &mut PollResult) -> Result<(), C::Error> {
        match self.state {
            NrfState::TxPending => {
                if self.core.wait.is_timeout(now_ms) {
                    warn!("no TX interrupt from nRF24");
                    self.state = NrfState::RxTimeout;
                    out.timed_out = true;
                }
                return Ok(());
            }
            NrfState::RxListen | NrfState::RxChannelSwitch => {}
            NrfState::Idle | NrfState::RxTimeout => return Ok(()),
        }

        if now_ms.wrapping_sub(self.timeslot_start) < self.inner_timeout {
            return Ok(());
        }
        if self.core.wait.is_timeout(now_ms) {
            self.state = NrfState::RxTimeout;
            out.timed_out = true;
            return Ok(());
        }

        self.timeslot_start = now_ms;
        if !self.loop_channels && now_ms.wrapping_sub(self.last_irq_ms) > DURATION_TXFRAME_MS {
            self.loop_channels = true;
        }
        self.rx_pendular = !self.rx_pendular;
        self.inner_timeout = DURATION_LISTEN_MIN_MS;

        self.temp_rx_idx = if self.loop_channels {
            (self.temp_rx_idx + 4) % RF_CHANNELS
        } else if self.rx_pendular {
            (self.rx_idx + 4) % RF_CHANNELS
        } else {
            self.rx_idx
        };
        self.chip.set_channel(NRF_CHANNEL_LIST[self.temp_rx_idx])?;
        self.rx_init = false;
        self.state = NrfState::RxChannelSwitch;
        Ok(())
    }

    /// Read the RX FIFO; returns true once the exchange is complete
    fn drain_fifo(&mut self, now_ms: u32, target: &TxTarget, out: &mut PollResult) -> Result<bool, C::Error> {
        let mut done = false;
        for _ in 0..NRF_MAX_DRAIN {
            if !self.chip.available()? {
                break;
            }
            let size = usize::from(self.chip.payload_size()?);
            if size == 0 {
                self.chip.flush_rx()?;
                break;
            }
            let len = size.min(MAX_RF_PAYLOAD_SIZE);
            let mut buf = [0u8; MAX_RF_PAYLOAD_SIZE];
            let rssi = if self.chip.received_power_detected()? {
                RSSI_STRONG_DBM
            } else {
                RSSI_WEAK_DBM
            };
            self.chip.read_payload(&mut buf[..len])?;

            if buf[0] == 0x00 {
                continue;
            }
            let elapsed = now_ms.wrapping_sub(self.tx_ms).min(u32::from(u16::MAX)) as u16;
            let frame = RadioPacket::new(&buf[..len], NRF_CHANNEL_LIST[self.temp_rx_idx], rssi, elapsed);
            if !frame.is_from(&target.address) {
                warn!("RX other inverter");
                debug!("{:?}", frame.as_bytes());
                continue;
            }

            out.got_fragment = true;
            if let Ok(true) = self.core.queue.push(frame, target.generation) {
                out.got_last = true;
                done = true;
            }
            if target.single_frame && frame.message_id() == (TX_REQ_INFO | ALL_FRAMES) {
                done = true;
            }
        }
        Ok(done)
    }
}

impl<C: Nrf24> Radio for NrfRadio<'_, C> {
    fn tx_buffer(&mut self) -> &mut TxBuffer {
        &mut self.core.tx
    }

    fn dtu_serial(&self) -> DtuSerial {
        self.core.dtu_serial
    }

    fn frames(&mut self) -> &mut FrameQueue {
        &mut self.core.queue
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_chip_connected(&self) -> bool {
        self.enabled && self.connected
    }

    fn send_packet(
        &mut self,
        iv: &mut InverterLink,
        frame: Encoded,
        now_ms: u32,
        is_retransmit: bool,
    ) -> Result<(), RadioError> {
        if !self.enabled {
            return Err(RadioError::HardwareAbsent);
        }
        self.core.mark_sending();
        let len = self.core.tx.finalize(frame.len, frame.crc16);
        let mut buf = [0u8; MAX_RF_PAYLOAD_SIZE];
        buf[..len].copy_from_slice(self.core.tx.frame(len));

        self.tx_idx = iv.tx_channel % RF_CHANNELS;
        debug!(
            "TX {} ch{}, {} ret. | {:?}",
            len,
            NRF_CHANNEL_LIST[self.tx_idx],
            self.tx_retries_next,
            &buf[..len]
        );

        self.target = Some(TxTarget::from_link(iv));
        self.tx_ms = now_ms;
        iv.tx_count = iv.tx_count.wrapping_add(1);
        self.state = NrfState::TxPending;
        self.core.start_wait(now_ms, buf[0]);

        if self.transmit(iv, &buf[..len], is_retransmit).is_err() {
            warn!("nRF24 bus error during TX");
            self.state = NrfState::Idle;
            return Err(RadioError::Bus);
        }
        Ok(())
    }

    fn poll(&mut self, now_ms: u32) -> PollResult {
        let mut out = PollResult::default();
        if !self.enabled {
            return out;
        }
        if self.service(now_ms, &mut out).is_err() {
            warn!("nRF24 bus error");
            self.state = NrfState::RxTimeout;
            out.timed_out = true;
        }
        out
    }

    fn is_busy(&self, now_ms: u32) -> bool {
        match self.state {
            NrfState::TxPending | NrfState::RxListen | NrfState::RxChannelSwitch => true,
            NrfState::Idle => !self.core.wait.is_timeout(now_ms),
            NrfState::RxTimeout => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rx_channel_offsets() {
        assert_eq!(rx_channel_index(0, Generation::X), 3);
        assert_eq!(rx_channel_index(3, Generation::X), 1);
        assert_eq!(rx_channel_index(4, Generation::Y1), 1);
        assert_eq!(rx_channel_index(4, Generation::Y2), 2);
    }

    #[test]
    fn test_listening_states() {
        assert!(NrfState::RxListen.is_listening());
        assert!(NrfState::RxChannelSwitch.is_listening());
        assert!(!NrfState::TxPending.is_listening());
        assert!(!NrfState::RxTimeout.is_listening());
    }
}
