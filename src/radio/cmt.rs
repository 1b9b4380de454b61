//! Sub-GHz back-end (CMT2300A)
//!
//! One active channel at a time, no hopping. The chip raises its
//! interrupt for each received frame; one frame is pulled per poll and
//! RX is re-armed afterwards.

use crate::command::{self, Encoded};
use crate::config::{CmtConfig, CMT_MAX_RX_LEN, CMT_PAUSE_LASTFR_MS, MAX_RF_PAYLOAD_SIZE};
use crate::inverter::InverterLink;
use crate::packet::{RadioPacket, TxBuffer, ALL_FRAMES, TX_REQ_INFO, TX_REQ_SWITCH_CHANNEL};
use crate::types::DtuSerial;

use super::queue::FrameQueue;
use super::{IrqFlag, PollResult, Radio, RadioCore, RadioError, TxTarget};

#[cfg(feature = "embedded")]
use defmt::{debug, info, warn};
#[cfg(not(feature = "embedded"))]
use log::{debug, info, warn};

/// Channel spacing in kHz
pub const CHANNEL_SPACING_KHZ: u32 = 250;

/// Regulatory region of the sub-GHz band
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Region {
    /// Europe, 860..870 MHz
    #[default]
    Eu,
    /// North America, 905..925 MHz
    Us,
    /// Brazil, 915..928 MHz
    Br,
}

impl Region {
    /// Frequency of channel 0 (MHz)
    #[must_use]
    pub const fn base_freq_mhz(self) -> u16 {
        match self {
            Self::Eu => 860,
            Self::Us => 905,
            Self::Br => 915,
        }
    }

    /// Frequency inverters listen on after power-up (MHz)
    #[must_use]
    pub const fn boot_freq_mhz(self) -> u16 {
        match self {
            Self::Eu => 868,
            Self::Us | Self::Br => 915,
        }
    }

    /// Usable range (MHz)
    #[must_use]
    pub const fn freq_range_mhz(self) -> (u16, u16) {
        match self {
            Self::Eu => (860, 870),
            Self::Us => (905, 925),
            Self::Br => (915, 928),
        }
    }

    /// Channel number for a frequency, None outside the band
    #[must_use]
    pub const fn freq_to_channel(self, khz: u32) -> Option<u8> {
        let base = self.base_freq_mhz() as u32 * 1000;
        let (low, high) = self.freq_range_mhz();
        if khz < low as u32 * 1000 || khz > high as u32 * 1000 {
            return None;
        }
        let ch = (khz - base) / CHANNEL_SPACING_KHZ;
        if ch > u8::MAX as u32 {
            None
        } else {
            Some(ch as u8)
        }
    }

    /// Frequency of a channel (kHz)
    #[must_use]
    pub const fn channel_to_khz(self, channel: u8) -> u32 {
        self.base_freq_mhz() as u32 * 1000 + channel as u32 * CHANNEL_SPACING_KHZ
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for Region {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Eu => defmt::write!(f, "EU"),
            Self::Us => defmt::write!(f, "US"),
            Self::Br => defmt::write!(f, "BR"),
        }
    }
}

/// Status codes of the transceiver driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmtStatus {
    /// Operation completed
    Success,
    /// State switch did not complete
    ErrSwitchState,
    /// TX FIFO still holds a frame
    ErrTxPendingFifo,
    /// A received frame blocks the FIFO
    ErrRxInFifo,
    /// Nothing received
    FifoEmpty,
}

#[cfg(feature = "embedded")]
impl defmt::Format for CmtStatus {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Success => defmt::write!(f, "Success"),
            Self::ErrSwitchState => defmt::write!(f, "ErrSwitchState"),
            Self::ErrTxPendingFifo => defmt::write!(f, "ErrTxPendingFifo"),
            Self::ErrRxInFifo => defmt::write!(f, "ErrRxInFifo"),
            Self::FifoEmpty => defmt::write!(f, "FifoEmpty"),
        }
    }
}

/// Operations the back-end needs from a CMT2300A driver
pub trait Cmt2300 {
    /// Load the register bank for a region; false when the chip is absent
    fn reset(&mut self, region: Region) -> bool;

    /// Housekeeping, called once per poll
    fn poll(&mut self);

    /// Enter RX mode
    fn go_rx(&mut self) -> CmtStatus;

    /// Transmit a frame
    fn tx(&mut self, frame: &[u8]) -> CmtStatus;

    /// Read a received frame into `buf`, returning its length and RSSI
    ///
    /// # Errors
    ///
    /// The driver status when no frame could be read.
    fn get_rx(&mut self, buf: &mut [u8]) -> Result<(usize, i8), CmtStatus>;

    /// Tune to a channel
    fn switch_channel(&mut self, channel: u8) -> bool;

    /// Currently tuned channel
    fn current_channel(&self) -> u8;
}

/// Sub-GHz back-end
pub struct CmtRadio<'a, C: Cmt2300> {
    chip: C,
    core: RadioCore<'a>,
    enabled: bool,
    connected: bool,
    region: Region,
    request_rx: bool,
    awaiting: bool,
    target: Option<TxTarget>,
    tx_ms: u32,
}

impl<'a, C: Cmt2300> CmtRadio<'a, C> {
    /// Create the back-end; call [`Self::setup`] before use
    pub fn new(chip: C, irq: &'a IrqFlag, config: &CmtConfig, dtu_serial: DtuSerial) -> Self {
        Self {
            chip,
            core: RadioCore::new(irq, dtu_serial),
            enabled: config.enabled,
            connected: false,
            region: config.region,
            request_rx: false,
            awaiting: false,
            target: None,
            tx_ms: 0,
        }
    }

    /// Reset the chip; returns whether it answered
    pub fn setup(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.connected = self.chip.reset(self.region);
        if self.connected {
            info!("CMT2300A ready, region {:?}", self.region);
            self.chip.go_rx();
        } else {
            warn!("Initializing CMT2300A failed");
        }
        self.core.irq().clear();
        self.request_rx = false;
        self.connected
    }

    /// Configured region
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
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

    fn transmit(&mut self, iv: &mut InverterLink, frame: Encoded, now_ms: u32) {
        self.core.mark_sending();
        let len = self.core.tx.finalize(frame.len, frame.crc16);
        let mut buf = [0u8; MAX_RF_PAYLOAD_SIZE];
        buf[..len].copy_from_slice(self.core.tx.frame(len));

        debug!(
            "TX {} kHz | {:?}",
            self.region.channel_to_khz(self.chip.current_channel()),
            &buf[..len]
        );
        let status = self.chip.tx(&buf[..len]);
        self.tx_ms = now_ms;
        if status != CmtStatus::Success {
            warn!("CMT TX failed, code {}", status as u8);
            if status == CmtStatus::ErrRxInFifo {
                self.core.irq().raise();
            }
        }

        iv.tx_count = iv.tx_count.wrapping_add(1);
        self.target = Some(TxTarget::from_link(iv));
        self.awaiting = true;
        self.core.start_wait(now_ms, buf[0]);
    }

    fn receive(&mut self, now_ms: u32, out: &mut PollResult) {
        let mut buf = [0u8; CMT_MAX_RX_LEN];
        let Ok((len, rssi)) = self.chip.get_rx(&mut buf) else {
            return;
        };
        self.core.mark_irq();
        let Some(target) = self.target else {
            debug!("CMT frame without request");
            return;
        };

        let elapsed = now_ms.wrapping_sub(self.tx_ms).min(u32::from(u16::MAX)) as u16;
        let frame = RadioPacket::new(&buf[..len.min(CMT_MAX_RX_LEN)], self.chip.current_channel(), rssi, elapsed);
        if !frame.is_from(&target.address) {
            warn!("RX other inverter");
            debug!("{:?}", frame.as_bytes());
            return;
        }

        out.got_fragment = true;
        let mut last = matches!(self.core.queue.push(frame, target.generation), Ok(true));
        if frame.frame_index() > ALL_FRAMES {
            self.core.queue.set_frames_expected(frame.frame_index() - ALL_FRAMES);
            self.core.wait.start(now_ms, CMT_PAUSE_LASTFR_MS);
            last = true;
        }
        let single = target.single_frame && frame.message_id() == (TX_REQ_INFO | ALL_FRAMES);
        if last || single {
            out.got_last = last;
            out.finished = true;
            self.awaiting = false;
        }
    }
}

impl<C: Cmt2300> Radio for CmtRadio<'_, C> {
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
        _is_retransmit: bool,
    ) -> Result<(), RadioError> {
        if !self.is_chip_connected() {
            return Err(RadioError::HardwareAbsent);
        }
        let channel = iv.config.frequency_channel;
        if self.chip.current_channel() != channel {
            self.chip.switch_channel(channel);
        }
        self.transmit(iv, frame, now_ms);
        Ok(())
    }

    fn poll(&mut self, now_ms: u32) -> PollResult {
        let mut out = PollResult::default();
        if !self.enabled {
            return out;
        }

        self.chip.poll();
        if self.core.irq().is_raised() || self.request_rx {
            self.receive(now_ms, &mut out);
            if self.chip.go_rx() == CmtStatus::Success {
                self.core.irq().clear();
                self.request_rx = false;
            }
        }

        if self.awaiting && self.core.wait.is_timeout(now_ms) {
            self.awaiting = false;
            out.timed_out = true;
        }
        out
    }

    fn switch_frequency(
        &mut self,
        iv: &mut InverterLink,
        from_khz: u32,
        to_khz: u32,
        now_ms: u32,
    ) -> Result<(), RadioError> {
        if !self.is_chip_connected() {
            return Err(RadioError::HardwareAbsent);
        }
        let (Some(from), Some(to)) = (
            self.region.freq_to_channel(from_khz),
            self.region.freq_to_channel(to_khz),
        ) else {
            return Err(RadioError::InvalidFrequency);
        };

        self.chip.switch_channel(from);
        let dtu = self.core.dtu_serial;
        let frame = command::encode_switch_channel(&mut self.core.tx, iv, dtu, to);
        iv.begin_request(TX_REQ_SWITCH_CHANNEL, false);
        self.transmit(iv, frame, now_ms);
        self.request_rx = true;
        self.chip.switch_channel(to);
        iv.config.frequency_channel = to;
        Ok(())
    }

    fn is_busy(&self, now_ms: u32) -> bool {
        self.awaiting || !self.core.wait.is_timeout(now_ms)
    }

    fn base_freq_mhz(&self) -> u16 {
        self.region.base_freq_mhz()
    }

    fn boot_freq_mhz(&self) -> u16 {
        self.region.boot_freq_mhz()
    }

    fn freq_range_mhz(&self) -> (u16, u16) {
        self.region.freq_range_mhz()
    }
}
