//! Radio Interface
//!
//! The [`Radio`] trait is the seam between the application and the two
//! transceiver back-ends. Both share a [`RadioCore`]: the inbound frame
//! queue, the interrupt flag, the listen timer and the TX buffer.
//!
//! Radios never block. The application calls [`Radio::poll`] once per
//! loop iteration and applies the returned [`PollResult`] to the inverter
//! that was addressed.

pub mod cmt;
pub mod nrf;
pub mod queue;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::command::{self, EncodeError, Encoded};
use crate::config::{
    DEFAULT_FRAMES_EXPECTED, DURATION_ONEFRAME_MS, DURATION_RESERVE_CTRL_MS, DURATION_RESERVE_MS,
    DURATION_TXFRAME_MS,
};
use crate::inverter::InverterLink;
use crate::packet::{TxBuffer, ALL_FRAMES, TX_REQ_INFO};
use crate::types::{DevControl, DtuSerial, Generation, InfoCmd};

use self::queue::FrameQueue;

#[cfg(feature = "embedded")]
use defmt::debug;
#[cfg(not(feature = "embedded"))]
use log::debug;

/// Interrupt flag shared between the IRQ pin task and the main loop
#[derive(Debug, Default)]
pub struct IrqFlag(AtomicBool);

impl IrqFlag {
    /// Create a cleared flag
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Mark an interrupt (callable from interrupt context)
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Check without clearing
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Read and clear in one step
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Elapsed-time monitor on a wrapping millisecond clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeMonitor {
    start_ms: u32,
    duration_ms: u32,
    running: bool,
}

impl Default for TimeMonitor {
    fn default() -> Self {
        Self::expired()
    }
}

impl TimeMonitor {
    /// A monitor that reports timeout right away
    #[must_use]
    pub const fn expired() -> Self {
        Self {
            start_ms: 0,
            duration_ms: 0,
            running: false,
        }
    }

    /// (Re)start the monitor
    pub fn start(&mut self, now_ms: u32, duration_ms: u32) {
        self.start_ms = now_ms;
        self.duration_ms = duration_ms;
        self.running = true;
    }

    /// Stop; reports timeout afterwards
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Check whether the duration has elapsed
    #[must_use]
    pub fn is_timeout(&self, now_ms: u32) -> bool {
        !self.running || now_ms.wrapping_sub(self.start_ms) >= self.duration_ms
    }

    /// Remaining milliseconds
    #[must_use]
    pub fn remaining(&self, now_ms: u32) -> u32 {
        if self.is_timeout(now_ms) {
            0
        } else {
            self.duration_ms - now_ms.wrapping_sub(self.start_ms)
        }
    }
}

/// Whether the interrupt line has been seen working
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IrqHealth {
    /// Nothing sent yet
    #[default]
    Unknown,
    /// Sent without an interrupt following yet
    Error,
    /// Interrupt received after a send
    Ok,
}

/// Radio errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioError {
    /// The front-end is disabled or not connected
    HardwareAbsent,
    /// SPI or pin access failed
    Bus,
    /// The operation is not available on this front-end
    Unsupported,
    /// Frequency outside the configured band
    InvalidFrequency,
    /// The command could not be encoded
    Encode(EncodeError),
}

impl From<EncodeError> for RadioError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::HardwareAbsent => write!(f, "radio not available"),
            Self::Bus => write!(f, "radio bus error"),
            Self::Unsupported => write!(f, "operation not supported"),
            Self::InvalidFrequency => write!(f, "frequency out of band"),
            Self::Encode(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for RadioError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::HardwareAbsent => defmt::write!(f, "HardwareAbsent"),
            Self::Bus => defmt::write!(f, "Bus"),
            Self::Unsupported => defmt::write!(f, "Unsupported"),
            Self::InvalidFrequency => defmt::write!(f, "InvalidFrequency"),
            Self::Encode(e) => defmt::write!(f, "Encode({})", e),
        }
    }
}

/// What happened during one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PollResult {
    /// The inverter's radio acknowledged our frame
    pub acked: bool,
    /// At least one matching frame was queued
    pub got_fragment: bool,
    /// The last frame of the response was queued
    pub got_last: bool,
    /// The exchange ended (last frame or single-frame answer)
    pub finished: bool,
    /// The listen window expired without completion
    pub timed_out: bool,
}

impl PollResult {
    /// Check if anything at all happened
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !(self.acked || self.got_fragment || self.got_last || self.finished || self.timed_out)
    }
}

/// Snapshot of the inverter addressed by the last transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxTarget {
    /// Registry index
    pub index: u8,
    /// Wire address
    pub address: [u8; 4],
    /// Command dialect
    pub generation: Generation,
    /// Message id sent
    pub cmd: u8,
    /// A single frame was requested
    pub single_frame: bool,
}

impl TxTarget {
    /// Capture the link state at send time
    #[must_use]
    pub fn from_link(iv: &InverterLink) -> Self {
        Self {
            index: iv.index(),
            address: iv.address(),
            generation: iv.generation(),
            cmd: iv.current_cmd,
            single_frame: iv.single_frame,
        }
    }
}

/// State shared by both back-ends
#[derive(Debug)]
pub struct RadioCore<'a> {
    /// Inbound frames
    pub queue: FrameQueue,
    /// Listen window of the current exchange
    pub wait: TimeMonitor,
    /// Outgoing frame
    pub tx: TxBuffer,
    /// Local station serial
    pub dtu_serial: DtuSerial,
    /// Interrupt line health
    pub irq_health: IrqHealth,
    irq: &'a IrqFlag,
}

impl<'a> RadioCore<'a> {
    /// Create the shared state
    #[must_use]
    pub fn new(irq: &'a IrqFlag, dtu_serial: DtuSerial) -> Self {
        Self {
            queue: FrameQueue::new(),
            wait: TimeMonitor::expired(),
            tx: TxBuffer::new(),
            dtu_serial,
            irq_health: IrqHealth::Unknown,
            irq,
        }
    }

    /// Interrupt flag
    #[must_use]
    pub const fn irq(&self) -> &'a IrqFlag {
        self.irq
    }

    /// Note that a frame is about to go out
    pub fn mark_sending(&mut self) {
        if self.irq_health == IrqHealth::Unknown {
            self.irq_health = IrqHealth::Error;
        }
    }

    /// Note that an interrupt arrived
    pub fn mark_irq(&mut self) {
        self.irq_health = IrqHealth::Ok;
    }

    /// Start the listen window for a request
    pub fn start_wait(&mut self, now_ms: u32, message_id: u8) {
        let expected = match self.queue.frames_expected() {
            0 => DEFAULT_FRAMES_EXPECTED,
            n => n,
        };
        let reserve = if message_id == TX_REQ_INFO {
            DURATION_RESERVE_MS
        } else {
            DURATION_RESERVE_CTRL_MS
        };
        let window = DURATION_TXFRAME_MS + u32::from(expected) * DURATION_ONEFRAME_MS + reserve;
        self.wait.start(now_ms, window);
    }
}

/// Common interface of both transceiver back-ends
pub trait Radio {
    /// Outgoing frame buffer
    fn tx_buffer(&mut self) -> &mut TxBuffer;

    /// Local station serial
    fn dtu_serial(&self) -> DtuSerial;

    /// Inbound frames
    fn frames(&mut self) -> &mut FrameQueue;

    /// Radio is configured for use
    fn is_enabled(&self) -> bool;

    /// Chip answered during setup
    fn is_chip_connected(&self) -> bool;

    /// Transmit the frame prepared in the TX buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the chip could not be driven.
    fn send_packet(
        &mut self,
        iv: &mut InverterLink,
        frame: Encoded,
        now_ms: u32,
        is_retransmit: bool,
    ) -> Result<(), RadioError>;

    /// Service the chip; call once per loop iteration
    fn poll(&mut self, now_ms: u32) -> PollResult;

    /// Request device control
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::HardwareAbsent`] for a disabled radio and
    /// [`RadioError::Encode`] when nothing may be sent for this command.
    fn send_control_packet(
        &mut self,
        iv: &mut InverterLink,
        ctrl: DevControl,
        now_ms: u32,
        is_retransmit: bool,
    ) -> Result<(), RadioError> {
        if !self.is_enabled() {
            return Err(RadioError::HardwareAbsent);
        }
        debug!("sendControlPacket cmd {}", ctrl.code());
        let dtu = self.dtu_serial();
        let tx = self.tx_buffer();
        let frame = command::encode_device_control(tx, iv, dtu, ctrl)?;
        let mid = tx.byte(0);
        iv.begin_request(mid, false);
        self.send_packet(iv, frame, now_ms, is_retransmit)
    }

    /// Request information (all frames)
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::HardwareAbsent`] for a disabled radio.
    fn send_info_request(
        &mut self,
        iv: &mut InverterLink,
        cmd: InfoCmd,
        timestamp: u32,
        alarm_id: u16,
        now_ms: u32,
        is_retransmit: bool,
    ) -> Result<(), RadioError> {
        if !self.is_enabled() {
            return Err(RadioError::HardwareAbsent);
        }
        let dtu = self.dtu_serial();
        let frame = command::encode_info_request(self.tx_buffer(), iv, dtu, cmd, timestamp, alarm_id);
        iv.begin_request(cmd.code(), false);
        self.send_packet(iv, frame, now_ms, is_retransmit)
    }

    /// Ask for one missing frame of the last response
    ///
    /// # Errors
    ///
    /// Returns [`RadioError::HardwareAbsent`] for a disabled radio.
    fn send_single_frame_request(
        &mut self,
        iv: &mut InverterLink,
        frame_index: u8,
        now_ms: u32,
    ) -> Result<(), RadioError> {
        if !self.is_enabled() {
            return Err(RadioError::HardwareAbsent);
        }
        let cmd = iv.current_cmd;
        let dtu = self.dtu_serial();
        let frame = command::encode_single_frame_request(self.tx_buffer(), iv, dtu, frame_index);
        iv.begin_request(cmd, true);
        self.send_packet(iv, frame, now_ms, true)
    }

    /// Move an inverter to another frequency
    ///
    /// # Errors
    ///
    /// Only the sub-GHz radio supports this.
    fn switch_frequency(
        &mut self,
        _iv: &mut InverterLink,
        _from_khz: u32,
        _to_khz: u32,
        _now_ms: u32,
    ) -> Result<(), RadioError> {
        Err(RadioError::Unsupported)
    }

    /// Check for an exchange in progress (including the pause after it)
    fn is_busy(&self, now_ms: u32) -> bool;

    /// Lowest frequency of the band (MHz)
    fn base_freq_mhz(&self) -> u16 {
        0
    }

    /// Frequency inverters listen on after power-up (MHz)
    fn boot_freq_mhz(&self) -> u16 {
        0
    }

    /// Usable frequency range (MHz)
    fn freq_range_mhz(&self) -> (u16, u16) {
        (0, 0)
    }
}

/// Placeholder for a front-end that is not fitted
#[derive(Debug, Default)]
pub struct NoRadio {
    queue: FrameQueue,
    tx: TxBuffer,
}

impl NoRadio {
    /// Create an absent radio
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Radio for NoRadio {
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
        false
    }

    fn is_chip_connected(&self) -> bool {
        false
    }

    fn send_packet(
        &mut self,
        _iv: &mut InverterLink,
        _frame: Encoded,
        _now_ms: u32,
        _is_retransmit: bool,
    ) -> Result<(), RadioError> {
        Err(RadioError::HardwareAbsent)
    }

    fn poll(&mut self, _now_ms: u32) -> PollResult {
        PollResult::default()
    }

    fn is_busy(&self, _now_ms: u32) -> bool {
        false
    }
}

/// Check a response frame for the last-frame marker
#[must_use]
pub fn is_last_frame(frame: &[u8], generation: Generation) -> bool {
    if frame.len() < 10 {
        return false;
    }
    let (id, index) = (frame[0], frame[9]);
    if generation.is_legacy() {
        // 0x88 and 0x92 are status frames
        return match id {
            0x8F => index > 0x10,
            0x88 | 0x92 => false,
            _ => true,
        };
    }
    id == (TX_REQ_INFO | ALL_FRAMES) && index > ALL_FRAMES
}
