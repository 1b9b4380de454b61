//! Shared types used across the DTU firmware
//!
//! This module defines domain-specific types that enforce invariants
//! at compile time and provide type safety throughout the codebase.

use core::fmt;

/// Inverter family, selecting the command dialect and the RX channel offset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Generation {
    /// Generation X: current families (2.4 GHz and sub-GHz), numeric limits with CRC16
    #[default]
    X,
    /// Generation Y, first hardware revision: legacy framing, DRED limit codes
    Y1,
    /// Generation Y, second hardware revision: legacy framing, DRED limit codes
    Y2,
}

impl Generation {
    /// Offset between TX and RX channel index on the hopping radio
    #[must_use]
    pub const fn rx_channel_offset(self) -> usize {
        match self {
            Self::X | Self::Y2 => 3,
            Self::Y1 => 2,
        }
    }

    /// Check if this family speaks the legacy (generation Y) dialect
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Y1 | Self::Y2)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for Generation {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::X => defmt::write!(f, "GEN-X"),
            Self::Y1 => defmt::write!(f, "GEN-Y1"),
            Self::Y2 => defmt::write!(f, "GEN-Y2"),
        }
    }
}

/// Radio front-end an inverter is reached through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RadioBackend {
    /// 2.4 GHz nRF24L01+ with 5-channel hopping
    #[default]
    Nrf,
    /// Sub-GHz CMT2300A on a single negotiated channel
    Cmt,
}

#[cfg(feature = "embedded")]
impl defmt::Format for RadioBackend {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Nrf => defmt::write!(f, "NRF"),
            Self::Cmt => defmt::write!(f, "CMT"),
        }
    }
}

/// 48-bit inverter serial number, also used as its radio station address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InverterSerial(u64);

impl InverterSerial {
    /// Largest representable serial (48 bits)
    pub const MAX: u64 = 0xFFFF_FFFF_FFFF;

    /// Create a serial, returns None if it does not fit in 48 bits
    #[must_use]
    pub const fn new(serial: u64) -> Option<Self> {
        if serial <= Self::MAX {
            Some(Self(serial))
        } else {
            None
        }
    }

    /// Raw serial value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The four significant address bytes as they appear on the wire
    #[must_use]
    pub const fn address_bytes(self) -> [u8; 4] {
        let v = self.0 as u32;
        v.to_be_bytes()
    }

    /// Five byte pipe address for the 2.4 GHz transceiver (LSB first)
    #[must_use]
    pub const fn pipe_address(self) -> [u8; 5] {
        let a = self.address_bytes();
        [0x01, a[0], a[1], a[2], a[3]]
    }
}

impl fmt::Debug for InverterSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InverterSerial({:012X})", self.0)
    }
}

impl fmt::Display for InverterSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:012X}", self.0)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for InverterSerial {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{:x}", self.0);
    }
}

/// Serial number of this DTU (local station address)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DtuSerial(u32);

impl DtuSerial {
    /// Serial used when no chip id is available
    pub const DEFAULT: Self = Self(0x8100_1765);

    /// Create from a raw serial
    #[must_use]
    pub const fn new(serial: u32) -> Self {
        Self(serial)
    }

    /// Derive a serial from the MCU unique id.
    ///
    /// The lower seven nibbles are folded into decimal digits and the
    /// leading digit is fixed to 8.
    #[must_use]
    pub const fn from_chip_id(chip_id: u32) -> Self {
        let mut serial = 0u32;
        let mut shift = 0;
        while shift < 28 {
            let mut nibble = (chip_id >> shift) & 0x0F;
            if nibble > 0x09 {
                nibble -= 6;
            }
            serial |= nibble << shift;
            shift += 4;
        }
        Self(serial | 0x8000_0000)
    }

    /// Raw serial value
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Address bytes as written into the packet header
    #[must_use]
    pub const fn address_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Five byte pipe address the DTU listens on (LSB first)
    #[must_use]
    pub const fn pipe_address(self) -> [u8; 5] {
        let a = self.address_bytes();
        [0x01, a[0], a[1], a[2], a[3]]
    }
}

impl Default for DtuSerial {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Debug for DtuSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DtuSerial({:08X})", self.0)
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for DtuSerial {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{:x}", self.0);
    }
}

/// Information request codes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfoCmd {
    /// Short device information
    DevInformSimple,
    /// Full device information (firmware, hardware)
    DevInformAll,
    /// Grid profile parameters
    GridProfile,
    /// Hardware configuration
    HardwareConfig,
    /// System configuration (includes the active power limit)
    SystemConfig,
    /// Real-time run data
    RealTimeRunData,
    /// Alarm log
    AlarmData,
    /// Radio loss statistics
    GetLossRate,
    /// Legacy: channel 1 data
    MiChannel1,
    /// Legacy: channel 2 data
    MiChannel2,
    /// Legacy: all four channels
    MiFourChannel,
    /// Legacy: device information
    MiDevInfo,
}

impl InfoCmd {
    /// Wire code of the request
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::DevInformSimple => 0x00,
            Self::DevInformAll => 0x01,
            Self::GridProfile => 0x02,
            Self::HardwareConfig => 0x03,
            Self::SystemConfig => 0x05,
            Self::RealTimeRunData => 0x0B,
            Self::AlarmData => 0x11,
            Self::GetLossRate => 0x15,
            Self::MiChannel1 => 0x09,
            Self::MiChannel2 => 0x11,
            Self::MiFourChannel => 0x36,
            Self::MiDevInfo => 0x0F,
        }
    }

    /// Check if the response may arrive on any of the hopping channels
    #[must_use]
    pub const fn loops_all_channels(self) -> bool {
        matches!(self, Self::MiChannel1 | Self::MiChannel2)
    }

    /// Default polling request for a generation
    #[must_use]
    pub const fn default_for(generation: Generation) -> Self {
        match generation {
            Generation::X => Self::RealTimeRunData,
            Generation::Y1 => Self::MiChannel1,
            Generation::Y2 => Self::MiFourChannel,
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for InfoCmd {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Info(0x{:x})", self.code());
    }
}

/// Power limit persistence class and unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimitKind {
    /// Watts, lost on inverter restart
    #[default]
    AbsoluteNonPersistent,
    /// Percent, lost on inverter restart
    RelativeNonPersistent,
    /// Watts, stored by the inverter
    AbsolutePersistent,
    /// Percent, stored by the inverter
    RelativePersistent,
}

impl LimitKind {
    /// Two byte persistence setting sent with the limit
    #[must_use]
    pub const fn setting(self) -> u16 {
        match self {
            Self::AbsoluteNonPersistent => 0x0000,
            Self::RelativeNonPersistent => 0x0001,
            Self::AbsolutePersistent => 0x0100,
            Self::RelativePersistent => 0x0101,
        }
    }

    /// Check if the inverter stores the limit
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        matches!(self, Self::AbsolutePersistent | Self::RelativePersistent)
    }

    /// Check if the value is a percentage
    #[must_use]
    pub const fn is_relative(self) -> bool {
        matches!(self, Self::RelativeNonPersistent | Self::RelativePersistent)
    }
}

/// Power limit value in tenths of its unit (W or %)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PowerLimit {
    tenths: u16,
    kind: LimitKind,
}

impl PowerLimit {
    /// Create from a value in tenths
    #[must_use]
    pub const fn from_tenths(tenths: u16, kind: LimitKind) -> Self {
        Self { tenths, kind }
    }

    /// Create from a whole value (saturating)
    #[must_use]
    pub const fn from_whole(value: u16, kind: LimitKind) -> Self {
        Self {
            tenths: value.saturating_mul(10),
            kind,
        }
    }

    /// Value in tenths (fixed point x10, as transmitted)
    #[must_use]
    pub const fn tenths(self) -> u16 {
        self.tenths
    }

    /// Whole value, fraction truncated
    #[must_use]
    pub const fn whole(self) -> u16 {
        self.tenths / 10
    }

    /// Persistence class
    #[must_use]
    pub const fn kind(self) -> LimitKind {
        self.kind
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for PowerLimit {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}.{}", self.tenths / 10, self.tenths % 10);
    }
}

/// Device control request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevControl {
    /// Start feeding in
    TurnOn,
    /// Stop feeding in
    TurnOff,
    /// Reboot the inverter
    Restart,
    /// Lock the inverter
    Lock,
    /// Unlock the inverter
    Unlock,
    /// Active power limit
    ActivePowerLimit(PowerLimit),
    /// Reactive power limit
    ReactivePowerLimit(PowerLimit),
    /// Power factor setpoint
    PowerFactor(PowerLimit),
}

impl DevControl {
    /// Wire command code
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::TurnOn => 0,
            Self::TurnOff => 1,
            Self::Restart => 2,
            Self::Lock => 3,
            Self::Unlock => 4,
            Self::ActivePowerLimit(_) => 11,
            Self::ReactivePowerLimit(_) => 12,
            Self::PowerFactor(_) => 13,
        }
    }

    /// Limit payload for limit-class commands
    #[must_use]
    pub const fn limit(self) -> Option<PowerLimit> {
        match self {
            Self::ActivePowerLimit(l) | Self::ReactivePowerLimit(l) | Self::PowerFactor(l) => {
                Some(l)
            }
            _ => None,
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for DevControl {
    fn format(&self, f: defmt::Formatter) {
        match self.limit() {
            Some(l) => defmt::write!(f, "Ctrl({}, {})", self.code(), l),
            None => defmt::write!(f, "Ctrl({})", self.code()),
        }
    }
}
