//! System configuration and hardware constants
//!
//! Compile-time constants for radio timing, buffer sizes and pin mappings,
//! plus the runtime configuration structs the embedding application fills in.
//! Loading these from flash is left to the application.

use heapless::String;

use crate::radio::cmt::Region;
use crate::types::{Generation, InverterSerial, RadioBackend};

/// SPI clock for the nRF24L01+ (chip maximum is 10 MHz)
pub const NRF_SPI_FREQUENCY_HZ: u32 = 8_000_000;

/// Largest frame either transceiver carries
pub const MAX_RF_PAYLOAD_SIZE: usize = 32;

/// Largest frame read from the sub-GHz FIFO
pub const CMT_MAX_RX_LEN: usize = 28;

/// Number of hopping channels on the 2.4 GHz link
pub const RF_CHANNELS: usize = 5;

/// nRF24 channel numbers (2403, 2423, 2440, 2461, 2475 MHz)
pub const NRF_CHANNEL_LIST: [u8; RF_CHANNELS] = [3, 23, 40, 61, 75];

/// Depth of the inbound frame queue per radio
pub const FRAME_QUEUE_DEPTH: usize = 16;

/// Highest frame sequence number tracked during reassembly
pub const MAX_FRAME_INDEX: u8 = 31;

/// Expected frame count assumed before the first complete response
pub const DEFAULT_FRAMES_EXPECTED: u8 = 0x0C;

/// Maximum number of registered inverters
pub const MAX_NUM_INVERTERS: usize = 10;

/// Info requests queued per inverter
pub const INFO_QUEUE_DEPTH: usize = 8;

/// Capacity of the application scheduler
pub const SCHEDULER_CAPACITY: usize = 16;

/// Time the DTU needs to push one frame out (ms)
pub const DURATION_TXFRAME_MS: u32 = 85;

/// Airtime of a single response frame (ms)
pub const DURATION_ONEFRAME_MS: u32 = 50;

/// Reserve added to a listen window for plain info requests (ms)
pub const DURATION_RESERVE_MS: u32 = 90;

/// Reserve added to a listen window for control requests (ms)
pub const DURATION_RESERVE_CTRL_MS: u32 = 140;

/// Shortest dwell time on one channel while hopping (ms)
pub const DURATION_LISTEN_MIN_MS: u32 = 5;

/// Pause after the last frame of a response on the 2.4 GHz link (ms)
pub const DURATION_PAUSE_LASTFR_MS: u32 = 45;

/// Pause after the last frame of a response on the sub-GHz link (ms)
pub const CMT_PAUSE_LASTFR_MS: u32 = 2;

/// Bound on frames drained from the FIFO in one interrupt
pub const NRF_MAX_DRAIN: usize = 3;

/// RSSI reported when the received power detector fired (dBm)
pub const RSSI_STRONG_DBM: i8 = -64;

/// RSSI reported otherwise (dBm)
pub const RSSI_WEAK_DBM: i8 = -75;

/// Sunrise computation retry while the clock is unset (s)
pub const SUNRISE_RETRY_S: u32 = 5;

/// Default seconds between polls of the next inverter
pub const DEFAULT_SEND_INTERVAL_S: u32 = 15;

/// Default retransmit requests per response
pub const DEFAULT_MAX_RETRANSMITS: u8 = 5;

/// Pin assignments for GPIO
pub mod pins {
    //! GPIO pin assignments matching the schematic

    /// Status LED (directly on MCU)
    pub const LED_STATUS: &str = "PA5";

    /// SPI1 SCK (nRF24)
    pub const SPI1_SCK: &str = "PB3";

    /// SPI1 MISO (nRF24)
    pub const SPI1_MISO: &str = "PB4";

    /// SPI1 MOSI (nRF24)
    pub const SPI1_MOSI: &str = "PB5";

    /// nRF24 chip select (active low)
    pub const NRF_CS: &str = "PA4";

    /// nRF24 chip enable
    pub const NRF_CE: &str = "PB0";

    /// nRF24 interrupt request (active low)
    pub const NRF_IRQ: &str = "PB1";
}

/// Configuration of the 2.4 GHz front-end
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NrfConfig {
    /// Use the nRF24 at all
    pub enabled: bool,
    /// Default PA level (0 = min .. 3 = max)
    pub pa_level: u8,
}

impl Default for NrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pa_level: 3,
        }
    }
}

/// Configuration of the sub-GHz front-end
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CmtConfig {
    /// Use the CMT2300A at all
    pub enabled: bool,
    /// Regulatory region
    pub region: Region,
}

/// Location and offsets for the day/night gate
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct SunConfig {
    /// Latitude in degrees, north positive
    pub latitude: f32,
    /// Longitude in degrees, east positive
    pub longitude: f32,
    /// Seconds added to sunrise (negative = earlier)
    pub offset_sunrise_s: i32,
    /// Seconds added to sunset (negative = earlier)
    pub offset_sunset_s: i32,
    /// Suppress communication between sunset and sunrise
    pub disable_night_comm: bool,
}

impl SunConfig {
    /// A location of exactly (0, 0) means "not configured"
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

/// Per-inverter configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InverterConfig {
    /// Serial number (radio address)
    pub serial: InverterSerial,
    /// Display name
    pub name: String<16>,
    /// Poll this inverter
    pub enabled: bool,
    /// Command dialect
    pub generation: Generation,
    /// Radio front-end
    pub backend: RadioBackend,
    /// nRF PA level for this inverter
    pub pa_level: u8,
    /// Sub-GHz channel for this inverter
    pub frequency_channel: u8,
    /// Keep polling at night regardless of the global setting
    pub ignore_night: bool,
    /// Rated power in W (0 = unknown)
    pub rated_power_w: u16,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            serial: InverterSerial::default(),
            name: String::new(),
            enabled: true,
            generation: Generation::X,
            backend: RadioBackend::Nrf,
            pa_level: 3,
            frequency_channel: 0,
            ignore_night: false,
            rated_power_w: 0,
        }
    }
}

/// Top level runtime configuration
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DtuConfig {
    /// Fixed DTU serial, derived from the chip id when None
    pub dtu_serial: Option<u32>,
    /// 2.4 GHz front-end
    pub nrf: NrfConfig,
    /// Sub-GHz front-end
    pub cmt: CmtConfig,
    /// Day/night gate
    pub sun: SunConfig,
    /// Seconds between two sends
    pub send_interval_s: u32,
    /// Retransmit requests per response
    pub max_retransmits: u8,
    /// Publish zero values when an inverter goes quiet at night
    pub reset_values_at_night: bool,
}

impl Default for DtuConfig {
    fn default() -> Self {
        Self {
            dtu_serial: None,
            nrf: NrfConfig::default(),
            cmt: CmtConfig::default(),
            sun: SunConfig::default(),
            send_interval_s: DEFAULT_SEND_INTERVAL_S,
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            reset_values_at_night: false,
        }
    }
}

impl DtuConfig {
    /// Send interval, never below one second
    #[must_use]
    pub const fn send_interval(&self) -> u32 {
        if self.send_interval_s == 0 {
            1
        } else {
            self.send_interval_s
        }
    }
}
