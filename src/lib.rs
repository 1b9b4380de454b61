//! Inverter DTU Firmware Library
//!
//! Core of an STM32-based data transfer unit that polls solar
//! micro-inverters over 2.4 GHz (nRF24L01+) and sub-GHz (CMT2300A) radio,
//! forwards decoded frames to a telemetry sink and issues control
//! commands such as power limiting.
//!
//! # Architecture
//!
//! The firmware is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    APPLICATION LAYER                         │
//! │  Dtu loop  │  Inverter registry  │  Day/night gate           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     PROTOCOL LAYER                           │
//! │  Command encoder  │  Framing + CRC  │  Frame reassembly      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      RADIO LAYER                             │
//! │  Radio trait  │  nRF24 back-end  │  CMT2300A back-end        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   HAL / DRIVER LAYER                         │
//! │  SPI  │  EXTI  │  GPIO  │  nRF24L01+ registers               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  COOPERATIVE SCHEDULER                       │
//! │        named events driven by a millisecond clock            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - **Nothing blocks**: radios are polled once per loop iteration
//! - **Type-driven design**: serials, limits and commands are typed
//! - **No unsafe in application code**
//! - **Hardware behind traits**: chip seams are mockable on the host
//! - **Explicit error handling**: all fallible operations return `Result`

#![cfg_attr(feature = "embedded", no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export dependencies needed by applications (only in embedded mode)
#[cfg(feature = "embedded")]
pub use embassy_executor;
#[cfg(feature = "embedded")]
pub use embassy_stm32;
#[cfg(feature = "embedded")]
pub use embassy_time;

/// Hardware Abstraction Layer
///
/// Clock, status LED and chip id on the STM32G474.
#[cfg(feature = "embedded")]
pub mod hal;

/// Peripheral Drivers
///
/// Register-level drivers for the radio ICs.
pub mod drivers;

/// Frame checksums
pub mod crc;

/// Wire frame layout
pub mod packet;

/// Command encoding per inverter generation
pub mod command;

/// Radio Interface
///
/// The `Radio` trait and both transceiver back-ends.
pub mod radio;

/// Inverter registry
pub mod inverter;

/// Cooperative event scheduler
pub mod scheduler;

/// Sunrise/sunset and the night gate
pub mod sun;

/// Application core
pub mod dtu;

/// Shared types used across modules
pub mod types;

/// System configuration and constants
pub mod config;

/// Prelude module for common imports
#[cfg(feature = "embedded")]
pub mod prelude {
    //! Convenient re-exports for common types and traits.

    pub use crate::config::*;
    pub use crate::types::*;

    pub use crate::dtu::{Dtu, PayloadSink};
    pub use crate::radio::{IrqFlag, NoRadio, Radio};

    // Common traits
    pub use embedded_hal::digital::OutputPin;
    pub use embedded_hal::spi::SpiDevice;

    // Embassy
    pub use embassy_time::{Duration, Instant, Timer};

    // Error handling
    pub use core::result::Result;

    // Logging
    pub use defmt::{debug, error, info, trace, warn};
}
