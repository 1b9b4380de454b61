//! Hardware Abstraction Layer
//!
//! Thin wrappers over STM32G474 peripherals used by the firmware shell:
//! the millisecond clock that drives the cooperative loop, the status LED
//! and the chip id the DTU serial is derived from.

pub mod gpio;
pub mod timer;

/// Fold the 96-bit unique device id into 32 bits
#[must_use]
pub fn chip_id() -> u32 {
    let uid = embassy_stm32::uid::uid();
    uid.chunks_exact(4).fold(0u32, |acc, w| {
        acc ^ u32::from_le_bytes([w[0], w[1], w[2], w[3]])
    })
}
