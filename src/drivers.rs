//! Peripheral Drivers
//!
//! Drivers for the external radio ICs. They only depend on the
//! `embedded-hal` traits, so host tests can run them against mock buses.

pub mod nrf24;
