//! Inverter DTU Main Application
//!
//! Entry point for the STM32G474-based DTU firmware.
//! Brings up SPI and the nRF24L01+, spawns the IRQ pin task and runs the
//! cooperative DTU loop.

#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use {defmt_rtt as _, panic_probe as _};

use dtu_firmware::drivers::nrf24::Nrf24l01;
use dtu_firmware::hal::gpio::{LinkIndication, StatusLed};
use dtu_firmware::hal::timer::{MillisClock, RateLimiter};
use dtu_firmware::inverter::InverterLink;
use dtu_firmware::packet::RadioPacket;
use dtu_firmware::prelude::*;
use dtu_firmware::radio::nrf::NrfRadio;

/// Set by the nRF24 IRQ line, consumed by the radio poll
static RADIO_IRQ: IrqFlag = IrqFlag::new();

/// Epoch used until a time source calls `set_timestamp`
const OFFLINE_EPOCH: u32 = 1;

type NrfSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
type NrfChip = Nrf24l01<NrfSpi, Output<'static>, Delay>;

/// Sink that only logs; publishers hook in here
struct LogSink;

impl PayloadSink for LogSink {
    fn on_frame(&mut self, iv: &InverterLink, frame: &RadioPacket) {
        debug!("{} rx ch {} rssi {}: {=[u8]:x}", iv.serial(), frame.channel, frame.rssi, frame.as_bytes());
    }

    fn on_zero_values(&mut self, iv: &InverterLink) {
        info!("{} zero values", iv.serial());
    }

    fn on_command_result(&mut self, iv: &InverterLink, cmd: u8, ok: bool) {
        info!("{} command {} ok {}", iv.serial(), cmd, ok);
    }
}

/// Main entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Inverter DTU Firmware v{}", env!("CARGO_PKG_VERSION"));

    let p = embassy_stm32::init(embassy_stm32::Config::default());
    info!("Peripherals initialized");

    let mut led = StatusLed::new(Output::new(p.PA5, Level::Low, Speed::Low));

    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(NRF_SPI_FREQUENCY_HZ);
    let spi = Spi::new_blocking(p.SPI1, p.PB3, p.PB5, p.PB4, spi_config);
    let cs = Output::new(p.PA4, Level::High, Speed::VeryHigh);
    let ce = Output::new(p.PB0, Level::Low, Speed::VeryHigh);
    let spi_dev = ExclusiveDevice::new(spi, cs, Delay).unwrap();
    let chip: NrfChip = Nrf24l01::new(spi_dev, ce, Delay);

    let irq = ExtiInput::new(p.PB1, p.EXTI1, Pull::Up);
    spawner.spawn(radio_irq_task(irq)).unwrap();

    let config = DtuConfig::default();
    let dtu_serial = config
        .dtu_serial
        .map_or_else(|| DtuSerial::from_chip_id(dtu_firmware::hal::chip_id()), DtuSerial::new);
    info!("DTU serial {}", dtu_serial);

    let mut nrf = NrfRadio::new(chip, &RADIO_IRQ, &config.nrf, dtu_serial);
    nrf.setup();

    let clock = MillisClock;
    let mut dtu = Dtu::new(config, nrf, NoRadio::new(), LogSink);

    if let Some(serial) = option_env!("DTU_INVERTER_SERIAL")
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .and_then(InverterSerial::new)
    {
        let inverter = InverterConfig {
            serial,
            ..InverterConfig::default()
        };
        if let Err(e) = dtu.add_inverter(inverter) {
            warn!("inverter not added: {}", e);
        }
    } else {
        warn!("no inverter configured");
    }

    if let Err(e) = dtu.setup(clock.now_ms()) {
        error!("scheduler setup failed: {}", e);
    }
    dtu.set_timestamp(OFFLINE_EPOCH);

    info!("Entering main loop");

    let mut led_rate = RateLimiter::from_millis(500);
    loop {
        dtu.tick(clock.now_ms());
        if led_rate.check() {
            led.show(LinkIndication::from_state(
                dtu.is_chip_connected(RadioBackend::Nrf),
                dtu.any_comm_enabled(),
            ));
        }
        clock.pace(1).await;
    }
}

/// Forward falling edges of the nRF24 IRQ line to the radio
#[embassy_executor::task]
async fn radio_irq_task(mut irq: ExtiInput<'static>) {
    loop {
        irq.wait_for_falling_edge().await;
        RADIO_IRQ.raise();
    }
}
