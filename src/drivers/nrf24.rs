//! nRF24L01+ Transceiver Driver
//!
//! Register-level driver over an `embedded-hal` [`SpiDevice`] plus the CE
//! pin. Configured for 250 kbps, CRC16, dynamic payload length and
//! auto-ack, as the inverters expect.
//!
//! Multi-byte addresses go out on the bus in the order given.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::config::MAX_RF_PAYLOAD_SIZE;
use crate::radio::nrf::{IrqSources, Nrf24};

/// Register addresses
mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const EN_AA: u8 = 0x01;
    pub const EN_RXADDR: u8 = 0x02;
    pub const SETUP_AW: u8 = 0x03;
    pub const SETUP_RETR: u8 = 0x04;
    pub const RF_CH: u8 = 0x05;
    pub const RF_SETUP: u8 = 0x06;
    pub const STATUS: u8 = 0x07;
    pub const RPD: u8 = 0x09;
    pub const RX_ADDR_P0: u8 = 0x0A;
    pub const RX_ADDR_P1: u8 = 0x0B;
    pub const TX_ADDR: u8 = 0x10;
    pub const FIFO_STATUS: u8 = 0x17;
    pub const DYNPD: u8 = 0x1C;
    pub const FEATURE: u8 = 0x1D;
}

/// SPI commands
mod cmd {
    pub const R_REGISTER: u8 = 0x00;
    pub const W_REGISTER: u8 = 0x20;
    pub const R_RX_PL_WID: u8 = 0x60;
    pub const R_RX_PAYLOAD: u8 = 0x61;
    pub const W_TX_PAYLOAD: u8 = 0xA0;
    pub const FLUSH_TX: u8 = 0xE1;
    pub const FLUSH_RX: u8 = 0xE2;
}

const CONFIG_PRIM_RX: u8 = 1 << 0;
const CONFIG_PWR_UP: u8 = 1 << 1;
const CONFIG_CRCO: u8 = 1 << 2;
const CONFIG_EN_CRC: u8 = 1 << 3;

const STATUS_MAX_RT: u8 = 1 << 4;
const STATUS_TX_DS: u8 = 1 << 5;
const STATUS_RX_DR: u8 = 1 << 6;

const RF_SETUP_DR_LOW: u8 = 1 << 5;
const RF_SETUP_PWR_MASK: u8 = 0b110;

const FIFO_RX_EMPTY: u8 = 1 << 0;
const FEATURE_EN_DPL: u8 = 1 << 2;

/// Driver errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error<S, P> {
    /// SPI transfer failed
    Spi(S),
    /// CE pin could not be driven
    Pin(P),
}

/// nRF24L01+ driver
pub struct Nrf24l01<SPI, CE, D> {
    spi: SPI,
    ce: CE,
    delay: D,
    config: u8,
}

type DriverResult<T, SPI, CE> =
    Result<T, Error<<SPI as embedded_hal::spi::ErrorType>::Error, <CE as embedded_hal::digital::ErrorType>::Error>>;

impl<SPI, CE, D> Nrf24l01<SPI, CE, D>
where
    SPI: SpiDevice,
    CE: OutputPin,
    D: DelayNs,
{
    /// Wrap the bus, the CE pin and a delay source
    pub fn new(spi: SPI, ce: CE, delay: D) -> Self {
        Self {
            spi,
            ce,
            delay,
            config: CONFIG_EN_CRC | CONFIG_CRCO,
        }
    }

    /// Release the peripherals
    pub fn release(self) -> (SPI, CE, D) {
        (self.spi, self.ce, self.delay)
    }

    fn command(&mut self, command: u8) -> DriverResult<(), SPI, CE> {
        self.spi.write(&[command]).map_err(Error::Spi)
    }

    fn read_reg(&mut self, register: u8) -> DriverResult<u8, SPI, CE> {
        let mut value = [0u8];
        self.spi
            .transaction(&mut [
                Operation::Write(&[cmd::R_REGISTER | register]),
                Operation::Read(&mut value),
            ])
            .map_err(Error::Spi)?;
        Ok(value[0])
    }

    fn write_reg(&mut self, register: u8, value: u8) -> DriverResult<(), SPI, CE> {
        self.write_buf(cmd::W_REGISTER | register, &[value])
    }

    fn write_buf(&mut self, command: u8, data: &[u8]) -> DriverResult<(), SPI, CE> {
        self.spi
            .transaction(&mut [Operation::Write(&[command]), Operation::Write(data)])
            .map_err(Error::Spi)
    }

    fn set_ce(&mut self, high: bool) -> DriverResult<(), SPI, CE> {
        if high {
            self.ce.set_high().map_err(Error::Pin)
        } else {
            self.ce.set_low().map_err(Error::Pin)
        }
    }

    fn write_config(&mut self, config: u8) -> DriverResult<(), SPI, CE> {
        self.config = config;
        self.write_reg(reg::CONFIG, config)
    }
}

impl<SPI, CE, D> Nrf24 for Nrf24l01<SPI, CE, D>
where
    SPI: SpiDevice,
    CE: OutputPin,
    D: DelayNs,
{
    type Error = Error<SPI::Error, CE::Error>;

    fn init(&mut self, dtu_address: &[u8; 5]) -> Result<(), Self::Error> {
        self.set_ce(false)?;
        // power-on reset settling
        self.delay.delay_ms(5);

        self.write_config(CONFIG_EN_CRC | CONFIG_CRCO)?;
        self.write_reg(reg::SETUP_AW, 0x03)?;
        self.write_reg(reg::RF_SETUP, RF_SETUP_DR_LOW | RF_SETUP_PWR_MASK)?;
        self.write_reg(reg::FEATURE, FEATURE_EN_DPL)?;
        self.write_reg(reg::DYNPD, 0x03)?;
        self.write_reg(reg::EN_AA, 0x03)?;
        self.write_reg(reg::EN_RXADDR, 0x03)?;
        self.write_buf(cmd::W_REGISTER | reg::RX_ADDR_P1, dtu_address)?;
        self.write_reg(reg::STATUS, STATUS_RX_DR | STATUS_TX_DS | STATUS_MAX_RT)?;
        self.command(cmd::FLUSH_RX)?;
        self.command(cmd::FLUSH_TX)?;

        self.write_config(self.config | CONFIG_PWR_UP)?;
        self.delay.delay_us(1500);
        Ok(())
    }

    fn is_connected(&mut self) -> Result<bool, Self::Error> {
        let aw = self.read_reg(reg::SETUP_AW)?;
        Ok((1..=3).contains(&aw))
    }

    fn set_pa_level(&mut self, level: u8) -> Result<(), Self::Error> {
        let setup = self.read_reg(reg::RF_SETUP)? & !RF_SETUP_PWR_MASK;
        self.write_reg(reg::RF_SETUP, setup | (level.min(3) << 1))
    }

    fn set_retries(&mut self, delay: u8, count: u8) -> Result<(), Self::Error> {
        self.write_reg(reg::SETUP_RETR, (delay.min(15) << 4) | count.min(15))
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
        self.write_reg(reg::RF_CH, channel.min(125))
    }

    fn open_writing_pipe(&mut self, address: &[u8; 5]) -> Result<(), Self::Error> {
        self.write_buf(cmd::W_REGISTER | reg::RX_ADDR_P0, address)?;
        self.write_buf(cmd::W_REGISTER | reg::TX_ADDR, address)
    }

    fn start_listening(&mut self) -> Result<(), Self::Error> {
        self.write_config(self.config | CONFIG_PRIM_RX)?;
        self.write_reg(reg::STATUS, STATUS_RX_DR | STATUS_TX_DS | STATUS_MAX_RT)?;
        self.set_ce(true)
    }

    fn stop_listening(&mut self) -> Result<(), Self::Error> {
        self.set_ce(false)?;
        self.write_config(self.config & !CONFIG_PRIM_RX)
    }

    fn flush_tx(&mut self) -> Result<(), Self::Error> {
        self.command(cmd::FLUSH_TX)
    }

    fn flush_rx(&mut self) -> Result<(), Self::Error> {
        self.command(cmd::FLUSH_RX)
    }

    fn start_fast_write(&mut self, frame: &[u8]) -> Result<(), Self::Error> {
        let len = frame.len().min(MAX_RF_PAYLOAD_SIZE);
        self.write_buf(cmd::W_TX_PAYLOAD, &frame[..len])?;
        self.set_ce(true)
    }

    fn what_happened(&mut self) -> Result<IrqSources, Self::Error> {
        let status = self.read_reg(reg::STATUS)?;
        let sources = status & (STATUS_RX_DR | STATUS_TX_DS | STATUS_MAX_RT);
        if sources != 0 {
            self.write_reg(reg::STATUS, sources)?;
        }
        Ok(IrqSources {
            tx_ok: status & STATUS_TX_DS != 0,
            tx_fail: status & STATUS_MAX_RT != 0,
            rx_ready: status & STATUS_RX_DR != 0,
        })
    }

    fn available(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_reg(reg::FIFO_STATUS)? & FIFO_RX_EMPTY == 0)
    }

    fn payload_size(&mut self) -> Result<u8, Self::Error> {
        let mut width = [0u8];
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::R_RX_PL_WID]), Operation::Read(&mut width)])
            .map_err(Error::Spi)?;
        if usize::from(width[0]) > MAX_RF_PAYLOAD_SIZE {
            self.command(cmd::FLUSH_RX)?;
            return Ok(0);
        }
        Ok(width[0])
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        let len = buf.len().min(MAX_RF_PAYLOAD_SIZE);
        self.spi
            .transaction(&mut [Operation::Write(&[cmd::R_RX_PAYLOAD]), Operation::Read(&mut buf[..len])])
            .map_err(Error::Spi)?;
        self.write_reg(reg::STATUS, STATUS_RX_DR)
    }

    fn received_power_detected(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_reg(reg::RPD)? & 0x01 != 0)
    }
}
