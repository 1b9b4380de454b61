//! Frame checksums
//!
//! Every frame ends in a CRC8 over all preceding bytes. Longer payloads
//! additionally carry a CRC16 (MODBUS) over the payload, written MSB first.

use crc::{Algorithm, Crc, CRC_16_MODBUS};

/// CRC8 with polynomial 0x01, no reflection, zero init and xorout
pub const CRC_8_FRAME: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x01,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0x31,
    residue: 0x00,
};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_FRAME);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Frame trailer checksum
#[must_use]
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Payload checksum
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Check that the last byte of a frame is the CRC8 of everything before it
#[must_use]
pub fn check_crc8(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&last, body)) => crc8(body) == last,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_values() {
        assert_eq!(crc8(b"123456789"), 0x31);
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(crc8(&[]), 0x00);
        assert_eq!(crc16(&[]), 0xFFFF);
        assert!(!check_crc8(&[]));
    }

    #[test]
    fn test_check_crc8() {
        let header = [0x15, 0x72, 0x22, 0x00, 0x03, 0x81, 0x00, 0x17, 0x65, 0x81];
        let mut frame = [0u8; 11];
        frame[..10].copy_from_slice(&header);
        frame[10] = crc8(&header);
        assert_eq!(frame[10], 0x34);
        assert!(check_crc8(&frame));

        frame[3] ^= 0x01;
        assert!(!check_crc8(&frame));
    }
}
