//! Wire frame layout
//!
//! ```text
//! ┌────┬──────────────┬──────────────┬───────┬─────────────┬────────┬──────┐
//! │ id │ inverter (4) │   DTU (4)    │ index │ payload ... │ CRC16? │ CRC8 │
//! └────┴──────────────┴──────────────┴───────┴─────────────┴────────┴──────┘
//!   0      1..=4          5..=8          9        10..
//! ```
//!
//! Both addresses are written most significant byte first. Inverter
//! responses carry the request id with bit 7 set and a frame index whose
//! bit 7 marks the last frame of a response.

use crate::config::MAX_RF_PAYLOAD_SIZE;
use crate::crc::{check_crc8, crc16, crc8};

/// Length of the frame header
pub const HEADER_LEN: usize = 10;

/// Information request
pub const TX_REQ_INFO: u8 = 0x15;

/// Device control request
pub const TX_REQ_DEVCONTROL: u8 = 0x51;

/// Legacy DRED control request
pub const TX_REQ_DREDCONTROL: u8 = 0x50;

/// Sub-GHz channel negotiation
pub const TX_REQ_SWITCH_CHANNEL: u8 = 0x56;

/// Frame index for "send all frames"
pub const ALL_FRAMES: u8 = 0x80;

/// Frame index for "single frame"
pub const SINGLE_FRAME: u8 = 0x81;

/// A received frame plus receive metadata
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RadioPacket {
    data: [u8; MAX_RF_PAYLOAD_SIZE],
    len: u8,
    /// Channel the frame arrived on
    pub channel: u8,
    /// Signal strength estimate in dBm
    pub rssi: i8,
    /// Milliseconds between our transmission and reception
    pub millis: u16,
}

impl RadioPacket {
    /// Copy a received frame, truncating to the maximum frame size
    #[must_use]
    pub fn new(bytes: &[u8], channel: u8, rssi: i8, millis: u16) -> Self {
        let len = bytes.len().min(MAX_RF_PAYLOAD_SIZE);
        let mut data = [0u8; MAX_RF_PAYLOAD_SIZE];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            data,
            len: len as u8,
            channel,
            rssi,
            millis,
        }
    }

    /// Frame bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Frame length
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Check for an empty frame
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Message id (byte 0)
    #[must_use]
    pub const fn message_id(&self) -> u8 {
        self.data[0]
    }

    /// Frame index (byte 9)
    #[must_use]
    pub const fn frame_index(&self) -> u8 {
        self.data[9]
    }

    /// Sender address bytes (1..=4)
    #[must_use]
    pub const fn source(&self) -> [u8; 4] {
        [self.data[1], self.data[2], self.data[3], self.data[4]]
    }

    /// Check whether the sender address matches
    #[must_use]
    pub fn is_from(&self, address: &[u8; 4]) -> bool {
        self.len as usize > HEADER_LEN && self.source() == *address
    }

    /// Payload between header and trailer CRC8
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = self.len as usize;
        if len <= HEADER_LEN {
            &[]
        } else {
            &self.data[HEADER_LEN..len - 1]
        }
    }

    /// Validate the trailing CRC8
    #[must_use]
    pub fn crc_ok(&self) -> bool {
        check_crc8(self.as_bytes())
    }
}

impl core::fmt::Debug for RadioPacket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RadioPacket")
            .field("data", &self.as_bytes())
            .field("channel", &self.channel)
            .field("rssi", &self.rssi)
            .finish()
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for RadioPacket {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "ch{} {}dBm {}ms {=[u8]:x}",
            self.channel,
            self.rssi,
            self.millis,
            self.as_bytes()
        );
    }
}

/// Outgoing frame under construction
#[derive(Clone, Debug)]
pub struct TxBuffer {
    data: [u8; MAX_RF_PAYLOAD_SIZE],
}

impl Default for TxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TxBuffer {
    /// Create an empty buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: [0u8; MAX_RF_PAYLOAD_SIZE],
        }
    }

    /// Clear the buffer and write the frame header
    pub fn build_header(&mut self, inverter: [u8; 4], dtu: [u8; 4], message_id: u8, frame_index: u8) {
        self.data = [0u8; MAX_RF_PAYLOAD_SIZE];
        self.data[0] = message_id;
        self.data[1..5].copy_from_slice(&inverter);
        self.data[5..9].copy_from_slice(&dtu);
        self.data[9] = frame_index;
    }

    /// Write bytes at an offset, silently clipped at the buffer end
    pub fn put(&mut self, offset: usize, bytes: &[u8]) {
        if offset >= MAX_RF_PAYLOAD_SIZE {
            return;
        }
        let n = bytes.len().min(MAX_RF_PAYLOAD_SIZE - offset);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
    }

    /// Write a big-endian u16
    pub fn put_u16(&mut self, offset: usize, value: u16) {
        self.put(offset, &value.to_be_bytes());
    }

    /// Write a big-endian u32
    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.put(offset, &value.to_be_bytes());
    }

    /// Append checksums and return the final frame length.
    ///
    /// The CRC16 covers `[10, len)` and is appended only when requested and
    /// `len > 10`. The CRC8 covers everything before it, CRC16 included.
    pub fn finalize(&mut self, len: usize, include_crc16: bool) -> usize {
        let with_crc16 = include_crc16 && len > HEADER_LEN;
        let limit = MAX_RF_PAYLOAD_SIZE - if with_crc16 { 3 } else { 1 };
        let mut len = len.min(limit);

        if with_crc16 {
            let crc = crc16(&self.data[HEADER_LEN..len]);
            self.put_u16(len, crc);
            len += 2;
        }
        self.data[len] = crc8(&self.data[..len]);
        len + 1
    }

    /// Bytes of the finalized frame
    #[must_use]
    pub fn frame(&self, len: usize) -> &[u8] {
        &self.data[..len.min(MAX_RF_PAYLOAD_SIZE)]
    }

    /// Single byte accessor
    #[must_use]
    pub const fn byte(&self, index: usize) -> u8 {
        self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IV: [u8; 4] = [0x72, 0x22, 0x00, 0x03];
    const DTU: [u8; 4] = [0x81, 0x00, 0x17, 0x65];

    #[test]
    fn test_header_layout() {
        let mut tx = TxBuffer::new();
        tx.put(20, &[0xFF; 4]);
        tx.build_header(IV, DTU, TX_REQ_INFO, ALL_FRAMES);
        assert_eq!(
            tx.frame(10),
            &[0x15, 0x72, 0x22, 0x00, 0x03, 0x81, 0x00, 0x17, 0x65, 0x80]
        );
        // payload region zero-filled
        assert_eq!(tx.byte(20), 0);
    }

    #[test]
    fn test_finalize_header_only() {
        let mut tx = TxBuffer::new();
        tx.build_header(IV, DTU, TX_REQ_INFO, SINGLE_FRAME);
        let len = tx.finalize(HEADER_LEN, true);
        assert_eq!(len, 11);
        assert_eq!(tx.byte(10), 0x34);
    }

    #[test]
    fn test_finalize_clamps_to_capacity() {
        let mut tx = TxBuffer::new();
        tx.build_header(IV, DTU, TX_REQ_INFO, ALL_FRAMES);
        let len = tx.finalize(40, true);
        assert_eq!(len, MAX_RF_PAYLOAD_SIZE);
        assert!(check_crc8(tx.frame(len)));
    }

    #[test]
    fn test_packet_truncates() {
        let raw = [0xAAu8; 40];
        let p = RadioPacket::new(&raw, 3, -64, 0);
        assert_eq!(p.len(), MAX_RF_PAYLOAD_SIZE);
    }

    #[test]
    fn test_packet_accessors() {
        let raw = [0x95, 0x72, 0x22, 0x00, 0x03, 0x72, 0x22, 0x00, 0x03, 0x83, 0x01, 0x02, 0x00];
        let p = RadioPacket::new(&raw, 40, -75, 12);
        assert_eq!(p.message_id(), 0x95);
        assert_eq!(p.frame_index(), 0x83);
        assert!(p.is_from(&IV));
        assert!(!p.is_from(&DTU));
        assert_eq!(p.payload(), &[0x01, 0x02]);
    }
}
