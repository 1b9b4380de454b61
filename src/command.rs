//! Command encoder
//!
//! Turns logical requests into frame bytes in a [`TxBuffer`]. The encoder
//! only writes the buffer; transmission and checksums happen in the radio.
//!
//! Generation X inverters take numeric limits and a CRC16 protected
//! payload. Generation Y inverters use the legacy short frames, and
//! persistent power limits are expressed as DRED codes.

use crate::inverter::InverterLink;
use crate::packet::{
    TxBuffer, ALL_FRAMES, HEADER_LEN, SINGLE_FRAME, TX_REQ_DEVCONTROL, TX_REQ_DREDCONTROL,
    TX_REQ_INFO, TX_REQ_SWITCH_CHANNEL,
};
use crate::types::{DevControl, DtuSerial, InfoCmd, LimitKind, PowerLimit};

#[cfg(feature = "embedded")]
use defmt::debug;
#[cfg(not(feature = "embedded"))]
use log::debug;

/// Result of encoding: frame length before checksums and CRC16 policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Encoded {
    /// Bytes written, header included
    pub len: usize,
    /// Append a CRC16 over the payload
    pub crc16: bool,
}

/// Encoder errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// The inverter generation has no encoding for this command code
    Unsupported(u8),
    /// The requested limit falls in the band where the DRED state is kept
    NoDredChange,
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unsupported(code) => write!(f, "command {code} not supported"),
            Self::NoDredChange => write!(f, "limit keeps the current DRED state"),
        }
    }
}

#[cfg(feature = "embedded")]
impl defmt::Format for EncodeError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::Unsupported(code) => defmt::write!(f, "Unsupported({})", code),
            Self::NoDredChange => defmt::write!(f, "NoDredChange"),
        }
    }
}

/// Demand response codes understood by generation Y inverters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DredCode {
    /// DRM0: stop feeding in
    Shutdown,
    /// DRM5: limit to 0 %
    LimitLow,
    /// DRM6: limit to 50 %
    LimitMid,
    /// DRM8: limit to 100 %
    LimitHigh,
    /// Boot without restrictions
    Unrestricted,
}

impl DredCode {
    /// Bytes 9 and 10 of the frame
    #[must_use]
    pub const fn bytes(self) -> [u8; 2] {
        match self {
            Self::Shutdown => [0xA5, 0xA5],
            Self::LimitLow => [0x5A, 0x5A],
            Self::LimitMid => [0xAA, 0x55],
            Self::LimitHigh => [0x5A, 0x55],
            Self::Unrestricted => [0x55, 0xAA],
        }
    }
}

/// Map a requested limit in W onto a DRED code.
///
/// Returns None in the band `rated < limit <= 2 * rated`, where the
/// current state is kept.
#[must_use]
pub fn dred_code(limit_w: u16, rated_w: Option<u16>) -> Option<DredCode> {
    let rated = rated_w.filter(|p| *p > 0);
    match rated {
        None if limit_w == 0 => Some(DredCode::Shutdown),
        None => Some(DredCode::LimitLow),
        Some(p) => {
            let quarter = p / 4;
            if limit_w == 0 || limit_w < quarter {
                Some(DredCode::LimitLow)
            } else if limit_w <= quarter * 3 {
                Some(DredCode::LimitMid)
            } else if limit_w <= p {
                Some(DredCode::LimitHigh)
            } else if u32::from(limit_w) > u32::from(p) * 2 {
                Some(DredCode::Unrestricted)
            } else {
                None
            }
        }
    }
}

fn header(tx: &mut TxBuffer, iv: &InverterLink, dtu: DtuSerial, mid: u8, pid: u8) {
    tx.build_header(iv.address(), dtu.address_bytes(), mid, pid);
}

/// Encode an information request
pub fn encode_info_request(
    tx: &mut TxBuffer,
    iv: &InverterLink,
    dtu: DtuSerial,
    cmd: InfoCmd,
    timestamp: u32,
    alarm_id: u16,
) -> Encoded {
    let code = cmd.code();
    if iv.generation().is_legacy() {
        debug!("legacy cmd 0x{:x}", code);
        header(tx, iv, dtu, code, code);
        return Encoded {
            len: HEADER_LEN,
            crc16: false,
        };
    }

    debug!("info request 0x{:x}", code);
    header(tx, iv, dtu, TX_REQ_INFO, ALL_FRAMES);
    tx.put(10, &[code, 0x00]);
    tx.put_u32(12, timestamp);
    if cmd == InfoCmd::AlarmData {
        tx.put_u16(18, alarm_id);
    }
    Encoded {
        len: 24,
        crc16: true,
    }
}

/// Encode a retransmit request for one missing frame
pub fn encode_single_frame_request(
    tx: &mut TxBuffer,
    iv: &InverterLink,
    dtu: DtuSerial,
    frame: u8,
) -> Encoded {
    header(tx, iv, dtu, TX_REQ_INFO, ALL_FRAMES | (frame & 0x7F));
    Encoded {
        len: HEADER_LEN,
        crc16: true,
    }
}

/// Encode the sub-GHz switch-channel command
pub fn encode_switch_channel(
    tx: &mut TxBuffer,
    iv: &InverterLink,
    dtu: DtuSerial,
    channel: u8,
) -> Encoded {
    header(tx, iv, dtu, TX_REQ_SWITCH_CHANNEL, 0x02);
    tx.put(10, &[0x15, 0x21, channel, 0x14]);
    Encoded {
        len: 14,
        crc16: true,
    }
}

/// Encode a device control request
///
/// # Errors
///
/// Returns [`EncodeError::Unsupported`] for commands the generation has no
/// encoding for and [`EncodeError::NoDredChange`] when a persistent limit
/// would leave the DRED state unchanged. Nothing should be sent then.
pub fn encode_device_control(
    tx: &mut TxBuffer,
    iv: &InverterLink,
    dtu: DtuSerial,
    ctrl: DevControl,
) -> Result<Encoded, EncodeError> {
    header(tx, iv, dtu, TX_REQ_DEVCONTROL, SINGLE_FRAME);

    if !iv.generation().is_legacy() {
        tx.put(10, &[ctrl.code(), 0x00]);
        let mut len = 12;
        if let Some(limit) = ctrl.limit() {
            tx.put_u16(12, limit.tenths());
            tx.put_u16(14, limit.kind().setting());
            len = 16;
        }
        return Ok(Encoded { len, crc16: true });
    }

    let len = match ctrl {
        DevControl::TurnOn | DevControl::Restart => {
            tx.put(9, &[0x55, 0xAA]);
            11
        }
        DevControl::TurnOff => {
            tx.put(9, &[0xAA, 0x55]);
            11
        }
        DevControl::ActivePowerLimit(limit) if limit.kind().is_persistent() => {
            let watts = limit_in_watts(limit, iv.rated_power());
            let Some(code) = dred_code(watts, iv.rated_power()) else {
                debug!("DRED unchanged for {} W", watts);
                return Err(EncodeError::NoDredChange);
            };
            header(tx, iv, dtu, TX_REQ_DREDCONTROL, SINGLE_FRAME);
            tx.put(9, &code.bytes());
            11
        }
        DevControl::ActivePowerLimit(limit) => {
            tx.put(9, &[0x5A, 0x5A]);
            encode_legacy_limit(tx, limit, iv.rated_power())
        }
        other => {
            debug!("cmd {} not supported by legacy inverters", other.code());
            return Err(EncodeError::Unsupported(other.code()));
        }
    };

    Ok(Encoded { len, crc16: false })
}

/// Persistent relative limits are converted to W when the rating is known
fn limit_in_watts(limit: PowerLimit, rated: Option<u16>) -> u16 {
    match (limit.kind().is_relative(), rated) {
        (true, Some(p)) => {
            let w = u32::from(limit.whole()) * u32::from(p) / 100;
            u16::try_from(w).unwrap_or(u16::MAX)
        }
        _ => limit.whole(),
    }
}

fn encode_legacy_limit(tx: &mut TxBuffer, limit: PowerLimit, rated: Option<u16>) -> usize {
    let value = limit.whole();
    if limit.kind() == LimitKind::AbsoluteNonPersistent {
        tx.put(11, &[100]);
        tx.put_u16(12, value.saturating_mul(10));
        return 14;
    }

    tx.put(11, &[u8::try_from(value).unwrap_or(u8::MAX)]);
    match rated {
        Some(p) => {
            // W x10 of pct % of the rating
            let tenths = u32::from(value) * u32::from(p) / 10;
            tx.put_u16(12, u16::try_from(tenths).unwrap_or(u16::MAX));
            14
        }
        None => 12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dred_thresholds() {
        assert_eq!(dred_code(0, None), Some(DredCode::Shutdown));
        assert_eq!(dred_code(0, Some(0)), Some(DredCode::Shutdown));
        assert_eq!(dred_code(300, None), Some(DredCode::LimitLow));
        assert_eq!(dred_code(0, Some(1000)), Some(DredCode::LimitLow));
        assert_eq!(dred_code(249, Some(1000)), Some(DredCode::LimitLow));
        assert_eq!(dred_code(250, Some(1000)), Some(DredCode::LimitMid));
        assert_eq!(dred_code(750, Some(1000)), Some(DredCode::LimitMid));
        assert_eq!(dred_code(751, Some(1000)), Some(DredCode::LimitHigh));
        assert_eq!(dred_code(1000, Some(1000)), Some(DredCode::LimitHigh));
        assert_eq!(dred_code(1500, Some(1000)), None);
        assert_eq!(dred_code(2000, Some(1000)), None);
        assert_eq!(dred_code(2001, Some(1000)), Some(DredCode::Unrestricted));
    }

    #[test]
    fn test_dred_bytes() {
        assert_eq!(DredCode::Shutdown.bytes(), [0xA5, 0xA5]);
        assert_eq!(DredCode::Unrestricted.bytes(), [0x55, 0xAA]);
    }

    #[test]
    fn test_relative_limit_in_watts() {
        let pct = PowerLimit::from_whole(50, LimitKind::RelativePersistent);
        assert_eq!(limit_in_watts(pct, Some(600)), 300);
        assert_eq!(limit_in_watts(pct, None), 50);
    }
}
