#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod gcc;
pub mod input;
pub mod mcs;
pub mod nego;
pub mod rdp;
pub mod tpdu;
pub mod tpkt;
pub mod x224;

pub(crate) mod ber;
pub(crate) mod per;

use rdpeer_core::{DecodeResult, ReadCursor};

/// First-byte discriminator between the two RDP outer framings.
///
/// A TPKT header always starts with the version byte `0x03`; anything else
/// is a fast-path header whose two low bits are zero.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Action {
    FastPath = 0x00,
    X224 = 0x03,
}

impl Action {
    pub fn from_fp_output_header(fp_output_header: u8) -> Result<Self, u8> {
        match fp_output_header & 0b11 {
            0x00 => Ok(Self::FastPath),
            0x03 => Ok(Self::X224),
            unknown_action_bits => Err(unknown_action_bits),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PduInfo {
    pub action: Action,
    pub length: usize,
}

/// Finds next RDP PDU size by reading the next few bytes.
pub fn find_size(bytes: &[u8]) -> DecodeResult<Option<PduInfo>> {
    macro_rules! ensure_enough {
        ($bytes:expr, $len:expr) => {
            if $bytes.len() < $len {
                return Ok(None);
            }
        };
    }

    ensure_enough!(bytes, 1);
    let fp_output_header = bytes[0];

    let action = Action::from_fp_output_header(fp_output_header)
        .map_err(|unknown_action| rdpeer_core::unexpected_message_type_err("fpOutputHeader", unknown_action))?;

    match action {
        Action::X224 => {
            ensure_enough!(bytes, tpkt::TpktHeader::SIZE);
            let tpkt = tpkt::TpktHeader::read(&mut ReadCursor::new(bytes))?;

            Ok(Some(PduInfo {
                action,
                length: tpkt.packet_length(),
            }))
        }
        Action::FastPath => {
            ensure_enough!(bytes, 2);
            let a = bytes[1];

            let fast_path_length = if a & 0x80 != 0 {
                ensure_enough!(bytes, 3);
                let b = bytes[2];

                ((u16::from(a) & !0x80) << 8) + u16::from(b)
            } else {
                u16::from(a)
            };

            Ok(Some(PduInfo {
                action,
                length: usize::from(fast_path_length),
            }))
        }
    }
}

pub trait PduHint: Send + Sync + core::fmt::Debug + 'static {
    /// Finds next PDU size by reading the next few bytes.
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>>;
}

// Matches both X224 and FastPath pdus
#[derive(Clone, Copy, Debug)]
pub struct RdpHint;

pub const RDP_HINT: RdpHint = RdpHint;

impl PduHint for RdpHint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        find_size(bytes).map(|opt| opt.map(|info| info.length))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct X224Hint;

pub const X224_HINT: X224Hint = X224Hint;

impl PduHint for X224Hint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        match find_size(bytes)? {
            Some(pdu_info) => {
                // fast-path frames are only legal in the active state
                if pdu_info.action != Action::X224 {
                    return Err(rdpeer_core::unexpected_message_type_err(
                        "X224Hint",
                        pdu_info.action.as_u8(),
                    ));
                }
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FastPathHint;

pub const FAST_PATH_HINT: FastPathHint = FastPathHint;

impl PduHint for FastPathHint {
    fn find_size(&self, bytes: &[u8]) -> DecodeResult<Option<usize>> {
        match find_size(bytes)? {
            Some(pdu_info) => {
                if pdu_info.action != Action::FastPath {
                    return Err(rdpeer_core::unexpected_message_type_err(
                        "FastPathHint",
                        pdu_info.action.as_u8(),
                    ));
                }
                Ok(Some(pdu_info.length))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_size_x224() {
        // TPKT header advertising a 12-byte packet
        let bytes = [0x03, 0x00, 0x00, 0x0C, 0x02, 0xF0, 0x80];
        let info = find_size(&bytes).unwrap().unwrap();
        assert_eq!(info.action, Action::X224);
        assert_eq!(info.length, 12);
    }

    #[test]
    fn find_size_fast_path_short() {
        let bytes = [0x04, 0x08];
        let info = find_size(&bytes).unwrap().unwrap();
        assert_eq!(info.action, Action::FastPath);
        assert_eq!(info.length, 8);
    }

    #[test]
    fn find_size_fast_path_long() {
        let bytes = [0x04, 0x81, 0x2C];
        let info = find_size(&bytes).unwrap().unwrap();
        assert_eq!(info.length, 0x12C);
    }

    #[test]
    fn find_size_incomplete() {
        assert!(find_size(&[0x03, 0x00]).unwrap().is_none());
        assert!(find_size(&[]).unwrap().is_none());
    }

    #[test]
    fn find_size_garbage() {
        // low bits 0b10 are neither fast-path nor TPKT
        assert!(find_size(&[0x02, 0x00, 0x00]).is_err());
    }
}
