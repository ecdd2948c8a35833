//! Initiate Multitransport Request / Response PDUs.
//!
//! Defined in [\[MS-RDPBCGR\] 2.2.15.1] and [\[MS-RDPBCGR\] 2.2.15.2].
//!
//! [\[MS-RDPBCGR\] 2.2.15.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/de783158-8b01-4818-8fb0-62523a5b3490
//! [\[MS-RDPBCGR\] 2.2.15.2]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/44044233-e498-46f8-8e16-1ffa595a8e8b

use rdpeer_core::{
    ensure_fixed_part_size, invalid_field_err, read_padding, write_padding, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

/// Length of the security cookie used for transport binding validation.
pub const SECURITY_COOKIE_LEN: usize = 16;

/// Requested transport protocol for multitransport bootstrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestedProtocol {
    /// Reliable UDP transport (`INITIATE_REQUEST_PROTOCOL_UDPFECR`).
    UdpFecR = 0x0001,
    /// Lossy UDP transport (`INITIATE_REQUEST_PROTOCOL_UDPFECL`).
    UdpFecL = 0x0002,
}

impl RequestedProtocol {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::UdpFecR),
            0x0002 => Some(Self::UdpFecL),
            _ => None,
        }
    }

    fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Server Initiate Multitransport Request PDU.
///
/// The `request_id` and `security_cookie` are echoed by the client in the
/// tunnel creation request over the new transport, binding the two
/// connections together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultitransportRequestPdu {
    pub security_header: BasicSecurityHeader,
    pub request_id: u32,
    pub requested_protocol: RequestedProtocol,
    pub security_cookie: [u8; SECURITY_COOKIE_LEN],
}

impl MultitransportRequestPdu {
    const NAME: &'static str = "MultitransportRequestPdu";

    const FIXED_PART_SIZE: usize = BasicSecurityHeader::FIXED_PART_SIZE
        + 4 /* requestId */
        + 2 /* requestedProtocol */
        + 2 /* reserved */
        + SECURITY_COOKIE_LEN;

    pub fn new(request_id: u32, requested_protocol: RequestedProtocol, security_cookie: [u8; SECURITY_COOKIE_LEN]) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::TRANSPORT_REQ,
            },
            request_id,
            requested_protocol,
            security_cookie,
        }
    }
}

impl Encode for MultitransportRequestPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.security_header.encode(dst)?;
        dst.write_u32(self.request_id);
        dst.write_u16(self.requested_protocol.as_u16());
        write_padding!(dst, 2);
        dst.write_slice(&self.security_cookie);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for MultitransportRequestPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::TRANSPORT_REQ) {
            return Err(invalid_field_err!("securityHeader", "expected TRANSPORT_REQ flag"));
        }

        let request_id = src.read_u32();

        let protocol_raw = src.read_u16();
        let requested_protocol = RequestedProtocol::from_u16(protocol_raw)
            .ok_or_else(|| invalid_field_err!("requestedProtocol", "unknown protocol value"))?;

        read_padding!(src, 2);

        let security_cookie: [u8; SECURITY_COOKIE_LEN] = src.read_array();

        Ok(Self {
            security_header,
            request_id,
            requested_protocol,
            security_cookie,
        })
    }
}

/// Client Initiate Multitransport Response PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultitransportResponsePdu {
    pub security_header: BasicSecurityHeader,
    pub request_id: u32,
    /// HRESULT indicating success or failure of the transport setup.
    pub hr_response: u32,
}

impl MultitransportResponsePdu {
    const NAME: &'static str = "MultitransportResponsePdu";

    const FIXED_PART_SIZE: usize = BasicSecurityHeader::FIXED_PART_SIZE + 4 /* requestId */ + 4 /* hrResponse */;

    /// `S_OK` — multitransport connection established.
    pub const S_OK: u32 = 0x0000_0000;

    /// `E_ABORT` — the client was unable to establish the connection.
    pub const E_ABORT: u32 = 0x8000_4004;

    pub fn success(request_id: u32) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::TRANSPORT_RSP,
            },
            request_id,
            hr_response: Self::S_OK,
        }
    }

    pub fn abort(request_id: u32) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::TRANSPORT_RSP,
            },
            request_id,
            hr_response: Self::E_ABORT,
        }
    }

    pub fn is_success(&self) -> bool {
        self.hr_response == Self::S_OK
    }
}

impl Encode for MultitransportResponsePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.security_header.encode(dst)?;
        dst.write_u32(self.request_id);
        dst.write_u32(self.hr_response);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for MultitransportResponsePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::TRANSPORT_RSP) {
            return Err(invalid_field_err!("securityHeader", "expected TRANSPORT_RSP flag"));
        }

        let request_id = src.read_u32();
        let hr_response = src.read_u32();

        Ok(Self {
            security_header,
            request_id,
            hr_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    const REQUEST_WIRE: &[u8] = &[
        0x02, 0x00, // flags = TRANSPORT_REQ
        0x00, 0x00, // flagsHi
        0x2A, 0x00, 0x00, 0x00, // requestId = 42
        0x01, 0x00, // requestedProtocol = UdpFecR
        0x00, 0x00, // reserved
        0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, // securityCookie
        0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB,
    ];

    #[test]
    fn request_wire_round_trip() {
        let pdu = MultitransportRequestPdu::new(42, RequestedProtocol::UdpFecR, [0xAB; SECURITY_COOKIE_LEN]);

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.as_slice(), REQUEST_WIRE);

        let decoded: MultitransportRequestPdu = decode(REQUEST_WIRE).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn response_abort_round_trip() {
        let pdu = MultitransportResponsePdu::abort(7);
        assert!(!pdu.is_success());

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: MultitransportResponsePdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn request_with_wrong_flags_is_rejected() {
        let mut bad = REQUEST_WIRE.to_vec();
        bad[0] = 0x04; // TRANSPORT_RSP instead of TRANSPORT_REQ
        assert!(decode::<MultitransportRequestPdu>(&bad).is_err());
    }
}
