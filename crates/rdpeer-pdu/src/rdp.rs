//! The RDP share-control family of PDUs and their security-header wrappers.

pub mod autodetect;
pub mod capability_sets;
pub mod client_info;
pub mod finalization;
pub mod headers;
pub mod license;
pub mod multitransport;
pub mod redirection;
pub mod refresh_rectangle;
pub mod server_error_info;
pub mod suppress_output;
pub mod vc;

use rdpeer_core::{invalid_field_err, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

use crate::rdp::client_info::ClientInfo;
use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

/// Client Info PDU: a basic security header with the INFO_PKT flag followed
/// by TS_INFO_PACKET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfoPdu {
    pub security_header: BasicSecurityHeader,
    pub client_info: ClientInfo,
}

impl ClientInfoPdu {
    const NAME: &'static str = "ClientInfoPdu";

    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::INFO_PKT,
            },
            client_info,
        }
    }
}

impl Encode for ClientInfoPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        self.security_header.encode(dst)?;
        self.client_info.encode(dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.security_header.size() + self.client_info.size()
    }
}

impl<'de> Decode<'de> for ClientInfoPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::INFO_PKT) {
            return Err(invalid_field_err!("securityHeader", "expected INFO_PKT flag"));
        }

        let client_info = ClientInfo::decode(src)?;

        Ok(Self {
            security_header,
            client_info,
        })
    }
}

/// Security Exchange PDU (TS_SECURITY_PACKET, [MS-RDPBCGR] 2.2.1.10).
///
/// Only sent when standard RDP security is in force. The client random stays
/// encrypted here; session key derivation is external to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityExchangePdu {
    pub encrypted_client_random: Vec<u8>,
}

impl SecurityExchangePdu {
    const NAME: &'static str = "SecurityExchangePdu";

    const FIXED_PART_SIZE: usize = BasicSecurityHeader::FIXED_PART_SIZE + 4 /* length */;
}

impl Encode for SecurityExchangePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        rdpeer_core::ensure_size!(in: dst, size: self.size());

        BasicSecurityHeader {
            flags: BasicSecurityHeaderFlags::EXCHANGE_PKT,
        }
        .encode(dst)?;

        dst.write_u32(rdpeer_core::cast_length!("length", self.encrypted_client_random.len())?);
        dst.write_slice(&self.encrypted_client_random);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.encrypted_client_random.len()
    }
}

impl<'de> Decode<'de> for SecurityExchangePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        rdpeer_core::ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::EXCHANGE_PKT) {
            return Err(invalid_field_err!("securityHeader", "expected EXCHANGE_PKT flag"));
        }

        let length = src.read_u32() as usize;
        rdpeer_core::ensure_size!(in: src, size: length);

        Ok(Self {
            encrypted_client_random: src.read_slice(length).to_vec(),
        })
    }
}
