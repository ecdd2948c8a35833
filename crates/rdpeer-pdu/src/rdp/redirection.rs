//! Enhanced Server Redirection packet ([MS-RDPBCGR] 2.2.13.1).

use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_size, invalid_field_err, read_padding, write_padding, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};

const REDIRECTION_VERSION4: u32 = 0x0000_0003 << 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct RedirectionFlags: u32 {
        const TARGET_NET_ADDRESS = 0x0000_0001;
        const LOAD_BALANCE_INFO = 0x0000_0002;
        const USERNAME = 0x0000_0004;
        const DOMAIN = 0x0000_0008;
        const PASSWORD = 0x0000_0010;
        const DONT_STORE_USERNAME = 0x0000_0020;
        const SMARTCARD_LOGON = 0x0000_0040;
        const NOREDIRECT = 0x0000_0080;
        const TARGET_FQDN = 0x0000_0100;
        const TARGET_NETBIOS_NAME = 0x0000_0200;
    }
}

/// The follow-on server description a client is redirected to.
///
/// Consumed exactly once by the peer: after the packet is sent the runtime
/// settings are reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerRedirectionPdu {
    pub session_id: u32,
    pub target_net_address: Option<String>,
    pub load_balance_info: Option<Vec<u8>>,
    pub username: Option<String>,
    pub domain: Option<String>,
    /// An opaque password cookie, not a cleartext password.
    pub password: Option<Vec<u8>>,
    pub target_fqdn: Option<String>,
    pub dont_store_username: bool,
}

impl ServerRedirectionPdu {
    const NAME: &'static str = "ServerRedirectionPdu";

    const FIXED_PART_SIZE: usize = 2 /* flags */ + 2 /* length */ + 4 /* sessionId */ + 4 /* redirFlags */;

    fn redir_flags(&self) -> RedirectionFlags {
        let mut flags = RedirectionFlags::empty();

        flags.set(RedirectionFlags::TARGET_NET_ADDRESS, self.target_net_address.is_some());
        flags.set(RedirectionFlags::LOAD_BALANCE_INFO, self.load_balance_info.is_some());
        flags.set(RedirectionFlags::USERNAME, self.username.is_some());
        flags.set(RedirectionFlags::DOMAIN, self.domain.is_some());
        flags.set(RedirectionFlags::PASSWORD, self.password.is_some());
        flags.set(RedirectionFlags::TARGET_FQDN, self.target_fqdn.is_some());
        flags.set(RedirectionFlags::DONT_STORE_USERNAME, self.dont_store_username);

        flags
    }

    fn utf16_field_size(value: &str) -> usize {
        4 + value.encode_utf16().count() * 2 + 2
    }

    fn bytes_field_size(value: &[u8]) -> usize {
        4 + value.len()
    }
}

fn write_utf16_field(dst: &mut WriteCursor<'_>, value: &str) -> EncodeResult<()> {
    let byte_len = value.encode_utf16().count() * 2 + 2;
    dst.write_u32(cast_length!("ServerRedirectionPdu", "fieldLength", byte_len)?);
    for unit in value.encode_utf16() {
        dst.write_u16(unit);
    }
    dst.write_u16(0);
    Ok(())
}

fn read_utf16_field(src: &mut ReadCursor<'_>) -> DecodeResult<String> {
    const CTX: &str = "ServerRedirectionPdu";

    rdpeer_core::ensure_size!(ctx: CTX, in: src, size: 4);
    let byte_len = src.read_u32() as usize;

    if byte_len < 2 || byte_len % 2 != 0 {
        return Err(invalid_field_err(CTX, "fieldLength", "invalid UTF-16 field length"));
    }

    rdpeer_core::ensure_size!(ctx: CTX, in: src, size: byte_len);
    let bytes = src.read_slice(byte_len - 2);
    read_padding!(src, 2);

    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    Ok(String::from_utf16_lossy(&units))
}

fn write_bytes_field(dst: &mut WriteCursor<'_>, value: &[u8]) -> EncodeResult<()> {
    dst.write_u32(cast_length!("ServerRedirectionPdu", "fieldLength", value.len())?);
    dst.write_slice(value);
    Ok(())
}

fn read_bytes_field(src: &mut ReadCursor<'_>) -> DecodeResult<Vec<u8>> {
    const CTX: &str = "ServerRedirectionPdu";

    rdpeer_core::ensure_size!(ctx: CTX, in: src, size: 4);
    let byte_len = src.read_u32() as usize;

    rdpeer_core::ensure_size!(ctx: CTX, in: src, size: byte_len);
    Ok(src.read_slice(byte_len).to_vec())
}

impl Encode for ServerRedirectionPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(0); // flags field of RDP_SERVER_REDIRECTION_PACKET
        dst.write_u16(cast_length!("length", self.size())?);
        dst.write_u32(self.session_id);
        dst.write_u32(self.redir_flags().bits() | REDIRECTION_VERSION4);

        if let Some(address) = &self.target_net_address {
            write_utf16_field(dst, address)?;
        }
        if let Some(info) = &self.load_balance_info {
            write_bytes_field(dst, info)?;
        }
        if let Some(username) = &self.username {
            write_utf16_field(dst, username)?;
        }
        if let Some(domain) = &self.domain {
            write_utf16_field(dst, domain)?;
        }
        if let Some(password) = &self.password {
            write_bytes_field(dst, password)?;
        }
        if let Some(fqdn) = &self.target_fqdn {
            write_utf16_field(dst, fqdn)?;
        }

        // pad up to the advertised length
        write_padding!(dst, 8);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = Self::FIXED_PART_SIZE;

        if let Some(address) = &self.target_net_address {
            size += Self::utf16_field_size(address);
        }
        if let Some(info) = &self.load_balance_info {
            size += Self::bytes_field_size(info);
        }
        if let Some(username) = &self.username {
            size += Self::utf16_field_size(username);
        }
        if let Some(domain) = &self.domain {
            size += Self::utf16_field_size(domain);
        }
        if let Some(password) = &self.password {
            size += Self::bytes_field_size(password);
        }
        if let Some(fqdn) = &self.target_fqdn {
            size += Self::utf16_field_size(fqdn);
        }

        size + 8 /* pad */
    }
}

impl<'de> Decode<'de> for ServerRedirectionPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: Self::FIXED_PART_SIZE);

        let _flags = src.read_u16();
        let _length = src.read_u16();
        let session_id = src.read_u32();
        let redir_flags = RedirectionFlags::from_bits_truncate(src.read_u32());

        let target_net_address = redir_flags
            .contains(RedirectionFlags::TARGET_NET_ADDRESS)
            .then(|| read_utf16_field(src))
            .transpose()?;
        let load_balance_info = redir_flags
            .contains(RedirectionFlags::LOAD_BALANCE_INFO)
            .then(|| read_bytes_field(src))
            .transpose()?;
        let username = redir_flags
            .contains(RedirectionFlags::USERNAME)
            .then(|| read_utf16_field(src))
            .transpose()?;
        let domain = redir_flags
            .contains(RedirectionFlags::DOMAIN)
            .then(|| read_utf16_field(src))
            .transpose()?;
        let password = redir_flags
            .contains(RedirectionFlags::PASSWORD)
            .then(|| read_bytes_field(src))
            .transpose()?;
        let target_fqdn = redir_flags
            .contains(RedirectionFlags::TARGET_FQDN)
            .then(|| read_utf16_field(src))
            .transpose()?;

        if src.len() >= 8 {
            read_padding!(src, 8);
        }

        Ok(Self {
            session_id,
            target_net_address,
            load_balance_info,
            username,
            domain,
            password,
            target_fqdn,
            dont_store_username: redir_flags.contains(RedirectionFlags::DONT_STORE_USERNAME),
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn redirection_round_trip() {
        let pdu = ServerRedirectionPdu {
            session_id: 0x0000_1234,
            target_net_address: Some("10.2.0.15".into()),
            load_balance_info: Some(b"Cookie: msts=1234".to_vec()),
            username: Some("user".into()),
            domain: None,
            password: None,
            target_fqdn: Some("rdp.example.com".into()),
            dont_store_username: true,
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());

        let decoded: ServerRedirectionPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }
}
