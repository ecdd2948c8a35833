//! TS_INFO_PACKET ([MS-RDPBCGR] 2.2.1.11.1.1).

use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};

const TIME_ZONE_INFORMATION_SIZE: usize = 172;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientInfoFlags: u32 {
        const MOUSE = 0x0000_0001;
        const DISABLE_CTRL_ALT_DEL = 0x0000_0002;
        const AUTOLOGON = 0x0000_0008;
        const UNICODE = 0x0000_0010;
        const MAXIMIZE_SHELL = 0x0000_0020;
        const LOGON_NOTIFY = 0x0000_0040;
        const COMPRESSION = 0x0000_0080;
        const ENABLE_WINDOWS_KEY = 0x0000_0100;
        const REMOTE_CONSOLE_AUDIO = 0x0000_2000;
        const FORCE_ENCRYPTED_CS_PDU = 0x0000_4000;
        const RAIL = 0x0000_8000;
        const LOGON_ERRORS = 0x0001_0000;
        const MOUSE_HAS_WHEEL = 0x0002_0000;
        const PASSWORD_IS_SC_PIN = 0x0004_0000;
        const NO_AUDIO_PLAYBACK = 0x0008_0000;
        const USING_SAVED_CREDS = 0x0010_0000;
        const AUDIO_CAPTURE = 0x0020_0000;
        const VIDEO_DISABLE = 0x0040_0000;
        const HIDEF_RAIL_SUPPORTED = 0x0200_0000;
    }
}

const COMPRESSION_TYPE_MASK: u32 = 0x0000_1E00;
const COMPRESSION_TYPE_SHIFT: u32 = 9;

/// The credentials supplied in the client info PDU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

/// The optional TS_EXTENDED_INFO_PACKET tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedClientInfo {
    pub address_family: u16,
    pub address: String,
    pub dir: String,
    pub performance_flags: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub code_page: u32,
    pub flags: ClientInfoFlags,
    pub compression_type: u8,
    pub credentials: Credentials,
    pub alternate_shell: String,
    pub working_dir: String,
    pub extra_info: Option<ExtendedClientInfo>,
}

impl ClientInfo {
    const NAME: &'static str = "ClientInfo";

    const FIXED_PART_SIZE: usize = 4 /* codePage */ + 4 /* flags */ + 2 * 5 /* cb fields */;

    fn is_unicode(&self) -> bool {
        self.flags.contains(ClientInfoFlags::UNICODE)
    }

    fn string_size(&self, value: &str) -> usize {
        if self.is_unicode() {
            value.encode_utf16().count() * 2 + 2
        } else {
            value.len() + 1
        }
    }
}

fn write_info_string(dst: &mut WriteCursor<'_>, value: &str, unicode: bool) {
    if unicode {
        for unit in value.encode_utf16() {
            dst.write_u16(unit);
        }
        dst.write_u16(0);
    } else {
        dst.write_slice(value.as_bytes());
        dst.write_u8(0);
    }
}

fn read_info_string(src: &mut ReadCursor<'_>, cb: usize, unicode: bool) -> DecodeResult<String> {
    const CTX: &str = "ClientInfo";

    let terminator = if unicode { 2 } else { 1 };
    ensure_size!(ctx: CTX, in: src, size: cb + terminator);

    let bytes = src.read_slice(cb);
    read_padding!(src, terminator);

    if unicode {
        if cb % 2 != 0 {
            return Err(invalid_field_err(CTX, "cb", "odd unicode string byte length"));
        }
        let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        Ok(String::from_utf16_lossy(&units))
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Encode for ClientInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let unicode = self.is_unicode();
        let domain = self.credentials.domain.as_deref().unwrap_or("");

        let flags =
            self.flags.bits() | ((u32::from(self.compression_type) << COMPRESSION_TYPE_SHIFT) & COMPRESSION_TYPE_MASK);

        dst.write_u32(self.code_page);
        dst.write_u32(flags);

        let terminator = if unicode { 2 } else { 1 };
        dst.write_u16(cast_length!("cbDomain", self.string_size(domain) - terminator)?);
        dst.write_u16(cast_length!(
            "cbUserName",
            self.string_size(&self.credentials.username) - terminator
        )?);
        dst.write_u16(cast_length!(
            "cbPassword",
            self.string_size(&self.credentials.password) - terminator
        )?);
        dst.write_u16(cast_length!(
            "cbAlternateShell",
            self.string_size(&self.alternate_shell) - terminator
        )?);
        dst.write_u16(cast_length!("cbWorkingDir", self.string_size(&self.working_dir) - terminator)?);

        write_info_string(dst, domain, unicode);
        write_info_string(dst, &self.credentials.username, unicode);
        write_info_string(dst, &self.credentials.password, unicode);
        write_info_string(dst, &self.alternate_shell, unicode);
        write_info_string(dst, &self.working_dir, unicode);

        if let Some(extra) = &self.extra_info {
            dst.write_u16(extra.address_family);
            dst.write_u16(cast_length!("cbClientAddress", self.string_size(&extra.address))?);
            write_info_string(dst, &extra.address, unicode);
            dst.write_u16(cast_length!("cbClientDir", self.string_size(&extra.dir))?);
            write_info_string(dst, &extra.dir, unicode);

            if let Some(performance_flags) = extra.performance_flags {
                // clientTimeZone + clientSessionId precede the flags
                for _ in 0..TIME_ZONE_INFORMATION_SIZE {
                    dst.write_u8(0);
                }
                dst.write_u32(0);
                dst.write_u32(performance_flags);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let domain = self.credentials.domain.as_deref().unwrap_or("");

        let mut size = Self::FIXED_PART_SIZE
            + self.string_size(domain)
            + self.string_size(&self.credentials.username)
            + self.string_size(&self.credentials.password)
            + self.string_size(&self.alternate_shell)
            + self.string_size(&self.working_dir);

        if let Some(extra) = &self.extra_info {
            size += 2 + 2 + self.string_size(&extra.address) + 2 + self.string_size(&extra.dir);

            if extra.performance_flags.is_some() {
                size += TIME_ZONE_INFORMATION_SIZE + 4 + 4;
            }
        }

        size
    }
}

impl<'de> Decode<'de> for ClientInfo {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let code_page = src.read_u32();
        let raw_flags = src.read_u32();

        let flags = ClientInfoFlags::from_bits_truncate(raw_flags);
        let compression_type = u8::try_from((raw_flags & COMPRESSION_TYPE_MASK) >> COMPRESSION_TYPE_SHIFT)
            .map_err(|_| invalid_field_err!("flags", "invalid compression type"))?;
        let unicode = flags.contains(ClientInfoFlags::UNICODE);

        let cb_domain = usize::from(src.read_u16());
        let cb_user_name = usize::from(src.read_u16());
        let cb_password = usize::from(src.read_u16());
        let cb_alternate_shell = usize::from(src.read_u16());
        let cb_working_dir = usize::from(src.read_u16());

        let domain = read_info_string(src, cb_domain, unicode)?;
        let username = read_info_string(src, cb_user_name, unicode)?;
        let password = read_info_string(src, cb_password, unicode)?;
        let alternate_shell = read_info_string(src, cb_alternate_shell, unicode)?;
        let working_dir = read_info_string(src, cb_working_dir, unicode)?;

        let domain = if domain.is_empty() { None } else { Some(domain) };

        let extra_info = if src.len() >= 4 {
            let address_family = src.read_u16();
            let cb_address = usize::from(src.read_u16());
            let terminator = if unicode { 2 } else { 1 };
            let address = read_info_string(src, cb_address.saturating_sub(terminator), unicode)?;

            ensure_size!(in: src, size: 2);
            let cb_dir = usize::from(src.read_u16());
            let dir = read_info_string(src, cb_dir.saturating_sub(terminator), unicode)?;

            let performance_flags = if src.len() >= TIME_ZONE_INFORMATION_SIZE + 4 + 4 {
                read_padding!(src, TIME_ZONE_INFORMATION_SIZE); // clientTimeZone
                read_padding!(src, 4); // clientSessionId
                Some(src.read_u32())
            } else {
                None
            };

            Some(ExtendedClientInfo {
                address_family,
                address,
                dir,
                performance_flags,
            })
        } else {
            None
        };

        Ok(Self {
            code_page,
            flags,
            compression_type,
            credentials: Credentials {
                username,
                password,
                domain,
            },
            alternate_shell,
            working_dir,
            extra_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    fn sample_info() -> ClientInfo {
        ClientInfo {
            code_page: 0,
            flags: ClientInfoFlags::UNICODE | ClientInfoFlags::MOUSE | ClientInfoFlags::DISABLE_CTRL_ALT_DEL,
            compression_type: 0,
            credentials: Credentials {
                username: "user".into(),
                password: "hunter2".into(),
                domain: Some("CONTOSO".into()),
            },
            alternate_shell: String::new(),
            working_dir: String::new(),
            extra_info: None,
        }
    }

    #[test]
    fn unicode_round_trip() {
        let info = sample_info();

        let encoded = encode_vec(&info).unwrap();
        assert_eq!(encoded.len(), info.size());

        let decoded: ClientInfo = decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn extended_info_round_trip() {
        let mut info = sample_info();
        info.extra_info = Some(ExtendedClientInfo {
            address_family: 2,
            address: "192.168.1.7".into(),
            dir: "C:\\WINDOWS".into(),
            performance_flags: Some(0x7),
        });

        let encoded = encode_vec(&info).unwrap();
        let decoded: ClientInfo = decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn ansi_strings_are_supported() {
        let mut info = sample_info();
        info.flags -= ClientInfoFlags::UNICODE;

        let encoded = encode_vec(&info).unwrap();
        let decoded: ClientInfo = decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }
}
