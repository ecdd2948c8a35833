//! GCC conference user data blocks exchanged inside the MCS connect PDUs.
//!
//! Defined in [MS-RDPBCGR] 2.2.1.3 (client-to-server) and 2.2.1.4
//! (server-to-client).

use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::nego::SecurityProtocol;

const USER_DATA_HEADER_SIZE: usize = 4;

const CS_CORE: u16 = 0xC001;
const CS_SECURITY: u16 = 0xC002;
const CS_NET: u16 = 0xC003;
const CS_CLUSTER: u16 = 0xC004;
const CS_MONITOR: u16 = 0xC005;
const CS_MULTITRANSPORT: u16 = 0xC00A;

const SC_CORE: u16 = 0x0C01;
const SC_SECURITY: u16 = 0x0C02;
const SC_NET: u16 = 0x0C03;
const SC_MCS_MSGCHANNEL: u16 = 0x0C04;
const SC_MULTITRANSPORT: u16 = 0x0C08;

const CLIENT_NAME_SIZE: usize = 32;
const IME_FILE_NAME_SIZE: usize = 64;
const DIG_PRODUCT_ID_SIZE: usize = 64;

pub const MONITOR_SIZE: usize = 20;
const MAX_MONITOR_COUNT: u32 = 16;

/// An RDP protocol version advertised in the core data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdpVersion(pub u32);

impl RdpVersion {
    pub const V4: Self = Self(0x0008_0001);
    pub const V5_PLUS: Self = Self(0x0008_0004);
    pub const V10: Self = Self(0x0008_0005);
}

/// A static virtual channel name: up to 8 ANSI characters, NUL-filled.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelName([u8; 8]);

impl ChannelName {
    pub const SIZE: usize = 8;

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds a channel name from an ASCII string, failing when it does not
    /// fit in 8 bytes (the terminating NUL counts against shorter names
    /// only on the wire).
    pub fn from_str(name: &str) -> Option<Self> {
        if name.len() > Self::SIZE || !name.is_ascii() {
            return None;
        }

        let mut bytes = [0u8; 8];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Some(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(Self::SIZE);
        core::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    /// Channel name comparison is case-insensitive per [MS-RDPBCGR] 2.2.1.3.4.1.
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(other)
    }
}

impl core::fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ChannelName({})", self.as_str())
    }
}

bitflags! {
    /// Channel option flags from the Channel Definition Structure (CHANNEL_DEF).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ChannelOptions: u32 {
        const INITIALIZED = 0x8000_0000;
        const ENCRYPT_RDP = 0x4000_0000;
        const ENCRYPT_SC = 0x2000_0000;
        const ENCRYPT_CS = 0x1000_0000;
        const PRI_HIGH = 0x0800_0000;
        const PRI_MED = 0x0400_0000;
        const PRI_LOW = 0x0200_0000;
        const COMPRESS_RDP = 0x0080_0000;
        const COMPRESS = 0x0040_0000;
        const SHOW_PROTOCOL = 0x0020_0000;
        const REMOTE_CONTROL_PERSISTENT = 0x0010_0000;
    }
}

/// Channel Definition Structure (CHANNEL_DEF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDef {
    pub name: ChannelName,
    pub options: ChannelOptions,
}

impl ChannelDef {
    const NAME: &'static str = "ChannelDef";

    const FIXED_PART_SIZE: usize = ChannelName::SIZE + 4;
}

impl Encode for ChannelDef {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_slice(self.name.as_bytes());
        dst.write_u32(self.options.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ChannelDef {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let name = ChannelName::new(src.read_array());
        let options = ChannelOptions::from_bits_truncate(src.read_u32());

        Ok(Self { name, options })
    }
}

bitflags! {
    /// `earlyCapabilityFlags` of TS_UD_CS_CORE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientEarlyCapabilityFlags: u16 {
        const SUPPORT_ERRINFO_PDU = 0x0001;
        const WANT_32_BPP_SESSION = 0x0002;
        const SUPPORT_STATUS_INFO_PDU = 0x0004;
        const STRONG_ASYMMETRIC_KEYS = 0x0008;
        const VALID_CONNECTION_TYPE = 0x0020;
        const SUPPORT_MONITOR_LAYOUT_PDU = 0x0040;
        const SUPPORT_NETWORK_AUTODETECT = 0x0080;
        const SUPPORT_DYNVC_GFX_PROTOCOL = 0x0100;
        const SUPPORT_DYNAMIC_TIME_ZONE = 0x0200;
        const SUPPORT_HEARTBEAT_PDU = 0x0400;
        const SUPPORT_SKIP_CHANNELJOIN = 0x0800;
    }
}

bitflags! {
    /// `earlyCapabilityFlags` of TS_UD_SC_CORE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ServerEarlyCapabilityFlags: u32 {
        const EDGE_ACTIONS_SUPPORTED_V1 = 0x0000_0001;
        const DYNAMIC_DST_SUPPORTED = 0x0000_0002;
        const EDGE_ACTIONS_SUPPORTED_V2 = 0x0000_0004;
        const SKIP_CHANNELJOIN_SUPPORTED = 0x0000_0008;
    }
}

bitflags! {
    /// `flags` of TS_UD_SC_MULTITRANSPORT.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct MultiTransportFlags: u32 {
        const TRANSPORT_TYPE_UDP_FECR = 0x0000_0001;
        const TRANSPORT_TYPE_UDP_FECL = 0x0000_0004;
        const TRANSPORT_TYPE_UDP_PREFERRED = 0x0000_0100;
        const SOFT_SYNC_TCP_TO_UDP = 0x0000_0200;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct MonitorFlags: u32 {
        const PRIMARY = 1;
    }
}

/// TS_MONITOR_DEF: one display monitor in virtual desktop coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub flags: MonitorFlags,
}

impl Monitor {
    const NAME: &'static str = "Monitor";

    const FIXED_PART_SIZE: usize = MONITOR_SIZE;
}

impl Encode for Monitor {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_i32(self.left);
        dst.write_i32(self.top);
        dst.write_i32(self.right);
        dst.write_i32(self.bottom);
        dst.write_u32(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Monitor {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            left: src.read_i32(),
            top: src.read_i32(),
            right: src.read_i32(),
            bottom: src.read_i32(),
            flags: MonitorFlags::from_bits_truncate(src.read_u32()),
        })
    }
}

fn read_utf16_fixed(src: &mut ReadCursor<'_>, byte_len: usize) -> String {
    let bytes = src.read_slice(byte_len);
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn write_utf16_fixed(dst: &mut WriteCursor<'_>, value: &str, byte_len: usize) {
    let mut written = 0;
    for unit in value.encode_utf16() {
        if written + 2 > byte_len - 2 {
            break;
        }
        dst.write_u16(unit);
        written += 2;
    }
    while written < byte_len {
        dst.write_u8(0);
        written += 1;
    }
}

/// TS_UD_CS_CORE, required part plus the optional tail fields the server
/// consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCoreData {
    pub version: RdpVersion,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub color_depth: u16,
    pub sas_sequence: u16,
    pub keyboard_layout: u32,
    pub client_build: u32,
    pub client_name: String,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_functional_keys_count: u32,
    pub optional_data: ClientCoreOptionalData,
}

/// Optional tail of TS_UD_CS_CORE. Fields appear on the wire in struct
/// order; a client may stop after any of them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientCoreOptionalData {
    pub post_beta2_color_depth: Option<u16>,
    pub client_product_id: Option<u16>,
    pub serial_number: Option<u32>,
    pub high_color_depth: Option<u16>,
    pub supported_color_depths: Option<u16>,
    pub early_capability_flags: Option<ClientEarlyCapabilityFlags>,
    pub dig_product_id: Option<String>,
    pub connection_type: Option<u8>,
    pub server_selected_protocol: Option<SecurityProtocol>,
}

impl ClientCoreData {
    const NAME: &'static str = "ClientCoreData";

    const FIXED_PART_SIZE: usize = 4 /* version */ + 2 /* width */ + 2 /* height */
        + 2 /* colorDepth */ + 2 /* SASSequence */ + 4 /* kbdLayout */ + 4 /* clientBuild */
        + CLIENT_NAME_SIZE + 4 /* kbdType */ + 4 /* kbdSubType */ + 4 /* kbdFnKeys */
        + IME_FILE_NAME_SIZE;

    fn optional_size(&self) -> usize {
        let opt = &self.optional_data;
        let mut size = 0;

        // Wire layout is strictly sequential: stop at the first absent field.
        macro_rules! tally {
            ($field:expr, $n:expr) => {
                if $field.is_some() {
                    size += $n;
                } else {
                    return size;
                }
            };
        }

        tally!(opt.post_beta2_color_depth, 2);
        tally!(opt.client_product_id, 2);
        tally!(opt.serial_number, 4);
        tally!(opt.high_color_depth, 2);
        tally!(opt.supported_color_depths, 2);
        tally!(opt.early_capability_flags, 2);
        tally!(opt.dig_product_id, DIG_PRODUCT_ID_SIZE);
        tally!(opt.connection_type, 2); // connectionType + pad1octet
        tally!(opt.server_selected_protocol, 4);

        size
    }
}

impl Encode for ClientCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version.0);
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        dst.write_u16(self.color_depth);
        dst.write_u16(self.sas_sequence);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.client_build);
        write_utf16_fixed(dst, &self.client_name, CLIENT_NAME_SIZE);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_functional_keys_count);
        write_padding!(dst, IME_FILE_NAME_SIZE);

        let opt = &self.optional_data;

        macro_rules! put {
            ($field:expr, $write:expr) => {
                match $field {
                    Some(value) => {
                        #[allow(clippy::redundant_closure_call)]
                        let () = $write(value);
                    }
                    None => return Ok(()),
                }
            };
        }

        put!(opt.post_beta2_color_depth, |v| dst.write_u16(v));
        put!(opt.client_product_id, |v| dst.write_u16(v));
        put!(opt.serial_number, |v| dst.write_u32(v));
        put!(opt.high_color_depth, |v| dst.write_u16(v));
        put!(opt.supported_color_depths, |v| dst.write_u16(v));
        put!(opt.early_capability_flags, |v: ClientEarlyCapabilityFlags| dst
            .write_u16(v.bits()));
        put!(opt.dig_product_id.as_deref(), |v| write_utf16_fixed(
            dst,
            v,
            DIG_PRODUCT_ID_SIZE
        ));
        put!(opt.connection_type, |v| {
            dst.write_u8(v);
            dst.write_u8(0); // pad1octet
        });
        put!(opt.server_selected_protocol, |v: SecurityProtocol| dst
            .write_u32(v.bits()));

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.optional_size()
    }
}

impl<'de> Decode<'de> for ClientCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = RdpVersion(src.read_u32());
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        let color_depth = src.read_u16();
        let sas_sequence = src.read_u16();
        let keyboard_layout = src.read_u32();
        let client_build = src.read_u32();
        let client_name = read_utf16_fixed(src, CLIENT_NAME_SIZE);
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_functional_keys_count = src.read_u32();
        read_padding!(src, IME_FILE_NAME_SIZE);

        let mut optional_data = ClientCoreOptionalData::default();

        macro_rules! take {
            ($n:expr, $read:expr) => {
                if src.len() >= $n {
                    #[allow(clippy::redundant_closure_call)]
                    let () = $read();
                } else {
                    return Ok(Self {
                        version,
                        desktop_width,
                        desktop_height,
                        color_depth,
                        sas_sequence,
                        keyboard_layout,
                        client_build,
                        client_name,
                        keyboard_type,
                        keyboard_subtype,
                        keyboard_functional_keys_count,
                        optional_data,
                    });
                }
            };
        }

        take!(2, || optional_data.post_beta2_color_depth = Some(src.read_u16()));
        take!(2, || optional_data.client_product_id = Some(src.read_u16()));
        take!(4, || optional_data.serial_number = Some(src.read_u32()));
        take!(2, || optional_data.high_color_depth = Some(src.read_u16()));
        take!(2, || optional_data.supported_color_depths = Some(src.read_u16()));
        take!(2, || optional_data.early_capability_flags = Some(
            ClientEarlyCapabilityFlags::from_bits_truncate(src.read_u16())
        ));
        take!(DIG_PRODUCT_ID_SIZE, || optional_data.dig_product_id =
            Some(read_utf16_fixed(src, DIG_PRODUCT_ID_SIZE)));
        take!(2, || {
            optional_data.connection_type = Some(src.read_u8());
            read_padding!(src, 1);
        });
        take!(4, || optional_data.server_selected_protocol = Some(
            SecurityProtocol::from_bits_truncate(src.read_u32())
        ));

        Ok(Self {
            version,
            desktop_width,
            desktop_height,
            color_depth,
            sas_sequence,
            keyboard_layout,
            client_build,
            client_name,
            keyboard_type,
            keyboard_subtype,
            keyboard_functional_keys_count,
            optional_data,
        })
    }
}

/// TS_UD_CS_SEC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientSecurityData {
    pub encryption_methods: u32,
    pub ext_encryption_methods: u32,
}

impl ClientSecurityData {
    const NAME: &'static str = "ClientSecurityData";

    const FIXED_PART_SIZE: usize = 4 + 4;
}

impl Encode for ClientSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.encryption_methods);
        dst.write_u32(self.ext_encryption_methods);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            encryption_methods: src.read_u32(),
            ext_encryption_methods: src.read_u32(),
        })
    }
}

/// TS_UD_CS_NET: the static channel requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientNetworkData {
    pub channels: Vec<ChannelDef>,
}

impl ClientNetworkData {
    const NAME: &'static str = "ClientNetworkData";

    const FIXED_PART_SIZE: usize = 4 /* channelCount */;
}

impl Encode for ClientNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(cast_length!("channelCount", self.channels.len())?);
        for channel in &self.channels {
            channel.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.channels.len() * ChannelDef::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let channel_count = src.read_u32();

        // 31 optional SVCs at most, plus the IO channel
        if channel_count > 31 {
            return Err(invalid_field_err!("channelCount", "too many static channels"));
        }

        let mut channels = Vec::with_capacity(channel_count as usize);
        for _ in 0..channel_count {
            channels.push(ChannelDef::decode(src)?);
        }

        Ok(Self { channels })
    }
}

/// TS_UD_CS_MONITOR.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientMonitorData {
    pub monitors: Vec<Monitor>,
}

impl ClientMonitorData {
    const NAME: &'static str = "ClientMonitorData";

    const FIXED_PART_SIZE: usize = 4 /* flags */ + 4 /* monitorCount */;
}

impl Encode for ClientMonitorData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(0); // flags, unused
        dst.write_u32(cast_length!("monitorCount", self.monitors.len())?);
        for monitor in &self.monitors {
            monitor.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.monitors.len() * MONITOR_SIZE
    }
}

impl<'de> Decode<'de> for ClientMonitorData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let _flags = src.read_u32();
        let monitor_count = src.read_u32();

        if monitor_count > MAX_MONITOR_COUNT {
            return Err(invalid_field_err!("monitorCount", "invalid monitor count"));
        }

        let mut monitors = Vec::with_capacity(monitor_count as usize);
        for _ in 0..monitor_count {
            monitors.push(Monitor::decode(src)?);
        }

        Ok(Self { monitors })
    }
}

/// TS_UD_CS_MULTITRANSPORT: the transports the client is willing to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientMultiTransportData {
    pub flags: MultiTransportFlags,
}

impl ClientMultiTransportData {
    const NAME: &'static str = "ClientMultiTransportData";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for ClientMultiTransportData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ClientMultiTransportData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            flags: MultiTransportFlags::from_bits_truncate(src.read_u32()),
        })
    }
}

/// All client-to-server conference user data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGccBlocks {
    pub core: ClientCoreData,
    pub security: ClientSecurityData,
    pub network: Option<ClientNetworkData>,
    pub monitor: Option<ClientMonitorData>,
    pub multi_transport: Option<ClientMultiTransportData>,
}

impl ClientGccBlocks {
    const NAME: &'static str = "ClientGccBlocks";

    pub fn channel_names(&self) -> Vec<ChannelDef> {
        self.network.as_ref().map(|n| n.channels.clone()).unwrap_or_default()
    }
}

fn write_user_data_header(dst: &mut WriteCursor<'_>, block_type: u16, data_size: usize) -> EncodeResult<()> {
    dst.write_u16(block_type);
    dst.write_u16(
        u16::try_from(data_size + USER_DATA_HEADER_SIZE)
            .map_err(|_| invalid_field_err("UserDataHeader", "length", "block too big"))?,
    );
    Ok(())
}

impl Encode for ClientGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_header(dst, CS_CORE, self.core.size())?;
        self.core.encode(dst)?;

        write_user_data_header(dst, CS_SECURITY, self.security.size())?;
        self.security.encode(dst)?;

        if let Some(network) = &self.network {
            write_user_data_header(dst, CS_NET, network.size())?;
            network.encode(dst)?;
        }

        if let Some(monitor) = &self.monitor {
            write_user_data_header(dst, CS_MONITOR, monitor.size())?;
            monitor.encode(dst)?;
        }

        if let Some(multi_transport) = &self.multi_transport {
            write_user_data_header(dst, CS_MULTITRANSPORT, multi_transport.size())?;
            multi_transport.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = USER_DATA_HEADER_SIZE + self.core.size() + USER_DATA_HEADER_SIZE + self.security.size();

        if let Some(network) = &self.network {
            size += USER_DATA_HEADER_SIZE + network.size();
        }
        if let Some(monitor) = &self.monitor {
            size += USER_DATA_HEADER_SIZE + monitor.size();
        }
        if let Some(multi_transport) = &self.multi_transport {
            size += USER_DATA_HEADER_SIZE + multi_transport.size();
        }

        size
    }
}

impl<'de> Decode<'de> for ClientGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;
        let mut monitor = None;
        let mut multi_transport = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let block_type = src.read_u16();
            let block_length = usize::from(src.read_u16());

            if block_length < USER_DATA_HEADER_SIZE {
                return Err(invalid_field_err!("length", "user data block length too small"));
            }

            let data_length = block_length - USER_DATA_HEADER_SIZE;
            ensure_size!(in: src, size: data_length);
            let mut block = ReadCursor::new(src.read_slice(data_length));

            match block_type {
                CS_CORE => core = Some(ClientCoreData::decode(&mut block)?),
                CS_SECURITY => security = Some(ClientSecurityData::decode(&mut block)?),
                CS_NET => network = Some(ClientNetworkData::decode(&mut block)?),
                CS_MONITOR => monitor = Some(ClientMonitorData::decode(&mut block)?),
                CS_MULTITRANSPORT => multi_transport = Some(ClientMultiTransportData::decode(&mut block)?),
                // cluster data and future block types are skipped
                CS_CLUSTER => {}
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "missing client core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "missing client security data"))?,
            network,
            monitor,
            multi_transport,
        })
    }
}

/// TS_UD_SC_CORE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCoreData {
    pub version: RdpVersion,
    pub client_requested_protocols: Option<SecurityProtocol>,
    pub early_capability_flags: Option<ServerEarlyCapabilityFlags>,
}

impl ServerCoreData {
    const NAME: &'static str = "ServerCoreData";

    const FIXED_PART_SIZE: usize = 4;

    fn optional_size(&self) -> usize {
        match (&self.client_requested_protocols, &self.early_capability_flags) {
            (Some(_), Some(_)) => 8,
            (Some(_), None) => 4,
            _ => 0,
        }
    }
}

impl Encode for ServerCoreData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.version.0);

        if let Some(protocols) = self.client_requested_protocols {
            dst.write_u32(protocols.bits());

            if let Some(flags) = self.early_capability_flags {
                dst.write_u32(flags.bits());
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.optional_size()
    }
}

impl<'de> Decode<'de> for ServerCoreData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let version = RdpVersion(src.read_u32());
        let client_requested_protocols = (src.len() >= 4).then(|| SecurityProtocol::from_bits_truncate(src.read_u32()));
        let early_capability_flags =
            (src.len() >= 4).then(|| ServerEarlyCapabilityFlags::from_bits_truncate(src.read_u32()));

        Ok(Self {
            version,
            client_requested_protocols,
            early_capability_flags,
        })
    }
}

/// TS_UD_SC_SEC1 without the standard-RDP-security key material (external
/// security protocols carry their own).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSecurityData {
    pub encryption_method: u32,
    pub encryption_level: u32,
}

impl ServerSecurityData {
    const NAME: &'static str = "ServerSecurityData";

    const FIXED_PART_SIZE: usize = 4 + 4;

    pub fn no_security() -> Self {
        Self {
            encryption_method: 0,
            encryption_level: 0,
        }
    }
}

impl Encode for ServerSecurityData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.encryption_method);
        dst.write_u32(self.encryption_level);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerSecurityData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            encryption_method: src.read_u32(),
            encryption_level: src.read_u32(),
        })
    }
}

/// TS_UD_SC_NET: the channel id assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNetworkData {
    pub io_channel: u16,
    pub channel_ids: Vec<u16>,
}

impl ServerNetworkData {
    const NAME: &'static str = "ServerNetworkData";

    const FIXED_PART_SIZE: usize = 2 /* ioChannel */ + 2 /* channelCount */;

    fn padding_size(&self) -> usize {
        (self.channel_ids.len() % 2) * 2
    }
}

impl Encode for ServerNetworkData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.io_channel);
        dst.write_u16(cast_length!("channelCount", self.channel_ids.len())?);
        for channel_id in &self.channel_ids {
            dst.write_u16(*channel_id);
        }

        // Keep the following block DWORD-aligned.
        let padding = self.padding_size();
        write_padding!(dst, padding);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.channel_ids.len() * 2 + self.padding_size()
    }
}

impl<'de> Decode<'de> for ServerNetworkData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let io_channel = src.read_u16();
        let channel_count = usize::from(src.read_u16());

        ensure_size!(in: src, size: channel_count * 2);
        let mut channel_ids = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channel_ids.push(src.read_u16());
        }

        Ok(Self {
            io_channel,
            channel_ids,
        })
    }
}

/// TS_UD_SC_MCS_MSGCHANNEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMessageChannelData {
    pub mcs_message_channel_id: u16,
}

impl ServerMessageChannelData {
    const NAME: &'static str = "ServerMessageChannelData";

    const FIXED_PART_SIZE: usize = 2;
}

impl Encode for ServerMessageChannelData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.mcs_message_channel_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerMessageChannelData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            mcs_message_channel_id: src.read_u16(),
        })
    }
}

/// TS_UD_SC_MULTITRANSPORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMultiTransportChannelData {
    pub flags: MultiTransportFlags,
}

impl ServerMultiTransportChannelData {
    const NAME: &'static str = "ServerMultiTransportChannelData";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for ServerMultiTransportChannelData {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.flags.bits());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerMultiTransportChannelData {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            flags: MultiTransportFlags::from_bits_truncate(src.read_u32()),
        })
    }
}

/// All server-to-client conference user data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGccBlocks {
    pub core: ServerCoreData,
    pub security: ServerSecurityData,
    pub network: ServerNetworkData,
    pub message_channel: Option<ServerMessageChannelData>,
    pub multi_transport_channel: Option<ServerMultiTransportChannelData>,
}

impl ServerGccBlocks {
    const NAME: &'static str = "ServerGccBlocks";
}

impl Encode for ServerGccBlocks {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        write_user_data_header(dst, SC_CORE, self.core.size())?;
        self.core.encode(dst)?;

        write_user_data_header(dst, SC_NET, self.network.size())?;
        self.network.encode(dst)?;

        write_user_data_header(dst, SC_SECURITY, self.security.size())?;
        self.security.encode(dst)?;

        if let Some(message_channel) = &self.message_channel {
            write_user_data_header(dst, SC_MCS_MSGCHANNEL, message_channel.size())?;
            message_channel.encode(dst)?;
        }

        if let Some(multi_transport) = &self.multi_transport_channel {
            write_user_data_header(dst, SC_MULTITRANSPORT, multi_transport.size())?;
            multi_transport.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let mut size = USER_DATA_HEADER_SIZE * 3 + self.core.size() + self.network.size() + self.security.size();

        if let Some(message_channel) = &self.message_channel {
            size += USER_DATA_HEADER_SIZE + message_channel.size();
        }
        if let Some(multi_transport) = &self.multi_transport_channel {
            size += USER_DATA_HEADER_SIZE + multi_transport.size();
        }

        size
    }
}

impl<'de> Decode<'de> for ServerGccBlocks {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let mut core = None;
        let mut security = None;
        let mut network = None;
        let mut message_channel = None;
        let mut multi_transport_channel = None;

        while src.len() >= USER_DATA_HEADER_SIZE {
            let block_type = src.read_u16();
            let block_length = usize::from(src.read_u16());

            if block_length < USER_DATA_HEADER_SIZE {
                return Err(invalid_field_err!("length", "user data block length too small"));
            }

            let data_length = block_length - USER_DATA_HEADER_SIZE;
            ensure_size!(in: src, size: data_length);
            let mut block = ReadCursor::new(src.read_slice(data_length));

            match block_type {
                SC_CORE => core = Some(ServerCoreData::decode(&mut block)?),
                SC_SECURITY => security = Some(ServerSecurityData::decode(&mut block)?),
                SC_NET => network = Some(ServerNetworkData::decode(&mut block)?),
                SC_MCS_MSGCHANNEL => message_channel = Some(ServerMessageChannelData::decode(&mut block)?),
                SC_MULTITRANSPORT => multi_transport_channel = Some(ServerMultiTransportChannelData::decode(&mut block)?),
                _ => {}
            }
        }

        Ok(Self {
            core: core.ok_or_else(|| invalid_field_err!("core", "missing server core data"))?,
            security: security.ok_or_else(|| invalid_field_err!("security", "missing server security data"))?,
            network: network.ok_or_else(|| invalid_field_err!("network", "missing server network data"))?,
            message_channel,
            multi_transport_channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    fn sample_core() -> ClientCoreData {
        ClientCoreData {
            version: RdpVersion::V5_PLUS,
            desktop_width: 1920,
            desktop_height: 1080,
            color_depth: 0xCA01,
            sas_sequence: 0xAA03,
            keyboard_layout: 0x0409,
            client_build: 18363,
            client_name: "TESTBOX".into(),
            keyboard_type: 4,
            keyboard_subtype: 0,
            keyboard_functional_keys_count: 12,
            optional_data: ClientCoreOptionalData {
                post_beta2_color_depth: Some(0xCA01),
                client_product_id: Some(1),
                serial_number: Some(0),
                high_color_depth: Some(24),
                supported_color_depths: Some(0x0007),
                early_capability_flags: Some(
                    ClientEarlyCapabilityFlags::SUPPORT_MONITOR_LAYOUT_PDU
                        | ClientEarlyCapabilityFlags::SUPPORT_NETWORK_AUTODETECT,
                ),
                ..Default::default()
            },
        }
    }

    #[test]
    fn client_core_data_round_trip() {
        let core = sample_core();
        let encoded = encode_vec(&core).unwrap();
        assert_eq!(encoded.len(), core.size());

        let decoded: ClientCoreData = decode(&encoded).unwrap();
        assert_eq!(decoded, core);
    }

    #[test]
    fn client_gcc_blocks_skip_unknown_block() {
        let blocks = ClientGccBlocks {
            core: sample_core(),
            security: ClientSecurityData::default(),
            network: Some(ClientNetworkData {
                channels: vec![ChannelDef {
                    name: ChannelName::from_str("rdpsnd").unwrap(),
                    options: ChannelOptions::INITIALIZED,
                }],
            }),
            monitor: None,
            multi_transport: None,
        };

        let mut encoded = encode_vec(&blocks).unwrap();
        // append an unknown block: type 0xC0FF, 8 bytes total
        encoded.extend_from_slice(&[0xFF, 0xC0, 0x08, 0x00, 1, 2, 3, 4]);

        let decoded: ClientGccBlocks = decode(&encoded).unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn channel_name_rules() {
        assert!(ChannelName::from_str("cliprdr").is_some());
        assert!(ChannelName::from_str("overlong!").is_none());
        assert!(ChannelName::from_str("rdpsnd").unwrap().eq_ignore_case("RDPSND"));
    }

    #[test]
    fn server_network_data_padding() {
        let odd = ServerNetworkData {
            io_channel: 1003,
            channel_ids: vec![1004],
        };
        assert_eq!(odd.size(), 8);

        let even = ServerNetworkData {
            io_channel: 1003,
            channel_ids: vec![1004, 1005],
        };
        assert_eq!(even.size(), 8);
    }
}
