use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, other_err, read_padding, write_padding,
    Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::input::InputEventPdu;
use crate::rdp::capability_sets::{ClientConfirmActive, ServerDemandActive};
use crate::rdp::finalization::{ControlPdu, FontPdu, MonitorLayoutPdu, PersistentKeyListPdu, SynchronizePdu};
use crate::rdp::redirection::ServerRedirectionPdu;
use crate::rdp::refresh_rectangle::RefreshRectanglePdu;
use crate::rdp::server_error_info::ServerSetErrorInfoPdu;
use crate::rdp::suppress_output::SuppressOutputPdu;

pub const BASIC_SECURITY_HEADER_SIZE: usize = 4;

const SHARE_DATA_HEADER_COMPRESSION_MASK: u8 = 0xF;
const SHARE_CONTROL_HEADER_MASK: u16 = 0xF;
const SHARE_CONTROL_HEADER_SIZE: usize = 2 * 3 + 4;
const FLOW_PDU_MARKER: u16 = 0x8000;
const FLOW_PDU_SIZE: usize = 8;

const PROTOCOL_VERSION: u16 = 0x10;

// ShareDataHeader
const PADDING_FIELD_SIZE: usize = 1;
const STREAM_ID_FIELD_SIZE: usize = 1;
const UNCOMPRESSED_LENGTH_FIELD_SIZE: usize = 2;
const PDU_TYPE_FIELD_SIZE: usize = 1;
const COMPRESSION_TYPE_FIELD_SIZE: usize = 1;
const COMPRESSED_LENGTH_FIELD_SIZE: usize = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BasicSecurityHeaderFlags: u16 {
        const EXCHANGE_PKT = 0x0001;
        const TRANSPORT_REQ = 0x0002;
        const TRANSPORT_RSP = 0x0004;
        const ENCRYPT = 0x0008;
        const RESET_SEQNO = 0x0010;
        const IGNORE_SEQNO = 0x0020;
        const INFO_PKT = 0x0040;
        const LICENSE_PKT = 0x0080;
        const LICENSE_ENCRYPT_CS = 0x0100;
        const LICENSE_ENCRYPT_SC = 0x0200;
        const REDIRECTION_PKT = 0x0400;
        const SECURE_CHECKSUM = 0x0800;
        const AUTODETECT_REQ = 0x1000;
        const AUTODETECT_RSP = 0x2000;
        const HEARTBEAT = 0x4000;
        const FLAGSHI_VALID = 0x8000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSecurityHeader {
    pub flags: BasicSecurityHeaderFlags,
}

impl BasicSecurityHeader {
    const NAME: &'static str = "BasicSecurityHeader";

    pub const FIXED_PART_SIZE: usize = BASIC_SECURITY_HEADER_SIZE;
}

impl Encode for BasicSecurityHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.flags.bits());
        dst.write_u16(0); // flags_hi
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BasicSecurityHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = BasicSecurityHeaderFlags::from_bits(src.read_u16())
            .ok_or_else(|| invalid_field_err!("securityHeader", "invalid basic security header"))?;
        let _flags_hi = src.read_u16(); // unused

        Ok(Self { flags })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamPriority {
    Undefined = 0,
    Low = 1,
    Medium = 2,
    High = 4,
}

impl StreamPriority {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Undefined),
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            4 => Some(Self::High),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum ShareControlPduType {
    DemandActivePdu = 0x1,
    ConfirmActivePdu = 0x3,
    DeactivateAllPdu = 0x6,
    DataPdu = 0x7,
    ServerRedirect = 0xa,
}

impl ShareControlPduType {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(Self::DemandActivePdu),
            0x3 => Some(Self::ConfirmActivePdu),
            0x6 => Some(Self::DeactivateAllPdu),
            0x7 => Some(Self::DataPdu),
            0xa => Some(Self::ServerRedirect),
            _ => None,
        }
    }

    fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ShareDataPduType {
    Update = 0x02,
    Control = 0x14,
    Pointer = 0x1b,
    Input = 0x1c,
    Synchronize = 0x1f,
    RefreshRectangle = 0x21,
    SuppressOutput = 0x23,
    ShutdownRequest = 0x24,
    ShutdownDenied = 0x25,
    SaveSessionInfo = 0x26,
    FontList = 0x27,
    FontMap = 0x28,
    BitmapCachePersistentList = 0x2b,
    SetErrorInfoPdu = 0x2f,
    MonitorLayoutPdu = 0x37,
    FrameAcknowledgePdu = 0x38,
}

impl ShareDataPduType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Update),
            0x14 => Some(Self::Control),
            0x1b => Some(Self::Pointer),
            0x1c => Some(Self::Input),
            0x1f => Some(Self::Synchronize),
            0x21 => Some(Self::RefreshRectangle),
            0x23 => Some(Self::SuppressOutput),
            0x24 => Some(Self::ShutdownRequest),
            0x25 => Some(Self::ShutdownDenied),
            0x26 => Some(Self::SaveSessionInfo),
            0x27 => Some(Self::FontList),
            0x28 => Some(Self::FontMap),
            0x2b => Some(Self::BitmapCachePersistentList),
            0x2f => Some(Self::SetErrorInfoPdu),
            0x37 => Some(Self::MonitorLayoutPdu),
            0x38 => Some(Self::FrameAcknowledgePdu),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CompressionFlags: u8 {
        const COMPRESSED = 0x20;
        const AT_FRONT = 0x40;
        const FLUSHED = 0x80;
    }
}

/// TS_FRAME_ACKNOWLEDGE_PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAcknowledgePdu {
    pub frame_id: u32,
}

impl FrameAcknowledgePdu {
    const NAME: &'static str = "FrameAcknowledgePdu";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for FrameAcknowledgePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.frame_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for FrameAcknowledgePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            frame_id: src.read_u32(),
        })
    }
}

/// Share Control Header (TS_SHARECONTROLHEADER) plus the PDU it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareControlHeader {
    pub share_control_pdu: ShareControlPdu,
    pub pdu_source: u16,
    pub share_id: u32,
}

impl ShareControlHeader {
    const NAME: &'static str = "ShareControlHeader";

    const FIXED_PART_SIZE: usize = SHARE_CONTROL_HEADER_SIZE;
}

impl Encode for ShareControlHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        if matches!(self.share_control_pdu, ShareControlPdu::FlowControl) {
            return Err(other_err!("ShareControlHeader", "flow control PDUs are never produced"));
        }

        let pdu_type_with_version = PROTOCOL_VERSION | self.share_control_pdu.share_header_type().as_u16();

        dst.write_u16(cast_length!(
            "totalLength",
            self.share_control_pdu.size() + SHARE_CONTROL_HEADER_SIZE
        )?);
        dst.write_u16(pdu_type_with_version);
        dst.write_u16(self.pdu_source);
        dst.write_u32(self.share_id);

        self.share_control_pdu.encode(dst)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.share_control_pdu.size()
    }
}

impl<'de> Decode<'de> for ShareControlHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 2);

        let total_length = usize::from(src.read_u16());

        // A leading 0x8000 is not a length: it marks a flow control PDU,
        // whose fixed 8-byte body carries nothing this layer acts upon.
        if total_length == usize::from(FLOW_PDU_MARKER) {
            ensure_size!(in: src, size: FLOW_PDU_SIZE - 2);
            read_padding!(src, FLOW_PDU_SIZE - 2);

            return Ok(Self {
                share_control_pdu: ShareControlPdu::FlowControl,
                pdu_source: 0,
                share_id: 0,
            });
        }

        ensure_size!(in: src, size: Self::FIXED_PART_SIZE - 2);

        let pdu_type_with_version = src.read_u16();
        let pdu_source = src.read_u16();
        let share_id = src.read_u32();

        let pdu_type = ShareControlPduType::from_u16(pdu_type_with_version & SHARE_CONTROL_HEADER_MASK)
            .ok_or_else(|| invalid_field_err!("pduType", "invalid share control pdu type"))?;
        let pdu_version = pdu_type_with_version & !SHARE_CONTROL_HEADER_MASK;
        if pdu_version != PROTOCOL_VERSION {
            return Err(invalid_field_err!("pduVersion", "invalid PDU version"));
        }

        let share_pdu = ShareControlPdu::from_type(src, pdu_type)?;
        let header = Self {
            share_control_pdu: share_pdu,
            pdu_source,
            share_id,
        };

        if pdu_type == ShareControlPduType::DataPdu {
            // Some Windows versions append padding that is not part of the
            // inner unit. Consume it so the frame checks out as fully read.
            let header_length = header.size();

            if header_length != total_length {
                if total_length < header_length {
                    return Err(rdpeer_core::not_enough_bytes_err(Self::NAME, total_length, header_length));
                }

                let padding = total_length - header_length;
                ensure_size!(in: src, size: padding);
                read_padding!(src, padding);
            }
        }

        Ok(header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareControlPdu {
    ServerDemandActive(ServerDemandActive),
    ClientConfirmActive(ClientConfirmActive),
    Data(ShareDataHeader),
    ServerDeactivateAll(ServerDeactivateAll),
    ServerRedirect(ServerRedirectionPdu),
    FlowControl,
}

impl ShareControlPdu {
    const NAME: &'static str = "ShareControlPdu";

    pub fn as_short_name(&self) -> &str {
        match self {
            ShareControlPdu::ServerDemandActive(_) => "Server Demand Active PDU",
            ShareControlPdu::ClientConfirmActive(_) => "Client Confirm Active PDU",
            ShareControlPdu::Data(_) => "Data PDU",
            ShareControlPdu::ServerDeactivateAll(_) => "Server Deactivate All PDU",
            ShareControlPdu::ServerRedirect(_) => "Server Redirection PDU",
            ShareControlPdu::FlowControl => "Flow Control PDU",
        }
    }

    pub fn share_header_type(&self) -> ShareControlPduType {
        match self {
            ShareControlPdu::ServerDemandActive(_) => ShareControlPduType::DemandActivePdu,
            ShareControlPdu::ClientConfirmActive(_) => ShareControlPduType::ConfirmActivePdu,
            ShareControlPdu::Data(_) => ShareControlPduType::DataPdu,
            ShareControlPdu::ServerDeactivateAll(_) => ShareControlPduType::DeactivateAllPdu,
            ShareControlPdu::ServerRedirect(_) => ShareControlPduType::ServerRedirect,
            ShareControlPdu::FlowControl => ShareControlPduType::DataPdu,
        }
    }

    pub fn from_type(src: &mut ReadCursor<'_>, share_type: ShareControlPduType) -> DecodeResult<Self> {
        match share_type {
            ShareControlPduType::DemandActivePdu => {
                Ok(ShareControlPdu::ServerDemandActive(ServerDemandActive::decode(src)?))
            }
            ShareControlPduType::ConfirmActivePdu => {
                Ok(ShareControlPdu::ClientConfirmActive(ClientConfirmActive::decode(src)?))
            }
            ShareControlPduType::DataPdu => Ok(ShareControlPdu::Data(ShareDataHeader::decode(src)?)),
            ShareControlPduType::DeactivateAllPdu => {
                Ok(ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll::decode(src)?))
            }
            ShareControlPduType::ServerRedirect => {
                Ok(ShareControlPdu::ServerRedirect(ServerRedirectionPdu::decode(src)?))
            }
        }
    }
}

impl Encode for ShareControlPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            ShareControlPdu::ServerDemandActive(pdu) => pdu.encode(dst),
            ShareControlPdu::ClientConfirmActive(pdu) => pdu.encode(dst),
            ShareControlPdu::Data(share_data_header) => share_data_header.encode(dst),
            ShareControlPdu::ServerDeactivateAll(deactivate_all) => deactivate_all.encode(dst),
            ShareControlPdu::ServerRedirect(redirection) => redirection.encode(dst),
            ShareControlPdu::FlowControl => Err(other_err!(Self::NAME, "flow control PDUs are never produced")),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            ShareControlPdu::ServerDemandActive(pdu) => pdu.size(),
            ShareControlPdu::ClientConfirmActive(pdu) => pdu.size(),
            ShareControlPdu::Data(share_data_header) => share_data_header.size(),
            ShareControlPdu::ServerDeactivateAll(deactivate_all) => deactivate_all.size(),
            ShareControlPdu::ServerRedirect(redirection) => redirection.size(),
            ShareControlPdu::FlowControl => 0,
        }
    }
}

/// Share Data Header (TS_SHAREDATAHEADER) plus the PDU it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDataHeader {
    pub share_data_pdu: ShareDataPdu,
    pub stream_priority: StreamPriority,
    pub compression_flags: CompressionFlags,
    pub compression_type: u8,
}

impl ShareDataHeader {
    const NAME: &'static str = "ShareDataHeader";

    const FIXED_PART_SIZE: usize = PADDING_FIELD_SIZE
        + STREAM_ID_FIELD_SIZE
        + UNCOMPRESSED_LENGTH_FIELD_SIZE
        + PDU_TYPE_FIELD_SIZE
        + COMPRESSION_TYPE_FIELD_SIZE
        + COMPRESSED_LENGTH_FIELD_SIZE;
}

impl Encode for ShareDataHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        if self.compression_flags.is_empty() {
            let compression_flags_with_type =
                self.compression_flags.bits() | (self.compression_type & SHARE_DATA_HEADER_COMPRESSION_MASK);

            write_padding!(dst, 1);
            dst.write_u8(self.stream_priority.as_u8());
            dst.write_u16(cast_length!(
                "uncompressedLength",
                self.share_data_pdu.size()
                    + PDU_TYPE_FIELD_SIZE
                    + COMPRESSION_TYPE_FIELD_SIZE
                    + COMPRESSED_LENGTH_FIELD_SIZE
            )?);
            dst.write_u8(self.share_data_pdu.share_header_type().as_u8());
            dst.write_u8(compression_flags_with_type);
            dst.write_u16(0); // compressed length

            self.share_data_pdu.encode(dst)
        } else {
            Err(other_err!(Self::NAME, "compression is not implemented"))
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.share_data_pdu.size()
    }
}

impl<'de> Decode<'de> for ShareDataHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        read_padding!(src, 1);
        let stream_priority = StreamPriority::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("streamPriority", "invalid stream priority"))?;
        let _uncompressed_length = src.read_u16();
        let pdu_type = ShareDataPduType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("pduType", "invalid pdu type"))?;
        let compression_flags_with_type = src.read_u8();

        let compression_flags =
            CompressionFlags::from_bits_truncate(compression_flags_with_type & !SHARE_DATA_HEADER_COMPRESSION_MASK);
        let compression_type = compression_flags_with_type & SHARE_DATA_HEADER_COMPRESSION_MASK;
        let _compressed_length = src.read_u16();

        let share_data_pdu = ShareDataPdu::from_type(src, pdu_type)?;

        Ok(Self {
            share_data_pdu,
            stream_priority,
            compression_flags,
            compression_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareDataPdu {
    Synchronize(SynchronizePdu),
    Control(ControlPdu),
    FontList(FontPdu),
    FontMap(FontPdu),
    MonitorLayout(MonitorLayoutPdu),
    PersistentKeyList(PersistentKeyListPdu),
    FrameAcknowledge(FrameAcknowledgePdu),
    ServerSetErrorInfo(ServerSetErrorInfoPdu),
    Input(InputEventPdu),
    ShutdownRequest,
    ShutdownDenied,
    SuppressOutput(SuppressOutputPdu),
    RefreshRectangle(RefreshRectanglePdu),
}

impl ShareDataPdu {
    const NAME: &'static str = "ShareDataPdu";

    pub fn as_short_name(&self) -> &str {
        match self {
            ShareDataPdu::Synchronize(_) => "Synchronize PDU",
            ShareDataPdu::Control(_) => "Control PDU",
            ShareDataPdu::FontList(_) => "Font List PDU",
            ShareDataPdu::FontMap(_) => "Font Map PDU",
            ShareDataPdu::MonitorLayout(_) => "Monitor Layout PDU",
            ShareDataPdu::PersistentKeyList(_) => "Persistent Key List PDU",
            ShareDataPdu::FrameAcknowledge(_) => "Frame Acknowledge PDU",
            ShareDataPdu::ServerSetErrorInfo(_) => "Server Set Error Info PDU",
            ShareDataPdu::Input(_) => "Input Event PDU",
            ShareDataPdu::ShutdownRequest => "Shutdown Request PDU",
            ShareDataPdu::ShutdownDenied => "Shutdown Denied PDU",
            ShareDataPdu::SuppressOutput(_) => "Suppress Output PDU",
            ShareDataPdu::RefreshRectangle(_) => "Refresh Rectangle PDU",
        }
    }

    pub fn share_header_type(&self) -> ShareDataPduType {
        match self {
            ShareDataPdu::Synchronize(_) => ShareDataPduType::Synchronize,
            ShareDataPdu::Control(_) => ShareDataPduType::Control,
            ShareDataPdu::FontList(_) => ShareDataPduType::FontList,
            ShareDataPdu::FontMap(_) => ShareDataPduType::FontMap,
            ShareDataPdu::MonitorLayout(_) => ShareDataPduType::MonitorLayoutPdu,
            ShareDataPdu::PersistentKeyList(_) => ShareDataPduType::BitmapCachePersistentList,
            ShareDataPdu::FrameAcknowledge(_) => ShareDataPduType::FrameAcknowledgePdu,
            ShareDataPdu::ServerSetErrorInfo(_) => ShareDataPduType::SetErrorInfoPdu,
            ShareDataPdu::Input(_) => ShareDataPduType::Input,
            ShareDataPdu::ShutdownRequest => ShareDataPduType::ShutdownRequest,
            ShareDataPdu::ShutdownDenied => ShareDataPduType::ShutdownDenied,
            ShareDataPdu::SuppressOutput(_) => ShareDataPduType::SuppressOutput,
            ShareDataPdu::RefreshRectangle(_) => ShareDataPduType::RefreshRectangle,
        }
    }

    fn from_type(src: &mut ReadCursor<'_>, share_type: ShareDataPduType) -> DecodeResult<Self> {
        match share_type {
            ShareDataPduType::Synchronize => Ok(ShareDataPdu::Synchronize(SynchronizePdu::decode(src)?)),
            ShareDataPduType::Control => Ok(ShareDataPdu::Control(ControlPdu::decode(src)?)),
            ShareDataPduType::FontList => Ok(ShareDataPdu::FontList(FontPdu::decode(src)?)),
            ShareDataPduType::FontMap => Ok(ShareDataPdu::FontMap(FontPdu::decode(src)?)),
            ShareDataPduType::MonitorLayoutPdu => Ok(ShareDataPdu::MonitorLayout(MonitorLayoutPdu::decode(src)?)),
            ShareDataPduType::BitmapCachePersistentList => {
                Ok(ShareDataPdu::PersistentKeyList(PersistentKeyListPdu::decode(src)?))
            }
            ShareDataPduType::FrameAcknowledgePdu => {
                Ok(ShareDataPdu::FrameAcknowledge(FrameAcknowledgePdu::decode(src)?))
            }
            ShareDataPduType::SetErrorInfoPdu => {
                Ok(ShareDataPdu::ServerSetErrorInfo(ServerSetErrorInfoPdu::decode(src)?))
            }
            ShareDataPduType::Input => Ok(ShareDataPdu::Input(InputEventPdu::decode(src)?)),
            ShareDataPduType::ShutdownRequest => Ok(ShareDataPdu::ShutdownRequest),
            ShareDataPduType::ShutdownDenied => Ok(ShareDataPdu::ShutdownDenied),
            ShareDataPduType::SuppressOutput => Ok(ShareDataPdu::SuppressOutput(SuppressOutputPdu::decode(src)?)),
            ShareDataPduType::RefreshRectangle => Ok(ShareDataPdu::RefreshRectangle(RefreshRectanglePdu::decode(src)?)),
            ShareDataPduType::Update | ShareDataPduType::Pointer | ShareDataPduType::SaveSessionInfo => {
                Err(other_err!(Self::NAME, "unsupported share data PDU"))
            }
        }
    }
}

impl Encode for ShareDataPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            ShareDataPdu::Synchronize(pdu) => pdu.encode(dst),
            ShareDataPdu::Control(pdu) => pdu.encode(dst),
            ShareDataPdu::FontList(pdu) | ShareDataPdu::FontMap(pdu) => pdu.encode(dst),
            ShareDataPdu::MonitorLayout(pdu) => pdu.encode(dst),
            ShareDataPdu::PersistentKeyList(pdu) => pdu.encode(dst),
            ShareDataPdu::FrameAcknowledge(pdu) => pdu.encode(dst),
            ShareDataPdu::ServerSetErrorInfo(pdu) => pdu.encode(dst),
            ShareDataPdu::Input(pdu) => pdu.encode(dst),
            ShareDataPdu::ShutdownRequest | ShareDataPdu::ShutdownDenied => Ok(()),
            ShareDataPdu::SuppressOutput(pdu) => pdu.encode(dst),
            ShareDataPdu::RefreshRectangle(pdu) => pdu.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            ShareDataPdu::Synchronize(pdu) => pdu.size(),
            ShareDataPdu::Control(pdu) => pdu.size(),
            ShareDataPdu::FontList(pdu) | ShareDataPdu::FontMap(pdu) => pdu.size(),
            ShareDataPdu::MonitorLayout(pdu) => pdu.size(),
            ShareDataPdu::PersistentKeyList(pdu) => pdu.size(),
            ShareDataPdu::FrameAcknowledge(pdu) => pdu.size(),
            ShareDataPdu::ServerSetErrorInfo(pdu) => pdu.size(),
            ShareDataPdu::Input(pdu) => pdu.size(),
            ShareDataPdu::ShutdownRequest | ShareDataPdu::ShutdownDenied => 0,
            ShareDataPdu::SuppressOutput(pdu) => pdu.size(),
            ShareDataPdu::RefreshRectangle(pdu) => pdu.size(),
        }
    }
}

/// 2.2.3.1 Server Deactivate All PDU
///
/// [2.2.3.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/8a29971a-df3c-48da-add2-8ed9a05edc89
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDeactivateAll;

impl ServerDeactivateAll {
    const NAME: &'static str = "ServerDeactivateAll";
}

impl<'de> Decode<'de> for ServerDeactivateAll {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 2);
        let length_source_descriptor = src.read_u16();
        ensure_size!(in: src, size: usize::from(length_source_descriptor));
        let _ = src.read_slice(length_source_descriptor.into());
        Ok(Self)
    }
}

impl Encode for ServerDeactivateAll {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        // lengthSourceDescriptor + a single 0x00 source descriptor byte
        dst.write_u16(1);
        dst.write_u8(0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        2 /* lengthSourceDescriptor */ + 1 /* sourceDescriptor */
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    fn wrap_data(pdu: ShareDataPdu) -> ShareControlHeader {
        ShareControlHeader {
            share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
                share_data_pdu: pdu,
                stream_priority: StreamPriority::Undefined,
                compression_flags: CompressionFlags::empty(),
                compression_type: 0,
            }),
            pdu_source: 1003,
            share_id: 0x0001_0001,
        }
    }

    #[test]
    fn share_data_synchronize_round_trip() {
        let header = wrap_data(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 1002 }));

        let encoded = encode_vec(&header).unwrap();
        let decoded: ShareControlHeader = decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn share_data_shutdown_request_is_empty_bodied() {
        let header = wrap_data(ShareDataPdu::ShutdownRequest);

        let encoded = encode_vec(&header).unwrap();
        // share control (10) + share data (8), empty body
        assert_eq!(encoded.len(), 18);

        let decoded: ShareControlHeader = decode(&encoded).unwrap();
        match decoded.share_control_pdu {
            ShareControlPdu::Data(data) => assert_eq!(data.share_data_pdu, ShareDataPdu::ShutdownRequest),
            other => panic!("unexpected PDU: {other:?}"),
        }
    }

    #[test]
    fn flow_control_pdu_is_skipped() {
        // flowMarker + 6 opaque bytes
        let bytes = [0x00, 0x80, 0x43, 0x00, 0x02, 0x00, 0x00, 0x03];
        let decoded: ShareControlHeader = decode(&bytes).unwrap();
        assert_eq!(decoded.share_control_pdu, ShareControlPdu::FlowControl);
    }

    #[test]
    fn share_data_trailing_padding_is_consumed() {
        let header = wrap_data(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 1002 }));

        let mut encoded = encode_vec(&header).unwrap();
        // grow totalLength by two and append padding, as some servers do
        let total = u16::from_le_bytes([encoded[0], encoded[1]]) + 2;
        encoded[0..2].copy_from_slice(&total.to_le_bytes());
        encoded.extend_from_slice(&[0, 0]);

        let decoded: ShareControlHeader = decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn deactivate_all_round_trip() {
        let header = ShareControlHeader {
            share_control_pdu: ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll),
            pdu_source: 1003,
            share_id: 0x0001_0001,
        };

        let encoded = encode_vec(&header).unwrap();
        let decoded: ShareControlHeader = decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }
}
