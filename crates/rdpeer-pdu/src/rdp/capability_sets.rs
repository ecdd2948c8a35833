//! Demand Active / Confirm Active PDUs and the capability sets the server
//! core inspects. Everything else round-trips as raw bytes.

use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

pub const SERVER_CHANNEL_ID: u16 = 0x03EA;

const CAPABILITY_SET_HEADER_SIZE: usize = 4;

const GENERAL_CAP: u16 = 0x0001;
const BITMAP_CAP: u16 = 0x0002;
const INPUT_CAP: u16 = 0x000D;
const VIRTUAL_CHANNEL_CAP: u16 = 0x0014;
const SURFACE_COMMANDS_CAP: u16 = 0x001C;
const FRAME_ACKNOWLEDGE_CAP: u16 = 0x001E;

const GENERAL_CAP_SIZE: usize = 20;
const BITMAP_CAP_SIZE: usize = 24;
const INPUT_CAP_IME_SIZE: usize = 64;
const INPUT_CAP_SIZE: usize = 2 + 2 + 4 * 4 + INPUT_CAP_IME_SIZE;
const SURFACE_COMMANDS_CAP_SIZE: usize = 8;

const PROTOCOL_VERSION: u16 = 0x0200;

bitflags! {
    /// `extraFlags` of TS_GENERAL_CAPABILITYSET.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct GeneralExtraFlags: u16 {
        const FASTPATH_OUTPUT_SUPPORTED = 0x0001;
        const LONG_CREDENTIALS_SUPPORTED = 0x0004;
        const AUTORECONNECT_SUPPORTED = 0x0008;
        const ENC_SALTED_CHECKSUM = 0x0010;
        const NO_BITMAP_COMPRESSION_HDR = 0x0400;
    }
}

bitflags! {
    /// `inputFlags` of TS_INPUT_CAPABILITYSET.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct InputFlags: u16 {
        const SCANCODES = 0x0001;
        const MOUSEX = 0x0004;
        const FASTPATH_INPUT = 0x0008;
        const UNICODE = 0x0010;
        const FASTPATH_INPUT_2 = 0x0020;
        const UNUSED_1 = 0x0040;
        const MOUSE_RELATIVE = 0x0080;
        const TS_MOUSE_HWHEEL = 0x0100;
        const TS_QOE_TIMESTAMPS = 0x0200;
    }
}

bitflags! {
    /// `cmdFlags` of TS_SURFCMDS_CAPABILITYSET.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct CmdFlags: u16 {
        const SET_SURFACE_BITS = 0x02;
        const FRAME_MARKER = 0x10;
        const STREAM_SURFACE_BITS = 0x40;
    }
}

/// TS_GENERAL_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct General {
    pub major_platform_type: u16,
    pub minor_platform_type: u16,
    pub extra_flags: GeneralExtraFlags,
    pub refresh_rect_support: bool,
    pub suppress_output_support: bool,
}

impl General {
    const NAME: &'static str = "General";

    const FIXED_PART_SIZE: usize = GENERAL_CAP_SIZE;
}

impl Encode for General {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.major_platform_type);
        dst.write_u16(self.minor_platform_type);
        dst.write_u16(PROTOCOL_VERSION);
        write_padding!(dst, 2);
        dst.write_u16(0); // compressionTypes
        dst.write_u16(self.extra_flags.bits());
        dst.write_u16(0); // updateCapabilityFlag
        dst.write_u16(0); // remoteUnshareFlag
        dst.write_u16(0); // compressionLevel
        dst.write_u8(u8::from(self.refresh_rect_support));
        dst.write_u8(u8::from(self.suppress_output_support));

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for General {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let major_platform_type = src.read_u16();
        let minor_platform_type = src.read_u16();
        let protocol_version = src.read_u16();
        if protocol_version != PROTOCOL_VERSION {
            return Err(invalid_field_err!("protocolVersion", "invalid general caps version"));
        }
        read_padding!(src, 2);
        let _compression_types = src.read_u16();
        let extra_flags = GeneralExtraFlags::from_bits_truncate(src.read_u16());
        let _update_capability_flag = src.read_u16();
        let _remote_unshare_flag = src.read_u16();
        let _compression_level = src.read_u16();
        let refresh_rect_support = src.read_u8() != 0;
        let suppress_output_support = src.read_u8() != 0;

        Ok(Self {
            major_platform_type,
            minor_platform_type,
            extra_flags,
            refresh_rect_support,
            suppress_output_support,
        })
    }
}

/// TS_BITMAP_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub preferred_bits_per_pixel: u16,
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub desktop_resize_flag: bool,
    pub drawing_flags: u8,
}

impl Bitmap {
    const NAME: &'static str = "Bitmap";

    const FIXED_PART_SIZE: usize = BITMAP_CAP_SIZE;
}

impl Encode for Bitmap {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.preferred_bits_per_pixel);
        dst.write_u16(1); // receive1BitPerPixel
        dst.write_u16(1); // receive4BitsPerPixel
        dst.write_u16(1); // receive8BitsPerPixel
        dst.write_u16(self.desktop_width);
        dst.write_u16(self.desktop_height);
        write_padding!(dst, 2);
        dst.write_u16(u16::from(self.desktop_resize_flag));
        dst.write_u16(1); // bitmapCompressionFlag, always TRUE
        dst.write_u8(0); // highColorFlags
        dst.write_u8(self.drawing_flags);
        dst.write_u16(1); // multipleRectangleSupport, always TRUE
        write_padding!(dst, 2);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Bitmap {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let preferred_bits_per_pixel = src.read_u16();
        let _receive_1_bit = src.read_u16();
        let _receive_4_bits = src.read_u16();
        let _receive_8_bits = src.read_u16();
        let desktop_width = src.read_u16();
        let desktop_height = src.read_u16();
        read_padding!(src, 2);
        let desktop_resize_flag = src.read_u16() != 0;
        let _bitmap_compression_flag = src.read_u16();
        let _high_color_flags = src.read_u8();
        let drawing_flags = src.read_u8();
        let _multiple_rectangle_support = src.read_u16();
        read_padding!(src, 2);

        Ok(Self {
            preferred_bits_per_pixel,
            desktop_width,
            desktop_height,
            desktop_resize_flag,
            drawing_flags,
        })
    }
}

/// TS_INPUT_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub input_flags: InputFlags,
    pub keyboard_layout: u32,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub keyboard_function_key: u32,
}

impl Input {
    const NAME: &'static str = "Input";

    const FIXED_PART_SIZE: usize = INPUT_CAP_SIZE;
}

impl Encode for Input {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.input_flags.bits());
        write_padding!(dst, 2);
        dst.write_u32(self.keyboard_layout);
        dst.write_u32(self.keyboard_type);
        dst.write_u32(self.keyboard_subtype);
        dst.write_u32(self.keyboard_function_key);
        write_padding!(dst, INPUT_CAP_IME_SIZE);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for Input {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let input_flags = InputFlags::from_bits_truncate(src.read_u16());
        read_padding!(src, 2);
        let keyboard_layout = src.read_u32();
        let keyboard_type = src.read_u32();
        let keyboard_subtype = src.read_u32();
        let keyboard_function_key = src.read_u32();
        read_padding!(src, INPUT_CAP_IME_SIZE);

        Ok(Self {
            input_flags,
            keyboard_layout,
            keyboard_type,
            keyboard_subtype,
            keyboard_function_key,
        })
    }
}

/// TS_VIRTUALCHANNEL_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualChannel {
    pub flags: u32,
    pub chunk_size: Option<u32>,
}

impl VirtualChannel {
    const NAME: &'static str = "VirtualChannel";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for VirtualChannel {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.flags);
        if let Some(chunk_size) = self.chunk_size {
            dst.write_u32(chunk_size);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + if self.chunk_size.is_some() { 4 } else { 0 }
    }
}

impl<'de> Decode<'de> for VirtualChannel {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = src.read_u32();
        let chunk_size = (src.len() >= 4).then(|| src.read_u32());

        Ok(Self { flags, chunk_size })
    }
}

/// TS_SURFCMDS_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceCommands {
    pub flags: CmdFlags,
}

impl SurfaceCommands {
    const NAME: &'static str = "SurfaceCommands";

    const FIXED_PART_SIZE: usize = SURFACE_COMMANDS_CAP_SIZE;
}

impl Encode for SurfaceCommands {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(u32::from(self.flags.bits()));
        dst.write_u32(0); // reserved

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for SurfaceCommands {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let flags = src.read_u32();
        let _reserved = src.read_u32();

        Ok(Self {
            flags: CmdFlags::from_bits_truncate(u16::try_from(flags & 0xFFFF).expect("masked")),
        })
    }
}

/// TS_FRAME_ACKNOWLEDGE_CAPABILITYSET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameAcknowledge {
    pub max_unacknowledged_frame_count: u32,
}

impl FrameAcknowledge {
    const NAME: &'static str = "FrameAcknowledge";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for FrameAcknowledge {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.max_unacknowledged_frame_count);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for FrameAcknowledge {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            max_unacknowledged_frame_count: src.read_u32(),
        })
    }
}

/// A single capability set; unrecognized types are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilitySet {
    General(General),
    Bitmap(Bitmap),
    Input(Input),
    VirtualChannel(VirtualChannel),
    SurfaceCommands(SurfaceCommands),
    FrameAcknowledge(FrameAcknowledge),
    Unknown { cap_type: u16, data: Vec<u8> },
}

impl CapabilitySet {
    const NAME: &'static str = "CapabilitySet";

    fn cap_type(&self) -> u16 {
        match self {
            Self::General(_) => GENERAL_CAP,
            Self::Bitmap(_) => BITMAP_CAP,
            Self::Input(_) => INPUT_CAP,
            Self::VirtualChannel(_) => VIRTUAL_CHANNEL_CAP,
            Self::SurfaceCommands(_) => SURFACE_COMMANDS_CAP,
            Self::FrameAcknowledge(_) => FRAME_ACKNOWLEDGE_CAP,
            Self::Unknown { cap_type, .. } => *cap_type,
        }
    }

    fn data_size(&self) -> usize {
        match self {
            Self::General(caps) => caps.size(),
            Self::Bitmap(caps) => caps.size(),
            Self::Input(caps) => caps.size(),
            Self::VirtualChannel(caps) => caps.size(),
            Self::SurfaceCommands(caps) => caps.size(),
            Self::FrameAcknowledge(caps) => caps.size(),
            Self::Unknown { data, .. } => data.len(),
        }
    }
}

impl Encode for CapabilitySet {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(self.cap_type());
        dst.write_u16(cast_length!("lengthCapability", self.size())?);

        match self {
            Self::General(caps) => caps.encode(dst),
            Self::Bitmap(caps) => caps.encode(dst),
            Self::Input(caps) => caps.encode(dst),
            Self::VirtualChannel(caps) => caps.encode(dst),
            Self::SurfaceCommands(caps) => caps.encode(dst),
            Self::FrameAcknowledge(caps) => caps.encode(dst),
            Self::Unknown { data, .. } => {
                dst.write_slice(data);
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        CAPABILITY_SET_HEADER_SIZE + self.data_size()
    }
}

impl<'de> Decode<'de> for CapabilitySet {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: CAPABILITY_SET_HEADER_SIZE);

        let cap_type = src.read_u16();
        let length = usize::from(src.read_u16());

        if length < CAPABILITY_SET_HEADER_SIZE {
            return Err(invalid_field_err!("lengthCapability", "length too small"));
        }

        let data_length = length - CAPABILITY_SET_HEADER_SIZE;
        ensure_size!(in: src, size: data_length);
        let mut data = ReadCursor::new(src.read_slice(data_length));

        match cap_type {
            GENERAL_CAP => Ok(Self::General(General::decode(&mut data)?)),
            BITMAP_CAP => Ok(Self::Bitmap(Bitmap::decode(&mut data)?)),
            INPUT_CAP => Ok(Self::Input(Input::decode(&mut data)?)),
            VIRTUAL_CHANNEL_CAP => Ok(Self::VirtualChannel(VirtualChannel::decode(&mut data)?)),
            SURFACE_COMMANDS_CAP => Ok(Self::SurfaceCommands(SurfaceCommands::decode(&mut data)?)),
            FRAME_ACKNOWLEDGE_CAP => Ok(Self::FrameAcknowledge(FrameAcknowledge::decode(&mut data)?)),
            // order, pointer and the rest are opaque to this server core
            _ => Ok(Self::Unknown {
                cap_type,
                data: data.read_remaining().to_vec(),
            }),
        }
    }
}

fn encode_capability_sets(capability_sets: &[CapabilitySet], dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
    for capability_set in capability_sets {
        capability_set.encode(dst)?;
    }
    Ok(())
}

fn capability_sets_size(capability_sets: &[CapabilitySet]) -> usize {
    capability_sets.iter().map(Encode::size).sum()
}

fn decode_capability_sets(src: &mut ReadCursor<'_>, count: usize) -> DecodeResult<Vec<CapabilitySet>> {
    let mut capability_sets = Vec::with_capacity(count);
    for _ in 0..count {
        capability_sets.push(CapabilitySet::decode(src)?);
    }
    Ok(capability_sets)
}

/// TS_DEMAND_ACTIVE_PDU carried in a Demand Active share control PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemandActive {
    pub source_descriptor: String,
    pub capability_sets: Vec<CapabilitySet>,
}

impl DemandActive {
    const NAME: &'static str = "DemandActive";

    // shareId + lengthSourceDescriptor + lengthCombinedCapabilities are
    // accounted by the wrapping types
    const FIXED_PART_SIZE: usize = 2 /* lengthSourceDescriptor */ + 2 /* lengthCombinedCapabilities */;
}

/// The server-to-client Demand Active PDU body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDemandActive {
    pub pdu: DemandActive,
    pub share_id: u32,
}

impl ServerDemandActive {
    const NAME: &'static str = "ServerDemandActive";
}

impl Encode for ServerDemandActive {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let combined_length = capability_sets_size(&self.pdu.capability_sets) + 2 /* numberCapabilities */ + 2 /* pad */;

        dst.write_u32(self.share_id);
        dst.write_u16(cast_length!("lengthSourceDescriptor", self.pdu.source_descriptor.len() + 1)?);
        dst.write_u16(cast_length!("lengthCombinedCapabilities", combined_length)?);
        dst.write_slice(self.pdu.source_descriptor.as_bytes());
        dst.write_u8(0);
        dst.write_u16(cast_length!("numberCapabilities", self.pdu.capability_sets.len())?);
        write_padding!(dst, 2);
        encode_capability_sets(&self.pdu.capability_sets, dst)?;
        dst.write_u32(0); // sessionId

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        4 /* shareId */ + DemandActive::FIXED_PART_SIZE
            + self.pdu.source_descriptor.len() + 1
            + 2 /* numberCapabilities */ + 2 /* pad */
            + capability_sets_size(&self.pdu.capability_sets)
            + 4 /* sessionId */
    }
}

impl<'de> Decode<'de> for ServerDemandActive {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 4 + DemandActive::FIXED_PART_SIZE);

        let share_id = src.read_u32();
        let length_source_descriptor = usize::from(src.read_u16());
        let _length_combined_capabilities = src.read_u16();

        ensure_size!(in: src, size: length_source_descriptor + 4);
        let source_descriptor = String::from_utf8_lossy(src.read_slice(length_source_descriptor))
            .trim_end_matches('\0')
            .to_owned();

        let number_capabilities = usize::from(src.read_u16());
        read_padding!(src, 2);

        let capability_sets = decode_capability_sets(src, number_capabilities)?;

        // trailing sessionId is optional on the wire
        if src.len() >= 4 {
            let _session_id = src.read_u32();
        }

        Ok(Self {
            pdu: DemandActive {
                source_descriptor,
                capability_sets,
            },
            share_id,
        })
    }
}

/// The client-to-server Confirm Active PDU body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfirmActive {
    pub pdu: DemandActive,
    pub share_id: u32,
    pub originator_id: u16,
}

impl ClientConfirmActive {
    const NAME: &'static str = "ClientConfirmActive";
}

impl Encode for ClientConfirmActive {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let combined_length = capability_sets_size(&self.pdu.capability_sets) + 2 + 2;

        dst.write_u32(self.share_id);
        dst.write_u16(self.originator_id);
        dst.write_u16(cast_length!("lengthSourceDescriptor", self.pdu.source_descriptor.len() + 1)?);
        dst.write_u16(cast_length!("lengthCombinedCapabilities", combined_length)?);
        dst.write_slice(self.pdu.source_descriptor.as_bytes());
        dst.write_u8(0);
        dst.write_u16(cast_length!("numberCapabilities", self.pdu.capability_sets.len())?);
        write_padding!(dst, 2);
        encode_capability_sets(&self.pdu.capability_sets, dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        4 /* shareId */ + 2 /* originatorId */ + DemandActive::FIXED_PART_SIZE
            + self.pdu.source_descriptor.len() + 1
            + 2 + 2
            + capability_sets_size(&self.pdu.capability_sets)
    }
}

impl<'de> Decode<'de> for ClientConfirmActive {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 4 + 2 + DemandActive::FIXED_PART_SIZE);

        let share_id = src.read_u32();
        let originator_id = src.read_u16();
        let length_source_descriptor = usize::from(src.read_u16());
        let _length_combined_capabilities = src.read_u16();

        ensure_size!(in: src, size: length_source_descriptor + 4);
        let source_descriptor = String::from_utf8_lossy(src.read_slice(length_source_descriptor))
            .trim_end_matches('\0')
            .to_owned();

        let number_capabilities = usize::from(src.read_u16());
        read_padding!(src, 2);

        let capability_sets = decode_capability_sets(src, number_capabilities)?;

        Ok(Self {
            pdu: DemandActive {
                source_descriptor,
                capability_sets,
            },
            share_id,
            originator_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    fn sample_sets() -> Vec<CapabilitySet> {
        vec![
            CapabilitySet::General(General {
                major_platform_type: 1,
                minor_platform_type: 3,
                extra_flags: GeneralExtraFlags::FASTPATH_OUTPUT_SUPPORTED,
                refresh_rect_support: true,
                suppress_output_support: true,
            }),
            CapabilitySet::Bitmap(Bitmap {
                preferred_bits_per_pixel: 32,
                desktop_width: 1280,
                desktop_height: 720,
                desktop_resize_flag: true,
                drawing_flags: 0,
            }),
            CapabilitySet::VirtualChannel(VirtualChannel {
                flags: 0,
                chunk_size: Some(1600),
            }),
            CapabilitySet::Unknown {
                cap_type: 0x7FFE,
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            },
        ]
    }

    #[test]
    fn demand_active_round_trip() {
        let pdu = ServerDemandActive {
            pdu: DemandActive {
                source_descriptor: "RDP".into(),
                capability_sets: sample_sets(),
            },
            share_id: 0x0001_0001,
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());

        let decoded: ServerDemandActive = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn confirm_active_round_trip() {
        let pdu = ClientConfirmActive {
            pdu: DemandActive {
                source_descriptor: "MSTSC".into(),
                capability_sets: sample_sets(),
            },
            share_id: 0x0001_0001,
            originator_id: SERVER_CHANNEL_ID,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: ClientConfirmActive = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn unknown_capability_is_preserved_verbatim() {
        let set = CapabilitySet::Unknown {
            cap_type: 0x0042,
            data: vec![1, 2, 3],
        };

        let encoded = encode_vec(&set).unwrap();
        assert_eq!(encoded[..4], [0x42, 0x00, 0x07, 0x00]);

        let decoded: CapabilitySet = decode(&encoded).unwrap();
        assert_eq!(decoded, set);
    }
}
