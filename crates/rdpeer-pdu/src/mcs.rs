//! T.125 MCS PDUs.
//!
//! The domain PDUs (erect domain, attach user, channel join, send data,
//! disconnect) use ALIGNED BASIC-PER; the connect PDUs use BER and carry the
//! GCC conference blocks as user data.

use std::borrow::Cow;

use rdpeer_core::{
    cast_length, ensure_size, invalid_field_err, read_padding, Decode, DecodeResult, Encode, EncodeResult, IntoOwned,
    ReadCursor, WithSource, WriteCursor,
};

use crate::gcc::{ClientGccBlocks, ServerGccBlocks};
use crate::tpdu::{TpduCode, TpduHeader};
use crate::tpkt::TpktHeader;
use crate::x224::{impl_x224_pdu, user_data_size, X224Pdu};
use crate::{ber, per};

pub const RESULT_ENUM_LENGTH: u8 = 16;

/// The id of the MCS global (IO) channel.
pub const GLOBAL_CHANNEL_ID: u16 = 1003;

const BASE_CHANNEL_ID: u16 = 1001;
const SEND_DATA_PDU_DATA_PRIORITY_AND_SEGMENTATION: u8 = 0x70;

macro_rules! per_field_err {
    ($field_name:expr) => {{
        |error| rdpeer_core::invalid_field_err::<rdpeer_core::DecodeError>(Self::MCS_NAME, $field_name, "PER").with_source(error)
    }};
}

pub trait McsPdu<'de>: Sized {
    const MCS_NAME: &'static str;

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self>;

    fn mcs_size(&self) -> usize;
}

impl<'de, T> X224Pdu<'de> for T
where
    T: McsPdu<'de>,
{
    const X224_NAME: &'static str = T::MCS_NAME;

    const TPDU_CODE: TpduCode = TpduCode::DATA;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        self.mcs_body_encode(dst)
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let tpdu_user_data_size = user_data_size(tpkt, tpdu);
        T::mcs_body_decode(src, tpdu_user_data_size)
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        self.mcs_size()
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
enum DomainMcsPdu {
    ErectDomainRequest = 1,
    DisconnectProviderUltimatum = 8,
    AttachUserRequest = 10,
    AttachUserConfirm = 11,
    ChannelJoinRequest = 14,
    ChannelJoinConfirm = 15,
    SendDataRequest = 25,
    SendDataIndication = 26,
}

impl DomainMcsPdu {
    fn check_expected(self, name: &'static str, expected: DomainMcsPdu) -> DecodeResult<()> {
        if self != expected {
            Err(rdpeer_core::unexpected_message_type_err(name, self.as_u8()))
        } else {
            Ok(())
        }
    }

    fn from_choice(choice: u8) -> Option<Self> {
        Self::from_u8(choice >> 2)
    }

    fn to_choice(self) -> u8 {
        self.as_u8() << 2
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ErectDomainRequest),
            8 => Some(Self::DisconnectProviderUltimatum),
            10 => Some(Self::AttachUserRequest),
            11 => Some(Self::AttachUserConfirm),
            14 => Some(Self::ChannelJoinRequest),
            15 => Some(Self::ChannelJoinConfirm),
            25 => Some(Self::SendDataRequest),
            26 => Some(Self::SendDataIndication),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

fn read_mcspdu_header(src: &mut ReadCursor<'_>, ctx: &'static str) -> DecodeResult<DomainMcsPdu> {
    let choice = src
        .try_read_u8()
        .map_err(|e| rdpeer_core::other_err::<rdpeer_core::DecodeError>(ctx, "truncated header").with_source(e))?;

    DomainMcsPdu::from_choice(choice)
        .ok_or_else(|| invalid_field_err(ctx, "domain-mcspdu", "unexpected application tag for CHOICE"))
}

fn peek_mcspdu_header(src: &mut ReadCursor<'_>, ctx: &'static str) -> DecodeResult<DomainMcsPdu> {
    let choice = src
        .try_peek_u8()
        .map_err(|e| rdpeer_core::other_err::<rdpeer_core::DecodeError>(ctx, "truncated header").with_source(e))?;

    DomainMcsPdu::from_choice(choice)
        .ok_or_else(|| invalid_field_err(ctx, "domain-mcspdu", "unexpected application tag for CHOICE"))
}

fn write_mcspdu_header(dst: &mut WriteCursor<'_>, domain_mcspdu: DomainMcsPdu, options: u8) {
    let choice = domain_mcspdu.to_choice();

    debug_assert_eq!(options & !0b11, 0);
    debug_assert_eq!(choice & 0b11, 0);

    dst.write_u8(choice | options);
}

/// Any of the MCS domain PDUs, for dispatch when the exact kind is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McsMessage<'a> {
    ErectDomainRequest(ErectDomainPdu),
    AttachUserRequest(AttachUserRequest),
    AttachUserConfirm(AttachUserConfirm),
    ChannelJoinRequest(ChannelJoinRequest),
    ChannelJoinConfirm(ChannelJoinConfirm),
    SendDataRequest(SendDataRequest<'a>),
    SendDataIndication(SendDataIndication<'a>),
    DisconnectProviderUltimatum(DisconnectProviderUltimatum),
}

pub type OwnedMcsMessage = McsMessage<'static>;

impl IntoOwned for McsMessage<'_> {
    type Owned = OwnedMcsMessage;

    fn into_owned(self) -> Self::Owned {
        match self {
            Self::ErectDomainRequest(msg) => McsMessage::ErectDomainRequest(msg),
            Self::AttachUserRequest(msg) => McsMessage::AttachUserRequest(msg),
            Self::AttachUserConfirm(msg) => McsMessage::AttachUserConfirm(msg),
            Self::ChannelJoinRequest(msg) => McsMessage::ChannelJoinRequest(msg),
            Self::ChannelJoinConfirm(msg) => McsMessage::ChannelJoinConfirm(msg),
            Self::SendDataRequest(msg) => McsMessage::SendDataRequest(msg.into_owned()),
            Self::SendDataIndication(msg) => McsMessage::SendDataIndication(msg.into_owned()),
            Self::DisconnectProviderUltimatum(msg) => McsMessage::DisconnectProviderUltimatum(msg),
        }
    }
}

impl<'de> McsPdu<'de> for McsMessage<'de> {
    const MCS_NAME: &'static str = "McsMessage";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        match self {
            Self::ErectDomainRequest(msg) => msg.mcs_body_encode(dst),
            Self::AttachUserRequest(msg) => msg.mcs_body_encode(dst),
            Self::AttachUserConfirm(msg) => msg.mcs_body_encode(dst),
            Self::ChannelJoinRequest(msg) => msg.mcs_body_encode(dst),
            Self::ChannelJoinConfirm(msg) => msg.mcs_body_encode(dst),
            Self::SendDataRequest(msg) => msg.mcs_body_encode(dst),
            Self::SendDataIndication(msg) => msg.mcs_body_encode(dst),
            Self::DisconnectProviderUltimatum(msg) => msg.mcs_body_encode(dst),
        }
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self> {
        match peek_mcspdu_header(src, Self::MCS_NAME)? {
            DomainMcsPdu::ErectDomainRequest => Ok(McsMessage::ErectDomainRequest(ErectDomainPdu::mcs_body_decode(
                src,
                tpdu_user_data_size,
            )?)),
            DomainMcsPdu::AttachUserRequest => Ok(McsMessage::AttachUserRequest(AttachUserRequest::mcs_body_decode(
                src,
                tpdu_user_data_size,
            )?)),
            DomainMcsPdu::AttachUserConfirm => Ok(McsMessage::AttachUserConfirm(AttachUserConfirm::mcs_body_decode(
                src,
                tpdu_user_data_size,
            )?)),
            DomainMcsPdu::ChannelJoinRequest => Ok(McsMessage::ChannelJoinRequest(
                ChannelJoinRequest::mcs_body_decode(src, tpdu_user_data_size)?,
            )),
            DomainMcsPdu::ChannelJoinConfirm => Ok(McsMessage::ChannelJoinConfirm(
                ChannelJoinConfirm::mcs_body_decode(src, tpdu_user_data_size)?,
            )),
            DomainMcsPdu::SendDataRequest => Ok(McsMessage::SendDataRequest(SendDataRequest::mcs_body_decode(
                src,
                tpdu_user_data_size,
            )?)),
            DomainMcsPdu::SendDataIndication => Ok(McsMessage::SendDataIndication(
                SendDataIndication::mcs_body_decode(src, tpdu_user_data_size)?,
            )),
            DomainMcsPdu::DisconnectProviderUltimatum => Ok(McsMessage::DisconnectProviderUltimatum(
                DisconnectProviderUltimatum::mcs_body_decode(src, tpdu_user_data_size)?,
            )),
        }
    }

    fn mcs_size(&self) -> usize {
        match self {
            Self::ErectDomainRequest(msg) => msg.mcs_size(),
            Self::AttachUserRequest(msg) => msg.mcs_size(),
            Self::AttachUserConfirm(msg) => msg.mcs_size(),
            Self::ChannelJoinRequest(msg) => msg.mcs_size(),
            Self::ChannelJoinConfirm(msg) => msg.mcs_size(),
            Self::SendDataRequest(msg) => msg.mcs_size(),
            Self::SendDataIndication(msg) => msg.mcs_size(),
            Self::DisconnectProviderUltimatum(msg) => msg.mcs_size(),
        }
    }
}

impl_x224_pdu!(McsMessage<'_>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErectDomainPdu {
    pub sub_height: u32,
    pub sub_interval: u32,
}

impl<'de> McsPdu<'de> for ErectDomainPdu {
    const MCS_NAME: &'static str = "ErectDomainPdu";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::ErectDomainRequest, 0);

        per::write_u32(dst, self.sub_height);
        per::write_u32(dst, self.sub_interval);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        read_mcspdu_header(src, Self::MCS_NAME)?.check_expected(Self::MCS_NAME, DomainMcsPdu::ErectDomainRequest)?;

        let sub_height = per::read_u32(src).map_err(per_field_err!("subHeight"))?;
        let sub_interval = per::read_u32(src).map_err(per_field_err!("subInterval"))?;

        Ok(Self {
            sub_height,
            sub_interval,
        })
    }

    fn mcs_size(&self) -> usize {
        per::CHOICE_SIZE + per::sizeof_u32(self.sub_height) + per::sizeof_u32(self.sub_interval)
    }
}

impl_x224_pdu!(ErectDomainPdu);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachUserRequest;

impl<'de> McsPdu<'de> for AttachUserRequest {
    const MCS_NAME: &'static str = "AttachUserRequest";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::AttachUserRequest, 0);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        read_mcspdu_header(src, Self::MCS_NAME)?.check_expected(Self::MCS_NAME, DomainMcsPdu::AttachUserRequest)?;

        Ok(Self)
    }

    fn mcs_size(&self) -> usize {
        per::CHOICE_SIZE
    }
}

impl_x224_pdu!(AttachUserRequest);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachUserConfirm {
    pub result: u8,
    pub initiator_id: u16,
}

impl<'de> McsPdu<'de> for AttachUserConfirm {
    const MCS_NAME: &'static str = "AttachUserConfirm";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::AttachUserConfirm, 2);

        per::write_enum(dst, self.result);
        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID)
            .map_err(|_| invalid_field_err("AttachUserConfirm", "initiator", "invalid user id"))?;

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        read_mcspdu_header(src, Self::MCS_NAME)?.check_expected(Self::MCS_NAME, DomainMcsPdu::AttachUserConfirm)?;

        let result = per::read_enum(src, RESULT_ENUM_LENGTH).map_err(per_field_err!("result"))?;
        let user_id = per::read_u16(src, BASE_CHANNEL_ID).map_err(per_field_err!("userId"))?;

        Ok(Self {
            result,
            initiator_id: user_id,
        })
    }

    fn mcs_size(&self) -> usize {
        per::CHOICE_SIZE + per::ENUM_SIZE + per::U16_SIZE
    }
}

impl_x224_pdu!(AttachUserConfirm);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelJoinRequest {
    pub initiator_id: u16,
    pub channel_id: u16,
}

impl<'de> McsPdu<'de> for ChannelJoinRequest {
    const MCS_NAME: &'static str = "ChannelJoinRequest";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::ChannelJoinRequest, 0);

        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID)
            .map_err(|_| invalid_field_err("ChannelJoinRequest", "initiator", "invalid user id"))?;
        per::write_u16(dst, self.channel_id, 0)
            .map_err(|_| invalid_field_err("ChannelJoinRequest", "channelId", "invalid channel id"))?;

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        read_mcspdu_header(src, Self::MCS_NAME)?.check_expected(Self::MCS_NAME, DomainMcsPdu::ChannelJoinRequest)?;

        let initiator_id = per::read_u16(src, BASE_CHANNEL_ID).map_err(per_field_err!("initiator"))?;
        let channel_id = per::read_u16(src, 0).map_err(per_field_err!("channelId"))?;

        Ok(Self {
            initiator_id,
            channel_id,
        })
    }

    fn mcs_size(&self) -> usize {
        per::CHOICE_SIZE + per::U16_SIZE * 2
    }
}

impl_x224_pdu!(ChannelJoinRequest);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelJoinConfirm {
    pub result: u8,
    pub initiator_id: u16,
    pub requested_channel_id: u16,
    pub channel_id: u16,
}

impl<'de> McsPdu<'de> for ChannelJoinConfirm {
    const MCS_NAME: &'static str = "ChannelJoinConfirm";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::ChannelJoinConfirm, 2);

        per::write_enum(dst, self.result);
        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID)
            .map_err(|_| invalid_field_err("ChannelJoinConfirm", "initiator", "invalid user id"))?;
        per::write_u16(dst, self.requested_channel_id, 0)
            .map_err(|_| invalid_field_err("ChannelJoinConfirm", "requested", "invalid channel id"))?;
        per::write_u16(dst, self.channel_id, 0)
            .map_err(|_| invalid_field_err("ChannelJoinConfirm", "channelId", "invalid channel id"))?;

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        read_mcspdu_header(src, Self::MCS_NAME)?.check_expected(Self::MCS_NAME, DomainMcsPdu::ChannelJoinConfirm)?;

        let result = per::read_enum(src, RESULT_ENUM_LENGTH).map_err(per_field_err!("result"))?;
        let initiator_id = per::read_u16(src, BASE_CHANNEL_ID).map_err(per_field_err!("initiator"))?;
        let requested_channel_id = per::read_u16(src, 0).map_err(per_field_err!("requested"))?;
        let channel_id = per::read_u16(src, 0).map_err(per_field_err!("channelId"))?;

        Ok(Self {
            result,
            initiator_id,
            requested_channel_id,
            channel_id,
        })
    }

    fn mcs_size(&self) -> usize {
        per::CHOICE_SIZE + per::ENUM_SIZE + per::U16_SIZE * 3
    }
}

impl_x224_pdu!(ChannelJoinConfirm);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendDataRequest<'a> {
    pub initiator_id: u16,
    pub channel_id: u16,
    pub user_data: Cow<'a, [u8]>,
}

pub type OwnedSendDataRequest = SendDataRequest<'static>;

impl IntoOwned for SendDataRequest<'_> {
    type Owned = OwnedSendDataRequest;

    fn into_owned(self) -> Self::Owned {
        SendDataRequest {
            user_data: Cow::Owned(self.user_data.into_owned()),
            ..self
        }
    }
}

impl<'de> McsPdu<'de> for SendDataRequest<'de> {
    const MCS_NAME: &'static str = "SendDataRequest";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::SendDataRequest, 0);

        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID)
            .map_err(|_| invalid_field_err("SendDataRequest", "initiator", "invalid user id"))?;
        per::write_u16(dst, self.channel_id, 0)
            .map_err(|_| invalid_field_err("SendDataRequest", "channelId", "invalid channel id"))?;

        dst.write_u8(SEND_DATA_PDU_DATA_PRIORITY_AND_SEGMENTATION);

        per::write_length(dst, cast_length!("SendDataRequest", "userDataLength", self.user_data.len())?);
        dst.write_slice(&self.user_data);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self> {
        decode_send_data_body(src, tpdu_user_data_size, DomainMcsPdu::SendDataRequest, Self::MCS_NAME).map(
            |(initiator_id, channel_id, user_data)| Self {
                initiator_id,
                channel_id,
                user_data: Cow::Borrowed(user_data),
            },
        )
    }

    fn mcs_size(&self) -> usize {
        send_data_size(&self.user_data)
    }
}

impl_x224_pdu!(SendDataRequest<'_>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendDataIndication<'a> {
    pub initiator_id: u16,
    pub channel_id: u16,
    pub user_data: Cow<'a, [u8]>,
}

pub type OwnedSendDataIndication = SendDataIndication<'static>;

impl IntoOwned for SendDataIndication<'_> {
    type Owned = OwnedSendDataIndication;

    fn into_owned(self) -> Self::Owned {
        SendDataIndication {
            user_data: Cow::Owned(self.user_data.into_owned()),
            ..self
        }
    }
}

impl<'de> McsPdu<'de> for SendDataIndication<'de> {
    const MCS_NAME: &'static str = "SendDataIndication";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        write_mcspdu_header(dst, DomainMcsPdu::SendDataIndication, 0);

        per::write_u16(dst, self.initiator_id, BASE_CHANNEL_ID)
            .map_err(|_| invalid_field_err("SendDataIndication", "initiator", "invalid user id"))?;
        per::write_u16(dst, self.channel_id, 0)
            .map_err(|_| invalid_field_err("SendDataIndication", "channelId", "invalid channel id"))?;

        dst.write_u8(SEND_DATA_PDU_DATA_PRIORITY_AND_SEGMENTATION);

        per::write_length(
            dst,
            cast_length!("SendDataIndication", "userDataLength", self.user_data.len())?,
        );
        dst.write_slice(&self.user_data);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, tpdu_user_data_size: usize) -> DecodeResult<Self> {
        decode_send_data_body(src, tpdu_user_data_size, DomainMcsPdu::SendDataIndication, Self::MCS_NAME).map(
            |(initiator_id, channel_id, user_data)| Self {
                initiator_id,
                channel_id,
                user_data: Cow::Borrowed(user_data),
            },
        )
    }

    fn mcs_size(&self) -> usize {
        send_data_size(&self.user_data)
    }
}

impl_x224_pdu!(SendDataIndication<'_>);

fn send_data_size(user_data: &[u8]) -> usize {
    per::CHOICE_SIZE
        + per::U16_SIZE * 2
        + 1
        + per::sizeof_length(u16::try_from(user_data.len()).unwrap_or(u16::MAX))
        + user_data.len()
}

fn decode_send_data_body<'de>(
    src: &mut ReadCursor<'de>,
    tpdu_user_data_size: usize,
    expected: DomainMcsPdu,
    name: &'static str,
) -> DecodeResult<(u16, u16, &'de [u8])> {
    let src_len_before = src.len();

    read_mcspdu_header(src, name)?.check_expected(name, expected)?;

    let initiator_id = per::read_u16(src, BASE_CHANNEL_ID)
        .map_err(|e| invalid_field_err::<rdpeer_core::DecodeError>(name, "initiator", "PER").with_source(e))?;
    let channel_id = per::read_u16(src, 0)
        .map_err(|e| invalid_field_err::<rdpeer_core::DecodeError>(name, "channelId", "PER").with_source(e))?;

    // dataPriority + segmentation
    ensure_size!(ctx: name, in: src, size: 1);
    read_padding!(src, 1);

    let (length, _) = per::read_length(src)
        .map_err(|e| invalid_field_err::<rdpeer_core::DecodeError>(name, "userDataLength", "PER").with_source(e))?;
    let length = usize::from(length);

    let src_len_after = src.len();

    if length > tpdu_user_data_size.saturating_sub(src_len_before - src_len_after) {
        return Err(invalid_field_err(
            name,
            "userDataLength",
            "inconsistent with user data size advertised in TPDU",
        ));
    }

    ensure_size!(ctx: name, in: src, size: length);
    let user_data = src.read_slice(length);

    Ok((initiator_id, channel_id, user_data))
}

/// The reason of `DisconnectProviderUltimatum`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DisconnectReason {
    DomainDisconnected = 0,
    ProviderInitiated = 1,
    TokenPurged = 2,
    UserRequested = 3,
    ChannelPurged = 4,
}

impl DisconnectReason {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::DomainDisconnected),
            1 => Some(Self::ProviderInitiated),
            2 => Some(Self::TokenPurged),
            3 => Some(Self::UserRequested),
            4 => Some(Self::ChannelPurged),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::DomainDisconnected => "domain disconnected",
            Self::ProviderInitiated => "server-initiated disconnect",
            Self::TokenPurged => "token purged",
            Self::UserRequested => "user-requested disconnect",
            Self::ChannelPurged => "channel purged",
        }
    }
}

impl core::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisconnectProviderUltimatum {
    pub reason: DisconnectReason,
}

impl DisconnectProviderUltimatum {
    pub fn from_reason(reason: DisconnectReason) -> Self {
        Self { reason }
    }
}

impl<'de> McsPdu<'de> for DisconnectProviderUltimatum {
    const MCS_NAME: &'static str = "DisconnectProviderUltimatum";

    fn mcs_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        let domain_mcspdu = DomainMcsPdu::DisconnectProviderUltimatum.as_u8();
        let reason = self.reason.as_u8();

        // The reason straddles the choice byte: two of its three bits live in
        // the low bits of the first byte, the last one in the MSB of the second.
        let b1 = (domain_mcspdu << 2) | ((reason >> 1) & 0x03);
        let b2 = reason << 7;

        dst.write_array([b1, b2]);

        Ok(())
    }

    fn mcs_body_decode(src: &mut ReadCursor<'de>, _: usize) -> DecodeResult<Self> {
        const NAME: &str = "DisconnectProviderUltimatum";

        ensure_size!(ctx: NAME, in: src, size: 2);

        let [b1, b2] = src.read_array();

        let domain_mcspdu_choice = b1 >> 2;
        let reason = ((b1 & 0x03) << 1) | (b2 >> 7);

        DomainMcsPdu::from_u8(domain_mcspdu_choice)
            .ok_or_else(|| invalid_field_err(NAME, "domain-mcspdu", "unexpected application tag for CHOICE"))?
            .check_expected(NAME, DomainMcsPdu::DisconnectProviderUltimatum)?;

        Ok(Self {
            reason: DisconnectReason::from_u8(reason)
                .ok_or_else(|| invalid_field_err(NAME, "reason", "unknown variant"))?,
        })
    }

    fn mcs_size(&self) -> usize {
        2
    }
}

impl_x224_pdu!(DisconnectProviderUltimatum);

const MCS_TYPE_CONNECT_INITIAL: u8 = 0x65;
const MCS_TYPE_CONNECT_RESPONSE: u8 = 0x66;

/// MCS Connect-Initial, carried as the user data of an X.224 data TPDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectInitial {
    pub gcc_blocks: ClientGccBlocks,
    pub calling_domain_selector: Vec<u8>,
    pub called_domain_selector: Vec<u8>,
    pub upward_flag: bool,
    pub target_parameters: DomainParameters,
    pub min_parameters: DomainParameters,
    pub max_parameters: DomainParameters,
}

impl ConnectInitial {
    const NAME: &'static str = "ConnectInitial";

    pub fn with_gcc_blocks(gcc_blocks: ClientGccBlocks) -> Self {
        Self {
            gcc_blocks,
            calling_domain_selector: vec![0x01],
            called_domain_selector: vec![0x01],
            upward_flag: true,
            target_parameters: DomainParameters::target(),
            min_parameters: DomainParameters::min(),
            max_parameters: DomainParameters::max(),
        }
    }

    fn fields_buffer_ber_length(&self) -> usize {
        ber::sizeof_octet_string(u16::try_from(self.calling_domain_selector.len()).unwrap_or(u16::MAX))
            + ber::sizeof_octet_string(u16::try_from(self.called_domain_selector.len()).unwrap_or(u16::MAX))
            + ber::SIZEOF_BOOL
            + (self.target_parameters.size() + self.min_parameters.size() + self.max_parameters.size())
            + ber::sizeof_octet_string(u16::try_from(conference_create_request_size(&self.gcc_blocks)).unwrap_or(u16::MAX))
    }
}

impl Encode for ConnectInitial {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_application_tag(
            dst,
            MCS_TYPE_CONNECT_INITIAL,
            cast_length!("berLen", self.fields_buffer_ber_length())?,
        )?;
        ber::write_octet_string(dst, self.calling_domain_selector.as_ref())?;
        ber::write_octet_string(dst, self.called_domain_selector.as_ref())?;
        ber::write_bool(dst, self.upward_flag)?;
        self.target_parameters.encode(dst)?;
        self.min_parameters.encode(dst)?;
        self.max_parameters.encode(dst)?;
        ber::write_octet_string_tag(dst, cast_length!("len", conference_create_request_size(&self.gcc_blocks))?)?;
        encode_conference_create_request(&self.gcc_blocks, dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let fields_buffer_ber_length = self.fields_buffer_ber_length();

        fields_buffer_ber_length
            + ber::sizeof_application_tag(
                MCS_TYPE_CONNECT_INITIAL,
                u16::try_from(fields_buffer_ber_length).unwrap_or(u16::MAX),
            )
    }
}

impl<'de> Decode<'de> for ConnectInitial {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_application_tag(src, MCS_TYPE_CONNECT_INITIAL)?;
        let calling_domain_selector = ber::read_octet_string(src)?;
        let called_domain_selector = ber::read_octet_string(src)?;
        let upward_flag = ber::read_bool(src)?;
        let target_parameters = DomainParameters::decode(src)?;
        let min_parameters = DomainParameters::decode(src)?;
        let max_parameters = DomainParameters::decode(src)?;
        let _user_data_buffer_length = ber::read_octet_string_tag(src)?;
        let gcc_blocks = decode_conference_create_request(src)?;

        Ok(Self {
            gcc_blocks,
            calling_domain_selector,
            called_domain_selector,
            upward_flag,
            target_parameters,
            min_parameters,
            max_parameters,
        })
    }
}

/// MCS Connect-Response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectResponse {
    pub user_id: u16,
    pub gcc_blocks: ServerGccBlocks,
    pub called_connect_id: u32,
    pub domain_parameters: DomainParameters,
}

impl ConnectResponse {
    const NAME: &'static str = "ConnectResponse";

    fn fields_buffer_ber_length(&self) -> usize {
        ber::SIZEOF_ENUMERATED
            + ber::sizeof_integer(self.called_connect_id)
            + self.domain_parameters.size()
            + ber::sizeof_octet_string(
                u16::try_from(conference_create_response_size(&self.gcc_blocks)).unwrap_or(u16::MAX),
            )
    }
}

impl Encode for ConnectResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_application_tag(
            dst,
            MCS_TYPE_CONNECT_RESPONSE,
            cast_length!("berLen", self.fields_buffer_ber_length())?,
        )?;
        ber::write_enumerated(dst, 0)?;
        ber::write_integer(dst, self.called_connect_id)?;
        self.domain_parameters.encode(dst)?;
        ber::write_octet_string_tag(
            dst,
            cast_length!("len", conference_create_response_size(&self.gcc_blocks))?,
        )?;
        encode_conference_create_response(self.user_id, &self.gcc_blocks, dst)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let fields_buffer_ber_length = self.fields_buffer_ber_length();

        fields_buffer_ber_length
            + ber::sizeof_application_tag(
                MCS_TYPE_CONNECT_RESPONSE,
                u16::try_from(fields_buffer_ber_length).unwrap_or(u16::MAX),
            )
    }
}

impl<'de> Decode<'de> for ConnectResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_application_tag(src, MCS_TYPE_CONNECT_RESPONSE)?;
        ber::read_enumerated(src, RESULT_ENUM_LENGTH)?;
        let called_connect_id = ber::read_integer(src)?;
        let domain_parameters = DomainParameters::decode(src)?;
        let _user_data_buffer_length = ber::read_octet_string_tag(src)?;
        let (user_id, gcc_blocks) = decode_conference_create_response(src)?;

        Ok(Self {
            user_id,
            gcc_blocks,
            called_connect_id,
            domain_parameters,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainParameters {
    pub max_channel_ids: u32,
    pub max_user_ids: u32,
    pub max_token_ids: u32,
    pub num_priorities: u32,
    pub min_throughput: u32,
    pub max_height: u32,
    pub max_mcs_pdu_size: u32,
    pub protocol_version: u32,
}

impl DomainParameters {
    const NAME: &'static str = "DomainParameters";

    pub fn min() -> Self {
        Self {
            max_channel_ids: 1,
            max_user_ids: 1,
            max_token_ids: 1,
            num_priorities: 1,
            min_throughput: 0,
            max_height: 1,
            max_mcs_pdu_size: 1056,
            protocol_version: 2,
        }
    }

    pub fn target() -> Self {
        Self {
            max_channel_ids: 34,
            max_user_ids: 2,
            max_token_ids: 0,
            num_priorities: 1,
            min_throughput: 0,
            max_height: 1,
            max_mcs_pdu_size: 65535,
            protocol_version: 2,
        }
    }

    pub fn max() -> Self {
        Self {
            max_channel_ids: 65535,
            max_user_ids: 64535,
            max_token_ids: 65535,
            num_priorities: 1,
            min_throughput: 0,
            max_height: 1,
            max_mcs_pdu_size: 65535,
            protocol_version: 2,
        }
    }

    fn fields_buffer_ber_length(&self) -> usize {
        ber::sizeof_integer(self.max_channel_ids)
            + ber::sizeof_integer(self.max_user_ids)
            + ber::sizeof_integer(self.max_token_ids)
            + ber::sizeof_integer(self.num_priorities)
            + ber::sizeof_integer(self.min_throughput)
            + ber::sizeof_integer(self.max_height)
            + ber::sizeof_integer(self.max_mcs_pdu_size)
            + ber::sizeof_integer(self.protocol_version)
    }
}

impl Encode for DomainParameters {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        ber::write_sequence_tag(dst, cast_length!("seqTagLen", self.fields_buffer_ber_length())?)?;
        ber::write_integer(dst, self.max_channel_ids)?;
        ber::write_integer(dst, self.max_user_ids)?;
        ber::write_integer(dst, self.max_token_ids)?;
        ber::write_integer(dst, self.num_priorities)?;
        ber::write_integer(dst, self.min_throughput)?;
        ber::write_integer(dst, self.max_height)?;
        ber::write_integer(dst, self.max_mcs_pdu_size)?;
        ber::write_integer(dst, self.protocol_version)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let fields_buffer_ber_length = self.fields_buffer_ber_length();

        fields_buffer_ber_length
            + ber::sizeof_sequence_tag(u16::try_from(fields_buffer_ber_length).unwrap_or(u16::MAX))
    }
}

impl<'de> Decode<'de> for DomainParameters {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ber::read_sequence_tag(src)?;

        Ok(Self {
            max_channel_ids: ber::read_integer(src)?,
            max_user_ids: ber::read_integer(src)?,
            max_token_ids: ber::read_integer(src)?,
            num_priorities: ber::read_integer(src)?,
            min_throughput: ber::read_integer(src)?,
            max_height: ber::read_integer(src)?,
            max_mcs_pdu_size: ber::read_integer(src)?,
            protocol_version: ber::read_integer(src)?,
        })
    }
}

// T.124 ConferenceCreate envelope around the GCC blocks.

const CONFERENCE_REQUEST_OBJECT_ID: [u8; 6] = [0, 0, 20, 124, 0, 1];
const CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD: &[u8; 4] = b"Duca";
const CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD: &[u8; 4] = b"McDn";
const CONFERENCE_REQUEST_U16_MIN: u16 = 1001;

const CONFERENCE_REQUEST_CONNECT_PDU_SIZE: usize = 12;
const CONFERENCE_RESPONSE_CONNECT_PDU_SIZE: usize = 13;
const OBJECT_IDENTIFIER_KEY: u8 = 0;
const CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE: u8 = 0;
const CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE: u8 = 0x14;
const CONFERENCE_REQUEST_USER_DATA_SELECTION: u8 = 8;
const USER_DATA_NUMBER_OF_SETS: u8 = 1;
const USER_DATA_H221_NON_STANDARD_CHOICE: u8 = 0xc0;
const CONFERENCE_RESPONSE_TAG: u32 = 1;
const CONFERENCE_RESPONSE_RESULT: u8 = 0;
const H221_NON_STANDARD_MIN_LENGTH: usize = 4;
const CONFERENCE_NAME: &[u8] = b"1";

const CCR_CTX: &str = "ConferenceCreateRequest";
const CCRSP_CTX: &str = "ConferenceCreateResponse";

macro_rules! per_err {
    ($ctx:expr, $field:expr) => {
        |e| invalid_field_err::<rdpeer_core::DecodeError>($ctx, $field, "PER").with_source(e)
    };
}

macro_rules! per_encode_err {
    ($ctx:expr, $field:expr) => {
        |e| invalid_field_err::<rdpeer_core::EncodeError>($ctx, $field, "PER").with_source(e)
    };
}

fn conference_create_request_size(gcc_blocks: &ClientGccBlocks) -> usize {
    let gcc_blocks_buffer_length = gcc_blocks.size();

    per::CHOICE_SIZE
        + CONFERENCE_REQUEST_OBJECT_ID.len()
        + per::sizeof_length(u16::try_from(CONFERENCE_REQUEST_CONNECT_PDU_SIZE + gcc_blocks_buffer_length).unwrap_or(u16::MAX))
        + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
        + per::sizeof_length(u16::try_from(gcc_blocks_buffer_length).unwrap_or(u16::MAX))
        + gcc_blocks_buffer_length
}

fn encode_conference_create_request(gcc_blocks: &ClientGccBlocks, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
    let gcc_blocks_buffer_length = gcc_blocks.size();

    // ConnectData::Key: select type OBJECT_IDENTIFIER
    per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
    per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

    // ConnectData::connectPDU: length
    per::write_length(
        dst,
        cast_length!(
            CCR_CTX,
            "gccBlocksLen",
            gcc_blocks_buffer_length + CONFERENCE_REQUEST_CONNECT_PDU_SIZE
        )?,
    );
    // ConnectGCCPDU (CHOICE): select conferenceCreateRequest
    per::write_choice(dst, CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE);
    // select optional userData from ConferenceCreateRequest
    per::write_choice(dst, CONFERENCE_REQUEST_USER_DATA_SELECTION);
    // ConferenceCreateRequest::ConferenceName
    per::write_numeric_string(dst, CONFERENCE_NAME, 1).map_err(per_encode_err!(CCR_CTX, "confName"))?;
    per::write_choice(dst, 0); // padding
    // one set of UserData
    per::write_choice(dst, USER_DATA_NUMBER_OF_SETS);
    // select h221NonStandard
    per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
    // h221NonStandard: client-to-server H.221 key, "Duca"
    per::write_octet_string(
        dst,
        CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD,
        H221_NON_STANDARD_MIN_LENGTH,
    )
    .map_err(per_encode_err!(CCR_CTX, "client-to-server"))?;
    // H221NonStandardIdentifier (octet string)
    per::write_length(dst, cast_length!(CCR_CTX, "gccBlocksLen", gcc_blocks_buffer_length)?);
    gcc_blocks.encode(dst)?;

    Ok(())
}

fn decode_conference_create_request(src: &mut ReadCursor<'_>) -> DecodeResult<ClientGccBlocks> {
    // ConnectData::Key: select object (0) of type OBJECT_IDENTIFIER
    if per::read_choice(src).map_err(per_err!(CCR_CTX, "key"))? != OBJECT_IDENTIFIER_KEY {
        return Err(invalid_field_err(CCR_CTX, "key", "got unexpected ConnectData key"));
    }
    if per::read_object_id(src).map_err(per_err!(CCR_CTX, "value"))? != CONFERENCE_REQUEST_OBJECT_ID {
        return Err(invalid_field_err(CCR_CTX, "value", "got unexpected ConnectData key value"));
    }

    // ConnectData::connectPDU: length
    let _length = per::read_length(src).map_err(per_err!(CCR_CTX, "len"))?;
    // ConnectGCCPDU (CHOICE)
    if per::read_choice(src).map_err(per_err!(CCR_CTX, "choice"))? != CONNECT_GCC_PDU_CONFERENCE_REQUEST_CHOICE {
        return Err(invalid_field_err(
            CCR_CTX,
            "choice",
            "got invalid ConnectGCCPDU choice (expected ConferenceCreateRequest)",
        ));
    }
    // select optional userData
    if per::read_choice(src).map_err(per_err!(CCR_CTX, "selection"))? != CONFERENCE_REQUEST_USER_DATA_SELECTION {
        return Err(invalid_field_err(
            CCR_CTX,
            "selection",
            "got invalid ConferenceCreateRequest selection (expected UserData)",
        ));
    }
    // ConferenceCreateRequest::ConferenceName
    per::read_numeric_string(src, 1).map_err(per_err!(CCR_CTX, "confName"))?;
    let _padding = per::read_choice(src).map_err(per_err!(CCR_CTX, "padding"))?;

    // UserData (SET OF SEQUENCE), one set
    if per::read_choice(src).map_err(per_err!(CCR_CTX, "numberOfSets"))? != USER_DATA_NUMBER_OF_SETS {
        return Err(invalid_field_err(
            CCR_CTX,
            "numberOfSets",
            "got invalid ConferenceCreateRequest number of sets (expected 1)",
        ));
    }
    if per::read_choice(src).map_err(per_err!(CCR_CTX, "userDataChoice"))? != USER_DATA_H221_NON_STANDARD_CHOICE {
        return Err(invalid_field_err(
            CCR_CTX,
            "userDataChoice",
            "expected UserData H221NonStandard choice",
        ));
    }
    // h221NonStandard: client-to-server H.221 key, "Duca"
    if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(per_err!(CCR_CTX, "client-to-server"))?
        != CONFERENCE_REQUEST_CLIENT_TO_SERVER_H221_NON_STANDARD
    {
        return Err(invalid_field_err(
            CCR_CTX,
            "client-to-server",
            "got invalid H221NonStandard client-to-server key",
        ));
    }
    // H221NonStandardIdentifier (octet string)
    let (_gcc_blocks_buffer_length, _) = per::read_length(src).map_err(per_err!(CCR_CTX, "len"))?;

    ClientGccBlocks::decode(src)
}

fn conference_create_response_size(gcc_blocks: &ServerGccBlocks) -> usize {
    let gcc_blocks_buffer_length = gcc_blocks.size();

    per::CHOICE_SIZE
        + CONFERENCE_REQUEST_OBJECT_ID.len()
        + per::sizeof_length(
            u16::try_from(CONFERENCE_RESPONSE_CONNECT_PDU_SIZE + gcc_blocks_buffer_length).unwrap_or(u16::MAX),
        )
        + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE
        + per::sizeof_length(u16::try_from(gcc_blocks_buffer_length).unwrap_or(u16::MAX))
        + gcc_blocks_buffer_length
}

fn encode_conference_create_response(
    user_id: u16,
    gcc_blocks: &ServerGccBlocks,
    dst: &mut WriteCursor<'_>,
) -> EncodeResult<()> {
    let gcc_blocks_buffer_length = gcc_blocks.size();

    // ConnectData::Key: select type OBJECT_IDENTIFIER
    per::write_choice(dst, OBJECT_IDENTIFIER_KEY);
    per::write_object_id(dst, CONFERENCE_REQUEST_OBJECT_ID);

    // ConnectData::connectPDU: length (MUST be ignored by the client)
    per::write_length(
        dst,
        cast_length!(
            CCRSP_CTX,
            "gccBlocksLen",
            gcc_blocks_buffer_length + CONFERENCE_RESPONSE_CONNECT_PDU_SIZE
        )?,
    );
    // ConnectGCCPDU (CHOICE): select conferenceCreateResponse
    per::write_choice(dst, CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE);
    // ConferenceCreateResponse::nodeID (UserID)
    per::write_u16(dst, user_id, CONFERENCE_REQUEST_U16_MIN).map_err(per_encode_err!(CCRSP_CTX, "userId"))?;
    // ConferenceCreateResponse::tag (INTEGER)
    per::write_u32(dst, CONFERENCE_RESPONSE_TAG);
    // ConferenceCreateResponse::result (ENUMERATED)
    per::write_enum(dst, CONFERENCE_RESPONSE_RESULT);
    per::write_choice(dst, USER_DATA_NUMBER_OF_SETS);
    // select h221NonStandard
    per::write_choice(dst, USER_DATA_H221_NON_STANDARD_CHOICE);
    // h221NonStandard, server-to-client H.221 key, "McDn"
    per::write_octet_string(
        dst,
        CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD,
        H221_NON_STANDARD_MIN_LENGTH,
    )
    .map_err(per_encode_err!(CCRSP_CTX, "server-to-client"))?;
    // H221NonStandardIdentifier (octet string)
    per::write_length(dst, cast_length!(CCRSP_CTX, "gccBlocksLen", gcc_blocks_buffer_length)?);
    gcc_blocks.encode(dst)?;

    Ok(())
}

fn decode_conference_create_response(src: &mut ReadCursor<'_>) -> DecodeResult<(u16, ServerGccBlocks)> {
    if per::read_choice(src).map_err(per_err!(CCRSP_CTX, "key"))? != OBJECT_IDENTIFIER_KEY {
        return Err(invalid_field_err(CCRSP_CTX, "key", "got unexpected ConnectData key"));
    }
    if per::read_object_id(src).map_err(per_err!(CCRSP_CTX, "value"))? != CONFERENCE_REQUEST_OBJECT_ID {
        return Err(invalid_field_err(
            CCRSP_CTX,
            "value",
            "got unexpected ConnectData key value",
        ));
    }
    let _length = per::read_length(src).map_err(per_err!(CCRSP_CTX, "len"))?;
    if per::read_choice(src).map_err(per_err!(CCRSP_CTX, "choice"))? != CONNECT_GCC_PDU_CONFERENCE_RESPONSE_CHOICE {
        return Err(invalid_field_err(
            CCRSP_CTX,
            "choice",
            "got invalid ConnectGCCPDU choice (expected ConferenceCreateResponse)",
        ));
    }
    let user_id = per::read_u16(src, CONFERENCE_REQUEST_U16_MIN).map_err(per_err!(CCRSP_CTX, "userId"))?;
    if per::read_u32(src).map_err(per_err!(CCRSP_CTX, "tag"))? != CONFERENCE_RESPONSE_TAG {
        return Err(invalid_field_err(CCRSP_CTX, "tag", "got unexpected tag"));
    }
    if per::read_enum(src, RESULT_ENUM_LENGTH).map_err(per_err!(CCRSP_CTX, "result"))? != CONFERENCE_RESPONSE_RESULT {
        return Err(invalid_field_err(CCRSP_CTX, "result", "got invalid result"));
    }
    if per::read_choice(src).map_err(per_err!(CCRSP_CTX, "numberOfSets"))? != USER_DATA_NUMBER_OF_SETS {
        return Err(invalid_field_err(CCRSP_CTX, "numberOfSets", "expected one set"));
    }
    if per::read_choice(src).map_err(per_err!(CCRSP_CTX, "userDataChoice"))? != USER_DATA_H221_NON_STANDARD_CHOICE {
        return Err(invalid_field_err(
            CCRSP_CTX,
            "userDataChoice",
            "expected UserData H221NonStandard choice",
        ));
    }
    if per::read_octet_string(src, H221_NON_STANDARD_MIN_LENGTH).map_err(per_err!(CCRSP_CTX, "server-to-client"))?
        != CONFERENCE_REQUEST_SERVER_TO_CLIENT_H221_NON_STANDARD
    {
        return Err(invalid_field_err(
            CCRSP_CTX,
            "server-to-client",
            "got invalid H221NonStandard server-to-client key",
        ));
    }
    let (_gcc_blocks_buffer_length, _) = per::read_length(src).map_err(per_err!(CCRSP_CTX, "len"))?;

    let gcc_blocks = ServerGccBlocks::decode(src)?;

    Ok((user_id, gcc_blocks))
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn erect_domain_round_trip() {
        let pdu = ErectDomainPdu {
            sub_height: 0,
            sub_interval: 0,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: ErectDomainPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn channel_join_round_trip() {
        let pdu = ChannelJoinRequest {
            initiator_id: 1002,
            channel_id: 1004,
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: ChannelJoinRequest = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn disconnect_provider_ultimatum_wire() {
        // PER-encoded disconnectProviderUltimatum, reason rn-user-requested
        let pdu = DisconnectProviderUltimatum::from_reason(DisconnectReason::UserRequested);
        let encoded = encode_vec(&pdu).unwrap();
        // 11 bytes: TPKT (4) + data TPDU (3) + body (2), body is 21 80
        assert_eq!(&encoded[encoded.len() - 2..], &[0x21, 0x80]);

        let decoded: DisconnectProviderUltimatum = decode(&encoded).unwrap();
        assert_eq!(decoded.reason, DisconnectReason::UserRequested);
    }

    #[test]
    fn send_data_request_round_trip() {
        let pdu = SendDataRequest {
            initiator_id: 1002,
            channel_id: GLOBAL_CHANNEL_ID,
            user_data: std::borrow::Cow::Owned(vec![1, 2, 3, 4, 5]),
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: SendDataRequest<'_> = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn send_data_length_consistency_is_checked() {
        let pdu = SendDataRequest {
            initiator_id: 1002,
            channel_id: GLOBAL_CHANNEL_ID,
            user_data: std::borrow::Cow::Owned(vec![0; 16]),
        };

        let mut encoded = encode_vec(&pdu).unwrap();
        // shrink the TPKT length so the advertised user data no longer fits
        encoded[3] = 12;
        encoded.truncate(12);

        assert!(decode::<SendDataRequest<'_>>(&encoded).is_err());
    }
}
