use std::borrow::Cow;

use rdpeer_core::{encode_buf, encode_vec, Encode, WriteBuf};
use rdpeer_pdu::rdp;

use crate::{AcceptorError, AcceptorErrorExt as _, SequenceResult};

/// Encodes `user_msg` wrapped in an MCS send-data-indication.
pub(crate) fn encode_send_data_indication<T>(
    initiator_id: u16,
    channel_id: u16,
    user_msg: &T,
    buf: &mut WriteBuf,
) -> SequenceResult<usize>
where
    T: Encode,
{
    let user_data = encode_vec(user_msg).map_err(AcceptorError::encode)?;

    let pdu = rdpeer_pdu::mcs::SendDataIndication {
        initiator_id,
        channel_id,
        user_data: Cow::Owned(user_data),
    };

    let written = encode_buf(&pdu, buf).map_err(AcceptorError::encode)?;

    Ok(written)
}

/// Encodes a BER/GCC message as the payload of an X.224 data TPDU.
pub(crate) fn encode_x224_packet<T>(x224_msg: &T, buf: &mut WriteBuf) -> SequenceResult<usize>
where
    T: Encode,
{
    let x224_msg_buf = encode_vec(x224_msg).map_err(AcceptorError::encode)?;

    let pdu = rdpeer_pdu::x224::X224Data {
        data: Cow::Owned(x224_msg_buf),
    };

    let written = encode_buf(&pdu, buf).map_err(AcceptorError::encode)?;

    Ok(written)
}

/// Wraps a share-data PDU into the share-control envelope the server sends.
pub(crate) fn wrap_share_data(
    pdu: rdp::headers::ShareDataPdu,
    io_channel_id: u16,
    share_id: u32,
) -> rdp::headers::ShareControlHeader {
    rdp::headers::ShareControlHeader {
        share_id,
        pdu_source: io_channel_id,
        share_control_pdu: rdp::headers::ShareControlPdu::Data(rdp::headers::ShareDataHeader {
            share_data_pdu: pdu,
            stream_priority: rdp::headers::StreamPriority::Undefined,
            compression_flags: rdp::headers::CompressionFlags::empty(),
            compression_type: 0,
        }),
    }
}
