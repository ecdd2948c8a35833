use std::borrow::Cow;

use rdpeer_core::{
    cast_length, ensure_size, invalid_field_err, DecodeResult, EncodeResult, IntoOwned, ReadCursor, WriteCursor,
};

use crate::tpdu::{TpduCode, TpduHeader};
use crate::tpkt::TpktHeader;

/// A message carried inside a TPKT + X.224 class-0 envelope.
///
/// Implementors get [`rdpeer_core::Encode`] and [`rdpeer_core::Decode`]
/// through [`impl_x224_pdu!`], with the outer framing handled here.
pub trait X224Pdu<'de>: Sized {
    const X224_NAME: &'static str;

    const TPDU_CODE: TpduCode;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()>;

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self>;

    fn tpdu_header_variable_part_size(&self) -> usize;

    fn tpdu_user_data_size(&self) -> usize;
}

pub(crate) fn x224_encode<'de, T>(pdu: &T, dst: &mut WriteCursor<'_>) -> EncodeResult<()>
where
    T: X224Pdu<'de>,
{
    let packet_length = x224_size(pdu);

    ensure_size!(ctx: T::X224_NAME, in: dst, size: packet_length);

    TpktHeader {
        packet_length: cast_length!(T::X224_NAME, "packetLength", packet_length)?,
    }
    .write(dst)?;

    TpduHeader {
        li: cast_length!(
            T::X224_NAME,
            "li",
            T::TPDU_CODE.header_fixed_part_size() + pdu.tpdu_header_variable_part_size() - 1
        )?,
        code: T::TPDU_CODE,
    }
    .write(dst)?;

    pdu.x224_body_encode(dst)
}

pub(crate) fn x224_size<'de, T>(pdu: &T) -> usize
where
    T: X224Pdu<'de>,
{
    TpktHeader::SIZE
        + T::TPDU_CODE.header_fixed_part_size()
        + pdu.tpdu_header_variable_part_size()
        + pdu.tpdu_user_data_size()
}

pub(crate) fn x224_decode<'de, T>(src: &mut ReadCursor<'de>) -> DecodeResult<T>
where
    T: X224Pdu<'de>,
{
    let tpkt = TpktHeader::read(src)?;

    ensure_size!(ctx: T::X224_NAME, in: src, size: tpkt.packet_length().saturating_sub(TpktHeader::SIZE));

    let tpdu = TpduHeader::read(src, &tpkt)?;
    tpdu.code.check_expected(T::TPDU_CODE)?;

    if tpdu.size() < tpdu.fixed_part_size() {
        return Err(invalid_field_err(
            TpduHeader::NAME,
            "li",
            "fixed part bigger than total header size",
        ));
    }

    T::x224_body_decode(src, &tpkt, &tpdu)
}

/// Derives [`rdpeer_core::Encode`] and [`rdpeer_core::Decode`] for a type
/// implementing [`X224Pdu`]. The second form is for borrowing PDUs.
macro_rules! impl_x224_pdu {
    ($pdu_ty:ident) => {
        impl rdpeer_core::Encode for $pdu_ty {
            fn encode(&self, dst: &mut rdpeer_core::WriteCursor<'_>) -> rdpeer_core::EncodeResult<()> {
                $crate::x224::x224_encode(self, dst)
            }

            fn name(&self) -> &'static str {
                <Self as $crate::x224::X224Pdu<'_>>::X224_NAME
            }

            fn size(&self) -> usize {
                $crate::x224::x224_size(self)
            }
        }

        impl<'de> rdpeer_core::Decode<'de> for $pdu_ty {
            fn decode(src: &mut rdpeer_core::ReadCursor<'de>) -> rdpeer_core::DecodeResult<Self> {
                $crate::x224::x224_decode(src)
            }
        }
    };
    ($pdu_ty:ident <'_>) => {
        impl rdpeer_core::Encode for $pdu_ty<'_> {
            fn encode(&self, dst: &mut rdpeer_core::WriteCursor<'_>) -> rdpeer_core::EncodeResult<()> {
                $crate::x224::x224_encode(self, dst)
            }

            fn name(&self) -> &'static str {
                <Self as $crate::x224::X224Pdu<'_>>::X224_NAME
            }

            fn size(&self) -> usize {
                $crate::x224::x224_size(self)
            }
        }

        impl<'de> rdpeer_core::Decode<'de> for $pdu_ty<'de> {
            fn decode(src: &mut rdpeer_core::ReadCursor<'de>) -> rdpeer_core::DecodeResult<Self> {
                $crate::x224::x224_decode(src)
            }
        }
    };
}

pub(crate) use impl_x224_pdu;

/// An X.224 data TPDU whose payload is kept as raw bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct X224Data<'a> {
    pub data: Cow<'a, [u8]>,
}

pub type OwnedX224Data = X224Data<'static>;

impl IntoOwned for X224Data<'_> {
    type Owned = OwnedX224Data;

    fn into_owned(self) -> Self::Owned {
        X224Data {
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

impl<'de> X224Pdu<'de> for X224Data<'de> {
    const X224_NAME: &'static str = "X.224 Data";

    const TPDU_CODE: TpduCode = TpduCode::DATA;

    fn x224_body_encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(ctx: Self::X224_NAME, in: dst, size: self.data.len());
        dst.write_slice(&self.data);

        Ok(())
    }

    fn x224_body_decode(src: &mut ReadCursor<'de>, tpkt: &TpktHeader, tpdu: &TpduHeader) -> DecodeResult<Self> {
        let user_data_size = user_data_size(tpkt, tpdu);

        ensure_size!(ctx: Self::X224_NAME, in: src, size: user_data_size);
        let data = src.read_slice(user_data_size);

        Ok(Self {
            data: Cow::Borrowed(data),
        })
    }

    fn tpdu_header_variable_part_size(&self) -> usize {
        0
    }

    fn tpdu_user_data_size(&self) -> usize {
        self.data.len()
    }
}

impl_x224_pdu!(X224Data<'_>);

pub fn user_data_size(tpkt: &TpktHeader, tpdu: &TpduHeader) -> usize {
    tpkt.packet_length() - TpktHeader::SIZE - tpdu.size()
}
