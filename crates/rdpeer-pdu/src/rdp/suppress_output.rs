use rdpeer_core::{
    ensure_fixed_part_size, invalid_field_err, read_padding, write_padding, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

use crate::rdp::refresh_rectangle::InclusiveRectangle;

/// TS_SUPPRESS_OUTPUT_PDU: the client turns display updates off or back on.
///
/// When updates are re-enabled, the desktop rectangle to repaint is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressOutputPdu {
    Suppress,
    Allow(InclusiveRectangle),
}

impl SuppressOutputPdu {
    const NAME: &'static str = "SuppressOutputPdu";

    const FIXED_PART_SIZE: usize = 1 /* allowDisplayUpdates */ + 3 /* pad3Octets */;
}

impl Encode for SuppressOutputPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        match self {
            Self::Suppress => {
                dst.write_u8(0);
                write_padding!(dst, 3);
            }
            Self::Allow(rectangle) => {
                dst.write_u8(1);
                write_padding!(dst, 3);
                rectangle.encode(dst)?;
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        match self {
            Self::Suppress => Self::FIXED_PART_SIZE,
            Self::Allow(rectangle) => Self::FIXED_PART_SIZE + rectangle.size(),
        }
    }
}

impl<'de> Decode<'de> for SuppressOutputPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let allow_display_updates = src.read_u8();
        read_padding!(src, 3);

        match allow_display_updates {
            0 => Ok(Self::Suppress),
            1 => Ok(Self::Allow(InclusiveRectangle::decode(src)?)),
            _ => Err(invalid_field_err!("allowDisplayUpdates", "invalid value")),
        }
    }
}
