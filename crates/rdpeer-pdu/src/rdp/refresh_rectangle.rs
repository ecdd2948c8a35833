use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, read_padding, write_padding, Decode, DecodeResult, Encode,
    EncodeResult, ReadCursor, WriteCursor,
};

const RECTANGLE_SIZE: usize = 8;

/// TS_RECTANGLE16, inclusive coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InclusiveRectangle {
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl InclusiveRectangle {
    const NAME: &'static str = "InclusiveRectangle";

    const FIXED_PART_SIZE: usize = RECTANGLE_SIZE;
}

impl Encode for InclusiveRectangle {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.left);
        dst.write_u16(self.top);
        dst.write_u16(self.right);
        dst.write_u16(self.bottom);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for InclusiveRectangle {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self {
            left: src.read_u16(),
            top: src.read_u16(),
            right: src.read_u16(),
            bottom: src.read_u16(),
        })
    }
}

/// TS_REFRESH_RECT_PDU: the client asks the server to repaint some areas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRectanglePdu {
    pub areas: Vec<InclusiveRectangle>,
}

impl RefreshRectanglePdu {
    const NAME: &'static str = "RefreshRectanglePdu";

    const FIXED_PART_SIZE: usize = 1 /* numberOfAreas */ + 3 /* pad3Octets */;
}

impl Encode for RefreshRectanglePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u8(cast_length!("numberOfAreas", self.areas.len())?);
        write_padding!(dst, 3);

        for area in &self.areas {
            area.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.areas.len() * RECTANGLE_SIZE
    }
}

impl<'de> Decode<'de> for RefreshRectanglePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let number_of_areas = usize::from(src.read_u8());
        read_padding!(src, 3);

        ensure_size!(in: src, size: number_of_areas * RECTANGLE_SIZE);
        let mut areas = Vec::with_capacity(number_of_areas);
        for _ in 0..number_of_areas {
            areas.push(InclusiveRectangle::decode(src)?);
        }

        Ok(Self { areas })
    }
}
