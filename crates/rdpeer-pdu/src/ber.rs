//! The subset of ITU-T X.690 BER used by the T.125 connect PDUs.

use rdpeer_core::{ensure_size, invalid_field_err, DecodeResult, EncodeResult, ReadCursor, WriteCursor};

const CTX: &str = "ber";

#[repr(u8)]
enum Pc {
    Primitive = 0x00,
    Construct = 0x20,
}

#[repr(u8)]
enum Class {
    Universal = 0x00,
    Application = 0x40,
}

#[repr(u8)]
enum Tag {
    Boolean = 0x01,
    Integer = 0x02,
    OctetString = 0x04,
    Enumerated = 0x0A,
    Sequence = 0x10,
}

pub(crate) const SIZEOF_ENUMERATED: usize = 3;
pub(crate) const SIZEOF_BOOL: usize = 3;

const TAG_MASK: u8 = 0x1F;

pub(crate) fn sizeof_application_tag(tagnum: u8, length: u16) -> usize {
    let tag_len = if tagnum > 0x1E { 2 } else { 1 };

    sizeof_length(length) + tag_len
}

pub(crate) fn sizeof_sequence_tag(length: u16) -> usize {
    1 + sizeof_length(length)
}

pub(crate) fn sizeof_octet_string(length: u16) -> usize {
    1 + sizeof_length(length) + usize::from(length)
}

pub(crate) fn sizeof_integer(value: u32) -> usize {
    if value < 0x0000_0080 {
        3
    } else if value < 0x0000_8000 {
        4
    } else if value < 0x0080_0000 {
        5
    } else {
        6
    }
}

pub(crate) fn write_sequence_tag(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::Sequence, Pc::Construct)?;

    write_length(dst, length).map(|length| length + 1)
}

pub(crate) fn read_sequence_tag(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | Pc::Construct as u8 | (TAG_MASK & Tag::Sequence as u8) {
        Err(invalid_field_err(CTX, "identifier", "invalid sequence tag identifier"))
    } else {
        read_length(src)
    }
}

pub(crate) fn write_application_tag(dst: &mut WriteCursor<'_>, tagnum: u8, length: u16) -> EncodeResult<usize> {
    ensure_size!(ctx: CTX, in: dst, size: sizeof_application_tag(tagnum, length));

    let taglen = if tagnum > 0x1E {
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | TAG_MASK);
        dst.write_u8(tagnum);
        2
    } else {
        dst.write_u8(Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum));
        1
    };

    write_length(dst, length).map(|length| length + taglen)
}

pub(crate) fn read_application_tag(src: &mut ReadCursor<'_>, tagnum: u8) -> DecodeResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let identifier = src.read_u8();

    if tagnum > 0x1E {
        if identifier != Class::Application as u8 | Pc::Construct as u8 | TAG_MASK {
            return Err(invalid_field_err(CTX, "identifier", "invalid application tag identifier"));
        }
        ensure_size!(ctx: CTX, in: src, size: 1);
        if src.read_u8() != tagnum {
            return Err(invalid_field_err(CTX, "tagnum", "invalid application tag identifier"));
        }
    } else if identifier != Class::Application as u8 | Pc::Construct as u8 | (TAG_MASK & tagnum) {
        return Err(invalid_field_err(CTX, "identifier", "invalid application tag identifier"));
    }

    read_length(src)
}

pub(crate) fn write_enumerated(dst: &mut WriteCursor<'_>, enumerated: u8) -> EncodeResult<usize> {
    let mut size = 0;
    size += write_universal_tag(dst, Tag::Enumerated, Pc::Primitive)?;
    size += write_length(dst, 1)?;
    ensure_size!(ctx: CTX, in: dst, size: 1);
    dst.write_u8(enumerated);
    size += 1;

    Ok(size)
}

pub(crate) fn read_enumerated(src: &mut ReadCursor<'_>, count: u8) -> DecodeResult<u8> {
    read_universal_tag(src, Tag::Enumerated, Pc::Primitive)?;

    let length = read_length(src)?;
    if length != 1 {
        return Err(invalid_field_err(CTX, "len", "invalid enumerated len"));
    }

    ensure_size!(ctx: CTX, in: src, size: 1);
    let enumerated = src.read_u8();
    if enumerated == u8::MAX || enumerated + 1 > count {
        return Err(invalid_field_err(CTX, "enumerated", "invalid enumerated value"));
    }

    Ok(enumerated)
}

pub(crate) fn write_integer(dst: &mut WriteCursor<'_>, value: u32) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::Integer, Pc::Primitive)?;

    if value < 0x0000_0080 {
        write_length(dst, 1)?;
        ensure_size!(ctx: CTX, in: dst, size: 1);
        dst.write_u8(value as u8);

        Ok(3)
    } else if value < 0x0000_8000 {
        write_length(dst, 2)?;
        ensure_size!(ctx: CTX, in: dst, size: 2);
        dst.write_u16_be(value as u16);

        Ok(4)
    } else if value < 0x0080_0000 {
        write_length(dst, 3)?;
        ensure_size!(ctx: CTX, in: dst, size: 3);
        dst.write_u8((value >> 16) as u8);
        dst.write_u16_be((value & 0xFFFF) as u16);

        Ok(5)
    } else {
        write_length(dst, 4)?;
        ensure_size!(ctx: CTX, in: dst, size: 4);
        dst.write_u32_be(value);

        Ok(6)
    }
}

pub(crate) fn read_integer(src: &mut ReadCursor<'_>) -> DecodeResult<u32> {
    read_universal_tag(src, Tag::Integer, Pc::Primitive)?;
    let length = read_length(src)?;

    if length == 1 {
        ensure_size!(ctx: CTX, in: src, size: 1);
        Ok(u32::from(src.read_u8()))
    } else if length == 2 {
        ensure_size!(ctx: CTX, in: src, size: 2);
        Ok(u32::from(src.read_u16_be()))
    } else if length == 3 {
        ensure_size!(ctx: CTX, in: src, size: 3);
        let a = src.read_u8();
        let b = src.read_u16_be();

        Ok(u32::from(b) + (u32::from(a) << 16))
    } else if length == 4 {
        ensure_size!(ctx: CTX, in: src, size: 4);
        Ok(src.read_u32_be())
    } else {
        Err(invalid_field_err(CTX, "len", "invalid integer len"))
    }
}

pub(crate) fn write_bool(dst: &mut WriteCursor<'_>, value: bool) -> EncodeResult<usize> {
    let mut size = 0;
    size += write_universal_tag(dst, Tag::Boolean, Pc::Primitive)?;
    size += write_length(dst, 1)?;

    ensure_size!(ctx: CTX, in: dst, size: 1);
    dst.write_u8(if value { 0xFF } else { 0x00 });
    size += 1;

    Ok(size)
}

pub(crate) fn read_bool(src: &mut ReadCursor<'_>) -> DecodeResult<bool> {
    read_universal_tag(src, Tag::Boolean, Pc::Primitive)?;
    let length = read_length(src)?;

    if length != 1 {
        return Err(invalid_field_err(CTX, "len", "invalid boolean len"));
    }

    ensure_size!(ctx: CTX, in: src, size: 1);
    Ok(src.read_u8() != 0)
}

pub(crate) fn write_octet_string(dst: &mut WriteCursor<'_>, value: &[u8]) -> EncodeResult<usize> {
    let length = u16::try_from(value.len()).map_err(|_| invalid_field_err(CTX, "len", "octet string too big"))?;
    let tag_size = write_octet_string_tag(dst, length)?;
    ensure_size!(ctx: CTX, in: dst, size: value.len());
    dst.write_slice(value);
    Ok(tag_size + value.len())
}

pub(crate) fn write_octet_string_tag(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    write_universal_tag(dst, Tag::OctetString, Pc::Primitive)?;
    write_length(dst, length).map(|length| length + 1)
}

pub(crate) fn read_octet_string(src: &mut ReadCursor<'_>) -> DecodeResult<Vec<u8>> {
    let length = usize::from(read_octet_string_tag(src)?);

    ensure_size!(ctx: CTX, in: src, size: length);
    let buffer = src.read_slice(length);

    Ok(buffer.into())
}

pub(crate) fn read_octet_string_tag(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    read_universal_tag(src, Tag::OctetString, Pc::Primitive)?;
    read_length(src)
}

fn write_universal_tag(dst: &mut WriteCursor<'_>, tag: Tag, pc: Pc) -> EncodeResult<usize> {
    ensure_size!(ctx: CTX, in: dst, size: 1);

    let identifier = Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8);
    dst.write_u8(identifier);

    Ok(1)
}

fn read_universal_tag(src: &mut ReadCursor<'_>, tag: Tag, pc: Pc) -> DecodeResult<()> {
    ensure_size!(ctx: CTX, in: src, size: 1);

    let identifier = src.read_u8();

    if identifier != Class::Universal as u8 | pc as u8 | (TAG_MASK & tag as u8) {
        Err(invalid_field_err(CTX, "identifier", "invalid universal tag identifier"))
    } else {
        Ok(())
    }
}

fn write_length(dst: &mut WriteCursor<'_>, length: u16) -> EncodeResult<usize> {
    ensure_size!(ctx: CTX, in: dst, size: sizeof_length(length));

    if length > 0xFF {
        dst.write_u8(0x80 ^ 0x2);
        dst.write_u16_be(length);

        Ok(3)
    } else if length > 0x7F {
        dst.write_u8(0x80 ^ 0x1);
        dst.write_u8(length as u8);

        Ok(2)
    } else {
        dst.write_u8(length as u8);

        Ok(1)
    }
}

fn read_length(src: &mut ReadCursor<'_>) -> DecodeResult<u16> {
    ensure_size!(ctx: CTX, in: src, size: 1);
    let byte = src.read_u8();

    if byte & 0x80 != 0 {
        let len = byte & !0x80;

        if len == 1 {
            ensure_size!(ctx: CTX, in: src, size: 1);
            Ok(u16::from(src.read_u8()))
        } else if len == 2 {
            ensure_size!(ctx: CTX, in: src, size: 2);
            Ok(src.read_u16_be())
        } else {
            Err(invalid_field_err(CTX, "len", "invalid length of the length"))
        }
    } else {
        Ok(u16::from(byte))
    }
}

fn sizeof_length(length: u16) -> usize {
    if length > 0xff {
        3
    } else if length > 0x7f {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_tag_round_trip() {
        let mut buf = [0x0; 4];
        let mut cur = WriteCursor::new(&mut buf);
        assert_eq!(write_sequence_tag(&mut cur, 0x100).unwrap(), 4);
        assert_eq!(buf, [0x30, 0x82, 0x01, 0x00]);

        let mut cur = ReadCursor::new(&buf);
        assert_eq!(read_sequence_tag(&mut cur).unwrap(), 0x100);
    }

    #[test]
    fn application_tag_long_form() {
        let mut buf = [0x0; 3];
        let mut cur = WriteCursor::new(&mut buf);
        assert_eq!(write_application_tag(&mut cur, 0x1F, 0x0F).unwrap(), 3);
        assert_eq!(buf, [0x7F, 0x1F, 0x0F]);

        let mut cur = ReadCursor::new(&buf);
        assert_eq!(read_application_tag(&mut cur, 0x1F).unwrap(), 0x0F);
    }

    #[test]
    fn application_tag_short_form() {
        let mut buf = [0x0; 4];
        let mut cur = WriteCursor::new(&mut buf);
        assert_eq!(write_application_tag(&mut cur, 0x08, 0x100).unwrap(), 4);
        assert_eq!(buf, [0x68, 0x82, 0x01, 0x00]);
    }

    #[test]
    fn bool_round_trip() {
        let mut buf = [0x0; 3];
        let mut cur = WriteCursor::new(&mut buf);
        write_bool(&mut cur, true).unwrap();
        assert_eq!(buf, [0x01, 0x01, 0xFF]);

        let mut cur = ReadCursor::new(&buf);
        assert!(read_bool(&mut cur).unwrap());
    }

    #[test]
    fn integer_lengths() {
        for (value, expected) in [
            (0x79u32, vec![0x02, 0x01, 0x79]),
            (0x800, vec![0x02, 0x02, 0x08, 0x00]),
            (0x80000, vec![0x02, 0x03, 0x08, 0x00, 0x00]),
            (0x0080_0000, vec![0x02, 0x04, 0x00, 0x80, 0x00, 0x00]),
        ] {
            let mut buf = vec![0u8; expected.len()];
            let mut cur = WriteCursor::new(&mut buf);
            write_integer(&mut cur, value).unwrap();
            assert_eq!(buf, expected);

            let mut cur = ReadCursor::new(&buf);
            assert_eq!(read_integer(&mut cur).unwrap(), value);
        }
    }

    #[test]
    fn octet_string_round_trip() {
        let mut buf = [0x0; 7];
        let mut cur = WriteCursor::new(&mut buf);
        let string = [0x68, 0x65, 0x6c, 0x6c, 0x6f];
        assert_eq!(write_octet_string(&mut cur, &string).unwrap(), 7);

        let mut cur = ReadCursor::new(&buf);
        assert_eq!(read_octet_string(&mut cur).unwrap(), string.to_vec());
    }

    #[test]
    fn enumerated_out_of_range() {
        let buf = [0x0A, 0x01, 0x0F];
        let mut cur = ReadCursor::new(&buf);
        assert!(read_enumerated(&mut cur, 0x05).is_err());
    }
}
