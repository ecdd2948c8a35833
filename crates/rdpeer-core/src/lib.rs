#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
mod macros;

mod cursor;
mod decode;
mod encode;
mod error;
mod write_buf;

pub use self::cursor::{NotEnoughBytesError, ReadCursor, WriteCursor};
pub use self::decode::{decode, decode_cursor, Decode, DecodeError, DecodeErrorKind, DecodeResult};
pub use self::encode::{encode, encode_buf, encode_cursor, encode_vec, Encode, EncodeError, EncodeErrorKind, EncodeResult};
pub use self::error::{
    invalid_field_err, not_enough_bytes_err, other_err, unexpected_message_type_err, unsupported_value_err,
    unsupported_version_err, Error, ErrorReport, InvalidFieldErr, NotEnoughBytesErr, OtherErr,
    UnexpectedMessageTypeErr, UnsupportedValueErr, UnsupportedVersionErr, WithSource,
};
pub use self::write_buf::WriteBuf;

/// Asserts that the traits support dynamic dispatch.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_obj_safe.rs.html#72-76>
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Asserts that the type implements _all_ of the given traits.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_impl.rs.html#113-121>
#[macro_export]
macro_rules! assert_impl {
    ($type:ty: $($trait:path),+ $(,)?) => {
        const _: fn() = || {
            fn assert_impl_all<T: ?Sized $(+ $trait)+>() {}
            assert_impl_all::<$type>();
        };
    };
}

/// Trait used to produce an owned version of a borrowing type.
pub trait IntoOwned: Sized {
    type Owned: 'static;

    fn into_owned(self) -> Self::Owned;
}

/// Similar to [`Decode`] but unconditionally returns an owned type.
pub trait DecodeOwned: Sized {
    fn decode_owned(src: &mut ReadCursor<'_>) -> DecodeResult<Self>;
}

pub fn decode_owned<T: DecodeOwned>(src: &[u8]) -> DecodeResult<T> {
    let mut cursor = ReadCursor::new(src);
    T::decode_owned(&mut cursor)
}
