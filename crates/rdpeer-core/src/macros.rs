//! Helper macros for PDU encoding and decoding.
//!
//! All of them are exported and available to dependent crates.

/// Ensures the cursor holds at least `size` bytes, or returns a
/// "not enough bytes" error with the given context.
#[macro_export]
macro_rules! ensure_size {
    (ctx: $ctx:expr, in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if !(received >= expected) {
            return Err($crate::not_enough_bytes_err($ctx, received, expected));
        }
    }};
    (in: $buf:ident, size: $expected:expr) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: $expected)
    }};
}

/// Ensures the cursor holds at least `Self::FIXED_PART_SIZE` bytes.
#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

/// Converts a length with `TryInto`, mapping failure to an "invalid field"
/// error naming the field.
#[macro_export]
macro_rules! cast_length {
    ($ctx:expr, $field:expr, $len:expr) => {{
        ::core::convert::TryInto::try_into($len)
            .map_err(|_| $crate::invalid_field_err($ctx, $field, "too many bytes"))
    }};
    ($field:expr, $len:expr) => {{
        $crate::cast_length!(Self::NAME, $field, $len)
    }};
}

/// Creates an "invalid field" error. The context defaults to `Self::NAME`.
#[macro_export]
macro_rules! invalid_field_err {
    ($ctx:expr, $field:expr, $reason:expr $(,)?) => {{
        $crate::invalid_field_err($ctx, $field, $reason)
    }};
    ($field:expr, $reason:expr $(,)?) => {{
        $crate::invalid_field_err(Self::NAME, $field, $reason)
    }};
}

/// Creates an "unexpected message type" error.
#[macro_export]
macro_rules! unexpected_message_type_err {
    ($ctx:expr, $got:expr $(,)?) => {{
        $crate::unexpected_message_type_err($ctx, $got)
    }};
}

/// Creates an "unsupported version" error.
#[macro_export]
macro_rules! unsupported_version_err {
    ($ctx:expr, $got:expr $(,)?) => {{
        $crate::unsupported_version_err($ctx, $got)
    }};
}

/// Creates a generic "other" error, optionally with a source attached.
#[macro_export]
macro_rules! other_err {
    ($ctx:expr, source: $source:expr $(,)?) => {{
        $crate::WithSource::with_source($crate::other_err($ctx, ""), $source)
    }};
    ($ctx:expr, $description:expr $(,)?) => {{
        $crate::other_err($ctx, $description)
    }};
}

/// Skips `n` padding bytes when reading.
#[macro_export]
macro_rules! read_padding {
    ($src:ident, $n:expr) => {{
        $src.advance($n);
    }};
}

/// Writes `n` zero padding bytes.
#[macro_export]
macro_rules! write_padding {
    ($dst:ident, $n:expr) => {{
        for _ in 0..$n {
            $dst.write_u8(0);
        }
    }};
}
