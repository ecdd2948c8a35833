use core::fmt;

/// Generic error carrier: a static context string, a typed kind and an
/// optional boxed source.
#[derive(Debug)]
pub struct Error<Kind> {
    pub context: &'static str,
    pub kind: Kind,
    source: Option<Box<dyn std::error::Error + Sync + Send>>,
}

impl<Kind> Error<Kind> {
    #[cold]
    #[must_use]
    pub fn new(context: &'static str, kind: Kind) -> Self {
        Self {
            context,
            kind,
            source: None,
        }
    }

    #[cold]
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn into_other_kind<OtherKind>(self) -> Error<OtherKind>
    where
        Kind: Into<OtherKind>,
    {
        Error {
            context: self.context,
            kind: self.kind.into(),
            source: self.source,
        }
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn report(&self) -> ErrorReport<'_, Kind> {
        ErrorReport(self)
    }
}

impl<Kind> fmt::Display for Error<Kind>
where
    Kind: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.kind)
    }
}

impl<Kind> std::error::Error for Error<Kind>
where
    Kind: std::error::Error,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Some(source) = self.kind.source() {
            Some(source)
        } else if let Some(e) = &self.source {
            Some(e.as_ref())
        } else {
            None
        }
    }
}

impl<Kind> From<Error<Kind>> for std::io::Error
where
    Kind: std::error::Error + Send + Sync + 'static,
{
    fn from(error: Error<Kind>) -> Self {
        Self::other(error)
    }
}

/// Renders an error along with its whole source chain.
pub struct ErrorReport<'a, Kind>(&'a Error<Kind>);

impl<Kind> fmt::Display for ErrorReport<'_, Kind>
where
    Kind: std::error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::error::Error as _;

        write!(f, "{}", self.0)?;

        let mut next_source = self.0.source();

        while let Some(e) = next_source {
            write!(f, ", caused by: {e}")?;
            next_source = e.source();
        }

        Ok(())
    }
}

/// Trait for adding a source to an error type.
pub trait WithSource {
    #[must_use]
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl<T> WithSource for Error<T> {
    fn with_source<E>(self, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        self.with_source(source)
    }
}

pub trait NotEnoughBytesErr {
    fn not_enough_bytes(context: &'static str, received: usize, expected: usize) -> Self;
}

pub fn not_enough_bytes_err<T: NotEnoughBytesErr>(context: &'static str, received: usize, expected: usize) -> T {
    T::not_enough_bytes(context, received, expected)
}

pub trait InvalidFieldErr {
    fn invalid_field(context: &'static str, field: &'static str, reason: &'static str) -> Self;
}

pub fn invalid_field_err<T: InvalidFieldErr>(context: &'static str, field: &'static str, reason: &'static str) -> T {
    T::invalid_field(context, field, reason)
}

pub trait UnexpectedMessageTypeErr {
    fn unexpected_message_type(context: &'static str, got: u8) -> Self;
}

pub fn unexpected_message_type_err<T: UnexpectedMessageTypeErr>(context: &'static str, got: u8) -> T {
    T::unexpected_message_type(context, got)
}

pub trait UnsupportedVersionErr {
    fn unsupported_version(context: &'static str, got: u8) -> Self;
}

pub fn unsupported_version_err<T: UnsupportedVersionErr>(context: &'static str, got: u8) -> T {
    T::unsupported_version(context, got)
}

pub trait UnsupportedValueErr {
    fn unsupported_value(context: &'static str, name: &'static str, value: String) -> Self;
}

pub fn unsupported_value_err<T: UnsupportedValueErr>(context: &'static str, name: &'static str, value: String) -> T {
    T::unsupported_value(context, name, value)
}

pub trait OtherErr {
    fn other(context: &'static str, description: &'static str) -> Self;
}

pub fn other_err<T: OtherErr>(context: &'static str, description: &'static str) -> T {
    T::other(context, description)
}
