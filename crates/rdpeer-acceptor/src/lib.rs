#![cfg_attr(doc, doc = include_str!("../README.md"))]

#[macro_use]
mod macros;

mod autodetect;
mod channel_connection;
mod connection;
mod finalization;
mod license;
mod settings;
mod util;

use core::any::Any;
use core::fmt;

use rdpeer_core::{EncodeError, DecodeError, WriteBuf};
use rdpeer_pdu::PduHint;

pub use self::autodetect::{AutodetectSequence, AutodetectState, NetworkMeasurements};
pub use self::channel_connection::{ChannelConnectionSequence, ChannelConnectionState};
pub use self::connection::{
    Acceptor, AcceptorResult, AcceptorState, LogonEvent, NlaIdentity, IO_CHANNEL_ID, USER_CHANNEL_ID,
};
pub use self::finalization::{FinalizeFlags, FinalizationSequence, FinalizationState};
pub use self::license::{InsecureLicenseSecurity, LicenseSecurity, LicenseSequence, LicenseState};
pub use self::settings::{DesktopSize, MonitorDef, MonitorOrientation, ServerIdentity, ServerSettings};

/// The desktop size a single synthesized primary monitor gets when the
/// application configured none.
pub const DEFAULT_DESKTOP_SCALE_FACTOR: u32 = 100;

pub trait State: Send + fmt::Debug + 'static {
    fn name(&self) -> &'static str;
    fn is_terminal(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

rdpeer_core::assert_obj_safe!(State);

pub fn state_downcast<T: State>(state: &dyn State) -> Option<&T> {
    state.as_any().downcast_ref()
}

pub fn state_is<T: State>(state: &dyn State) -> bool {
    state.as_any().is::<T>()
}

impl State for () {
    fn name(&self) -> &'static str {
        "()"
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// How many bytes a sequence step pushed into the output buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Written {
    Nothing,
    Size(core::num::NonZeroUsize),
}

impl Written {
    #[inline]
    pub fn from_size(value: usize) -> SequenceResult<Self> {
        core::num::NonZeroUsize::new(value)
            .map(Self::Size)
            .ok_or_else(|| AcceptorError::general("invalid written length (can’t be zero)"))
    }

    #[inline]
    pub fn is_nothing(self) -> bool {
        matches!(self, Self::Nothing)
    }

    #[inline]
    pub fn size(self) -> Option<usize> {
        if let Self::Size(size) = self {
            Some(size.get())
        } else {
            None
        }
    }
}

/// A sans-io state machine over framed PDUs.
///
/// A state whose [`Sequence::next_pdu_hint`] is `None` steps without input:
/// it either produces server-initiated output or transitions silently. This
/// is the driver-loop "continue" signal; the caller keeps stepping until a
/// hint appears or the terminal state is reached.
pub trait Sequence: Send {
    fn next_pdu_hint(&self) -> Option<&dyn PduHint>;

    fn state(&self) -> &dyn State;

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> SequenceResult<Written>;

    fn step_no_input(&mut self, output: &mut WriteBuf) -> SequenceResult<Written> {
        self.step(&[], output)
    }
}

rdpeer_core::assert_obj_safe!(Sequence);

pub type SequenceResult<T> = Result<T, AcceptorError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum AcceptorErrorKind {
    Encode(EncodeError),
    Decode(DecodeError),
    Reason(String),
    AccessDenied,
    General,
    Custom,
}

impl fmt::Display for AcceptorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            AcceptorErrorKind::Encode(_) => write!(f, "encode error"),
            AcceptorErrorKind::Decode(_) => write!(f, "decode error"),
            AcceptorErrorKind::Reason(description) => write!(f, "reason: {description}"),
            AcceptorErrorKind::AccessDenied => write!(f, "access denied"),
            AcceptorErrorKind::General => write!(f, "general error"),
            AcceptorErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for AcceptorErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            AcceptorErrorKind::Encode(e) => Some(e),
            AcceptorErrorKind::Decode(e) => Some(e),
            AcceptorErrorKind::Reason(_) => None,
            AcceptorErrorKind::AccessDenied => None,
            AcceptorErrorKind::Custom => None,
            AcceptorErrorKind::General => None,
        }
    }
}

pub type AcceptorError = rdpeer_core::Error<AcceptorErrorKind>;

pub trait AcceptorErrorExt {
    fn encode(error: EncodeError) -> Self;
    fn decode(error: DecodeError) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl AcceptorErrorExt for AcceptorError {
    fn encode(error: EncodeError) -> Self {
        Self::new("encode error", AcceptorErrorKind::Encode(error))
    }

    fn decode(error: DecodeError) -> Self {
        Self::new("decode error", AcceptorErrorKind::Decode(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, AcceptorErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, AcceptorErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, AcceptorErrorKind::Custom).with_source(e)
    }
}

pub trait AcceptorResultExt {
    #[must_use]
    fn with_context(self, context: &'static str) -> Self;
}

impl<T> AcceptorResultExt for SequenceResult<T> {
    fn with_context(self, context: &'static str) -> Self {
        self.map_err(|mut e| {
            e.context = context;
            e
        })
    }
}
