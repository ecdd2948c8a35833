//! Server Set Error Info PDU ([MS-RDPBCGR] 2.2.5.1.1).

use core::fmt;

use rdpeer_core::{ensure_fixed_part_size, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor};

/// A protocol-independent licensing-and-session error code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum ProtocolIndependentCode {
    None = 0x0000_0000,
    RpcInitiatedDisconnect = 0x0000_0001,
    RpcInitiatedLogoff = 0x0000_0002,
    IdleTimeout = 0x0000_0003,
    LogonTimeout = 0x0000_0004,
    DisconnectedByOtherConnection = 0x0000_0005,
    OutOfMemory = 0x0000_0006,
    ServerDeniedConnection = 0x0000_0007,
    ServerInsufficientPrivileges = 0x0000_0009,
    ServerFreshCredentialsRequired = 0x0000_000A,
    RpcInitiatedDisconnectByUser = 0x0000_000B,
    LogoffByUser = 0x0000_000C,
}

impl ProtocolIndependentCode {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000_0000 => Some(Self::None),
            0x0000_0001 => Some(Self::RpcInitiatedDisconnect),
            0x0000_0002 => Some(Self::RpcInitiatedLogoff),
            0x0000_0003 => Some(Self::IdleTimeout),
            0x0000_0004 => Some(Self::LogonTimeout),
            0x0000_0005 => Some(Self::DisconnectedByOtherConnection),
            0x0000_0006 => Some(Self::OutOfMemory),
            0x0000_0007 => Some(Self::ServerDeniedConnection),
            0x0000_0009 => Some(Self::ServerInsufficientPrivileges),
            0x0000_000A => Some(Self::ServerFreshCredentialsRequired),
            0x0000_000B => Some(Self::RpcInitiatedDisconnectByUser),
            0x0000_000C => Some(Self::LogoffByUser),
            _ => None,
        }
    }

    fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::None => "no error",
            Self::RpcInitiatedDisconnect => "the disconnection was initiated by an administrative tool",
            Self::RpcInitiatedLogoff => "the disconnection was due to a forced logoff",
            Self::IdleTimeout => "the idle session limit was reached",
            Self::LogonTimeout => "the active session limit was reached",
            Self::DisconnectedByOtherConnection => "another user connected, disconnecting this session",
            Self::OutOfMemory => "the server ran out of memory",
            Self::ServerDeniedConnection => "the server denied the connection",
            Self::ServerInsufficientPrivileges => "insufficient privileges for the session",
            Self::ServerFreshCredentialsRequired => "the server requires fresh credentials",
            Self::RpcInitiatedDisconnectByUser => "the disconnection was initiated on behalf of the user",
            Self::LogoffByUser => "the user logged off",
        }
    }
}

/// The error info value carried by the PDU, preserving unrecognized codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorInfo {
    ProtocolIndependentCode(ProtocolIndependentCode),
    Other(u32),
}

impl ErrorInfo {
    fn from_u32(value: u32) -> Self {
        match ProtocolIndependentCode::from_u32(value) {
            Some(code) => Self::ProtocolIndependentCode(code),
            None => Self::Other(value),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::ProtocolIndependentCode(code) => code.as_u32(),
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolIndependentCode(code) => f.write_str(code.description()),
            Self::Other(value) => write!(f, "unknown error info code (0x{value:08X})"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ServerSetErrorInfoPdu(pub ErrorInfo);

impl ServerSetErrorInfoPdu {
    const NAME: &'static str = "ServerSetErrorInfoPdu";

    const FIXED_PART_SIZE: usize = 4;
}

impl Encode for ServerSetErrorInfoPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.0.as_u32());

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ServerSetErrorInfoPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        Ok(Self(ErrorInfo::from_u32(src.read_u32())))
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn known_code_round_trip() {
        let pdu = ServerSetErrorInfoPdu(ErrorInfo::ProtocolIndependentCode(
            ProtocolIndependentCode::ServerDeniedConnection,
        ));

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded, [0x07, 0x00, 0x00, 0x00]);

        let decoded: ServerSetErrorInfoPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn unknown_code_is_preserved() {
        let decoded: ServerSetErrorInfoPdu = decode(&[0xAB, 0x00, 0x11, 0x00]).unwrap();
        assert_eq!(decoded.0, ErrorInfo::Other(0x0011_00AB));
    }
}
