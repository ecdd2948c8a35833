//! MS-RDPELE licensing messages.
//!
//! The server core either short-circuits licensing with a
//! "valid client" error alert or walks the full server license request
//! sequence. The encrypted blobs stay opaque: key material handling lives
//! outside this crate.

use bitflags::bitflags;
use md5::Digest as _;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, unsupported_value_err,
    write_padding, Decode, DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

pub const PREAMBLE_SIZE: usize = 4;
pub const RANDOM_NUMBER_SIZE: usize = 32;
pub const PREMASTER_SECRET_SIZE: usize = 48;
pub const MAC_SIZE: usize = 16;

pub const KEY_EXCHANGE_ALGORITHM_RSA: u32 = 1;

/// `PLATFORM_ID`: the client OS and ISV identifiers ([MS-RDPELE] 2.2.2.2).
pub const PLATFORM_ID: u32 = 0x0004_0000 | 0x0000_0010;

const PROTOCOL_VERSION_MASK: u8 = 0x0F;
const BLOB_TYPE_SIZE: usize = 2;
const BLOB_LENGTH_SIZE: usize = 2;
const UTF16_NULL_TERMINATOR_SIZE: usize = 2;
const UTF8_NULL_TERMINATOR_SIZE: usize = 1;

/// Licensing preamble message types ([MS-RDPBCGR] 2.2.1.12.1.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum PreambleType {
    LicenseRequest = 0x01,
    PlatformChallenge = 0x02,
    NewLicense = 0x03,
    UpgradeLicense = 0x04,
    LicenseInfo = 0x12,
    NewLicenseRequest = 0x13,
    PlatformChallengeResponse = 0x15,
    ErrorAlert = 0xff,
}

impl PreambleType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::LicenseRequest),
            0x02 => Some(Self::PlatformChallenge),
            0x03 => Some(Self::NewLicense),
            0x04 => Some(Self::UpgradeLicense),
            0x12 => Some(Self::LicenseInfo),
            0x13 => Some(Self::NewLicenseRequest),
            0x15 => Some(Self::PlatformChallengeResponse),
            0xff => Some(Self::ErrorAlert),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PreambleFlags: u8 {
        const EXTENDED_ERROR_MSG_SUPPORTED = 0x80;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum PreambleVersion {
    V2 = 2, // RDP 4.0
    V3 = 3, // RDP 5.0 and up
}

impl PreambleVersion {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum BlobType {
    Any = 0x00,
    Data = 0x01,
    Random = 0x02,
    Certificate = 0x03,
    Error = 0x04,
    RsaKey = 0x06,
    RsaSignature = 0x08,
    EncryptedData = 0x09,
    KeyExchangeAlgorithm = 0x0d,
    Scope = 0x0e,
    ClientUserName = 0x0f,
    ClientMachineName = 0x10,
}

impl BlobType {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x00 => Some(Self::Any),
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Random),
            0x03 => Some(Self::Certificate),
            0x04 => Some(Self::Error),
            0x06 => Some(Self::RsaKey),
            0x08 => Some(Self::RsaSignature),
            0x09 => Some(Self::EncryptedData),
            0x0d => Some(Self::KeyExchangeAlgorithm),
            0x0e => Some(Self::Scope),
            0x0f => Some(Self::ClientUserName),
            0x10 => Some(Self::ClientMachineName),
            _ => None,
        }
    }

    fn as_u16(self) -> u16 {
        self as u16
    }
}

pub struct BlobHeader {
    pub blob_type: BlobType,
    pub length: usize,
}

impl BlobHeader {
    const NAME: &'static str = "BlobHeader";

    const FIXED_PART_SIZE: usize = BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE;

    pub fn new(blob_type: BlobType, length: usize) -> Self {
        Self { blob_type, length }
    }
}

impl Encode for BlobHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.blob_type.as_u16());
        dst.write_u16(cast_length!("blobLen", self.length)?);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for BlobHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let blob_type = src.read_u16();
        let blob_type =
            BlobType::from_u16(blob_type).ok_or_else(|| invalid_field_err!("blobType", "invalid blob type"))?;

        let length = usize::from(src.read_u16());

        Ok(Self { blob_type, length })
    }
}

fn encode_blob(dst: &mut WriteCursor<'_>, blob_type: BlobType, data: &[u8]) -> EncodeResult<()> {
    BlobHeader::new(blob_type, data.len()).encode(dst)?;
    dst.write_slice(data);
    Ok(())
}

fn decode_blob<'de>(src: &mut ReadCursor<'de>, expected: BlobType) -> DecodeResult<&'de [u8]> {
    const CTX: &str = "LicenseBlob";

    let header = BlobHeader::decode(src)?;
    if header.length != 0 && header.blob_type != expected {
        return Err(invalid_field_err(CTX, "blobType", "unexpected blob type"));
    }

    ensure_size!(ctx: CTX, in: src, size: header.length);
    Ok(src.read_slice(header.length))
}

fn blob_size(data: &[u8]) -> usize {
    BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE + data.len()
}

/// The common licensing preamble with its outer security header.
#[derive(Debug, PartialEq, Eq)]
pub struct LicenseHeader {
    pub security_header: BasicSecurityHeader,
    pub preamble_message_type: PreambleType,
    pub preamble_flags: PreambleFlags,
    pub preamble_version: PreambleVersion,
    pub preamble_message_size: u16,
}

impl LicenseHeader {
    const NAME: &'static str = "LicenseHeader";

    const FIXED_PART_SIZE: usize = PREAMBLE_SIZE + BasicSecurityHeader::FIXED_PART_SIZE;

    fn for_message(preamble_message_type: PreambleType, message_size: usize) -> EncodeResult<Self> {
        Ok(Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::LICENSE_PKT,
            },
            preamble_message_type,
            preamble_flags: PreambleFlags::empty(),
            preamble_version: PreambleVersion::V3,
            preamble_message_size: cast_length!(Self::NAME, "messageSize", message_size + PREAMBLE_SIZE)?,
        })
    }
}

impl Encode for LicenseHeader {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        self.security_header.encode(dst)?;

        let flags_with_version = self.preamble_flags.bits() | self.preamble_version.as_u8();

        dst.write_u8(self.preamble_message_type.as_u8());
        dst.write_u8(flags_with_version);
        dst.write_u16(self.preamble_message_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for LicenseHeader {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::LICENSE_PKT) {
            return Err(invalid_field_err!("securityHeader", "expected LICENSE_PKT flag"));
        }

        let preamble_message_type = PreambleType::from_u8(src.read_u8())
            .ok_or_else(|| invalid_field_err!("preambleType", "invalid license type"))?;

        let flags_with_version = src.read_u8();
        let preamble_message_size = src.read_u16();

        let preamble_flags = PreambleFlags::from_bits(flags_with_version & !PROTOCOL_VERSION_MASK)
            .ok_or_else(|| invalid_field_err!("preambleFlags", "got invalid flags field"))?;

        let preamble_version = PreambleVersion::from_u8(flags_with_version & PROTOCOL_VERSION_MASK)
            .ok_or_else(|| invalid_field_err!("preambleVersion", "got invalid version in the flags field"))?;

        Ok(Self {
            security_header,
            preamble_message_type,
            preamble_flags,
            preamble_version,
            preamble_message_size,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LicenseErrorCode {
    InvalidServerCertificate = 0x01,
    NoLicense = 0x02,
    InvalidMac = 0x03,
    InvalidScope = 0x04,
    NoLicenseServer = 0x06,
    StatusValidClient = 0x07,
    InvalidClient = 0x08,
    InvalidProductId = 0x0b,
    InvalidMessageLen = 0x0c,
}

impl LicenseErrorCode {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x01 => Some(Self::InvalidServerCertificate),
            0x02 => Some(Self::NoLicense),
            0x03 => Some(Self::InvalidMac),
            0x04 => Some(Self::InvalidScope),
            0x06 => Some(Self::NoLicenseServer),
            0x07 => Some(Self::StatusValidClient),
            0x08 => Some(Self::InvalidClient),
            0x0b => Some(Self::InvalidProductId),
            0x0c => Some(Self::InvalidMessageLen),
            _ => None,
        }
    }

    fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LicensingStateTransition {
    TotalAbort = 1,
    NoTransition = 2,
    ResetPhaseToStart = 3,
    ResendLastMessage = 4,
}

impl LicensingStateTransition {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::TotalAbort),
            2 => Some(Self::NoTransition),
            3 => Some(Self::ResetPhaseToStart),
            4 => Some(Self::ResendLastMessage),
            _ => None,
        }
    }

    fn as_u32(self) -> u32 {
        self as u32
    }
}

/// [2.2.1.12.1.3] Licensing Error Message (LICENSE_ERROR_MESSAGE)
///
/// [2.2.1.12.1.3]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/f18b6c9f-f3d8-4a0e-8398-f9b153233dca
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensingErrorMessage {
    pub error_code: LicenseErrorCode,
    pub state_transition: LicensingStateTransition,
    pub error_info: Vec<u8>,
}

impl LicensingErrorMessage {
    const NAME: &'static str = "LicensingErrorMessage";

    const FIXED_PART_SIZE: usize = 4 /* errorCode */ + 4 /* stateTransition */;

    /// The "license not required" short path: STATUS_VALID_CLIENT with no
    /// state transition.
    pub fn new_valid_client() -> Self {
        Self {
            error_code: LicenseErrorCode::StatusValidClient,
            state_transition: LicensingStateTransition::NoTransition,
            error_info: Vec::new(),
        }
    }

    pub fn is_valid_client(&self) -> bool {
        self.error_code == LicenseErrorCode::StatusValidClient
            && self.state_transition == LicensingStateTransition::NoTransition
    }
}

impl Encode for LicensingErrorMessage {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.error_code.as_u32());
        dst.write_u32(self.state_transition.as_u32());
        encode_blob(dst, BlobType::Error, &self.error_info)?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + blob_size(&self.error_info)
    }
}

impl<'de> Decode<'de> for LicensingErrorMessage {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let error_code = LicenseErrorCode::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err!("errorCode", "invalid error code"))?;
        let state_transition = LicensingStateTransition::from_u32(src.read_u32())
            .ok_or_else(|| invalid_field_err!("stateTransition", "invalid state transition"))?;

        let error_info = decode_blob(src, BlobType::Error)?.to_vec();

        Ok(Self {
            error_code,
            state_transition,
            error_info,
        })
    }
}

/// PRODUCT_INFO of the server license request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub version: u32,
    pub company_name: String,
    pub product_id: String,
}

impl ProductInfo {
    const NAME: &'static str = "ProductInfo";

    fn utf16_size(value: &str) -> usize {
        value.encode_utf16().count() * 2 + UTF16_NULL_TERMINATOR_SIZE
    }

    fn size(&self) -> usize {
        4 /* dwVersion */ + 4 /* cbCompanyName */ + Self::utf16_size(&self.company_name)
            + 4 /* cbProductId */ + Self::utf16_size(&self.product_id)
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        fn write_utf16(dst: &mut WriteCursor<'_>, value: &str) {
            for unit in value.encode_utf16() {
                dst.write_u16(unit);
            }
            dst.write_u16(0);
        }

        dst.write_u32(self.version);
        dst.write_u32(cast_length!(Self::NAME, "cbCompanyName", Self::utf16_size(&self.company_name))?);
        write_utf16(dst, &self.company_name);
        dst.write_u32(cast_length!(Self::NAME, "cbProductId", Self::utf16_size(&self.product_id))?);
        write_utf16(dst, &self.product_id);

        Ok(())
    }

    fn decode(src: &mut ReadCursor<'_>) -> DecodeResult<Self> {
        fn read_utf16(src: &mut ReadCursor<'_>, byte_len: usize) -> DecodeResult<String> {
            ensure_size!(ctx: ProductInfo::NAME, in: src, size: byte_len);
            if byte_len < UTF16_NULL_TERMINATOR_SIZE || byte_len % 2 != 0 {
                return Err(invalid_field_err(ProductInfo::NAME, "cb", "invalid string length"));
            }
            let bytes = src.read_slice(byte_len - UTF16_NULL_TERMINATOR_SIZE);
            read_padding!(src, UTF16_NULL_TERMINATOR_SIZE);
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            Ok(String::from_utf16_lossy(&units))
        }

        ensure_size!(ctx: Self::NAME, in: src, size: 8);
        let version = src.read_u32();
        let cb_company_name = src.read_u32() as usize;
        let company_name = read_utf16(src, cb_company_name)?;
        ensure_size!(ctx: Self::NAME, in: src, size: 4);
        let cb_product_id = src.read_u32() as usize;
        let product_id = read_utf16(src, cb_product_id)?;

        Ok(Self {
            version,
            company_name,
            product_id,
        })
    }
}

/// SERVER_LICENSE_REQUEST ([MS-RDPELE] 2.2.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLicenseRequest {
    pub server_random: [u8; RANDOM_NUMBER_SIZE],
    pub product_info: ProductInfo,
    /// Opaque DER certificate chain; certificate parsing is external.
    pub server_certificate: Vec<u8>,
    pub scopes: Vec<String>,
}

impl ServerLicenseRequest {
    const NAME: &'static str = "ServerLicenseRequest";

    fn key_exchange_list() -> [u8; 4] {
        KEY_EXCHANGE_ALGORITHM_RSA.to_le_bytes()
    }

    fn scope_blob_size(scope: &str) -> usize {
        BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE + scope.len() + UTF8_NULL_TERMINATOR_SIZE
    }
}

impl Encode for ServerLicenseRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_slice(&self.server_random);
        self.product_info.encode(dst)?;
        encode_blob(dst, BlobType::KeyExchangeAlgorithm, &Self::key_exchange_list())?;
        encode_blob(dst, BlobType::Certificate, &self.server_certificate)?;

        dst.write_u32(cast_length!("scopeCount", self.scopes.len())?);
        for scope in &self.scopes {
            BlobHeader::new(BlobType::Scope, scope.len() + UTF8_NULL_TERMINATOR_SIZE).encode(dst)?;
            dst.write_slice(scope.as_bytes());
            write_padding!(dst, UTF8_NULL_TERMINATOR_SIZE);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        RANDOM_NUMBER_SIZE
            + self.product_info.size()
            + blob_size(&Self::key_exchange_list())
            + blob_size(&self.server_certificate)
            + 4 /* scopeCount */
            + self.scopes.iter().map(|s| Self::scope_blob_size(s)).sum::<usize>()
    }
}

impl<'de> Decode<'de> for ServerLicenseRequest {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: RANDOM_NUMBER_SIZE);
        let server_random = src.read_array();

        let product_info = ProductInfo::decode(src)?;

        let key_exchange_list = decode_blob(src, BlobType::KeyExchangeAlgorithm)?;
        if key_exchange_list.len() >= 4 {
            let alg = u32::from_le_bytes([
                key_exchange_list[0],
                key_exchange_list[1],
                key_exchange_list[2],
                key_exchange_list[3],
            ]);
            if alg != KEY_EXCHANGE_ALGORITHM_RSA {
                return Err(invalid_field_err!("keyExchangeList", "invalid key exchange algorithm"));
            }
        }

        let server_certificate = decode_blob(src, BlobType::Certificate)?.to_vec();

        ensure_size!(in: src, size: 4);
        let scope_count = src.read_u32() as usize;
        if scope_count > 256 {
            return Err(invalid_field_err!("scopeCount", "invalid scope count"));
        }

        let mut scopes = Vec::with_capacity(scope_count);
        for _ in 0..scope_count {
            let scope = decode_blob(src, BlobType::Scope)?;
            let end = scope.iter().position(|&b| b == 0).unwrap_or(scope.len());
            scopes.push(String::from_utf8_lossy(&scope[..end]).into_owned());
        }

        Ok(Self {
            server_random,
            product_info,
            server_certificate,
            scopes,
        })
    }
}

/// CLIENT_NEW_LICENSE_REQUEST ([MS-RDPELE] 2.2.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNewLicenseRequest {
    pub key_exchange_algorithm: u32,
    pub platform_id: u32,
    pub client_random: [u8; RANDOM_NUMBER_SIZE],
    pub encrypted_premaster_secret: Vec<u8>,
    pub client_username: String,
    pub client_machine_name: String,
}

impl ClientNewLicenseRequest {
    const NAME: &'static str = "ClientNewLicenseRequest";
}

impl Encode for ClientNewLicenseRequest {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(self.key_exchange_algorithm);
        dst.write_u32(self.platform_id);
        dst.write_slice(&self.client_random);
        encode_blob(dst, BlobType::Random, &self.encrypted_premaster_secret)?;

        BlobHeader::new(
            BlobType::ClientUserName,
            self.client_username.len() + UTF8_NULL_TERMINATOR_SIZE,
        )
        .encode(dst)?;
        dst.write_slice(self.client_username.as_bytes());
        write_padding!(dst, UTF8_NULL_TERMINATOR_SIZE);

        BlobHeader::new(
            BlobType::ClientMachineName,
            self.client_machine_name.len() + UTF8_NULL_TERMINATOR_SIZE,
        )
        .encode(dst)?;
        dst.write_slice(self.client_machine_name.as_bytes());
        write_padding!(dst, UTF8_NULL_TERMINATOR_SIZE);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        4 + 4
            + RANDOM_NUMBER_SIZE
            + blob_size(&self.encrypted_premaster_secret)
            + BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE + self.client_username.len() + UTF8_NULL_TERMINATOR_SIZE
            + BLOB_TYPE_SIZE + BLOB_LENGTH_SIZE + self.client_machine_name.len() + UTF8_NULL_TERMINATOR_SIZE
    }
}

impl<'de> Decode<'de> for ClientNewLicenseRequest {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 4 + 4 + RANDOM_NUMBER_SIZE);

        let key_exchange_algorithm = src.read_u32();
        if key_exchange_algorithm != KEY_EXCHANGE_ALGORITHM_RSA {
            return Err(invalid_field_err!(
                "preferredKeyExchangeAlg",
                "invalid key exchange algorithm"
            ));
        }

        let platform_id = src.read_u32();
        let client_random = src.read_array();

        let encrypted_premaster_secret = decode_blob(src, BlobType::Random)?.to_vec();

        let username_blob = decode_blob(src, BlobType::ClientUserName)?;
        let end = username_blob
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(username_blob.len());
        let client_username = String::from_utf8_lossy(&username_blob[..end]).into_owned();

        let machine_blob = decode_blob(src, BlobType::ClientMachineName)?;
        let end = machine_blob.iter().position(|&b| b == 0).unwrap_or(machine_blob.len());
        let client_machine_name = String::from_utf8_lossy(&machine_blob[..end]).into_owned();

        Ok(Self {
            key_exchange_algorithm,
            platform_id,
            client_random,
            encrypted_premaster_secret,
            client_username,
            client_machine_name,
        })
    }
}

/// SERVER_PLATFORM_CHALLENGE ([MS-RDPELE] 2.2.2.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPlatformChallenge {
    pub encrypted_platform_challenge: Vec<u8>,
    pub mac_data: [u8; MAC_SIZE],
}

impl ServerPlatformChallenge {
    const NAME: &'static str = "ServerPlatformChallenge";
}

impl Encode for ServerPlatformChallenge {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u32(0); // connectFlags, reserved
        encode_blob(dst, BlobType::Any, &self.encrypted_platform_challenge)?;
        dst.write_slice(&self.mac_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        4 + blob_size(&self.encrypted_platform_challenge) + MAC_SIZE
    }
}

impl<'de> Decode<'de> for ServerPlatformChallenge {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 4);
        let _connect_flags = src.read_u32();

        let encrypted_platform_challenge = decode_blob(src, BlobType::Any)?.to_vec();

        ensure_size!(in: src, size: MAC_SIZE);
        let mac_data = src.read_array();

        Ok(Self {
            encrypted_platform_challenge,
            mac_data,
        })
    }
}

/// CLIENT_PLATFORM_CHALLENGE_RESPONSE ([MS-RDPELE] 2.2.2.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPlatformChallengeResponse {
    pub encrypted_challenge_response_data: Vec<u8>,
    pub encrypted_hwid: Vec<u8>,
    pub mac_data: [u8; MAC_SIZE],
}

impl ClientPlatformChallengeResponse {
    const NAME: &'static str = "ClientPlatformChallengeResponse";
}

impl Encode for ClientPlatformChallengeResponse {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        encode_blob(dst, BlobType::EncryptedData, &self.encrypted_challenge_response_data)?;
        encode_blob(dst, BlobType::EncryptedData, &self.encrypted_hwid)?;
        dst.write_slice(&self.mac_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        blob_size(&self.encrypted_challenge_response_data) + blob_size(&self.encrypted_hwid) + MAC_SIZE
    }
}

impl<'de> Decode<'de> for ClientPlatformChallengeResponse {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let encrypted_challenge_response_data = decode_blob(src, BlobType::EncryptedData)?.to_vec();
        let encrypted_hwid = decode_blob(src, BlobType::EncryptedData)?.to_vec();

        ensure_size!(in: src, size: MAC_SIZE);
        let mac_data = src.read_array();

        Ok(Self {
            encrypted_challenge_response_data,
            encrypted_hwid,
            mac_data,
        })
    }
}

/// SERVER_NEW_LICENSE / SERVER_UPGRADE_LICENSE ([MS-RDPELE] 2.2.2.6/2.2.2.7);
/// both carry the same body, the preamble type tells them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNewLicense {
    pub encrypted_license_info: Vec<u8>,
    pub mac_data: [u8; MAC_SIZE],
}

impl ServerNewLicense {
    const NAME: &'static str = "ServerNewLicense";
}

impl Encode for ServerNewLicense {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        encode_blob(dst, BlobType::EncryptedData, &self.encrypted_license_info)?;
        dst.write_slice(&self.mac_data);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        blob_size(&self.encrypted_license_info) + MAC_SIZE
    }
}

impl<'de> Decode<'de> for ServerNewLicense {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let encrypted_license_info = decode_blob(src, BlobType::EncryptedData)?.to_vec();

        ensure_size!(in: src, size: MAC_SIZE);
        let mac_data = src.read_array();

        Ok(Self {
            encrypted_license_info,
            mac_data,
        })
    }
}

/// Any licensing message, dispatched by the preamble type.
#[derive(Debug, PartialEq, Eq)]
pub enum LicensePdu {
    LicensingErrorMessage(LicensingErrorMessage),
    ServerLicenseRequest(ServerLicenseRequest),
    ClientNewLicenseRequest(ClientNewLicenseRequest),
    ServerPlatformChallenge(ServerPlatformChallenge),
    ClientPlatformChallengeResponse(ClientPlatformChallengeResponse),
    ServerNewLicense(ServerNewLicense),
}

impl LicensePdu {
    const NAME: &'static str = "LicensePdu";

    fn preamble_type(&self) -> PreambleType {
        match self {
            Self::LicensingErrorMessage(_) => PreambleType::ErrorAlert,
            Self::ServerLicenseRequest(_) => PreambleType::LicenseRequest,
            Self::ClientNewLicenseRequest(_) => PreambleType::NewLicenseRequest,
            Self::ServerPlatformChallenge(_) => PreambleType::PlatformChallenge,
            Self::ClientPlatformChallengeResponse(_) => PreambleType::PlatformChallengeResponse,
            Self::ServerNewLicense(_) => PreambleType::NewLicense,
        }
    }

    fn message_size(&self) -> usize {
        match self {
            Self::LicensingErrorMessage(msg) => msg.size(),
            Self::ServerLicenseRequest(msg) => msg.size(),
            Self::ClientNewLicenseRequest(msg) => msg.size(),
            Self::ServerPlatformChallenge(msg) => msg.size(),
            Self::ClientPlatformChallengeResponse(msg) => msg.size(),
            Self::ServerNewLicense(msg) => msg.size(),
        }
    }
}

impl From<LicensingErrorMessage> for LicensePdu {
    fn from(msg: LicensingErrorMessage) -> Self {
        Self::LicensingErrorMessage(msg)
    }
}

impl Encode for LicensePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        let header = LicenseHeader::for_message(self.preamble_type(), self.message_size())?;
        header.encode(dst)?;

        match self {
            Self::LicensingErrorMessage(msg) => msg.encode(dst),
            Self::ServerLicenseRequest(msg) => msg.encode(dst),
            Self::ClientNewLicenseRequest(msg) => msg.encode(dst),
            Self::ServerPlatformChallenge(msg) => msg.encode(dst),
            Self::ClientPlatformChallengeResponse(msg) => msg.encode(dst),
            Self::ServerNewLicense(msg) => msg.encode(dst),
        }
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        LicenseHeader::FIXED_PART_SIZE + self.message_size()
    }
}

impl<'de> Decode<'de> for LicensePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let header = LicenseHeader::decode(src)?;

        match header.preamble_message_type {
            PreambleType::ErrorAlert => Ok(Self::LicensingErrorMessage(LicensingErrorMessage::decode(src)?)),
            PreambleType::LicenseRequest => Ok(Self::ServerLicenseRequest(ServerLicenseRequest::decode(src)?)),
            PreambleType::NewLicenseRequest => Ok(Self::ClientNewLicenseRequest(ClientNewLicenseRequest::decode(src)?)),
            PreambleType::PlatformChallenge => Ok(Self::ServerPlatformChallenge(ServerPlatformChallenge::decode(src)?)),
            PreambleType::PlatformChallengeResponse => Ok(Self::ClientPlatformChallengeResponse(
                ClientPlatformChallengeResponse::decode(src)?,
            )),
            PreambleType::NewLicense | PreambleType::UpgradeLicense => {
                Ok(Self::ServerNewLicense(ServerNewLicense::decode(src)?))
            }
            PreambleType::LicenseInfo => Err(unsupported_value_err(
                Self::NAME,
                "preambleType",
                "LicenseInfo".to_owned(),
            )),
        }
    }
}

/// Computes the MS-RDPELE MAC over `data` with the given salt key
/// ([MS-RDPELE] 2.2.2.9, "MACData generation").
pub fn compute_mac_data(mac_salt_key: &[u8], data: &[u8]) -> Vec<u8> {
    let data_len_buffer = u32::try_from(data.len()).unwrap_or(u32::MAX).to_le_bytes();

    let pad_one: [u8; 40] = [0x36; 40];

    let mut hasher = sha1::Sha1::new();
    hasher.update(
        [mac_salt_key, pad_one.as_ref(), data_len_buffer.as_ref(), data]
            .concat()
            .as_slice(),
    );
    let sha_result = hasher.finalize();

    let pad_two: [u8; 48] = [0x5c; 48];

    let mut md5 = md5::Md5::new();
    md5.update([mac_salt_key, pad_two.as_ref(), sha_result.as_ref()].concat().as_slice());

    md5.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn valid_client_error_wire() {
        let pdu: LicensePdu = LicensingErrorMessage::new_valid_client().into();

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(
            encoded,
            [
                0x80, 0x00, 0x00, 0x00, // security header, LICENSE_PKT
                0xff, 0x03, 0x10, 0x00, // preamble: ERROR_ALERT, v3, size 16
                0x07, 0x00, 0x00, 0x00, // STATUS_VALID_CLIENT
                0x02, 0x00, 0x00, 0x00, // ST_NO_TRANSITION
                0x04, 0x00, 0x00, 0x00, // empty error blob
            ]
        );

        let decoded: LicensePdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn server_license_request_round_trip() {
        let pdu = LicensePdu::ServerLicenseRequest(ServerLicenseRequest {
            server_random: [0x11; RANDOM_NUMBER_SIZE],
            product_info: ProductInfo {
                version: 0x0006_0000,
                company_name: "Microsoft Corporation".into(),
                product_id: "A02".into(),
            },
            server_certificate: vec![0xAA; 32],
            scopes: vec!["microsoft.com".into()],
        });

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());

        let decoded: LicensePdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn new_license_request_round_trip() {
        let pdu = LicensePdu::ClientNewLicenseRequest(ClientNewLicenseRequest {
            key_exchange_algorithm: KEY_EXCHANGE_ALGORITHM_RSA,
            platform_id: PLATFORM_ID,
            client_random: [0x22; RANDOM_NUMBER_SIZE],
            encrypted_premaster_secret: vec![0x33; PREMASTER_SECRET_SIZE],
            client_username: "user".into(),
            client_machine_name: "TESTBOX".into(),
        });

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: LicensePdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn mac_is_stable() {
        let mac = compute_mac_data(&[0u8; 16], b"some data");
        assert_eq!(mac.len(), MAC_SIZE);
        // same inputs, same MAC
        assert_eq!(mac, compute_mac_data(&[0u8; 16], b"some data"));
        assert_ne!(mac, compute_mac_data(&[1u8; 16], b"some data"));
    }
}
