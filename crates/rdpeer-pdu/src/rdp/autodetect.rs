//! Connect-time auto-detect PDUs ([MS-RDPBCGR] 2.2.14).
//!
//! The timing figures carried here are opaque to the connection core: they
//! are surfaced as raw counters and never interpreted.

use rdpeer_core::{
    cast_length, ensure_size, invalid_field_err, unsupported_value_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

use crate::rdp::headers::{BasicSecurityHeader, BasicSecurityHeaderFlags};

const HEADER_TYPE_ID_REQUEST: u8 = 0x00;
const HEADER_TYPE_ID_RESPONSE: u8 = 0x01;

const BASE_HEADER_SIZE: usize = 1 /* headerLength */ + 1 /* headerTypeId */ + 2 /* sequenceNumber */ + 2 /* requestType */;

const RTT_MEASURE_REQUEST: u16 = 0x0001;
const BANDWIDTH_MEASURE_START: u16 = 0x0014;
const BANDWIDTH_MEASURE_STOP: u16 = 0x002B;
const NETWORK_CHARACTERISTICS_RESULT: u16 = 0x08C0;

const RTT_MEASURE_RESPONSE: u16 = 0x0000;
const BANDWIDTH_MEASURE_RESULTS: u16 = 0x0003;
const NETWORK_CHARACTERISTICS_SYNC: u16 = 0x0018;

/// A server-to-client auto-detect request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoDetectRequest {
    RttMeasure {
        sequence_number: u16,
    },
    BandwidthMeasureStart {
        sequence_number: u16,
    },
    BandwidthMeasureStop {
        sequence_number: u16,
        payload: Vec<u8>,
    },
    NetworkCharacteristicsResult {
        sequence_number: u16,
        base_rtt: u32,
        bandwidth: u32,
        average_rtt: u32,
    },
}

impl AutoDetectRequest {
    pub fn sequence_number(&self) -> u16 {
        match self {
            Self::RttMeasure { sequence_number }
            | Self::BandwidthMeasureStart { sequence_number }
            | Self::BandwidthMeasureStop { sequence_number, .. }
            | Self::NetworkCharacteristicsResult { sequence_number, .. } => *sequence_number,
        }
    }

    fn request_type(&self) -> u16 {
        match self {
            Self::RttMeasure { .. } => RTT_MEASURE_REQUEST,
            Self::BandwidthMeasureStart { .. } => BANDWIDTH_MEASURE_START,
            Self::BandwidthMeasureStop { .. } => BANDWIDTH_MEASURE_STOP,
            Self::NetworkCharacteristicsResult { .. } => NETWORK_CHARACTERISTICS_RESULT,
        }
    }

    fn header_length(&self) -> usize {
        match self {
            Self::RttMeasure { .. } | Self::BandwidthMeasureStart { .. } => BASE_HEADER_SIZE,
            Self::BandwidthMeasureStop { .. } => BASE_HEADER_SIZE + 2,
            Self::NetworkCharacteristicsResult { .. } => BASE_HEADER_SIZE + 12,
        }
    }
}

/// The auto-detect request wrapper: security header plus one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoDetectRequestPdu {
    pub security_header: BasicSecurityHeader,
    pub request: AutoDetectRequest,
}

impl AutoDetectRequestPdu {
    const NAME: &'static str = "AutoDetectRequestPdu";

    pub fn new(request: AutoDetectRequest) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::AUTODETECT_REQ,
            },
            request,
        }
    }
}

impl Encode for AutoDetectRequestPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.security_header.encode(dst)?;

        dst.write_u8(cast_length!("headerLength", self.request.header_length())?);
        dst.write_u8(HEADER_TYPE_ID_REQUEST);
        dst.write_u16(self.request.sequence_number());
        dst.write_u16(self.request.request_type());

        match &self.request {
            AutoDetectRequest::RttMeasure { .. } | AutoDetectRequest::BandwidthMeasureStart { .. } => {}
            AutoDetectRequest::BandwidthMeasureStop { payload, .. } => {
                dst.write_u16(cast_length!("payloadLength", payload.len())?);
                dst.write_slice(payload);
            }
            AutoDetectRequest::NetworkCharacteristicsResult {
                base_rtt,
                bandwidth,
                average_rtt,
                ..
            } => {
                dst.write_u32(*base_rtt);
                dst.write_u32(*bandwidth);
                dst.write_u32(*average_rtt);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let payload = match &self.request {
            AutoDetectRequest::BandwidthMeasureStop { payload, .. } => payload.len(),
            _ => 0,
        };

        self.security_header.size() + self.request.header_length() + payload
    }
}

impl<'de> Decode<'de> for AutoDetectRequestPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::AUTODETECT_REQ) {
            return Err(invalid_field_err!("securityHeader", "expected AUTODETECT_REQ flag"));
        }

        ensure_size!(in: src, size: BASE_HEADER_SIZE);

        let _header_length = src.read_u8();
        let header_type_id = src.read_u8();
        if header_type_id != HEADER_TYPE_ID_REQUEST {
            return Err(invalid_field_err!("headerTypeId", "expected auto-detect request header"));
        }
        let sequence_number = src.read_u16();
        let request_type = src.read_u16();

        let request = match request_type {
            RTT_MEASURE_REQUEST => AutoDetectRequest::RttMeasure { sequence_number },
            BANDWIDTH_MEASURE_START => AutoDetectRequest::BandwidthMeasureStart { sequence_number },
            BANDWIDTH_MEASURE_STOP => {
                ensure_size!(in: src, size: 2);
                let payload_length = usize::from(src.read_u16());
                ensure_size!(in: src, size: payload_length);
                AutoDetectRequest::BandwidthMeasureStop {
                    sequence_number,
                    payload: src.read_slice(payload_length).to_vec(),
                }
            }
            NETWORK_CHARACTERISTICS_RESULT => {
                ensure_size!(in: src, size: 12);
                AutoDetectRequest::NetworkCharacteristicsResult {
                    sequence_number,
                    base_rtt: src.read_u32(),
                    bandwidth: src.read_u32(),
                    average_rtt: src.read_u32(),
                }
            }
            unknown => {
                return Err(unsupported_value_err(
                    Self::NAME,
                    "requestType",
                    format!("0x{unknown:04X}"),
                ))
            }
        };

        Ok(Self {
            security_header,
            request,
        })
    }
}

/// A client-to-server auto-detect response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoDetectResponse {
    RttMeasure {
        sequence_number: u16,
    },
    BandwidthMeasureResults {
        sequence_number: u16,
        time_delta: u32,
        byte_count: u32,
    },
    NetworkCharacteristicsSync {
        sequence_number: u16,
        bandwidth: u32,
        rtt: u32,
    },
}

impl AutoDetectResponse {
    pub fn sequence_number(&self) -> u16 {
        match self {
            Self::RttMeasure { sequence_number }
            | Self::BandwidthMeasureResults { sequence_number, .. }
            | Self::NetworkCharacteristicsSync { sequence_number, .. } => *sequence_number,
        }
    }

    fn response_type(&self) -> u16 {
        match self {
            Self::RttMeasure { .. } => RTT_MEASURE_RESPONSE,
            Self::BandwidthMeasureResults { .. } => BANDWIDTH_MEASURE_RESULTS,
            Self::NetworkCharacteristicsSync { .. } => NETWORK_CHARACTERISTICS_SYNC,
        }
    }

    fn header_length(&self) -> usize {
        match self {
            Self::RttMeasure { .. } => BASE_HEADER_SIZE,
            Self::BandwidthMeasureResults { .. } | Self::NetworkCharacteristicsSync { .. } => BASE_HEADER_SIZE + 8,
        }
    }
}

/// The auto-detect response wrapper: security header plus one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoDetectResponsePdu {
    pub security_header: BasicSecurityHeader,
    pub response: AutoDetectResponse,
}

impl AutoDetectResponsePdu {
    const NAME: &'static str = "AutoDetectResponsePdu";

    pub fn new(response: AutoDetectResponse) -> Self {
        Self {
            security_header: BasicSecurityHeader {
                flags: BasicSecurityHeaderFlags::AUTODETECT_RSP,
            },
            response,
        }
    }
}

impl Encode for AutoDetectResponsePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        self.security_header.encode(dst)?;

        dst.write_u8(cast_length!("headerLength", self.response.header_length())?);
        dst.write_u8(HEADER_TYPE_ID_RESPONSE);
        dst.write_u16(self.response.sequence_number());
        dst.write_u16(self.response.response_type());

        match &self.response {
            AutoDetectResponse::RttMeasure { .. } => {}
            AutoDetectResponse::BandwidthMeasureResults {
                time_delta, byte_count, ..
            } => {
                dst.write_u32(*time_delta);
                dst.write_u32(*byte_count);
            }
            AutoDetectResponse::NetworkCharacteristicsSync { bandwidth, rtt, .. } => {
                dst.write_u32(*bandwidth);
                dst.write_u32(*rtt);
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        self.security_header.size() + self.response.header_length()
    }
}

impl<'de> Decode<'de> for AutoDetectResponsePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        let security_header = BasicSecurityHeader::decode(src)?;

        if !security_header.flags.contains(BasicSecurityHeaderFlags::AUTODETECT_RSP) {
            return Err(invalid_field_err!("securityHeader", "expected AUTODETECT_RSP flag"));
        }

        ensure_size!(in: src, size: BASE_HEADER_SIZE);

        let _header_length = src.read_u8();
        let header_type_id = src.read_u8();
        if header_type_id != HEADER_TYPE_ID_RESPONSE {
            return Err(invalid_field_err!("headerTypeId", "expected auto-detect response header"));
        }
        let sequence_number = src.read_u16();
        let response_type = src.read_u16();

        let response = match response_type {
            RTT_MEASURE_RESPONSE => AutoDetectResponse::RttMeasure { sequence_number },
            BANDWIDTH_MEASURE_RESULTS => {
                ensure_size!(in: src, size: 8);
                AutoDetectResponse::BandwidthMeasureResults {
                    sequence_number,
                    time_delta: src.read_u32(),
                    byte_count: src.read_u32(),
                }
            }
            NETWORK_CHARACTERISTICS_SYNC => {
                ensure_size!(in: src, size: 8);
                AutoDetectResponse::NetworkCharacteristicsSync {
                    sequence_number,
                    bandwidth: src.read_u32(),
                    rtt: src.read_u32(),
                }
            }
            unknown => {
                return Err(unsupported_value_err(
                    Self::NAME,
                    "responseType",
                    format!("0x{unknown:04X}"),
                ))
            }
        };

        Ok(Self {
            security_header,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn rtt_request_wire() {
        let pdu = AutoDetectRequestPdu::new(AutoDetectRequest::RttMeasure { sequence_number: 0 });

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(
            encoded,
            [
                0x00, 0x10, 0x00, 0x00, // security header, AUTODETECT_REQ
                0x06, 0x00, // headerLength, headerTypeId
                0x00, 0x00, // sequenceNumber
                0x01, 0x00, // requestType = RTT Measure Request
            ]
        );

        let decoded: AutoDetectRequestPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn bandwidth_stop_with_payload_round_trip() {
        let pdu = AutoDetectRequestPdu::new(AutoDetectRequest::BandwidthMeasureStop {
            sequence_number: 3,
            payload: vec![0x55; 11],
        });

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());

        let decoded: AutoDetectRequestPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn bandwidth_results_round_trip() {
        let pdu = AutoDetectResponsePdu::new(AutoDetectResponse::BandwidthMeasureResults {
            sequence_number: 3,
            time_delta: 180,
            byte_count: 65000,
        });

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: AutoDetectResponsePdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }
}
