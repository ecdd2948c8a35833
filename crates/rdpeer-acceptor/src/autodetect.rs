use rand::RngCore as _;

use rdpeer_core::WriteBuf;
use rdpeer_pdu as pdu;
use rdpeer_pdu::mcs;
use rdpeer_pdu::rdp::autodetect::{AutoDetectRequest, AutoDetectRequestPdu, AutoDetectResponse, AutoDetectResponsePdu};

use tracing::{debug, warn};
use crate::util;
use crate::{AcceptorError, AcceptorErrorExt as _, Sequence, SequenceResult, State, Written};

const BANDWIDTH_PAYLOAD_SIZE: usize = 1024;

/// Figures the embedding peer measured and wants forwarded to the client.
///
/// The sequence itself never interprets them: bandwidth and RTT values are
/// opaque counters filled in by whoever owns a clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkMeasurements {
    pub base_rtt: u32,
    pub bandwidth: u32,
    pub average_rtt: u32,
}

/// Connect-time auto-detect: RTT probe, bandwidth probe, then the network
/// characteristics result.
#[derive(Debug)]
pub struct AutodetectSequence {
    state: AutodetectState,
    user_channel_id: u16,
    channel_id: u16,
    sequence_number: u16,
    measurements: NetworkMeasurements,

    /// Raw client-reported bandwidth counters, untouched.
    pub last_results: Option<(u32, u32)>,
}

#[derive(Default, Debug)]
pub enum AutodetectState {
    #[default]
    Consumed,

    SendRttMeasure,
    WaitRttResponse,
    SendBandwidthMeasure,
    WaitBandwidthResults,
    SendNetworkCharacteristics,
    Complete,
}

impl State for AutodetectState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::SendRttMeasure => "SendRttMeasure",
            Self::WaitRttResponse => "WaitRttResponse",
            Self::SendBandwidthMeasure => "SendBandwidthMeasure",
            Self::WaitBandwidthResults => "WaitBandwidthResults",
            Self::SendNetworkCharacteristics => "SendNetworkCharacteristics",
            Self::Complete => "Complete",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl Sequence for AutodetectSequence {
    fn next_pdu_hint(&self) -> Option<&dyn pdu::PduHint> {
        match &self.state {
            AutodetectState::Consumed => None,
            AutodetectState::SendRttMeasure => None,
            AutodetectState::WaitRttResponse => Some(&pdu::X224_HINT),
            AutodetectState::SendBandwidthMeasure => None,
            AutodetectState::WaitBandwidthResults => Some(&pdu::X224_HINT),
            AutodetectState::SendNetworkCharacteristics => None,
            AutodetectState::Complete => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> SequenceResult<Written> {
        let (written, next_state) = match std::mem::take(&mut self.state) {
            AutodetectState::SendRttMeasure => {
                let request = AutoDetectRequestPdu::new(AutoDetectRequest::RttMeasure {
                    sequence_number: self.next_sequence_number(),
                });

                debug!(message = ?request, "Send");

                let written =
                    util::encode_send_data_indication(self.user_channel_id, self.channel_id, &request, output)?;

                (Written::from_size(written)?, AutodetectState::WaitRttResponse)
            }

            AutodetectState::WaitRttResponse => {
                let response = decode_response(input)?;

                debug!(message = ?response, "Received");

                match response.response {
                    AutoDetectResponse::RttMeasure { .. } => (Written::Nothing, AutodetectState::SendBandwidthMeasure),
                    other => {
                        warn!(message = ?other, "Unexpected auto-detect response, still waiting for the RTT echo");
                        (Written::Nothing, AutodetectState::WaitRttResponse)
                    }
                }
            }

            AutodetectState::SendBandwidthMeasure => {
                // start, then stop carrying the probe payload
                let start = AutoDetectRequestPdu::new(AutoDetectRequest::BandwidthMeasureStart {
                    sequence_number: self.next_sequence_number(),
                });

                debug!(message = ?start, "Send");

                let mut written =
                    util::encode_send_data_indication(self.user_channel_id, self.channel_id, &start, output)?;

                let mut payload = vec![0u8; BANDWIDTH_PAYLOAD_SIZE];
                rand::rng().fill_bytes(&mut payload);
                let stop = AutoDetectRequestPdu::new(AutoDetectRequest::BandwidthMeasureStop {
                    sequence_number: self.next_sequence_number(),
                    payload,
                });

                debug!(message = "BandwidthMeasureStop", "Send");

                written += util::encode_send_data_indication(self.user_channel_id, self.channel_id, &stop, output)?;

                (Written::from_size(written)?, AutodetectState::WaitBandwidthResults)
            }

            AutodetectState::WaitBandwidthResults => {
                let response = decode_response(input)?;

                debug!(message = ?response, "Received");

                match response.response {
                    AutoDetectResponse::BandwidthMeasureResults {
                        time_delta, byte_count, ..
                    } => {
                        self.last_results = Some((time_delta, byte_count));
                        (Written::Nothing, AutodetectState::SendNetworkCharacteristics)
                    }
                    other => {
                        warn!(message = ?other, "Unexpected auto-detect response, still waiting for bandwidth results");
                        (Written::Nothing, AutodetectState::WaitBandwidthResults)
                    }
                }
            }

            AutodetectState::SendNetworkCharacteristics => {
                let request = AutoDetectRequestPdu::new(AutoDetectRequest::NetworkCharacteristicsResult {
                    sequence_number: self.next_sequence_number(),
                    base_rtt: self.measurements.base_rtt,
                    bandwidth: self.measurements.bandwidth,
                    average_rtt: self.measurements.average_rtt,
                });

                debug!(message = ?request, "Send");

                let written =
                    util::encode_send_data_indication(self.user_channel_id, self.channel_id, &request, output)?;

                (Written::from_size(written)?, AutodetectState::Complete)
            }

            _ => unreachable!(),
        };

        self.state = next_state;
        Ok(written)
    }
}

impl AutodetectSequence {
    /// `channel_id` is the MCS message channel when one was negotiated, the
    /// IO channel otherwise.
    pub fn new(user_channel_id: u16, channel_id: u16) -> Self {
        Self {
            state: AutodetectState::SendRttMeasure,
            user_channel_id,
            channel_id,
            sequence_number: 0,
            measurements: NetworkMeasurements::default(),
            last_results: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Called by the embedding peer before the final request goes out; the
    /// values are forwarded verbatim.
    pub fn set_measurements(&mut self, measurements: NetworkMeasurements) {
        self.measurements = measurements;
    }

    fn next_sequence_number(&mut self) -> u16 {
        let current = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        current
    }
}

fn decode_response(input: &[u8]) -> SequenceResult<AutoDetectResponsePdu> {
    let data_request = rdpeer_core::decode::<mcs::SendDataRequest<'_>>(input).map_err(AcceptorError::decode)?;
    rdpeer_core::decode::<AutoDetectResponsePdu>(data_request.user_data.as_ref()).map_err(AcceptorError::decode)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use rdpeer_core::encode_vec;

    use super::*;

    fn wrap_response(response: AutoDetectResponse) -> Vec<u8> {
        let user_data = encode_vec(&AutoDetectResponsePdu::new(response)).unwrap();
        encode_vec(&mcs::SendDataRequest {
            initiator_id: 1002,
            channel_id: 1004,
            user_data: Cow::Owned(user_data),
        })
        .unwrap()
    }

    #[test]
    fn full_probe_exchange() {
        let mut seq = AutodetectSequence::new(1002, 1004);
        let mut buf = WriteBuf::new();

        // RTT request out
        seq.step_no_input(&mut buf).unwrap();
        assert!(seq.next_pdu_hint().is_some());

        // RTT echo in
        seq.step(&wrap_response(AutoDetectResponse::RttMeasure { sequence_number: 0 }), &mut buf)
            .unwrap();

        // bandwidth start + stop out
        seq.step_no_input(&mut buf).unwrap();

        // results in
        seq.step(
            &wrap_response(AutoDetectResponse::BandwidthMeasureResults {
                sequence_number: 2,
                time_delta: 42,
                byte_count: 1024,
            }),
            &mut buf,
        )
        .unwrap();
        assert_eq!(seq.last_results, Some((42, 1024)));

        // network characteristics result out, then done
        seq.step_no_input(&mut buf).unwrap();
        assert!(seq.is_done());
    }

    #[test]
    fn unexpected_response_is_tolerated() {
        let mut seq = AutodetectSequence::new(1002, 1004);
        let mut buf = WriteBuf::new();

        seq.step_no_input(&mut buf).unwrap();

        // a stray network characteristics sync does not advance the probe
        seq.step(
            &wrap_response(AutoDetectResponse::NetworkCharacteristicsSync {
                sequence_number: 9,
                bandwidth: 1,
                rtt: 1,
            }),
            &mut buf,
        )
        .unwrap();

        assert!(matches!(seq.state, AutodetectState::WaitRttResponse));
    }
}
