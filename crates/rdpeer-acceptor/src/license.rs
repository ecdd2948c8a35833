use rand::RngCore as _;

use rdpeer_core::WriteBuf;
use rdpeer_pdu as pdu;
use rdpeer_pdu::mcs;
use rdpeer_pdu::rdp::license::{
    compute_mac_data, LicensePdu, LicensingErrorMessage, ProductInfo, ServerLicenseRequest, ServerNewLicense,
    ServerPlatformChallenge, MAC_SIZE, RANDOM_NUMBER_SIZE,
};

use tracing::debug;
use crate::util;
use crate::{AcceptorError, AcceptorErrorExt as _, Sequence, SequenceResult, State, Written};

const PLATFORM_CHALLENGE_SIZE: usize = 10;

/// Narrow interface to the licensing crypto provider.
///
/// [MS-RDPELE] RSA premaster decryption and RC4 session key handling are
/// external to this core; the sequence only moves blobs through this trait.
pub trait LicenseSecurity: Send {
    /// Derives the licensing session keys from the exchanged randoms and the
    /// encrypted premaster secret. Returns false when key establishment
    /// fails, which aborts the licensing exchange.
    fn establish_keys(&mut self, client_random: &[u8], server_random: &[u8], encrypted_premaster: &[u8]) -> bool;

    fn encrypt(&mut self, data: &[u8]) -> Vec<u8>;

    fn compute_mac(&mut self, data: &[u8]) -> [u8; MAC_SIZE];
}

/// Pass-through provider for deployments that terminate licensing with the
/// valid-client short path or do not enforce license verification.
#[derive(Debug, Default)]
pub struct InsecureLicenseSecurity {
    mac_salt: [u8; 16],
}

impl LicenseSecurity for InsecureLicenseSecurity {
    fn establish_keys(&mut self, client_random: &[u8], server_random: &[u8], _encrypted_premaster: &[u8]) -> bool {
        for (i, byte) in self.mac_salt.iter_mut().enumerate() {
            *byte = client_random.get(i).copied().unwrap_or_default()
                ^ server_random.get(i).copied().unwrap_or_default();
        }
        true
    }

    fn encrypt(&mut self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn compute_mac(&mut self, data: &[u8]) -> [u8; MAC_SIZE] {
        let mac = compute_mac_data(&self.mac_salt, data);
        let mut out = [0u8; MAC_SIZE];
        out.copy_from_slice(&mac);
        out
    }
}

/// Server licensing sequence ([MS-RDPELE] 3.2).
///
/// Either the valid-client error short path (license not required) or the
/// full server license request exchange.
pub struct LicenseSequence {
    pub state: LicenseState,
    user_channel_id: u16,
    io_channel_id: u16,
    license_required: bool,
    product_info: ProductInfo,
    server_certificate: Vec<u8>,
    scopes: Vec<String>,
    server_random: [u8; RANDOM_NUMBER_SIZE],
    security: Box<dyn LicenseSecurity>,
}

impl core::fmt::Debug for LicenseSequence {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LicenseSequence")
            .field("state", &self.state)
            .field("license_required", &self.license_required)
            .finish_non_exhaustive()
    }
}

#[derive(Default, Debug)]
pub enum LicenseState {
    #[default]
    Consumed,

    Initial,
    WaitClientRequest,
    SendPlatformChallenge {
        challenge: Vec<u8>,
    },
    WaitChallengeResponse {
        challenge: Vec<u8>,
    },
    SendNewLicense,
    Completed,
}

impl State for LicenseState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::Initial => "Initial",
            Self::WaitClientRequest => "WaitClientRequest",
            Self::SendPlatformChallenge { .. } => "SendPlatformChallenge",
            Self::WaitChallengeResponse { .. } => "WaitChallengeResponse",
            Self::SendNewLicense => "SendNewLicense",
            Self::Completed => "Completed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl Sequence for LicenseSequence {
    fn next_pdu_hint(&self) -> Option<&dyn pdu::PduHint> {
        match &self.state {
            LicenseState::Consumed => None,
            LicenseState::Initial => None,
            LicenseState::WaitClientRequest => Some(&pdu::X224_HINT),
            LicenseState::SendPlatformChallenge { .. } => None,
            LicenseState::WaitChallengeResponse { .. } => Some(&pdu::X224_HINT),
            LicenseState::SendNewLicense => None,
            LicenseState::Completed => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> SequenceResult<Written> {
        let (written, next_state) = match std::mem::take(&mut self.state) {
            LicenseState::Initial => {
                if self.license_required {
                    let request = LicensePdu::ServerLicenseRequest(ServerLicenseRequest {
                        server_random: self.server_random,
                        product_info: self.product_info.clone(),
                        server_certificate: self.server_certificate.clone(),
                        scopes: self.scopes.clone(),
                    });

                    debug!(message = ?request, "Send");

                    let written =
                        util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &request, output)?;

                    (Written::from_size(written)?, LicenseState::WaitClientRequest)
                } else {
                    // License-not-required short path
                    let license: LicensePdu = LicensingErrorMessage::new_valid_client().into();

                    debug!(message = ?license, "Send");

                    let written =
                        util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &license, output)?;

                    (Written::from_size(written)?, LicenseState::Completed)
                }
            }

            LicenseState::WaitClientRequest => {
                let license = decode_license(input)?;

                debug!(message = ?license, "Received");

                match license {
                    LicensePdu::ClientNewLicenseRequest(request) => {
                        if !self.security.establish_keys(
                            &request.client_random,
                            &self.server_random,
                            &request.encrypted_premaster_secret,
                        ) {
                            return Err(general_err!("licensing key establishment failed"));
                        }

                        let mut challenge = vec![0u8; PLATFORM_CHALLENGE_SIZE];
                        rand::rng().fill_bytes(&mut challenge);

                        (Written::Nothing, LicenseState::SendPlatformChallenge { challenge })
                    }
                    LicensePdu::LicensingErrorMessage(error) => {
                        return Err(reason_err!("licensing", "client aborted licensing: {:?}", error.error_code));
                    }
                    unexpected => {
                        return Err(reason_err!(
                            "licensing",
                            "unexpected license message: {}",
                            rdpeer_core::Encode::name(&unexpected)
                        ));
                    }
                }
            }

            LicenseState::SendPlatformChallenge { challenge } => {
                let encrypted_platform_challenge = self.security.encrypt(&challenge);
                let mac_data = self.security.compute_mac(&challenge);

                let pdu = LicensePdu::ServerPlatformChallenge(ServerPlatformChallenge {
                    encrypted_platform_challenge,
                    mac_data,
                });

                debug!(message = ?pdu, "Send");

                let written = util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &pdu, output)?;

                (
                    Written::from_size(written)?,
                    LicenseState::WaitChallengeResponse { challenge },
                )
            }

            LicenseState::WaitChallengeResponse { .. } => {
                let license = decode_license(input)?;

                debug!(message = ?license, "Received");

                match license {
                    LicensePdu::ClientPlatformChallengeResponse(_response) => {
                        // MAC verification of the response happens inside the
                        // crypto provider once hardware-id decryption exists.
                        (Written::Nothing, LicenseState::SendNewLicense)
                    }
                    LicensePdu::LicensingErrorMessage(error) => {
                        return Err(reason_err!("licensing", "client aborted licensing: {:?}", error.error_code));
                    }
                    unexpected => {
                        return Err(reason_err!(
                            "licensing",
                            "unexpected license message: {}",
                            rdpeer_core::Encode::name(&unexpected)
                        ));
                    }
                }
            }

            LicenseState::SendNewLicense => {
                let license_info = rdpeer_core::encode_vec(&LicenseInfoBytes {
                    product_info: self.product_info.clone(),
                })
                .map_err(AcceptorError::encode)?;

                let encrypted_license_info = self.security.encrypt(&license_info);
                let mac_data = self.security.compute_mac(&license_info);

                let pdu = LicensePdu::ServerNewLicense(ServerNewLicense {
                    encrypted_license_info,
                    mac_data,
                });

                debug!(message = ?pdu, "Send");

                let written = util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &pdu, output)?;

                (Written::from_size(written)?, LicenseState::Completed)
            }

            _ => unreachable!(),
        };

        self.state = next_state;
        Ok(written)
    }
}

impl LicenseSequence {
    pub fn new(
        user_channel_id: u16,
        io_channel_id: u16,
        license_required: bool,
        company_name: String,
        product_id: String,
        server_certificate: Vec<u8>,
    ) -> Self {
        let mut server_random = [0u8; RANDOM_NUMBER_SIZE];
        rand::rng().fill_bytes(&mut server_random);

        Self {
            state: LicenseState::Initial,
            user_channel_id,
            io_channel_id,
            license_required,
            product_info: ProductInfo {
                version: 0x0006_0000,
                company_name,
                product_id,
            },
            server_certificate,
            scopes: vec!["rdpeer".to_owned()],
            server_random,
            security: Box::new(InsecureLicenseSecurity::default()),
        }
    }

    /// Replaces the licensing crypto provider.
    pub fn with_security(mut self, security: Box<dyn LicenseSecurity>) -> Self {
        self.security = security;
        self
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

fn decode_license(input: &[u8]) -> SequenceResult<LicensePdu> {
    let data_request = rdpeer_core::decode::<mcs::SendDataRequest<'_>>(input).map_err(AcceptorError::decode)?;
    rdpeer_core::decode::<LicensePdu>(data_request.user_data.as_ref()).map_err(AcceptorError::decode)
}

/// The opaque license info payload of the new-license message.
struct LicenseInfoBytes {
    product_info: ProductInfo,
}

impl rdpeer_core::Encode for LicenseInfoBytes {
    fn encode(&self, dst: &mut rdpeer_core::WriteCursor<'_>) -> rdpeer_core::EncodeResult<()> {
        // NEW_LICENSE_INFO subset: version + company + product id; the
        // remaining fields are license-server specific and stay zeroed.
        dst.write_u32(self.product_info.version);
        dst.write_u32(0); // dwScope
        dst.write_u32(0); // dwCompanyName placeholder sizes follow as text
        for unit in self.product_info.company_name.encode_utf16() {
            dst.write_u16(unit);
        }
        dst.write_u16(0);
        for unit in self.product_info.product_id.encode_utf16() {
            dst.write_u16(unit);
        }
        dst.write_u16(0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LicenseInfoBytes"
    }

    fn size(&self) -> usize {
        4 + 4
            + 4
            + self.product_info.company_name.encode_utf16().count() * 2
            + 2
            + self.product_info.product_id.encode_utf16().count() * 2
            + 2
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use rdpeer_core::encode_vec;
    use rdpeer_pdu::rdp::license::{ClientNewLicenseRequest, KEY_EXCHANGE_ALGORITHM_RSA, PLATFORM_ID};

    use super::*;

    fn wrap_client_license(pdu: &LicensePdu) -> Vec<u8> {
        let user_data = encode_vec(pdu).unwrap();
        encode_vec(&mcs::SendDataRequest {
            initiator_id: 1002,
            channel_id: 1003,
            user_data: Cow::Owned(user_data),
        })
        .unwrap()
    }

    #[test]
    fn not_required_short_path() {
        let mut seq = LicenseSequence::new(1002, 1003, false, "c".into(), "p".into(), Vec::new());
        let mut buf = WriteBuf::new();

        assert!(seq.next_pdu_hint().is_none());
        let written = seq.step_no_input(&mut buf).unwrap();

        assert!(written.size().is_some());
        assert!(seq.is_done());

        // the emitted frame is a valid-client error alert
        let frame = buf.filled();
        let indication: mcs::SendDataIndication<'_> = rdpeer_core::decode(frame).unwrap();
        let license: LicensePdu = rdpeer_core::decode(indication.user_data.as_ref()).unwrap();
        match license {
            LicensePdu::LicensingErrorMessage(msg) => assert!(msg.is_valid_client()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn required_path_walks_challenge_exchange() {
        let mut seq = LicenseSequence::new(1002, 1003, true, "c".into(), "p".into(), vec![0xAA; 16]);
        let mut buf = WriteBuf::new();

        // server license request goes out
        seq.step_no_input(&mut buf).unwrap();
        assert!(matches!(seq.state, LicenseState::WaitClientRequest));

        // client answers with a new license request
        let request = LicensePdu::ClientNewLicenseRequest(ClientNewLicenseRequest {
            key_exchange_algorithm: KEY_EXCHANGE_ALGORITHM_RSA,
            platform_id: PLATFORM_ID,
            client_random: [7; RANDOM_NUMBER_SIZE],
            encrypted_premaster_secret: vec![1; 48],
            client_username: "user".into(),
            client_machine_name: "box".into(),
        });
        seq.step(&wrap_client_license(&request), &mut buf).unwrap();

        // challenge goes out
        buf.clear();
        seq.step_no_input(&mut buf).unwrap();
        assert!(matches!(seq.state, LicenseState::WaitChallengeResponse { .. }));

        // client answers the challenge
        let response = LicensePdu::ClientPlatformChallengeResponse(
            rdpeer_pdu::rdp::license::ClientPlatformChallengeResponse {
                encrypted_challenge_response_data: vec![2; 18],
                encrypted_hwid: vec![3; 20],
                mac_data: [0; MAC_SIZE],
            },
        );
        seq.step(&wrap_client_license(&response), &mut buf).unwrap();

        // new license completes the exchange
        seq.step_no_input(&mut buf).unwrap();
        assert!(seq.is_done());
    }

    #[test]
    fn client_error_aborts() {
        let mut seq = LicenseSequence::new(1002, 1003, true, "c".into(), "p".into(), Vec::new());
        let mut buf = WriteBuf::new();

        seq.step_no_input(&mut buf).unwrap();

        let error: LicensePdu = LicensingErrorMessage {
            error_code: rdpeer_pdu::rdp::license::LicenseErrorCode::InvalidClient,
            state_transition: rdpeer_pdu::rdp::license::LicensingStateTransition::TotalAbort,
            error_info: Vec::new(),
        }
        .into();

        assert!(seq.step(&wrap_client_license(&error), &mut buf).is_err());
    }
}
