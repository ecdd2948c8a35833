use core::mem;

use rdpeer_core::{decode, WriteBuf};
use rdpeer_pdu as pdu;
use rdpeer_pdu::gcc::{
    ChannelDef, ClientEarlyCapabilityFlags, MultiTransportFlags, RdpVersion, ServerCoreData, ServerGccBlocks,
    ServerMessageChannelData, ServerMultiTransportChannelData, ServerNetworkData, ServerSecurityData,
};
use rdpeer_pdu::mcs;
use rdpeer_pdu::nego::{self, SecurityProtocol};
use rdpeer_pdu::rdp::capability_sets::{CapabilitySet, DemandActive, ServerDemandActive};
use rdpeer_pdu::rdp::client_info::Credentials;
use rdpeer_pdu::rdp::finalization::MonitorLayoutPdu;
use rdpeer_pdu::rdp::headers::{ShareControlPdu, ShareDataPdu};
use rdpeer_pdu::rdp::multitransport::{MultitransportRequestPdu, RequestedProtocol, SECURITY_COOKIE_LEN};
use rdpeer_pdu::x224::X224Data;
use rdpeer_svc::StaticChannelSet;
use rand::RngCore as _;

use tracing::{debug, warn};
use crate::autodetect::AutodetectSequence;
use crate::channel_connection::ChannelConnectionSequence;
use crate::finalization::FinalizationSequence;
use crate::license::LicenseSequence;
use crate::settings::{MonitorDef, ServerSettings};
use crate::util::{self, wrap_share_data};
use crate::{AcceptorError, AcceptorErrorExt as _, Sequence, SequenceResult, State, Written};

pub const IO_CHANNEL_ID: u16 = 1003;
pub const USER_CHANNEL_ID: u16 = 1002;

const SHARE_ID: u32 = 0x0001_0001;

/// The identity established by an external NLA (CredSSP) exchange, handed to
/// the acceptor before the sequence starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NlaIdentity {
    pub username: String,
    pub domain: Option<String>,
}

/// Raised once per connection after protocol selection, mirroring the
/// `Logon` application hook: `automatic` is true when NLA already
/// authenticated the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogonEvent {
    pub identity: Option<NlaIdentity>,
    pub automatic: bool,
}

/// Everything the peer needs to run the active phase.
#[derive(Debug)]
pub struct AcceptorResult {
    pub channels: StaticChannelSet,
    pub client_capabilities: Vec<CapabilitySet>,
    /// Frames received before activation finished; they must be dispatched
    /// as regular active-state traffic.
    pub input_events: Vec<Vec<u8>>,
    pub user_channel_id: u16,
    pub io_channel_id: u16,
    pub message_channel_id: Option<u16>,
    pub credentials: Option<Credentials>,
    pub reactivation: bool,
}

/// The server connection acceptance sequence.
pub struct Acceptor {
    pub(crate) state: AcceptorState,
    settings: ServerSettings,
    io_channel_id: u16,
    user_channel_id: u16,
    message_channel_id: Option<u16>,
    server_capabilities: Vec<CapabilitySet>,
    nla_identity: Option<NlaIdentity>,
    logon_event: Option<LogonEvent>,
    credentials: Option<Credentials>,
    encrypted_client_random: Option<Vec<u8>>,
    saved_early_capability: Option<ClientEarlyCapabilityFlags>,
    capability_exchange_done: bool,
    input_events: Vec<Vec<u8>>,
    reactivation: bool,
    share_id: u32,
}

impl core::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Acceptor")
            .field("state", &self.state)
            .field("reactivation", &self.reactivation)
            .finish_non_exhaustive()
    }
}

impl Acceptor {
    pub fn new(settings: ServerSettings, server_capabilities: Vec<CapabilitySet>) -> Self {
        Self {
            state: AcceptorState::Initial,
            settings,
            io_channel_id: IO_CHANNEL_ID,
            user_channel_id: USER_CHANNEL_ID,
            message_channel_id: None,
            server_capabilities,
            nla_identity: None,
            logon_event: None,
            credentials: None,
            encrypted_client_random: None,
            saved_early_capability: None,
            capability_exchange_done: false,
            input_events: Vec::new(),
            reactivation: false,
            share_id: SHARE_ID,
        }
    }

    /// Rebuilds the sequence for a deactivation-reactivation cycle: the MCS
    /// session survives and the machine re-enters the capability exchange
    /// with a fresh finalization flag set.
    pub fn new_deactivation_reactivation(
        consumed: Acceptor,
        channels: StaticChannelSet,
        desktop_size: crate::DesktopSize,
    ) -> SequenceResult<Self> {
        if !consumed.capability_exchange_done {
            return Err(general_err!("reactivation requires a completed capability exchange"));
        }

        let mut settings = consumed.settings;
        settings.desktop_size = desktop_size;

        let mut server_capabilities = consumed.server_capabilities;
        for cap in server_capabilities.iter_mut() {
            if let CapabilitySet::Bitmap(cap) = cap {
                cap.desktop_width = desktop_size.width;
                cap.desktop_height = desktop_size.height;
            }
        }

        Ok(Self {
            state: AcceptorState::CapabilitiesSendServer {
                early_capability: consumed.saved_early_capability,
                channels,
            },
            settings,
            io_channel_id: consumed.io_channel_id,
            user_channel_id: consumed.user_channel_id,
            message_channel_id: consumed.message_channel_id,
            server_capabilities,
            nla_identity: None,
            logon_event: None,
            credentials: consumed.credentials,
            encrypted_client_random: consumed.encrypted_client_random,
            saved_early_capability: consumed.saved_early_capability,
            capability_exchange_done: true,
            input_events: Vec::new(),
            reactivation: true,
            share_id: consumed.share_id,
        })
    }

    /// Injects the identity produced by the external CredSSP exchange; it is
    /// surfaced through the logon event when HYBRID is selected.
    pub fn attach_nla_identity(&mut self, identity: NlaIdentity) {
        self.nla_identity = Some(identity);
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn io_channel_id(&self) -> u16 {
        self.io_channel_id
    }

    pub fn user_channel_id(&self) -> u16 {
        self.user_channel_id
    }

    /// The capability sets offered in the next Demand Active, for
    /// last-minute customization by the application hook.
    pub fn server_capabilities_mut(&mut self) -> &mut Vec<CapabilitySet> {
        &mut self.server_capabilities
    }

    /// The monitor table used by the monitor layout PDU, for the
    /// adjust-monitors-layout application hook.
    pub fn monitors_mut(&mut self) -> &mut Vec<MonitorDef> {
        &mut self.settings.monitors
    }

    /// Takes the pending logon notification, if any.
    pub fn take_logon_event(&mut self) -> Option<LogonEvent> {
        self.logon_event.take()
    }

    /// The client credentials parsed from the client info PDU.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Some when the sequence is paused at the external security upgrade
    /// point (TLS handshake, then CredSSP for HYBRID).
    pub fn reached_security_upgrade(&self) -> Option<SecurityProtocol> {
        match self.state {
            AcceptorState::SecurityUpgrade { protocol, .. } => Some(protocol),
            _ => None,
        }
    }

    /// # Panics
    ///
    /// Panics if state is not [AcceptorState::SecurityUpgrade].
    pub fn mark_security_upgrade_as_done(&mut self) {
        assert!(self.reached_security_upgrade().is_some());
        self.step(&[], &mut WriteBuf::new()).expect("transition to next state");
        debug_assert!(self.reached_security_upgrade().is_none());
    }

    pub fn get_result(&mut self) -> Option<AcceptorResult> {
        match mem::take(&mut self.state) {
            AcceptorState::Accepted {
                channels,
                client_capabilities,
                input_events,
            } => Some(AcceptorResult {
                channels,
                client_capabilities,
                input_events,
                user_channel_id: self.user_channel_id,
                io_channel_id: self.io_channel_id,
                message_channel_id: self.message_channel_id,
                credentials: self.credentials.clone(),
                reactivation: self.reactivation,
            }),
            previous_state => {
                self.state = previous_state;
                None
            }
        }
    }

    fn autodetect_channel_id(&self) -> u16 {
        self.message_channel_id.unwrap_or(self.io_channel_id)
    }
}

#[derive(Default, Debug)]
pub enum AcceptorState {
    #[default]
    Consumed,

    Initial,
    NegoWaitRequest,
    NegoSendConfirm {
        requested_protocol: SecurityProtocol,
        request_flags: nego::RequestFlags,
    },
    SecurityUpgrade {
        requested_protocol: SecurityProtocol,
        protocol: SecurityProtocol,
    },
    McsConnectWait {
        requested_protocol: SecurityProtocol,
        protocol: SecurityProtocol,
    },
    McsConnectSend {
        requested_protocol: SecurityProtocol,
        protocol: SecurityProtocol,
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
    },
    ChannelConnection {
        protocol: SecurityProtocol,
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
        connection: ChannelConnectionSequence,
    },
    RdpSecurityCommencement {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
        expect_exchange: bool,
    },
    SecureSettingsExchange {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
    },
    ConnectTimeAutoDetect {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
        autodetect: Option<AutodetectSequence>,
    },
    Licensing {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
        license: LicenseSequence,
    },
    MultitransportRequest {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        client_multi_transport: MultiTransportFlags,
    },
    MultitransportWaitResponse {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
        request_id: u32,
    },
    CapabilitiesSendServer {
        early_capability: Option<ClientEarlyCapabilityFlags>,
        channels: StaticChannelSet,
    },
    MonitorLayoutSend {
        channels: StaticChannelSet,
    },
    CapabilitiesWaitConfirm {
        channels: StaticChannelSet,
    },
    ConnectionFinalization {
        channels: StaticChannelSet,
        finalization: FinalizationSequence,
        client_capabilities: Vec<CapabilitySet>,
    },
    Accepted {
        channels: StaticChannelSet,
        client_capabilities: Vec<CapabilitySet>,
        input_events: Vec<Vec<u8>>,
    },
}

impl State for AcceptorState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::Initial => "Initial",
            Self::NegoWaitRequest => "NegoWaitRequest",
            Self::NegoSendConfirm { .. } => "NegoSendConfirm",
            Self::SecurityUpgrade { .. } => "SecurityUpgrade",
            Self::McsConnectWait { .. } => "McsConnectWait",
            Self::McsConnectSend { .. } => "McsConnectSend",
            Self::ChannelConnection { .. } => "ChannelConnection",
            Self::RdpSecurityCommencement { .. } => "RdpSecurityCommencement",
            Self::SecureSettingsExchange { .. } => "SecureSettingsExchange",
            Self::ConnectTimeAutoDetect { .. } => "ConnectTimeAutoDetect",
            Self::Licensing { .. } => "Licensing",
            Self::MultitransportRequest { .. } => "MultitransportRequest",
            Self::MultitransportWaitResponse { .. } => "MultitransportWaitResponse",
            Self::CapabilitiesSendServer { .. } => "CapabilitiesSendServer",
            Self::MonitorLayoutSend { .. } => "MonitorLayoutSend",
            Self::CapabilitiesWaitConfirm { .. } => "CapabilitiesWaitConfirm",
            Self::ConnectionFinalization { .. } => "ConnectionFinalization",
            Self::Accepted { .. } => "Accepted",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl Sequence for Acceptor {
    fn next_pdu_hint(&self) -> Option<&dyn pdu::PduHint> {
        match &self.state {
            AcceptorState::Consumed => None,
            AcceptorState::Initial => None,
            AcceptorState::NegoWaitRequest => Some(&pdu::X224_HINT),
            AcceptorState::NegoSendConfirm { .. } => None,
            AcceptorState::SecurityUpgrade { .. } => None,
            AcceptorState::McsConnectWait { .. } => Some(&pdu::X224_HINT),
            AcceptorState::McsConnectSend { .. } => None,
            AcceptorState::ChannelConnection { connection, .. } => connection.next_pdu_hint(),
            AcceptorState::RdpSecurityCommencement { expect_exchange, .. } => {
                if *expect_exchange {
                    Some(&pdu::X224_HINT)
                } else {
                    None
                }
            }
            AcceptorState::SecureSettingsExchange { .. } => Some(&pdu::X224_HINT),
            AcceptorState::ConnectTimeAutoDetect { autodetect, .. } => {
                autodetect.as_ref().and_then(|seq| seq.next_pdu_hint())
            }
            AcceptorState::Licensing { license, .. } => license.next_pdu_hint(),
            AcceptorState::MultitransportRequest { .. } => None,
            AcceptorState::MultitransportWaitResponse { .. } => Some(&pdu::X224_HINT),
            AcceptorState::CapabilitiesSendServer { .. } => None,
            AcceptorState::MonitorLayoutSend { .. } => None,
            AcceptorState::CapabilitiesWaitConfirm { .. } => Some(&pdu::X224_HINT),
            AcceptorState::ConnectionFinalization { finalization, .. } => finalization.next_pdu_hint(),
            AcceptorState::Accepted { .. } => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> SequenceResult<Written> {
        let prev_state = mem::take(&mut self.state);

        let (written, next_state) = match prev_state {
            AcceptorState::Initial => {
                self.settings.enforce_consistency()?;

                (Written::Nothing, AcceptorState::NegoWaitRequest)
            }

            AcceptorState::NegoWaitRequest => {
                let connection_request =
                    decode::<nego::ConnectionRequest>(input).map_err(AcceptorError::decode)?;

                debug!(message = ?connection_request, "Received");

                (
                    Written::Nothing,
                    AcceptorState::NegoSendConfirm {
                        requested_protocol: connection_request.protocol,
                        request_flags: connection_request.flags,
                    },
                )
            }

            AcceptorState::NegoSendConfirm {
                requested_protocol,
                request_flags,
            } => {
                let protocols = requested_protocol & self.settings.security;
                let protocol = if protocols.intersects(SecurityProtocol::HYBRID) {
                    SecurityProtocol::HYBRID
                } else if protocols.intersects(SecurityProtocol::RDSTLS) {
                    SecurityProtocol::RDSTLS
                } else if protocols.intersects(SecurityProtocol::SSL) {
                    SecurityProtocol::SSL
                } else if self.settings.security.is_empty() {
                    SecurityProtocol::empty()
                } else {
                    let failure = nego::ConnectionConfirm::Failure {
                        code: nego::FailureCode::SSL_WITH_USER_AUTH_REQUIRED_BY_SERVER,
                    };

                    debug!(message = ?failure, "Send");

                    let _ = rdpeer_core::encode_buf(&failure, output).map_err(AcceptorError::encode)?;

                    return Err(general_err!("failed to negotiate security protocol"));
                };

                // the selection rewrites the security toggles
                self.settings.rdp_security = protocol.is_empty();
                if !self.settings.rdp_security {
                    self.settings.use_rdp_security_layer = false;
                }

                let automatic = protocol.intersects(SecurityProtocol::HYBRID);
                self.logon_event = Some(LogonEvent {
                    // the NLA state is released here; only the identity survives
                    identity: automatic.then(|| self.nla_identity.take()).flatten(),
                    automatic,
                });

                let mut flags = nego::ResponseFlags::empty();
                if request_flags.contains(nego::RequestFlags::RESTRICTED_ADMIN_MODE_REQUIRED)
                    && self.settings.restricted_admin_required
                {
                    flags |= nego::ResponseFlags::RESTRICTED_ADMIN_MODE_SUPPORTED;
                }
                if request_flags.contains(nego::RequestFlags::REDIRECTED_AUTHENTICATION_MODE_REQUIRED)
                    && self.settings.remote_credential_guard
                {
                    flags |= nego::ResponseFlags::REDIRECTED_AUTHENTICATION_MODE_SUPPORTED;
                }

                let connection_confirm = nego::ConnectionConfirm::Response { flags, protocol };

                debug!(message = ?connection_confirm, "Send");

                let written = rdpeer_core::encode_buf(&connection_confirm, output).map_err(AcceptorError::encode)?;

                (
                    Written::from_size(written)?,
                    AcceptorState::SecurityUpgrade {
                        requested_protocol,
                        protocol,
                    },
                )
            }

            AcceptorState::SecurityUpgrade {
                requested_protocol,
                protocol,
            } => {
                debug!(?requested_protocol, ?protocol);

                (
                    Written::Nothing,
                    AcceptorState::McsConnectWait {
                        requested_protocol,
                        protocol,
                    },
                )
            }

            AcceptorState::McsConnectWait {
                requested_protocol,
                protocol,
            } => {
                let x224_payload = decode::<X224Data<'_>>(input).map_err(AcceptorError::decode)?;
                let connect_initial =
                    decode::<mcs::ConnectInitial>(x224_payload.data.as_ref()).map_err(AcceptorError::decode)?;

                debug!(message = ?connect_initial, "Received");

                let gcc_blocks = connect_initial.gcc_blocks;
                let early_capability = gcc_blocks.core.optional_data.early_capability_flags;
                let client_multi_transport = gcc_blocks
                    .multi_transport
                    .map(|mt| mt.flags)
                    .unwrap_or_else(MultiTransportFlags::empty);

                if early_capability.is_some_and(|caps| caps.contains(ClientEarlyCapabilityFlags::SUPPORT_ERRINFO_PDU)) {
                    self.settings.support_error_info_pdu = true;
                }

                let channel_defs: Vec<ChannelDef> = gcc_blocks
                    .network
                    .map(|network| network.channels)
                    .unwrap_or_default();

                let channels = StaticChannelSet::from_channel_defs(&channel_defs, self.io_channel_id + 1);

                if self.settings.network_auto_detect || self.settings.support_multitransport {
                    let next_free = self.io_channel_id
                        + 1
                        + u16::try_from(channels.len()).expect("at most 31 static channels");
                    self.message_channel_id = Some(next_free);
                }

                (
                    Written::Nothing,
                    AcceptorState::McsConnectSend {
                        requested_protocol,
                        protocol,
                        early_capability,
                        channels,
                        client_multi_transport,
                    },
                )
            }

            AcceptorState::McsConnectSend {
                requested_protocol,
                protocol,
                early_capability,
                channels,
                client_multi_transport,
            } => {
                let channel_ids: Vec<u16> = channels.channel_ids().collect();

                let server_blocks = ServerGccBlocks {
                    core: ServerCoreData {
                        version: RdpVersion::V5_PLUS,
                        client_requested_protocols: Some(requested_protocol),
                        early_capability_flags: None,
                    },
                    security: ServerSecurityData::no_security(),
                    network: ServerNetworkData {
                        io_channel: self.io_channel_id,
                        channel_ids: channel_ids.clone(),
                    },
                    message_channel: self
                        .message_channel_id
                        .map(|id| ServerMessageChannelData { mcs_message_channel_id: id }),
                    multi_transport_channel: self.settings.support_multitransport.then(|| {
                        ServerMultiTransportChannelData {
                            flags: MultiTransportFlags::TRANSPORT_TYPE_UDP_FECR,
                        }
                    }),
                };

                let connect_response = mcs::ConnectResponse {
                    user_id: self.user_channel_id,
                    gcc_blocks: server_blocks,
                    called_connect_id: 1,
                    domain_parameters: mcs::DomainParameters::target(),
                };

                debug!(message = ?connect_response, "Send");

                let written = util::encode_x224_packet(&connect_response, output)?;

                let mut join_ids = channel_ids;
                if let Some(message_channel_id) = self.message_channel_id {
                    join_ids.push(message_channel_id);
                }

                (
                    Written::from_size(written)?,
                    AcceptorState::ChannelConnection {
                        protocol,
                        early_capability,
                        channels,
                        client_multi_transport,
                        connection: ChannelConnectionSequence::new(self.user_channel_id, self.io_channel_id, join_ids),
                    },
                )
            }

            AcceptorState::ChannelConnection {
                protocol,
                early_capability,
                mut channels,
                client_multi_transport,
                mut connection,
            } => {
                let written = connection.step(input, output)?;

                let state = if connection.is_done() {
                    // every requested channel has gone through channel join
                    let ids: Vec<u16> = channels.channel_ids().collect();
                    for id in ids {
                        channels.mark_joined(id);
                    }

                    // the security exchange only happens when the per-PDU
                    // security layer is actually in force
                    AcceptorState::RdpSecurityCommencement {
                        early_capability,
                        channels,
                        client_multi_transport,
                        expect_exchange: protocol.is_empty() && self.settings.use_rdp_security_layer,
                    }
                } else {
                    AcceptorState::ChannelConnection {
                        protocol,
                        early_capability,
                        channels,
                        client_multi_transport,
                        connection,
                    }
                };

                (written, state)
            }

            AcceptorState::RdpSecurityCommencement {
                early_capability,
                channels,
                client_multi_transport,
                expect_exchange,
            } => {
                if expect_exchange {
                    let x224_payload = decode::<X224Data<'_>>(input).map_err(AcceptorError::decode)?;
                    let exchange = decode::<pdu::rdp::SecurityExchangePdu>(x224_payload.data.as_ref())
                        .map_err(AcceptorError::decode)?;

                    debug!(length = exchange.encrypted_client_random.len(), "Security exchange received");

                    // Session key derivation happens in the external crypto
                    // provider; the core only retains the material.
                    self.encrypted_client_random = Some(exchange.encrypted_client_random);
                }

                (
                    Written::Nothing,
                    AcceptorState::SecureSettingsExchange {
                        early_capability,
                        channels,
                        client_multi_transport,
                    },
                )
            }

            AcceptorState::SecureSettingsExchange {
                early_capability,
                channels,
                client_multi_transport,
            } => {
                let data: mcs::SendDataRequest<'_> = decode(input).map_err(AcceptorError::decode)?;
                let client_info: pdu::rdp::ClientInfoPdu =
                    decode(data.user_data.as_ref()).map_err(AcceptorError::decode)?;

                debug!(message = ?client_info.client_info.flags, "Client info received");

                self.credentials = Some(client_info.client_info.credentials);

                let autodetect = self
                    .settings
                    .network_auto_detect
                    .then(|| AutodetectSequence::new(self.user_channel_id, self.autodetect_channel_id()));

                (
                    Written::Nothing,
                    AcceptorState::ConnectTimeAutoDetect {
                        early_capability,
                        channels,
                        client_multi_transport,
                        autodetect,
                    },
                )
            }

            AcceptorState::ConnectTimeAutoDetect {
                early_capability,
                channels,
                client_multi_transport,
                autodetect,
            } => match autodetect {
                None => (
                    Written::Nothing,
                    AcceptorState::Licensing {
                        early_capability,
                        channels,
                        client_multi_transport,
                        license: self.new_license_sequence(),
                    },
                ),
                Some(mut autodetect) => {
                    let written = autodetect.step(input, output)?;

                    let state = if autodetect.is_done() {
                        AcceptorState::Licensing {
                            early_capability,
                            channels,
                            client_multi_transport,
                            license: self.new_license_sequence(),
                        }
                    } else {
                        AcceptorState::ConnectTimeAutoDetect {
                            early_capability,
                            channels,
                            client_multi_transport,
                            autodetect: Some(autodetect),
                        }
                    };

                    (written, state)
                }
            },

            AcceptorState::Licensing {
                early_capability,
                channels,
                client_multi_transport,
                mut license,
            } => {
                let written = license.step(input, output)?;

                let state = if license.is_done() {
                    AcceptorState::MultitransportRequest {
                        early_capability,
                        channels,
                        client_multi_transport,
                    }
                } else {
                    AcceptorState::Licensing {
                        early_capability,
                        channels,
                        client_multi_transport,
                        license,
                    }
                };

                (written, state)
            }

            AcceptorState::MultitransportRequest {
                early_capability,
                channels,
                client_multi_transport,
            } => {
                let both_sides_reliable_udp = self.settings.support_multitransport
                    && client_multi_transport.contains(MultiTransportFlags::TRANSPORT_TYPE_UDP_FECR);

                if both_sides_reliable_udp {
                    let mut rng = rand::rng();
                    let request_id = rng.next_u32();
                    let mut security_cookie = [0u8; SECURITY_COOKIE_LEN];
                    rng.fill_bytes(&mut security_cookie);

                    // only reliable UDP: nobody offers lossy UDP these days
                    let request = MultitransportRequestPdu::new(request_id, RequestedProtocol::UdpFecR, security_cookie);

                    debug!(message = ?request, "Send");

                    let written = util::encode_send_data_indication(
                        self.user_channel_id,
                        self.autodetect_channel_id(),
                        &request,
                        output,
                    )?;

                    (
                        Written::from_size(written)?,
                        AcceptorState::MultitransportWaitResponse {
                            early_capability,
                            channels,
                            request_id,
                        },
                    )
                } else {
                    // transport support mismatch: straight to capabilities
                    (
                        Written::Nothing,
                        AcceptorState::CapabilitiesSendServer {
                            early_capability,
                            channels,
                        },
                    )
                }
            }

            AcceptorState::MultitransportWaitResponse {
                early_capability,
                channels,
                request_id,
            } => {
                let data: mcs::SendDataRequest<'_> = decode(input).map_err(AcceptorError::decode)?;
                let response = decode::<pdu::rdp::multitransport::MultitransportResponsePdu>(data.user_data.as_ref())
                    .map_err(AcceptorError::decode)?;

                debug!(message = ?response, "Received");

                if response.request_id != request_id {
                    warn!(
                        got = response.request_id,
                        expected = request_id,
                        "Multitransport response id mismatch"
                    );
                }

                if !response.is_success() {
                    debug!("Client could not establish the UDP transport, staying on TCP");
                }

                (
                    Written::Nothing,
                    AcceptorState::CapabilitiesSendServer {
                        early_capability,
                        channels,
                    },
                )
            }

            AcceptorState::CapabilitiesSendServer {
                early_capability,
                channels,
            } => {
                self.saved_early_capability = early_capability;
                self.capability_exchange_done = true;

                let demand_active = pdu::rdp::headers::ShareControlHeader {
                    share_id: self.share_id,
                    pdu_source: self.io_channel_id,
                    share_control_pdu: ShareControlPdu::ServerDemandActive(ServerDemandActive {
                        pdu: DemandActive {
                            source_descriptor: "RDP".to_owned(),
                            capability_sets: self.server_capabilities.clone(),
                        },
                        share_id: self.share_id,
                    }),
                };

                debug!(message = ?demand_active, "Send");

                let written = util::encode_send_data_indication(
                    self.user_channel_id,
                    self.io_channel_id,
                    &demand_active,
                    output,
                )?;

                let layout_flag = ClientEarlyCapabilityFlags::SUPPORT_MONITOR_LAYOUT_PDU;
                let next_state = if self.settings.support_monitor_layout_pdu
                    && early_capability.is_some_and(|c| c.contains(layout_flag))
                {
                    AcceptorState::MonitorLayoutSend { channels }
                } else {
                    AcceptorState::CapabilitiesWaitConfirm { channels }
                };

                (Written::from_size(written)?, next_state)
            }

            AcceptorState::MonitorLayoutSend { channels } => {
                if self.settings.monitors.is_empty() {
                    self.settings
                        .monitors
                        .push(MonitorDef::primary(self.settings.desktop_size));
                }

                let monitor_layout = ShareDataPdu::MonitorLayout(MonitorLayoutPdu {
                    monitors: self.settings.monitors.iter().map(monitor_to_wire).collect(),
                });

                debug!(message = ?monitor_layout, "Send");

                let share_data = wrap_share_data(monitor_layout, self.io_channel_id, self.share_id);

                let written =
                    util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &share_data, output)?;

                (
                    Written::from_size(written)?,
                    AcceptorState::CapabilitiesWaitConfirm { channels },
                )
            }

            AcceptorState::CapabilitiesWaitConfirm { channels } => {
                let message = decode::<mcs::McsMessage<'_>>(input).map_err(AcceptorError::decode);
                let message = match message {
                    Ok(msg) => msg,
                    Err(e) => {
                        if self.reactivation {
                            debug!("Dropping undecodable PDU during reactivation");
                            self.state = AcceptorState::CapabilitiesWaitConfirm { channels };
                            return Ok(Written::Nothing);
                        }
                        return Err(e);
                    }
                };

                match message {
                    mcs::McsMessage::SendDataRequest(data) => {
                        let confirm = decode::<pdu::rdp::headers::ShareControlHeader>(data.user_data.as_ref());

                        match confirm {
                            Ok(header) => match header.share_control_pdu {
                                ShareControlPdu::ClientConfirmActive(confirm) => {
                                    debug!(caps = confirm.pdu.capability_sets.len(), "Confirm active received");

                                    self.apply_client_capabilities(&confirm.pdu.capability_sets);

                                    let finalization = FinalizationSequence::new(
                                        self.user_channel_id,
                                        self.io_channel_id,
                                        self.share_id,
                                        self.settings.bitmap_cache_persist_enabled,
                                        self.reactivation,
                                    );

                                    (
                                        Written::Nothing,
                                        AcceptorState::ConnectionFinalization {
                                            channels,
                                            finalization,
                                            client_capabilities: confirm.pdu.capability_sets,
                                        },
                                    )
                                }
                                other => {
                                    // input or channel traffic in the
                                    // reactivation gap is normal; keep it for
                                    // the active dispatcher
                                    debug!(pdu = other.as_short_name(), "Queueing PDU while waiting for confirm active");
                                    self.input_events.push(input.to_vec());
                                    (Written::Nothing, AcceptorState::CapabilitiesWaitConfirm { channels })
                                }
                            },
                            Err(_) => {
                                self.input_events.push(input.to_vec());
                                (Written::Nothing, AcceptorState::CapabilitiesWaitConfirm { channels })
                            }
                        }
                    }

                    mcs::McsMessage::DisconnectProviderUltimatum(ultimatum) => {
                        return Err(reason_err!("received disconnect ultimatum", "{}", ultimatum.reason));
                    }

                    _ => {
                        warn!(?message, "Unexpected MCS message received");

                        (Written::Nothing, AcceptorState::CapabilitiesWaitConfirm { channels })
                    }
                }
            }

            AcceptorState::ConnectionFinalization {
                channels,
                mut finalization,
                client_capabilities,
            } => {
                let written = finalization.step(input, output)?;

                let state = if finalization.is_done() {
                    let mut input_events = mem::take(&mut self.input_events);
                    input_events.append(&mut finalization.input_events);

                    AcceptorState::Accepted {
                        channels,
                        client_capabilities,
                        input_events,
                    }
                } else {
                    AcceptorState::ConnectionFinalization {
                        channels,
                        finalization,
                        client_capabilities,
                    }
                };

                (written, state)
            }

            AcceptorState::Consumed | AcceptorState::Accepted { .. } => {
                return Err(general_err!("stepped a consumed or finished acceptor"));
            }
        };

        self.state = next_state;
        Ok(written)
    }
}

impl Acceptor {
    fn new_license_sequence(&self) -> LicenseSequence {
        let server_certificate = self
            .settings
            .server_identity
            .as_ref()
            .map(|identity| identity.certificate_der.clone())
            .unwrap_or_default();

        LicenseSequence::new(
            self.user_channel_id,
            self.io_channel_id,
            self.settings.server_license_required,
            self.settings.license_company_name.clone(),
            self.settings.license_product_id.clone(),
            server_certificate,
        )
    }

    fn apply_client_capabilities(&mut self, capability_sets: &[CapabilitySet]) {
        for capability_set in capability_sets {
            match capability_set {
                CapabilitySet::VirtualChannel(vc) => {
                    if let Some(chunk_size) = vc.chunk_size {
                        // never grow past what the server is ready to buffer
                        self.settings.vc_chunk_size = self.settings.vc_chunk_size.min(chunk_size.max(1));
                    }
                }
                CapabilitySet::Bitmap(bitmap) => {
                    debug!(
                        width = bitmap.desktop_width,
                        height = bitmap.desktop_height,
                        "Client bitmap capability"
                    );
                }
                _ => {}
            }
        }
    }
}

fn monitor_to_wire(def: &MonitorDef) -> pdu::gcc::Monitor {
    pdu::gcc::Monitor {
        left: def.x,
        top: def.y,
        right: def.x + i32::try_from(def.width).unwrap_or(i32::MAX) - 1,
        bottom: def.y + i32::try_from(def.height).unwrap_or(i32::MAX) - 1,
        flags: if def.is_primary {
            pdu::gcc::MonitorFlags::PRIMARY
        } else {
            pdu::gcc::MonitorFlags::empty()
        },
    }
}
