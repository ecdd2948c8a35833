//! Drives the whole acceptance sequence against encoded client PDUs.

use std::borrow::Cow;
use std::collections::VecDeque;

use rdpeer_acceptor::{Acceptor, AcceptorResult, DesktopSize, NlaIdentity, Sequence as _, ServerIdentity, ServerSettings, State as _};
use rdpeer_core::{encode_vec, WriteBuf};
use rdpeer_pdu::gcc::{
    ChannelDef, ChannelName, ChannelOptions, ClientCoreData, ClientCoreOptionalData, ClientEarlyCapabilityFlags,
    ClientGccBlocks, ClientNetworkData, ClientSecurityData, RdpVersion,
};
use rdpeer_pdu::mcs;
use rdpeer_pdu::nego::{ConnectionRequest, NegoRequestData, RequestFlags, SecurityProtocol};
use rdpeer_pdu::rdp::capability_sets::{
    Bitmap, CapabilitySet, ClientConfirmActive, DemandActive, General, GeneralExtraFlags, VirtualChannel,
};
use rdpeer_pdu::rdp::client_info::{ClientInfo, ClientInfoFlags, Credentials};
use rdpeer_pdu::rdp::finalization::{ControlAction, ControlPdu, FontPdu, SynchronizePdu};
use rdpeer_pdu::rdp::headers::{
    CompressionFlags, ShareControlHeader, ShareControlPdu, ShareDataHeader, ShareDataPdu, StreamPriority,
};
use rdpeer_pdu::rdp::ClientInfoPdu;
use rdpeer_pdu::x224::X224Data;

const USER_CHANNEL_ID: u16 = 1002;
const IO_CHANNEL_ID: u16 = 1003;
const RDPSND_CHANNEL_ID: u16 = 1004;

fn send_data_request(user_data: Vec<u8>) -> Vec<u8> {
    encode_vec(&mcs::SendDataRequest {
        initiator_id: USER_CHANNEL_ID,
        channel_id: IO_CHANNEL_ID,
        user_data: Cow::Owned(user_data),
    })
    .unwrap()
}

fn share_data_frame(pdu: ShareDataPdu) -> Vec<u8> {
    let header = ShareControlHeader {
        share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
            share_data_pdu: pdu,
            stream_priority: StreamPriority::Undefined,
            compression_flags: CompressionFlags::empty(),
            compression_type: 0,
        }),
        pdu_source: USER_CHANNEL_ID,
        share_id: 0x0001_0001,
    };
    send_data_request(encode_vec(&header).unwrap())
}

fn connection_request() -> Vec<u8> {
    encode_vec(&ConnectionRequest {
        nego_data: Some(NegoRequestData::cookie("tester".to_owned())),
        flags: RequestFlags::empty(),
        protocol: SecurityProtocol::RDP,
    })
    .unwrap()
}

fn connect_initial() -> Vec<u8> {
    let gcc = ClientGccBlocks {
        core: ClientCoreData {
            version: RdpVersion::V5_PLUS,
            desktop_width: 1280,
            desktop_height: 720,
            color_depth: 0xCA01,
            sas_sequence: 0xAA03,
            keyboard_layout: 0x0409,
            client_build: 18363,
            client_name: "TESTBOX".into(),
            keyboard_type: 4,
            keyboard_subtype: 0,
            keyboard_functional_keys_count: 12,
            optional_data: ClientCoreOptionalData {
                post_beta2_color_depth: Some(0xCA01),
                client_product_id: Some(1),
                serial_number: Some(0),
                high_color_depth: Some(24),
                supported_color_depths: Some(0x0007),
                early_capability_flags: Some(ClientEarlyCapabilityFlags::SUPPORT_MONITOR_LAYOUT_PDU),
                ..Default::default()
            },
        },
        security: ClientSecurityData::default(),
        network: Some(ClientNetworkData {
            channels: vec![ChannelDef {
                name: ChannelName::from_str("rdpsnd").unwrap(),
                options: ChannelOptions::INITIALIZED,
            }],
        }),
        monitor: None,
        multi_transport: None,
    };

    let initial = mcs::ConnectInitial::with_gcc_blocks(gcc);
    let payload = encode_vec(&initial).unwrap();
    encode_vec(&X224Data {
        data: Cow::Owned(payload),
    })
    .unwrap()
}

fn channel_join(channel_id: u16) -> Vec<u8> {
    encode_vec(&mcs::ChannelJoinRequest {
        initiator_id: USER_CHANNEL_ID,
        channel_id,
    })
    .unwrap()
}

fn client_info() -> Vec<u8> {
    let info = ClientInfo {
        code_page: 0,
        flags: ClientInfoFlags::UNICODE | ClientInfoFlags::MOUSE,
        compression_type: 0,
        credentials: Credentials {
            username: "tester".into(),
            password: "hunter2".into(),
            domain: None,
        },
        alternate_shell: String::new(),
        working_dir: String::new(),
        extra_info: None,
    };

    send_data_request(encode_vec(&ClientInfoPdu::new(info)).unwrap())
}

fn confirm_active() -> Vec<u8> {
    let confirm = ShareControlHeader {
        share_control_pdu: ShareControlPdu::ClientConfirmActive(ClientConfirmActive {
            pdu: DemandActive {
                source_descriptor: "MSTSC".into(),
                capability_sets: vec![
                    CapabilitySet::General(General {
                        major_platform_type: 1,
                        minor_platform_type: 3,
                        extra_flags: GeneralExtraFlags::FASTPATH_OUTPUT_SUPPORTED,
                        refresh_rect_support: true,
                        suppress_output_support: true,
                    }),
                    CapabilitySet::Bitmap(Bitmap {
                        preferred_bits_per_pixel: 32,
                        desktop_width: 1280,
                        desktop_height: 720,
                        desktop_resize_flag: true,
                        drawing_flags: 0,
                    }),
                    CapabilitySet::VirtualChannel(VirtualChannel {
                        flags: 0,
                        chunk_size: Some(1600),
                    }),
                ],
            },
            share_id: 0x0001_0001,
            originator_id: 0x03EA,
        }),
        pdu_source: USER_CHANNEL_ID,
        share_id: 0x0001_0001,
    };

    send_data_request(encode_vec(&confirm).unwrap())
}

fn finalization_frames() -> Vec<Vec<u8>> {
    vec![
        share_data_frame(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 0 })),
        share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::Cooperate,
            grant_id: 0,
            control_id: 0,
        })),
        share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::RequestControl,
            grant_id: 0,
            control_id: 0,
        })),
        share_data_frame(ShareDataPdu::FontList(FontPdu::default())),
    ]
}

fn drive(acceptor: &mut Acceptor, mut client_frames: VecDeque<Vec<u8>>) -> (AcceptorResult, Vec<&'static str>) {
    let mut buf = WriteBuf::new();
    let mut visited = Vec::new();
    let mut guard = 0;

    loop {
        guard += 1;
        assert!(guard < 256, "sequence did not converge");

        let name = acceptor.state().name();
        if visited.last() != Some(&name) {
            visited.push(name);
        }

        if acceptor.reached_security_upgrade().is_some() {
            acceptor.mark_security_upgrade_as_done();
            continue;
        }

        if let Some(result) = acceptor.get_result() {
            return (result, visited);
        }

        buf.clear();
        match acceptor.next_pdu_hint() {
            Some(_) => {
                let frame = client_frames.pop_front().expect("ran out of client frames");
                acceptor.step(&frame, &mut buf).unwrap();
            }
            None => {
                acceptor.step_no_input(&mut buf).unwrap();
            }
        }
    }
}

fn standard_settings() -> ServerSettings {
    ServerSettings::new(
        DesktopSize {
            width: 1280,
            height: 720,
        },
        SecurityProtocol::RDP,
    )
    .with_identity(ServerIdentity {
        certificate_der: vec![0xAB; 32],
        supports_rdp_security: true,
    })
}

fn standard_client_frames() -> VecDeque<Vec<u8>> {
    let mut frames = VecDeque::new();
    frames.push_back(connection_request());
    frames.push_back(connect_initial());
    frames.push_back(encode_vec(&mcs::ErectDomainPdu {
        sub_height: 0,
        sub_interval: 0,
    })
    .unwrap());
    frames.push_back(encode_vec(&mcs::AttachUserRequest).unwrap());
    frames.push_back(channel_join(USER_CHANNEL_ID));
    frames.push_back(channel_join(IO_CHANNEL_ID));
    frames.push_back(channel_join(RDPSND_CHANNEL_ID));
    frames.push_back(client_info());
    frames.push_back(confirm_active());
    frames.extend(finalization_frames());
    frames
}

#[test]
fn standard_rdp_security_handshake_reaches_accepted() {
    let mut acceptor = Acceptor::new(standard_settings(), Vec::new());

    let (result, visited) = drive(&mut acceptor, standard_client_frames());

    assert!(!result.reactivation);
    assert_eq!(result.user_channel_id, USER_CHANNEL_ID);
    assert_eq!(result.io_channel_id, IO_CHANNEL_ID);
    assert_eq!(result.message_channel_id, None);
    assert_eq!(result.client_capabilities.len(), 3);
    assert_eq!(result.credentials.as_ref().unwrap().username, "tester");
    assert!(result.channels.is_joined(RDPSND_CHANNEL_ID));

    // the observed state walk is a prefix of the documented linear order
    let expected = [
        "Initial",
        "NegoWaitRequest",
        "NegoSendConfirm",
        "SecurityUpgrade",
        "McsConnectWait",
        "McsConnectSend",
        "ChannelConnection",
        "RdpSecurityCommencement",
        "SecureSettingsExchange",
        "ConnectTimeAutoDetect",
        "Licensing",
        "MultitransportRequest",
        "CapabilitiesSendServer",
        "MonitorLayoutSend",
        "CapabilitiesWaitConfirm",
        "ConnectionFinalization",
        "Accepted",
    ];
    assert_eq!(visited, expected);
}

#[test]
fn logon_event_is_raised_without_authentication() {
    let mut acceptor = Acceptor::new(standard_settings(), Vec::new());

    let (_, _) = drive(&mut acceptor, standard_client_frames());

    let logon = acceptor.take_logon_event().expect("logon event");
    assert!(!logon.automatic);
    assert!(logon.identity.is_none());
}

#[test]
fn hybrid_handshake_surfaces_the_nla_identity() {
    let mut settings = standard_settings();
    settings.security = SecurityProtocol::HYBRID | SecurityProtocol::SSL;

    let mut acceptor = Acceptor::new(settings, Vec::new());
    acceptor.attach_nla_identity(NlaIdentity {
        username: "alice".into(),
        domain: Some("CONTOSO".into()),
    });

    let mut frames = standard_client_frames();
    // the client asks for NLA this time
    frames[0] = encode_vec(&ConnectionRequest {
        nego_data: None,
        flags: RequestFlags::empty(),
        protocol: SecurityProtocol::HYBRID | SecurityProtocol::SSL,
    })
    .unwrap();

    let mut buf = WriteBuf::new();

    // walk until the external security upgrade point
    while acceptor.reached_security_upgrade().is_none() {
        buf.clear();
        match acceptor.next_pdu_hint() {
            Some(_) => {
                let frame = frames.pop_front().unwrap();
                acceptor.step(&frame, &mut buf).unwrap();
            }
            None => {
                acceptor.step_no_input(&mut buf).unwrap();
            }
        }
    }

    assert_eq!(acceptor.reached_security_upgrade(), Some(SecurityProtocol::HYBRID));

    // TLS + CredSSP run externally; afterwards the sequence resumes
    acceptor.mark_security_upgrade_as_done();

    // the logon event carries the identity, with automatic authentication
    let logon = acceptor.take_logon_event().expect("logon event");
    assert!(logon.automatic);
    assert_eq!(logon.identity.as_ref().unwrap().username, "alice");

    let (result, _) = drive(&mut acceptor, frames);
    assert_eq!(result.credentials.as_ref().unwrap().username, "tester");
}

#[test]
fn license_not_required_short_path_is_taken() {
    // ServerLicenseRequired stays false: the licensing state must emit the
    // valid-client error alert and continue without a license round-trip.
    let mut acceptor = Acceptor::new(standard_settings(), Vec::new());
    let (result, visited) = drive(&mut acceptor, standard_client_frames());

    assert!(visited.contains(&"Licensing"));
    assert!(result.input_events.is_empty());
}

#[test]
fn reactivation_reenters_capability_exchange() {
    let mut acceptor = Acceptor::new(standard_settings(), Vec::new());
    let (result, _) = drive(&mut acceptor, standard_client_frames());

    let mut reactivated = Acceptor::new_deactivation_reactivation(
        acceptor,
        result.channels,
        DesktopSize {
            width: 1920,
            height: 1080,
        },
    )
    .unwrap();

    assert_eq!(reactivated.state().name(), "CapabilitiesSendServer");

    // the client replays confirm-active and finalization; no persistent key
    // list is expected on a reactivation cycle
    let mut frames = VecDeque::new();
    frames.push_back(confirm_active());
    frames.extend(finalization_frames());

    let (result, visited) = drive(&mut reactivated, frames);

    assert!(result.reactivation);
    assert_eq!(
        visited,
        [
            "CapabilitiesSendServer",
            "MonitorLayoutSend",
            "CapabilitiesWaitConfirm",
            "ConnectionFinalization",
            "Accepted",
        ]
    );
}
