//! Full peer sessions over an in-memory transport: a scripted client walks
//! the handshake, then exercises the active phase.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt as _, DuplexStream, ReadHalf, WriteHalf};

use rdpeer_acceptor::{DesktopSize, ServerIdentity, ServerSettings};
use rdpeer_core::encode_vec;
use rdpeer_pdu::gcc::{
    ChannelDef, ChannelName, ChannelOptions, ClientCoreData, ClientCoreOptionalData, ClientEarlyCapabilityFlags,
    ClientGccBlocks, ClientNetworkData, ClientSecurityData, RdpVersion,
};
use rdpeer_pdu::mcs;
use rdpeer_pdu::nego::{ConnectionRequest, RequestFlags, SecurityProtocol};
use rdpeer_pdu::rdp::capability_sets::{
    Bitmap, CapabilitySet, ClientConfirmActive, DemandActive, General, GeneralExtraFlags, VirtualChannel,
};
use rdpeer_pdu::rdp::client_info::{ClientInfo, ClientInfoFlags, Credentials};
use rdpeer_pdu::rdp::finalization::{ControlAction, ControlPdu, FontPdu, SynchronizePdu};
use rdpeer_pdu::rdp::headers::{
    CompressionFlags, ShareControlHeader, ShareControlPdu, ShareDataHeader, ShareDataPdu, StreamPriority,
};
use rdpeer_pdu::rdp::vc::{ChannelControlFlags, ChannelPduHeader};
use rdpeer_pdu::rdp::ClientInfoPdu;
use rdpeer_pdu::x224::X224Data;
use rdpeer_pdu::Action;
use rdpeer_server::{Framed, NoopPeerHandler, Peer, PeerHandler};

const USER_CHANNEL_ID: u16 = 1002;
const IO_CHANNEL_ID: u16 = 1003;
const RDPSND_CHANNEL_ID: u16 = 1004;

struct Client {
    reader: Framed<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Framed::new(reader),
            writer,
        }
    }

    async fn send(&mut self, frame: &[u8]) {
        self.writer.write_all(frame).await.unwrap();
    }

    async fn next_frame(&mut self) -> (Action, Vec<u8>) {
        let (action, bytes) = self.reader.read_pdu().await.unwrap();
        (action, bytes.to_vec())
    }

    /// Reads server frames until one matches `pred`.
    async fn wait_for<F>(&mut self, mut pred: F) -> Vec<u8>
    where
        F: FnMut(&[u8]) -> bool,
    {
        for _ in 0..64 {
            let (_, frame) = self.next_frame().await;
            if pred(&frame) {
                return frame;
            }
        }
        panic!("expected server frame never arrived");
    }

    async fn run_handshake(&mut self) {
        self.send(&connection_request()).await;
        self.send(&connect_initial()).await;
        self.send(&encode_vec(&mcs::ErectDomainPdu { sub_height: 0, sub_interval: 0 }).unwrap())
            .await;
        self.send(&encode_vec(&mcs::AttachUserRequest).unwrap()).await;
        for channel_id in [USER_CHANNEL_ID, IO_CHANNEL_ID, RDPSND_CHANNEL_ID] {
            self.send(&channel_join(channel_id)).await;
        }
        self.send(&client_info()).await;
        self.send(&confirm_active()).await;
        self.run_finalization().await;
    }

    async fn run_finalization(&mut self) {
        self.send(&share_data_frame(ShareDataPdu::Synchronize(SynchronizePdu {
            target_user_id: 0,
        })))
        .await;
        self.send(&share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::Cooperate,
            grant_id: 0,
            control_id: 0,
        })))
        .await;
        self.send(&share_data_frame(ShareDataPdu::Control(ControlPdu {
            action: ControlAction::RequestControl,
            grant_id: 0,
            control_id: 0,
        })))
        .await;
        self.send(&share_data_frame(ShareDataPdu::FontList(FontPdu::default()))).await;

        // activation is done once the font map comes back
        self.wait_for(|frame| decode_share_data(frame).is_some_and(|pdu| matches!(pdu, ShareDataPdu::FontMap(_))))
            .await;
    }
}

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
        nego_data: None,
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
    encode_vec(&X224Data {
        data: Cow::Owned(encode_vec(&initial).unwrap()),
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

fn decode_share_data(frame: &[u8]) -> Option<ShareDataPdu> {
    let indication: mcs::SendDataIndication<'_> = rdpeer_core::decode(frame).ok()?;
    let header: ShareControlHeader = rdpeer_core::decode(indication.user_data.as_ref()).ok()?;
    match header.share_control_pdu {
        ShareControlPdu::Data(data) => Some(data.share_data_pdu),
        _ => None,
    }
}

fn decode_share_control(frame: &[u8]) -> Option<ShareControlPdu> {
    let indication: mcs::SendDataIndication<'_> = rdpeer_core::decode(frame).ok()?;
    let header: ShareControlHeader = rdpeer_core::decode(indication.user_data.as_ref()).ok()?;
    Some(header.share_control_pdu)
}

fn settings() -> ServerSettings {
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

async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}

struct CountingHandler {
    post_connects: Arc<AtomicUsize>,
    activates: Arc<AtomicUsize>,
}

#[async_trait]
impl PeerHandler for CountingHandler {
    async fn post_connect(&mut self) -> bool {
        self.post_connects.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn activate(&mut self) -> bool {
        self.activates.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test]
async fn shutdown_request_closes_with_ultimatum() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);

            let peer = Peer::new(server_stream, settings(), Vec::new(), Box::new(NoopPeerHandler));
            let server = tokio::task::spawn_local(peer.run());

            let mut client = Client::new(client_stream);
            client.run_handshake().await;

            client.send(&share_data_frame(ShareDataPdu::ShutdownRequest)).await;

            // the server answers with the MCS disconnect provider ultimatum
            client
                .wait_for(|frame| {
                    rdpeer_core::decode::<mcs::DisconnectProviderUltimatum>(frame)
                        .map(|u| u.reason == mcs::DisconnectReason::ProviderInitiated)
                        .unwrap_or(false)
                })
                .await;

            server.await.unwrap().unwrap();
        })
        .await;
}

#[tokio::test]
async fn channel_write_is_chunked_with_first_and_last_flags() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);

            let mut peer = Peer::new(server_stream, settings(), Vec::new(), Box::new(NoopPeerHandler));
            let handle = peer.handle().clone();
            let server = tokio::task::spawn_local(async move { peer.run().await });

            let mut client = Client::new(client_stream);
            client.run_handshake().await;

            handle.send_channel_data("rdpsnd", vec![0xA5; 3700]).unwrap();

            let mut chunks = Vec::new();
            while chunks.len() < 3 {
                let (_, frame) = client.next_frame().await;
                let indication: mcs::SendDataIndication<'_> = rdpeer_core::decode(&frame).unwrap();
                assert_eq!(indication.channel_id, RDPSND_CHANNEL_ID);

                let mut cursor = rdpeer_core::ReadCursor::new(indication.user_data.as_ref());
                let header: ChannelPduHeader = rdpeer_core::decode_cursor(&mut cursor).unwrap();
                chunks.push((header, cursor.remaining().to_vec()));
            }

            assert_eq!(chunks[0].1.len(), 1600);
            assert_eq!(chunks[1].1.len(), 1600);
            assert_eq!(chunks[2].1.len(), 500);

            assert_eq!(chunks[0].0.flags, ChannelControlFlags::FLAG_FIRST);
            assert_eq!(chunks[1].0.flags, ChannelControlFlags::empty());
            assert_eq!(chunks[2].0.flags, ChannelControlFlags::FLAG_LAST);

            for (header, _) in &chunks {
                assert_eq!(header.length, 3700);
            }

            handle.quit("test done").unwrap();
            server.await.unwrap().unwrap();

            // the peer is gone: further channel writes must fail
            assert!(handle.send_channel_data("rdpsnd", vec![0u8; 4]).is_err());
        })
        .await;
}

#[tokio::test]
async fn reactivation_runs_activate_again_but_not_post_connect() {
    tokio::task::LocalSet::new()
        .run_until(async {
            let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);

            let post_connects = Arc::new(AtomicUsize::new(0));
            let activates = Arc::new(AtomicUsize::new(0));

            let handler = CountingHandler {
                post_connects: Arc::clone(&post_connects),
                activates: Arc::clone(&activates),
            };

            let mut peer = Peer::new(server_stream, settings(), Vec::new(), Box::new(handler));
            let handle = peer.handle().clone();
            let server = tokio::task::spawn_local(async move { peer.run().await });

            let mut client = Client::new(client_stream);
            client.run_handshake().await;

            wait_until(|| post_connects.load(Ordering::SeqCst) == 1).await;
            wait_until(|| activates.load(Ordering::SeqCst) == 1).await;

            // server-initiated deactivation with a resize
            handle
                .deactivate_all(Some(DesktopSize {
                    width: 1920,
                    height: 1080,
                }))
                .unwrap();

            client
                .wait_for(|frame| matches!(decode_share_control(frame), Some(ShareControlPdu::ServerDeactivateAll(_))))
                .await;

            // the client comes back through confirm active and finalization; no
            // persistent key list on a reactivation cycle
            client
                .wait_for(|frame| matches!(decode_share_control(frame), Some(ShareControlPdu::ServerDemandActive(_))))
                .await;
            client.send(&confirm_active()).await;
            client.run_finalization().await;

            wait_until(|| activates.load(Ordering::SeqCst) == 2).await;
            assert_eq!(post_connects.load(Ordering::SeqCst), 1);

            handle.quit("test done").unwrap();
            server.await.unwrap().unwrap();
        })
        .await;
}
