use anyhow::{bail, Context as _};
use bytes::BytesMut;
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use rdpeer_acceptor::{Acceptor, AcceptorResult, DesktopSize, Sequence as _, ServerSettings, State as _};
use rdpeer_core::{decode, encode_buf, encode_vec, WriteBuf};
use rdpeer_pdu::input::fast_path::FastPathInput;
use rdpeer_pdu::mcs;
use rdpeer_pdu::rdp::capability_sets::CapabilitySet;
use rdpeer_pdu::rdp::headers::{
    BasicSecurityHeader, BasicSecurityHeaderFlags, CompressionFlags, ServerDeactivateAll, ShareControlHeader,
    ShareControlPdu, ShareDataHeader, ShareDataPdu, StreamPriority,
};
use rdpeer_pdu::rdp::redirection::ServerRedirectionPdu;
use rdpeer_pdu::rdp::server_error_info::{ErrorInfo, ProtocolIndependentCode, ServerSetErrorInfoPdu};
use rdpeer_pdu::rdp::vc::ChannelPduHeader;
use rdpeer_pdu::Action;
use rdpeer_svc::{encode_channel_data, ChannelError, OpenFlags, StaticChannelSet};
use tracing::{debug, trace, warn};

use crate::framed::Framed;
use crate::handler::{LicenseCallbackResult, PeerHandler};

/// Per-PDU decryption for the standard RDP security layer.
///
/// Key establishment and the cipher live outside the core; the peer only
/// routes encrypted payloads through this trait when `UseRdpSecurityLayer`
/// was negotiated.
pub trait PduSecurity: Send {
    fn decrypt(&mut self, flags: BasicSecurityHeaderFlags, payload: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// What the active loop decided after one dispatch.
#[derive(Debug, PartialEq)]
pub enum RunState {
    Continue,
    /// Server-side close: deactivate-all, optional error info, ultimatum.
    Disconnect,
    /// Graceful tear-down, nothing more goes on the wire.
    QuitSession,
    DeactivationReactivation {
        desktop_size: DesktopSize,
    },
}

/// Produced by [`accept_begin`] when the sequence pauses for an external
/// security upgrade.
pub enum BeginResult<S> {
    /// Hand the inner stream to the TLS/CredSSP machinery, then continue
    /// with [`accept_finalize`] over the upgraded stream.
    ShouldUpgrade(S),
    Continue(Framed<S>),
}

/// Commands a running peer accepts from other tasks.
#[derive(Debug)]
enum PeerEvent {
    Quit(String),
    DeactivateAll { desktop_size: Option<DesktopSize> },
    OpenChannel(String),
    CloseChannel(String),
    SendChannelData { name: String, data: Vec<u8> },
    SendErrorInfo(ErrorInfo),
    Redirect(Box<ServerRedirectionPdu>),
}

/// Handle for controlling a running [`Peer`] from other tasks.
///
/// All methods fail once the peer has shut down.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    sender: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerHandle {
    pub fn quit(&self, reason: impl Into<String>) -> anyhow::Result<()> {
        self.send(PeerEvent::Quit(reason.into()))
    }

    /// Starts a deactivation-reactivation cycle, optionally with a new
    /// desktop size.
    pub fn deactivate_all(&self, desktop_size: Option<DesktopSize>) -> anyhow::Result<()> {
        self.send(PeerEvent::DeactivateAll { desktop_size })
    }

    pub fn open_channel(&self, name: impl Into<String>) -> anyhow::Result<()> {
        self.send(PeerEvent::OpenChannel(name.into()))
    }

    pub fn close_channel(&self, name: impl Into<String>) -> anyhow::Result<()> {
        self.send(PeerEvent::CloseChannel(name.into()))
    }

    /// Queues a chunked write on the named static channel.
    pub fn send_channel_data(&self, name: impl Into<String>, data: Vec<u8>) -> anyhow::Result<()> {
        self.send(PeerEvent::SendChannelData {
            name: name.into(),
            data,
        })
    }

    pub fn send_error_info(&self, error_info: ErrorInfo) -> anyhow::Result<()> {
        self.send(PeerEvent::SendErrorInfo(error_info))
    }

    /// Sends the server redirection packet; the record is consumed and the
    /// peer's runtime settings reset.
    pub fn redirect(&self, redirection: ServerRedirectionPdu) -> anyhow::Result<()> {
        self.send(PeerEvent::Redirect(Box::new(redirection)))
    }

    fn send(&self, event: PeerEvent) -> anyhow::Result<()> {
        self.sender
            .send(event)
            .map_err(|_| anyhow::anyhow!("peer is no longer running"))
    }
}

/// The negotiated parameters the active phase works with.
struct ActiveSession {
    channels: StaticChannelSet,
    user_channel_id: u16,
    io_channel_id: u16,
    message_channel_id: Option<u16>,
    vc_chunk_size: u32,
    support_error_info_pdu: bool,
    use_rdp_security_layer: bool,
    desktop_size: DesktopSize,
    share_id: u32,
}

/// One server peer: a single client connection from transport attach to
/// close.
pub struct Peer<S> {
    framed: Framed<S>,
    handler: Box<dyn PeerHandler>,
    settings: ServerSettings,
    capabilities: Vec<CapabilitySet>,
    security: Option<Box<dyn PduSecurity>>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    handle: PeerHandle,
    connected: bool,
    activated: bool,
    negotiation_failed: bool,
    closed: bool,
    ack_frame_id: u32,
}

enum Wake {
    Event(Option<PeerEvent>),
    Frame(Action, BytesMut),
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        settings: ServerSettings,
        capabilities: Vec<CapabilitySet>,
        handler: Box<dyn PeerHandler>,
    ) -> Self {
        let (sender, events_rx) = mpsc::unbounded_channel();

        Self {
            framed: Framed::new(stream),
            handler,
            settings,
            capabilities,
            security: None,
            events_rx,
            handle: PeerHandle { sender },
            connected: false,
            activated: false,
            negotiation_failed: false,
            closed: false,
            ack_frame_id: 0,
        }
    }

    /// Installs the standard-RDP-security decryption provider.
    pub fn set_pdu_security(&mut self, security: Box<dyn PduSecurity>) {
        self.security = Some(security);
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// The frame id of the latest client frame acknowledge.
    pub fn ack_frame_id(&self) -> u32 {
        self.ack_frame_id
    }

    /// Whether the capability exchange has completed for the current cycle.
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Runs the peer to completion: acceptance sequence, active phase, and
    /// however many reactivation cycles occur in between.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut acceptor = Acceptor::new(self.settings.clone(), self.capabilities.clone());

        loop {
            let result = match self.drive_accept(&mut acceptor).await {
                Ok(result) => result,
                Err(error) => {
                    // a failed negotiation closes silently: some clients
                    // treat further data as an error
                    if !self.negotiation_failed {
                        debug!(%error, "Connection sequence failed");
                    }
                    return Err(error);
                }
            };

            let mut session = ActiveSession {
                channels: result.channels,
                user_channel_id: result.user_channel_id,
                io_channel_id: result.io_channel_id,
                message_channel_id: result.message_channel_id,
                vc_chunk_size: acceptor.settings().vc_chunk_size,
                support_error_info_pdu: acceptor.settings().support_error_info_pdu,
                use_rdp_security_layer: acceptor.settings().use_rdp_security_layer,
                desktop_size: acceptor.settings().desktop_size,
                share_id: 0x0001_0001,
            };

            // PostConnect runs exactly once and never after a reactivation
            if !self.connected {
                self.connected = self.handler.post_connect().await;
                if !self.connected {
                    self.close(&session).await?;
                    bail!("PostConnect failed");
                }
            }

            self.activated = true;
            if !self.handler.activate().await {
                self.close(&session).await?;
                bail!("Activate failed");
            }

            match self.active_loop(&mut session, result.input_events).await? {
                RunState::QuitSession => return Ok(()),
                RunState::Disconnect => {
                    self.close(&session).await?;
                    return Ok(());
                }
                RunState::DeactivationReactivation { desktop_size } => {
                    self.activated = false;
                    acceptor = Acceptor::new_deactivation_reactivation(acceptor, session.channels, desktop_size)
                        .map_err(|e| anyhow::anyhow!(e))?;
                }
                RunState::Continue => unreachable!("the active loop never returns Continue"),
            }
        }
    }

    /// Drives the acceptance sequence, invoking the application hooks at the
    /// states they belong to and logging every transition.
    async fn drive_accept(&mut self, acceptor: &mut Acceptor) -> anyhow::Result<AcceptorResult> {
        let mut buf = WriteBuf::new();
        let mut last_state = "";
        let mut capabilities_hooked = false;
        let mut monitors_hooked = false;

        loop {
            let state_name = acceptor.state().name();
            if state_name != last_state {
                self.handler.reached_state(state_name);
                last_state = state_name;
            }

            if let Some(event) = acceptor.take_logon_event() {
                if !self.handler.logon(&event).await {
                    self.negotiation_failed = true;
                    bail!("logon denied");
                }
            }

            if let Some(protocol) = acceptor.reached_security_upgrade() {
                if protocol.is_empty() {
                    acceptor.mark_security_upgrade_as_done();
                    continue;
                }
                bail!("security upgrade to {protocol:?} must be performed by the embedder; use accept_begin");
            }

            if let Some(result) = acceptor.get_result() {
                return Ok(result);
            }

            if state_name == "CapabilitiesSendServer" && !capabilities_hooked {
                capabilities_hooked = true;
                if !self.handler.capabilities(acceptor.server_capabilities_mut()).await {
                    bail!("Capabilities hook failed");
                }
            }

            if state_name == "MonitorLayoutSend" && !monitors_hooked {
                monitors_hooked = true;
                self.handler.adjust_monitors_layout(acceptor.monitors_mut());
            }

            buf.clear();
            let step_result = match acceptor.next_pdu_hint() {
                Some(hint) => {
                    let frame = self
                        .framed
                        .read_by_hint(hint)
                        .await
                        .context("read frame by hint")?;

                    trace!(length = frame.len(), "PDU received");

                    if state_name == "Licensing"
                        && self.handler.license_callback(&frame).await == LicenseCallbackResult::Abort
                    {
                        bail!("license callback aborted the connection");
                    }

                    acceptor.step(&frame, &mut buf)
                }
                None => acceptor.step_no_input(&mut buf),
            };

            // flush whatever the step produced, also on failure: a
            // negotiation failure response must still reach the client
            if buf.filled_len() > 0 {
                self.framed.write_all(buf.filled()).await.context("write response")?;
            }

            let written = match step_result {
                Ok(written) => written,
                Err(error) => {
                    if matches!(state_name, "NegoWaitRequest" | "NegoSendConfirm") {
                        self.negotiation_failed = true;
                    }
                    return Err(error.into());
                }
            };

            let leftover = self.framed.peek().len();
            let new_state = acceptor.state().name();
            if leftover > 0 && acceptor.next_pdu_hint().is_none() {
                warn!("(server)[{state_name} -> {new_state}] {written:?} [{leftover} bytes not processed]");
            } else {
                debug!("(server)[{state_name} -> {new_state}] {written:?} [{leftover} bytes buffered]");
            }
        }
    }

    /// Dispatches active-state traffic until the session ends or a
    /// reactivation starts. The backlog queued during activation is drained
    /// first, as regular traffic.
    async fn active_loop(&mut self, session: &mut ActiveSession, backlog: Vec<Vec<u8>>) -> anyhow::Result<RunState> {
        for frame in backlog {
            match self.dispatch_x224(session, &frame).await? {
                RunState::Continue => {}
                state => return Ok(state),
            }
        }

        loop {
            let wake = {
                let framed = &mut self.framed;
                let events = &mut self.events_rx;

                tokio::select! {
                    event = events.recv() => Wake::Event(event),
                    frame = framed.read_pdu() => {
                        let (action, bytes) = frame.context("read PDU")?;
                        Wake::Frame(action, bytes)
                    }
                }
            };

            let state = match wake {
                Wake::Event(None) => RunState::Disconnect,
                Wake::Event(Some(event)) => self.handle_event(session, event).await?,
                Wake::Frame(action, bytes) => self.dispatch_pdu(session, action, &bytes).await?,
            };

            match state {
                RunState::Continue => {}
                state => return Ok(state),
            }
        }
    }

    async fn dispatch_pdu(&mut self, session: &mut ActiveSession, action: Action, frame: &[u8]) -> anyhow::Result<RunState> {
        match action {
            Action::FastPath => {
                let input: FastPathInput = decode(frame).context("fast-path input")?;
                self.handler.fastpath_input(input.events).await;
                Ok(RunState::Continue)
            }
            Action::X224 => self.dispatch_x224(session, frame).await,
        }
    }

    async fn dispatch_x224(&mut self, session: &mut ActiveSession, frame: &[u8]) -> anyhow::Result<RunState> {
        let message = decode::<mcs::McsMessage<'_>>(frame).context("MCS message")?;

        match message {
            mcs::McsMessage::DisconnectProviderUltimatum(ultimatum) => {
                debug!(reason = %ultimatum.reason, "Client sent disconnect provider ultimatum");
                Ok(RunState::QuitSession)
            }

            mcs::McsMessage::SendDataRequest(data) => {
                let channel_id = data.channel_id;

                let decrypted;
                let payload: &[u8] = if session.use_rdp_security_layer {
                    let Some(security) = self.security.as_mut() else {
                        bail!("UseRdpSecurityLayer negotiated but no PduSecurity provider installed");
                    };
                    let mut cursor = rdpeer_core::ReadCursor::new(data.user_data.as_ref());
                    let header =
                        rdpeer_core::decode_cursor::<BasicSecurityHeader>(&mut cursor).context("security header")?;
                    decrypted = security.decrypt(header.flags, cursor.remaining())?;
                    &decrypted
                } else {
                    data.user_data.as_ref()
                };

                if channel_id == session.io_channel_id {
                    self.dispatch_share_control(session, payload).await
                } else if Some(channel_id) == session.message_channel_id {
                    self.dispatch_message_channel(payload)
                } else {
                    self.dispatch_channel_data(session, channel_id, payload).await
                }
            }

            other => {
                warn!(message = ?other, "Unexpected MCS message in active state");
                Ok(RunState::Continue)
            }
        }
    }

    async fn dispatch_share_control(&mut self, session: &mut ActiveSession, payload: &[u8]) -> anyhow::Result<RunState> {
        let header = decode::<ShareControlHeader>(payload).context("share control header")?;

        match header.share_control_pdu {
            ShareControlPdu::Data(data) => self.dispatch_share_data(session, data.share_data_pdu).await,

            ShareControlPdu::FlowControl => {
                // body already skipped by the decoder
                Ok(RunState::Continue)
            }

            ShareControlPdu::ClientConfirmActive(_) => {
                warn!("Confirm active outside a capability exchange, ignored");
                Ok(RunState::Continue)
            }

            other => {
                bail!("client sent unexpected share control PDU: {}", other.as_short_name());
            }
        }
    }

    async fn dispatch_share_data(&mut self, session: &mut ActiveSession, pdu: ShareDataPdu) -> anyhow::Result<RunState> {
        match pdu {
            ShareDataPdu::Input(input) => {
                for (event_time, event) in input.events {
                    self.handler.input_event(event_time, event).await;
                }
                Ok(RunState::Continue)
            }

            ShareDataPdu::ShutdownRequest => {
                self.send_disconnect_ultimatum().await?;
                warn!("disconnect provider ultimatum sent to peer, closing connection");
                self.closed = true;
                Ok(RunState::QuitSession)
            }

            ShareDataPdu::FrameAcknowledge(ack) => {
                self.ack_frame_id = ack.frame_id;
                self.handler.surface_frame_acknowledge(ack.frame_id).await;
                Ok(RunState::Continue)
            }

            ShareDataPdu::RefreshRectangle(refresh) => {
                self.handler.refresh_rect(refresh.areas).await;
                Ok(RunState::Continue)
            }

            ShareDataPdu::SuppressOutput(suppress) => {
                self.handler.suppress_output(suppress).await;
                Ok(RunState::Continue)
            }

            ShareDataPdu::Synchronize(_)
            | ShareDataPdu::Control(_)
            | ShareDataPdu::FontList(_)
            | ShareDataPdu::PersistentKeyList(_) => {
                // stray finalization traffic is tolerated, never fatal
                warn!(pdu = pdu.as_short_name(), "Finalization PDU outside an activation cycle");
                Ok(RunState::Continue)
            }

            ShareDataPdu::ShutdownDenied => {
                debug!("Client acknowledged shutdown denial");
                Ok(RunState::Continue)
            }

            other => {
                warn!(pdu = other.as_short_name(), "Unexpected share data PDU from client");
                Ok(RunState::Continue)
            }
        }
    }

    fn dispatch_message_channel(&mut self, payload: &[u8]) -> anyhow::Result<RunState> {
        let mut cursor = rdpeer_core::ReadCursor::new(payload);
        let header = rdpeer_core::decode_cursor::<BasicSecurityHeader>(&mut cursor).context("security header")?;

        if header.flags.contains(BasicSecurityHeaderFlags::AUTODETECT_RSP) {
            // post-connect probes are not requested by this server
            debug!("Dropping unsolicited auto-detect response");
        } else if header.flags.contains(BasicSecurityHeaderFlags::HEARTBEAT) {
            trace!("Heartbeat received");
        } else {
            warn!(flags = ?header.flags, "Unhandled message channel PDU");
        }

        Ok(RunState::Continue)
    }

    async fn dispatch_channel_data(
        &mut self,
        session: &mut ActiveSession,
        channel_id: u16,
        payload: &[u8],
    ) -> anyhow::Result<RunState> {
        if !session.channels.is_joined(channel_id) {
            warn!(channel_id, "Data on an unjoined channel, dropped");
            return Ok(RunState::Continue);
        }

        let mut cursor = rdpeer_core::ReadCursor::new(payload);
        let header = rdpeer_core::decode_cursor::<ChannelPduHeader>(&mut cursor).context("channel PDU header")?;
        let chunk = cursor.remaining();

        self.handler
            .virtual_channel_read(&mut session.channels, channel_id, header, chunk)
            .await;

        Ok(RunState::Continue)
    }

    async fn handle_event(&mut self, session: &mut ActiveSession, event: PeerEvent) -> anyhow::Result<RunState> {
        trace!(?event, "Dispatching");

        match event {
            PeerEvent::Quit(reason) => {
                debug!(%reason, "Quit requested");
                Ok(RunState::Disconnect)
            }

            PeerEvent::DeactivateAll { desktop_size } => {
                self.send_share_control(session, ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll))
                    .await?;
                Ok(RunState::DeactivationReactivation {
                    desktop_size: desktop_size.unwrap_or(session.desktop_size),
                })
            }

            PeerEvent::OpenChannel(name) => {
                match session.channels.open(&name, OpenFlags::empty()) {
                    Ok(handle) => debug!(%name, index = handle.index(), "Channel opened"),
                    Err(error) => warn!(%name, %error, "Channel open failed"),
                }
                Ok(RunState::Continue)
            }

            PeerEvent::CloseChannel(name) => {
                if let Err(error) = self.close_channel_by_name(session, &name) {
                    warn!(%name, %error, "Channel close failed");
                }
                Ok(RunState::Continue)
            }

            PeerEvent::SendChannelData { name, data } => {
                self.send_channel_data(session, &name, &data).await?;
                Ok(RunState::Continue)
            }

            PeerEvent::SendErrorInfo(error_info) => {
                self.send_share_data(session, ShareDataPdu::ServerSetErrorInfo(ServerSetErrorInfoPdu(error_info)))
                    .await?;
                Ok(RunState::Continue)
            }

            PeerEvent::Redirect(redirection) => {
                self.send_share_control(session, ShareControlPdu::ServerRedirect(*redirection))
                    .await?;

                // the redirection record is consumed; runtime settings reset
                session.vc_chunk_size = self.settings.vc_chunk_size;
                session.support_error_info_pdu = self.settings.support_error_info_pdu;

                Ok(RunState::Continue)
            }
        }
    }

    fn close_channel_by_name(&mut self, session: &mut ActiveSession, name: &str) -> Result<(), ChannelError> {
        let handle = session.channels.open(name, OpenFlags::empty())?;
        session.channels.close(handle)
    }

    /// Chunked write on a static channel; all-or-nothing from the caller's
    /// viewpoint.
    async fn send_channel_data(&mut self, session: &mut ActiveSession, name: &str, data: &[u8]) -> anyhow::Result<()> {
        if self.closed {
            bail!("peer is closed");
        }

        let handle = session
            .channels
            .open(name, OpenFlags::empty())
            .with_context(|| format!("open channel {name:?}"))?;
        let peer_channel = session.channels.get(handle).expect("just opened");
        let channel_id = peer_channel.channel_id();
        let show_protocol = peer_channel
            .options()
            .contains(rdpeer_pdu::gcc::ChannelOptions::SHOW_PROTOCOL);

        let mut buf = WriteBuf::new();
        encode_channel_data(
            session.user_channel_id,
            channel_id,
            data,
            usize::try_from(session.vc_chunk_size).context("chunk size")?,
            show_protocol,
            &mut buf,
        )?;

        self.framed.write_all(buf.filled()).await.context("write channel data")
    }

    async fn send_share_data(&mut self, session: &ActiveSession, pdu: ShareDataPdu) -> anyhow::Result<()> {
        let header = ShareControlPdu::Data(ShareDataHeader {
            share_data_pdu: pdu,
            stream_priority: StreamPriority::Undefined,
            compression_flags: CompressionFlags::empty(),
            compression_type: 0,
        });

        self.send_share_control(session, header).await
    }

    async fn send_share_control(&mut self, session: &ActiveSession, pdu: ShareControlPdu) -> anyhow::Result<()> {
        if self.closed {
            bail!("peer is closed");
        }

        let header = ShareControlHeader {
            share_control_pdu: pdu,
            pdu_source: session.io_channel_id,
            share_id: session.share_id,
        };

        let user_data = encode_vec(&header).context("encode share control")?;
        let indication = mcs::SendDataIndication {
            initiator_id: session.user_channel_id,
            channel_id: session.io_channel_id,
            user_data: Cow::Owned(user_data),
        };

        let mut buf = WriteBuf::new();
        encode_buf(&indication, &mut buf).context("encode send data indication")?;

        self.framed.write_all(buf.filled()).await.context("write PDU")
    }

    async fn send_disconnect_ultimatum(&mut self) -> anyhow::Result<()> {
        let ultimatum = mcs::DisconnectProviderUltimatum::from_reason(mcs::DisconnectReason::ProviderInitiated);

        let mut buf = WriteBuf::new();
        encode_buf(&ultimatum, &mut buf).context("encode ultimatum")?;

        self.framed.write_all(buf.filled()).await.context("write ultimatum")
    }

    /// [MS-RDPBCGR] 1.3.1.4.2 User-Initiated Disconnection Sequence on
    /// Server: deactivate-all, optionally an error info PDU, then the MCS
    /// disconnect provider ultimatum.
    async fn close(&mut self, session: &ActiveSession) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }

        if self.negotiation_failed {
            // not MCS connected; some clients treat further data as an error
            self.closed = true;
            return Ok(());
        }

        self.send_share_control(session, ShareControlPdu::ServerDeactivateAll(ServerDeactivateAll))
            .await?;

        if session.support_error_info_pdu {
            self.send_share_data(
                session,
                ShareDataPdu::ServerSetErrorInfo(ServerSetErrorInfoPdu(ErrorInfo::ProtocolIndependentCode(
                    ProtocolIndependentCode::None,
                ))),
            )
            .await?;
        }

        self.send_disconnect_ultimatum().await?;

        self.closed = true;
        Ok(())
    }

    /// Drops the transport without any wire messages.
    pub fn disconnect(self) {
        drop(self.framed);
    }
}

/// Runs the acceptance sequence until the external security upgrade point,
/// for embedders that bring their own TLS/CredSSP.
pub async fn accept_begin<S>(
    mut framed: Framed<S>,
    acceptor: &mut Acceptor,
    handler: &mut dyn PeerHandler,
) -> anyhow::Result<BeginResult<S>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = WriteBuf::new();

    loop {
        if let Some(security) = acceptor.reached_security_upgrade() {
            let result = if security.is_empty() {
                BeginResult::Continue(framed)
            } else {
                let (stream, leftover) = framed.into_inner();
                debug_assert!(leftover.is_empty(), "unexpected leftover before security upgrade");
                BeginResult::ShouldUpgrade(stream)
            };

            return Ok(result);
        }

        single_accept_step(&mut framed, acceptor, handler, &mut buf).await?;
    }
}

/// Continues the acceptance sequence after an external security upgrade.
pub async fn accept_finalize<S>(
    framed: &mut Framed<S>,
    acceptor: &mut Acceptor,
    handler: &mut dyn PeerHandler,
) -> anyhow::Result<AcceptorResult>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = WriteBuf::new();

    loop {
        if let Some(result) = acceptor.get_result() {
            return Ok(result);
        }
        single_accept_step(framed, acceptor, handler, &mut buf).await?;
    }
}

async fn single_accept_step<S>(
    framed: &mut Framed<S>,
    acceptor: &mut Acceptor,
    handler: &mut dyn PeerHandler,
    buf: &mut WriteBuf,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let Some(event) = acceptor.take_logon_event() {
        if !handler.logon(&event).await {
            bail!("logon denied");
        }
    }

    // these states persist for exactly one step, so the hooks fire once
    let state_name = acceptor.state().name();
    if state_name == "CapabilitiesSendServer" && !handler.capabilities(acceptor.server_capabilities_mut()).await {
        bail!("Capabilities hook failed");
    }
    if state_name == "MonitorLayoutSend" {
        handler.adjust_monitors_layout(acceptor.monitors_mut());
    }

    buf.clear();

    let step_result = match acceptor.next_pdu_hint() {
        Some(hint) => {
            let frame = framed.read_by_hint(hint).await.context("read frame by hint")?;

            if state_name == "Licensing" && handler.license_callback(&frame).await == LicenseCallbackResult::Abort {
                bail!("license callback aborted the connection");
            }

            acceptor.step(&frame, buf)
        }
        None => acceptor.step_no_input(buf),
    };

    if buf.filled_len() > 0 {
        framed.write_all(buf.filled()).await.context("write response")?;
    }

    step_result?;
    Ok(())
}
