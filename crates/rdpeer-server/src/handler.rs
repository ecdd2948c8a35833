use async_trait::async_trait;

use rdpeer_acceptor::{LogonEvent, MonitorDef};
use rdpeer_pdu::input::fast_path::FastPathInputEvent;
use rdpeer_pdu::input::InputEvent;
use rdpeer_pdu::rdp::capability_sets::CapabilitySet;
use rdpeer_pdu::rdp::refresh_rectangle::InclusiveRectangle;
use rdpeer_pdu::rdp::suppress_output::SuppressOutputPdu;
use rdpeer_pdu::rdp::vc::ChannelPduHeader;
use rdpeer_svc::StaticChannelSet;

/// Outcome of the licensing observer hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseCallbackResult {
    Completed,
    InProgress,
    Abort,
}

/// The application hooks of a server peer.
///
/// Every hook has a default implementation, so an application only overrides
/// what it cares about. The handler itself plays the role of the per-peer
/// application context: construct one per accepted connection.
#[async_trait]
pub trait PeerHandler: Send {
    /// Raised once after protocol selection; `automatic` identities come
    /// from an external NLA exchange. Returning false denies the logon.
    async fn logon(&mut self, event: &LogonEvent) -> bool {
        let _ = event;
        true
    }

    /// Pre-Demand-Active customization of the offered capability sets.
    /// Returning false aborts the connection.
    async fn capabilities(&mut self, capability_sets: &mut Vec<CapabilitySet>) -> bool {
        let _ = capability_sets;
        true
    }

    /// Called exactly once, on the first entry to the active state.
    /// Returning false closes the peer.
    async fn post_connect(&mut self) -> bool {
        true
    }

    /// Called on every entry to the active state, including after each
    /// reactivation. Returning false closes the peer.
    async fn activate(&mut self) -> bool {
        true
    }

    /// Observer invoked at every connection state transition.
    fn reached_state(&mut self, state: &'static str) {
        let _ = state;
    }

    /// Invoked before the monitor layout PDU goes out, with the mutable
    /// monitor table.
    fn adjust_monitors_layout(&mut self, monitors: &mut Vec<MonitorDef>) {
        let _ = monitors;
    }

    /// Observer for client licensing frames. The default accepts whatever
    /// the built-in licensing sequence decides; `Abort` tears the
    /// connection down.
    async fn license_callback(&mut self, frame: &[u8]) -> LicenseCallbackResult {
        let _ = frame;
        LicenseCallbackResult::Completed
    }

    /// One slow-path input event.
    async fn input_event(&mut self, event_time: u32, event: InputEvent) {
        let _ = (event_time, event);
    }

    /// A batch of fast-path input events.
    async fn fastpath_input(&mut self, events: Vec<FastPathInputEvent>) {
        let _ = events;
    }

    /// The client asked for some areas to be repainted.
    async fn refresh_rect(&mut self, areas: Vec<InclusiveRectangle>) {
        let _ = areas;
    }

    /// The client toggled display updates on or off.
    async fn suppress_output(&mut self, pdu: SuppressOutputPdu) {
        let _ = pdu;
    }

    /// The client acknowledged a surface frame.
    async fn surface_frame_acknowledge(&mut self, frame_id: u32) {
        let _ = frame_id;
    }

    /// One static virtual channel chunk, with its FIRST/LAST flags intact.
    ///
    /// The channel set is handed in mutably so the application can open,
    /// close, or attach data to peer channels from within the callback.
    async fn virtual_channel_read(
        &mut self,
        channels: &mut StaticChannelSet,
        channel_id: u16,
        header: ChannelPduHeader,
        payload: &[u8],
    ) {
        let _ = (channels, channel_id, header, payload);
    }
}

/// A handler that accepts everything and ignores all traffic.
#[derive(Debug, Default)]
pub struct NoopPeerHandler;

#[async_trait]
impl PeerHandler for NoopPeerHandler {}
