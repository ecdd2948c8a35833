use rdpeer_pdu::nego::SecurityProtocol;
use rdpeer_svc::CHANNEL_CHUNK_LENGTH;

use tracing::debug;
use crate::{AcceptorErrorExt as _, SequenceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopSize {
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOrientation {
    Landscape,
    Portrait,
    LandscapeFlipped,
    PortraitFlipped,
}

/// One configured monitor, in application coordinates.
///
/// This is the configuration-side view; the wire form is
/// [`rdpeer_pdu::gcc::Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorDef {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
    pub orientation: MonitorOrientation,
    pub desktop_scale_factor: u32,
    pub device_scale_factor: u32,
}

impl MonitorDef {
    /// The single primary monitor synthesized when the application
    /// configured none: desktop sized, landscape, 100% scale.
    pub fn primary(size: DesktopSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: u32::from(size.width),
            height: u32::from(size.height),
            is_primary: true,
            orientation: MonitorOrientation::Landscape,
            desktop_scale_factor: crate::DEFAULT_DESKTOP_SCALE_FACTOR,
            device_scale_factor: crate::DEFAULT_DESKTOP_SCALE_FACTOR,
        }
    }
}

/// The server certificate identity required before accepting connections.
///
/// Certificate parsing and key operations live outside the core; this is an
/// opaque DER-encoded chain plus a compatibility marker for standard RDP
/// security (which needs an RSA key the core never touches).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub certificate_der: Vec<u8>,
    pub supports_rdp_security: bool,
}

/// Mutable server configuration and negotiated parameters.
///
/// Mutated by the state machine as negotiation outcomes arrive; invariant
/// once the connection is active, except across a reactivation cycle.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub desktop_size: DesktopSize,
    /// Security protocols the server offers during negotiation.
    pub security: SecurityProtocol,
    /// The server certificate identity; required before accepting.
    pub server_identity: Option<ServerIdentity>,
    pub vc_chunk_size: u32,
    pub monitors: Vec<MonitorDef>,

    pub network_auto_detect: bool,
    pub support_multitransport: bool,
    pub bitmap_cache_persist_enabled: bool,
    pub server_license_required: bool,
    pub support_monitor_layout_pdu: bool,
    pub support_error_info_pdu: bool,
    pub support_display_control: bool,
    pub dynamic_resolution_update: bool,

    /// Standard RDP security selected as a *protocol*.
    pub rdp_security: bool,
    /// Per-PDU encryption/MAC layer in force (standard RDP security only).
    pub use_rdp_security_layer: bool,
    pub restricted_admin_required: bool,
    pub remote_credential_guard: bool,

    /// Product identification sent in the server license request.
    pub license_company_name: String,
    pub license_product_id: String,
}

impl ServerSettings {
    pub fn new(desktop_size: DesktopSize, security: SecurityProtocol) -> Self {
        Self {
            desktop_size,
            security,
            server_identity: None,
            vc_chunk_size: u32::try_from(CHANNEL_CHUNK_LENGTH).expect("constant fits"),
            monitors: Vec::new(),
            network_auto_detect: false,
            support_multitransport: false,
            bitmap_cache_persist_enabled: false,
            server_license_required: false,
            support_monitor_layout_pdu: true,
            support_error_info_pdu: false,
            support_display_control: false,
            dynamic_resolution_update: false,
            rdp_security: false,
            use_rdp_security_layer: false,
            restricted_admin_required: false,
            remote_credential_guard: false,
            license_company_name: "rdpeer".to_owned(),
            license_product_id: "A02".to_owned(),
        }
    }

    /// Returns a copy with the given certificate identity attached.
    pub fn with_identity(mut self, identity: ServerIdentity) -> Self {
        self.server_identity = Some(identity);
        self
    }

    /// Cross-checks toggles before the sequence starts.
    ///
    /// A server certificate identity is required; when the certificate
    /// cannot back standard RDP security, both `rdp_security` and the
    /// per-PDU security layer are cleared. A zero chunk size would stall
    /// every channel write, and the desktop must have an actual area.
    pub fn enforce_consistency(&mut self) -> SequenceResult<()> {
        let Some(identity) = &self.server_identity else {
            return Err(crate::AcceptorError::general("a server certificate identity is required"));
        };

        if self.rdp_security && !identity.supports_rdp_security {
            debug!("Standard RDP security disabled: the certificate cannot support it");
            self.rdp_security = false;
            self.use_rdp_security_layer = false;
        }

        if self.desktop_size.width == 0 || self.desktop_size.height == 0 {
            return Err(crate::AcceptorError::general("desktop size must be non-zero"));
        }

        if self.vc_chunk_size == 0 {
            return Err(crate::AcceptorError::general("virtual channel chunk size must be non-zero"));
        }

        if !self.rdp_security && self.use_rdp_security_layer {
            debug!("UseRdpSecurityLayer disabled: standard RDP security is not in force");
            self.use_rdp_security_layer = false;
        }

        Ok(())
    }
}
