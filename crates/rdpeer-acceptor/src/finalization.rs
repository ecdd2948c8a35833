use bitflags::bitflags;

use rdpeer_core::WriteBuf;
use rdpeer_pdu as pdu;
use rdpeer_pdu::mcs;
use rdpeer_pdu::rdp::capability_sets::SERVER_CHANNEL_ID;
use rdpeer_pdu::rdp::finalization::{ControlAction, ControlPdu, FontPdu, SynchronizePdu};
use rdpeer_pdu::rdp::headers::{ShareControlPdu, ShareDataPdu};

use tracing::{debug, warn};
use crate::util::{self, wrap_share_data};
use crate::{AcceptorError, AcceptorErrorExt as _, Sequence, SequenceResult, State, Written};

bitflags! {
    /// Which finalization PDUs have been received in the current cycle.
    ///
    /// Monotonically set within one activation cycle and fully cleared when
    /// a new cycle starts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FinalizeFlags: u32 {
        const SYNCHRONIZE = 0x0001;
        const CONTROL_COOPERATE = 0x0002;
        const CONTROL_REQUEST = 0x0004;
        const PERSISTENT_KEY_LIST = 0x0008;
        const FONT_LIST = 0x0010;
        /// Marks a deactivation-reactivation cycle rather than a first
        /// connection.
        const DEACTIVATE_REACTIVATE = 0x0100;
    }
}

/// Drives the client finalization PDUs and the server answers.
///
/// Out-of-order client messages are tolerated: the expected flag check is
/// logged as a warning and the sequence keeps waiting, because input and
/// channel PDUs are already legal at this stage. Those frames are queued on
/// `input_events` for the active-state dispatcher.
#[derive(Debug)]
pub struct FinalizationSequence {
    state: FinalizationState,
    user_channel_id: u16,
    io_channel_id: u16,
    share_id: u32,
    flags: FinalizeFlags,
    persist_enabled: bool,

    pub input_events: Vec<Vec<u8>>,
}

#[derive(Default, Debug)]
pub enum FinalizationState {
    #[default]
    Consumed,

    WaitSynchronize,
    WaitControlCooperate,
    WaitRequestControl,
    SendControlConfirms,
    WaitPersistentKeyList,
    WaitFontList,
    SendFontMap,

    Finished,
}

impl State for FinalizationState {
    fn name(&self) -> &'static str {
        match self {
            Self::Consumed => "Consumed",
            Self::WaitSynchronize => "WaitSynchronize",
            Self::WaitControlCooperate => "WaitControlCooperate",
            Self::WaitRequestControl => "WaitRequestControl",
            Self::SendControlConfirms => "SendControlConfirms",
            Self::WaitPersistentKeyList => "WaitPersistentKeyList",
            Self::WaitFontList => "WaitFontList",
            Self::SendFontMap => "SendFontMap",
            Self::Finished => "Finished",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl Sequence for FinalizationSequence {
    fn next_pdu_hint(&self) -> Option<&dyn pdu::PduHint> {
        match &self.state {
            FinalizationState::Consumed => None,
            FinalizationState::WaitSynchronize => Some(&pdu::X224_HINT),
            FinalizationState::WaitControlCooperate => Some(&pdu::X224_HINT),
            FinalizationState::WaitRequestControl => Some(&pdu::X224_HINT),
            FinalizationState::SendControlConfirms => None,
            FinalizationState::WaitPersistentKeyList => Some(&pdu::X224_HINT),
            FinalizationState::WaitFontList => Some(&pdu::X224_HINT),
            FinalizationState::SendFontMap => None,
            FinalizationState::Finished => None,
        }
    }

    fn state(&self) -> &dyn State {
        &self.state
    }

    fn step(&mut self, input: &[u8], output: &mut WriteBuf) -> SequenceResult<Written> {
        let (written, next_state) = match std::mem::take(&mut self.state) {
            FinalizationState::WaitSynchronize => {
                self.record_client_pdu(input)?;

                if self.flags.contains(FinalizeFlags::SYNCHRONIZE) {
                    (Written::Nothing, FinalizationState::WaitControlCooperate)
                } else {
                    self.warn_unexpected(FinalizationState::WaitSynchronize.name(), FinalizeFlags::SYNCHRONIZE);
                    (Written::Nothing, FinalizationState::WaitSynchronize)
                }
            }

            FinalizationState::WaitControlCooperate => {
                self.record_client_pdu(input)?;

                if self.flags.contains(FinalizeFlags::CONTROL_COOPERATE) {
                    (Written::Nothing, FinalizationState::WaitRequestControl)
                } else {
                    self.warn_unexpected(
                        FinalizationState::WaitControlCooperate.name(),
                        FinalizeFlags::CONTROL_COOPERATE,
                    );
                    (Written::Nothing, FinalizationState::WaitControlCooperate)
                }
            }

            FinalizationState::WaitRequestControl => {
                self.record_client_pdu(input)?;

                if self.flags.contains(FinalizeFlags::CONTROL_REQUEST) {
                    (Written::Nothing, FinalizationState::SendControlConfirms)
                } else {
                    self.warn_unexpected(
                        FinalizationState::WaitRequestControl.name(),
                        FinalizeFlags::CONTROL_REQUEST,
                    );
                    (Written::Nothing, FinalizationState::WaitRequestControl)
                }
            }

            FinalizationState::SendControlConfirms => {
                let mut written = 0;

                for response in [
                    self.create_synchronize_confirm(),
                    self.create_cooperate_confirm(),
                    self.create_control_granted(),
                ] {
                    debug!(message = ?response, "Send");

                    let share_data = wrap_share_data(response, self.io_channel_id, self.share_id);
                    written +=
                        util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &share_data, output)?;
                }

                let next_state = if self.expects_persistent_key_list() {
                    FinalizationState::WaitPersistentKeyList
                } else {
                    FinalizationState::WaitFontList
                };

                (Written::from_size(written)?, next_state)
            }

            FinalizationState::WaitPersistentKeyList => {
                self.record_client_pdu(input)?;

                if self.flags.contains(FinalizeFlags::PERSISTENT_KEY_LIST) {
                    (Written::Nothing, FinalizationState::WaitFontList)
                } else if self.flags.contains(FinalizeFlags::FONT_LIST) {
                    // clients may skip the key list even when the cache is
                    // advertised; the font list moves the sequence along
                    (Written::Nothing, FinalizationState::SendFontMap)
                } else {
                    self.warn_unexpected(
                        FinalizationState::WaitPersistentKeyList.name(),
                        FinalizeFlags::PERSISTENT_KEY_LIST,
                    );
                    (Written::Nothing, FinalizationState::WaitPersistentKeyList)
                }
            }

            FinalizationState::WaitFontList => {
                self.record_client_pdu(input)?;

                if self.flags.contains(FinalizeFlags::FONT_LIST) {
                    (Written::Nothing, FinalizationState::SendFontMap)
                } else {
                    self.warn_unexpected(FinalizationState::WaitFontList.name(), FinalizeFlags::FONT_LIST);
                    (Written::Nothing, FinalizationState::WaitFontList)
                }
            }

            FinalizationState::SendFontMap => {
                let font_map = ShareDataPdu::FontMap(FontPdu::default());

                debug!(message = ?font_map, "Send");

                let share_data = wrap_share_data(font_map, self.io_channel_id, self.share_id);
                let written =
                    util::encode_send_data_indication(self.user_channel_id, self.io_channel_id, &share_data, output)?;

                (Written::from_size(written)?, FinalizationState::Finished)
            }

            _ => unreachable!(),
        };

        self.state = next_state;
        Ok(written)
    }
}

impl FinalizationSequence {
    pub fn new(user_channel_id: u16, io_channel_id: u16, share_id: u32, persist_enabled: bool, reactivation: bool) -> Self {
        let mut flags = FinalizeFlags::empty();
        if reactivation {
            flags |= FinalizeFlags::DEACTIVATE_REACTIVATE;
        }

        Self {
            state: FinalizationState::WaitSynchronize,
            user_channel_id,
            io_channel_id,
            share_id,
            flags,
            persist_enabled,
            input_events: Vec::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn flags(&self) -> FinalizeFlags {
        self.flags
    }

    /// The persistent key list only arrives on a first connection with the
    /// persistent bitmap cache enabled; reactivation cycles skip it.
    fn expects_persistent_key_list(&self) -> bool {
        self.persist_enabled && !self.flags.contains(FinalizeFlags::DEACTIVATE_REACTIVATE)
    }

    /// Decodes one client frame and records whichever finalization flag it
    /// maps to. Anything else is queued for the active-state dispatcher.
    fn record_client_pdu(&mut self, input: &[u8]) -> SequenceResult<()> {
        let data_request =
            rdpeer_core::decode::<mcs::SendDataRequest<'_>>(input).map_err(AcceptorError::decode)?;

        let share_control = match rdpeer_core::decode::<pdu::rdp::headers::ShareControlHeader>(
            data_request.user_data.as_ref(),
        ) {
            Ok(header) => header,
            Err(error) => {
                debug!(%error, "Queueing undecodable frame for the active state");
                self.input_events.push(input.to_vec());
                return Ok(());
            }
        };

        let ShareControlPdu::Data(data) = share_control.share_control_pdu else {
            debug!("Queueing non-data share control PDU for the active state");
            self.input_events.push(input.to_vec());
            return Ok(());
        };

        debug!(message = ?data.share_data_pdu, "Received");

        match &data.share_data_pdu {
            ShareDataPdu::Synchronize(_) => self.flags |= FinalizeFlags::SYNCHRONIZE,
            ShareDataPdu::Control(control) => match control.action {
                ControlAction::Cooperate => self.flags |= FinalizeFlags::CONTROL_COOPERATE,
                ControlAction::RequestControl => self.flags |= FinalizeFlags::CONTROL_REQUEST,
                _ => warn!(action = ?control.action, "Unexpected control action during finalization"),
            },
            ShareDataPdu::PersistentKeyList(list) => {
                debug!(entries = list.entries.len(), "Persistent key list received");
                self.flags |= FinalizeFlags::PERSISTENT_KEY_LIST;
            }
            ShareDataPdu::FontList(_) => self.flags |= FinalizeFlags::FONT_LIST,
            _ => {
                // Input and channel traffic is already allowed here.
                self.input_events.push(input.to_vec());
            }
        }

        Ok(())
    }

    fn warn_unexpected(&self, state: &'static str, missing: FinalizeFlags) {
        warn!(
            "Unexpected client message in state {state}, missing flag {missing:?}; tolerated per protocol"
        );
    }

    fn create_synchronize_confirm(&self) -> ShareDataPdu {
        ShareDataPdu::Synchronize(SynchronizePdu {
            target_user_id: self.user_channel_id,
        })
    }

    fn create_cooperate_confirm(&self) -> ShareDataPdu {
        ShareDataPdu::Control(ControlPdu {
            action: ControlAction::Cooperate,
            grant_id: 0,
            control_id: 0,
        })
    }

    fn create_control_granted(&self) -> ShareDataPdu {
        ShareDataPdu::Control(ControlPdu {
            action: ControlAction::GrantedControl,
            grant_id: self.user_channel_id,
            control_id: u32::from(SERVER_CHANNEL_ID),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use rdpeer_core::{encode_vec, WriteBuf};
    use rdpeer_pdu::input::{InputEvent, InputEventPdu};
    use rdpeer_pdu::rdp::finalization::{PersistentKeyListFlags, PersistentKeyListPdu};
    use rdpeer_pdu::rdp::headers::{CompressionFlags, ShareControlHeader, ShareDataHeader, StreamPriority};

    use super::*;

    fn client_frame(pdu: ShareDataPdu) -> Vec<u8> {
        let header = ShareControlHeader {
            share_control_pdu: ShareControlPdu::Data(ShareDataHeader {
                share_data_pdu: pdu,
                stream_priority: StreamPriority::Undefined,
                compression_flags: CompressionFlags::empty(),
                compression_type: 0,
            }),
            pdu_source: 1002,
            share_id: 0x0001_0001,
        };

        let user_data = encode_vec(&header).unwrap();
        encode_vec(&mcs::SendDataRequest {
            initiator_id: 1002,
            channel_id: 1003,
            user_data: Cow::Owned(user_data),
        })
        .unwrap()
    }

    fn sequence() -> FinalizationSequence {
        FinalizationSequence::new(1002, 1003, 0x0001_0001, false, false)
    }

    #[test]
    fn happy_path_sets_flags_monotonically() {
        let mut seq = sequence();
        let mut buf = WriteBuf::new();

        seq.step(&client_frame(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 0 })), &mut buf)
            .unwrap();
        assert_eq!(seq.flags(), FinalizeFlags::SYNCHRONIZE);

        seq.step(
            &client_frame(ShareDataPdu::Control(ControlPdu {
                action: ControlAction::Cooperate,
                grant_id: 0,
                control_id: 0,
            })),
            &mut buf,
        )
        .unwrap();

        seq.step(
            &client_frame(ShareDataPdu::Control(ControlPdu {
                action: ControlAction::RequestControl,
                grant_id: 0,
                control_id: 0,
            })),
            &mut buf,
        )
        .unwrap();

        // server confirms are produced without input
        let written = seq.step_no_input(&mut buf).unwrap();
        assert!(written.size().is_some());

        seq.step(&client_frame(ShareDataPdu::FontList(FontPdu::default())), &mut buf)
            .unwrap();

        let written = seq.step_no_input(&mut buf).unwrap();
        assert!(written.size().is_some());
        assert!(seq.is_done());
        assert!(seq.flags().contains(
            FinalizeFlags::SYNCHRONIZE | FinalizeFlags::CONTROL_COOPERATE | FinalizeFlags::CONTROL_REQUEST | FinalizeFlags::FONT_LIST
        ));
    }

    #[test]
    fn unexpected_message_is_tolerated() {
        let mut seq = sequence();
        let mut buf = WriteBuf::new();

        // an input PDU instead of the expected synchronize: warn, queue, stay
        let frame = client_frame(ShareDataPdu::Input(InputEventPdu {
            events: vec![(1, InputEvent::Sync { toggle_flags: 0 })],
        }));
        seq.step(&frame, &mut buf).unwrap();

        assert!(matches!(seq.state, FinalizationState::WaitSynchronize));
        assert_eq!(seq.input_events.len(), 1);

        // the real synchronize still advances the sequence
        seq.step(&client_frame(ShareDataPdu::Synchronize(SynchronizePdu { target_user_id: 0 })), &mut buf)
            .unwrap();
        assert!(matches!(seq.state, FinalizationState::WaitControlCooperate));
    }

    #[rstest::rstest]
    #[case::first_connection(true, false, true)]
    #[case::reactivation(true, true, false)]
    #[case::cache_disabled(false, false, false)]
    fn persistent_key_list_expectation(#[case] persist: bool, #[case] reactivation: bool, #[case] expected: bool) {
        let seq = FinalizationSequence::new(1002, 1003, 1, persist, reactivation);
        assert_eq!(seq.expects_persistent_key_list(), expected);
    }

    #[test]
    fn persistent_key_list_is_recorded() {
        let mut seq = FinalizationSequence::new(1002, 1003, 1, true, false);
        let mut buf = WriteBuf::new();

        // walk to the persistent key list state
        seq.state = FinalizationState::WaitPersistentKeyList;

        let frame = client_frame(ShareDataPdu::PersistentKeyList(PersistentKeyListPdu {
            num_entries: [0; 5],
            total_entries: [0; 5],
            flags: PersistentKeyListFlags::FIRST | PersistentKeyListFlags::LAST,
            entries: Vec::new(),
        }));
        seq.step(&frame, &mut buf).unwrap();

        assert!(seq.flags().contains(FinalizeFlags::PERSISTENT_KEY_LIST));
        assert!(matches!(seq.state, FinalizationState::WaitFontList));
    }
}
