#![cfg_attr(doc, doc = include_str!("../README.md"))]

use std::any::Any;
use std::borrow::Cow;

use thiserror::Error;

// Re-export rdpeer_pdu crate for convenience
#[rustfmt::skip] // do not re-order this pub use
pub use rdpeer_pdu as pdu;

use rdpeer_core::{encode_buf, EncodeError, WriteBuf};
use rdpeer_pdu::gcc::{ChannelDef, ChannelName, ChannelOptions};
use rdpeer_pdu::mcs::SendDataIndication;
use rdpeer_pdu::rdp::vc::{ChannelControlFlags, ChannelPduHeader};

/// Default chunk length for static virtual channel writes
/// ([MS-RDPBCGR] 2.2.6.1, `CHANNEL_CHUNK_LENGTH`).
pub const CHANNEL_CHUNK_LENGTH: usize = 1600;

/// At most 31 optional static channels plus the IO channel.
pub const MAX_STATIC_CHANNELS: usize = 31;

pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel name is longer than eight bytes")]
    NameTooLong,
    #[error("no static channel is named {0:?}")]
    UnknownChannel(String),
    #[error("static channel {0:?} has not been joined")]
    NotJoined(String),
    #[error("dynamic channels are not handled by the static channel multiplexer")]
    DynamicChannelRejected,
    #[error("stale or invalid peer channel handle")]
    InvalidHandle,
    #[error("chunk size must not be zero")]
    ZeroChunkSize,
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}

bitflags::bitflags! {
    /// Flags accepted when opening a channel, mirroring the WTS open flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Dynamic virtual channels flow through a separate component.
        const DYNAMIC = 0x0000_0001;
    }
}

/// A handle to an open peer channel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(u16);

impl ChannelHandle {
    pub fn index(self) -> u16 {
        self.0
    }
}

/// One MCS static channel as negotiated in the GCC network data.
#[derive(Debug, Clone)]
struct McsChannel {
    def: ChannelDef,
    channel_id: u16,
    joined: bool,
    peer: Option<u16>,
}

/// The server-side peer binding of an open static channel.
pub struct PeerChannel {
    index: u16,
    channel_id: u16,
    options: ChannelOptions,
    user_data: Option<Box<dyn Any + Send>>,
}

impl PeerChannel {
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }
}

impl core::fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeerChannel")
            .field("index", &self.index)
            .field("channel_id", &self.channel_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// The table of negotiated static channels and their open peer bindings.
///
/// Invariants: channel names and ids are unique, only joined channels accept
/// data, and each MCS channel has at most one open peer binding.
#[derive(Debug, Default)]
pub struct StaticChannelSet {
    channels: Vec<McsChannel>,
    peers: Vec<Option<PeerChannel>>,
}

impl StaticChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the channels requested by the client, assigning sequential
    /// ids starting right after the IO channel.
    pub fn from_channel_defs(defs: &[ChannelDef], first_channel_id: u16) -> Self {
        let channels = defs
            .iter()
            .enumerate()
            .map(|(i, def)| McsChannel {
                def: *def,
                channel_id: first_channel_id + u16::try_from(i).expect("at most 31 channels"),
                joined: false,
                peer: None,
            })
            .collect();

        Self {
            channels,
            peers: Vec::new(),
        }
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.channels.iter().map(|c| c.channel_id)
    }

    pub fn channel_defs(&self) -> impl Iterator<Item = &ChannelDef> {
        self.channels.iter().map(|c| &c.def)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Marks a channel as joined. Returns false when the id is not ours.
    pub fn mark_joined(&mut self, channel_id: u16) -> bool {
        match self.channels.iter_mut().find(|c| c.channel_id == channel_id) {
            Some(channel) => {
                channel.joined = true;
                true
            }
            None => false,
        }
    }

    pub fn is_joined(&self, channel_id: u16) -> bool {
        self.channels.iter().any(|c| c.channel_id == channel_id && c.joined)
    }

    pub fn name_of(&self, channel_id: u16) -> Option<ChannelName> {
        self.channels
            .iter()
            .find(|c| c.channel_id == channel_id)
            .map(|c| c.def.name)
    }

    /// Opens a peer binding on the named channel.
    ///
    /// Lookup is case-insensitive. An already-open channel yields the
    /// existing handle.
    pub fn open(&mut self, name: &str, flags: OpenFlags) -> ChannelResult<ChannelHandle> {
        if name.len() > ChannelName::SIZE {
            return Err(ChannelError::NameTooLong);
        }

        if flags.contains(OpenFlags::DYNAMIC) {
            return Err(ChannelError::DynamicChannelRejected);
        }

        let channel = self
            .channels
            .iter_mut()
            .find(|c| c.def.name.eq_ignore_case(name))
            .ok_or_else(|| ChannelError::UnknownChannel(name.to_owned()))?;

        if !channel.joined {
            return Err(ChannelError::NotJoined(name.to_owned()));
        }

        if let Some(index) = channel.peer {
            return Ok(ChannelHandle(index));
        }

        let index = u16::try_from(self.peers.len()).expect("bounded by MAX_STATIC_CHANNELS");
        let peer = PeerChannel {
            index,
            channel_id: channel.channel_id,
            options: channel.def.options,
            user_data: None,
        };

        channel.peer = Some(index);
        self.peers.push(Some(peer));

        Ok(ChannelHandle(index))
    }

    /// Closes a peer binding, unlinking it from its MCS channel.
    pub fn close(&mut self, handle: ChannelHandle) -> ChannelResult<()> {
        let slot = self
            .peers
            .get_mut(usize::from(handle.0))
            .ok_or(ChannelError::InvalidHandle)?;
        let peer = slot.take().ok_or(ChannelError::InvalidHandle)?;

        if let Some(channel) = self.channels.iter_mut().find(|c| c.channel_id == peer.channel_id) {
            channel.peer = None;
        }

        Ok(())
    }

    pub fn get(&self, handle: ChannelHandle) -> ChannelResult<&PeerChannel> {
        self.peers
            .get(usize::from(handle.0))
            .and_then(Option::as_ref)
            .ok_or(ChannelError::InvalidHandle)
    }

    pub fn get_by_channel_id(&self, channel_id: u16) -> Option<&PeerChannel> {
        self.peers
            .iter()
            .flatten()
            .find(|peer| peer.channel_id == channel_id)
    }

    /// Returns the opaque application pointer stored on the peer channel.
    pub fn get_data(&self, handle: ChannelHandle) -> ChannelResult<Option<&(dyn Any + Send)>> {
        Ok(self.get(handle)?.user_data.as_deref())
    }

    /// Stores an opaque application pointer on the peer channel.
    pub fn set_data(&mut self, handle: ChannelHandle, data: Box<dyn Any + Send>) -> ChannelResult<()> {
        let peer = self
            .peers
            .get_mut(usize::from(handle.0))
            .and_then(Option::as_mut)
            .ok_or(ChannelError::InvalidHandle)?;
        peer.user_data = Some(data);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.peers.clear();
    }
}

/// One wire chunk of a channel write.
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub header: ChannelPduHeader,
    pub payload: &'a [u8],
}

/// Splits `data` into chunks of at most `chunk_size` bytes.
///
/// The first chunk carries FIRST, the final chunk LAST; a write that fits a
/// single chunk carries both. SHOW_PROTOCOL is set on every chunk when the
/// channel options request it.
pub fn chunkify(data: &[u8], chunk_size: usize, show_protocol: bool) -> ChannelResult<Vec<Chunk<'_>>> {
    if chunk_size == 0 {
        return Err(ChannelError::ZeroChunkSize);
    }

    let total_length = u32::try_from(data.len()).map_err(|_| ChannelError::ZeroChunkSize)?;

    // An empty write still produces one FIRST|LAST chunk.
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![&[]]
    } else {
        data.chunks(chunk_size).collect()
    };
    let count = pieces.len();

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let mut flags = ChannelControlFlags::empty();
            if i == 0 {
                flags |= ChannelControlFlags::FLAG_FIRST;
            }
            if i == count - 1 {
                flags |= ChannelControlFlags::FLAG_LAST;
            }
            if show_protocol {
                flags |= ChannelControlFlags::FLAG_SHOW_PROTOCOL;
            }

            Chunk {
                header: ChannelPduHeader {
                    length: total_length,
                    flags,
                },
                payload,
            }
        })
        .collect())
}

/// Encodes a full channel write as MCS send-data-indication frames, one per
/// chunk, and returns the number of bytes appended to `buf`.
///
/// Failure of any chunk aborts the write; nothing partial is reported back.
pub fn encode_channel_data(
    initiator_id: u16,
    channel_id: u16,
    data: &[u8],
    chunk_size: usize,
    show_protocol: bool,
    buf: &mut WriteBuf,
) -> ChannelResult<usize> {
    let mut written = 0;

    for chunk in chunkify(data, chunk_size, show_protocol)? {
        let header_size = rdpeer_pdu::rdp::vc::CHANNEL_PDU_HEADER_SIZE;
        let mut user_data = vec![0u8; header_size + chunk.payload.len()];
        let header_written = rdpeer_core::encode(&chunk.header, &mut user_data)?;
        debug_assert_eq!(header_written, header_size);
        user_data[header_size..].copy_from_slice(chunk.payload);

        let indication = SendDataIndication {
            initiator_id,
            channel_id,
            user_data: Cow::Owned(user_data),
        };

        written += encode_buf(&indication, buf)?;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample_set() -> StaticChannelSet {
        let defs = [
            ChannelDef {
                name: ChannelName::from_str("rdpsnd").unwrap(),
                options: ChannelOptions::INITIALIZED,
            },
            ChannelDef {
                name: ChannelName::from_str("cliprdr").unwrap(),
                options: ChannelOptions::INITIALIZED | ChannelOptions::SHOW_PROTOCOL,
            },
        ];
        StaticChannelSet::from_channel_defs(&defs, 1004)
    }

    #[test]
    fn open_requires_join() {
        let mut set = sample_set();

        assert!(matches!(set.open("rdpsnd", OpenFlags::empty()), Err(ChannelError::NotJoined(_))));

        assert!(set.mark_joined(1004));
        let handle = set.open("rdpsnd", OpenFlags::empty()).unwrap();
        assert_eq!(set.get(handle).unwrap().channel_id(), 1004);
    }

    #[test]
    fn open_is_case_insensitive_and_idempotent() {
        let mut set = sample_set();
        set.mark_joined(1004);

        let first = set.open("RDPSND", OpenFlags::empty()).unwrap();
        let second = set.open("rdpsnd", OpenFlags::empty()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn open_rejects_bad_names_and_dynamic_flag() {
        let mut set = sample_set();
        set.mark_joined(1004);

        assert!(matches!(
            set.open("waytoolongname", OpenFlags::empty()),
            Err(ChannelError::NameTooLong)
        ));
        assert!(matches!(
            set.open("nosuch", OpenFlags::empty()),
            Err(ChannelError::UnknownChannel(_))
        ));
        assert!(matches!(
            set.open("rdpsnd", OpenFlags::DYNAMIC),
            Err(ChannelError::DynamicChannelRejected)
        ));
    }

    #[test]
    fn close_unlinks_both_directions() {
        let mut set = sample_set();
        set.mark_joined(1004);

        let handle = set.open("rdpsnd", OpenFlags::empty()).unwrap();
        set.close(handle).unwrap();

        assert!(set.get(handle).is_err());
        assert!(set.get_by_channel_id(1004).is_none());

        // a fresh open allocates a new binding
        let reopened = set.open("rdpsnd", OpenFlags::empty()).unwrap();
        assert_ne!(reopened, handle);
    }

    #[test]
    fn user_data_slot_round_trip() {
        let mut set = sample_set();
        set.mark_joined(1004);
        let handle = set.open("rdpsnd", OpenFlags::empty()).unwrap();

        assert!(set.get_data(handle).unwrap().is_none());
        set.set_data(handle, Box::new(42u64)).unwrap();

        let data = set.get_data(handle).unwrap().unwrap();
        assert_eq!(data.downcast_ref::<u64>(), Some(&42));
    }

    #[test]
    fn chunkify_three_chunks_with_flags() {
        let data = vec![0xA5u8; 3700];
        let chunks = chunkify(&data, 1600, false).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].payload.len(), 1600);
        assert_eq!(chunks[1].payload.len(), 1600);
        assert_eq!(chunks[2].payload.len(), 500);

        assert_eq!(chunks[0].header.flags, ChannelControlFlags::FLAG_FIRST);
        assert_eq!(chunks[1].header.flags, ChannelControlFlags::empty());
        assert_eq!(chunks[2].header.flags, ChannelControlFlags::FLAG_LAST);

        for chunk in &chunks {
            assert_eq!(chunk.header.length, 3700);
        }
    }

    #[test]
    fn chunkify_single_chunk_has_first_and_last() {
        let data = [1u8, 2, 3];
        let chunks = chunkify(&data, CHANNEL_CHUNK_LENGTH, true).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].header.flags,
            ChannelControlFlags::FLAG_FIRST | ChannelControlFlags::FLAG_LAST | ChannelControlFlags::FLAG_SHOW_PROTOCOL
        );
    }

    proptest! {
        #[test]
        fn chunkify_invariants(len in 0usize..20_000, chunk_size in 1usize..4096) {
            let data = vec![0u8; len];
            let chunks = chunkify(&data, chunk_size, false).unwrap();

            let expected = if len == 0 { 1 } else { len.div_ceil(chunk_size) };
            prop_assert_eq!(chunks.len(), expected);

            prop_assert!(chunks[0].header.flags.contains(ChannelControlFlags::FLAG_FIRST));
            prop_assert!(chunks[chunks.len() - 1].header.flags.contains(ChannelControlFlags::FLAG_LAST));

            let reassembled: usize = chunks.iter().map(|c| c.payload.len()).sum();
            prop_assert_eq!(reassembled, len);

            for chunk in &chunks {
                prop_assert!(chunk.payload.len() <= chunk_size);
                prop_assert_eq!(chunk.header.length as usize, len);
            }
        }
    }
}
