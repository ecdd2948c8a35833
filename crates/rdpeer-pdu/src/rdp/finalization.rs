//! The client/server PDUs of the connection finalization phase.

use bitflags::bitflags;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

use crate::gcc::{Monitor, MONITOR_SIZE};

const SYNCHRONIZE_PDU_SIZE: usize = 2 + 2;
const CONTROL_PDU_SIZE: usize = 2 + 2 + 4;
const FONT_PDU_SIZE: usize = 2 * 4;
const SYNCHRONIZE_MESSAGE_TYPE: u16 = 1;
const MAX_MONITOR_COUNT: u32 = 64;

const CACHE_COUNT: usize = 5;
const PERSISTENT_KEY_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizePdu {
    pub target_user_id: u16,
}

impl SynchronizePdu {
    const NAME: &'static str = "SynchronizePdu";

    const FIXED_PART_SIZE: usize = SYNCHRONIZE_PDU_SIZE;
}

impl Encode for SynchronizePdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(SYNCHRONIZE_MESSAGE_TYPE);
        dst.write_u16(self.target_user_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for SynchronizePdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let message_type = src.read_u16();
        if message_type != SYNCHRONIZE_MESSAGE_TYPE {
            return Err(invalid_field_err!("messageType", "invalid message type"));
        }

        let target_user_id = src.read_u16();

        Ok(Self { target_user_id })
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    RequestControl = 1,
    GrantedControl = 2,
    Detach = 3,
    Cooperate = 4,
}

impl ControlAction {
    fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::RequestControl),
            2 => Some(Self::GrantedControl),
            3 => Some(Self::Detach),
            4 => Some(Self::Cooperate),
            _ => None,
        }
    }

    fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPdu {
    pub action: ControlAction,
    pub grant_id: u16,
    pub control_id: u32,
}

impl ControlPdu {
    const NAME: &'static str = "ControlPdu";

    const FIXED_PART_SIZE: usize = CONTROL_PDU_SIZE;
}

impl Encode for ControlPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.action.as_u16());
        dst.write_u16(self.grant_id);
        dst.write_u32(self.control_id);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for ControlPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let action = ControlAction::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err!("action", "invalid control action"))?;
        let grant_id = src.read_u16();
        let control_id = src.read_u32();

        Ok(Self {
            action,
            grant_id,
            control_id,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SequenceFlags: u16 {
        const FIRST = 1;
        const LAST = 2;
    }
}

/// [2.2.1.22.1] Font Map PDU Data (TS_FONT_MAP_PDU), also used for the
/// client's font list.
///
/// [2.2.1.22.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/b4e557f3-7540-46fc-815d-0c12299cf1ee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontPdu {
    pub number: u16,
    pub total_number: u16,
    pub flags: SequenceFlags,
    pub entry_size: u16,
}

impl Default for FontPdu {
    fn default() -> Self {
        // Those values are recommended in [2.2.1.22.1].
        Self {
            number: 0,
            total_number: 0,
            flags: SequenceFlags::FIRST | SequenceFlags::LAST,
            entry_size: 4,
        }
    }
}

impl FontPdu {
    const NAME: &'static str = "FontPdu";

    const FIXED_PART_SIZE: usize = FONT_PDU_SIZE;
}

impl Encode for FontPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u16(self.number);
        dst.write_u16(self.total_number);
        dst.write_u16(self.flags.bits());
        dst.write_u16(self.entry_size);

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

impl<'de> Decode<'de> for FontPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let number = src.read_u16();
        let total_number = src.read_u16();
        let flags = SequenceFlags::from_bits(src.read_u16())
            .ok_or_else(|| invalid_field_err!("flags", "invalid sequence flags"))?;
        let entry_size = src.read_u16();

        Ok(Self {
            number,
            total_number,
            flags,
            entry_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLayoutPdu {
    pub monitors: Vec<Monitor>,
}

impl MonitorLayoutPdu {
    const NAME: &'static str = "MonitorLayoutPdu";

    const FIXED_PART_SIZE: usize = 4 /* nMonitors */;
}

impl Encode for MonitorLayoutPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(cast_length!("nMonitors", self.monitors.len())?);

        for monitor in self.monitors.iter() {
            monitor.encode(dst)?;
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.monitors.len() * MONITOR_SIZE
    }
}

impl<'de> Decode<'de> for MonitorLayoutPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let monitor_count = src.read_u32();
        if monitor_count > MAX_MONITOR_COUNT {
            return Err(invalid_field_err!("nMonitors", "invalid monitor count"));
        }

        let mut monitors = Vec::with_capacity(monitor_count as usize);
        for _ in 0..monitor_count {
            monitors.push(Monitor::decode(src)?);
        }

        Ok(Self { monitors })
    }
}

bitflags! {
    /// `bBitMask` of TS_BITMAPCACHE_PERSISTENT_LIST_PDU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PersistentKeyListFlags: u8 {
        const FIRST = 0x01;
        const LAST = 0x02;
    }
}

/// A 64-bit persistent bitmap cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentCacheKey {
    pub key1: u32,
    pub key2: u32,
}

/// TS_BITMAPCACHE_PERSISTENT_LIST_PDU: the keys the client saved to disk in
/// an earlier session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentKeyListPdu {
    pub num_entries: [u16; CACHE_COUNT],
    pub total_entries: [u16; CACHE_COUNT],
    pub flags: PersistentKeyListFlags,
    pub entries: Vec<PersistentCacheKey>,
}

impl PersistentKeyListPdu {
    const NAME: &'static str = "PersistentKeyListPdu";

    const FIXED_PART_SIZE: usize = CACHE_COUNT * 2 * 2 + 1 /* bBitMask */ + 1 /* pad2 */ + 2 /* pad3 */;
}

impl Encode for PersistentKeyListPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        for count in self.num_entries {
            dst.write_u16(count);
        }
        for count in self.total_entries {
            dst.write_u16(count);
        }
        dst.write_u8(self.flags.bits());
        write_padding!(dst, 3);

        for entry in &self.entries {
            dst.write_u32(entry.key1);
            dst.write_u32(entry.key2);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.entries.len() * PERSISTENT_KEY_SIZE
    }
}

impl<'de> Decode<'de> for PersistentKeyListPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let mut num_entries = [0u16; CACHE_COUNT];
        for count in &mut num_entries {
            *count = src.read_u16();
        }
        let mut total_entries = [0u16; CACHE_COUNT];
        for count in &mut total_entries {
            *count = src.read_u16();
        }
        let flags = PersistentKeyListFlags::from_bits_truncate(src.read_u8());
        read_padding!(src, 3);

        let advertised: usize = num_entries.iter().map(|&c| usize::from(c)).sum();
        ensure_size!(in: src, size: advertised * PERSISTENT_KEY_SIZE);

        let mut entries = Vec::with_capacity(advertised);
        for _ in 0..advertised {
            entries.push(PersistentCacheKey {
                key1: src.read_u32(),
                key2: src.read_u32(),
            });
        }

        Ok(Self {
            num_entries,
            total_entries,
            flags,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;
    use crate::gcc::MonitorFlags;

    #[test]
    fn control_pdu_round_trip() {
        let pdu = ControlPdu {
            action: ControlAction::Cooperate,
            grant_id: 0,
            control_id: 0,
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded, [0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let decoded: ControlPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn monitor_layout_round_trip() {
        let pdu = MonitorLayoutPdu {
            monitors: vec![Monitor {
                left: 0,
                top: 0,
                right: 1920,
                bottom: 1080,
                flags: MonitorFlags::PRIMARY,
            }],
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: MonitorLayoutPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn persistent_key_list_round_trip() {
        let pdu = PersistentKeyListPdu {
            num_entries: [2, 0, 0, 0, 0],
            total_entries: [2, 0, 0, 0, 0],
            flags: PersistentKeyListFlags::FIRST | PersistentKeyListFlags::LAST,
            entries: vec![
                PersistentCacheKey { key1: 1, key2: 2 },
                PersistentCacheKey {
                    key1: 0xDEAD,
                    key2: 0xBEEF,
                },
            ],
        };

        let encoded = encode_vec(&pdu).unwrap();
        let decoded: PersistentKeyListPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }
}
