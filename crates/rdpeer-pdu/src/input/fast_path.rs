//! Fast-path input PDUs (TS_FP_INPUT_PDU, [MS-RDPBCGR] 2.2.8.1.2).
//!
//! Input-only: this server core never parses fast-path output.

use rdpeer_core::{
    cast_length, ensure_size, invalid_field_err, unsupported_value_err, Decode, DecodeResult, Encode, EncodeResult,
    ReadCursor, WriteCursor,
};

const EVENT_CODE_SCANCODE: u8 = 0;
const EVENT_CODE_MOUSE: u8 = 1;
const EVENT_CODE_MOUSEX: u8 = 2;
const EVENT_CODE_SYNC: u8 = 3;
const EVENT_CODE_UNICODE: u8 = 4;

/// One fast-path input event; the five event flag bits travel with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathInputEvent {
    ScanCode { flags: u8, key_code: u8 },
    Mouse { pointer_flags: u16, x: u16, y: u16 },
    ExtendedMouse { pointer_flags: u16, x: u16, y: u16 },
    Sync { flags: u8 },
    Unicode { flags: u8, code: u16 },
}

impl FastPathInputEvent {
    fn event_header(&self) -> u8 {
        let (code, flags) = match self {
            Self::ScanCode { flags, .. } => (EVENT_CODE_SCANCODE, *flags),
            Self::Mouse { .. } => (EVENT_CODE_MOUSE, 0),
            Self::ExtendedMouse { .. } => (EVENT_CODE_MOUSEX, 0),
            Self::Sync { flags } => (EVENT_CODE_SYNC, *flags),
            Self::Unicode { flags, .. } => (EVENT_CODE_UNICODE, *flags),
        };

        (code << 5) | (flags & 0x1F)
    }

    fn data_size(&self) -> usize {
        match self {
            Self::ScanCode { .. } => 1,
            Self::Mouse { .. } | Self::ExtendedMouse { .. } => 6,
            Self::Sync { .. } => 0,
            Self::Unicode { .. } => 2,
        }
    }
}

/// A complete fast-path input frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPathInput {
    pub events: Vec<FastPathInputEvent>,
}

impl FastPathInput {
    const NAME: &'static str = "FastPathInput";

    const MAX_COMPACT_EVENT_COUNT: usize = 15;

    fn events_size(&self) -> usize {
        self.events.iter().map(|e| 1 + e.data_size()).sum()
    }
}

impl Encode for FastPathInput {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        let compact_count = if self.events.len() <= Self::MAX_COMPACT_EVENT_COUNT {
            self.events.len()
        } else {
            0
        };

        // fpInputHeader: action = FASTPATH_INPUT_ACTION_FASTPATH (0),
        // numEvents in bits 2..6, secFlags zero (no fast-path encryption)
        dst.write_u8(u8::try_from(compact_count).expect("bounded above") << 2);

        let length = self.size();
        if length < 0x80 {
            dst.write_u8(u8::try_from(length).expect("checked above"));
        } else {
            dst.write_u16_be(cast_length!("length", length | 0x8000)?);
        }

        if compact_count == 0 {
            dst.write_u8(cast_length!("numEvents", self.events.len())?);
        }

        for event in &self.events {
            dst.write_u8(event.event_header());
            match event {
                FastPathInputEvent::ScanCode { key_code, .. } => dst.write_u8(*key_code),
                FastPathInputEvent::Mouse { pointer_flags, x, y }
                | FastPathInputEvent::ExtendedMouse { pointer_flags, x, y } => {
                    dst.write_u16(*pointer_flags);
                    dst.write_u16(*x);
                    dst.write_u16(*y);
                }
                FastPathInputEvent::Sync { .. } => {}
                FastPathInputEvent::Unicode { code, .. } => dst.write_u16(*code),
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let events_size = self.events_size();
        let optional_count = if self.events.len() <= Self::MAX_COMPACT_EVENT_COUNT {
            0
        } else {
            1
        };

        // one-byte length encoding keeps frames under 0x80 compact
        let base = 1 /* fpInputHeader */ + 1 /* length1 */ + optional_count + events_size;
        if base < 0x80 {
            base
        } else {
            base + 1 /* length2 */
        }
    }
}

impl<'de> Decode<'de> for FastPathInput {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_size!(in: src, size: 2);

        let header = src.read_u8();
        if header & 0b11 != 0 {
            return Err(invalid_field_err!("fpInputHeader", "not a fast-path input header"));
        }
        if header & 0xC0 != 0 {
            return Err(invalid_field_err!(
                "fpInputHeader",
                "fast-path encryption is not supported"
            ));
        }

        let length1 = src.read_u8();
        if length1 & 0x80 != 0 {
            ensure_size!(in: src, size: 1);
            let _length2 = src.read_u8();
        }

        let mut num_events = usize::from((header >> 2) & 0x0F);
        if num_events == 0 {
            ensure_size!(in: src, size: 1);
            num_events = usize::from(src.read_u8());
        }

        let mut events = Vec::with_capacity(num_events);
        for _ in 0..num_events {
            ensure_size!(in: src, size: 1);
            let event_header = src.read_u8();
            let code = event_header >> 5;
            let flags = event_header & 0x1F;

            let event = match code {
                EVENT_CODE_SCANCODE => {
                    ensure_size!(in: src, size: 1);
                    FastPathInputEvent::ScanCode {
                        flags,
                        key_code: src.read_u8(),
                    }
                }
                EVENT_CODE_MOUSE => {
                    ensure_size!(in: src, size: 6);
                    FastPathInputEvent::Mouse {
                        pointer_flags: src.read_u16(),
                        x: src.read_u16(),
                        y: src.read_u16(),
                    }
                }
                EVENT_CODE_MOUSEX => {
                    ensure_size!(in: src, size: 6);
                    FastPathInputEvent::ExtendedMouse {
                        pointer_flags: src.read_u16(),
                        x: src.read_u16(),
                        y: src.read_u16(),
                    }
                }
                EVENT_CODE_SYNC => FastPathInputEvent::Sync { flags },
                EVENT_CODE_UNICODE => {
                    ensure_size!(in: src, size: 2);
                    FastPathInputEvent::Unicode {
                        flags,
                        code: src.read_u16(),
                    }
                }
                unknown => {
                    return Err(unsupported_value_err(
                        Self::NAME,
                        "eventCode",
                        format!("{unknown}"),
                    ))
                }
            };

            events.push(event);
        }

        Ok(Self { events })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn compact_frame_round_trip() {
        let pdu = FastPathInput {
            events: vec![
                FastPathInputEvent::ScanCode {
                    flags: 0,
                    key_code: 0x1C,
                },
                FastPathInputEvent::Mouse {
                    pointer_flags: 0x0800,
                    x: 10,
                    y: 20,
                },
                FastPathInputEvent::Sync { flags: 0x02 },
            ],
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());
        // numEvents travels in the header byte
        assert_eq!(encoded[0] >> 2, 3);

        let decoded: FastPathInput = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn large_event_count_uses_trailing_byte() {
        let pdu = FastPathInput {
            events: vec![FastPathInputEvent::Sync { flags: 0 }; 20],
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded[0] >> 2, 0);
        assert_eq!(encoded[2], 20);

        let decoded: FastPathInput = decode(&encoded).unwrap();
        assert_eq!(decoded.events.len(), 20);
    }

    #[test]
    fn encrypted_frames_are_rejected() {
        let bytes = [0x84, 0x04, 0x00, 0x00];
        assert!(decode::<FastPathInput>(&bytes).is_err());
    }
}
