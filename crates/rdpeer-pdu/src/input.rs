//! Client input PDUs: the slow-path input event PDU and the fast-path
//! input framing used once the connection is active.

pub mod fast_path;

use rdpeer_core::{
    cast_length, ensure_fixed_part_size, ensure_size, read_padding, unsupported_value_err, write_padding, Decode,
    DecodeResult, Encode, EncodeResult, ReadCursor, WriteCursor,
};

const INPUT_EVENT_SIZE: usize = 4 /* eventTime */ + 2 /* messageType */ + 6 /* data */;

const TYPE_SYNC: u16 = 0x0000;
const TYPE_SCANCODE: u16 = 0x0004;
const TYPE_UNICODE: u16 = 0x0005;
const TYPE_MOUSE: u16 = 0x8001;
const TYPE_MOUSEX: u16 = 0x8002;

/// One slow-path input event (TS_INPUT_EVENT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Sync { toggle_flags: u32 },
    ScanCode { flags: u16, key_code: u16 },
    Unicode { flags: u16, code: u16 },
    Mouse { flags: u16, x: u16, y: u16 },
    ExtendedMouse { flags: u16, x: u16, y: u16 },
}

impl InputEvent {
    fn message_type(&self) -> u16 {
        match self {
            Self::Sync { .. } => TYPE_SYNC,
            Self::ScanCode { .. } => TYPE_SCANCODE,
            Self::Unicode { .. } => TYPE_UNICODE,
            Self::Mouse { .. } => TYPE_MOUSE,
            Self::ExtendedMouse { .. } => TYPE_MOUSEX,
        }
    }
}

/// TS_INPUT_PDU_DATA: a batch of slow-path input events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEventPdu {
    pub events: Vec<(u32, InputEvent)>,
}

impl InputEventPdu {
    const NAME: &'static str = "InputEventPdu";

    const FIXED_PART_SIZE: usize = 2 /* numEvents */ + 2 /* pad2Octets */;
}

impl Encode for InputEventPdu {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> EncodeResult<()> {
        ensure_size!(in: dst, size: self.size());

        dst.write_u16(cast_length!("numEvents", self.events.len())?);
        write_padding!(dst, 2);

        for (event_time, event) in &self.events {
            dst.write_u32(*event_time);
            dst.write_u16(event.message_type());

            match event {
                InputEvent::Sync { toggle_flags } => {
                    write_padding!(dst, 2);
                    dst.write_u32(*toggle_flags);
                }
                InputEvent::ScanCode { flags, key_code } => {
                    dst.write_u16(*flags);
                    dst.write_u16(*key_code);
                    write_padding!(dst, 2);
                }
                InputEvent::Unicode { flags, code } => {
                    dst.write_u16(*flags);
                    dst.write_u16(*code);
                    write_padding!(dst, 2);
                }
                InputEvent::Mouse { flags, x, y } | InputEvent::ExtendedMouse { flags, x, y } => {
                    dst.write_u16(*flags);
                    dst.write_u16(*x);
                    dst.write_u16(*y);
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE + self.events.len() * INPUT_EVENT_SIZE
    }
}

impl<'de> Decode<'de> for InputEventPdu {
    fn decode(src: &mut ReadCursor<'de>) -> DecodeResult<Self> {
        ensure_fixed_part_size!(in: src);

        let num_events = usize::from(src.read_u16());
        read_padding!(src, 2);

        ensure_size!(in: src, size: num_events * INPUT_EVENT_SIZE);

        let mut events = Vec::with_capacity(num_events);
        for _ in 0..num_events {
            let event_time = src.read_u32();
            let message_type = src.read_u16();

            let event = match message_type {
                TYPE_SYNC => {
                    read_padding!(src, 2);
                    InputEvent::Sync {
                        toggle_flags: src.read_u32(),
                    }
                }
                TYPE_SCANCODE => {
                    let flags = src.read_u16();
                    let key_code = src.read_u16();
                    read_padding!(src, 2);
                    InputEvent::ScanCode { flags, key_code }
                }
                TYPE_UNICODE => {
                    let flags = src.read_u16();
                    let code = src.read_u16();
                    read_padding!(src, 2);
                    InputEvent::Unicode { flags, code }
                }
                TYPE_MOUSE => InputEvent::Mouse {
                    flags: src.read_u16(),
                    x: src.read_u16(),
                    y: src.read_u16(),
                },
                TYPE_MOUSEX => InputEvent::ExtendedMouse {
                    flags: src.read_u16(),
                    x: src.read_u16(),
                    y: src.read_u16(),
                },
                unknown => {
                    return Err(unsupported_value_err(
                        Self::NAME,
                        "messageType",
                        format!("0x{unknown:04X}"),
                    ))
                }
            };

            events.push((event_time, event));
        }

        Ok(Self { events })
    }
}

#[cfg(test)]
mod tests {
    use rdpeer_core::{decode, encode_vec};

    use super::*;

    #[test]
    fn input_event_pdu_round_trip() {
        let pdu = InputEventPdu {
            events: vec![
                (100, InputEvent::Sync { toggle_flags: 0x02 }),
                (
                    110,
                    InputEvent::ScanCode {
                        flags: 0x0000,
                        key_code: 0x1E,
                    },
                ),
                (
                    120,
                    InputEvent::Mouse {
                        flags: 0x1000,
                        x: 320,
                        y: 240,
                    },
                ),
            ],
        };

        let encoded = encode_vec(&pdu).unwrap();
        assert_eq!(encoded.len(), pdu.size());

        let decoded: InputEventPdu = decode(&encoded).unwrap();
        assert_eq!(decoded, pdu);
    }
}
