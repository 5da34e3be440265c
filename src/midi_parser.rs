use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyKeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
}

impl MessageKind {
    /// Classifies a status byte by its high nibble. System messages (0xF_) are not handled.
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xf0 {
            0x80 => Some(MessageKind::NoteOff),
            0x90 => Some(MessageKind::NoteOn),
            0xa0 => Some(MessageKind::PolyKeyPressure),
            0xb0 => Some(MessageKind::ControlChange),
            0xc0 => Some(MessageKind::ProgramChange),
            0xd0 => Some(MessageKind::ChannelPressure),
            0xe0 => Some(MessageKind::PitchBend),
            _ => None,
        }
    }

    pub fn data_len(&self) -> usize {
        match self {
            MessageKind::ProgramChange | MessageKind::ChannelPressure => 1,
            _ => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::NoteOff => "note off",
            MessageKind::NoteOn => "note on",
            MessageKind::PolyKeyPressure => "polyphonic key pressure",
            MessageKind::ControlChange => "control change",
            MessageKind::ProgramChange => "program change",
            MessageKind::ChannelPressure => "channel pressure",
            MessageKind::PitchBend => "pitch bend",
        }
    }
}

/// A single framed channel message: status byte plus one or two data bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MidiMessage {
    pub kind: MessageKind,
    pub channel: u8,
    bytes: [u8; 3],
}

impl MidiMessage {
    pub fn new(kind: MessageKind, channel: u8, data1: u8, data2: u8) -> Self {
        let status = match kind {
            MessageKind::NoteOff => 0x80,
            MessageKind::NoteOn => 0x90,
            MessageKind::PolyKeyPressure => 0xa0,
            MessageKind::ControlChange => 0xb0,
            MessageKind::ProgramChange => 0xc0,
            MessageKind::ChannelPressure => 0xd0,
            MessageKind::PitchBend => 0xe0,
        };
        let data2 = if kind.data_len() == 2 { data2 & 0x7f } else { 0 };

        Self {
            kind,
            channel: channel & 0x0f,
            bytes: [status | (channel & 0x0f), data1 & 0x7f, data2],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..1 + self.kind.data_len()]
    }

    pub fn data1(&self) -> u8 {
        self.bytes[1]
    }

    /// Second data byte, zero for single data byte messages.
    pub fn data2(&self) -> u8 {
        self.bytes[2]
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        for b in self.as_bytes() {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}

/// Byte-at-a-time framer. No running status: every message must begin with its own status byte,
/// anything else seen while waiting for one is dropped.
pub struct MidiFramer {
    buffer: [u8; 3],
    kind: Option<MessageKind>,
    len: usize,
}

impl MidiFramer {
    pub fn new() -> Self {
        Self {
            buffer: [0; 3],
            kind: None,
            len: 0,
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<MidiMessage> {
        let Some(kind) = self.kind else {
            if byte & 0x80 == 0 {
                return None;
            }

            // unrecognized status bytes are discarded and we keep looking for the next one
            self.kind = MessageKind::from_status(byte);
            self.buffer = [byte, 0, 0];
            self.len = 1;
            return None;
        };

        // data bytes are taken as-is, a stray status byte here desyncs us until the next frame
        self.buffer[self.len] = byte;
        self.len += 1;

        if self.len > kind.data_len() {
            self.kind = None;
            Some(MidiMessage {
                kind,
                channel: self.buffer[0] & 0x0f,
                bytes: self.buffer,
            })
        } else {
            None
        }
    }
}

impl Default for MidiFramer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads from `reader` one byte at a time until a complete message has been framed.
///
/// Bytes are never read ahead of the message, so a reactor's readiness for the underlying
/// endpoint still reflects whether another message is pending.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    framer: &mut MidiFramer,
) -> std::io::Result<MidiMessage> {
    loop {
        let byte = reader.read_u8().await?;
        if let Some(message) = framer.push(byte) {
            return Ok(message);
        }
    }
}
