use crate::{
    hid::{EventKind, HidEvent},
    mapping::{ButtonMapping, MappingTable},
    midi_parser::{MessageKind, MidiMessage},
};

const FEEDBACK_CHANNEL: u8 = 0;
const FEEDBACK_VELOCITY: u8 = 0x7f;

/// Output of one midi message: a hid batch terminated by a sync event (or empty), and any
/// messages to echo back to the controller.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Translation {
    pub events: Vec<HidEvent>,
    pub feedback: Vec<MidiMessage>,
}

pub struct Translator {
    table: MappingTable,
}

impl Translator {
    pub fn new(table: MappingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    pub fn midi_to_hid(&mut self, msg: &MidiMessage) -> Translation {
        let mut out = Translation::default();

        match msg.kind {
            MessageKind::NoteOff | MessageKind::NoteOn => {
                let pressed = msg.kind == MessageKind::NoteOn && msg.data2() != 0;
                if let Some(button) = self.table.button_mut(msg.channel, msg.data1()) {
                    out.events.push(HidEvent::key(button.button, pressed));
                    if button.led.is_some() {
                        out.feedback.push(led_message(button));
                    }
                }
            }
            MessageKind::ControlChange => {
                if let Some(axis) = self.table.axis(msg.channel, msg.data1()) {
                    out.events
                        .push(HidEvent::absolute(axis.axis, msg.data2() as i32));
                }
            }
            MessageKind::PolyKeyPressure
            | MessageKind::ProgramChange
            | MessageKind::ChannelPressure
            | MessageKind::PitchBend => {}
        }

        if !out.events.is_empty() {
            out.events.push(HidEvent::sync());
        }

        out
    }

    /// Records an LED change reported by the hid consumer and returns the note to light or clear
    /// the matching control. Anything other than a mapped LED is ignored.
    pub fn hid_to_midi(&mut self, event: &HidEvent) -> Option<MidiMessage> {
        if event.kind != EventKind::Led {
            return None;
        }

        let button = self.table.button_for_led_mut(event.code)?;
        button.led_state = event.value != 0;
        Some(led_message(button))
    }
}

fn led_message(button: &ButtonMapping) -> MidiMessage {
    let kind = if button.led_state {
        MessageKind::NoteOn
    } else {
        MessageKind::NoteOff
    };

    MidiMessage::new(kind, FEEDBACK_CHANNEL, button.note, FEEDBACK_VELOCITY)
}
