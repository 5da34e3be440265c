use anyhow::{Result, bail};

use crate::hid::codes::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AxisMapping {
    pub channel: u8,
    pub controller: u8,
    pub axis: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ButtonMapping {
    pub channel: u8,
    pub note: u8,
    pub button: u16,
    pub led: Option<u16>,
    pub led_state: bool,
}

/// Static description of a button before feedback is decided on.
#[derive(Debug, Copy, Clone)]
pub struct ButtonConfig {
    pub channel: u8,
    pub note: u8,
    pub button: u16,
    pub led: u16,
}

pub const DEFAULT_AXES: &[AxisMapping] = &[
    axis(0x00, 0x01, ABS_X),
    axis(0x00, 0x02, ABS_Y),
    axis(0x00, 0x03, ABS_Z),
    axis(0x00, 0x04, ABS_RX),
    axis(0x00, 0x05, ABS_RY),
    axis(0x00, 0x06, ABS_RZ),
    axis(0x00, 0x07, ABS_HAT0X),
    axis(0x00, 0x08, ABS_HAT0Y),
];

pub const DEFAULT_BUTTONS: &[ButtonConfig] = &[
    button(0x00, 0x24, BTN_0, LED_NUML),
    button(0x00, 0x25, BTN_1, LED_CAPSL),
    button(0x00, 0x26, BTN_2, LED_SCROLLL),
    button(0x00, 0x27, BTN_3, LED_COMPOSE),
    button(0x00, 0x28, BTN_4, LED_KANA),
    button(0x00, 0x29, BTN_5, LED_SLEEP),
    button(0x00, 0x2a, BTN_6, LED_SUSPEND),
    button(0x00, 0x2b, BTN_7, LED_MUTE),
];

const fn axis(channel: u8, controller: u8, axis: u16) -> AxisMapping {
    AxisMapping {
        channel,
        controller,
        axis,
    }
}

const fn button(channel: u8, note: u8, button: u16, led: u16) -> ButtonConfig {
    ButtonConfig {
        channel,
        note,
        button,
        led,
    }
}

/// Lookup between midi controls and hid codes. Entries keep declaration order, and only
/// `led_state` changes after construction.
#[derive(Debug, Clone)]
pub struct MappingTable {
    axes: Vec<AxisMapping>,
    buttons: Vec<ButtonMapping>,
}

impl MappingTable {
    pub fn new(axes: &[AxisMapping], buttons: &[ButtonConfig], feedback: bool) -> Result<Self> {
        for (i, a) in axes.iter().enumerate() {
            if a.channel > 0x0f || a.controller > 0x7f {
                bail!("axis {:#x}: channel/controller out of range", a.axis);
            }
            if axes[..i]
                .iter()
                .any(|b| (b.channel, b.controller) == (a.channel, a.controller))
            {
                bail!(
                    "duplicate axis mapping for channel {} controller {:#04x}",
                    a.channel,
                    a.controller
                );
            }
        }

        for (i, a) in buttons.iter().enumerate() {
            if a.channel > 0x0f || a.note > 0x7f {
                bail!("button {:#x}: channel/note out of range", a.button);
            }
            let earlier = &buttons[..i];
            if earlier
                .iter()
                .any(|b| (b.channel, b.note) == (a.channel, a.note))
            {
                bail!(
                    "duplicate button mapping for channel {} note {:#04x}",
                    a.channel,
                    a.note
                );
            }
            if feedback && earlier.iter().any(|b| b.led == a.led) {
                bail!("led {:#x} is shared between buttons", a.led);
            }
        }

        let buttons = buttons
            .iter()
            .map(|b| ButtonMapping {
                channel: b.channel,
                note: b.note,
                button: b.button,
                led: feedback.then_some(b.led),
                led_state: false,
            })
            .collect();

        Ok(Self {
            axes: axes.to_vec(),
            buttons,
        })
    }

    pub fn default_table(feedback: bool) -> Result<Self> {
        Self::new(DEFAULT_AXES, DEFAULT_BUTTONS, feedback)
    }

    pub fn axes(&self) -> &[AxisMapping] {
        &self.axes
    }

    pub fn buttons(&self) -> &[ButtonMapping] {
        &self.buttons
    }

    pub fn leds(&self) -> impl Iterator<Item = u16> + '_ {
        self.buttons.iter().filter_map(|b| b.led)
    }

    pub fn axis(&self, channel: u8, controller: u8) -> Option<&AxisMapping> {
        self.axes
            .iter()
            .find(|a| a.channel == channel && a.controller == controller)
    }

    pub fn button_mut(&mut self, channel: u8, note: u8) -> Option<&mut ButtonMapping> {
        self.buttons
            .iter_mut()
            .find(|b| b.channel == channel && b.note == note)
    }

    pub fn button_for_led_mut(&mut self, led: u16) -> Option<&mut ButtonMapping> {
        self.buttons.iter_mut().find(|b| b.led == Some(led))
    }
}
