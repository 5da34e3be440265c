use std::mem::{size_of, size_of_val};

use nix::libc;

/// Linux input event codes, from `linux/input-event-codes.h`.
pub mod codes {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_ABS: u16 = 0x03;
    pub const EV_LED: u16 = 0x11;

    pub const SYN_REPORT: u16 = 0x00;

    pub const ABS_X: u16 = 0x00;
    pub const ABS_Y: u16 = 0x01;
    pub const ABS_Z: u16 = 0x02;
    pub const ABS_RX: u16 = 0x03;
    pub const ABS_RY: u16 = 0x04;
    pub const ABS_RZ: u16 = 0x05;
    pub const ABS_HAT0X: u16 = 0x10;
    pub const ABS_HAT0Y: u16 = 0x11;

    pub const BTN_0: u16 = 0x100;
    pub const BTN_1: u16 = 0x101;
    pub const BTN_2: u16 = 0x102;
    pub const BTN_3: u16 = 0x103;
    pub const BTN_4: u16 = 0x104;
    pub const BTN_5: u16 = 0x105;
    pub const BTN_6: u16 = 0x106;
    pub const BTN_7: u16 = 0x107;

    pub const LED_NUML: u16 = 0x00;
    pub const LED_CAPSL: u16 = 0x01;
    pub const LED_SCROLLL: u16 = 0x02;
    pub const LED_COMPOSE: u16 = 0x03;
    pub const LED_KANA: u16 = 0x04;
    pub const LED_SLEEP: u16 = 0x05;
    pub const LED_SUSPEND: u16 = 0x06;
    pub const LED_MUTE: u16 = 0x07;

    pub const BUS_VIRTUAL: u16 = 0x06;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventKind {
    Sync,
    Key,
    Absolute,
    Led,
    Other(u16),
}

impl EventKind {
    pub fn type_code(&self) -> u16 {
        match self {
            EventKind::Sync => codes::EV_SYN,
            EventKind::Key => codes::EV_KEY,
            EventKind::Absolute => codes::EV_ABS,
            EventKind::Led => codes::EV_LED,
            EventKind::Other(code) => *code,
        }
    }
}

impl From<u16> for EventKind {
    fn from(value: u16) -> Self {
        match value {
            codes::EV_SYN => EventKind::Sync,
            codes::EV_KEY => EventKind::Key,
            codes::EV_ABS => EventKind::Absolute,
            codes::EV_LED => EventKind::Led,
            other => EventKind::Other(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HidEvent {
    pub kind: EventKind,
    pub code: u16,
    pub value: i32,
}

impl HidEvent {
    pub fn key(code: u16, pressed: bool) -> Self {
        Self {
            kind: EventKind::Key,
            code,
            value: pressed as i32,
        }
    }

    pub fn absolute(code: u16, value: i32) -> Self {
        Self {
            kind: EventKind::Absolute,
            code,
            value,
        }
    }

    pub fn sync() -> Self {
        Self {
            kind: EventKind::Sync,
            code: codes::SYN_REPORT,
            value: 0,
        }
    }
}

pub const EVENT_SIZE: usize = size_of::<libc::input_event>();

impl From<HidEvent> for libc::input_event {
    /// The timestamp is left zeroed, the kernel fills it in on injection.
    fn from(event: HidEvent) -> Self {
        // SAFETY: input_event only holds integers, all zeroes is a valid value
        let mut raw: libc::input_event = unsafe { std::mem::zeroed() };
        raw.type_ = event.kind.type_code();
        raw.code = event.code;
        raw.value = event.value;
        raw
    }
}

impl From<&libc::input_event> for HidEvent {
    fn from(raw: &libc::input_event) -> Self {
        Self {
            kind: raw.type_.into(),
            code: raw.code,
            value: raw.value,
        }
    }
}

/// Byte view of a batch, as written to the uinput node.
pub fn as_bytes(events: &[libc::input_event]) -> &[u8] {
    // SAFETY: input_event is repr(C) plain data, the slice covers exactly the events
    unsafe { std::slice::from_raw_parts(events.as_ptr().cast::<u8>(), size_of_val(events)) }
}

/// Byte view of a single event to read into.
pub fn as_bytes_mut(event: &mut libc::input_event) -> &mut [u8] {
    // SAFETY: as above, and any byte pattern is a valid input_event
    unsafe {
        std::slice::from_raw_parts_mut((event as *mut libc::input_event).cast::<u8>(), EVENT_SIZE)
    }
}
