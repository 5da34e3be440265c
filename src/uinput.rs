use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::{
        fd::{AsRawFd, RawFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
};

use anyhow::{Context, Result};
use nix::libc;
use tokio::io::unix::AsyncFd;

use crate::{
    hid::{self, EVENT_SIZE, HidEvent, codes},
    mapping::MappingTable,
};

const UINPUT_MAX_NAME_SIZE: usize = 80;
const DEVICE_NAME: &str = "MIDI ADAPTOR";
const AXIS_MIN: i32 = 0;
const AXIS_MAX: i32 = 0x7f;

mod sys {
    use super::UINPUT_MAX_NAME_SIZE;

    #[repr(C)]
    pub struct InputId {
        pub bustype: u16,
        pub vendor: u16,
        pub product: u16,
        pub version: u16,
    }

    #[repr(C)]
    pub struct UinputSetup {
        pub id: InputId,
        pub name: [u8; UINPUT_MAX_NAME_SIZE],
        pub ff_effects_max: u32,
    }

    #[repr(C)]
    pub struct AbsInfo {
        pub value: i32,
        pub minimum: i32,
        pub maximum: i32,
        pub fuzz: i32,
        pub flat: i32,
        pub resolution: i32,
    }

    #[repr(C)]
    pub struct UinputAbsSetup {
        pub code: u16,
        pub absinfo: AbsInfo,
    }

    nix::ioctl_none!(ui_dev_create, b'U', 1);
    nix::ioctl_none!(ui_dev_destroy, b'U', 2);
    nix::ioctl_write_ptr!(ui_dev_setup, b'U', 3, UinputSetup);
    nix::ioctl_write_ptr!(ui_abs_setup, b'U', 4, UinputAbsSetup);
    nix::ioctl_write_int!(ui_set_evbit, b'U', 100);
    nix::ioctl_write_int!(ui_set_keybit, b'U', 101);
    nix::ioctl_write_int!(ui_set_absbit, b'U', 103);
    nix::ioctl_write_int!(ui_set_ledbit, b'U', 105);
}

/// Builder over an open uinput handle. Capabilities must all be declared before `build`.
pub struct VirtualDeviceBuilder {
    file: File,
}

impl VirtualDeviceBuilder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;

        Ok(Self { file })
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn with_keys(self, keys: impl IntoIterator<Item = u16>) -> Result<Self> {
        unsafe {
            sys::ui_set_evbit(self.fd(), codes::EV_KEY as _).context("enabling key events")?;
        }
        for key in keys {
            unsafe {
                sys::ui_set_keybit(self.fd(), key as _)
                    .with_context(|| format!("enabling key {:#x}", key))?;
            }
        }
        Ok(self)
    }

    pub fn with_leds(self, leds: impl IntoIterator<Item = u16>) -> Result<Self> {
        unsafe {
            sys::ui_set_evbit(self.fd(), codes::EV_LED as _).context("enabling led events")?;
        }
        for led in leds {
            unsafe {
                sys::ui_set_ledbit(self.fd(), led as _)
                    .with_context(|| format!("enabling led {:#x}", led))?;
            }
        }
        Ok(self)
    }

    /// Declares every axis with the full 7 bit midi range, starting at zero.
    pub fn with_axes(self, axes: impl IntoIterator<Item = u16>) -> Result<Self> {
        unsafe {
            sys::ui_set_evbit(self.fd(), codes::EV_ABS as _).context("enabling axis events")?;
        }
        for code in axes {
            let setup = sys::UinputAbsSetup {
                code,
                absinfo: sys::AbsInfo {
                    value: 0,
                    minimum: AXIS_MIN,
                    maximum: AXIS_MAX,
                    fuzz: 0,
                    flat: 0,
                    resolution: 0,
                },
            };
            unsafe {
                sys::ui_set_absbit(self.fd(), code as _)
                    .with_context(|| format!("enabling axis {:#x}", code))?;
                sys::ui_abs_setup(self.fd(), &setup)
                    .with_context(|| format!("configuring axis {:#x}", code))?;
            }
        }
        Ok(self)
    }

    /// Registers the device on the virtual bus with zeroed vendor, product and version.
    pub fn build(self, name: &str) -> Result<VirtualDevice> {
        let setup = sys::UinputSetup {
            id: sys::InputId {
                bustype: codes::BUS_VIRTUAL,
                vendor: 0,
                product: 0,
                version: 0,
            },
            name: device_name(name),
            ff_effects_max: 0,
        };

        unsafe {
            sys::ui_dev_setup(self.fd(), &setup).context("setting up uinput device")?;
            sys::ui_dev_create(self.fd()).context("creating uinput device")?;
        }

        tracing::info!("virtual device created: {}", name);

        let fd = AsyncFd::new(self.file).context("registering uinput device")?;
        Ok(VirtualDevice { fd })
    }
}

/// NUL terminated, truncated to what the kernel accepts.
fn device_name(name: &str) -> [u8; UINPUT_MAX_NAME_SIZE] {
    let mut buf = [0u8; UINPUT_MAX_NAME_SIZE];
    let len = name.len().min(UINPUT_MAX_NAME_SIZE - 1);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}

/// Creates the device advertising everything in `table`. LEDs are only declared when at least
/// one button owns one.
pub fn create_device(path: impl AsRef<Path>, table: &MappingTable) -> Result<VirtualDevice> {
    let mut builder = VirtualDeviceBuilder::open(path)?
        .with_keys(table.buttons().iter().map(|b| b.button))?;

    if table.leds().next().is_some() {
        builder = builder.with_leds(table.leds())?;
    }

    builder
        .with_axes(table.axes().iter().map(|a| a.axis))?
        .build(DEVICE_NAME)
}

/// The hid side of the bridge: takes event batches and reports LED changes made by consumers.
pub(crate) trait HidDevice {
    /// Writes a batch of events. The caller is responsible for terminating it with a sync.
    fn emit(&self, events: &[HidEvent]) -> io::Result<()>;

    async fn readable(&self) -> io::Result<()>;

    /// Waits until events are queued, then drains all of them.
    async fn read_events(&self) -> io::Result<Vec<HidEvent>>;
}

pub struct VirtualDevice {
    fd: AsyncFd<File>,
}

impl HidDevice for VirtualDevice {
    fn emit(&self, events: &[HidEvent]) -> io::Result<()> {
        let raw: Vec<libc::input_event> = events.iter().map(|&e| e.into()).collect();

        // uinput takes the whole batch in one write and never reports EAGAIN for it
        self.fd.get_ref().write_all(hid::as_bytes(&raw))
    }

    async fn readable(&self) -> io::Result<()> {
        self.fd.readable().await?;
        Ok(())
    }

    async fn read_events(&self) -> io::Result<Vec<HidEvent>> {
        let mut guard = self.fd.readable().await?;
        let mut events = Vec::new();
        let mut raw = libc::input_event::from(HidEvent::sync());

        loop {
            match guard.try_io(|fd| fd.get_ref().read(hid::as_bytes_mut(&mut raw))) {
                Ok(Ok(EVENT_SIZE)) => events.push(HidEvent::from(&raw)),
                Ok(Ok(n)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("short uinput read: {n} bytes"),
                    ));
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => return Ok(events),
            }
        }
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        if let Err(e) = unsafe { sys::ui_dev_destroy(self.fd.as_raw_fd()) } {
            tracing::error!("uinput destroy: {:?}", e);
        }
    }
}
