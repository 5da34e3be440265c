use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

mod hid;
mod mapping;
mod midi_parser;
mod midi_port;
mod translator;
mod uinput;

use mapping::MappingTable;
use midi_parser::{MidiFramer, MidiMessage};
use midi_port::MidiPort;
use translator::Translator;
use uinput::HidDevice;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(
    name = "midi-uinput",
    version,
    about = "Exposes a midi controller as a virtual joystick"
)]
struct Args {
    /// Raw midi device to read from, e.g. /dev/snd/midiC1D0
    midi_device: PathBuf,

    /// Log every midi message received
    #[arg(short, long)]
    verbose: bool,

    /// Mirror joystick LED state back to the controller as note on/off messages
    #[arg(short, long)]
    feedback: bool,

    /// uinput device node
    #[arg(long, default_value = "/dev/uinput")]
    uinput: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let translator = Translator::new(MappingTable::default_table(args.feedback)?);
    let device = uinput::create_device(&args.uinput, translator.table())?;
    let midi = MidiPort::open(&args.midi_device, args.feedback)?;

    let mut bridge = Bridge::new(midi, device, translator, args.feedback);

    tokio::select! {
        res = bridge.run() => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, removing virtual device");
            Ok(())
        }
    }
}

enum Ready {
    Midi(MidiMessage),
    Hid,
}

/// Event loop moving midi messages to the hid device and LED changes back to midi.
struct Bridge<M, D> {
    midi: M,
    framer: MidiFramer,
    device: D,
    translator: Translator,
    feedback: bool,
}

impl<M, D> Bridge<M, D>
where
    M: AsyncRead + AsyncWrite + Unpin,
    D: HidDevice,
{
    fn new(midi: M, device: D, translator: Translator, feedback: bool) -> Self {
        Self {
            midi,
            framer: MidiFramer::new(),
            device,
            translator,
            feedback,
        }
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            // timeout keeps the loop cycling even when both endpoints are idle
            let Ok(ready) = tokio::time::timeout(POLL_INTERVAL, self.next_ready()).await else {
                continue;
            };

            match ready? {
                Ready::Midi(msg) => self.process_midi(&msg).await?,
                Ready::Hid => self.process_hid().await?,
            }
        }
    }

    /// Races the next complete midi message against queued hid events. Safe to drop mid-frame:
    /// bytes already read are held by the framer.
    async fn next_ready(&mut self) -> Result<Ready> {
        let Self {
            midi,
            framer,
            device,
            feedback,
            ..
        } = self;

        let hid = async {
            if !*feedback {
                let _: () = futures::future::pending().await;
            }
            device.readable().await.context("uinput device")?;
            Ok::<_, anyhow::Error>(Ready::Hid)
        };

        tokio::select! {
            biased;
            res = midi_parser::read_message(midi, framer) => {
                Ok(Ready::Midi(res.context("reading midi device")?))
            }
            res = hid => res,
        }
    }

    async fn process_midi(&mut self, msg: &MidiMessage) -> Result<()> {
        tracing::debug!("{}", msg);

        let translation = self.translator.midi_to_hid(msg);
        if !translation.events.is_empty() {
            self.device
                .emit(&translation.events)
                .context("writing uinput events")?;
        }

        for reply in &translation.feedback {
            self.send_midi(reply).await?;
        }

        Ok(())
    }

    async fn process_hid(&mut self) -> Result<()> {
        let events = self
            .device
            .read_events()
            .await
            .context("reading uinput device")?;

        for event in events {
            if let Some(reply) = self.translator.hid_to_midi(&event) {
                self.send_midi(&reply).await?;
            }
        }

        Ok(())
    }

    async fn send_midi(&mut self, msg: &MidiMessage) -> Result<()> {
        if let Ok(midi) = wmidi::MidiMessage::try_from(msg.as_bytes()) {
            tracing::debug!("midi_out: {:?}", midi);
        }

        self.midi
            .write_all(msg.as_bytes())
            .await
            .context("writing midi device")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        io,
        rc::Rc,
    };

    use tokio::{
        io::{AsyncReadExt, DuplexStream},
        sync::Notify,
    };

    use super::*;
    use crate::hid::{EventKind, HidEvent, codes::*};

    #[derive(Default)]
    struct Recorder {
        emitted: RefCell<Vec<HidEvent>>,
        queued: RefCell<Vec<HidEvent>>,
        reads: Cell<usize>,
        notify: Notify,
    }

    #[derive(Clone, Default)]
    struct FakeDevice(Rc<Recorder>);

    impl FakeDevice {
        fn inject(&self, events: &[HidEvent]) {
            self.0.queued.borrow_mut().extend_from_slice(events);
            self.0.notify.notify_one();
        }

        fn emitted(&self) -> Vec<HidEvent> {
            self.0.emitted.borrow().clone()
        }

        fn queued(&self) -> usize {
            self.0.queued.borrow().len()
        }

        fn reads(&self) -> usize {
            self.0.reads.get()
        }

        async fn wait_emitted(&self, len: usize) {
            while self.0.emitted.borrow().len() < len {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    impl HidDevice for FakeDevice {
        fn emit(&self, events: &[HidEvent]) -> io::Result<()> {
            self.0.emitted.borrow_mut().extend_from_slice(events);
            Ok(())
        }

        async fn readable(&self) -> io::Result<()> {
            while self.0.queued.borrow().is_empty() {
                self.0.notify.notified().await;
            }
            Ok(())
        }

        async fn read_events(&self) -> io::Result<Vec<HidEvent>> {
            self.readable().await?;
            self.0.reads.set(self.0.reads.get() + 1);
            Ok(self.0.queued.borrow_mut().drain(..).collect())
        }
    }

    type TestBridge = Bridge<DuplexStream, FakeDevice>;

    fn bridge(feedback: bool) -> (TestBridge, DuplexStream, FakeDevice) {
        let (midi, controller) = tokio::io::duplex(64);
        let device = FakeDevice::default();
        let translator = Translator::new(MappingTable::default_table(feedback).unwrap());
        let bridge = Bridge::new(midi, device.clone(), translator, feedback);
        (bridge, controller, device)
    }

    /// Runs the bridge alongside `test` until `test` finishes.
    async fn drive(bridge: &mut TestBridge, test: impl Future<Output = ()>) {
        tokio::select! {
            res = bridge.run() => panic!("bridge stopped: {:?}", res),
            res = tokio::time::timeout(Duration::from_secs(5), test) => {
                res.expect("bridge did not respond")
            }
        }
    }

    async fn read_midi(controller: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        controller.read_exact(&mut buf).await.unwrap();
        buf
    }

    fn led(code: u16, on: bool) -> HidEvent {
        HidEvent {
            kind: EventKind::Led,
            code,
            value: on as i32,
        }
    }

    #[tokio::test]
    async fn led_change_is_echoed_and_notes_reassert_it() {
        let (mut bridge, mut controller, device) = bridge(true);

        drive(&mut bridge, async {
            // no midi traffic at all, the led still gets through
            device.inject(&[led(LED_NUML, true)]);
            assert_eq!(read_midi(&mut controller, 3).await, [0x90, 0x24, 0x7f]);
            assert!(device.emitted().is_empty());

            controller.write_all(&[0x80, 0x24, 0x00]).await.unwrap();
            assert_eq!(read_midi(&mut controller, 3).await, [0x90, 0x24, 0x7f]);

            // the batch and its sync were written before the echo
            assert_eq!(
                device.emitted(),
                vec![HidEvent::key(BTN_0, false), HidEvent::sync()]
            );
        })
        .await;
    }

    #[tokio::test]
    async fn drains_every_queued_hid_event_at_once() {
        let (mut bridge, mut controller, device) = bridge(true);

        drive(&mut bridge, async {
            device.inject(&[
                led(LED_NUML, true),
                HidEvent::key(BTN_0, true),
                led(LED_CAPSL, true),
                led(0x08, true),
                led(LED_NUML, false),
            ]);

            assert_eq!(
                read_midi(&mut controller, 9).await,
                [0x90, 0x24, 0x7f, 0x90, 0x25, 0x7f, 0x80, 0x24, 0x7f]
            );
            assert_eq!(device.queued(), 0);
            assert_eq!(device.reads(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn each_midi_message_gets_its_own_batch() {
        let (mut bridge, mut controller, device) = bridge(false);

        drive(&mut bridge, async {
            controller
                .write_all(&[0xb0, 0x01, 0x40, 0xf8, 0x33, 0xc0, 0x05, 0xb0, 0x02, 0x10])
                .await
                .unwrap();

            device.wait_emitted(4).await;
            assert_eq!(
                device.emitted(),
                vec![
                    HidEvent::absolute(ABS_X, 0x40),
                    HidEvent::sync(),
                    HidEvent::absolute(ABS_Y, 0x10),
                    HidEvent::sync(),
                ]
            );
        })
        .await;
    }

    #[tokio::test]
    async fn stalled_frame_does_not_hold_up_leds() {
        let (mut bridge, mut controller, device) = bridge(true);

        drive(&mut bridge, async {
            controller.write_all(&[0x90, 0x24]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            device.inject(&[led(LED_NUML, true)]);
            assert_eq!(read_midi(&mut controller, 3).await, [0x90, 0x24, 0x7f]);
            assert!(device.emitted().is_empty());

            // the rest of the frame completes the note that was already in flight
            controller.write_all(&[0x7f]).await.unwrap();
            assert_eq!(read_midi(&mut controller, 3).await, [0x90, 0x24, 0x7f]);
            assert_eq!(
                device.emitted(),
                vec![HidEvent::key(BTN_0, true), HidEvent::sync()]
            );
        })
        .await;
    }

    #[tokio::test]
    async fn leds_are_ignored_without_feedback() {
        let (mut bridge, mut controller, device) = bridge(false);

        drive(&mut bridge, async {
            device.inject(&[led(LED_CAPSL, true)]);
            controller.write_all(&[0x90, 0x25, 0x40]).await.unwrap();

            device.wait_emitted(2).await;
            assert_eq!(
                device.emitted(),
                vec![HidEvent::key(BTN_1, true), HidEvent::sync()]
            );

            let echo =
                tokio::time::timeout(Duration::from_millis(20), controller.read_u8()).await;
            assert!(echo.is_err());
            assert_eq!(device.queued(), 1);
            assert_eq!(device.reads(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn midi_end_of_stream_stops_the_bridge() {
        let (mut bridge, controller, _device) = bridge(false);
        drop(controller);

        let err = tokio::time::timeout(Duration::from_secs(5), bridge.run())
            .await
            .expect("bridge kept running")
            .unwrap_err();

        let io_err = err.root_cause().downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
