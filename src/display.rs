// Display collaborator: key events and ambient context from the input layer

use std::fs::File;
use std::io::Read;
use std::mem::size_of;
use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::context::Context;

// Linux input event types and LED codes (input-event-codes.h).
const EV_KEY: u16 = 0x01;
const EV_LED: u16 = 0x11;
const LED_NUML: u16 = 0x00;
const LED_CAPSL: u16 = 0x01;
const LED_SCROLLL: u16 = 0x02;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display connection failed: {0}")]
    Connection(String),
}

/// What a connected display surfaces to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Partial context update to merge into the shared context.
    ContextChanged(Context),
    /// A key event keyed by the originating input device node.
    KeyEvent {
        dev_node: String,
        key: u16,
        pressed: bool,
    },
}

/// Connection to the event source backing a display manager.
pub trait DisplayConnection: Send {
    fn name(&self) -> String;

    /// Context snapshot taken at connection time.
    fn initial_context(&self) -> Context;

    /// Enumerate input devices and begin streaming events into `tx`.
    fn start(&mut self, tx: mpsc::UnboundedSender<DisplayEvent>) -> Result<(), DisplayError>;
}

/// Live display session. At most one exists at a time; losing it is a
/// process-restart concern, not something the service recovers from.
pub struct DisplayManager {
    name: String,
    initial_context: Context,
    rx: mpsc::UnboundedReceiver<DisplayEvent>,
    _connection: Box<dyn DisplayConnection>,
}

impl DisplayManager {
    pub fn connect(mut connection: Box<dyn DisplayConnection>) -> Result<Self, DisplayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let initial_context = connection.initial_context();
        connection.start(tx)?;
        Ok(Self {
            name: connection.name(),
            initial_context,
            rx,
            _connection: connection,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_context(&self) -> &Context {
        &self.initial_context
    }

    pub async fn next_event(&mut self) -> Option<DisplayEvent> {
        self.rx.recv().await
    }
}

/// Raw `struct input_event` as read from /dev/input/event* on 64-bit Linux.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RawInputEvent {
    tv_sec: u64,
    tv_usec: u64,
    kind: u16,
    code: u16,
    value: i32,
}

/// Display collaborator reading key events straight from the kernel input
/// layer. Surfaces lock-modifier LED state as context.
pub struct EvdevDisplay {
    devices: Vec<PathBuf>,
}

impl EvdevDisplay {
    /// Enumerate the input event nodes this display will read from.
    pub fn open() -> Result<Self, DisplayError> {
        let entries = std::fs::read_dir("/dev/input")
            .map_err(|e| DisplayError::Connection(format!("/dev/input: {e}")))?;
        let mut devices: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("event"))
            })
            .collect();
        devices.sort();
        info!("display: {} input devices", devices.len());
        Ok(Self { devices })
    }
}

impl DisplayConnection for EvdevDisplay {
    fn name(&self) -> String {
        "evdev".to_string()
    }

    fn initial_context(&self) -> Context {
        Context::new()
    }

    fn start(&mut self, tx: mpsc::UnboundedSender<DisplayEvent>) -> Result<(), DisplayError> {
        for path in &self.devices {
            let path = path.clone();
            let tx = tx.clone();
            std::thread::spawn(move || pump_events(path, tx));
        }
        Ok(())
    }
}

/// Blocking read loop for one input device, run on its own thread.
fn pump_events(path: PathBuf, tx: mpsc::UnboundedSender<DisplayEvent>) {
    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(error) => {
            // Permissions on event nodes vary; skipping is fine.
            debug!("display: cannot read {}: {error}", path.display());
            return;
        }
    };
    let dev_node = path.to_string_lossy().into_owned();
    let mut buf = [0u8; size_of::<RawInputEvent>()];
    loop {
        if file.read_exact(&mut buf).is_err() {
            break; // device unplugged
        }
        let Ok(event) = RawInputEvent::read_from_bytes(&buf[..]) else {
            continue;
        };
        let Some(message) = translate(&event, &dev_node) else {
            continue;
        };
        if tx.send(message).is_err() {
            break; // service gone
        }
    }
}

fn translate(event: &RawInputEvent, dev_node: &str) -> Option<DisplayEvent> {
    match event.kind {
        // value 2 is autorepeat; only transitions are interesting.
        EV_KEY if event.value == 0 || event.value == 1 => Some(DisplayEvent::KeyEvent {
            dev_node: dev_node.to_string(),
            key: event.code,
            pressed: event.value == 1,
        }),
        EV_LED => lock_context(event.code, event.value != 0).map(DisplayEvent::ContextChanged),
        _ => None,
    }
}

/// Context delta for a lock-modifier LED change.
fn lock_context(code: u16, on: bool) -> Option<Context> {
    let key = match code {
        LED_NUML => "numlock",
        LED_CAPSL => "capslock",
        LED_SCROLLL => "scrolllock",
        _ => return None,
    };
    let mut context = Context::new();
    context.set(key, if on { "on" } else { "off" });
    Some(context)
}
