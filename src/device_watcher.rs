// Hotplug discovery of candidate devices via udev

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_udev::{AsyncMonitorSocket, Device, Enumerator, EventType, MonitorBuilder};
use tracing::{debug, warn};

const SUBSYSTEM: &str = "hidraw";

/// What the watcher reports about a candidate device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    /// Transport node used to open the device. May be empty on removal.
    pub dev_node: String,
    /// Stable identity used to match removal against the live session.
    pub sys_path: String,
    /// Input event nodes belonging to the same underlying device, used for
    /// key-event routing.
    pub event_devices: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Added(Description),
    Removed(Description),
}

/// Watches the bus for matching hardware appearing and disappearing.
///
/// While inactive, notifications are swallowed; activating performs a scan of
/// already-present devices exactly once. Dropping the watcher cancels the
/// underlying monitor, so no further events can be delivered.
pub struct DeviceWatcher {
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
    tx: mpsc::UnboundedSender<DeviceEvent>,
    active: Arc<AtomicBool>,
    scanned: bool,
    task: JoinHandle<()>,
}

impl DeviceWatcher {
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(false));

        let monitor: AsyncMonitorSocket = MonitorBuilder::new()?
            .match_subsystem(SUBSYSTEM)?
            .listen()?
            .try_into()?;
        let task = tokio::spawn(pump(monitor, tx.clone(), active.clone()));

        Ok(Self {
            rx,
            tx,
            active,
            scanned: false,
            task,
        })
    }

    /// Toggle whether discovery is live. Existing sessions are unaffected.
    pub fn set_active(&mut self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
        if active && !self.scanned {
            self.scanned = true;
            self.scan();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Report devices already present when discovery goes live.
    fn scan(&self) {
        match enumerate() {
            Ok(descriptions) => {
                for description in descriptions {
                    debug!("present at scan: {}", description.dev_node);
                    let _ = self.tx.send(DeviceEvent::Added(description));
                }
            }
            Err(error) => warn!("device scan failed: {error}"),
        }
    }

    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump(
    mut monitor: AsyncMonitorSocket,
    tx: mpsc::UnboundedSender<DeviceEvent>,
    active: Arc<AtomicBool>,
) {
    while let Some(event) = monitor.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!("udev monitor error: {error}");
                continue;
            }
        };
        if !active.load(Ordering::Relaxed) {
            continue;
        }
        let Some(description) = describe(&event.device()) else {
            continue;
        };
        let forwarded = match event.event_type() {
            EventType::Add => tx.send(DeviceEvent::Added(description)),
            EventType::Remove => tx.send(DeviceEvent::Removed(description)),
            _ => Ok(()),
        };
        if forwarded.is_err() {
            break; // receiver gone, service is shutting down
        }
    }
}

fn describe(device: &Device) -> Option<Description> {
    let sys_path = device.syspath().to_str()?.to_string();
    let dev_node = device
        .devnode()
        .and_then(Path::to_str)
        .unwrap_or_default()
        .to_string();
    Some(Description {
        event_devices: input_nodes_for(device),
        dev_node,
        sys_path,
    })
}

/// Sibling /dev/input/event* nodes hanging off the same HID parent.
fn input_nodes_for(device: &Device) -> Vec<String> {
    let Some(parent) = device.parent() else {
        return Vec::new();
    };
    let parent_path = parent.syspath().to_path_buf();

    let mut nodes = Vec::new();
    let Ok(mut enumerator) = Enumerator::new() else {
        return nodes;
    };
    if enumerator.match_subsystem("input").is_err() {
        return nodes;
    }
    let Ok(devices) = enumerator.scan_devices() else {
        return nodes;
    };
    for input in devices {
        let Some(node) = input.devnode().and_then(Path::to_str) else {
            continue;
        };
        if node.starts_with("/dev/input/event") && input.syspath().starts_with(&parent_path) {
            nodes.push(node.to_string());
        }
    }
    nodes
}

fn enumerate() -> io::Result<Vec<Description>> {
    let mut enumerator = Enumerator::new()?;
    enumerator.match_subsystem(SUBSYSTEM)?;
    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| describe(&device))
        .collect())
}
