// Orchestrator: owns sessions, routes events, coordinates reload

use std::path::Path;
use std::time::Instant;

use anyhow::Context as _;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::context::Context;
use crate::device_manager::DeviceManager;
use crate::device_watcher::{Description, DeviceEvent, DeviceWatcher};
use crate::display::{DisplayEvent, DisplayManager};
use crate::effect::EffectRegistry;
use crate::file_watcher::{FileEvent, FileWatcher, WatchSubscription};
use crate::transport::{self, DeviceError, Transport};

const SESSION_CHANNEL_SIZE: usize = 16;

/// Session lifecycle announcements for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceAdded { serial: String, name: String },
    DeviceRemoved { serial: String },
}

/// How the service turns a hotplug description into an open transport.
pub type TransportOpener =
    Box<dyn Fn(&Description) -> Result<Box<dyn Transport>, DeviceError> + Send>;

/// Top-level reactive core. Owns the set of live device sessions, the shared
/// context, the current configuration and its reload watch, and routes every
/// external event to the right session.
///
/// All mutation happens on the single loop task driving [`Service::run`];
/// sessions and effects therefore need no internal locking.
pub struct Service {
    configuration: Arc<Configuration>,
    registry: Arc<EffectRegistry>,
    context: Context,
    devices: Vec<DeviceManager>,
    file_watcher: FileWatcher,
    file_events: Option<mpsc::UnboundedReceiver<FileEvent>>,
    watch_sub: Option<WatchSubscription>,
    session_tx: broadcast::Sender<SessionEvent>,
    opener: TransportOpener,
    auto_quit: bool,
    active: bool,
    quit: bool,
}

impl Service {
    pub fn new(configuration: Configuration, registry: EffectRegistry) -> Self {
        let (file_watcher, file_events) = FileWatcher::new();
        let (session_tx, _) = broadcast::channel(SESSION_CHANNEL_SIZE);
        let mut service = Self {
            configuration: Arc::new(Configuration::default()),
            registry: Arc::new(registry),
            context: Context::new(),
            devices: Vec::new(),
            file_watcher,
            file_events: Some(file_events),
            watch_sub: None,
            session_tx,
            opener: Box::new(|description| transport::open(&description.dev_node)),
            auto_quit: false,
            active: false,
            quit: false,
        };
        service.set_configuration(configuration);
        service
    }

    /// Replace how transports are opened. Used by adapters and tests.
    pub fn with_transport_opener(mut self, opener: TransportOpener) -> Self {
        self.opener = opener;
        self
    }

    pub fn set_auto_quit(&mut self, auto_quit: bool) {
        self.auto_quit = auto_quit;
    }

    /// Toggle hotplug discovery. Existing sessions survive deactivation.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn devices(&self) -> &[DeviceManager] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [DeviceManager] {
        &mut self.devices
    }

    /// Observe session lifecycle announcements.
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }

    /// Install a new configuration snapshot.
    ///
    /// The previous file watch is discarded *before* anything else so a stale
    /// subscription can never fire for a replaced path. Every session rebuilds
    /// its stack, and the context is re-broadcast unchanged so sessions
    /// re-evaluate context-dependent rule matches.
    pub fn set_configuration(&mut self, configuration: Configuration) {
        self.watch_sub = None;
        self.configuration = Arc::new(configuration);

        for device in &mut self.devices {
            device.set_configuration(self.configuration.clone());
        }
        self.set_context(&Context::new()); // empty-delta merge forces redelivery

        if let Some(path) = self.configuration.path() {
            match self.file_watcher.subscribe(path) {
                Ok(sub) => self.watch_sub = Some(sub),
                Err(error) => warn!("cannot watch {}: {error}", path.display()),
            }
        }
    }

    /// Merge a partial update into the shared context and re-broadcast the
    /// merged result to every session.
    pub fn set_context(&mut self, partial: &Context) {
        self.context.merge(partial);
        for device in &mut self.devices {
            device.set_context(&self.context);
        }
    }

    /// Context merge+broadcast sourced from the display collaborator.
    pub fn handle_generic_event(&mut self, context: &Context) {
        self.set_context(context);
    }

    /// Route a key event to the one session owning `dev_node`. First match
    /// wins; a no-op if none matches.
    pub fn handle_key_event(&mut self, dev_node: &str, key: u16, pressed: bool) {
        for device in &mut self.devices {
            if device.event_devices().iter().any(|node| node == dev_node) {
                device.handle_key_event(key, pressed);
                break;
            }
        }
    }

    /// Hotplug notification: try to open the transport and create a session.
    /// Open failures are device-scoped; they never propagate.
    pub fn device_added(&mut self, description: &Description) {
        debug!("device added: {}", description.dev_node);
        match (self.opener)(description) {
            Ok(transport) => {
                let mut manager = DeviceManager::new(
                    description.clone(),
                    transport,
                    self.configuration.clone(),
                    self.registry.clone(),
                    &self.context,
                );
                let _ = self.session_tx.send(SessionEvent::DeviceAdded {
                    serial: manager.serial().to_string(),
                    name: manager.name().to_string(),
                });
                info!(
                    "opened device {}: serial {} <{}>",
                    description.dev_node,
                    manager.serial(),
                    manager.name()
                );
                manager.set_paused(false);
                self.devices.push(manager);
            }
            Err(e) if e.is_benign() => {
                debug!("not opening device {}: {e}", description.dev_node);
            }
            Err(e) => {
                error!("not opening device {}: {e}", description.dev_node);
            }
        }
    }

    /// Hotplug removal, matched by sys path. Idempotent against duplicate
    /// notifications.
    pub fn device_removed(&mut self, description: &Description) {
        let Some(position) = self
            .devices
            .iter()
            .position(|device| device.sys_path() == description.sys_path)
        else {
            return;
        };
        let manager = self.devices.swap_remove(position);
        info!("removing device {}", manager.serial());
        let _ = self.session_tx.send(SessionEvent::DeviceRemoved {
            serial: manager.serial().to_string(),
        });
        if self.devices.is_empty() && self.auto_quit {
            self.quit = true;
        }
    }

    /// The watched configuration file changed. A failed reload leaves the
    /// current configuration in place; only the watch re-arming differs by
    /// event class.
    pub fn configuration_file_changed(&mut self, event: FileEvent) {
        let Some(path) = self.configuration.path().map(Path::to_path_buf) else {
            return;
        };
        info!("reloading {}", path.display());
        match Configuration::load(&path) {
            Ok(configuration) => {
                // set_configuration reinstalls the watch unconditionally.
                self.set_configuration(configuration);
                return;
            }
            Err(error) => error!("reloading failed: {error}"),
        }
        if event == FileEvent::Ignored {
            // Editors that replace the file by atomic rename kill the old
            // watch; re-arm it so future genuine writes are still seen.
            match self.file_watcher.subscribe(&path) {
                Ok(sub) => self.watch_sub = Some(sub),
                Err(error) => warn!("cannot watch {}: {error}", path.display()),
            }
        }
    }

    /// Drive one render frame on every session.
    pub fn render_frame(&mut self, now: Instant) {
        for device in &mut self.devices {
            if let Err(error) = device.tick(now) {
                warn!("device {}: {error}", device.serial());
            }
        }
    }

    /// Run the event loop until shutdown.
    ///
    /// Dispatches hotplug notifications, file change notifications, display
    /// events and the periodic render tick in arrival order, all on this
    /// task.
    pub async fn run(
        mut self,
        mut watcher: DeviceWatcher,
        mut display: DisplayManager,
    ) -> anyhow::Result<()> {
        let display_name = display.name();
        info!("connected to display {}", display_name);
        let initial = display.initial_context().clone();
        self.set_context(&initial);

        let mut file_events = self
            .file_events
            .take()
            .context("service event loop already started")?;

        watcher.set_active(self.active);

        let mut frame_period = self.configuration.render_interval();
        let mut frames = tokio::time::interval(frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        while !self.quit {
            tokio::select! {
                Some(event) = watcher.next_event() => match event {
                    DeviceEvent::Added(description) => self.device_added(&description),
                    DeviceEvent::Removed(description) => self.device_removed(&description),
                },
                Some(event) = file_events.recv() => {
                    self.configuration_file_changed(event);
                    // A reload may retune the frame rate.
                    if self.configuration.render_interval() != frame_period {
                        frame_period = self.configuration.render_interval();
                        frames = tokio::time::interval(frame_period);
                        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    }
                }
                Some(event) = display.next_event() => match event {
                    DisplayEvent::ContextChanged(context) => self.handle_generic_event(&context),
                    DisplayEvent::KeyEvent { dev_node, key, pressed } => {
                        self.handle_key_event(&dev_node, key, pressed);
                    }
                },
                _ = frames.tick() => self.render_frame(Instant::now()),
                _ = &mut shutdown => {
                    info!("interrupt received, shutting down");
                    self.quit = true;
                }
            }
        }
        info!("service stopped");
        Ok(())
    }
}
