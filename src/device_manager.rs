// Per-device session: effect stack, render/composite/flush cycle

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{Configuration, EffectEntry};
use crate::context::Context;
use crate::device_watcher::Description;
use crate::effect::{Effect, EffectRegistry, EffectService};
use crate::keymap::KeyDatabase;
use crate::render::RenderTarget;
use crate::transport::{DeviceError, Transport};

/// Live session for one physical device, from discovery to removal.
///
/// Owns the transport handle, the key database, the ordered effect stack and
/// one render target per effect, plus the composed output buffer.
pub struct DeviceManager {
    description: Description,
    transport: Box<dyn Transport>,
    serial: String,
    name: String,
    keys: KeyDatabase,
    configuration: Arc<Configuration>,
    registry: Arc<EffectRegistry>,
    context: Context,
    effects: Vec<Box<dyn Effect>>,
    targets: Vec<RenderTarget>,
    /// Configuration entries the current stack was built from, used to
    /// detect when a context change alters which rules match.
    matched: Vec<EffectEntry>,
    output: RenderTarget,
    brightness: u8,
    paused: bool,
    last_frame: Option<Instant>,
}

impl DeviceManager {
    pub fn new(
        description: Description,
        transport: Box<dyn Transport>,
        configuration: Arc<Configuration>,
        registry: Arc<EffectRegistry>,
        context: &Context,
    ) -> Self {
        let serial = transport.serial().to_string();
        let name = transport.name().to_string();
        let keys = KeyDatabase::from_layout(transport.key_count());
        let output = RenderTarget::new(keys.len());

        let mut manager = Self {
            description,
            transport,
            serial,
            name,
            keys,
            configuration,
            registry,
            context: context.clone(),
            effects: Vec::new(),
            targets: Vec::new(),
            matched: Vec::new(),
            output,
            brightness: 100,
            paused: true,
            last_frame: None,
        };
        manager.rebuild_stack();
        manager
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sys_path(&self) -> &str {
        &self.description.sys_path
    }

    /// Input event nodes whose key events belong to this device.
    pub fn event_devices(&self) -> &[String] {
        &self.description.event_devices
    }

    pub fn keys(&self) -> &KeyDatabase {
        &self.keys
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Adopt a new configuration snapshot and rebuild the effect stack.
    pub fn set_configuration(&mut self, configuration: Arc<Configuration>) {
        self.configuration = configuration;
        self.rebuild_stack();
    }

    /// Take a fresh context snapshot. If the set of matching rules changed,
    /// the stack is rebuilt; surviving effects are notified either way.
    pub fn set_context(&mut self, context: &Context) {
        self.context = context.clone();
        let (entries, _) = self.resolve();
        if entries != self.matched {
            self.rebuild_stack();
        }
        for effect in &mut self.effects {
            effect.handle_context_change(&self.context);
        }
    }

    /// Paused sessions still accept events but skip the render/flush cycle.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            // A long pause must not land as one huge elapsed step.
            self.last_frame = None;
        }
    }

    /// Dispatch a key event to every effect in stack order.
    pub fn handle_key_event(&mut self, keycode: u16, pressed: bool) {
        let Some(key) = self.keys.by_keycode(keycode) else {
            return;
        };
        let key = key.clone();
        for effect in &mut self.effects {
            effect.handle_key_event(&key, pressed);
        }
    }

    /// One frame, driven by the service render tick.
    pub fn tick(&mut self, now: Instant) -> Result<(), DeviceError> {
        if self.paused {
            return Ok(());
        }
        let elapsed = self
            .last_frame
            .map(|last| now.duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_frame = Some(now);
        self.render(elapsed)
    }

    /// Render every effect into its own target, composite back-to-front onto
    /// the output buffer, and flush it to the transport.
    pub fn render(&mut self, elapsed: Duration) -> Result<(), DeviceError> {
        for (effect, target) in self.effects.iter_mut().zip(self.targets.iter_mut()) {
            effect.render(elapsed, target);
        }
        self.output.clear();
        for target in &self.targets {
            self.output.blend_over(target);
        }
        if self.brightness < 100 {
            dim(&mut self.output, self.brightness);
        }
        self.transport.flush(&self.output)
    }

    /// Effect entries and brightness the configuration yields for this
    /// device under the current context.
    fn resolve(&self) -> (Vec<EffectEntry>, u8) {
        let mut entries = Vec::new();
        let mut brightness = 100;
        for rule in self
            .configuration
            .rules_for(&self.name, &self.serial, &self.context)
        {
            entries.extend(rule.effects.iter().cloned());
            if let Some(value) = rule.brightness {
                brightness = value;
            }
        }
        (entries, brightness)
    }

    /// Discard the stack and instantiate a fresh one in matched order. A
    /// single failing entry is skipped; the others still load.
    fn rebuild_stack(&mut self) {
        let (entries, brightness) = self.resolve();
        self.brightness = brightness;
        self.effects.clear();
        self.targets.clear();
        for entry in &entries {
            let service = EffectService::new(entry.params.clone(), self.keys.len());
            match self.registry.create(&entry.name, &service) {
                Ok(effect) => {
                    self.effects.push(effect);
                    self.targets.push(RenderTarget::new(self.keys.len()));
                }
                Err(error) => {
                    warn!(
                        "device {}: skipping effect {}: {error}",
                        self.serial, entry.name
                    );
                }
            }
        }
        self.matched = entries;
        debug!(
            "device {}: effect stack rebuilt, {} effects",
            self.serial,
            self.effects.len()
        );
    }
}

/// Scale color channels to a brightness percentage, leaving alpha alone.
fn dim(target: &mut RenderTarget, percent: u8) {
    let scale = |c: u8| (c as u16 * percent as u16 / 100) as u8;
    for slot in target.as_mut_slice() {
        slot.r = scale(slot.r);
        slot.g = scale(slot.g);
        slot.b = scale(slot.b);
    }
}
