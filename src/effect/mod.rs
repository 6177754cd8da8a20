//! Effect plugin engine.
//!
//! Effects are selected by name from the configuration and instantiated
//! through a factory registry, one stack per device. Each instance owns its
//! private state and renders into its own target; the device manager
//! composites the stack back-to-front.

pub mod breathe;
pub mod feedback;
pub mod fill;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::color::Rgba;
use crate::config::parse_duration;
use crate::context::Context;
use crate::keymap::Key;
use crate::render::RenderTarget;

pub use breathe::BreatheEffect;
pub use feedback::FeedbackEffect;
pub use fill::FillEffect;

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    #[error("invalid value for {key}: {value}")]
    InvalidParam { key: &'static str, value: String },

    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),
}

/// Construction-time view handed to effect factories: the effect's
/// configuration parameters and a target allocator sized for the device.
pub struct EffectService {
    params: BTreeMap<String, String>,
    key_count: usize,
}

impl EffectService {
    pub fn new(params: BTreeMap<String, String>, key_count: usize) -> Self {
        Self { params, key_count }
    }

    pub fn get_config(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Allocate a zero-initialized target sized to this device's key count.
    pub fn create_render_target(&self) -> RenderTarget {
        RenderTarget::new(self.key_count)
    }

    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Parse a color parameter, falling back to `default` when absent.
    pub fn color_config(&self, key: &'static str, default: Rgba) -> Result<Rgba, EffectError> {
        match self.get_config(key) {
            None => Ok(default),
            Some(value) => Rgba::parse(value).ok_or(EffectError::InvalidParam {
                key,
                value: value.to_string(),
            }),
        }
    }

    /// Parse a duration parameter, falling back to `default` when absent.
    pub fn duration_config(
        &self,
        key: &'static str,
        default: Duration,
    ) -> Result<Duration, EffectError> {
        match self.get_config(key) {
            None => Ok(default),
            Some(value) => parse_duration(value).ok_or(EffectError::InvalidParam {
                key,
                value: value.to_string(),
            }),
        }
    }
}

/// A live effect instance.
///
/// `render` is called once per frame with the time elapsed since the previous
/// frame; `handle_key_event` sees every key event on the device. Effects are
/// context-agnostic unless they override `handle_context_change`.
pub trait Effect: Send {
    fn render(&mut self, elapsed: Duration, target: &mut RenderTarget);

    fn handle_key_event(&mut self, _key: &Key, _pressed: bool) {}

    fn handle_context_change(&mut self, _context: &Context) {}
}

type EffectFactory = Box<dyn Fn(&EffectService) -> Result<Box<dyn Effect>, EffectError> + Send + Sync>;

/// Named-factory registry mapping effect names to constructors.
///
/// New effects register under a name at process start; the configuration
/// selects them dynamically, so the set is open rather than a compile-time
/// closed enum.
pub struct EffectRegistry {
    factories: HashMap<String, EffectFactory>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the builtin effects pre-registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("feedback", FeedbackEffect::create);
        registry.register("fill", FillEffect::create);
        registry.register("breathe", BreatheEffect::create);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&EffectService) -> Result<Box<dyn Effect>, EffectError> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a registered effect by name.
    pub fn create(
        &self,
        name: &str,
        service: &EffectService,
    ) -> Result<Box<dyn Effect>, EffectError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EffectError::UnknownEffect(name.to_string()))?;
        factory(service)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
