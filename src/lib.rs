//! keyglow — hotplug-aware per-key RGB lighting daemon core.
//!
//! The service discovers keyboards as they appear on the bus, keeps one
//! session per device, and drives an ordered stack of effect plugins through
//! a render/composite/flush cycle. Configuration is a reloadable TOML
//! snapshot; a shared context (focused window, lock modifiers) selects which
//! rules apply.

pub mod color;
pub mod config;
pub mod context;
pub mod device_manager;
pub mod device_watcher;
pub mod display;
pub mod effect;
pub mod file_watcher;
pub mod keymap;
pub mod render;
pub mod service;
pub mod transport;

pub use color::Rgba;
pub use config::{ConfigError, Configuration};
pub use context::Context;
pub use device_manager::DeviceManager;
pub use device_watcher::{Description, DeviceEvent, DeviceWatcher};
pub use display::{DisplayConnection, DisplayEvent, DisplayManager, EvdevDisplay};
pub use effect::{Effect, EffectError, EffectRegistry, EffectService};
pub use file_watcher::{FileEvent, FileWatcher, WatchSubscription};
pub use keymap::{Key, KeyDatabase};
pub use render::RenderTarget;
pub use service::{Service, SessionEvent, TransportOpener};
pub use transport::{DeviceError, Transport};
