// Configuration snapshots: device rules, effect stacks, reload support

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::context::Context;

/// Frame period used when the file does not set `render_interval`.
const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// One configured effect: a registered name plus its parameters.
///
/// Parameter values are kept as strings; each plugin parses and validates the
/// keys it recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EffectEntry {
    pub name: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, String>,
}

/// A device-matching rule yielding an ordered effect stack.
///
/// `name` and `serial` are glob patterns (`*` wildcard) against the device
/// identity; `context` entries must all match the current shared context.
/// A missing pattern matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Output brightness percentage (0-100) applied when this rule matches.
    #[serde(default)]
    pub brightness: Option<u8>,
    #[serde(default, rename = "effect")]
    pub effects: Vec<EffectEntry>,
}

impl DeviceRule {
    pub fn matches(&self, name: &str, serial: &str, context: &Context) -> bool {
        if let Some(pattern) = &self.name {
            if !glob_match(pattern, name) {
                return false;
            }
        }
        if let Some(pattern) = &self.serial {
            if !glob_match(pattern, serial) {
                return false;
            }
        }
        self.context.iter().all(|(key, pattern)| {
            context
                .get(key)
                .is_some_and(|value| glob_match(pattern, value))
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    render_interval: Option<String>,
    #[serde(default, rename = "device")]
    devices: Vec<DeviceRule>,
}

/// Immutable configuration snapshot.
///
/// Constructed once at startup and on every successful reload; the service
/// replaces the whole snapshot rather than mutating it.
#[derive(Debug, Default)]
pub struct Configuration {
    path: Option<PathBuf>,
    render_interval: Option<Duration>,
    rules: Vec<DeviceRule>,
}

impl Configuration {
    /// Load from a TOML file, remembering the path for reload watching.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config = Self::parse(&content, path)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load from `path`, writing the default configuration there first if the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                    path: parent.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
            std::fs::write(path, DEFAULT_CONFIG_TOML).map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            info!("created default configuration: {}", path.display());
        }
        Self::load(path)
    }

    /// Parse an in-memory snapshot with no backing file (no reload watch).
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new(""))
    }

    fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        let render_interval = raw
            .render_interval
            .as_deref()
            .map(|value| {
                parse_duration(value).ok_or(ConfigError::InvalidValue {
                    key: "render_interval",
                    value: value.to_string(),
                })
            })
            .transpose()?;
        for rule in &raw.devices {
            if let Some(brightness) = rule.brightness {
                if brightness > 100 {
                    return Err(ConfigError::InvalidValue {
                        key: "brightness",
                        value: brightness.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            path: None,
            render_interval,
            rules: raw.devices,
        })
    }

    /// Originating file path; `None` means in-memory only, no reload.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn render_interval(&self) -> Duration {
        self.render_interval.unwrap_or(DEFAULT_RENDER_INTERVAL)
    }

    pub fn rules(&self) -> &[DeviceRule] {
        &self.rules
    }

    /// All rules matching a device identity under the given context, in
    /// configuration order.
    pub fn rules_for(&self, name: &str, serial: &str, context: &Context) -> Vec<&DeviceRule> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(name, serial, context))
            .collect()
    }
}

/// Match `value` against a glob pattern where `*` matches any run of
/// characters.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == value,
        Some((prefix, rest)) => {
            let Some(tail) = value.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            tail.char_indices()
                .map(|(i, _)| i)
                .chain([tail.len()])
                .any(|i| glob_match(rest, &tail[i..]))
        }
    }
}

/// Parse a duration string: "750ms", "2s", "1.5s", or a bare millisecond
/// count.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Duration::from_secs_f64);
    }
    s.parse::<u64>().ok().map(Duration::from_millis)
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    config_dir().join("keyglow.toml")
}

fn config_dir() -> PathBuf {
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(config).join("keyglow")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config/keyglow")
    } else {
        PathBuf::from("/tmp/keyglow")
    }
}

pub const DEFAULT_CONFIG_TOML: &str = r##"# keyglow configuration
# Device rules are evaluated in order; every matching rule contributes its
# effects to the device's stack. Later effects draw on top.
# Parameter values are strings: color = "#RRGGBB[AA]" or a named color,
# durations = "750ms" / "2s".

render_interval = "16ms"

[[device]]
name = "*"

[[device.effect]]
name = "feedback"
color = "white"
sustain = "750ms"
decay = "500ms"
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = Configuration::from_toml(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.render_interval(), Duration::from_millis(16));
        assert_eq!(config.rules().len(), 1);
        assert_eq!(config.rules()[0].effects[0].name, "feedback");
        assert_eq!(
            config.rules()[0].effects[0].params.get("sustain").unwrap(),
            "750ms"
        );
        assert!(config.path().is_none());
    }

    #[test]
    fn test_effect_params_are_flattened() {
        let config = Configuration::from_toml(
            r#"
            [[device]]
            serial = "ABC*"

            [[device.effect]]
            name = "fill"
            color = "#102030"
            "#,
        )
        .unwrap();
        let effect = &config.rules()[0].effects[0];
        assert_eq!(effect.name, "fill");
        assert_eq!(effect.params.get("color").unwrap(), "#102030");
        assert!(!effect.params.contains_key("name"));
    }

    #[test]
    fn test_rule_matching() {
        let config = Configuration::from_toml(
            r#"
            [[device]]
            serial = "ABC*"

            [[device]]
            name = "*"
            [device.context]
            window = "emacs*"
            "#,
        )
        .unwrap();

        let ctx = Context::new();
        let matched = config.rules_for("Any Keyboard", "ABC123", &ctx);
        assert_eq!(matched.len(), 1);

        let mut emacs = Context::new();
        emacs.set("window", "emacs: scratch");
        let matched = config.rules_for("Any Keyboard", "XYZ", &emacs);
        assert_eq!(matched.len(), 1);
        let matched = config.rules_for("Any Keyboard", "ABC9", &emacs);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_context_key_must_be_present() {
        let rule = DeviceRule {
            name: None,
            serial: None,
            context: [("window".to_string(), "*".to_string())].into(),
            brightness: None,
            effects: Vec::new(),
        };
        assert!(!rule.matches("kb", "s", &Context::new()));
    }

    #[test]
    fn test_invalid_brightness_rejected() {
        let result = Configuration::from_toml(
            r#"
            [[device]]
            brightness = 150
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "brightness",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            Configuration::from_toml("not = [ toml"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("ABC*", "ABC123"));
        assert!(glob_match("*123", "ABC123"));
        assert!(glob_match("A*3", "ABC123"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
        assert!(!glob_match("ABC*", "AB"));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("750ms"), Some(Duration::from_millis(750)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("300"), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("fast"), None);
        assert_eq!(parse_duration("-1s"), None);
    }
}
