//! Key-press feedback: pressed keys light up, hold, then fade out.

use std::time::Duration;

use crate::color::Rgba;
use crate::keymap::Key;
use crate::render::RenderTarget;

use super::{Effect, EffectError, EffectService};

const DEFAULT_SUSTAIN: Duration = Duration::from_millis(750);
const DEFAULT_DECAY: Duration = Duration::from_millis(500);

/// A key press still being drawn.
struct KeyPress {
    index: usize,
    /// Elapsed time since the last (re)press, capped at sustain + decay.
    age: Duration,
}

/// Reference decay effect.
///
/// Recognized parameters: `color` (default opaque white), `sustain` (time at
/// full opacity, default 750ms), `decay` (linear fade-out time, default
/// 500ms). Presses restart the fade; releases are ignored.
pub struct FeedbackEffect {
    color: Rgba,
    sustain: Duration,
    decay: Duration,
    presses: Vec<KeyPress>,
}

impl FeedbackEffect {
    pub fn create(service: &EffectService) -> Result<Box<dyn Effect>, EffectError> {
        Ok(Box::new(Self {
            color: service.color_config("color", Rgba::WHITE)?,
            sustain: service.duration_config("sustain", DEFAULT_SUSTAIN)?,
            decay: service.duration_config("decay", DEFAULT_DECAY)?,
            presses: Vec::new(),
        }))
    }
}

impl Effect for FeedbackEffect {
    fn render(&mut self, elapsed: Duration, target: &mut RenderTarget) {
        target.clear();

        let lifetime = self.sustain + self.decay;
        let color = self.color;
        let decay = self.decay;

        for press in &mut self.presses {
            press.age = (press.age + elapsed).min(lifetime);
            let alpha = if decay.is_zero() {
                if press.age < lifetime { color.a } else { 0 }
            } else {
                // Full alpha while age <= sustain, then a linear ramp to zero.
                let remaining = lifetime.saturating_sub(press.age).min(decay);
                (color.a as u128 * remaining.as_micros() / decay.as_micros()) as u8
            };
            target[press.index] = color.with_alpha(alpha);
        }
        self.presses.retain(|press| press.age < lifetime);
    }

    fn handle_key_event(&mut self, key: &Key, pressed: bool) {
        if !pressed {
            return;
        }
        if let Some(press) = self.presses.iter_mut().find(|p| p.index == key.index) {
            press.age = Duration::ZERO;
        } else {
            self.presses.push(KeyPress {
                index: key.index,
                age: Duration::ZERO,
            });
        }
    }
}
