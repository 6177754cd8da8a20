//! Breathe: periodic fade of a base color across the whole device.

use std::f32::consts::TAU;
use std::time::Duration;

use crate::color::Rgba;
use crate::render::RenderTarget;

use super::{Effect, EffectError, EffectService};

const DEFAULT_PERIOD: Duration = Duration::from_millis(3000);

/// Recognized parameters: `color` (default opaque white), `period` (full
/// fade cycle, default 3000ms).
pub struct BreatheEffect {
    color: Rgba,
    period_us: u128,
    phase_us: u128,
}

impl BreatheEffect {
    pub fn create(service: &EffectService) -> Result<Box<dyn Effect>, EffectError> {
        let period = service.duration_config("period", DEFAULT_PERIOD)?;
        if period.is_zero() {
            return Err(EffectError::InvalidParam {
                key: "period",
                value: "0".to_string(),
            });
        }
        Ok(Box::new(Self {
            color: service.color_config("color", Rgba::WHITE)?,
            period_us: period.as_micros(),
            phase_us: 0,
        }))
    }

    fn level(&self) -> f32 {
        let t = self.phase_us as f32 / self.period_us as f32;
        0.5 - 0.5 * (TAU * t).cos()
    }
}

impl Effect for BreatheEffect {
    fn render(&mut self, elapsed: Duration, target: &mut RenderTarget) {
        self.phase_us = (self.phase_us + elapsed.as_micros()) % self.period_us;
        let alpha = (self.color.a as f32 * self.level()).round() as u8;
        target.fill(self.color.with_alpha(alpha));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn effect(params: &[(&str, &str)]) -> Box<dyn Effect> {
        let params: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BreatheEffect::create(&EffectService::new(params, 2)).unwrap()
    }

    #[test]
    fn test_dark_at_cycle_start_bright_at_midpoint() {
        let mut fx = effect(&[("period", "1s")]);
        let mut target = RenderTarget::new(2);

        fx.render(Duration::ZERO, &mut target);
        assert_eq!(target[0].a, 0);

        fx.render(Duration::from_millis(500), &mut target);
        assert_eq!(target[0].a, 255);
    }

    #[test]
    fn test_phase_wraps_around() {
        let mut fx = effect(&[("period", "1s")]);
        let mut target = RenderTarget::new(2);
        fx.render(Duration::from_millis(1500), &mut target);
        let wrapped = target[0].a;
        assert_eq!(wrapped, 255);
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = BreatheEffect::create(&EffectService::new(
            [("period".to_string(), "0ms".to_string())].into(),
            2,
        ));
        assert!(matches!(
            result,
            Err(EffectError::InvalidParam { key: "period", .. })
        ));
    }
}
