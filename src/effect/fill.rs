//! Constant fill: paints every key with one color.

use std::time::Duration;

use crate::color::Rgba;
use crate::render::RenderTarget;

use super::{Effect, EffectError, EffectService};

/// Recognized parameters: `color` (required).
pub struct FillEffect {
    color: Rgba,
}

impl FillEffect {
    pub fn create(service: &EffectService) -> Result<Box<dyn Effect>, EffectError> {
        let value = service
            .get_config("color")
            .ok_or(EffectError::MissingParam("color"))?;
        let color = Rgba::parse(value).ok_or(EffectError::InvalidParam {
            key: "color",
            value: value.to_string(),
        })?;
        Ok(Box::new(Self { color }))
    }
}

impl Effect for FillEffect {
    fn render(&mut self, _elapsed: Duration, target: &mut RenderTarget) {
        target.fill(self.color);
    }
}
