//! Manual overrides layered above the automatic target.

use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideMode {
    Off,
    Auto,
    Fixed,
    Scaled,
}

#[derive(Debug, Clone)]
pub struct Overrides {
    mode: OverrideMode,
    auto_target: f64,
    fixed_duty: f64,
    scale: f64,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            mode: OverrideMode::Auto,
            auto_target: 0.0,
            fixed_duty: 0.0,
            scale: 1.0,
        }
    }
}

impl Overrides {
    /// Reported mode. `Scaled` is automatic mode with a scale factor other than 1.
    pub fn mode(&self) -> OverrideMode {
        match self.mode {
            OverrideMode::Auto if self.scale != 1.0 => OverrideMode::Scaled,
            mode => mode,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn auto_target(&self) -> f64 {
        self.auto_target
    }

    /// Latest decoded target, kept even while an override hides it.
    pub fn set_auto_target(&mut self, duty: f64) {
        self.auto_target = duty;
    }

    pub fn force_off(&mut self) {
        self.mode = OverrideMode::Off;
    }

    pub fn fix(&mut self, duty: f64) -> Result<()> {
        if !duty.is_finite() {
            return Err(Error::InvalidMessage(format!("fixed duty {}", duty)));
        }
        self.fixed_duty = duty.clamp(0.0, 100.0);
        self.mode = OverrideMode::Fixed;
        Ok(())
    }

    /// Back to decoded targets. The scale factor survives.
    pub fn clear(&mut self) {
        self.mode = OverrideMode::Auto;
    }

    /// Scale decoded targets. Does not lift an `off` or `fixed` override.
    pub fn set_scale(&mut self, factor: f64) -> Result<()> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(Error::InvalidMessage(format!("scale factor {}", factor)));
        }
        self.scale = factor;
        Ok(())
    }

    pub fn reset_scale(&mut self) {
        self.scale = 1.0;
    }

    /// Duty (%) the state machine should aim for.
    pub fn effective_target(&self) -> f64 {
        match self.mode {
            OverrideMode::Off => 0.0,
            OverrideMode::Fixed => self.fixed_duty,
            OverrideMode::Auto | OverrideMode::Scaled => {
                (self.auto_target * self.scale).clamp(0.0, 100.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_hides_automatic_target_until_cleared() {
        let mut overrides = Overrides::default();
        overrides.set_auto_target(30.0);
        overrides.fix(70.0).unwrap();
        overrides.set_auto_target(50.0);
        assert_eq!(overrides.effective_target(), 70.0);

        overrides.clear();
        assert_eq!(overrides.effective_target(), 50.0);
    }

    #[test]
    fn scaled_targets_are_clamped() {
        let mut overrides = Overrides::default();
        overrides.set_auto_target(60.0);
        overrides.set_scale(0.5).unwrap();
        assert_eq!(overrides.effective_target(), 30.0);
        overrides.set_scale(2.0).unwrap();
        assert_eq!(overrides.effective_target(), 100.0);
        overrides.reset_scale();
        assert_eq!(overrides.mode(), OverrideMode::Auto);
        assert_eq!(overrides.effective_target(), 60.0);
        assert!(overrides.set_scale(-1.0).is_err());
    }

    #[test]
    fn scale_survives_fixed_and_off() {
        let mut overrides = Overrides::default();
        overrides.set_auto_target(60.0);
        overrides.set_scale(0.5).unwrap();
        assert_eq!(overrides.mode(), OverrideMode::Scaled);

        overrides.fix(70.0).unwrap();
        assert_eq!(overrides.mode(), OverrideMode::Fixed);
        assert_eq!(overrides.effective_target(), 70.0);
        overrides.clear();
        assert_eq!(overrides.mode(), OverrideMode::Scaled);
        assert_eq!(overrides.effective_target(), 30.0);

        overrides.force_off();
        assert_eq!(overrides.effective_target(), 0.0);
        overrides.clear();
        assert_eq!(overrides.effective_target(), 30.0);
    }

    #[test]
    fn scale_set_while_fixed_applies_after_clear() {
        let mut overrides = Overrides::default();
        overrides.set_auto_target(80.0);
        overrides.fix(40.0).unwrap();
        overrides.set_scale(0.25).unwrap();
        assert_eq!(overrides.mode(), OverrideMode::Fixed);
        assert_eq!(overrides.effective_target(), 40.0);
        overrides.clear();
        assert_eq!(overrides.effective_target(), 20.0);
    }

    #[test]
    fn off_forces_zero() {
        let mut overrides = Overrides::default();
        overrides.set_auto_target(80.0);
        overrides.force_off();
        assert_eq!(overrides.effective_target(), 0.0);
    }
}
