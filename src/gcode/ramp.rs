//! Ramp-up of fan requests over the first layers.

use crate::codec::Intensity;

/// Z-dependent attenuation of fan requests near the bed.
#[derive(Debug, Clone, Copy)]
pub struct RampUp {
    pub zmax: f64,
    pub scale0: f64,
}

impl RampUp {
    /// `scale0` at Z = 0, rising linearly to 1.0 at `zmax`.
    pub fn scale(&self, z: f64) -> f64 {
        if self.zmax <= 0.0 {
            return 1.0;
        }
        let z = z.clamp(0.0, self.zmax);
        self.scale0 + (1.0 - self.scale0) * z / self.zmax
    }

    pub fn apply(&self, speed: f64, z: f64) -> Intensity {
        Intensity::saturating_from_f64(speed * self.scale(z))
    }
}
