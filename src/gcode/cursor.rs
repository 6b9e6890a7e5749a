//! Replays motion commands to estimate elapsed print time.
//!
//! Acceleration is not modelled: a move takes `distance * feed_factor / F` seconds.

use super::parser::MoveArgs;

/// Z rise that counts as a new layer in a combined XY+Z (vase mode) move.
pub const VASE_LAYER_STEP: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct CursorSettings {
    pub feed_factor: f64,
    pub feed_limit_z: f64,
    pub z_correction_threshold: f64,
    pub z_correction_factor: f64,
}

/// Outcome of one replayed move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub start: f64,
    pub duration: f64,
    /// Position before the move
    pub from: [f64; 3],
    pub layer_changed: bool,
}

#[derive(Debug, Clone)]
pub struct TimingCursor {
    settings: CursorSettings,
    elapsed: f64,
    position: [f64; 3],
    feed: Option<f64>,
    layer_z: Option<f64>,
}

impl TimingCursor {
    pub fn new(settings: CursorSettings) -> Self {
        Self {
            settings,
            elapsed: 0.0,
            position: [0.0; 3],
            feed: None,
            layer_z: None,
        }
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    pub fn feed(&self) -> Option<f64> {
        self.feed
    }

    /// Height of the layer being printed, 0 before the first layer.
    pub fn layer_z(&self) -> f64 {
        self.layer_z.unwrap_or(0.0)
    }

    pub fn advance(&mut self, args: &MoveArgs) -> Step {
        let from = self.position;
        let mut to = from;
        if let Some(x) = args.x {
            to[0] = x;
        }
        if let Some(y) = args.y {
            to[1] = y;
        }
        if let Some(z) = args.z {
            to[2] = z;
        }
        if let Some(f) = args.f.filter(|f| *f > 0.0) {
            self.feed = Some(f);
        }

        let previous_layer = self.layer_z;
        if let Some(z) = args.z {
            if args.has_xy() {
                // Vase mode: only a clear rise is a new layer
                match self.layer_z {
                    Some(layer) if z < layer + VASE_LAYER_STEP => {}
                    _ => self.layer_z = Some(z),
                }
            } else {
                self.layer_z = Some(z);
            }
        }

        let s = &self.settings;
        let mut duration = match self.feed {
            None => 0.0,
            Some(feed) => {
                if args.has_xy() {
                    (to[0] - from[0]).hypot(to[1] - from[1]) * s.feed_factor / feed
                } else if args.z.is_some() {
                    (to[2] - from[2]).abs() * s.feed_factor / feed.min(s.feed_limit_z)
                } else if let Some(e) = args.e {
                    e.abs() * s.feed_factor / feed
                } else {
                    0.0
                }
            }
        };
        if to[2] >= s.z_correction_threshold {
            duration *= s.z_correction_factor;
        }

        let start = self.elapsed;
        self.elapsed += duration;
        self.position = to;

        Step {
            start,
            duration,
            from,
            layer_changed: self.layer_z != previous_layer,
        }
    }
}
