//! gcode - Offline rewrite of fan commands into timed beep sequences.

pub mod cursor;
pub mod parser;
pub mod ramp;
pub mod sequence;
mod transformer;

pub use cursor::{CursorSettings, TimingCursor};
pub use ramp::RampUp;
pub use sequence::SequenceEmitter;
pub use transformer::{TransformReport, Transformer};
