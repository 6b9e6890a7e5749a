//! Variable fan speed for printers whose only spare output is a buzzer.
//!
//! Fan commands in a G-code file are rewritten offline into short beep sequences
//! (`gcode`), the beeps are decoded live from a microphone (`detector`, `audio`)
//! and the decoded levels drive a PWM fan (`fan`), either in one process or
//! across a relay (`relay`).

pub mod audio;
pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod fan;
pub mod gcode;
pub mod protocol;
pub mod relay;

pub use error::{Error, Result};
