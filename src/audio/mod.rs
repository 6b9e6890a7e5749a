//! audio - Sample capture for the beep detector
//!
//! Live capture goes through ALSA (a rate-converting `plug` device, so clock skew
//! between sound card and host never drops or duplicates chunks). Raw S16LE mono
//! PCM from a file or stdin works too, for replaying recordings.

#[cfg(feature = "alsa-capture")]
mod alsa_device;
mod audio_system;
pub mod source;

pub use audio_system::{list_devices, AudioSystem};
pub use source::{Chunk, SampleSource, SourceSpec};
