//! Renders a level as `M300` beep commands.

use crate::codec::{self, Level, SEQUENCE_LENGTH};

/// Comment that closes every rendered sequence.
pub const END_OF_SEQUENCE: &str = "; end sequence";

#[derive(Debug, Clone)]
pub struct SequenceEmitter {
    pub freqs: [u32; 4],
    pub beep_ms: u32,
    pub gap_ms: u32,
    pub pad_ms: u32,
}

impl SequenceEmitter {
    /// Seconds the buzzer needs for one sequence, including both silent pads.
    pub fn playback_duration(&self) -> f64 {
        let symbols = SEQUENCE_LENGTH as u32;
        let total_ms =
            2 * self.pad_ms + symbols * self.beep_ms + (symbols - 1) * self.gap_ms;
        f64::from(total_ms) / 1000.0
    }

    pub fn render(&self, level: Level, note: &str) -> Vec<String> {
        let sequence = codec::encode_level(level);
        let comment = if level.is_off() {
            format!("fan off{}", note)
        } else {
            format!("fan level {} = {:.2}%{}", level, level.duty_percent(), note)
        };

        let mut lines = Vec::with_capacity(2 * SEQUENCE_LENGTH + 1);
        lines.push(format!(
            "M300 S0 P{}; {} -> sequence {}",
            self.pad_ms, comment, sequence
        ));
        for (i, symbol) in sequence.symbols().iter().enumerate() {
            lines.push(format!("M300 S{} P{}", self.freqs[symbol.index()], self.beep_ms));
            if i + 1 < SEQUENCE_LENGTH {
                lines.push(format!("M300 S0 P{}", self.gap_ms));
            }
        }
        lines.push(format!("M300 S0 P{}{}", self.pad_ms, END_OF_SEQUENCE));
        lines
    }
}
