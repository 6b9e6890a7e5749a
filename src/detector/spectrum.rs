//! Per-chunk FFT and the windowed signal-bin responses.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{Error, Result};

/// Number of signal tones.
pub const SIGNAL_COUNT: usize = 4;

/// Responses for one chunk, each summed with the previous chunk so a tone that
/// straddles a chunk boundary still shows at full strength.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumFrame {
    /// `[bin - 1, bin, bin + 1]` for every signal bin
    pub neighborhood: [[f32; 3]; SIGNAL_COUNT],
    /// Response at half of every signal bin
    pub harmonics: [f32; SIGNAL_COUNT],
    /// Chunk touched full scale
    pub clipped: bool,
}

impl SpectrumFrame {
    pub fn signal(&self, index: usize) -> f32 {
        self.neighborhood[index][1]
    }

    pub fn signals(&self) -> [f32; SIGNAL_COUNT] {
        std::array::from_fn(|i| self.signal(i))
    }
}

pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    chunk_size: usize,
    bins: [usize; SIGNAL_COUNT],
    buffer: Vec<Complex<f32>>,
    prev_neighborhood: [[f32; 3]; SIGNAL_COUNT],
    prev_harmonics: [f32; SIGNAL_COUNT],
}

impl SpectrumAnalyzer {
    pub fn new(chunk_size: usize, bins: [usize; SIGNAL_COUNT]) -> Result<Self> {
        let nyquist = chunk_size / 2;
        for &bin in &bins {
            if bin < 2 || bin + 1 >= nyquist {
                return Err(Error::Config(format!(
                    "Signal bin {} is outside 2..{} for a chunk of {} samples",
                    bin,
                    nyquist.saturating_sub(1),
                    chunk_size
                )));
            }
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(chunk_size);

        Ok(Self {
            fft,
            chunk_size,
            bins,
            buffer: vec![Complex::new(0.0, 0.0); chunk_size],
            prev_neighborhood: [[0.0; 3]; SIGNAL_COUNT],
            prev_harmonics: [0.0; SIGNAL_COUNT],
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Forget the previous chunk, used after a capture discontinuity.
    pub fn reset(&mut self) {
        self.prev_neighborhood = [[0.0; 3]; SIGNAL_COUNT];
        self.prev_harmonics = [0.0; SIGNAL_COUNT];
    }

    /// Analyze one chunk. Short input is zero-padded, extra samples are ignored.
    pub fn analyze(&mut self, samples: &[i16]) -> SpectrumFrame {
        let mut clipped = false;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0);
            if s == i16::MAX || s == i16::MIN {
                clipped = true;
            }
            *slot = Complex::new(f32::from(s) / 32768.0, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let magnitude = |bin: usize| self.buffer[bin].norm();
        let current_neighborhood: [[f32; 3]; SIGNAL_COUNT] = std::array::from_fn(|i| {
            let bin = self.bins[i];
            [magnitude(bin - 1), magnitude(bin), magnitude(bin + 1)]
        });
        let current_harmonics: [f32; SIGNAL_COUNT] =
            std::array::from_fn(|i| magnitude(self.bins[i] / 2));

        let mut frame = SpectrumFrame {
            clipped,
            ..Default::default()
        };
        for i in 0..SIGNAL_COUNT {
            for k in 0..3 {
                frame.neighborhood[i][k] = current_neighborhood[i][k] + self.prev_neighborhood[i][k];
            }
            frame.harmonics[i] = current_harmonics[i] + self.prev_harmonics[i];
        }

        self.prev_neighborhood = current_neighborhood;
        self.prev_harmonics = current_harmonics;
        frame
    }
}

/// Sine at a (possibly fractional) bin frequency, used by tests across the detector.
#[cfg(test)]
pub(crate) fn tone(bin: f32, chunk_size: usize, amplitude: f32) -> Vec<i16> {
    use std::f32::consts::PI;
    (0..chunk_size)
        .map(|n| {
            let phase = 2.0 * PI * bin * n as f32 / chunk_size as f32;
            (amplitude * 32767.0 * phase.sin()) as i16
        })
        .collect()
}
