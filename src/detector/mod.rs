//! detector - Recovers fan levels from the printer's buzzer.
//!
//! One FFT per chunk, edge-based segmentation of the four signal bins into
//! beep events, and a silence-timed assembler that turns three beeps into a
//! level. The same core feeds either the command sink or the calibration sink.

pub mod assembler;
pub mod calibration;
pub mod monitor;
pub mod segmenter;
pub mod spectrum;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::codec::{self, Level, Sequence};
use crate::config::DetectorConfig;
use crate::error::Result;

pub use assembler::{SequenceAssembler, SilenceTiming};
pub use calibration::{CalibrationReport, CalibrationSink};
pub use monitor::{PerformanceMonitor, PerformanceStatus};
pub use segmenter::{Activity, BeepEvent, Rejection, Segment, Segmenter};
pub use spectrum::{SpectrumAnalyzer, SpectrumFrame, SIGNAL_COUNT};

/// A level recovered from the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCommand {
    pub level: Level,
    /// Stream time since capture start
    pub at: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub bins: [usize; SIGNAL_COUNT],
    pub scales: [f32; SIGNAL_COUNT],
    pub sensitivity: f32,
    pub harmonic_factor: f32,
    /// Tone limits in chunks
    pub min_tone: u64,
    pub max_tone: u64,
    pub silence: SilenceTiming,
}

impl DetectorParams {
    pub fn from_config(config: &DetectorConfig) -> Self {
        let chunk_ms = config.chunk_size as f64 * 1000.0 / f64::from(config.sample_rate.max(1));
        let chunks = |ms: u32| (f64::from(ms) / chunk_ms).round() as u64;
        Self {
            sample_rate: config.sample_rate,
            chunk_size: config.chunk_size,
            bins: config.signal_bins,
            scales: config.signal_scales,
            sensitivity: config.sensitivity,
            harmonic_factor: config.harmonic_factor,
            min_tone: chunks(config.min_tone_ms).max(1),
            // A tone is seen one chunk longer than it lasts
            max_tone: chunks(config.max_tone_ms) + 1,
            silence: SilenceTiming {
                min_gap: chunks(config.min_gap_ms),
                max_gap: chunks(config.max_gap_ms),
                leading: chunks(config.leading_silence_ms),
                trailing: chunks(config.trailing_silence_ms),
            },
        }
    }

    /// Unit scales and a lower threshold so weak bins still produce samples.
    pub fn for_calibration(mut self) -> Self {
        self.scales = [1.0; SIGNAL_COUNT];
        self.sensitivity /= 4.0;
        self
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_size as f64 / f64::from(self.sample_rate.max(1)))
    }

    pub fn expected_chunk_rate(&self) -> f64 {
        f64::from(self.sample_rate) / self.chunk_size.max(1) as f64
    }
}

/// Receives everything the detector core produces.
pub trait DetectorSink {
    fn on_frame(&mut self, _chunk: u64, _frame: &SpectrumFrame, _activity: &Activity) {}

    fn on_beep(&mut self, _beep: &BeepEvent) {}

    fn on_rejected(&mut self, _rejection: &Rejection) {}

    fn on_command(&mut self, sequence: &Sequence, command: &DecodedCommand);
}

pub struct DetectorCore {
    params: DetectorParams,
    analyzer: SpectrumAnalyzer,
    segmenter: Segmenter,
    assembler: SequenceAssembler,
    chunk: u64,
    discontinuities: u64,
}

impl DetectorCore {
    pub fn new(params: DetectorParams) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(params.chunk_size, params.bins)?;
        Ok(Self {
            segmenter: Segmenter::new(params.min_tone, params.max_tone),
            assembler: SequenceAssembler::new(params.silence),
            analyzer,
            params,
            chunk: 0,
            discontinuities: 0,
        })
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Chunks seen so far, dropped ones included.
    pub fn chunks(&self) -> u64 {
        self.chunk
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    fn classify(&self, frame: &SpectrumFrame) -> Activity {
        let signals = frame.signals();
        let scaled: [f32; SIGNAL_COUNT] = std::array::from_fn(|i| signals[i] * self.params.scales[i]);
        let active = scaled.map(|s| s > self.params.sensitivity);
        let mut activity = Activity {
            scaled,
            active,
            harmonic: false,
        };
        if let Some(i) = activity.sole() {
            activity.harmonic = frame.harmonics[i] >= self.params.harmonic_factor * signals[i];
        }
        activity
    }

    /// Run one chunk through the pipeline.
    pub fn process<S: DetectorSink + ?Sized>(&mut self, samples: &[i16], sink: &mut S) {
        let chunk = self.chunk;
        self.chunk += 1;

        if samples.len() != self.params.chunk_size {
            log::debug!(
                "Chunk {} has {} samples, expected {}",
                chunk,
                samples.len(),
                self.params.chunk_size
            );
        }

        let frame = self.analyzer.analyze(samples);
        let activity = self.classify(&frame);
        sink.on_frame(chunk, &frame, &activity);

        match self.segmenter.push(chunk, &activity) {
            Some(Segment::Beep(beep)) => {
                log::debug!(
                    "Beep {} at chunk {} for {} chunks, peak {:.1}",
                    beep.symbol.index(),
                    beep.start,
                    beep.duration,
                    beep.peak
                );
                sink.on_beep(&beep);
                self.assembler.on_beep(&beep);
            }
            Some(Segment::Rejected(rejection)) => {
                log::debug!(
                    "Discarded {:?} event, chunks {}..={}",
                    rejection.reason,
                    rejection.start,
                    rejection.end
                );
                sink.on_rejected(&rejection);
                self.assembler.on_rejected(rejection.end);
            }
            None => {}
        }

        if let Some(sequence) = self.assembler.tick(chunk, self.segmenter.is_open()) {
            let level = codec::decode(&sequence);
            let command = DecodedCommand {
                level,
                at: self.params.chunk_duration().mul_f64(chunk as f64),
            };
            log::info!(
                "Decoded sequence {} -> level {} ({:.1}%) at {:.2}s",
                sequence,
                level,
                level.duty_percent(),
                command.at.as_secs_f64()
            );
            sink.on_command(&sequence, &command);
        }
    }

    /// Samples were lost. Drops any event or sequence in progress.
    pub fn discontinuity(&mut self) {
        self.discontinuities += 1;
        self.chunk += 1;
        self.analyzer.reset();
        self.segmenter.reset();
        self.assembler.reset();
    }
}

/// Hands decoded commands to async land without ever blocking the audio thread.
pub struct CommandSink {
    tx: mpsc::Sender<DecodedCommand>,
    dropped: u64,
}

impl CommandSink {
    pub fn new(tx: mpsc::Sender<DecodedCommand>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DetectorSink for CommandSink {
    fn on_command(&mut self, _sequence: &Sequence, command: &DecodedCommand) {
        match self.tx.try_send(*command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                log::warn!("Command channel full, dropping level {}", command.level);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped += 1;
                log::warn!("Command channel closed, dropping level {}", command.level);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{params, stream};
    use super::*;
    use crate::config::Config;

    #[derive(Default)]
    struct Collect {
        commands: Vec<DecodedCommand>,
        beeps: usize,
        rejected: usize,
    }

    impl DetectorSink for Collect {
        fn on_beep(&mut self, _beep: &BeepEvent) {
            self.beeps += 1;
        }

        fn on_rejected(&mut self, _rejection: &Rejection) {
            self.rejected += 1;
        }

        fn on_command(&mut self, _sequence: &Sequence, command: &DecodedCommand) {
            self.commands.push(*command);
        }
    }

    fn run(chunks: &[Vec<i16>]) -> Collect {
        let mut core = DetectorCore::new(params()).unwrap();
        let mut sink = Collect::default();
        for chunk in chunks {
            core.process(chunk, &mut sink);
        }
        sink
    }

    #[test]
    fn default_timings_in_chunks() {
        let params = DetectorParams::from_config(&Config::new().unwrap().detector);
        assert_eq!(params.min_tone, 1);
        assert_eq!(params.max_tone, 5);
        assert_eq!(params.silence.min_gap, 2);
        assert_eq!(params.silence.max_gap, 8);
        assert_eq!(params.silence.leading, 6);
        assert_eq!(params.silence.trailing, 7);
        assert!((params.expected_chunk_rate() - 43.07).abs() < 0.01);
    }

    #[test]
    fn decodes_sequence_in_noise() {
        // Level 39 = 2 1 3
        let chunks = stream(&[(10, 161.0, 0.3), (15, 151.0, 0.3), (20, 172.0, 0.3)], 40, 0.01);
        let sink = run(&chunks);

        assert_eq!(sink.beeps, 3);
        assert_eq!(sink.rejected, 0);
        assert_eq!(sink.commands.len(), 1);
        let command = sink.commands[0];
        assert_eq!(command.level.value(), 39);
        let expected = params().chunk_duration().mul_f64(28.0);
        assert_eq!(command.at, expected);
    }

    #[test]
    fn interrupted_sequence_emits_nothing() {
        let chunks = stream(&[(10, 161.0, 0.3), (15, 151.0, 0.3)], 60, 0.01);
        let sink = run(&chunks);
        assert_eq!(sink.beeps, 2);
        assert!(sink.commands.is_empty());
    }

    #[test]
    fn simultaneous_tones_are_not_guessed() {
        let chunks = stream(
            &[
                (10, 161.0, 0.3),
                (15, 151.0, 0.3),
                (20, 172.0, 0.3),
                (20, 139.0, 0.3),
            ],
            40,
            0.01,
        );
        let sink = run(&chunks);
        assert_eq!(sink.rejected, 1);
        assert!(sink.commands.is_empty());
    }

    #[test]
    fn lost_samples_drop_sequence_in_progress() {
        let chunks = stream(&[(10, 161.0, 0.3), (15, 151.0, 0.3), (20, 172.0, 0.3)], 40, 0.01);
        let mut core = DetectorCore::new(params()).unwrap();
        let mut sink = Collect::default();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 18 {
                core.discontinuity();
            } else {
                core.process(chunk, &mut sink);
            }
        }
        assert!(sink.commands.is_empty());
        assert_eq!(core.discontinuities(), 1);
        assert_eq!(core.chunks(), 40);
    }

    #[test]
    fn command_sink_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = CommandSink::new(tx);
        let sequence = codec::encode_level(Level::MAX);
        let command = DecodedCommand {
            level: Level::MAX,
            at: Duration::ZERO,
        };
        sink.on_command(&sequence, &command);
        sink.on_command(&sequence, &command);
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), command);
    }
}
