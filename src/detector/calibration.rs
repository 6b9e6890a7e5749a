//! Calibration sink: collects response statistics and derives tuning suggestions.

use std::time::Instant;

use crate::codec::Sequence;

use super::segmenter::{Activity, BeepEvent, Rejection};
use super::spectrum::{SpectrumFrame, SIGNAL_COUNT};
use super::{DecodedCommand, DetectorParams, DetectorSink};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Population {
    pub sum: f64,
    pub count: u64,
    pub peak: f32,
}

impl Population {
    fn add(&mut self, value: f32) {
        self.sum += f64::from(value);
        self.count += 1;
        self.peak = self.peak.max(value);
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Whether a symbol's tone lands on its configured bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinCheck {
    Unseen,
    Ok,
    /// A neighbour bin answered more strongly
    Drift { suggested_bin: usize, ratio: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub chunks: u64,
    pub beeps: [u64; SIGNAL_COUNT],
    pub sequences: u64,
    pub rejected: u64,
    pub clipped_chunks: u64,
    /// Average response of each signal bin while its tone was the only one present
    pub averages: [Option<f64>; SIGNAL_COUNT],
    /// `None` until every symbol has been heard
    pub suggested_scales: Option<[f64; SIGNAL_COUNT]>,
    /// Suggested scales rise with frequency, as the buzzer's response falls
    pub monotonic: bool,
    pub suggested_sensitivity: Option<f64>,
    /// Noise peaks reach the tone level, no sensitivity separates them
    pub overlap: bool,
    pub bin_checks: [BinCheck; SIGNAL_COUNT],
    pub chunk_rate: Option<f64>,
    pub expected_rate: f64,
}

pub struct CalibrationSink {
    bins: [usize; SIGNAL_COUNT],
    expected_rate: f64,
    /// Responses at `[bin - 1, bin, bin + 1]` while signal i was the sole active bin
    present: [[Population; 3]; SIGNAL_COUNT],
    /// Signal responses while no bin was active
    absent: [Population; SIGNAL_COUNT],
    beeps: [u64; SIGNAL_COUNT],
    sequences: u64,
    rejected: u64,
    clipped: u64,
    chunks: u64,
    first_chunk_at: Option<Instant>,
    last_chunk_at: Option<Instant>,
}

impl CalibrationSink {
    pub fn new(params: &DetectorParams) -> Self {
        Self {
            bins: params.bins,
            expected_rate: params.expected_chunk_rate(),
            present: [[Population::default(); 3]; SIGNAL_COUNT],
            absent: [Population::default(); SIGNAL_COUNT],
            beeps: [0; SIGNAL_COUNT],
            sequences: 0,
            rejected: 0,
            clipped: 0,
            chunks: 0,
            first_chunk_at: None,
            last_chunk_at: None,
        }
    }

    fn chunk_rate(&self) -> Option<f64> {
        let (first, last) = (self.first_chunk_at?, self.last_chunk_at?);
        let secs = last.duration_since(first).as_secs_f64();
        (secs > 0.0 && self.chunks > 1).then(|| (self.chunks - 1) as f64 / secs)
    }

    fn bin_check(&self, i: usize) -> BinCheck {
        let [lo, mid, hi] = self.present[i].map(|p| p.average());
        let (Some(lo), Some(mid), Some(hi)) = (lo, mid, hi) else {
            return BinCheck::Unseen;
        };
        let (neighbour, bin) = if lo > hi {
            (lo, self.bins[i] - 1)
        } else {
            (hi, self.bins[i] + 1)
        };
        if neighbour > mid {
            BinCheck::Drift {
                suggested_bin: bin,
                ratio: neighbour / mid.max(f64::EPSILON),
            }
        } else {
            BinCheck::Ok
        }
    }

    pub fn finish(&self) -> CalibrationReport {
        let averages: [Option<f64>; SIGNAL_COUNT] =
            std::array::from_fn(|i| self.present[i][1].average());

        let mut suggested_scales = None;
        let mut monotonic = false;
        let mut suggested_sensitivity = None;
        let mut overlap = false;

        if averages.iter().all(|a| a.is_some_and(|v| v > 0.0)) {
            let avg = averages.map(|a| a.unwrap_or(1.0));
            let max_avg = avg.iter().copied().fold(f64::MIN, f64::max);
            let scales = avg.map(|a| max_avg / a);
            monotonic = scales.windows(2).all(|w| w[1] >= w[0]);

            // With the suggested scales every tone averages max_avg
            let present = max_avg;
            let absent = (0..SIGNAL_COUNT)
                .map(|i| f64::from(self.absent[i].peak) * scales[i])
                .fold(0.0, f64::max);
            if absent >= present {
                overlap = true;
            } else {
                suggested_sensitivity = Some(absent + (present - absent) / 3.0);
            }
            suggested_scales = Some(scales);
        }

        CalibrationReport {
            chunks: self.chunks,
            beeps: self.beeps,
            sequences: self.sequences,
            rejected: self.rejected,
            clipped_chunks: self.clipped,
            averages,
            suggested_scales,
            monotonic,
            suggested_sensitivity,
            overlap,
            bin_checks: std::array::from_fn(|i| self.bin_check(i)),
            chunk_rate: self.chunk_rate(),
            expected_rate: self.expected_rate,
        }
    }
}

impl DetectorSink for CalibrationSink {
    fn on_frame(&mut self, _chunk: u64, frame: &SpectrumFrame, activity: &Activity) {
        let now = Instant::now();
        self.first_chunk_at.get_or_insert(now);
        self.last_chunk_at = Some(now);
        self.chunks += 1;
        if frame.clipped {
            self.clipped += 1;
        }

        if let Some(i) = activity.sole() {
            for (population, value) in self.present[i].iter_mut().zip(frame.neighborhood[i]) {
                population.add(value);
            }
        } else if !activity.any() {
            for (population, value) in self.absent.iter_mut().zip(frame.signals()) {
                population.add(value);
            }
        }
    }

    fn on_beep(&mut self, beep: &BeepEvent) {
        self.beeps[beep.symbol.index()] += 1;
    }

    fn on_rejected(&mut self, _rejection: &Rejection) {
        self.rejected += 1;
    }

    fn on_command(&mut self, sequence: &Sequence, command: &DecodedCommand) {
        self.sequences += 1;
        log::info!("Calibration: sequence {} (level {})", sequence, command.level);
    }
}

impl CalibrationReport {
    pub fn log_summary(&self) {
        log::info!(
            "Calibration: {} chunks, {} sequences, {} discarded events",
            self.chunks,
            self.sequences,
            self.rejected
        );
        for i in 0..SIGNAL_COUNT {
            match self.averages[i] {
                Some(avg) => log::info!("  symbol {}: {} beeps, average {:.1}", i, self.beeps[i], avg),
                None => log::warn!("  symbol {}: never heard", i),
            }
            if let BinCheck::Drift { suggested_bin, ratio } = self.bin_checks[i] {
                log::warn!(
                    "  symbol {}: bin {} answers {:.2}x stronger, consider it",
                    i,
                    suggested_bin,
                    ratio
                );
            }
        }

        match self.suggested_scales {
            Some(scales) => {
                log::info!(
                    "Suggested signal_scales = [{:.2}, {:.2}, {:.2}, {:.2}]",
                    scales[0],
                    scales[1],
                    scales[2],
                    scales[3]
                );
                if !self.monotonic {
                    log::warn!("Suggested scales do not rise with frequency, check the microphone position");
                }
            }
            None => log::warn!("No scale suggestion, not every symbol was heard"),
        }

        if let Some(sensitivity) = self.suggested_sensitivity {
            log::info!("Suggested sensitivity = {:.1}", sensitivity);
        } else if self.overlap {
            log::warn!("Noise reaches tone level, no sensitivity separates them");
        }

        if self.clipped_chunks > 0 {
            log::warn!("{} chunks clipped, lower the capture gain", self.clipped_chunks);
        }
        if let Some(rate) = self.chunk_rate {
            let ratio = rate / self.expected_rate;
            if ratio < 0.95 {
                log::warn!(
                    "Processed {:.1} chunks/s, expected {:.1}",
                    rate,
                    self.expected_rate
                );
            } else {
                log::info!("Processed {:.1} chunks/s, expected {:.1}", rate, self.expected_rate);
            }
        }
    }
}
