//! Edge-based segmentation of per-chunk activity into beep events.

use crate::codec::Symbol;

use super::spectrum::SIGNAL_COUNT;

/// Per-chunk classification of the signal bins.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Activity {
    /// Windowed response times the bin's scale
    pub scaled: [f32; SIGNAL_COUNT],
    pub active: [bool; SIGNAL_COUNT],
    /// The sole active bin looks like the harmonic of a lower tone
    pub harmonic: bool,
}

impl Activity {
    pub fn count(&self) -> usize {
        self.active.iter().filter(|a| **a).count()
    }

    pub fn any(&self) -> bool {
        self.active.iter().any(|a| *a)
    }

    /// Index of the only active bin.
    pub fn sole(&self) -> Option<usize> {
        if self.count() == 1 {
            self.active.iter().position(|a| *a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeepEvent {
    pub symbol: Symbol,
    /// First active chunk
    pub start: u64,
    /// Active chunks
    pub duration: u64,
    pub peak: f32,
}

impl BeepEvent {
    /// Last active chunk.
    pub fn end(&self) -> u64 {
        self.start + self.duration - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort,
    TooLong,
    /// More than one bin active in the same chunk
    Simultaneous,
    /// Different bins active over the event's lifetime
    MixedBins,
    Harmonic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    Beep(BeepEvent),
    Rejected(Rejection),
}

#[derive(Debug)]
struct OpenEvent {
    start: u64,
    last: u64,
    seen: [bool; SIGNAL_COUNT],
    peak: [f32; SIGNAL_COUNT],
    simultaneous: bool,
    harmonic: bool,
}

pub struct Segmenter {
    min_tone: u64,
    max_tone: u64,
    open: Option<OpenEvent>,
}

impl Segmenter {
    /// Tone limits are in active chunks.
    pub fn new(min_tone: u64, max_tone: u64) -> Self {
        Self {
            min_tone: min_tone.max(1),
            max_tone,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn reset(&mut self) {
        self.open = None;
    }

    /// Feed one chunk. Returns the event closed by a falling edge, if any.
    pub fn push(&mut self, chunk: u64, activity: &Activity) -> Option<Segment> {
        if activity.any() {
            let event = self.open.get_or_insert_with(|| OpenEvent {
                start: chunk,
                last: chunk,
                seen: [false; SIGNAL_COUNT],
                peak: [0.0; SIGNAL_COUNT],
                simultaneous: false,
                harmonic: false,
            });
            event.last = chunk;
            event.simultaneous |= activity.count() > 1;
            event.harmonic |= activity.harmonic;
            for i in 0..SIGNAL_COUNT {
                if activity.active[i] {
                    event.seen[i] = true;
                    event.peak[i] = event.peak[i].max(activity.scaled[i]);
                }
            }
            return None;
        }

        let event = self.open.take()?;
        Some(self.close(event))
    }

    fn close(&self, event: OpenEvent) -> Segment {
        let duration = event.last - event.start + 1;
        let reject = |reason| {
            Segment::Rejected(Rejection {
                reason,
                start: event.start,
                end: event.last,
            })
        };

        if event.simultaneous {
            return reject(RejectReason::Simultaneous);
        }
        let mut bins = (0..SIGNAL_COUNT).filter(|i| event.seen[*i]);
        let (Some(bin), None) = (bins.next(), bins.next()) else {
            return reject(RejectReason::MixedBins);
        };
        if event.harmonic {
            return reject(RejectReason::Harmonic);
        }
        if duration < self.min_tone {
            return reject(RejectReason::TooShort);
        }
        if duration > self.max_tone {
            return reject(RejectReason::TooLong);
        }

        match Symbol::try_from(bin) {
            Ok(symbol) => Segment::Beep(BeepEvent {
                symbol,
                start: event.start,
                duration,
                peak: event.peak[bin],
            }),
            Err(_) => reject(RejectReason::MixedBins),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(bin: usize) -> Activity {
        let mut a = Activity::default();
        a.active[bin] = true;
        a.scaled[bin] = 50.0;
        a
    }

    fn run(segmenter: &mut Segmenter, chunks: &[Activity]) -> Vec<Segment> {
        chunks
            .iter()
            .enumerate()
            .filter_map(|(i, a)| segmenter.push(i as u64, a))
            .collect()
    }

    #[test]
    fn rising_and_falling_edge_make_one_beep() {
        let quiet = Activity::default();
        let mut segmenter = Segmenter::new(1, 5);
        let out = run(&mut segmenter, &[quiet, only(2), only(2), quiet, quiet]);
        assert_eq!(out.len(), 1);
        let Segment::Beep(beep) = out[0] else {
            panic!("expected a beep, got {:?}", out[0]);
        };
        assert_eq!(beep.symbol, Symbol::S2);
        assert_eq!(beep.start, 1);
        assert_eq!(beep.duration, 2);
        assert_eq!(beep.end(), 2);
        assert!(!segmenter.is_open());
    }

    #[test]
    fn simultaneous_bins_are_dropped() {
        let quiet = Activity::default();
        let mut both = only(0);
        both.active[3] = true;
        let mut segmenter = Segmenter::new(1, 5);
        let out = run(&mut segmenter, &[only(0), both, quiet]);
        assert!(matches!(
            out[0],
            Segment::Rejected(Rejection { reason: RejectReason::Simultaneous, .. })
        ));
    }

    #[test]
    fn bin_change_within_one_event_is_dropped() {
        let quiet = Activity::default();
        let mut segmenter = Segmenter::new(1, 5);
        let out = run(&mut segmenter, &[only(0), only(1), quiet]);
        assert!(matches!(
            out[0],
            Segment::Rejected(Rejection { reason: RejectReason::MixedBins, .. })
        ));
    }

    #[test]
    fn duration_limits() {
        let quiet = Activity::default();
        let mut segmenter = Segmenter::new(2, 3);
        let short = run(&mut segmenter, &[only(1), quiet]);
        assert!(matches!(
            short[0],
            Segment::Rejected(Rejection { reason: RejectReason::TooShort, .. })
        ));
        let long = run(&mut segmenter, &[only(1), only(1), only(1), only(1), quiet]);
        assert!(matches!(
            long[0],
            Segment::Rejected(Rejection { reason: RejectReason::TooLong, start: 0, end: 3 })
        ));
    }

    #[test]
    fn harmonic_flag_rejects() {
        let quiet = Activity::default();
        let mut h = only(3);
        h.harmonic = true;
        let mut segmenter = Segmenter::new(1, 5);
        let out = run(&mut segmenter, &[h, only(3), quiet]);
        assert!(matches!(
            out[0],
            Segment::Rejected(Rejection { reason: RejectReason::Harmonic, .. })
        ));
    }
}
