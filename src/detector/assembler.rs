//! Groups beep events into complete three-symbol sequences.

use crate::codec::{Sequence, Symbol};

use super::segmenter::BeepEvent;

/// Silence limits, in chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceTiming {
    pub min_gap: u64,
    pub max_gap: u64,
    /// Silence required before the first symbol
    pub leading: u64,
    /// Silence required after the last symbol before the sequence counts
    pub trailing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitFirst,
    HaveFirst(Symbol),
    HaveSecond(Symbol, Symbol),
    Emit(Sequence),
}

pub struct SequenceAssembler {
    timing: SilenceTiming,
    state: State,
    /// Last chunk of the most recent event, accepted or not
    last_end: Option<u64>,
}

impl SequenceAssembler {
    pub fn new(timing: SilenceTiming) -> Self {
        Self {
            timing,
            state: State::AwaitFirst,
            last_end: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitFirst
    }

    /// Drop any partial sequence and forget the previous event.
    pub fn reset(&mut self) {
        self.state = State::AwaitFirst;
        self.last_end = None;
    }

    fn silence_before(&self, start: u64) -> Option<u64> {
        self.last_end.map(|end| start.saturating_sub(end + 1))
    }

    pub fn on_beep(&mut self, beep: &BeepEvent) {
        let gap = self.silence_before(beep.start);
        let leading_ok = gap.is_none_or(|g| g >= self.timing.leading);
        let gap_ok = gap.is_some_and(|g| g >= self.timing.min_gap && g <= self.timing.max_gap);
        self.last_end = Some(beep.end());

        self.state = match self.state {
            State::AwaitFirst if leading_ok => State::HaveFirst(beep.symbol),
            State::AwaitFirst => {
                log::debug!(
                    "Symbol {} at chunk {} ignored, not enough leading silence",
                    beep.symbol.index(),
                    beep.start
                );
                State::AwaitFirst
            }
            State::HaveFirst(a) if gap_ok => State::HaveSecond(a, beep.symbol),
            State::HaveSecond(a, b) if gap_ok => State::Emit(Sequence([a, b, beep.symbol])),
            State::Emit(sequence) => {
                log::debug!(
                    "Sequence {} dropped, extra symbol at chunk {}",
                    sequence,
                    beep.start
                );
                State::AwaitFirst
            }
            _ if leading_ok => {
                log::debug!("Partial sequence dropped, restarting at chunk {}", beep.start);
                State::HaveFirst(beep.symbol)
            }
            _ => {
                log::debug!(
                    "Partial sequence dropped, gap of {:?} chunks before chunk {}",
                    gap,
                    beep.start
                );
                State::AwaitFirst
            }
        };
    }

    /// A discarded event breaks any sequence in progress.
    pub fn on_rejected(&mut self, end: u64) {
        if !self.is_idle() {
            log::debug!("Partial sequence dropped by a discarded event ending at chunk {}", end);
        }
        self.state = State::AwaitFirst;
        self.last_end = Some(end);
    }

    /// Advance the silence clock. Returns the sequence once its trailing silence has passed.
    pub fn tick(&mut self, chunk: u64, in_tone: bool) -> Option<Sequence> {
        if in_tone {
            return None;
        }
        let silent = chunk.saturating_sub(self.last_end?);
        match self.state {
            State::HaveFirst(_) | State::HaveSecond(..) if silent > self.timing.max_gap => {
                log::debug!("Incomplete sequence timed out at chunk {}", chunk);
                self.state = State::AwaitFirst;
                None
            }
            State::Emit(sequence) if silent >= self.timing.trailing => {
                self.state = State::AwaitFirst;
                Some(sequence)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMING: SilenceTiming = SilenceTiming {
        min_gap: 2,
        max_gap: 8,
        leading: 6,
        trailing: 7,
    };

    fn beep(symbol: Symbol, start: u64) -> BeepEvent {
        BeepEvent {
            symbol,
            start,
            duration: 2,
            peak: 40.0,
        }
    }

    /// Ticks every silent chunk in `from..to`, returning what was emitted and when.
    fn idle(assembler: &mut SequenceAssembler, from: u64, to: u64) -> Option<(u64, Sequence)> {
        (from..to).find_map(|c| assembler.tick(c, false).map(|s| (c, s)))
    }

    #[test]
    fn emits_after_trailing_silence() {
        let mut assembler = SequenceAssembler::new(TIMING);
        assembler.on_beep(&beep(Symbol::S1, 10));
        assert!(idle(&mut assembler, 12, 15).is_none());
        assembler.on_beep(&beep(Symbol::S0, 15));
        assert!(idle(&mut assembler, 17, 20).is_none());
        assembler.on_beep(&beep(Symbol::S3, 20));

        let (chunk, sequence) = idle(&mut assembler, 22, 40).unwrap();
        assert_eq!(chunk, 28);
        assert_eq!(sequence, Sequence([Symbol::S1, Symbol::S0, Symbol::S3]));
        assert!(assembler.is_idle());
    }

    #[test]
    fn long_gap_drops_partial_sequence() {
        let mut assembler = SequenceAssembler::new(TIMING);
        assembler.on_beep(&beep(Symbol::S1, 10));
        assembler.on_beep(&beep(Symbol::S2, 15));
        assert!(idle(&mut assembler, 17, 30).is_none());
        assert!(assembler.is_idle());
    }

    #[test]
    fn short_gap_drops_partial_sequence() {
        let mut assembler = SequenceAssembler::new(TIMING);
        assembler.on_beep(&beep(Symbol::S1, 10));
        assembler.on_beep(&beep(Symbol::S2, 13));
        assert!(assembler.is_idle());
    }

    #[test]
    fn fourth_symbol_resets() {
        let mut assembler = SequenceAssembler::new(TIMING);
        for (i, symbol) in [Symbol::S1, Symbol::S2, Symbol::S3, Symbol::S0]
            .into_iter()
            .enumerate()
        {
            assembler.on_beep(&beep(symbol, 10 + 5 * i as u64));
        }
        assert!(idle(&mut assembler, 27, 60).is_none());
    }

    #[test]
    fn first_symbol_needs_leading_silence() {
        let mut assembler = SequenceAssembler::new(TIMING);
        assembler.on_rejected(8);
        assembler.on_beep(&beep(Symbol::S1, 12));
        assert!(assembler.is_idle());
    }

    #[test]
    fn discarded_event_breaks_sequence() {
        let mut assembler = SequenceAssembler::new(TIMING);
        assembler.on_beep(&beep(Symbol::S1, 10));
        assembler.on_beep(&beep(Symbol::S2, 15));
        assembler.on_rejected(19);
        assert!(assembler.is_idle());
    }
}
