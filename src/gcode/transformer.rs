//! Rewrites fan commands into beep sequences placed ahead of time.
//!
//! Lines pass through a ring buffer that remembers when each one starts and ends in
//! estimated print time. A fan request at time `t` is inserted at the latest buffered
//! position whose time is not after `t - lead_time`. Inserted sequences are barriers:
//! nothing is ever placed before an earlier sequence.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use crate::codec::Level;
use crate::config::PostprocessConfig;
use crate::error::{Error, Result};

use super::cursor::{CursorSettings, TimingCursor};
use super::parser::{self, Command};
use super::ramp::RampUp;
use super::sequence::SequenceEmitter;

/// Lines inspected after a fan command or layer change.
const LOOK_AHEAD: usize = 3;

/// Counters describing one transform run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    /// `M106`/`M107` lines in the body
    pub fan_commands: usize,
    pub sequences: usize,
    pub repeats_skipped: usize,
    /// Fan commands overridden by another one within the look-ahead
    pub superseded: usize,
    /// Colliding decreases postponed until the previous sequence finished
    pub deferred: usize,
    /// Placements that missed the requested lead time
    pub degraded: usize,
    pub split_moves: usize,
    /// Sequences emitted because the ramp-up changed the level at a new layer
    pub layer_updates: usize,
    pub legacy_fan_commands: usize,
}

impl TransformReport {
    pub fn log_summary(&self) {
        log::info!(
            "Transform done: {} fan commands, {} sequences ({} after layer changes), {} repeats skipped, {} superseded, {} deferred, {} degraded, {} moves split",
            self.fan_commands,
            self.sequences,
            self.layer_updates,
            self.repeats_skipped,
            self.superseded,
            self.deferred,
            self.degraded,
            self.split_moves,
        );
        if self.legacy_fan_commands > 0 {
            log::warn!(
                "{} M126/M127 command(s) found inside the body. The fan will most likely not work for this print, check that the slicer emits M106 commands",
                self.legacy_fan_commands
            );
        }
    }
}

pub struct Transformer {
    config: PostprocessConfig,
    emitter: SequenceEmitter,
    ramp: RampUp,
}

impl Transformer {
    pub fn new(config: PostprocessConfig) -> Result<Self> {
        if config.lead_time.is_nan() || config.lead_time < 0.0 {
            return Err(Error::Config(format!(
                "lead_time must be >= 0, got {}",
                config.lead_time
            )));
        }
        if config.feed_factor.is_nan()
            || config.feed_factor <= 0.0
            || config.feed_limit_z.is_nan()
            || config.feed_limit_z <= 0.0
        {
            return Err(Error::Config(
                "feed_factor and feed_limit_z must be positive".to_string(),
            ));
        }
        if config.end_marker.trim().is_empty() {
            return Err(Error::Config("end_marker must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&config.ramp_up_scale0) {
            return Err(Error::Config(format!(
                "ramp_up_scale0 must be within 0..=1, got {}",
                config.ramp_up_scale0
            )));
        }

        let emitter = SequenceEmitter {
            freqs: config.signal_freqs,
            beep_ms: config.beep_ms,
            gap_ms: config.gap_ms,
            pad_ms: config.pad_ms,
        };
        let ramp = RampUp {
            zmax: config.ramp_up_zmax,
            scale0: config.ramp_up_scale0,
        };
        Ok(Self {
            config,
            emitter,
            ramp,
        })
    }

    pub fn emitter(&self) -> &SequenceEmitter {
        &self.emitter
    }

    /// Transform a whole file. Nothing is written if the end marker is missing.
    pub fn transform<R: BufRead, W: Write>(&self, input: R, output: W) -> Result<TransformReport> {
        let lines = input
            .lines()
            .map(|l| l.map(|l| l.trim_end_matches('\r').to_string()))
            .collect::<std::io::Result<Vec<String>>>()?;

        let marker = self.config.end_marker.trim_end();
        let end = lines
            .iter()
            .position(|l| l.trim_end() == marker)
            .ok_or_else(|| Error::EndMarkerNotFound(self.config.end_marker.clone()))?;

        let body_start = if self.config.body_marker.is_empty() {
            0
        } else {
            lines[..end]
                .iter()
                .position(|l| parser::is_comment_marker(l, &self.config.body_marker))
                .map_or(0, |i| i + 1)
        };
        if body_start == 0 && !self.config.body_marker.is_empty() {
            log::debug!("No body marker found, treating everything before the end marker as body");
        }

        let mut pass = Pass::new(self, &lines, body_start, end, output);
        pass.start_section()?;
        for index in body_start..end {
            pass.body_line(index)?;
        }
        pass.finish()
    }
}

#[derive(Debug, Clone)]
struct Splittable {
    from: [f64; 2],
    to: [f64; 2],
    e: Option<f64>,
    f: Option<f64>,
    comment: Option<String>,
}

#[derive(Debug)]
enum EntryKind {
    Line,
    Move(Option<Splittable>),
    /// Inserted sequence, never crossed by later placements
    Sequence,
}

#[derive(Debug)]
struct Entry {
    lines: Vec<String>,
    kind: EntryKind,
    start: f64,
    end: f64,
}

struct Pending {
    level: Level,
    note: String,
}

/// State for one transform run.
struct Pass<'a, W: Write> {
    t: &'a Transformer,
    lines: &'a [String],
    body_start: usize,
    end: usize,
    out: W,
    entries: VecDeque<Entry>,
    cursor: TimingCursor,
    /// Raw speed of the latest fan command in the body
    request: Option<f64>,
    last_level: Option<Level>,
    last_sequence_at: Option<f64>,
    deferred: Option<Pending>,
    /// Layer height of the last accepted layer change
    event_layer: f64,
    /// Fan-off command not followed by any extrusion, kept at its own position
    trailing_off: Option<usize>,
    report: TransformReport,
}

impl<'a, W: Write> Pass<'a, W> {
    fn new(t: &'a Transformer, lines: &'a [String], body_start: usize, end: usize, out: W) -> Self {
        let c = &t.config;
        let cursor = TimingCursor::new(CursorSettings {
            feed_factor: c.feed_factor,
            feed_limit_z: c.feed_limit_z,
            z_correction_threshold: c.z_correction_threshold,
            z_correction_factor: c.z_correction_factor,
        });

        let mut trailing_off = None;
        for index in (body_start..end).rev() {
            match parser::parse_line(&lines[index]) {
                Command::Fan(speed) => {
                    if speed <= 0.0 {
                        trailing_off = Some(index);
                    }
                    break;
                }
                Command::Move(args) if args.is_extruding() => break,
                _ => {}
            }
        }

        Self {
            t,
            lines,
            body_start,
            end,
            out,
            entries: VecDeque::new(),
            cursor,
            request: None,
            last_level: None,
            last_sequence_at: None,
            deferred: None,
            event_layer: 0.0,
            trailing_off,
            report: TransformReport::default(),
        }
    }

    fn lead(&self) -> f64 {
        self.t.config.lead_time
    }

    fn playback(&self) -> f64 {
        self.t.emitter.playback_duration()
    }

    fn tail(&self) -> f64 {
        self.cursor.elapsed()
    }

    /// Copy the start G-code, replacing its fan commands by one fan-off sequence.
    fn start_section(&mut self) -> Result<()> {
        let lines = self.lines;
        let mut replaced = false;
        for line in &lines[..self.body_start] {
            match parser::parse_line(line) {
                Command::Fan(_) => {
                    if !replaced {
                        for l in self.t.emitter.render(Level::OFF, "") {
                            writeln!(self.out, "{}", l)?;
                        }
                        replaced = true;
                        self.last_level = Some(Level::OFF);
                        self.last_sequence_at = Some(self.cursor.elapsed());
                    }
                }
                Command::Move(args) => {
                    self.cursor.advance(&args);
                    writeln!(self.out, "{}", line)?;
                }
                _ => writeln!(self.out, "{}", line)?,
            }
        }
        Ok(())
    }

    fn body_line(&mut self, index: usize) -> Result<()> {
        let lines = self.lines;
        let line = &lines[index];
        match parser::parse_line(line) {
            Command::Move(args) => {
                let step = self.cursor.advance(&args);
                let splittable = (args.linear && args.has_xy() && args.z.is_none())
                    .then(|| Splittable {
                        from: [step.from[0], step.from[1]],
                        to: {
                            let p = self.cursor.position();
                            [p[0], p[1]]
                        },
                        e: args.e,
                        f: args.f,
                        comment: line.find(';').map(|i| line[i..].to_string()),
                    });
                self.entries.push_back(Entry {
                    lines: vec![line.clone()],
                    kind: EntryKind::Move(splittable),
                    start: step.start,
                    end: step.start + step.duration,
                });
                // A Z change undone within the look-ahead is a hop, not a layer
                if step.layer_changed && self.peek_cursor(index).layer_z() != self.event_layer {
                    self.event_layer = self.cursor.layer_z();
                    self.layer_change(index);
                }
            }
            Command::Fan(speed) => {
                self.report.fan_commands += 1;
                self.fan_command(index, speed);
            }
            Command::LegacyFan => {
                self.report.legacy_fan_commands += 1;
                self.push_line(index);
            }
            Command::Other => self.push_line(index),
        }

        self.place_deferred_if_due();
        self.flush_old()
    }

    fn push_line(&mut self, index: usize) {
        let now = self.tail();
        self.entries.push_back(Entry {
            lines: vec![self.lines[index].clone()],
            kind: EntryKind::Line,
            start: now,
            end: now,
        });
    }

    fn look_ahead(&self, index: usize) -> std::ops::Range<usize> {
        (index + 1)..(index + 1 + LOOK_AHEAD).min(self.end)
    }

    /// Cursor state a few lines ahead, without touching the real cursor.
    fn peek_cursor(&self, index: usize) -> TimingCursor {
        let mut peek = self.cursor.clone();
        for i in self.look_ahead(index) {
            if let Command::Move(args) = parser::parse_line(&self.lines[i]) {
                peek.advance(&args);
            }
        }
        peek
    }

    fn fan_command(&mut self, index: usize, speed: f64) {
        let overridden = self
            .look_ahead(index)
            .any(|i| matches!(parser::parse_line(&self.lines[i]), Command::Fan(_)));
        if overridden {
            log::debug!("line {}: fan command overridden by a following one", index + 1);
            self.report.superseded += 1;
            return;
        }

        self.request = Some(speed);
        // Slicers put the fan command just before the layer change it belongs to
        let z = self.peek_cursor(index).layer_z();
        let scale = self.t.ramp.scale(z);
        let level = self.t.ramp.apply(speed, z).level();
        let note = if scale < 1.0 {
            format!(" (S{} scaled {:.3})", speed, scale)
        } else {
            String::new()
        };

        let lead = if self.trailing_off == Some(index) && level.is_off() {
            log::debug!("line {}: trailing fan off kept at its position", index + 1);
            0.0
        } else {
            self.lead()
        };
        self.schedule(level, lead, note);
    }

    fn layer_change(&mut self, index: usize) {
        let Some(speed) = self.request else {
            return;
        };
        let z = self.cursor.layer_z();
        let level = self.t.ramp.apply(speed, z).level();
        let effective = self
            .deferred
            .as_ref()
            .map(|d| d.level)
            .or(self.last_level);
        if effective == Some(level) {
            return;
        }
        log::debug!("line {}: layer {} changes fan level to {}", index + 1, z, level);
        self.report.layer_updates += 1;
        let note = format!(" (S{} scaled {:.3})", speed, self.t.ramp.scale(z));
        self.schedule(level, self.lead(), note);
    }

    fn schedule(&mut self, level: Level, lead: f64, note: String) {
        if let Some(pending) = self.deferred.take() {
            log::debug!("Deferred level {} superseded by {}", pending.level, level);
        }
        if self.last_level == Some(level) {
            self.report.repeats_skipped += 1;
            return;
        }

        let now = self.tail();
        let mut target = now - lead;
        if let Some(previous) = self.last_sequence_at {
            let free_at = previous + self.playback();
            if target < free_at {
                // Fan on wins: increases go right after the previous sequence
                if self.last_level.is_none_or(|l| level > l) {
                    target = free_at.min(now);
                } else {
                    log::debug!(
                        "Level {} collides with the previous sequence, deferring",
                        level
                    );
                    self.report.deferred += 1;
                    if free_at <= now {
                        self.place_from(level, free_at, &note);
                    } else {
                        self.deferred = Some(Pending { level, note });
                    }
                    return;
                }
            }
        }
        self.place(level, target, &note);
    }

    fn place_deferred_if_due(&mut self) {
        if self.deferred.is_none() {
            return;
        }
        let free_at = self
            .last_sequence_at
            .map_or(0.0, |previous| previous + self.playback());
        if self.tail() < free_at {
            return;
        }
        if let Some(pending) = self.deferred.take() {
            self.place_from(pending.level, free_at, &pending.note);
        }
    }

    fn time_at(&self, position: usize) -> f64 {
        self.entries
            .get(position)
            .map_or(self.tail(), |entry| entry.start)
    }

    fn place(&mut self, level: Level, target: f64, note: &str) {
        let mut position = self.entries.len();
        while position > 0 && self.time_at(position) > target {
            if matches!(self.entries[position - 1].kind, EntryKind::Sequence) {
                break;
            }
            position -= 1;
        }

        let reached = self.time_at(position);
        if reached > target + 1e-9 {
            log::warn!(
                "Could only place level {} {:.3}s later than requested",
                level,
                reached - target
            );
            self.report.degraded += 1;
        } else if let Some((start, end)) = self.entries.get(position).map(|e| (e.start, e.end)) {
            if start < target && end - start > 2.0 * self.lead() {
                if self.split_at(position, target) {
                    position += 1;
                } else {
                    log::warn!(
                        "Level {} placed {:.3}s early before a long move",
                        level,
                        target - start
                    );
                    self.report.degraded += 1;
                }
            }
        }
        self.insert_sequence(position, level, note);
    }

    /// Place at the earliest position not before `not_before`.
    fn place_from(&mut self, level: Level, not_before: f64, note: &str) {
        let mut position = self.entries.len();
        while position > 0 {
            let previous = &self.entries[position - 1];
            if matches!(previous.kind, EntryKind::Sequence) || previous.start < not_before {
                break;
            }
            position -= 1;
        }
        self.insert_sequence(position, level, note);
    }

    fn insert_sequence(&mut self, position: usize, level: Level, note: &str) {
        let at = self.time_at(position);
        self.entries.insert(
            position,
            Entry {
                lines: self.t.emitter.render(level, note),
                kind: EntryKind::Sequence,
                start: at,
                end: at,
            },
        );
        self.last_level = Some(level);
        self.last_sequence_at = Some(at);
        self.report.sequences += 1;
    }

    /// Split the move at `position` so a sequence can go exactly at `target`.
    fn split_at(&mut self, position: usize, target: f64) -> bool {
        if !self.t.config.split_moves {
            return false;
        }
        let entry = &self.entries[position];
        let EntryKind::Move(Some(geometry)) = &entry.kind else {
            return false;
        };
        let (start, end) = (entry.start, entry.end);
        let frac = (target - start) / (end - start);
        let g = geometry.clone();

        let mid = [
            g.from[0] + (g.to[0] - g.from[0]) * frac,
            g.from[1] + (g.to[1] - g.from[1]) * frac,
        ];
        let mut first = format!("G1 X{:.3} Y{:.3}", mid[0], mid[1]);
        let mut second = format!("G1 X{:.3} Y{:.3}", g.to[0], g.to[1]);
        if let Some(e) = g.e {
            let e1 = e * frac;
            first.push_str(&format!(" E{:.5}", e1));
            second.push_str(&format!(" E{:.5}", e - e1));
        }
        if let Some(f) = g.f {
            first.push_str(&format!(" F{}", f));
        }
        if let Some(comment) = &g.comment {
            second.push(' ');
            second.push_str(comment);
        }

        self.entries[position] = Entry {
            lines: vec![first],
            kind: EntryKind::Move(None),
            start,
            end: target,
        };
        self.entries.insert(
            position + 1,
            Entry {
                lines: vec![second],
                kind: EntryKind::Move(None),
                start: target,
                end,
            },
        );
        self.report.split_moves += 1;
        true
    }

    fn write_front(&mut self) -> Result<()> {
        if let Some(entry) = self.entries.pop_front() {
            for line in &entry.lines {
                writeln!(self.out, "{}", line)?;
            }
        }
        Ok(())
    }

    /// Write out lines that can no longer take a sequence.
    fn flush_old(&mut self) -> Result<()> {
        let horizon = 2.0 * self.lead() + self.playback();
        let cutoff = self.tail() - horizon;
        while self.entries.len() > 1
            && (self.entries[1].start <= cutoff
                || self.entries.len() > self.t.config.history_lines)
        {
            self.write_front()?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<TransformReport> {
        if let Some(pending) = self.deferred.take() {
            let now = self.tail();
            self.place(pending.level, now, &pending.note);
        }
        if self.last_level.is_some_and(|l| !l.is_off()) {
            let now = self.tail();
            self.place(Level::OFF, now, " (end of print)");
        }
        while !self.entries.is_empty() {
            self.write_front()?;
        }
        for line in &self.lines[self.end..] {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Sequence};
    use crate::config::Config;
    use crate::gcode::parser::MoveArgs;

    fn move_args(line: &str) -> MoveArgs {
        match parser::parse_line(line) {
            Command::Move(args) => args,
            other => panic!("not a move: {:?}", other),
        }
    }

    const END: &str = ";END";

    fn config() -> PostprocessConfig {
        let mut c = Config::new().unwrap().postprocess;
        c.end_marker = END.to_string();
        c.body_marker = ";@body".to_string();
        c.lead_time = 1.0;
        c.ramp_up_zmax = 10.0;
        c.ramp_up_scale0 = 0.1;
        c.feed_factor = 60.0;
        c.split_moves = false;
        c
    }

    fn run(config: PostprocessConfig, input: &str) -> (Vec<String>, TransformReport) {
        let transformer = Transformer::new(config).unwrap();
        let mut out = Vec::new();
        let report = transformer.transform(input.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        (text.lines().map(str::to_string).collect(), report)
    }

    /// Decoded levels of every sequence, in output order.
    fn sequences(lines: &[String], freqs: [u32; 4]) -> Vec<u8> {
        let beeps: Vec<u8> = lines
            .iter()
            .filter_map(|l| {
                let f: u32 = l.strip_prefix("M300 S")?.split(' ').next()?.parse().ok()?;
                freqs.iter().position(|x| *x == f).map(|i| i as u8)
            })
            .collect();
        beeps
            .chunks(3)
            .map(|d| codec::decode(&Sequence::from_digits([d[0], d[1], d[2]]).unwrap()).value())
            .collect()
    }

    /// Estimated time at which each line of the output starts.
    fn line_times(lines: &[String]) -> Vec<f64> {
        let mut cursor = TimingCursor::new(CursorSettings {
            feed_factor: 60.0,
            feed_limit_z: 1100.0,
            z_correction_threshold: 0.0,
            z_correction_factor: 1.0,
        });
        lines
            .iter()
            .map(|l| {
                let t = cursor.elapsed();
                if let Command::Move(args) = parser::parse_line(l) {
                    cursor.advance(&args);
                }
                t
            })
            .collect()
    }

    fn header_index(lines: &[String]) -> usize {
        lines
            .iter()
            .position(|l| l.contains("-> sequence"))
            .expect("no sequence in output")
    }

    #[test]
    fn missing_end_marker_writes_nothing() {
        let transformer = Transformer::new(config()).unwrap();
        let mut out = Vec::new();
        let err = transformer
            .transform("G1 X1 F600\nM106 S255\n".as_bytes(), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::EndMarkerNotFound(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn long_move_without_splitting_inserts_before_it() {
        let input = "G1 Z20 F600\nG1 X0 Y0 F600\nG1 X100 E5\nM106 S255\nG1 X110 E1\n;END\nM84\n";
        let (lines, report) = run(config(), input);

        let header = header_index(&lines);
        assert_eq!(lines[header + 7], "G1 X100 E5");
        assert_eq!(report.degraded, 1);
        assert_eq!(report.split_moves, 0);
        assert_eq!(lines.last().unwrap(), "M84");
        assert!(!lines.iter().any(|l| l.starts_with("M106")));
    }

    #[test]
    fn split_move_gives_exact_lead_time() {
        let mut c = config();
        c.split_moves = true;
        let input = "G1 Z20 F600\nG1 X0 Y0 F600\nG1 X100 E5 ; infill\nM106 S255\nG1 X110 E1\n;END\n";
        let (lines, report) = run(c, input);

        assert_eq!(report.split_moves, 1);
        assert_eq!(report.degraded, 0);
        let times = line_times(&lines);
        let header = header_index(&lines);
        let command_time = 2.0 + 10.0;
        assert!((times[header] - (command_time - 1.0)).abs() < 0.0232);

        let first = move_args(&lines[header - 1]);
        let second = move_args(&lines[header + 7]);
        assert!((first.x.unwrap() - 90.0).abs() < 1e-6);
        assert!((first.e.unwrap() + second.e.unwrap() - 5.0).abs() < 1e-4);
        assert!(lines[header + 7].ends_with("; infill"));
    }

    #[test]
    fn burst_ends_on_the_last_request() {
        let input = "\
G1 Z20 F600
G1 X0 Y0 F600
G1 X5 E0.2
G1 X10 E0.2
G1 X15 E0.2
G1 X20 E0.2
M106 S255
G1 X20.5 E0.1
G1 X21 E0.1
G1 X21.5 E0.1
M106 S50
G1 X22 E0.1
G1 X22.5 E0.1
G1 X23 E0.1
M106 S200
G1 X23.5 E0.1
G1 X24 E0.1
G1 X24.5 E0.1
M106 S100
G1 X25 E0.1
G1 X25.5 E0.1
G1 X26 E0.1
G1 X50 E2
;END
";
        let (lines, report) = run(config(), input);
        let freqs = config().signal_freqs;
        let levels = sequences(&lines, freqs);
        assert_eq!(levels, vec![255 >> 2, 50 >> 2, 200 >> 2, 100 >> 2, 0]);
        // The final off is the automatic end-of-print one
        assert_eq!(report.deferred, 2);
        assert_eq!(report.superseded, 0);
        assert!(lines.iter().any(|l| l.contains("(end of print)")));
    }

    #[test]
    fn repeats_emit_nothing() {
        let input = "G1 Z20 F600\nG1 X0 Y0\nG1 X50 E2\nM106 S255\nG1 X100 E2\nG1 X150 E2\nG1 X200 E2\nM106 S254\nG1 X250 E2\nG1 X300 E2\nG1 X350 E2\nM107\n;END\n";
        let (lines, report) = run(config(), input);
        assert_eq!(report.repeats_skipped, 1);
        assert_eq!(sequences(&lines, config().signal_freqs), vec![63, 0]);
    }

    #[test]
    fn trailing_off_keeps_its_position() {
        let input = "G1 Z20 F600\nG1 X0 Y0\nG1 X10 E1\nG1 X20 E1\nM106 S255\nG1 X30 E1\nG1 X40 E1\nG1 X50 E1\nG1 X60 E1\nM107\nG1 E-1\nG1 Z25\n;END\n";
        let (lines, report) = run(config(), input);
        let off = lines
            .iter()
            .position(|l| l.contains("fan off"))
            .unwrap();
        assert_eq!(lines[off - 1], "G1 X60 E1");
        assert_eq!(report.degraded, 0);
        assert!(!lines.iter().any(|l| l.contains("(end of print)")));
    }

    #[test]
    fn start_section_fan_commands_become_one_off_sequence() {
        let input = "M107\nG28\nM106 S0\n;@body\nG1 Z0.3 F600\nG1 X10 E1\n;END\n";
        let (lines, report) = run(config(), input);
        assert!(lines[0].contains("fan off"));
        assert_eq!(lines[7], "G28");
        assert_eq!(lines[8], ";@body");
        assert_eq!(report.fan_commands, 0);
        assert_eq!(report.sequences, 0);
        assert_eq!(sequences(&lines, config().signal_freqs), vec![0]);
    }

    #[test]
    fn body_marker_must_be_a_whole_comment_word() {
        let input = "M106 S0\nG1 X1 ;@bodyguard\nM107\n;  @body\nG1 Z0.3 F600\n;END\n";
        let (lines, report) = run(config(), input);
        assert_eq!(report.fan_commands, 0);
        assert!(lines.contains(&"G1 X1 ;@bodyguard".to_string()));
        assert_eq!(sequences(&lines, config().signal_freqs), vec![0]);
    }

    #[test]
    fn ramp_up_uses_the_upcoming_layer() {
        let input = "G1 Z0.3 F600\nG1 X0 Y0\nG1 X50 E2\nM106 S255\nG1 Z5 F600\nG1 X100 E2\nG1 X150 E2\n;END\n";
        let (lines, _) = run(config(), input);
        let levels = sequences(&lines, config().signal_freqs);
        // scale at Z=5 is 0.55
        assert_eq!(levels[0], (255.0 * 0.55) as u8 >> 2);
    }

    #[test]
    fn layer_changes_below_zmax_raise_the_level() {
        let input = "G1 Z1 F600\nG1 X0 Y0\nM106 S255\nG1 X50 E2\nG1 X0 E2\nG1 X50 E2\nG1 Z5\nG1 X100 E2\nG1 X0 E2\nG1 X100 E2\nG1 Z10\nG1 X0 E2\nG1 X100 E2\nG1 X0 E2\n;END\n";
        let (lines, report) = run(config(), input);
        let levels = sequences(&lines, config().signal_freqs);
        assert_eq!(report.layer_updates, 2);
        assert_eq!(levels, vec![12, 35, 63, 0]);
    }

    #[test]
    fn z_hop_is_not_a_layer_change() {
        let input = "G1 Z1 F600\nG1 X0 Y0\nM106 S255\nG1 X50 E2\nG1 Z1.4\nG1 X80\nG1 Z1\nG1 X100 E2\n;END\n";
        let (_, report) = run(config(), input);
        assert_eq!(report.layer_updates, 0);
    }

    #[test]
    fn legacy_fan_commands_are_counted() {
        let input = "G1 X0 Y0 F600\nM126\nG1 X10 E1\nM127\n;END\n";
        let (lines, report) = run(config(), input);
        assert_eq!(report.legacy_fan_commands, 2);
        assert!(lines.contains(&"M126".to_string()));
    }
}
