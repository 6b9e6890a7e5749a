//! Minimal line classifier for the G-code subset the transformer cares about.

/// Axis words of a `G0`/`G1` line. Word order does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveArgs {
    /// `G1` rather than `G0`
    pub linear: bool,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub f: Option<f64>,
}

impl MoveArgs {
    pub fn has_xy(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// Moves that push filament.
    pub fn is_extruding(&self) -> bool {
        self.e.is_some_and(|e| e > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Move(MoveArgs),
    /// `M106 S<n>`, `M106` (= 0) or `M107` (= 0)
    Fan(f64),
    /// `M126`/`M127`, on/off valve commands
    LegacyFan,
    Other,
}

/// Code part of a line, without the `;` comment.
pub fn code_part(line: &str) -> &str {
    match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// True when the line's comment is `marker` as a whole word, e.g. `; @body` for `;@body`.
pub fn is_comment_marker(line: &str, marker: &str) -> bool {
    let name = marker.trim_start_matches(';').trim();
    if name.is_empty() {
        return false;
    }
    let Some(i) = line.find(';') else {
        return false;
    };
    match line[i + 1..].trim_start().strip_prefix(name) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

fn word(token: &str) -> Option<(char, &str)> {
    let mut chars = token.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    Some((letter, chars.as_str()))
}

pub fn parse_line(line: &str) -> Command {
    let code = code_part(line).trim();
    let mut tokens = code.split_whitespace();
    let first = match tokens.next() {
        Some(t) => t.to_ascii_uppercase(),
        None => return Command::Other,
    };

    match first.as_str() {
        "M106" => {
            let speed = tokens
                .filter_map(word)
                .find(|(letter, _)| *letter == 'S')
                .and_then(|(_, value)| value.parse::<f64>().ok())
                .unwrap_or(0.0);
            return Command::Fan(speed);
        }
        "M107" => return Command::Fan(0.0),
        "M126" | "M127" => return Command::LegacyFan,
        _ => {}
    }

    let mut args = MoveArgs::default();
    let mut is_move = false;
    for (letter, value) in code.split_whitespace().filter_map(word) {
        match letter {
            'G' => match value.parse::<u32>() {
                Ok(0) => is_move = true,
                Ok(1) => {
                    is_move = true;
                    args.linear = true;
                }
                _ => return Command::Other,
            },
            'X' => args.x = value.parse().ok(),
            'Y' => args.y = value.parse().ok(),
            'Z' => args.z = value.parse().ok(),
            'E' => args.e = value.parse().ok(),
            'F' => args.f = value.parse().ok(),
            _ => {}
        }
    }

    if is_move {
        Command::Move(args)
    } else {
        Command::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_moves_in_any_word_order() {
        let Command::Move(m) = parse_line("Z1.2 F321 X0.5 G1 ; travel") else {
            panic!("expected a move");
        };
        assert!(m.linear);
        assert_eq!(m.x, Some(0.5));
        assert_eq!(m.y, None);
        assert_eq!(m.z, Some(1.2));
        assert_eq!(m.f, Some(321.0));
    }

    #[test]
    fn comment_marker_matches_whole_word() {
        assert!(is_comment_marker(";@body", ";@body"));
        assert!(is_comment_marker("; @body start of print", ";@body"));
        assert!(is_comment_marker("G90 ;@body", ";@body"));
        assert!(!is_comment_marker(";@bodyX", ";@body"));
        assert!(!is_comment_marker("@body", ";@body"));
        assert!(!is_comment_marker("; text @body", ";@body"));
    }

    #[test]
    fn fan_commands() {
        assert_eq!(parse_line("M106 S127.5"), Command::Fan(127.5));
        assert_eq!(parse_line("M106"), Command::Fan(0.0));
        assert_eq!(parse_line("M107 ; off"), Command::Fan(0.0));
        assert_eq!(parse_line("M127"), Command::LegacyFan);
        assert_eq!(parse_line("; M106 S255"), Command::Other);
    }

    #[test]
    fn other_g_codes_are_not_moves() {
        assert_eq!(parse_line("G28 X Y"), Command::Other);
        assert_eq!(parse_line("G92 E0"), Command::Other);
        assert!(matches!(parse_line("G0 X10"), Command::Move(m) if !m.linear));
    }

    #[test]
    fn retraction_is_not_extruding() {
        let Command::Move(m) = parse_line("G1 E-1.5 F2400") else {
            panic!("expected a move");
        };
        assert!(!m.is_extruding());
        assert!(!m.has_xy());
    }
}
