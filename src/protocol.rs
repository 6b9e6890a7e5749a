use serde::{Deserialize, Serialize};

use crate::codec::Level;
use crate::error::{Error, Result};

/// Datagrams accepted by the fan intake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IntakeMessage {
    /// Decoded level from the detector
    Level { level: u32, at_ms: Option<u64> },
    /// Manual duty (%) that replaces the automatic target
    Fixed { duty: f64 },
    Auto,
    Off,
    /// Multiply automatic targets by `factor`, or drop the scaling with `reset`
    Scale {
        factor: Option<f64>,
        #[serde(default)]
        reset: bool,
    },
    Status,
}

impl IntakeMessage {
    pub fn level(level: Level, at_ms: u64) -> Self {
        IntakeMessage::Level {
            level: u32::from(level.value()),
            at_ms: Some(at_ms),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::InvalidMessage(format!("{:?}: {}", text, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_message_wire_format() {
        let msg = IntakeMessage::level(Level::new(39).unwrap(), 1234);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"level","level":39,"at_ms":1234}"#);
        assert_eq!(IntakeMessage::parse(&json).unwrap(), msg);
    }

    #[test]
    fn parses_overrides() {
        assert_eq!(
            IntakeMessage::parse(r#"{"type":"fixed","duty":40}"#).unwrap(),
            IntakeMessage::Fixed { duty: 40.0 }
        );
        assert_eq!(
            IntakeMessage::parse(r#"{"type":"scale","reset":true}"#).unwrap(),
            IntakeMessage::Scale {
                factor: None,
                reset: true
            }
        );
        assert_eq!(
            IntakeMessage::parse(r#"{"type":"off"}"#).unwrap(),
            IntakeMessage::Off
        );
        assert!(IntakeMessage::parse(r#"{"type":"reboot"}"#).is_err());
    }
}
