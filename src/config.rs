use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Runtime defaults file, same layout as config.toml with every key optional.
pub const DEFAULTS_PATH: &str = "/etc/default/mightyvariablefan.toml";

#[derive(Debug, Clone)]
pub struct Config {
    pub detector: DetectorConfig,
    pub relay: RelayConfig,
    pub fan: FanConfig,
    pub postprocess: PostprocessConfig,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// ALSA capture PCM, should be a rate-converting (plug) device
    pub capture_device: String,
    pub sample_rate: u32,
    /// Samples per FFT chunk
    pub chunk_size: usize,
    /// FFT bin of each signal tone
    pub signal_bins: [usize; 4],
    /// Per-bin gain applied before thresholding
    pub signal_scales: [f32; 4],
    pub sensitivity: f32,
    pub harmonic_factor: f32,
    pub min_tone_ms: u32,
    pub max_tone_ms: u32,
    pub min_gap_ms: u32,
    pub max_gap_ms: u32,
    pub leading_silence_ms: u32,
    pub trailing_silence_ms: u32,
    pub perf_window_secs: u64,
    pub perf_min_rate_ratio: f64,
    pub perf_shortfall_windows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    Udp,
    Http,
    None,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(RelayMode::Udp),
            "http" => Ok(RelayMode::Http),
            "none" | "" => Ok(RelayMode::None),
            other => Err(format!("unknown relay mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub ip: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct FanConfig {
    pub listen_addr: String,
    pub pwm_chip: u32,
    pub pwm_channel: u32,
    pub pwm_frequency: f64,
    /// Lowest duty (%) at which the fan does not stall
    pub min_duty: f64,
    /// Burst length (s) when starting from standstill
    pub kick_launch: f64,
    /// Extra burst seconds per % of duty difference
    pub kick_factor: f64,
    pub burst_power: f64,
    pub settle_ms: u64,
    pub tick_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    pub ramp_up_zmax: f64,
    pub ramp_up_scale0: f64,
    /// Seconds by which sequences are moved ahead of their fan command
    pub lead_time: f64,
    /// Feedrate units per mm/s
    pub feed_factor: f64,
    /// Highest feedrate the firmware allows on Z
    pub feed_limit_z: f64,
    pub z_correction_threshold: f64,
    pub z_correction_factor: f64,
    pub end_marker: String,
    /// Empty disables start section handling
    pub body_marker: String,
    pub signal_freqs: [u32; 4],
    pub beep_ms: u32,
    pub gap_ms: u32,
    pub pad_ms: u32,
    pub split_moves: bool,
    pub history_lines: usize,
}

fn parse<T: FromStr>(value: &str, key: &'static str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("Failed to parse {}", key))
}

fn parse_list<T: FromStr + Copy + Default, const N: usize>(
    value: &str,
    key: &'static str,
) -> Result<[T; N], String> {
    let items: Vec<T> = value
        .split(',')
        .map(|s| parse(s, key))
        .collect::<Result<_, _>>()?;
    if items.len() != N {
        return Err(format!("{} needs exactly {} entries", key, N));
    }
    let mut out = [T::default(); N];
    out.copy_from_slice(&items);
    Ok(out)
}

impl Config {
    /// Build the compiled-in configuration from the env vars exported by build.rs.
    pub fn new() -> Result<Self, String> {
        Ok(Self {
            detector: DetectorConfig {
                capture_device: env!("DETECTOR_CAPTURE_DEVICE").to_string(),
                sample_rate: parse(env!("DETECTOR_SAMPLE_RATE"), "DETECTOR_SAMPLE_RATE")?,
                chunk_size: parse(env!("DETECTOR_CHUNK_SIZE"), "DETECTOR_CHUNK_SIZE")?,
                signal_bins: parse_list(env!("DETECTOR_SIGNAL_BINS"), "DETECTOR_SIGNAL_BINS")?,
                signal_scales: parse_list(
                    env!("DETECTOR_SIGNAL_SCALES"),
                    "DETECTOR_SIGNAL_SCALES",
                )?,
                sensitivity: parse(env!("DETECTOR_SENSITIVITY"), "DETECTOR_SENSITIVITY")?,
                harmonic_factor: parse(
                    env!("DETECTOR_HARMONIC_FACTOR"),
                    "DETECTOR_HARMONIC_FACTOR",
                )?,
                min_tone_ms: parse(env!("DETECTOR_MIN_TONE_MS"), "DETECTOR_MIN_TONE_MS")?,
                max_tone_ms: parse(env!("DETECTOR_MAX_TONE_MS"), "DETECTOR_MAX_TONE_MS")?,
                min_gap_ms: parse(env!("DETECTOR_MIN_GAP_MS"), "DETECTOR_MIN_GAP_MS")?,
                max_gap_ms: parse(env!("DETECTOR_MAX_GAP_MS"), "DETECTOR_MAX_GAP_MS")?,
                leading_silence_ms: parse(
                    env!("DETECTOR_LEADING_SILENCE_MS"),
                    "DETECTOR_LEADING_SILENCE_MS",
                )?,
                trailing_silence_ms: parse(
                    env!("DETECTOR_TRAILING_SILENCE_MS"),
                    "DETECTOR_TRAILING_SILENCE_MS",
                )?,
                perf_window_secs: parse(
                    env!("DETECTOR_PERF_WINDOW_SECS"),
                    "DETECTOR_PERF_WINDOW_SECS",
                )?,
                perf_min_rate_ratio: parse(
                    env!("DETECTOR_PERF_MIN_RATE_RATIO"),
                    "DETECTOR_PERF_MIN_RATE_RATIO",
                )?,
                perf_shortfall_windows: parse(
                    env!("DETECTOR_PERF_SHORTFALL_WINDOWS"),
                    "DETECTOR_PERF_SHORTFALL_WINDOWS",
                )?,
            },
            relay: RelayConfig {
                mode: env!("RELAY_MODE").parse()?,
                ip: env!("RELAY_IP").to_string(),
                port: parse(env!("RELAY_PORT"), "RELAY_PORT")?,
                timeout_secs: parse(env!("RELAY_TIMEOUT_SECS"), "RELAY_TIMEOUT_SECS")?,
                attempts: parse(env!("RELAY_ATTEMPTS"), "RELAY_ATTEMPTS")?,
            },
            fan: FanConfig {
                listen_addr: env!("FAN_LISTEN_ADDR").to_string(),
                pwm_chip: parse(env!("FAN_PWM_CHIP"), "FAN_PWM_CHIP")?,
                pwm_channel: parse(env!("FAN_PWM_CHANNEL"), "FAN_PWM_CHANNEL")?,
                pwm_frequency: parse(env!("FAN_PWM_FREQUENCY"), "FAN_PWM_FREQUENCY")?,
                min_duty: parse(env!("FAN_MIN_DUTY"), "FAN_MIN_DUTY")?,
                kick_launch: parse(env!("FAN_KICK_LAUNCH"), "FAN_KICK_LAUNCH")?,
                kick_factor: parse(env!("FAN_KICK_FACTOR"), "FAN_KICK_FACTOR")?,
                burst_power: parse(env!("FAN_BURST_POWER"), "FAN_BURST_POWER")?,
                settle_ms: parse(env!("FAN_SETTLE_MS"), "FAN_SETTLE_MS")?,
                tick_ms: parse(env!("FAN_TICK_MS"), "FAN_TICK_MS")?,
            },
            postprocess: PostprocessConfig {
                ramp_up_zmax: parse(env!("POSTPROCESS_RAMP_UP_ZMAX"), "POSTPROCESS_RAMP_UP_ZMAX")?,
                ramp_up_scale0: parse(
                    env!("POSTPROCESS_RAMP_UP_SCALE0"),
                    "POSTPROCESS_RAMP_UP_SCALE0",
                )?,
                lead_time: parse(env!("POSTPROCESS_LEAD_TIME"), "POSTPROCESS_LEAD_TIME")?,
                feed_factor: parse(env!("POSTPROCESS_FEED_FACTOR"), "POSTPROCESS_FEED_FACTOR")?,
                feed_limit_z: parse(
                    env!("POSTPROCESS_FEED_LIMIT_Z"),
                    "POSTPROCESS_FEED_LIMIT_Z",
                )?,
                z_correction_threshold: parse(
                    env!("POSTPROCESS_Z_CORRECTION_THRESHOLD"),
                    "POSTPROCESS_Z_CORRECTION_THRESHOLD",
                )?,
                z_correction_factor: parse(
                    env!("POSTPROCESS_Z_CORRECTION_FACTOR"),
                    "POSTPROCESS_Z_CORRECTION_FACTOR",
                )?,
                end_marker: env!("POSTPROCESS_END_MARKER").to_string(),
                body_marker: env!("POSTPROCESS_BODY_MARKER").to_string(),
                signal_freqs: parse_list(
                    env!("POSTPROCESS_SIGNAL_FREQS"),
                    "POSTPROCESS_SIGNAL_FREQS",
                )?,
                beep_ms: parse(env!("POSTPROCESS_BEEP_MS"), "POSTPROCESS_BEEP_MS")?,
                gap_ms: parse(env!("POSTPROCESS_GAP_MS"), "POSTPROCESS_GAP_MS")?,
                pad_ms: parse(env!("POSTPROCESS_PAD_MS"), "POSTPROCESS_PAD_MS")?,
                split_moves: parse(env!("POSTPROCESS_SPLIT_MOVES"), "POSTPROCESS_SPLIT_MOVES")?,
                history_lines: parse(
                    env!("POSTPROCESS_HISTORY_LINES"),
                    "POSTPROCESS_HISTORY_LINES",
                )?,
            },
        })
    }

    /// Compiled-in defaults, overridden by the runtime file if it exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::new().map_err(anyhow::Error::msg)?;
        let path = path.unwrap_or_else(|| Path::new(DEFAULTS_PATH));
        if path.is_file() {
            let text = std::fs::read_to_string(path)?;
            let overrides: ConfigOverrides = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            config.apply(overrides).map_err(anyhow::Error::msg)?;
            log::info!("Loaded configuration overrides from {}", path.display());
        }
        Ok(config)
    }

    /// Overlay a partial configuration onto this one.
    pub fn apply(&mut self, overrides: ConfigOverrides) -> Result<(), String> {
        if let Some(d) = overrides.detector {
            let c = &mut self.detector;
            set(&mut c.capture_device, d.capture_device);
            set(&mut c.sample_rate, d.sample_rate);
            set(&mut c.chunk_size, d.chunk_size);
            if let Some(bins) = d.signal_bins {
                c.signal_bins = bins
                    .try_into()
                    .map_err(|_| "detector.signal_bins needs exactly 4 entries".to_string())?;
            }
            if let Some(scales) = d.signal_scales {
                c.signal_scales = scales
                    .try_into()
                    .map_err(|_| "detector.signal_scales needs exactly 4 entries".to_string())?;
            }
            set(&mut c.sensitivity, d.sensitivity);
            set(&mut c.harmonic_factor, d.harmonic_factor);
            set(&mut c.min_tone_ms, d.min_tone_ms);
            set(&mut c.max_tone_ms, d.max_tone_ms);
            set(&mut c.min_gap_ms, d.min_gap_ms);
            set(&mut c.max_gap_ms, d.max_gap_ms);
            set(&mut c.leading_silence_ms, d.leading_silence_ms);
            set(&mut c.trailing_silence_ms, d.trailing_silence_ms);
            set(&mut c.perf_window_secs, d.perf_window_secs);
            set(&mut c.perf_min_rate_ratio, d.perf_min_rate_ratio);
            set(&mut c.perf_shortfall_windows, d.perf_shortfall_windows);
        }
        if let Some(r) = overrides.relay {
            let c = &mut self.relay;
            if let Some(mode) = r.mode {
                c.mode = mode.parse()?;
            }
            set(&mut c.ip, r.ip);
            set(&mut c.port, r.port);
            set(&mut c.timeout_secs, r.timeout_secs);
            set(&mut c.attempts, r.attempts);
        }
        if let Some(f) = overrides.fan {
            let c = &mut self.fan;
            set(&mut c.listen_addr, f.listen_addr);
            set(&mut c.pwm_chip, f.pwm_chip);
            set(&mut c.pwm_channel, f.pwm_channel);
            set(&mut c.pwm_frequency, f.pwm_frequency);
            set(&mut c.min_duty, f.min_duty);
            set(&mut c.kick_launch, f.kick_launch);
            set(&mut c.kick_factor, f.kick_factor);
            set(&mut c.burst_power, f.burst_power);
            set(&mut c.settle_ms, f.settle_ms);
            set(&mut c.tick_ms, f.tick_ms);
        }
        if let Some(p) = overrides.postprocess {
            let c = &mut self.postprocess;
            set(&mut c.ramp_up_zmax, p.ramp_up_zmax);
            set(&mut c.ramp_up_scale0, p.ramp_up_scale0);
            set(&mut c.lead_time, p.lead_time);
            set(&mut c.feed_factor, p.feed_factor);
            set(&mut c.feed_limit_z, p.feed_limit_z);
            set(&mut c.z_correction_threshold, p.z_correction_threshold);
            set(&mut c.z_correction_factor, p.z_correction_factor);
            set(&mut c.end_marker, p.end_marker);
            set(&mut c.body_marker, p.body_marker);
            if let Some(freqs) = p.signal_freqs {
                c.signal_freqs = freqs
                    .try_into()
                    .map_err(|_| "postprocess.signal_freqs needs exactly 4 entries".to_string())?;
            }
            set(&mut c.beep_ms, p.beep_ms);
            set(&mut c.gap_ms, p.gap_ms);
            set(&mut c.pad_ms, p.pad_ms);
            set(&mut c.split_moves, p.split_moves);
            set(&mut c.history_lines, p.history_lines);
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigOverrides {
    pub detector: Option<DetectorOverrides>,
    pub relay: Option<RelayOverrides>,
    pub fan: Option<FanOverrides>,
    pub postprocess: Option<PostprocessOverrides>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetectorOverrides {
    pub capture_device: Option<String>,
    pub sample_rate: Option<u32>,
    pub chunk_size: Option<usize>,
    pub signal_bins: Option<Vec<usize>>,
    pub signal_scales: Option<Vec<f32>>,
    pub sensitivity: Option<f32>,
    pub harmonic_factor: Option<f32>,
    pub min_tone_ms: Option<u32>,
    pub max_tone_ms: Option<u32>,
    pub min_gap_ms: Option<u32>,
    pub max_gap_ms: Option<u32>,
    pub leading_silence_ms: Option<u32>,
    pub trailing_silence_ms: Option<u32>,
    pub perf_window_secs: Option<u64>,
    pub perf_min_rate_ratio: Option<f64>,
    pub perf_shortfall_windows: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayOverrides {
    pub mode: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<u64>,
    pub attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FanOverrides {
    pub listen_addr: Option<String>,
    pub pwm_chip: Option<u32>,
    pub pwm_channel: Option<u32>,
    pub pwm_frequency: Option<f64>,
    pub min_duty: Option<f64>,
    pub kick_launch: Option<f64>,
    pub kick_factor: Option<f64>,
    pub burst_power: Option<f64>,
    pub settle_ms: Option<u64>,
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostprocessOverrides {
    pub ramp_up_zmax: Option<f64>,
    pub ramp_up_scale0: Option<f64>,
    pub lead_time: Option<f64>,
    pub feed_factor: Option<f64>,
    pub feed_limit_z: Option<f64>,
    pub z_correction_threshold: Option<f64>,
    pub z_correction_factor: Option<f64>,
    pub end_marker: Option<String>,
    pub body_marker: Option<String>,
    pub signal_freqs: Option<Vec<u32>>,
    pub beep_ms: Option<u32>,
    pub gap_ms: Option<u32>,
    pub pad_ms: Option<u32>,
    pub split_moves: Option<bool>,
    pub history_lines: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_defaults_parse() {
        let config = Config::new().unwrap();
        assert_eq!(config.detector.signal_bins.len(), 4);
        assert!(config.detector.sample_rate > 0);
        assert!(config.postprocess.lead_time >= 0.0);
        assert!(!config.postprocess.end_marker.is_empty());
    }

    #[test]
    fn runtime_overrides_replace_only_given_keys() {
        let mut config = Config::new().unwrap();
        let port = config.relay.port;
        let overrides: ConfigOverrides = toml::from_str(
            r#"
            [detector]
            sensitivity = 12.5
            signal_scales = [1.0, 1.5, 2.0, 2.5]

            [postprocess]
            lead_time = 2.0
            split_moves = true
            "#,
        )
        .unwrap();
        config.apply(overrides).unwrap();
        assert_eq!(config.detector.sensitivity, 12.5);
        assert_eq!(config.detector.signal_scales, [1.0, 1.5, 2.0, 2.5]);
        assert_eq!(config.postprocess.lead_time, 2.0);
        assert!(config.postprocess.split_moves);
        assert_eq!(config.relay.port, port);
    }

    #[test]
    fn wrong_list_length_is_rejected() {
        let mut config = Config::new().unwrap();
        let overrides: ConfigOverrides =
            toml::from_str("[detector]\nsignal_bins = [1, 2, 3]\n").unwrap();
        assert!(config.apply(overrides).is_err());
    }

    #[test]
    fn relay_mode_parsing() {
        assert_eq!("UDP".parse::<RelayMode>().unwrap(), RelayMode::Udp);
        assert_eq!("none".parse::<RelayMode>().unwrap(), RelayMode::None);
        assert!("serial".parse::<RelayMode>().is_err());
    }
}
