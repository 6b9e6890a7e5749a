use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    detector: Detector,
    relay: Relay,
    fan: Fan,
    postprocess: Postprocess,
}

#[derive(Deserialize)]
struct Detector {
    capture_device: String,
    sample_rate: u32,
    chunk_size: usize,
    signal_bins: Vec<usize>,
    signal_scales: Vec<f32>,
    sensitivity: f32,
    harmonic_factor: f32,
    min_tone_ms: u32,
    max_tone_ms: u32,
    min_gap_ms: u32,
    max_gap_ms: u32,
    leading_silence_ms: u32,
    trailing_silence_ms: u32,
    perf_window_secs: u64,
    perf_min_rate_ratio: f64,
    perf_shortfall_windows: u32,
}

#[derive(Deserialize)]
struct Relay {
    mode: String,
    ip: String,
    port: u16,
    timeout_secs: u64,
    attempts: u32,
}

#[derive(Deserialize)]
struct Fan {
    listen_addr: String,
    pwm_chip: u32,
    pwm_channel: u32,
    pwm_frequency: f64,
    min_duty: f64,
    kick_launch: f64,
    kick_factor: f64,
    burst_power: f64,
    settle_ms: u64,
    tick_ms: u64,
}

#[derive(Deserialize)]
struct Postprocess {
    ramp_up_zmax: f64,
    ramp_up_scale0: f64,
    lead_time: f64,
    feed_factor: f64,
    feed_limit_z: f64,
    z_correction_threshold: f64,
    z_correction_factor: f64,
    end_marker: String,
    body_marker: String,
    signal_freqs: Vec<u32>,
    beep_ms: u32,
    gap_ms: u32,
    pad_ms: u32,
    split_moves: bool,
    history_lines: usize,
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn emit(key: &str, value: impl std::fmt::Display) {
    println!("cargo:rustc-env={}={}", key, value);
}

// Read config.toml at compile time and expose every key as an env var
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    let d = &config.detector;
    if d.signal_bins.len() != 4 || d.signal_scales.len() != 4 {
        panic!("detector.signal_bins and detector.signal_scales need exactly 4 entries");
    }
    emit("DETECTOR_CAPTURE_DEVICE", &d.capture_device);
    emit("DETECTOR_SAMPLE_RATE", d.sample_rate);
    emit("DETECTOR_CHUNK_SIZE", d.chunk_size);
    emit("DETECTOR_SIGNAL_BINS", join(&d.signal_bins));
    emit("DETECTOR_SIGNAL_SCALES", join(&d.signal_scales));
    emit("DETECTOR_SENSITIVITY", d.sensitivity);
    emit("DETECTOR_HARMONIC_FACTOR", d.harmonic_factor);
    emit("DETECTOR_MIN_TONE_MS", d.min_tone_ms);
    emit("DETECTOR_MAX_TONE_MS", d.max_tone_ms);
    emit("DETECTOR_MIN_GAP_MS", d.min_gap_ms);
    emit("DETECTOR_MAX_GAP_MS", d.max_gap_ms);
    emit("DETECTOR_LEADING_SILENCE_MS", d.leading_silence_ms);
    emit("DETECTOR_TRAILING_SILENCE_MS", d.trailing_silence_ms);
    emit("DETECTOR_PERF_WINDOW_SECS", d.perf_window_secs);
    emit("DETECTOR_PERF_MIN_RATE_RATIO", d.perf_min_rate_ratio);
    emit("DETECTOR_PERF_SHORTFALL_WINDOWS", d.perf_shortfall_windows);

    let r = &config.relay;
    emit("RELAY_MODE", &r.mode);
    emit("RELAY_IP", &r.ip);
    emit("RELAY_PORT", r.port);
    emit("RELAY_TIMEOUT_SECS", r.timeout_secs);
    emit("RELAY_ATTEMPTS", r.attempts);

    let f = &config.fan;
    emit("FAN_LISTEN_ADDR", &f.listen_addr);
    emit("FAN_PWM_CHIP", f.pwm_chip);
    emit("FAN_PWM_CHANNEL", f.pwm_channel);
    emit("FAN_PWM_FREQUENCY", f.pwm_frequency);
    emit("FAN_MIN_DUTY", f.min_duty);
    emit("FAN_KICK_LAUNCH", f.kick_launch);
    emit("FAN_KICK_FACTOR", f.kick_factor);
    emit("FAN_BURST_POWER", f.burst_power);
    emit("FAN_SETTLE_MS", f.settle_ms);
    emit("FAN_TICK_MS", f.tick_ms);

    let p = &config.postprocess;
    if p.signal_freqs.len() != 4 {
        panic!("postprocess.signal_freqs needs exactly 4 entries");
    }
    emit("POSTPROCESS_RAMP_UP_ZMAX", p.ramp_up_zmax);
    emit("POSTPROCESS_RAMP_UP_SCALE0", p.ramp_up_scale0);
    emit("POSTPROCESS_LEAD_TIME", p.lead_time);
    emit("POSTPROCESS_FEED_FACTOR", p.feed_factor);
    emit("POSTPROCESS_FEED_LIMIT_Z", p.feed_limit_z);
    emit("POSTPROCESS_Z_CORRECTION_THRESHOLD", p.z_correction_threshold);
    emit("POSTPROCESS_Z_CORRECTION_FACTOR", p.z_correction_factor);
    emit("POSTPROCESS_END_MARKER", &p.end_marker);
    emit("POSTPROCESS_BODY_MARKER", &p.body_marker);
    emit("POSTPROCESS_SIGNAL_FREQS", join(&p.signal_freqs));
    emit("POSTPROCESS_BEEP_MS", p.beep_ms);
    emit("POSTPROCESS_GAP_MS", p.gap_ms);
    emit("POSTPROCESS_PAD_MS", p.pad_ms);
    emit("POSTPROCESS_SPLIT_MOVES", p.split_moves);
    emit("POSTPROCESS_HISTORY_LINES", p.history_lines);
}
