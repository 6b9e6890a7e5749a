use std::fs::{self, File};
use std::io::BufReader;

use mighty_fan_rs::codec::{self, Sequence};
use mighty_fan_rs::config::Config;
use mighty_fan_rs::gcode::Transformer;
use mighty_fan_rs::Error;
use tempfile::tempdir;

fn gcode(end_marker: &str) -> String {
    format!(
        "M107\nG28\n;@body\nG1 Z20 F600\nG1 X0 Y0\nG1 X50 E2\nM106 S255\nG1 X100 E2\nG1 X150 E2\nG1 X200 E2\nM107\nG1 X250 E2\nG1 X300 E2\nG1 X350 E2\n{}\nM84\n",
        end_marker
    )
}

fn decoded_levels(lines: &[&str], freqs: [u32; 4]) -> Vec<u8> {
    let digits: Vec<u8> = lines
        .iter()
        .filter_map(|l| {
            let f: u32 = l.strip_prefix("M300 S")?.split(' ').next()?.parse().ok()?;
            freqs.iter().position(|x| *x == f).map(|i| i as u8)
        })
        .collect();
    digits
        .chunks(3)
        .map(|d| codec::decode(&Sequence::from_digits([d[0], d[1], d[2]]).unwrap()).value())
        .collect()
}

#[test]
fn rewrites_a_gcode_file() {
    let config = Config::new().unwrap().postprocess;
    let freqs = config.signal_freqs;
    let dir = tempdir().unwrap();
    let input = dir.path().join("print.gcode");
    fs::write(&input, gcode(&config.end_marker)).unwrap();

    let transformer = Transformer::new(config.clone()).unwrap();
    let mut out = Vec::new();
    let report = transformer
        .transform(BufReader::new(File::open(&input).unwrap()), &mut out)
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(report.fan_commands, 2);
    assert_eq!(report.sequences, 2);
    assert!(!lines.iter().any(|l| l.starts_with("M106") || l.starts_with("M107")));
    // Start section off, then full power, then off again
    assert_eq!(decoded_levels(&lines, freqs), vec![0, 63, 0]);
    assert!(lines.contains(&config.end_marker.as_str()));
    assert_eq!(lines.last(), Some(&"M84"));
}

#[test]
fn missing_end_marker_is_an_error() {
    let config = Config::new().unwrap().postprocess;
    let transformer = Transformer::new(config).unwrap();
    let mut out = Vec::new();
    let err = transformer
        .transform(gcode(";some other finish").as_bytes(), &mut out)
        .unwrap_err();
    assert!(matches!(err, Error::EndMarkerNotFound(_)));
    assert!(out.is_empty());
}

#[test]
fn rejects_a_negative_lead_time() {
    let mut config = Config::new().unwrap().postprocess;
    config.lead_time = -1.0;
    assert!(matches!(Transformer::new(config), Err(Error::Config(_))));
}
