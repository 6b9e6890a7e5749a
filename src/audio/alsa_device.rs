//! ALSA capture device wrapper.

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a mono S16LE capture PCM at exactly `sample_rate`.
///
/// The detector's bin frequencies depend on the rate, so a device that negotiates a
/// different one is refused. Use a `plug` device to get rate conversion.
pub fn open_capture(device: &str, sample_rate: u32, period_size: usize) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Capture, false)
        .with_context(|| format!("Failed to open PCM device '{}' for capture", device))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(1)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        hwp.set_period_size_near(period_size as alsa::pcm::Frames, ValueOr::Nearest)?;
        // Room for a few chunks so a slow FFT does not overrun straight away
        hwp.set_buffer_size_near((4 * period_size) as alsa::pcm::Frames)?;
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_period) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_period_size()? as usize)
    };
    if actual_rate != sample_rate {
        anyhow::bail!(
            "Capture device '{}' runs at {} Hz instead of {} Hz, use a plug device",
            device,
            actual_rate,
            sample_rate
        );
    }

    log::info!(
        "ALSA Capture: device={}, rate={}, period_size={}",
        device,
        actual_rate,
        actual_period,
    );

    Ok((
        pcm,
        AlsaParams {
            sample_rate: actual_rate,
            period_size: actual_period,
        },
    ))
}

/// PCM names usable for capture, with their descriptions.
pub fn capture_devices() -> Result<Vec<(String, String)>> {
    let hints = HintIter::new_str(None, "pcm").context("Failed to list ALSA PCM devices")?;
    Ok(hints
        .filter(|hint| hint.direction.is_none_or(|d| d == Direction::Capture))
        .filter_map(|hint| {
            let name = hint.name?;
            let desc = hint.desc.unwrap_or_default().replace('\n', " ");
            Some((name, desc))
        })
        .collect())
}
