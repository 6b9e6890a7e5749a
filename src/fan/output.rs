//! PWM outputs the controller can drive.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Root of the kernel PWM class.
pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

pub trait PwmOutput: Send {
    fn name(&self) -> &str;

    /// Duty in percent, 0.0..=100.0.
    fn set_duty(&mut self, percent: f64) -> Result<()>;
}

/// Hardware PWM through `/sys/class/pwm/pwmchipN/pwmM`.
pub struct SysfsPwm {
    name: String,
    channel_dir: PathBuf,
    period_ns: u64,
}

impl SysfsPwm {
    pub fn open(chip: u32, channel: u32, frequency: f64) -> Result<Self> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), chip, channel, frequency)
    }

    pub fn open_at(root: &Path, chip: u32, channel: u32, frequency: f64) -> Result<Self> {
        if frequency.is_nan() || frequency <= 0.0 {
            anyhow::bail!("PWM frequency must be positive, got {}", frequency);
        }
        let chip_dir = root.join(format!("pwmchip{}", chip));
        let channel_dir = chip_dir.join(format!("pwm{}", channel));

        if !channel_dir.exists() {
            let export = chip_dir.join("export");
            fs::write(&export, channel.to_string())
                .with_context(|| format!("Failed to export PWM channel via {}", export.display()))?;
        }

        let period_ns = (1e9 / frequency).round() as u64;
        let mut pwm = Self {
            name: format!("pwmchip{}/pwm{}", chip, channel),
            channel_dir,
            period_ns,
        };
        // duty_cycle must never exceed period, so clear it first
        pwm.write("duty_cycle", 0)?;
        pwm.write("period", period_ns)?;
        pwm.write("enable", 1)?;

        log::info!(
            "PWM {} enabled at {:.0} Hz (period {} ns)",
            pwm.name,
            frequency,
            period_ns
        );
        pwm.set_duty(0.0)?;
        Ok(pwm)
    }

    fn write(&mut self, attribute: &str, value: u64) -> Result<()> {
        let path = self.channel_dir.join(attribute);
        fs::write(&path, value.to_string())
            .with_context(|| format!("Failed to write {} to {}", value, path.display()))
    }
}

impl PwmOutput for SysfsPwm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_duty(&mut self, percent: f64) -> Result<()> {
        let fraction = percent.clamp(0.0, 100.0) / 100.0;
        let duty_ns = (self.period_ns as f64 * fraction).round() as u64;
        self.write("duty_cycle", duty_ns)
    }
}

/// Logs duty changes instead of driving hardware.
#[derive(Default)]
pub struct LogPwm {
    last: Option<f64>,
}

impl PwmOutput for LogPwm {
    fn name(&self) -> &str {
        "log"
    }

    fn set_duty(&mut self, percent: f64) -> Result<()> {
        if self.last.is_none_or(|last| (last - percent).abs() >= 0.05) {
            log::info!("PWM duty {:.1}%", percent);
        }
        self.last = Some(percent);
        Ok(())
    }
}
