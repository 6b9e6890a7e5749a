//! Kickstart state machine: burst a stalled fan, then ramp to the target.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::FanConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KickPhase {
    Idle,
    Bursting,
    Settling,
    Steady,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KickSettings {
    /// Lowest nonzero duty (%)
    pub min_duty: f64,
    /// Shortest burst (s)
    pub kick_launch: f64,
    /// Burst seconds per % of duty change
    pub kick_factor: f64,
    /// Duty (%) during the burst
    pub burst_power: f64,
    pub settle: Duration,
}

impl KickSettings {
    pub fn from_config(config: &FanConfig) -> Self {
        Self {
            min_duty: config.min_duty,
            kick_launch: config.kick_launch,
            kick_factor: config.kick_factor,
            burst_power: config.burst_power.clamp(0.0, 100.0),
            settle: Duration::from_millis(config.settle_ms),
        }
    }

    /// Clamp to 0..=100 and lift nonzero targets to the minimum duty.
    pub fn sanitize(&self, target: f64) -> f64 {
        if target.is_nan() || target <= 0.0 {
            0.0
        } else {
            target.max(self.min_duty).min(100.0)
        }
    }
}

pub struct KickstartFsm {
    settings: KickSettings,
    phase: KickPhase,
    duty: f64,
    target: f64,
    burst_until: Instant,
    settle_from: f64,
    settle_start: Instant,
}

impl KickstartFsm {
    pub fn new(settings: KickSettings, now: Instant) -> Self {
        Self {
            settings,
            phase: KickPhase::Idle,
            duty: 0.0,
            target: 0.0,
            burst_until: now,
            settle_from: 0.0,
            settle_start: now,
        }
    }

    pub fn settings(&self) -> &KickSettings {
        &self.settings
    }

    pub fn phase(&self) -> KickPhase {
        self.phase
    }

    pub fn duty(&self) -> f64 {
        self.duty
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Change the target duty (%). Returns the duty to write.
    pub fn set_target(&mut self, target: f64, now: Instant) -> f64 {
        let target = self.settings.sanitize(target);
        self.update(now);

        if target == 0.0 {
            if self.phase != KickPhase::Idle {
                log::debug!("Fan off");
            }
            self.phase = KickPhase::Idle;
            self.duty = 0.0;
            self.target = 0.0;
            return self.duty;
        }

        match self.phase {
            KickPhase::Idle => {
                let burst = self.settings.kick_launch.max(target * self.settings.kick_factor);
                log::debug!("Kickstart: {:.0}% for {:.2}s, then {:.1}%", self.settings.burst_power, burst, target);
                self.phase = KickPhase::Bursting;
                self.burst_until = now + Duration::from_secs_f64(burst.max(0.0));
                self.duty = self.settings.burst_power;
            }
            // The burst settles to whatever the latest target is
            KickPhase::Bursting => {}
            KickPhase::Steady if target == self.target => {}
            KickPhase::Settling | KickPhase::Steady => self.start_settling(now),
        }
        self.target = target;
        self.update(now)
    }

    fn start_settling(&mut self, now: Instant) {
        self.phase = KickPhase::Settling;
        self.settle_from = self.duty;
        self.settle_start = now;
    }

    /// Advance timers. Returns the duty to write.
    pub fn update(&mut self, now: Instant) -> f64 {
        if self.phase == KickPhase::Bursting && now >= self.burst_until {
            self.start_settling(self.burst_until);
        }
        if self.phase == KickPhase::Settling {
            let elapsed = now.saturating_duration_since(self.settle_start);
            if elapsed >= self.settings.settle {
                self.phase = KickPhase::Steady;
                self.duty = self.target;
            } else {
                let progress = elapsed.as_secs_f64() / self.settings.settle.as_secs_f64();
                self.duty = self.settle_from + (self.target - self.settle_from) * progress;
            }
        }
        self.duty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KickSettings {
        KickSettings {
            min_duty: 10.0,
            kick_launch: 0.2,
            kick_factor: 0.01,
            burst_power: 100.0,
            settle: Duration::from_millis(300),
        }
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn kickstart_from_standstill() {
        let t0 = Instant::now();
        let mut fsm = KickstartFsm::new(settings(), t0);

        assert_eq!(fsm.set_target(40.0, t0), 100.0);
        assert_eq!(fsm.phase(), KickPhase::Bursting);
        // max(0.2, 40 * 0.01) = 0.4 s
        assert_eq!(fsm.update(ms(t0, 399)), 100.0);

        let halfway = fsm.update(ms(t0, 550));
        assert_eq!(fsm.phase(), KickPhase::Settling);
        assert!((halfway - 70.0).abs() < 1e-6);

        assert_eq!(fsm.update(ms(t0, 700)), 40.0);
        assert_eq!(fsm.phase(), KickPhase::Steady);
    }

    #[test]
    fn short_burst_uses_launch_time() {
        let t0 = Instant::now();
        let mut fsm = KickstartFsm::new(settings(), t0);
        fsm.set_target(15.0, t0);
        assert_eq!(fsm.update(ms(t0, 199)), 100.0);
        fsm.update(ms(t0, 200));
        assert_eq!(fsm.phase(), KickPhase::Settling);
    }

    #[test]
    fn off_from_any_state() {
        let t0 = Instant::now();
        for at in [0, 450, 1000] {
            let mut fsm = KickstartFsm::new(settings(), t0);
            fsm.set_target(40.0, t0);
            fsm.update(ms(t0, at));
            assert_eq!(fsm.set_target(0.0, ms(t0, at)), 0.0);
            assert_eq!(fsm.phase(), KickPhase::Idle);
        }
    }

    #[test]
    fn running_fan_ramps_without_burst() {
        let t0 = Instant::now();
        let mut fsm = KickstartFsm::new(settings(), t0);
        fsm.set_target(40.0, t0);
        fsm.update(ms(t0, 1000));

        assert_eq!(fsm.set_target(80.0, ms(t0, 1000)), 40.0);
        assert_eq!(fsm.phase(), KickPhase::Settling);
        assert!((fsm.update(ms(t0, 1150)) - 60.0).abs() < 1e-6);
        assert_eq!(fsm.update(ms(t0, 1300)), 80.0);
    }

    #[test]
    fn new_target_during_burst_only_moves_the_target() {
        let t0 = Instant::now();
        let mut fsm = KickstartFsm::new(settings(), t0);
        fsm.set_target(40.0, t0);
        fsm.set_target(60.0, ms(t0, 100));
        assert_eq!(fsm.phase(), KickPhase::Bursting);
        assert_eq!(fsm.target(), 60.0);
        // Burst length was fixed when it started
        fsm.update(ms(t0, 400));
        assert_eq!(fsm.phase(), KickPhase::Settling);
        assert_eq!(fsm.update(ms(t0, 700)), 60.0);
    }

    #[test]
    fn low_targets_are_raised() {
        let t0 = Instant::now();
        let mut fsm = KickstartFsm::new(settings(), t0);
        fsm.set_target(3.0, t0);
        assert_eq!(fsm.target(), 10.0);
        fsm.set_target(250.0, t0);
        assert_eq!(fsm.target(), 100.0);
    }
}
