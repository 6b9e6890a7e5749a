use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::fsm::{KickPhase, KickSettings, KickstartFsm};
use super::output::PwmOutput;
use super::overrides::{OverrideMode, Overrides};
use crate::codec::Level;
use crate::error::{Error, Result};
use crate::protocol::IntakeMessage;

pub enum FanCommand {
    Level(Level),
    Fixed(f64),
    Auto,
    Off,
    Scale(f64),
    ResetScale,
    Status(oneshot::Sender<PwmState>),
}

impl FanCommand {
    /// Map an intake message. `status` requests need a reply channel and are handled by the caller.
    pub fn from_message(message: IntakeMessage) -> Result<Option<Self>> {
        Ok(Some(match message {
            IntakeMessage::Level { level, .. } => FanCommand::Level(Level::new(level)?),
            IntakeMessage::Fixed { duty } => FanCommand::Fixed(duty),
            IntakeMessage::Auto => FanCommand::Auto,
            IntakeMessage::Off => FanCommand::Off,
            IntakeMessage::Scale { reset: true, .. } => FanCommand::ResetScale,
            IntakeMessage::Scale {
                factor: Some(factor),
                ..
            } => FanCommand::Scale(factor),
            IntakeMessage::Scale { .. } => {
                return Err(Error::InvalidMessage("scale needs a factor or reset".into()));
            }
            IntakeMessage::Status => return Ok(None),
        }))
    }
}

/// Snapshot answered to status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PwmState {
    pub duty: f64,
    pub target: f64,
    pub auto_target: f64,
    pub mode: OverrideMode,
    pub scale: f64,
    pub phase: KickPhase,
}

pub struct FanController {
    fsm: KickstartFsm,
    overrides: Overrides,
    output: Box<dyn PwmOutput>,
    written: Option<f64>,
}

impl FanController {
    pub fn new(settings: KickSettings, output: Box<dyn PwmOutput>, now: Instant) -> Self {
        log::info!("Fan controller driving {}", output.name());
        Self {
            fsm: KickstartFsm::new(settings, now),
            overrides: Overrides::default(),
            output,
            written: None,
        }
    }

    pub fn state(&self) -> PwmState {
        PwmState {
            duty: self.fsm.duty(),
            target: self.fsm.target(),
            auto_target: self.overrides.auto_target(),
            mode: self.overrides.mode(),
            scale: self.overrides.scale(),
            phase: self.fsm.phase(),
        }
    }

    fn write(&mut self, duty: f64) {
        if self.written == Some(duty) {
            return;
        }
        match self.output.set_duty(duty) {
            Ok(()) => self.written = Some(duty),
            Err(e) => log::error!("Failed to set duty on {}: {:#}", self.output.name(), e),
        }
    }

    fn retarget(&mut self, now: Instant) {
        let duty = self.fsm.set_target(self.overrides.effective_target(), now);
        self.write(duty);
    }

    pub fn handle(&mut self, command: FanCommand, now: Instant) {
        let result = match command {
            FanCommand::Level(level) => {
                log::info!("Target level {} ({:.1}%)", level, level.duty_percent());
                self.overrides.set_auto_target(level.duty_percent());
                Ok(())
            }
            FanCommand::Fixed(duty) => self.overrides.fix(duty),
            FanCommand::Auto => {
                self.overrides.clear();
                Ok(())
            }
            FanCommand::Off => {
                self.overrides.force_off();
                Ok(())
            }
            FanCommand::Scale(factor) => self.overrides.set_scale(factor),
            FanCommand::ResetScale => {
                self.overrides.reset_scale();
                Ok(())
            }
            FanCommand::Status(reply) => {
                self.tick(now);
                let _ = reply.send(self.state());
                return;
            }
        };

        match result {
            Ok(()) => self.retarget(now),
            Err(e) => log::error!("Rejected fan command: {}", e),
        }
    }

    pub fn tick(&mut self, now: Instant) {
        let duty = self.fsm.update(now);
        self.write(duty);
    }

    /// Sweep the output from 0 to 100% in 5% steps, then restore the current target.
    pub async fn self_test(&mut self, step: Duration) {
        log::info!("PWM self-test on {}", self.output.name());
        for percent in (0..=100).step_by(5) {
            self.write(f64::from(percent));
            tokio::time::sleep(step).await;
        }
        self.write(0.0);
        let settings = self.fsm.settings().clone();
        self.fsm = KickstartFsm::new(settings, Instant::now());
        self.retarget(Instant::now());
        log::info!("PWM self-test done");
    }

    /// Serve commands until every sender is gone, then turn the fan off.
    pub async fn run(mut self, mut rx: mpsc::Receiver<FanCommand>, tick: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(tick.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command, Instant::now()),
                    None => break,
                },
                _ = interval.tick() => self.tick(Instant::now()),
            }
        }

        log::info!("Command channel closed, stopping fan");
        self.overrides.force_off();
        self.retarget(Instant::now());
        Ok(())
    }
}
