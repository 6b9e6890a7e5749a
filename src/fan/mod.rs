//! fan - PWM fan controller driven by decoded levels and manual overrides.

mod controller;
pub mod fsm;
mod intake;
pub mod output;
pub mod overrides;

pub use controller::{FanCommand, FanController, PwmState};
pub use fsm::{KickPhase, KickSettings, KickstartFsm};
pub use intake::FanIntake;
pub use output::{LogPwm, PwmOutput, SysfsPwm};
pub use overrides::{OverrideMode, Overrides};
