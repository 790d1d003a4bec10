//! Risk module - promotion gate and kill switch

pub mod gate;
pub mod kill_switch;

pub use gate::{DenyReason, GateDecision, GateEvaluator, bridge_id};
pub use kill_switch::{
    KillSwitchAction, KillSwitchEvent, KillSwitchListener, KillSwitchManager, KillSwitchStatus,
    KillSwitchVerdict, RunStopCallback,
};
