#![doc = include_str!("../README.md")]
pub mod annunciator;
pub mod clock;
pub mod condition;
pub mod config;
pub mod controller;
pub mod escalate;
pub mod logger;
pub mod net;
pub mod retry;
pub mod sensor;
pub mod telemetry;
pub mod units;

#[cfg(test)]
mod test_util;

pub use config::Config;
pub use controller::Controller;
pub use escalate::{Escalation, Restart};
