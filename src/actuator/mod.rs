//! Relay outputs
//!
//! The command processor drives relays only through [`Actuator`]; which
//! implementation sits behind it is a configuration choice.

mod gpio;

pub use gpio::SysfsGpioActuator;

use crate::config::{ActuatorConfig, ActuatorKind};
use gharswitch_shared::Channel;
use std::collections::BTreeMap;
use tracing::info;

/// Physical relay outputs
///
/// Calls are synchronous and assumed not to fail at this layer;
/// implementations log hardware errors themselves.
pub trait Actuator: Send + Sync {
    /// Drive `channel` on or off
    fn set_output(&mut self, channel: &Channel, on: bool);

    /// Human-readable name for this actuator
    fn name(&self) -> &'static str;
}

/// Logs relay clicks instead of touching hardware
#[derive(Debug, Default)]
pub struct SimulatedActuator;

impl Actuator for SimulatedActuator {
    fn set_output(&mut self, channel: &Channel, on: bool) {
        info!(
            "[RELAY] *CLICK* {} -> {}",
            channel,
            if on { "ON" } else { "OFF" }
        );
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Build the configured actuator for the given channel pins
pub fn build(
    config: &ActuatorConfig,
    pins: BTreeMap<Channel, u32>,
) -> std::io::Result<Box<dyn Actuator>> {
    match config.kind {
        ActuatorKind::Simulated => Ok(Box::new(SimulatedActuator)),
        ActuatorKind::Sysfs => Ok(Box::new(SysfsGpioActuator::open(
            &config.gpio_root,
            pins,
            config.active_low,
        )?)),
    }
}
