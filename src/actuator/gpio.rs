//! Linux sysfs GPIO relay driver

use super::Actuator;
use gharswitch_shared::Channel;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Drives one GPIO line per channel through `/sys/class/gpio`
pub struct SysfsGpioActuator {
    root: PathBuf,
    pins: BTreeMap<Channel, u32>,
    active_low: bool,
}

impl SysfsGpioActuator {
    /// Export every configured pin and set it as an output
    pub fn open(root: &Path, pins: BTreeMap<Channel, u32>, active_low: bool) -> io::Result<Self> {
        for (channel, pin) in &pins {
            let pin_dir = root.join(format!("gpio{}", pin));
            if !pin_dir.exists() {
                fs::write(root.join("export"), pin.to_string())?;
            }
            fs::write(pin_dir.join("direction"), "out")?;
            debug!("[RELAY] {} bound to gpio{}", channel, pin);
        }

        Ok(Self {
            root: root.to_path_buf(),
            pins,
            active_low,
        })
    }

    fn level(&self, on: bool) -> &'static str {
        if on != self.active_low {
            "1"
        } else {
            "0"
        }
    }
}

impl Actuator for SysfsGpioActuator {
    fn set_output(&mut self, channel: &Channel, on: bool) {
        let Some(pin) = self.pins.get(channel) else {
            error!("[RELAY] No pin configured for {}", channel);
            return;
        };

        let value_path = self.root.join(format!("gpio{}", pin)).join("value");
        if let Err(e) = fs::write(&value_path, self.level(on)) {
            error!("[RELAY] Failed to drive gpio{} for {}: {}", pin, channel, e);
        }
    }

    fn name(&self) -> &'static str {
        "sysfs-gpio"
    }
}
