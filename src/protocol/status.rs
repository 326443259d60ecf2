//! Controller readbacks: safety status and actual stepper positions.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::coord::{Step, StepGeometry};
use crate::error::Result;

/// Status flags read from the status endpoint (6 bytes, one flag each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceStatus {
    /// No path is executing.
    pub idle: bool,
    pub laser_on: bool,
    /// Operator override of the height and level interlocks.
    pub unsafe_mode: bool,
    /// Distance to the ground is safe.
    pub safe_height: bool,
    pub leveled: bool,
    /// The mount moved since the last reference; calibration may be stale.
    pub tilted: bool,
}

impl DeviceStatus {
    pub const LEN: usize = 6;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        codec::check_len(payload, 0, Self::LEN, "DeviceStatus")?;
        Ok(Self {
            idle: payload[0] != 0,
            laser_on: payload[1] != 0,
            unsafe_mode: payload[2] != 0,
            safe_height: payload[3] != 0,
            leveled: payload[4] != 0,
            tilted: payload[5] != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        [self.idle, self.laser_on, self.unsafe_mode, self.safe_height, self.leveled, self.tilted]
            .iter()
            .map(|&b| u8::from(b))
            .collect()
    }

    /// Commands and paths may be sent.
    pub fn commands_allowed(&self) -> bool {
        self.unsafe_mode || (self.safe_height && self.leveled)
    }
}

impl fmt::Display for DeviceStatus {
    /// "unsafe height, not leveled", or "ok" when commands are allowed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unsafe_mode {
            return write!(f, "unsafe mode");
        }
        match (self.safe_height, self.leveled) {
            (true, true) => write!(f, "ok"),
            (false, true) => write!(f, "unsafe height"),
            (true, false) => write!(f, "not leveled"),
            (false, false) => write!(f, "unsafe height, not leveled"),
        }
    }
}

/// Stepper positions read from the steppers endpoint: big-endian u16 fix,
/// then mob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActualSteps {
    pub fix: u16,
    pub mob: u16,
}

impl ActualSteps {
    pub const LEN: usize = 4;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        codec::check_len(payload, 0, Self::LEN, "ActualSteps")?;
        Ok(Self {
            fix: codec::read_uint16(payload, 0, "ActualSteps")?,
            mob: codec::read_uint16(payload, 2, "ActualSteps")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.fix.to_be_bytes());
        buf.extend_from_slice(&self.mob.to_be_bytes());
        buf
    }

    pub fn to_step(&self, geometry: StepGeometry) -> Step {
        geometry.step(i64::from(self.fix), i64::from(self.mob))
    }
}
