//! Per-device configuration: mechanics, safety limits, wire layouts,
//! command bytes, and endpoint identifiers.
//!
//! Two hardware revisions are known. They share the stepper and bit-layout
//! constants but differ in zenith step, horizon check, commands, and
//! identifiers.

use std::f64::consts::TAU;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::chunk::DEFAULT_MAX_CHUNK;
use crate::codec::BitLayout;
use crate::coord::{Step, StepGeometry};
use crate::endpoint::EndpointIds;
use crate::protocol::CommandSet;

/// Minimum laser elevation on mounts with a mount-frame horizon check.
pub const HORIZON_MIN_ANGLE_DEG: f64 = 3.0;

/// Rule deciding whether a step keeps the laser above the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HorizonCheck {
    /// Elevation computed in the mount frame (y up), compared to
    /// `min_angle` radians.
    MountFrame { min_angle: f64 },
    /// Both steps within `min..=max`.
    StepWindow { min: u32, max: u32 },
}

impl HorizonCheck {
    pub fn is_above(&self, step: &Step) -> bool {
        match *self {
            HorizonCheck::MountFrame { min_angle } => {
                let max = f64::from(step.geometry().steps_per_rev());
                let quarter = max / 4.0;
                let ph = (f64::from(step.fix()) - quarter) * TAU / max;
                let th = (f64::from(step.mob()) - quarter) * TAU / max;
                let x = ph.cos() * th.sin();
                let y = ph.sin() * th.sin();
                let z = th.cos();
                let tan_h = y / (x * x + z * z).sqrt();
                tan_h > min_angle.tan()
            }
            HorizonCheck::StepWindow { min, max } => {
                (min..=max).contains(&step.fix()) && (min..=max).contains(&step.mob())
            }
        }
    }
}

/// Everything that differs between controller revisions.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceProfile {
    pub geometry: StepGeometry,
    pub horizon: HorizonCheck,
    /// Field widths of one packed segment: laser, delay, fix, mob.
    pub encode_layout: BitLayout,
    /// Widths the packed segment is cut into for transmission.
    pub transmit_layout: BitLayout,
    /// Largest single write on the link.
    pub max_chunk: usize,
    pub commands: CommandSet,
    pub endpoints: EndpointIds,
    /// Step readback needs a read-actual-steps command written first.
    pub request_steps: bool,
}

impl DeviceProfile {
    /// Horus: zenith at half a turn, mount-frame horizon at 3 degrees.
    pub fn horus() -> Self {
        Self {
            geometry: StepGeometry::new(2038, 1019),
            horizon: HorizonCheck::MountFrame { min_angle: HORIZON_MIN_ANGLE_DEG.to_radians() },
            encode_layout: BitLayout::path_segment(),
            transmit_layout: BitLayout::bytes(4),
            max_chunk: DEFAULT_MAX_CHUNK,
            commands: CommandSet::HORUS,
            endpoints: EndpointIds::horus(),
            request_steps: false,
        }
    }

    /// StarProjector: zenith at a quarter turn, eye-safety step window.
    pub fn star_projector() -> Self {
        Self {
            geometry: StepGeometry::new(2038, 510),
            horizon: HorizonCheck::StepWindow { min: 30, max: 989 },
            encode_layout: BitLayout::path_segment(),
            transmit_layout: BitLayout::bytes(4),
            max_chunk: DEFAULT_MAX_CHUNK,
            commands: CommandSet::STAR_PROJECTOR,
            endpoints: EndpointIds::star_projector(),
            request_steps: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.endpoints.device_name
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::horus()
    }
}
