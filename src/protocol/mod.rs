//! Command and status vocabulary of the pointer controller.
//!
//! - [`Command`]: one-byte commands written to the command endpoint
//! - [`Jog`]: two-byte manual stepper moves, also on the command endpoint
//! - [`status::DeviceStatus`] and [`status::ActualSteps`]: readbacks
//!
//! Byte values differ between hardware revisions, so a [`Command`] is only
//! turned into bytes through the [`CommandSet`] of a device profile.

pub mod status;

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use status::{ActualSteps, DeviceStatus};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// How the controller plays a transmitted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Playback {
    /// Run the path once.
    #[default]
    Single,
    /// Repeat from the start until stopped.
    CyclicForward,
    /// Run forward, then backward, until stopped.
    CyclicAlternate,
}

/// A command we send to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Discard the stored path before a new one is written.
    ResetPath,
    /// Start the stored path.
    Execute(Playback),
    /// Toggle the laser.
    SwitchLaser,
    /// Take the current position as the zenith reference.
    SetZenith,
    /// Ask the controller to refresh its step readback.
    ReadActualSteps,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ResetPath => write!(f, "RESET_PATH"),
            Command::Execute(Playback::Single) => write!(f, "EXEC_PATH"),
            Command::Execute(Playback::CyclicForward) => write!(f, "CYCLIC_PATH"),
            Command::Execute(Playback::CyclicAlternate) => write!(f, "REVERSE_PATH"),
            Command::SwitchLaser => write!(f, "LASER_SWITCH"),
            Command::SetZenith => write!(f, "SET_ZENITH"),
            Command::ReadActualSteps => write!(f, "READ_ACT_STEPS"),
        }
    }
}

/// Byte value of every command on one device. `None` where the device does
/// not implement the command.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandSet {
    pub reset_path: Option<u8>,
    pub execute: Option<u8>,
    pub cyclic_forward: Option<u8>,
    pub cyclic_alternate: Option<u8>,
    pub switch_laser: Option<u8>,
    pub set_zenith: Option<u8>,
    pub read_actual_steps: Option<u8>,
}

impl CommandSet {
    /// Horus controller.
    pub const HORUS: Self = Self {
        reset_path: Some(1),
        execute: Some(2),
        cyclic_forward: Some(3),
        cyclic_alternate: Some(4),
        switch_laser: Some(5),
        set_zenith: Some(6),
        read_actual_steps: Some(7),
    };

    /// StarProjector controller. No alternating playback.
    pub const STAR_PROJECTOR: Self = Self {
        reset_path: Some(1),
        execute: Some(2),
        cyclic_forward: Some(3),
        cyclic_alternate: None,
        switch_laser: Some(4),
        set_zenith: Some(5),
        read_actual_steps: Some(6),
    };

    pub fn byte(&self, command: Command) -> Option<u8> {
        match command {
            Command::ResetPath => self.reset_path,
            Command::Execute(Playback::Single) => self.execute,
            Command::Execute(Playback::CyclicForward) => self.cyclic_forward,
            Command::Execute(Playback::CyclicAlternate) => self.cyclic_alternate,
            Command::SwitchLaser => self.switch_laser,
            Command::SetZenith => self.set_zenith,
            Command::ReadActualSteps => self.read_actual_steps,
        }
    }

    /// Wire payload for `command`, if the device supports it.
    pub fn encode(&self, command: Command) -> Option<Vec<u8>> {
        self.byte(command).map(|b| vec![b])
    }
}

// ---------------------------------------------------------------------------
// Jog
// ---------------------------------------------------------------------------

/// Direction of one axis in a [`Jog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JogDirection {
    Backward,
    Hold,
    Forward,
}

impl JogDirection {
    fn sign(self) -> i16 {
        match self {
            JogDirection::Backward => -1,
            JogDirection::Hold => 0,
            JogDirection::Forward => 1,
        }
    }
}

/// A manual move of both steppers by `size` steps.
///
/// Wire form is two bytes (fix, mob), each `127 + sign * size` floored at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jog {
    pub fix: JogDirection,
    pub mob: JogDirection,
    size: u8,
}

impl Jog {
    pub const MAX_SIZE: u8 = 128;

    /// `size` is clamped to `1..=128`.
    pub fn new(fix: JogDirection, mob: JogDirection, size: u8) -> Self {
        Self { fix, mob, size: size.clamp(1, Self::MAX_SIZE) }
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn encode(&self) -> [u8; 2] {
        let byte = |dir: JogDirection| {
            let v = dir.sign() * i16::from(self.size) + 127;
            // 0..=255 after the floor.
            v.max(0) as u8
        };
        [byte(self.fix), byte(self.mob)]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
