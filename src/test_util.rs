//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::calib::{CalibrationModel, FitParam, MAX_TILT, shaped_axes};
use crate::coord::StepGeometry;
use crate::endpoint::Endpoint;
use crate::session::{Transport, TransportError};

/// Status bytes of an idle device at a safe height, leveled.
pub(crate) const SAFE: [u8; 6] = [1, 0, 0, 1, 1, 0];

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 21, 30, 0).single().unwrap_or_default()
}

/// A model with every shape parameter away from its default.
pub(crate) fn tilted_model() -> CalibrationModel {
    let laser_tilt = 1.0_f64.to_radians();
    let mob_tilt = -2.0_f64.to_radians();
    CalibrationModel {
        axes: shaped_axes(laser_tilt, mob_tilt, [0.4, 1.2, 0.3, 2.0]),
        fix_stretch: FitParam::new(1.03, 0.8, 1.2),
        mob_stretch: FitParam::new(0.97, 0.8, 1.2),
        mob_tilt: FitParam::new(mob_tilt, -MAX_TILT, MAX_TILT),
        laser_tilt: FitParam::new(laser_tilt, -MAX_TILT, MAX_TILT),
        t0: epoch(),
        ..CalibrationModel::new(StepGeometry::default())
    }
}

/// In-memory device: fixed status and steps readbacks, recorded writes.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub status: Vec<u8>,
    pub steps: Vec<u8>,
    pub writes: Vec<(Endpoint, Vec<u8>)>,
    pub reads: usize,
    /// Fail every write once this many have succeeded.
    pub fail_writes_after: Option<usize>,
}

impl MockTransport {
    pub fn new(status: &[u8]) -> Self {
        Self { status: status.to_vec(), steps: vec![0x03, 0xFB, 0x03, 0xFB], ..Self::default() }
    }
}

impl Transport for MockTransport {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes_after.is_some_and(|n| self.writes.len() >= n) {
            return Err(TransportError::LinkDown);
        }
        self.writes.push((endpoint, data.to_vec()));
        Ok(())
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, TransportError> {
        self.reads += 1;
        match endpoint {
            Endpoint::Status => Ok(self.status.clone()),
            Endpoint::Steppers => Ok(self.steps.clone()),
            other => Err(TransportError::NoEndpoint(other)),
        }
    }
}
