//! Turning a [`Path`] into the unit stream the controller stores.
//!
//! Per segment: solve celestial coordinates to steps, drop anything the
//! device profile puts below the horizon, then pack
//! `(laser, delay, fix, mob)` with the encode layout and re-cut the packed
//! word with the transmit layout.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::calib::CalibrationModel;
use crate::codec::{self, BitLayout};
use crate::error::WireError;
use crate::path::{Coord, Path};
use crate::profile::{DeviceProfile, HorizonCheck};
use crate::solve::{Solver, SolverConfig};

/// Errors from [`Encoder::encode`].
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("segment {index}: no step points at the target (residual {residual:.3e})")]
    Unconverged { index: usize, residual: f64 },

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// One segment as the controller sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedSegment {
    pub laser: bool,
    pub delay: u32,
    pub fix: u32,
    pub mob: u32,
}

impl PackedSegment {
    const FIELDS: usize = 4;

    fn fields(&self) -> [u64; 4] {
        [u64::from(self.laser), u64::from(self.delay), u64::from(self.fix), u64::from(self.mob)]
    }

    fn from_fields(f: &[u64]) -> Result<Self, WireError> {
        match *f {
            [laser, delay, fix, mob] => Ok(Self {
                laser: laser != 0,
                delay: delay as u32,
                fix: fix as u32,
                mob: mob as u32,
            }),
            _ => Err(WireError::FieldCount { expected: Self::FIELDS, got: f.len() }),
        }
    }
}

/// An encoded path ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPath {
    units: Vec<u64>,
    layout: BitLayout,
    segments: usize,
    clipped: bool,
}

impl EncodedPath {
    /// Transmission units, `layout().len()` per segment.
    pub fn units(&self) -> &[u64] {
        &self.units
    }

    /// Transmit layout the units were cut with.
    pub fn layout(&self) -> &BitLayout {
        &self.layout
    }

    pub fn segment_count(&self) -> usize {
        self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments == 0
    }

    /// Some segment was dropped or blanked by the horizon clamp.
    pub fn clipped(&self) -> bool {
        self.clipped
    }

    /// Wire bytes: each unit as `unit_bytes()` little-endian bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.layout.unit_bytes();
        let mut buf = Vec::with_capacity(self.units.len() * n);
        for &unit in &self.units {
            codec::write_uint_le(&mut buf, unit, n);
        }
        buf
    }
}

/// Encodes paths for one device profile.
#[derive(Debug, Clone)]
pub struct Encoder {
    encode_layout: BitLayout,
    transmit_layout: BitLayout,
    horizon: HorizonCheck,
    solver: Solver,
    seed: u64,
}

impl Encoder {
    /// Seed of the inverse-kinematics search unless set otherwise.
    pub const DEFAULT_SEED: u64 = 0x5747_4c52;

    /// Fails when the transmit layout cannot carry a packed segment.
    pub fn new(profile: &DeviceProfile) -> Result<Self, WireError> {
        let encode = profile.encode_layout.total_bits();
        let transmit = profile.transmit_layout.total_bits();
        if transmit < encode {
            return Err(WireError::LayoutMismatch { encode, transmit });
        }
        Ok(Self {
            encode_layout: profile.encode_layout.clone(),
            transmit_layout: profile.transmit_layout.clone(),
            horizon: profile.horizon,
            solver: Solver::default(),
            seed: Self::DEFAULT_SEED,
        })
    }

    pub fn with_solver(mut self, config: SolverConfig) -> Self {
        self.solver = Solver::new(config);
        self
    }

    /// Solves are seeded per call, so encoding the same path twice gives the
    /// same units.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn encode(
        &self,
        path: &Path,
        model: &CalibrationModel,
        at: DateTime<Utc>,
    ) -> Result<EncodedPath, EncodeError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut units = Vec::with_capacity(path.size() * self.transmit_layout.len());
        let mut segments = 0;
        let mut clipped = false;
        let mut dropped = 0;
        let mut after_gap = false;

        for (index, seg) in path.iter().enumerate() {
            let step = match seg.coord {
                Coord::Steps(s) => s,
                Coord::Celestial(e) => {
                    let solution = self.solver.solve_with_rng(model, &e, at, &mut rng);
                    if !solution.converged {
                        return Err(EncodeError::Unconverged { index, residual: solution.residual });
                    }
                    solution.step
                }
            };

            if !self.horizon.is_above(&step) {
                clipped = true;
                after_gap = true;
                dropped += 1;
                continue;
            }

            // Coming back over the horizon: travel dark and without pause.
            let packed = if after_gap {
                clipped = true;
                after_gap = false;
                PackedSegment { laser: false, delay: 0, fix: step.fix(), mob: step.mob() }
            } else {
                PackedSegment { laser: seg.laser, delay: seg.delay, fix: step.fix(), mob: step.mob() }
            };
            self.push(&mut units, &packed)?;
            segments += 1;
        }

        if clipped {
            warn!("horizon clamp: dropped {dropped} of {} segments", path.size());
        }
        debug!("encoded {segments} segments into {} units", units.len());
        Ok(EncodedPath { units, layout: self.transmit_layout.clone(), segments, clipped })
    }

    /// Unpack an encoded path made by this encoder.
    pub fn decode(&self, encoded: &EncodedPath) -> Result<Vec<PackedSegment>, WireError> {
        decode_units(encoded.units(), &self.encode_layout, encoded.layout())
    }

    fn push(&self, units: &mut Vec<u64>, seg: &PackedSegment) -> Result<(), WireError> {
        let word = self.encode_layout.pack(&seg.fields())?;
        units.extend(self.transmit_layout.split(word));
        Ok(())
    }
}

/// Reverse the packing: rejoin each group of transmit units and split the
/// word with the encode layout.
pub fn decode_units(
    units: &[u64],
    encode_layout: &BitLayout,
    transmit_layout: &BitLayout,
) -> Result<Vec<PackedSegment>, WireError> {
    let per_segment = transmit_layout.len();
    if units.len() % per_segment != 0 {
        return Err(WireError::TruncatedUnits { len: units.len(), per_segment });
    }
    units
        .chunks_exact(per_segment)
        .map(|group| {
            let word = transmit_layout.pack(group)?;
            PackedSegment::from_fields(&encode_layout.split(word))
        })
        .collect()
}

/// Units from wire bytes, `unit_bytes()` little-endian bytes each.
pub fn units_from_bytes(bytes: &[u8], transmit_layout: &BitLayout) -> Result<Vec<u64>, WireError> {
    let n = transmit_layout.unit_bytes();
    if bytes.len() % n != 0 {
        return Err(WireError::TruncatedUnits { len: bytes.len(), per_segment: n });
    }
    (0..bytes.len() / n).map(|i| codec::read_uint_le(bytes, i * n, n, "PathUnit")).collect()
}
