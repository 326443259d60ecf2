//! Calibrate against a simulated controller, then circle a star.
//!
//! Usage: RUST_LOG=debug cargo run --example aim
//!
//! The simulated controller keeps a hidden "true" model of its mount. Star
//! captures read steps that point at the star under that model; the fit has
//! to recover it from those captures alone.

use std::process;

use chrono::{TimeDelta, Utc};
use stellector::calib::FitParam;
use stellector::chunk::ChunkAssembler;
use stellector::encode::{self, PackedSegment};
use stellector::path::{CircleStyle, LaserPattern};
use stellector::protocol::{ActualSteps, CommandSet};
use stellector::seq;
use stellector::{
    CalibrationModel, Calibrator, DeviceProfile, Encoder, Endpoint, Equatorial, Notice, PointerStyle, Session,
    Solver, Transport, TransportError,
};

// ---------------------------------------------------------------------------
// Simulated controller
// ---------------------------------------------------------------------------

struct SimController {
    profile: DeviceProfile,
    status: [u8; 6],
    steps: ActualSteps,
    received: ChunkAssembler,
}

impl SimController {
    fn new(profile: DeviceProfile) -> Self {
        let segment_len = profile.transmit_layout.len() * profile.transmit_layout.unit_bytes();
        Self {
            profile,
            status: [1, 0, 0, 1, 1, 0],
            steps: ActualSteps { fix: 0, mob: 0 },
            received: ChunkAssembler::new(segment_len),
        }
    }

    fn execute(&mut self) -> Result<(), TransportError> {
        let layout = &self.profile.transmit_layout;
        let units = encode::units_from_bytes(self.received.bytes(), layout)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        let segments = encode::decode_units(&units, &self.profile.encode_layout, layout)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        println!("  controller: running {} segments", segments.len());
        if let Some(&PackedSegment { fix, mob, .. }) = segments.last() {
            self.steps = ActualSteps { fix: fix as u16, mob: mob as u16 };
        }
        Ok(())
    }

    fn command(&mut self, byte: u8) -> Result<(), TransportError> {
        let set: &CommandSet = &self.profile.commands;
        if Some(byte) == set.reset_path {
            self.received.reset();
        } else if [set.execute, set.cyclic_forward, set.cyclic_alternate].contains(&Some(byte)) {
            self.execute()?;
        } else if Some(byte) == set.switch_laser {
            self.status[1] ^= 1;
        }
        Ok(())
    }
}

impl Transport for SimController {
    fn write(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        match (endpoint, data) {
            (Endpoint::Command, &[byte]) => self.command(byte),
            // Jog: ignored by the simulation.
            (Endpoint::Command, _) => Ok(()),
            (Endpoint::Path, chunk) => {
                self.received.feed(chunk);
                Ok(())
            }
            (other, _) => Err(TransportError::NoEndpoint(other)),
        }
    }

    fn read(&mut self, endpoint: Endpoint) -> Result<Vec<u8>, TransportError> {
        match endpoint {
            Endpoint::Status => Ok(self.status.to_vec()),
            Endpoint::Steppers => Ok(self.steps.encode()),
            other => Err(TransportError::NoEndpoint(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let profile = DeviceProfile::horus();
    let now = Utc::now();

    let truth = CalibrationModel {
        fix_stretch: FitParam::new(1.02, 0.8, 1.2),
        mob_stretch: FitParam::new(0.985, 0.8, 1.2),
        t0: now,
        ..CalibrationModel::new(profile.geometry)
    };

    let mut session = Session::new(SimController::new(profile.clone()), profile.clone());
    session.set_on_notice(|n: Notice| println!("  notice: {n:?}"));
    let status = session.refresh_status()?;
    println!("{} status: {status}", profile.name());

    // Operator aims at each star in turn; the simulation jumps the steppers
    // to where the hidden model says the star is.
    let catalog = [
        ("Vega", Equatorial::new(18.615, 38.78)),
        ("Arcturus", Equatorial::new(14.261, 19.18)),
        ("Deneb", Equatorial::new(20.690, 45.28)),
        ("Capella", Equatorial::new(5.278, 46.00)),
    ];
    let solver = Solver::default();
    let mut stars = Vec::new();
    for (i, (name, target)) in catalog.iter().enumerate() {
        let at = now + TimeDelta::minutes(3 * i as i64);
        let step = solver.solve(&truth, target, at).step;
        session.transport_mut().steps = ActualSteps { fix: step.fix() as u16, mob: step.mob() as u16 };
        stars.push(seq::capture_star(&mut session, name, *target, at)?);
    }

    let mut calibrator = Calibrator::new(CalibrationModel::new(profile.geometry));
    let calibration = calibrator.fit(&stars)?;
    let stats = &calibration.model.stats;
    println!(
        "fit: converged {} after {} restarts, mean error {:.3} deg (max {:.3} at {})",
        calibration.converged,
        calibration.restarts,
        stats.dev,
        stats.max,
        stats.max_star.as_deref().unwrap_or("-"),
    );

    let encoder = Encoder::new(&profile)?;
    let style = PointerStyle::Circle(CircleStyle {
        aperture: 1.5_f64.to_radians(),
        increment: 10.0_f64.to_radians(),
        pattern: LaserPattern::duty(75.0),
        delay: 40,
    });
    let target = Equatorial::new(18.615, 38.78);
    match seq::point_at(&mut session, &encoder, &calibration.model, target, &style, Utc::now()) {
        Ok(encoded) => println!("circling Vega: {} segments, clipped {}", encoded.segment_count(), encoded.clipped()),
        Err(e) => println!("cannot circle Vega now: {e}"),
    }

    let (step, eq) = seq::read_direction(&mut session, &calibration.model, Utc::now())?;
    println!("laser at step ({}, {}): ra {:.3}h dec {:.2}", step.fix(), step.mob(), eq.ra(), eq.dec());
    Ok(())
}
