//! Derivative-free minimization: Nelder–Mead simplex search wrapped in a
//! randomized-restart driver.
//!
//! Both the calibration fit and the inverse kinematics solve use this. Each
//! call owns its simplex and its RNG; nothing here is shared between calls.

use std::ops::ControlFlow;

use log::debug;
use rand::Rng;

/// Simplex search parameters.
#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Iteration cap, multiplied by the problem dimension.
    pub iterations_per_dim: usize,
    /// Relative offset for initial simplex vertices on non-zero coordinates.
    pub non_zero_delta: f64,
    /// Absolute offset for initial simplex vertices on zero coordinates.
    pub zero_delta: f64,
    /// Stop when best and worst values differ by less than this...
    pub min_error_delta: f64,
    /// ...and the two best vertices are closer than this in every coordinate.
    pub min_tolerance: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            iterations_per_dim: 200,
            non_zero_delta: 1.05,
            zero_delta: 0.001,
            min_error_delta: 1e-6,
            min_tolerance: 1e-5,
        }
    }
}

/// A point and its objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
}

impl NelderMead {
    /// Minimize `f` starting from `x0`.
    pub fn minimize<F>(&self, f: &mut F, x0: &[f64]) -> Minimum
    where
        F: FnMut(&[f64]) -> f64,
    {
        const REFLECT: f64 = 1.0;
        const EXPAND: f64 = 2.0;
        const CONTRACT: f64 = 0.5;
        const SHRINK: f64 = 0.5;

        let n = x0.len();
        let mut eval = |x: Vec<f64>| -> Minimum {
            let value = sanitize(f(&x));
            Minimum { x, value }
        };

        if n == 0 {
            return eval(Vec::new());
        }

        let mut simplex = Vec::with_capacity(n + 1);
        simplex.push(eval(x0.to_vec()));
        for i in 0..n {
            let mut p = x0.to_vec();
            p[i] = if p[i] != 0.0 { p[i] * self.non_zero_delta } else { self.zero_delta };
            simplex.push(eval(p));
        }

        for _ in 0..self.iterations_per_dim * n {
            simplex.sort_by(|a, b| a.value.total_cmp(&b.value));

            let spread = simplex[0]
                .x
                .iter()
                .zip(&simplex[1].x)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            if (simplex[0].value - simplex[n].value).abs() < self.min_error_delta
                && spread < self.min_tolerance
            {
                break;
            }

            let centroid: Vec<f64> = (0..n)
                .map(|i| simplex[..n].iter().map(|v| v.x[i]).sum::<f64>() / n as f64)
                .collect();
            let worst = simplex[n].clone();
            let toward = |t: f64| -> Vec<f64> {
                centroid.iter().zip(&worst.x).map(|(c, w)| c + t * (c - w)).collect()
            };

            let reflected = eval(toward(REFLECT));
            if reflected.value < simplex[0].value {
                let expanded = eval(toward(EXPAND));
                simplex[n] = if expanded.value < reflected.value { expanded } else { reflected };
            } else if reflected.value < simplex[n - 1].value {
                simplex[n] = reflected;
            } else {
                let (contracted, bound) = if reflected.value < worst.value {
                    (eval(toward(REFLECT * CONTRACT)), reflected.value)
                } else {
                    (eval(toward(-CONTRACT)), worst.value)
                };
                if contracted.value < bound {
                    simplex[n] = contracted;
                } else {
                    let best = simplex[0].x.clone();
                    for vertex in simplex.iter_mut().skip(1) {
                        let x = best
                            .iter()
                            .zip(&vertex.x)
                            .map(|(b, v)| b + SHRINK * (v - b))
                            .collect();
                        *vertex = eval(x);
                    }
                }
            }
        }

        simplex.sort_by(|a, b| a.value.total_cmp(&b.value));
        simplex.swap_remove(0)
    }
}

/// NaN objective values rank worst.
fn sanitize(v: f64) -> f64 {
    if v.is_nan() { f64::INFINITY } else { v }
}

// ---------------------------------------------------------------------------
// Randomized restarts
// ---------------------------------------------------------------------------

/// Restart budget and success threshold.
#[derive(Debug, Clone)]
pub struct Restarts {
    /// Maximum number of simplex searches (at least one always runs).
    pub max_restarts: usize,
    /// Stop as soon as the best value is at or below this.
    pub threshold: f64,
    pub simplex: NelderMead,
}

/// Outcome of a restart search.
#[derive(Debug, Clone)]
pub struct Search {
    pub best: Minimum,
    /// Number of simplex searches that ran.
    pub restarts: usize,
    /// `best.value <= threshold`.
    pub converged: bool,
    /// The restart hook asked to stop.
    pub cancelled: bool,
}

impl Restarts {
    /// Run simplex searches from points drawn by `sample` until the threshold
    /// is met, the budget is spent, or `hook` breaks.
    ///
    /// `hook` receives the restart index and the best value so far after
    /// every search.
    pub fn search<R, S, F, H>(&self, rng: &mut R, mut sample: S, mut f: F, mut hook: H) -> Search
    where
        R: Rng + ?Sized,
        S: FnMut(&mut R) -> Vec<f64>,
        F: FnMut(&[f64]) -> f64,
        H: FnMut(usize, f64) -> ControlFlow<()>,
    {
        let budget = self.max_restarts.max(1);
        let mut best: Option<Minimum> = None;
        let mut restarts = 0;
        let mut cancelled = false;

        while restarts < budget {
            let x0 = sample(rng);
            let candidate = self.simplex.minimize(&mut f, &x0);
            restarts += 1;
            if best.as_ref().is_none_or(|b| candidate.value < b.value) {
                best = Some(candidate);
            }
            let best_value = best.as_ref().map_or(f64::INFINITY, |b| b.value);
            debug!("restart {restarts}/{budget}: best {best_value:.3e}");
            if best_value <= self.threshold {
                break;
            }
            if hook(restarts, best_value).is_break() {
                cancelled = true;
                break;
            }
        }

        // The loop runs at least once, so `best` is set.
        let best = best.unwrap_or(Minimum { x: Vec::new(), value: f64::INFINITY });
        let converged = best.value <= self.threshold;
        Search { best, restarts, converged, cancelled }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
