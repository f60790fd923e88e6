//! Seeded perturbations around a known fixed point, for probing the basin of
//! attraction of the Newton iteration.

use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use rayon::prelude::*;

use crate::error::{Result, SteadyStateError};
use crate::newton::{self, ResidualFunction};
use crate::solving::SolverConfig;
use crate::variables::VariableVector;

/// Draws `count` guesses with every coordinate scaled by `1 + u`, `u ~ U(-radius, radius)`.
///
/// The same seed always produces the same guesses.
pub fn perturbed_guesses(
    center: &VariableVector,
    relative_radius: f64,
    count: usize,
    seed: u64,
) -> Result<Vec<VariableVector>> {
    if !(relative_radius > 0.0 && relative_radius < 1.0) {
        return Err(SteadyStateError::InvalidConfig {
            reason: "relative perturbation radius must lie in (0, 1)",
        });
    }

    let mut rng = SmallRng::seed_from_u64(seed);
    let shocks = Uniform::new(-relative_radius, relative_radius);
    let mut guesses = Vec::with_capacity(count);
    for _ in 0..count {
        let values = center
            .values()
            .map(|value| value * (1.0 + shocks.sample(&mut rng)));
        guesses.push(center.with_values(values)?);
    }
    Ok(guesses)
}

/// Outcome of solving from a batch of perturbed guesses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasinReport {
    /// Number of guesses tried.
    pub attempts: usize,
    /// Solves that converged to the reference point.
    pub converged: usize,
    /// Converged solves whose residual norm never increased.
    pub monotone: usize,
    /// Largest distance from the reference among converged solves.
    pub max_deviation: f64,
}

impl BasinReport {
    pub fn convergence_rate(&self) -> f64 {
        ratio(self.converged, self.attempts)
    }

    /// Share of converged solves with a monotone residual path.
    pub fn monotone_rate(&self) -> f64 {
        ratio(self.monotone, self.converged)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Solves `function` from every guess in parallel and compares against `reference`.
///
/// A solve counts as converged when Newton succeeds and every coordinate lies
/// within `match_tolerance * max(1, |reference_j|)` of the reference.
pub fn probe<F>(
    function: &F,
    reference: &VariableVector,
    guesses: &[VariableVector],
    config: &SolverConfig,
    match_tolerance: f64,
) -> BasinReport
where
    F: ResidualFunction + Sync + ?Sized,
{
    let outcomes: Vec<Option<(bool, f64)>> = guesses
        .par_iter()
        .map(|guess| {
            let solution = newton::solve(guess, function, config).ok()?;
            let deviation = solution
                .variables
                .values()
                .iter()
                .zip(reference.values().iter())
                .map(|(found, expected)| (found - expected).abs() / expected.abs().max(1.0))
                .fold(0.0, f64::max);
            if deviation > match_tolerance {
                return None;
            }
            Some((solution.summary.is_monotone(config.tolerance), deviation))
        })
        .collect();

    let mut report = BasinReport {
        attempts: guesses.len(),
        ..BasinReport::default()
    };
    for (monotone, deviation) in outcomes.into_iter().flatten() {
        report.converged += 1;
        if monotone {
            report.monotone += 1;
        }
        report.max_deviation = report.max_deviation.max(deviation);
    }
    debug!(
        "basin probe: {}/{} converged, {} monotone",
        report.converged, report.attempts, report.monotone
    );
    report
}
