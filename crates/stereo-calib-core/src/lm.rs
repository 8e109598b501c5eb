//! Levenberg-Marquardt driver around the `levenberg-marquardt` crate.
//!
//! Problems implement [`LeastSquaresProblem`] over dynamically sized
//! vectors and carry their own parameter vector; [`solve`] configures the
//! solver from [`LmOptions`] and reports costs as plain sums of squares.

pub use levenberg_marquardt::LeastSquaresProblem;
use levenberg_marquardt::LevenbergMarquardt;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Relative step used for central differences.
pub const DIFF_STEP: f64 = 1e-6;

#[inline]
pub fn diff_step(value: f64) -> f64 {
    DIFF_STEP * value.abs().max(1.0)
}

/// Central-difference derivative of `residuals` with respect to column `j`,
/// written into `jac` rows `row0..row0 + len` where `len` is the length of
/// the residual block `residuals` fills.
pub fn difference_column<F>(
    params: &mut [f64],
    j: usize,
    row0: usize,
    scratch: (&mut [f64], &mut [f64]),
    jac: &mut DMatrix<f64>,
    mut residuals: F,
) where
    F: FnMut(&[f64], &mut [f64]),
{
    let (plus, minus) = scratch;
    let x = params[j];
    let h = diff_step(x);
    params[j] = x + h;
    residuals(params, plus);
    params[j] = x - h;
    residuals(params, minus);
    params[j] = x;
    let inv = 0.5 / h;
    for (i, (p, m)) in plus.iter().zip(minus.iter()).enumerate() {
        jac[(row0 + i, j)] = (p - m) * inv;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmOptions {
    /// Evaluation budget, in multiples of `parameters + 1` (the crate's patience).
    pub max_iters: usize,
    /// Relative step-size tolerance.
    pub xtol: f64,
    /// Relative cost-reduction tolerance.
    pub ftol: f64,
    /// Orthogonality tolerance between residuals and Jacobian columns.
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 30,
            xtol: 1e-12,
            ftol: 1e-12,
            gtol: 0.0,
        }
    }
}

impl LmOptions {
    pub fn with_limits(max_iters: usize, xtol: f64) -> Self {
        Self {
            max_iters,
            xtol,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolveReport {
    /// Residual evaluations performed by the solver.
    pub evaluations: usize,
    /// Sum of squared residuals at the start.
    pub initial_cost: f64,
    /// Sum of squared residuals at the solution.
    pub final_cost: f64,
    pub converged: bool,
    /// Solver's termination reason, for logs.
    pub termination: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("problem has {params} parameters and {residuals} residuals")]
    Underdetermined { params: usize, residuals: usize },
    #[error("residuals are not finite at the initial guess")]
    NonFinite,
}

/// Minimize `problem` from its current parameters and hand it back at the
/// solution.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(problem, opts), fields(params = problem.params().len()))
)]
pub fn solve<P>(problem: P, opts: &LmOptions) -> Result<(P, SolveReport), SolverError>
where
    P: LeastSquaresProblem<f64, Dyn, Dyn>,
{
    let params = problem.params().len();
    let initial_cost = match problem.residuals() {
        Some(r) if r.iter().all(|v| v.is_finite()) => {
            if r.len() < params {
                return Err(SolverError::Underdetermined {
                    params,
                    residuals: r.len(),
                });
            }
            r.norm_squared()
        }
        _ => return Err(SolverError::NonFinite),
    };

    let lm = LevenbergMarquardt::new()
        .with_ftol(opts.ftol)
        .with_xtol(opts.xtol)
        .with_gtol(opts.gtol)
        .with_patience(opts.max_iters.max(1));
    let (problem, report) = lm.minimize(problem);

    // The crate reports half the sum of squares.
    let final_cost = 2.0 * report.objective_function;
    let converged = report.termination.was_successful();
    let termination = format!("{:?}", report.termination);
    if converged {
        log::debug!(
            "LM: {} evaluations, cost {initial_cost:.6e} -> {final_cost:.6e} ({termination})",
            report.number_of_evaluations
        );
    } else {
        log::warn!(
            "LM stopped without converging after {} evaluations ({termination})",
            report.number_of_evaluations
        );
    }

    Ok((
        problem,
        SolveReport {
            evaluations: report.number_of_evaluations,
            initial_cost,
            final_cost,
            converged,
            termination,
        },
    ))
}

/// Stack a residual closure into a fresh vector.
pub fn collect_residuals<F>(len: usize, fill: F) -> DVector<f64>
where
    F: FnOnce(&mut [f64]),
{
    let mut r = DVector::zeros(len);
    fill(r.as_mut_slice());
    r
}
