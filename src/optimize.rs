//! Quasi-Newton minimisation behind a narrow objective interface
//!
//! Models express their penalised negative log-likelihood as an [`Objective`] over an
//! unconstrained (log-transformed) parameter vector; [`minimize`] runs BFGS with an
//! Armijo backtracking line search. Nothing here is random, so a given objective and
//! starting point always produce the same iterates.

use ndarray::{Array1, Array2};
use tracing::debug;

/// A smooth scalar function to minimise
pub trait Objective {
    /// Number of free parameters
    fn dimension(&self) -> usize;

    /// Objective value at `x`; may be non-finite outside the usable region
    fn value(&self, x: &Array1<f64>) -> f64;

    /// Gradient at `x`. Defaults to central differences.
    fn gradient(&self, x: &Array1<f64>) -> Array1<f64> {
        central_difference(|p| self.value(p), x, FD_STEP)
    }
}

const FD_STEP: f64 = 1e-6;
const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;
const MAX_STEP_NORM: f64 = 5.0;

/// Optimizer stopping rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    /// Iteration budget
    pub max_iters: usize,
    /// Converged once the largest gradient component falls below this
    pub gradient_tolerance: f64,
    /// Relative decrease below which progress is considered exhausted
    pub function_tolerance: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            gradient_tolerance: 1e-7,
            function_tolerance: 1e-12,
        }
    }
}

impl OptimizerConfig {
    /// Gradient level accepted when progress stalls (line search or tiny decrease)
    fn stall_tolerance(&self) -> f64 {
        self.gradient_tolerance.sqrt()
    }
}

/// Options shared by the BG/NBD and Gamma-Gamma fitters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// L2 penalty coefficient applied to the squared (positive) parameters
    pub penalizer_coef: f64,
    /// Starting value of every parameter before the log transform
    pub initial_value: f64,
    pub optimizer: OptimizerConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            penalizer_coef: 0.0,
            initial_value: 1.0,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn with_penalizer(penalizer_coef: f64) -> Self {
        Self {
            penalizer_coef,
            ..Self::default()
        }
    }
}

/// Diagnostics of a completed model fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitReport {
    pub iterations: usize,
    /// Final penalised mean negative log-likelihood
    pub objective: f64,
    pub gradient_norm: f64,
    /// Customers contributing to the likelihood
    pub n_observations: usize,
    /// Customers dropped before fitting (zero frequency)
    pub n_excluded: usize,
}

/// Outcome of a minimisation run
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub gradient_norm: f64,
    pub converged: bool,
}

/// Central-difference gradient of `f` at `x`
pub fn central_difference<F>(f: F, x: &Array1<f64>, step: f64) -> Array1<f64>
where
    F: Fn(&Array1<f64>) -> f64,
{
    let mut grad = Array1::zeros(x.len());
    let mut shifted = x.clone();
    for i in 0..x.len() {
        let h = step * x[i].abs().max(1.0);
        shifted[i] = x[i] + h;
        let forward = f(&shifted);
        shifted[i] = x[i] - h;
        let backward = f(&shifted);
        shifted[i] = x[i];
        grad[i] = (forward - backward) / (2.0 * h);
    }
    grad
}

fn inf_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |acc, g| acc.max(g.abs()))
}

/// Minimise `objective` from `x0` with BFGS.
///
/// Never fails outright: the returned [`Minimum`] reports whether the gradient
/// tolerance was reached, and callers decide what a non-converged run means.
pub fn minimize<O: Objective + ?Sized>(
    objective: &O,
    x0: Array1<f64>,
    config: &OptimizerConfig,
) -> Minimum {
    let n = objective.dimension();
    let identity = Array2::<f64>::eye(n);

    let mut x = x0;
    let mut f = objective.value(&x);
    if !f.is_finite() {
        return Minimum {
            value: f,
            x,
            iterations: 0,
            gradient_norm: f64::INFINITY,
            converged: false,
        };
    }
    let mut g = objective.gradient(&x);
    let mut h_inv = identity.clone();
    let mut fresh_hessian = true;

    for iteration in 1..=config.max_iters {
        let gradient_norm = inf_norm(&g);
        if gradient_norm < config.gradient_tolerance {
            return Minimum {
                x,
                value: f,
                iterations: iteration - 1,
                gradient_norm,
                converged: true,
            };
        }

        let mut direction = -h_inv.dot(&g);
        if direction.dot(&g) >= 0.0 {
            h_inv = identity.clone();
            fresh_hessian = true;
            direction = -g.clone();
        }
        let step_norm = direction.dot(&direction).sqrt();
        if step_norm > MAX_STEP_NORM {
            direction *= MAX_STEP_NORM / step_norm;
        }

        let slope = direction.dot(&g);
        let mut alpha = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = &x + &(alpha * &direction);
            let value = objective.value(&candidate);
            if value.is_finite() && value <= f + ARMIJO_C1 * alpha * slope {
                accepted = Some((candidate, value));
                break;
            }
            alpha *= 0.5;
        }

        let Some((x_new, f_new)) = accepted else {
            if !fresh_hessian {
                // Retry along steepest descent before giving up
                h_inv = identity.clone();
                fresh_hessian = true;
                continue;
            }
            debug!(iteration, gradient_norm, "line search stalled");
            return Minimum {
                x,
                value: f,
                iterations: iteration,
                gradient_norm,
                converged: gradient_norm < config.stall_tolerance(),
            };
        };

        let g_new = objective.gradient(&x_new);
        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > 1e-12 {
            if fresh_hessian {
                // Rescale the initial approximation before the first update
                h_inv = &identity * (sy / y.dot(&y));
            }
            let rho = 1.0 / sy;
            let hy = h_inv.dot(&y);
            let yhy = y.dot(&hy);
            for i in 0..n {
                for j in 0..n {
                    h_inv[[i, j]] += rho * ((1.0 + rho * yhy) * s[i] * s[j]
                        - hy[i] * s[j]
                        - s[i] * hy[j]);
                }
            }
            fresh_hessian = false;
        }

        let decrease = f - f_new;
        x = x_new;
        f = f_new;
        g = g_new;

        if iteration % 25 == 0 {
            debug!(iteration, objective = f, gradient_norm = inf_norm(&g), "bfgs progress");
        }

        let scale = f.abs().max(1.0);
        let gradient_norm = inf_norm(&g);
        if decrease <= config.function_tolerance * scale
            && gradient_norm < config.stall_tolerance()
        {
            return Minimum {
                x,
                value: f,
                iterations: iteration,
                gradient_norm,
                converged: true,
            };
        }
    }

    let gradient_norm = inf_norm(&g);
    Minimum {
        x,
        value: f,
        iterations: config.max_iters,
        converged: gradient_norm < config.gradient_tolerance,
        gradient_norm,
    }
}
