//! BG/NBD purchase-timing model
//!
//! While alive a customer purchases at Poisson rate λ ~ Gamma(r, α); after each
//! purchase they drop out with probability p ~ Beta(a, b).

use ndarray::{Array1, array};
use tracing::{debug, info};

use crate::error::{CltvError, ModelResult};
use crate::optimize::{minimize, FitOptions, FitReport, Objective};
use crate::special::{beta_expectation, ln_beta, ln_gamma};
use crate::summary::{validate_timing, CustomerSummary, SummaryTable};

const MODEL_NAME: &str = "BG/NBD";

/// Fitted `(r, alpha, a, b)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BgNbdParameters {
    pub r: f64,
    pub alpha: f64,
    pub a: f64,
    pub b: f64,
}

impl BgNbdParameters {
    pub fn new(r: f64, alpha: f64, a: f64, b: f64) -> ModelResult<Self> {
        for (name, value) in [("r", r), ("alpha", alpha), ("a", a), ("b", b)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CltvError::invalid(
                    "BG/NBD parameters",
                    format!("{name} must be positive, got {value}"),
                ));
            }
        }
        Ok(Self { r, alpha, a, b })
    }

    fn from_log(theta: &Array1<f64>, time_scale: f64) -> Self {
        Self {
            r: theta[0].exp(),
            alpha: theta[1].exp() / time_scale,
            a: theta[2].exp(),
            b: theta[3].exp(),
        }
    }
}

/// Log-likelihood of one customer's `(x, t_x, T)` under `params`
pub fn log_likelihood(params: &BgNbdParameters, frequency: u32, recency: f64, age: f64) -> f64 {
    let BgNbdParameters { r, alpha, a, b } = *params;
    let x = f64::from(frequency);

    let a1 = ln_gamma(r + x) - ln_gamma(r) + r * alpha.ln();
    let a2 = ln_gamma(a + b) + ln_gamma(b + x) - ln_gamma(b) - ln_gamma(a + b + x);
    let a3 = -(r + x) * (alpha + age).ln();

    if frequency == 0 {
        return a1 + a2 + a3;
    }

    let a4 = a.ln() - (b + x - 1.0).ln() - (r + x) * (alpha + recency).ln();
    let max = a3.max(a4);
    a1 + a2 + max + ((a3 - max).exp() + (a4 - max).exp()).ln()
}

struct Likelihood<'a> {
    customers: &'a [(u32, f64, f64)],
    penalizer_coef: f64,
}

impl Objective for Likelihood<'_> {
    fn dimension(&self) -> usize {
        4
    }

    fn value(&self, theta: &Array1<f64>) -> f64 {
        let params = BgNbdParameters::from_log(theta, 1.0);
        let total: f64 = self
            .customers
            .iter()
            .map(|&(x, t_x, t)| log_likelihood(&params, x, t_x, t))
            .sum();
        let penalty = theta.iter().map(|v| v.exp().powi(2)).sum::<f64>();
        -total / self.customers.len() as f64 + self.penalizer_coef * penalty
    }
}

/// A fitted (or externally parameterised) BG/NBD model
#[derive(Debug, Clone, PartialEq)]
pub struct BgNbdModel {
    params: BgNbdParameters,
    report: Option<FitReport>,
}

impl BgNbdModel {
    /// Wrap known parameters without fitting
    pub fn from_parameters(params: BgNbdParameters) -> Self {
        Self {
            params,
            report: None,
        }
    }

    /// Fit `(r, alpha, a, b)` by penalised maximum likelihood.
    ///
    /// Customers with zero repeat purchases are excluded from the likelihood. Time is
    /// rescaled so that the oldest customer has `T = 10` while optimising, and `alpha`
    /// is mapped back to the caller's unit afterwards.
    pub fn fit(
        frequencies: &[u32],
        recencies: &[f64],
        ages: &[f64],
        options: &FitOptions,
    ) -> ModelResult<Self> {
        if frequencies.len() != recencies.len() || frequencies.len() != ages.len() {
            return Err(CltvError::invalid(
                "BG/NBD fit",
                format!(
                    "column lengths differ: {} frequencies, {} recencies, {} T values",
                    frequencies.len(),
                    recencies.len(),
                    ages.len()
                ),
            ));
        }
        if !options.penalizer_coef.is_finite() || options.penalizer_coef < 0.0 {
            return Err(CltvError::invalid(
                "BG/NBD fit",
                format!("penalizer must be non-negative, got {}", options.penalizer_coef),
            ));
        }
        for (i, (&recency, &age)) in recencies.iter().zip(ages).enumerate() {
            validate_timing(&format!("customer at row {i}"), recency, age)?;
        }

        let max_age = ages.iter().copied().fold(0.0, f64::max);
        let time_scale = if max_age > 0.0 { 10.0 / max_age } else { 1.0 };
        let customers: Vec<(u32, f64, f64)> = frequencies
            .iter()
            .zip(recencies.iter().zip(ages))
            .filter(|(x, _)| **x > 0)
            .map(|(&x, (&t_x, &t))| (x, t_x * time_scale, t * time_scale))
            .collect();

        let n_excluded = frequencies.len() - customers.len();
        if customers.is_empty() {
            return Err(CltvError::invalid(
                "BG/NBD fit",
                "no customer has a repeat transaction",
            ));
        }
        debug!(
            n_observations = customers.len(),
            n_excluded, time_scale, "fitting BG/NBD"
        );

        let objective = Likelihood {
            customers: &customers,
            penalizer_coef: options.penalizer_coef,
        };
        let start = options.initial_value.ln();
        let result = minimize(&objective, array![start, start, start, start], &options.optimizer);
        if !result.converged {
            return Err(CltvError::Convergence {
                model: MODEL_NAME,
                iterations: result.iterations,
                gradient_norm: result.gradient_norm,
            });
        }

        let params = BgNbdParameters::from_log(&result.x, time_scale);
        let report = FitReport {
            iterations: result.iterations,
            objective: result.value,
            gradient_norm: result.gradient_norm,
            n_observations: customers.len(),
            n_excluded,
        };
        info!(
            r = params.r,
            alpha = params.alpha,
            a = params.a,
            b = params.b,
            iterations = report.iterations,
            objective = report.objective,
            n_excluded,
            "BG/NBD fitted"
        );

        Ok(Self {
            params,
            report: Some(report),
        })
    }

    /// Fit on every row of a summary table
    pub fn fit_table(table: &SummaryTable, options: &FitOptions) -> ModelResult<Self> {
        Self::fit(&table.frequencies(), &table.recencies(), &table.ages(), options)
    }

    pub fn params(&self) -> &BgNbdParameters {
        &self.params
    }

    /// `None` when the model was built from known parameters
    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    /// Posterior probability that a customer with history `(x, t_x, T)` is still alive
    pub fn probability_alive(&self, frequency: u32, recency: f64, age: f64) -> f64 {
        if frequency == 0 {
            return 1.0;
        }
        let BgNbdParameters { r, alpha, a, b } = self.params;
        let x = f64::from(frequency);
        let log_odds =
            (r + x) * ((alpha + age) / (alpha + recency)).ln() + (a / (b + x - 1.0)).ln();
        1.0 / (1.0 + log_odds.exp())
    }

    /// Conditional expected number of purchases in the next `t` periods
    pub fn predict(&self, t: f64, frequency: u32, recency: f64, age: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        self.expected_purchases_while_alive(t, frequency, age)
            * self.probability_alive(frequency, recency, age)
    }

    /// Expected purchases of a newly acquired customer over `t` periods
    pub fn expected_purchases_new_customer(&self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        self.expected_purchases_while_alive(t, 0, 0.0)
    }

    /// Expected purchases over `t` for a customer known to be alive after `x` repeat
    /// purchases in `T`.
    ///
    /// Given alive, the rate posterior is Gamma(r + x, α + T) and the dropout
    /// probability posterior is Beta(a, b + x). A customer with dropout probability `p`
    /// makes `(1 - (1 + p·t/(α + T))^-(r + x)) / p` purchases in expectation; that is
    /// averaged over the Beta posterior.
    fn expected_purchases_while_alive(&self, t: f64, frequency: u32, age: f64) -> f64 {
        let BgNbdParameters { r, alpha, a, b } = self.params;
        let x = f64::from(frequency);
        let shape = r + x;
        let scaled_horizon = t / (alpha + age);

        beta_expectation(a, b + x, |p| {
            let y = p * scaled_horizon;
            if p == 0.0 || y < 1e-12 {
                shape * scaled_horizon
            } else {
                -(-shape * y.ln_1p()).exp_m1() / p
            }
        })
    }

    /// Unconditional probability that a customer observed for `t` periods makes exactly
    /// `x` repeat purchases
    pub fn probability_of_purchases(&self, t: f64, x: u32) -> f64 {
        let BgNbdParameters { r, alpha, a, b } = self.params;
        let xf = f64::from(x);
        let ln_beta_ab = ln_beta(a, b);
        let ln_stay = alpha.ln() - (alpha + t).ln();
        let step = t / (alpha + t);

        let ln_count = ln_gamma(r + xf) - ln_gamma(r) - ln_gamma(xf + 1.0)
            + r * ln_stay
            + if x > 0 { xf * step.ln() } else { 0.0 };
        let never_dropped = (ln_beta(a, b + xf) - ln_beta_ab + ln_count).exp();
        if x == 0 {
            return never_dropped;
        }

        // P(N(t) >= x) for the gamma-mixed Poisson count N(t)
        let mut term = (r * ln_stay).exp();
        let mut below = term;
        for j in 1..x {
            let j = f64::from(j);
            term *= (r + j - 1.0) / j * step;
            below += term;
        }
        let dropped = (ln_beta(a + 1.0, b + xf - 1.0) - ln_beta_ab).exp() * (1.0 - below).max(0.0);
        never_dropped + dropped
    }

    /// Expected number of customers with 0, 1, ... repeat purchases given each
    /// customer's observation length. The last bucket collects `max_frequency` and above.
    pub fn expected_frequency_counts(&self, ages: &[f64], max_frequency: u32) -> Vec<f64> {
        let mut counts = vec![0.0; max_frequency as usize + 1];
        for &age in ages {
            let mut below = 0.0;
            for x in 0..max_frequency {
                let probability = self.probability_of_purchases(age, x);
                counts[x as usize] += probability;
                below += probability;
            }
            counts[max_frequency as usize] += (1.0 - below).max(0.0);
        }
        counts
    }

    pub fn expected_purchases_batch(&self, t: f64, customers: &[CustomerSummary]) -> Array1<f64> {
        customers
            .iter()
            .map(|c| self.predict(t, c.frequency, c.recency, c.age))
            .collect()
    }

    pub fn probability_alive_batch(&self, customers: &[CustomerSummary]) -> Array1<f64> {
        customers
            .iter()
            .map(|c| self.probability_alive(c.frequency, c.recency, c.age))
            .collect()
    }
}
