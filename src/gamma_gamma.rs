//! Gamma-Gamma monetary-value model
//!
//! Each transaction value is Gamma(p, ν) with a customer-specific rate ν ~ Gamma(q, v).
//! The model assumes spend per transaction is independent of purchase frequency; that
//! is a precondition on the input, checked only by the correlation diagnostic below.

use ndarray::{array, Array1};
use tracing::{debug, info, warn};

use crate::error::{CltvError, ModelResult};
use crate::optimize::{minimize, FitOptions, FitReport, Objective};
use crate::special::ln_gamma;
use crate::summary::CustomerSummary;

const MODEL_NAME: &str = "Gamma-Gamma";
const CORRELATION_WARNING: f64 = 0.3;

/// Fitted `(p, q, v)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GammaGammaParameters {
    pub p: f64,
    pub q: f64,
    pub v: f64,
}

impl GammaGammaParameters {
    pub fn new(p: f64, q: f64, v: f64) -> ModelResult<Self> {
        for (name, value) in [("p", p), ("q", q), ("v", v)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(CltvError::invalid(
                    "Gamma-Gamma parameters",
                    format!("{name} must be positive, got {value}"),
                ));
            }
        }
        Ok(Self { p, q, v })
    }

    fn from_log(theta: &Array1<f64>) -> Self {
        Self {
            p: theta[0].exp(),
            q: theta[1].exp(),
            v: theta[2].exp(),
        }
    }
}

/// Log-likelihood of one customer's average spend `monetary` over `frequency` transactions
pub fn log_likelihood(params: &GammaGammaParameters, frequency: u32, monetary: f64) -> f64 {
    let GammaGammaParameters { p, q, v } = *params;
    let x = f64::from(frequency);
    let px = p * x;

    ln_gamma(px + q) - ln_gamma(px) - ln_gamma(q) + q * v.ln() + (px - 1.0) * monetary.ln()
        + px * x.ln()
        - (px + q) * (x * monetary + v).ln()
}

struct Likelihood<'a> {
    frequencies: &'a [u32],
    monetary: &'a [f64],
    penalizer_coef: f64,
}

impl Objective for Likelihood<'_> {
    fn dimension(&self) -> usize {
        3
    }

    fn value(&self, theta: &Array1<f64>) -> f64 {
        let params = GammaGammaParameters::from_log(theta);
        let total: f64 = self
            .frequencies
            .iter()
            .zip(self.monetary)
            .map(|(&x, &m)| log_likelihood(&params, x, m))
            .sum();
        let penalty = theta.iter().map(|v| v.exp().powi(2)).sum::<f64>();
        -total / self.frequencies.len() as f64 + self.penalizer_coef * penalty
    }
}

/// Pearson correlation between frequency and average spend.
///
/// `None` when either column is constant or there are fewer than two customers.
pub fn frequency_monetary_correlation(frequencies: &[u32], monetary: &[f64]) -> Option<f64> {
    let n = frequencies.len().min(monetary.len());
    if n < 2 {
        return None;
    }
    let xs: Vec<f64> = frequencies[..n].iter().map(|&f| f64::from(f)).collect();
    let ys = &monetary[..n];
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

/// A fitted (or externally parameterised) Gamma-Gamma model
#[derive(Debug, Clone, PartialEq)]
pub struct GammaGammaModel {
    params: GammaGammaParameters,
    report: Option<FitReport>,
}

impl GammaGammaModel {
    pub fn from_parameters(params: GammaGammaParameters) -> Self {
        Self {
            params,
            report: None,
        }
    }

    /// Fit `(p, q, v)` by penalised maximum likelihood.
    ///
    /// Only repeat customers may be passed: a zero frequency carries no monetary signal
    /// and is rejected rather than silently skipped.
    pub fn fit(frequencies: &[u32], monetary: &[f64], options: &FitOptions) -> ModelResult<Self> {
        if frequencies.len() != monetary.len() {
            return Err(CltvError::invalid(
                "Gamma-Gamma fit",
                format!(
                    "{} frequencies for {} monetary values",
                    frequencies.len(),
                    monetary.len()
                ),
            ));
        }
        if frequencies.is_empty() {
            return Err(CltvError::invalid("Gamma-Gamma fit", "no customers to fit"));
        }
        if !options.penalizer_coef.is_finite() || options.penalizer_coef < 0.0 {
            return Err(CltvError::invalid(
                "Gamma-Gamma fit",
                format!("penalizer must be non-negative, got {}", options.penalizer_coef),
            ));
        }
        for (i, (&x, &m)) in frequencies.iter().zip(monetary).enumerate() {
            if x == 0 {
                return Err(CltvError::invalid(
                    format!("customer at row {i}"),
                    "zero-frequency customers must be excluded before fitting",
                ));
            }
            if !m.is_finite() || m <= 0.0 {
                return Err(CltvError::invalid(
                    format!("customer at row {i}"),
                    format!("monetary value must be positive, got {m}"),
                ));
            }
        }

        if let Some(rho) = frequency_monetary_correlation(frequencies, monetary) {
            if rho.abs() >= CORRELATION_WARNING {
                warn!(correlation = rho, "frequency and monetary value look dependent");
            } else {
                debug!(correlation = rho, "frequency/monetary correlation");
            }
        }

        let objective = Likelihood {
            frequencies,
            monetary,
            penalizer_coef: options.penalizer_coef,
        };
        let start = options.initial_value.ln();
        let result = minimize(&objective, array![start, start, start], &options.optimizer);
        if !result.converged {
            return Err(CltvError::Convergence {
                model: MODEL_NAME,
                iterations: result.iterations,
                gradient_norm: result.gradient_norm,
            });
        }

        let params = GammaGammaParameters::from_log(&result.x);
        let report = FitReport {
            iterations: result.iterations,
            objective: result.value,
            gradient_norm: result.gradient_norm,
            n_observations: frequencies.len(),
            n_excluded: 0,
        };
        info!(
            p = params.p,
            q = params.q,
            v = params.v,
            iterations = report.iterations,
            objective = report.objective,
            "Gamma-Gamma fitted"
        );

        Ok(Self {
            params,
            report: Some(report),
        })
    }

    /// Fit on the repeat customers among `customers`
    pub fn fit_summaries(customers: &[CustomerSummary], options: &FitOptions) -> ModelResult<Self> {
        let (frequencies, monetary): (Vec<u32>, Vec<f64>) = customers
            .iter()
            .filter(|c| c.is_repeat())
            .map(|c| (c.frequency, c.monetary))
            .unzip();
        Self::fit(&frequencies, &monetary, options)
    }

    pub fn params(&self) -> &GammaGammaParameters {
        &self.params
    }

    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    /// Mean spend per transaction across the population, `p·v / (q - 1)`
    pub fn population_mean(&self) -> ModelResult<f64> {
        let GammaGammaParameters { p, q, v } = self.params;
        if q <= 1.0 {
            return Err(CltvError::DegenerateParameter {
                parameter: "q",
                value: q,
                reason: "population mean spend requires q > 1",
            });
        }
        Ok(p * v / (q - 1.0))
    }

    /// Expected average spend per future transaction, shrunk from the customer's own
    /// average towards the population mean. The customer's weight grows with frequency.
    pub fn conditional_expected_average_profit(
        &self,
        frequency: u32,
        monetary: f64,
    ) -> ModelResult<f64> {
        let population_mean = self.population_mean()?;
        let GammaGammaParameters { p, q, .. } = self.params;
        let px = p * f64::from(frequency);
        let weight = px / (px + q - 1.0);
        Ok((1.0 - weight) * population_mean + weight * monetary)
    }

    pub fn conditional_expected_average_profit_batch(
        &self,
        customers: &[CustomerSummary],
    ) -> ModelResult<Array1<f64>> {
        customers
            .iter()
            .map(|c| self.conditional_expected_average_profit(c.frequency, c.monetary))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model(p: f64, q: f64, v: f64) -> GammaGammaModel {
        GammaGammaModel::from_parameters(GammaGammaParameters::new(p, q, v).unwrap())
    }

    fn spenders() -> (Vec<u32>, Vec<f64>) {
        let frequencies: Vec<u32> = (0..40).map(|i| 1 + (i * 5) % 7).collect();
        let monetary: Vec<f64> = (0..40)
            .map(|i| 4.0 + f64::from((i * 13) % 17) * 0.75)
            .collect();
        (frequencies, monetary)
    }

    #[test]
    fn test_log_likelihood_unit_parameters() {
        let params = GammaGammaParameters::new(1.0, 1.0, 1.0).unwrap();
        assert_relative_eq!(log_likelihood(&params, 1, 2.0), -2.0 * 3.0_f64.ln(), epsilon = 1e-10);
    }

    #[test]
    fn test_expected_profit_lies_between_prior_and_history() {
        // p·v / (q - 1) = 50
        let gg = model(1.0, 3.0, 100.0);
        assert_relative_eq!(gg.population_mean().unwrap(), 50.0);

        let value = gg.conditional_expected_average_profit(3, 100.0).unwrap();
        assert!(value > 50.0 && value < 100.0, "got {value}");
        assert_relative_eq!(value, 80.0, epsilon = 1e-12);
    }

    #[test]
    fn test_weight_follows_frequency() {
        let gg = model(2.0, 4.0, 30.0);
        let mean = gg.population_mean().unwrap();

        let rare = gg.conditional_expected_average_profit(1, 200.0).unwrap();
        let frequent = gg.conditional_expected_average_profit(500, 200.0).unwrap();
        assert!(rare > mean && rare < 200.0);
        assert!(frequent > rare && frequent < 200.0);
        assert!((200.0 - frequent) < 1.0);

        let no_history = gg.conditional_expected_average_profit(0, 200.0).unwrap();
        assert_relative_eq!(no_history, mean);
    }

    #[test]
    fn test_degenerate_q() {
        let gg = model(2.0, 0.9, 30.0);
        let err = gg.conditional_expected_average_profit(3, 10.0).unwrap_err();
        assert!(matches!(err, CltvError::DegenerateParameter { parameter: "q", .. }));
        assert!(model(2.0, 1.0, 30.0).population_mean().is_err());
    }

    #[test]
    fn test_fit_converges_deterministically() {
        let (frequencies, monetary) = spenders();
        let options = FitOptions::with_penalizer(0.01);
        let first = GammaGammaModel::fit(&frequencies, &monetary, &options).unwrap();
        let second = GammaGammaModel::fit(&frequencies, &monetary, &options).unwrap();

        assert_eq!(first.report().unwrap().n_observations, 40);
        assert_relative_eq!(first.params().p, second.params().p, max_relative = 1e-12);
        assert_relative_eq!(first.params().q, second.params().q, max_relative = 1e-12);
        assert_relative_eq!(first.params().v, second.params().v, max_relative = 1e-12);
    }

    #[test]
    fn test_fit_rejects_invalid_input() {
        let err = GammaGammaModel::fit(&[1, 2], &[10.0, -3.0], &FitOptions::default()).unwrap_err();
        assert!(matches!(err, CltvError::InvalidInput { .. }));
        assert!(err.to_string().contains("row 1"));

        assert!(GammaGammaModel::fit(&[0, 2], &[10.0, 3.0], &FitOptions::default()).is_err());
        assert!(GammaGammaModel::fit(&[], &[], &FitOptions::default()).is_err());
        assert!(GammaGammaModel::fit(&[1], &[1.0, 2.0], &FitOptions::default()).is_err());
    }

    #[test]
    fn test_fit_summaries_skips_one_time_buyers() {
        let (frequencies, monetary) = spenders();
        let mut customers: Vec<CustomerSummary> = frequencies
            .iter()
            .zip(&monetary)
            .map(|(&f, &m)| CustomerSummary::new(f, 1.0, 10.0, m).unwrap())
            .collect();
        customers.push(CustomerSummary::new(0, 0.0, 10.0, 999.0).unwrap());

        let options = FitOptions::with_penalizer(0.01);
        let from_summaries = GammaGammaModel::fit_summaries(&customers, &options).unwrap();
        let direct = GammaGammaModel::fit(&frequencies, &monetary, &options).unwrap();
        assert_eq!(from_summaries.params(), direct.params());
    }

    #[test]
    fn test_correlation_diagnostic() {
        let rho = frequency_monetary_correlation(&[1, 2, 3, 4], &[10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_relative_eq!(rho, 1.0, epsilon = 1e-12);
        assert!(frequency_monetary_correlation(&[1, 1, 1], &[1.0, 2.0, 3.0]).is_none());
        assert!(frequency_monetary_correlation(&[1], &[1.0]).is_none());
    }
}
