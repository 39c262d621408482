//! Special functions needed by the likelihoods and conditional expectations

use std::f64::consts::PI;

/// Tail terms are dropped once their log-weight falls this far below the peak
const TAIL_LOG_CUTOFF: f64 = 50.0;
/// Trapezoid step for a Beta density of unit concentration
const BASE_STEP: f64 = 1.0 / 32.0;
const MAX_NODES_PER_SIDE: i64 = 200_000;

/// Natural log of the gamma function using the Lanczos approximation (g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula
        PI.ln() - (PI * x).sin().abs().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = COEFFS[0];
        for (i, &coeff) in COEFFS.iter().enumerate().skip(1) {
            acc += coeff / (x + i as f64);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + acc.ln() + (x + 0.5) * t.ln() - t
    }
}

/// Natural log of the beta function
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// `ln(1 + e^y)` without overflow
fn softplus(y: f64) -> f64 {
    y.max(0.0) + (-y.abs()).exp().ln_1p()
}

/// `E[g(P)]` for `P ~ Beta(alpha, beta)`.
///
/// Trapezoid rule after the double-exponential substitution `p = σ(π sinh u)`, which
/// clusters nodes at both ends so that small shape parameters (integrable
/// singularities at 0 or 1) are handled without special cases. Node weights are built in
/// log space, so `g` may be evaluated at `p` values that underflow to zero; it must stay
/// finite there. The nodes do not depend on `g`, so a `g` that grows pointwise in some
/// argument yields an expectation that grows in that argument too.
pub fn beta_expectation<F>(alpha: f64, beta: f64, g: F) -> f64
where
    F: Fn(f64) -> f64,
{
    // Spread of ln P shrinks like 1/sqrt(concentration), so the step shrinks with it
    let concentration = alpha * beta / (alpha + beta);
    let step = BASE_STEP / (1.0 + concentration.sqrt());
    let ln_norm = ln_beta(alpha, beta);

    // (log-weight, p) at node k
    let node = |k: i64| {
        let u = k as f64 * step;
        let v = PI * u.sinh();
        let ln_p = -softplus(-v);
        let ln_q = -softplus(v);
        let ln_weight = alpha * ln_p + beta * ln_q - ln_norm + (PI * u.cosh()).ln() + step.ln();
        (ln_weight, ln_p.exp())
    };

    let (ln_weight, p) = node(0);
    let mut total = ln_weight.exp() * g(p);
    let mut peak = ln_weight;
    for direction in [-1_i64, 1] {
        let mut previous = ln_weight;
        for k in 1..=MAX_NODES_PER_SIDE {
            let (ln_weight, p) = node(direction * k);
            total += ln_weight.exp() * g(p);
            peak = peak.max(ln_weight);
            if ln_weight < previous && ln_weight < peak - TAIL_LOG_CUTOFF {
                break;
            }
            previous = ln_weight;
        }
    }
    total
}
