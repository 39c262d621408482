//! Discounted customer lifetime value from the two fitted models

use std::fmt;
use std::str::FromStr;

use crate::bgnbd::BgNbdModel;
use crate::error::{CltvError, ModelResult};
use crate::gamma_gamma::GammaGammaModel;
use crate::summary::CustomerSummary;

/// Time unit of `recency` and `T`. Discounting always happens per month, so each unit
/// maps to a fixed number of model periods per month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodUnit {
    Hour,
    Day,
    #[default]
    Week,
    Month,
}

impl PeriodUnit {
    /// Model time units in one discounting period (one month)
    pub fn periods_per_month(self) -> f64 {
        match self {
            PeriodUnit::Hour => 30.0 * 24.0,
            PeriodUnit::Day => 30.0,
            PeriodUnit::Week => 4.345,
            PeriodUnit::Month => 1.0,
        }
    }

    /// Model time units in one week
    pub fn periods_per_week(self) -> f64 {
        match self {
            PeriodUnit::Hour => 7.0 * 24.0,
            PeriodUnit::Day => 7.0,
            PeriodUnit::Week => 1.0,
            PeriodUnit::Month => 1.0 / PeriodUnit::Week.periods_per_month(),
        }
    }
}

impl FromStr for PeriodUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h" | "hour" | "hours" => Ok(PeriodUnit::Hour),
            "d" | "day" | "days" => Ok(PeriodUnit::Day),
            "w" | "week" | "weeks" => Ok(PeriodUnit::Week),
            "m" | "month" | "months" => Ok(PeriodUnit::Month),
            other => Err(format!("unknown period unit '{other}' (expected hour, day, week or month)")),
        }
    }
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeriodUnit::Hour => "hour",
            PeriodUnit::Day => "day",
            PeriodUnit::Week => "week",
            PeriodUnit::Month => "month",
        };
        f.write_str(name)
    }
}

/// Value estimate for one customer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CltvResult {
    /// Expected transactions over the whole horizon
    pub expected_transactions: f64,
    pub expected_average_value: f64,
    pub present_value: f64,
}

/// Horizon, unit and discount rate shared by every customer in a scoring run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CltvCalculator {
    horizon_periods: u32,
    period_unit: PeriodUnit,
    discount_rate: f64,
}

impl CltvCalculator {
    /// `horizon_periods` months ahead, discounted at `discount_rate` per month
    pub fn new(horizon_periods: u32, period_unit: PeriodUnit, discount_rate: f64) -> ModelResult<Self> {
        if horizon_periods == 0 {
            return Err(CltvError::invalid(
                "CLV horizon",
                "horizon must cover at least one period",
            ));
        }
        if !discount_rate.is_finite() || discount_rate < 0.0 {
            return Err(CltvError::invalid(
                "CLV discount rate",
                format!("discount rate must be non-negative, got {discount_rate}"),
            ));
        }
        Ok(Self {
            horizon_periods,
            period_unit,
            discount_rate,
        })
    }

    pub fn horizon_periods(&self) -> u32 {
        self.horizon_periods
    }

    pub fn period_unit(&self) -> PeriodUnit {
        self.period_unit
    }

    pub fn discount_rate(&self) -> f64 {
        self.discount_rate
    }

    /// Horizon expressed in model time units
    pub fn horizon_in_model_units(&self) -> f64 {
        f64::from(self.horizon_periods) * self.period_unit.periods_per_month()
    }

    /// Expected transactions falling in each discounting period, never negative
    pub fn expected_transactions_by_period(
        &self,
        bgnbd: &BgNbdModel,
        customer: &CustomerSummary,
    ) -> Vec<f64> {
        let factor = self.period_unit.periods_per_month();
        let mut previous = 0.0;
        (1..=self.horizon_periods)
            .map(|i| {
                let boundary = f64::from(i) * factor;
                let cumulative =
                    bgnbd.predict(boundary, customer.frequency, customer.recency, customer.age);
                let increment = (cumulative - previous).max(0.0);
                previous = previous.max(cumulative);
                increment
            })
            .collect()
    }

    /// Present value of the customer's expected spend over the horizon
    pub fn compute(
        &self,
        bgnbd: &BgNbdModel,
        gamma_gamma: &GammaGammaModel,
        customer: &CustomerSummary,
    ) -> ModelResult<CltvResult> {
        let expected_average_value =
            gamma_gamma.conditional_expected_average_profit(customer.frequency, customer.monetary)?;
        let increments = self.expected_transactions_by_period(bgnbd, customer);

        let present_value = increments
            .iter()
            .enumerate()
            .map(|(i, &transactions)| {
                let discount = (1.0 + self.discount_rate).powi(i as i32 + 1);
                transactions * expected_average_value / discount
            })
            .sum::<f64>()
            .max(0.0);

        Ok(CltvResult {
            expected_transactions: increments.iter().sum(),
            expected_average_value,
            present_value,
        })
    }

    pub fn compute_batch(
        &self,
        bgnbd: &BgNbdModel,
        gamma_gamma: &GammaGammaModel,
        customers: &[CustomerSummary],
    ) -> ModelResult<Vec<CltvResult>> {
        customers
            .iter()
            .map(|customer| self.compute(bgnbd, gamma_gamma, customer))
            .collect()
    }
}

/// One-shot CLV for a single customer
pub fn compute(
    bgnbd: &BgNbdModel,
    gamma_gamma: &GammaGammaModel,
    customer: &CustomerSummary,
    horizon_periods: u32,
    period_unit: PeriodUnit,
    discount_rate: f64,
) -> ModelResult<CltvResult> {
    CltvCalculator::new(horizon_periods, period_unit, discount_rate)?.compute(bgnbd, gamma_gamma, customer)
}
