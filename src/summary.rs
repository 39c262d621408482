//! Per-customer summary statistics consumed by the models

use crate::error::{CltvError, ModelResult};

/// One customer's (frequency, recency, T, monetary) tuple.
///
/// `recency` and `age` share a time unit (weeks in the CLI pipeline). `age` is the
/// customer's observation window, the usual `T` of the BG/NBD literature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomerSummary {
    /// Repeat transactions (distinct transactions minus one)
    pub frequency: u32,
    /// Time between first and last transaction
    pub recency: f64,
    /// Time between first transaction and the observation cutoff
    pub age: f64,
    /// Average transaction value
    pub monetary: f64,
}

impl CustomerSummary {
    /// Build a summary, checking `0 <= recency <= age`, `age > 0` and `monetary > 0`
    pub fn new(frequency: u32, recency: f64, age: f64, monetary: f64) -> ModelResult<Self> {
        let summary = Self {
            frequency,
            recency,
            age,
            monetary,
        };
        summary.validate("customer summary")?;
        Ok(summary)
    }

    pub(crate) fn validate(&self, context: &str) -> ModelResult<()> {
        validate_timing(context, self.recency, self.age)?;
        if !self.monetary.is_finite() || self.monetary <= 0.0 {
            return Err(CltvError::invalid(
                context,
                format!("monetary value must be positive, got {}", self.monetary),
            ));
        }
        Ok(())
    }

    /// Whether the customer has any repeat behaviour to learn from
    pub fn is_repeat(&self) -> bool {
        self.frequency > 0
    }
}

pub(crate) fn validate_timing(context: &str, recency: f64, age: f64) -> ModelResult<()> {
    if !age.is_finite() || age <= 0.0 {
        return Err(CltvError::invalid(
            context,
            format!("T must be positive, got {age}"),
        ));
    }
    if !recency.is_finite() || recency < 0.0 {
        return Err(CltvError::invalid(
            context,
            format!("recency must be non-negative, got {recency}"),
        ));
    }
    if recency > age {
        return Err(CltvError::invalid(
            context,
            format!("recency {recency} exceeds T {age}"),
        ));
    }
    Ok(())
}

/// Summaries keyed by customer identifier, in a stable order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryTable {
    pub customer_ids: Vec<i64>,
    pub summaries: Vec<CustomerSummary>,
}

impl SummaryTable {
    pub fn new(customer_ids: Vec<i64>, summaries: Vec<CustomerSummary>) -> ModelResult<Self> {
        if customer_ids.len() != summaries.len() {
            return Err(CltvError::invalid(
                "summary table",
                format!(
                    "{} customer ids for {} summaries",
                    customer_ids.len(),
                    summaries.len()
                ),
            ));
        }
        for (id, summary) in customer_ids.iter().zip(&summaries) {
            summary.validate(&format!("customer {id}"))?;
        }
        Ok(Self {
            customer_ids,
            summaries,
        })
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn frequencies(&self) -> Vec<u32> {
        self.summaries.iter().map(|s| s.frequency).collect()
    }

    pub fn recencies(&self) -> Vec<f64> {
        self.summaries.iter().map(|s| s.recency).collect()
    }

    pub fn ages(&self) -> Vec<f64> {
        self.summaries.iter().map(|s| s.age).collect()
    }

    pub fn monetary(&self) -> Vec<f64> {
        self.summaries.iter().map(|s| s.monetary).collect()
    }

    /// Rows with at least one repeat transaction
    pub fn repeat_customers(&self) -> SummaryTable {
        let (customer_ids, summaries) = self
            .customer_ids
            .iter()
            .zip(&self.summaries)
            .filter(|(_, s)| s.is_repeat())
            .map(|(id, s)| (*id, *s))
            .unzip();
        SummaryTable {
            customer_ids,
            summaries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_validation() {
        assert!(CustomerSummary::new(3, 5.0, 10.0, 42.0).is_ok());
        assert!(CustomerSummary::new(0, 0.0, 10.0, 42.0).is_ok());

        let err = CustomerSummary::new(2, 12.0, 10.0, 42.0).unwrap_err();
        assert!(matches!(err, CltvError::InvalidInput { .. }));
        assert!(CustomerSummary::new(2, -1.0, 10.0, 42.0).is_err());
        assert!(CustomerSummary::new(2, 1.0, 0.0, 42.0).is_err());
        assert!(CustomerSummary::new(2, 1.0, 10.0, 0.0).is_err());
        assert!(CustomerSummary::new(2, 1.0, 10.0, f64::NAN).is_err());
    }

    #[test]
    fn test_repeat_customers_filter() {
        let table = SummaryTable::new(
            vec![10, 11, 12],
            vec![
                CustomerSummary::new(1, 5.0, 10.0, 20.0).unwrap(),
                CustomerSummary::new(0, 0.0, 10.0, 15.0).unwrap(),
                CustomerSummary::new(4, 9.0, 10.0, 30.0).unwrap(),
            ],
        )
        .unwrap();

        let repeat = table.repeat_customers();
        assert_eq!(repeat.customer_ids, vec![10, 12]);
        assert_eq!(repeat.frequencies(), vec![1, 4]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_table_rejects_mismatched_lengths() {
        let result = SummaryTable::new(vec![1, 2], vec![CustomerSummary::new(1, 1.0, 2.0, 3.0).unwrap()]);
        assert!(result.is_err());
    }
}
