//! Scored customer table and its CSV / console output

use std::fs::File;

use anyhow::Context;
use polars::prelude::*;

use crate::bgnbd::BgNbdModel;
use crate::cltv::CltvCalculator;
use crate::gamma_gamma::GammaGammaModel;
use crate::optimize::FitOptions;
use crate::segment::{segment, Segment, Segmentation};
use crate::summary::{CustomerSummary, SummaryTable};

/// One scored customer
#[derive(Debug, Clone, PartialEq)]
pub struct CltvRow {
    pub customer_id: i64,
    pub summary: CustomerSummary,
    /// Expected transactions over the CLV horizon
    pub expected_purchases: f64,
    pub expected_average_value: f64,
    pub clv: f64,
    pub segment: Segment,
}

/// Scores, segments and horizon label for a whole customer table
#[derive(Debug, Clone)]
pub struct CltvReport {
    pub rows: Vec<CltvRow>,
    pub segmentation: Segmentation,
    /// Horizon in model time units, used to name the purchases column
    pub horizon: f64,
}

impl CltvReport {
    /// Score every customer and assign `num_tiers` quantile tiers by CLV
    pub fn build(
        table: &SummaryTable,
        bgnbd: &BgNbdModel,
        gamma_gamma: &GammaGammaModel,
        calculator: &CltvCalculator,
        num_tiers: usize,
    ) -> crate::Result<Self> {
        let results = calculator.compute_batch(bgnbd, gamma_gamma, &table.summaries)?;
        let scores: Vec<f64> = results.iter().map(|r| r.present_value).collect();
        let segmentation = segment(&scores, num_tiers)?;

        let rows = table
            .customer_ids
            .iter()
            .zip(&table.summaries)
            .zip(results.iter().zip(&segmentation.segments))
            .map(|((&customer_id, &summary), (result, &segment))| CltvRow {
                customer_id,
                summary,
                expected_purchases: result.expected_transactions,
                expected_average_value: result.expected_average_value,
                clv: result.present_value,
                segment,
            })
            .collect();

        Ok(Self {
            rows,
            segmentation,
            horizon: calculator.horizon_in_model_units(),
        })
    }

    pub fn scores(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.clv).collect()
    }

    pub fn purchases_column_name(&self) -> String {
        let horizon = format!("{:.3}", self.horizon);
        let horizon = horizon.trim_end_matches('0').trim_end_matches('.');
        format!("expected_purchases_{horizon}")
    }

    /// Rows sorted by CLV, highest first
    pub fn ranked(&self) -> Vec<&CltvRow> {
        let mut rows: Vec<&CltvRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| b.clv.total_cmp(&a.clv));
        rows
    }

    /// Rows sorted by expected average value per transaction, highest first
    pub fn ranked_by_average_value(&self) -> Vec<&CltvRow> {
        let mut rows: Vec<&CltvRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| b.expected_average_value.total_cmp(&a.expected_average_value));
        rows
    }

    pub fn to_dataframe(&self) -> crate::Result<DataFrame> {
        let purchases_column = self.purchases_column_name();
        let df = df!(
            "customer_id" => self.rows.iter().map(|r| r.customer_id).collect::<Vec<i64>>(),
            "frequency" => self.rows.iter().map(|r| i64::from(r.summary.frequency)).collect::<Vec<i64>>(),
            "recency" => self.rows.iter().map(|r| r.summary.recency).collect::<Vec<f64>>(),
            "T" => self.rows.iter().map(|r| r.summary.age).collect::<Vec<f64>>(),
            "monetary" => self.rows.iter().map(|r| r.summary.monetary).collect::<Vec<f64>>(),
            purchases_column.as_str() => self.rows.iter().map(|r| r.expected_purchases).collect::<Vec<f64>>(),
            "expected_average_value" => self.rows.iter().map(|r| r.expected_average_value).collect::<Vec<f64>>(),
            "clv" => self.scores(),
            "segment" => self.rows.iter().map(|r| r.segment.label()).collect::<Vec<String>>()
        )?;
        Ok(df)
    }

    /// Write the scored table as CSV
    pub fn write_csv(&self, output_path: &str) -> crate::Result<()> {
        let mut df = self.to_dataframe()?;
        let mut file = File::create(output_path)
            .with_context(|| format!("failed to create {output_path}"))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut df)
            .with_context(|| format!("failed to write {output_path}"))?;
        Ok(())
    }

    /// Print count, mean and sum of CLV per tier
    pub fn print_segment_table(&self) {
        println!("\n=== Segments by CLV ===");
        println!("  Segment | Count |       Mean |          Sum");
        println!("  --------|-------|------------|-------------");
        for tier in self.segmentation.summarize(&self.scores()) {
            println!(
                "  {:>7} | {:5} | {:10.2} | {:12.2}",
                tier.segment.label(),
                tier.count,
                tier.mean,
                tier.sum
            );
        }
    }

    /// Print the `top_n` customers by CLV
    pub fn print_top_customers(&self, top_n: usize) {
        println!("\n=== Top {} customers by CLV ===", top_n);
        println!("  Customer | Segment | Exp. purchases | Exp. avg value |        CLV");
        for row in self.ranked().into_iter().take(top_n) {
            println!(
                "  {:8} | {:>7} | {:14.3} | {:14.2} | {:10.2}",
                row.customer_id,
                row.segment.label(),
                row.expected_purchases,
                row.expected_average_value,
                row.clv
            );
        }
    }

    /// Print the `top_n` customers by expected average value per transaction
    pub fn print_top_by_average_value(&self, top_n: usize) {
        println!("\n=== Top {} customers by expected average value ===", top_n);
        println!("  Customer | Frequency |   Monetary | Exp. avg value");
        for row in self.ranked_by_average_value().into_iter().take(top_n) {
            println!(
                "  {:8} | {:9} | {:10.2} | {:14.2}",
                row.customer_id, row.summary.frequency, row.summary.monetary, row.expected_average_value
            );
        }
    }
}

/// Fit BG/NBD on every customer and Gamma-Gamma on the repeat customers.
///
/// The Gamma-Gamma fit must leave a finite population mean spend (`q > 1`); otherwise
/// the error names the penalizer so the caller can refit with a smaller one.
pub fn fit_models(
    table: &SummaryTable,
    bgnbd_options: &FitOptions,
    gamma_gamma_options: &FitOptions,
) -> crate::Result<(BgNbdModel, GammaGammaModel)> {
    let bgnbd = BgNbdModel::fit_table(table, bgnbd_options).with_context(|| {
        format!("BG/NBD fit failed with penalizer {}", bgnbd_options.penalizer_coef)
    })?;
    let gamma_gamma = GammaGammaModel::fit_summaries(&table.summaries, gamma_gamma_options)
        .with_context(|| {
            format!(
                "Gamma-Gamma fit failed with penalizer {}",
                gamma_gamma_options.penalizer_coef
            )
        })?;
    ensure_finite_mean_spend(&gamma_gamma, gamma_gamma_options.penalizer_coef)?;
    Ok((bgnbd, gamma_gamma))
}

fn ensure_finite_mean_spend(gamma_gamma: &GammaGammaModel, penalizer: f64) -> crate::Result<f64> {
    let mean = gamma_gamma.population_mean().with_context(|| {
        format!(
            "Gamma-Gamma fit with penalizer {penalizer} has no finite mean spend; \
             refit with a smaller penalizer"
        )
    })?;
    Ok(mean)
}

/// Top `top_n` customers by expected purchases over `horizon`, plus the total over all
pub fn top_expected_purchases(
    bgnbd: &BgNbdModel,
    table: &SummaryTable,
    horizon: f64,
    top_n: usize,
) -> (Vec<(i64, f64)>, f64) {
    let expected = bgnbd.expected_purchases_batch(horizon, &table.summaries);
    let total = expected.sum();
    let mut ranked: Vec<(i64, f64)> = table
        .customer_ids
        .iter()
        .copied()
        .zip(expected.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_n);
    (ranked, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgnbd::BgNbdParameters;
    use crate::cltv::PeriodUnit;
    use crate::error::CltvError;
    use crate::gamma_gamma::GammaGammaParameters;
    use tempfile::tempdir;

    fn scored_report() -> CltvReport {
        let summaries: Vec<CustomerSummary> = (0..8u32)
            .map(|i| {
                CustomerSummary::new(1 + i, 2.0 + f64::from(i) * 3.0, 30.0, 10.0 + f64::from(i) * 5.0)
                    .unwrap()
            })
            .collect();
        let table = SummaryTable::new((100..108).collect(), summaries).unwrap();
        let bgnbd = BgNbdModel::from_parameters(BgNbdParameters::new(0.24, 4.41, 0.79, 2.43).unwrap());
        let gg = GammaGammaModel::from_parameters(GammaGammaParameters::new(6.25, 3.74, 15.44).unwrap());
        let calc = CltvCalculator::new(3, PeriodUnit::Week, 0.01).unwrap();
        CltvReport::build(&table, &bgnbd, &gg, &calc, 4).unwrap()
    }

    #[test]
    fn test_build_assigns_every_customer() {
        let report = scored_report();
        assert_eq!(report.rows.len(), 8);
        assert_eq!(report.segmentation.sizes(), vec![2, 2, 2, 2]);

        let ranked = report.ranked();
        assert_eq!(ranked[0].segment.label(), "A");
        assert_eq!(ranked[7].segment.label(), "D");
        assert!(ranked[0].clv >= ranked[1].clv);
    }

    #[test]
    fn test_purchases_column_name() {
        let report = scored_report();
        assert_eq!(report.purchases_column_name(), "expected_purchases_13.035");
    }

    #[test]
    fn test_write_csv() {
        let report = scored_report();
        let dir = tempdir().unwrap();
        let path = dir.path().join("cltv.csv");
        report.write_csv(path.to_str().unwrap()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap();
        assert_eq!(
            header,
            "customer_id,frequency,recency,T,monetary,expected_purchases_13.035,expected_average_value,clv,segment"
        );
        assert_eq!(content.lines().count(), 9);
    }

    #[test]
    fn test_ranked_by_average_value() {
        let report = scored_report();
        let ranked = report.ranked_by_average_value();
        assert_eq!(ranked.len(), 8);
        assert!(ranked
            .windows(2)
            .all(|w| w[0].expected_average_value >= w[1].expected_average_value));
        // Highest frequency and highest monetary value
        assert_eq!(ranked[0].customer_id, 107);
    }

    #[test]
    fn test_degenerate_spend_model_names_penalizer() {
        let gg = GammaGammaModel::from_parameters(GammaGammaParameters::new(2.0, 0.9, 30.0).unwrap());
        let err = ensure_finite_mean_spend(&gg, 0.01).unwrap_err();

        assert!(err.to_string().contains("penalizer 0.01"), "{err}");
        assert!(matches!(
            err.downcast_ref::<CltvError>(),
            Some(CltvError::DegenerateParameter { parameter: "q", .. })
        ));

        let gg = GammaGammaModel::from_parameters(GammaGammaParameters::new(1.0, 3.0, 100.0).unwrap());
        assert_eq!(ensure_finite_mean_spend(&gg, 0.01).unwrap(), 50.0);
    }

    #[test]
    fn test_top_expected_purchases() {
        let report = scored_report();
        let table = SummaryTable::new(
            report.rows.iter().map(|r| r.customer_id).collect(),
            report.rows.iter().map(|r| r.summary).collect(),
        )
        .unwrap();
        let bgnbd = BgNbdModel::from_parameters(BgNbdParameters::new(0.24, 4.41, 0.79, 2.43).unwrap());

        let (top, total) = top_expected_purchases(&bgnbd, &table, 4.0, 3);
        assert_eq!(top.len(), 3);
        assert!(top[0].1 >= top[1].1 && top[1].1 >= top[2].1);
        assert!(total >= top.iter().map(|(_, v)| v).sum::<f64>());
    }
}
