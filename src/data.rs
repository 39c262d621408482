//! Transaction loading, cleaning and per-customer aggregation using Polars

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use polars::prelude::*;
use tracing::{info, warn};

use crate::summary::{CustomerSummary, SummaryTable};

const INVOICE: &str = "Invoice";
const QUANTITY: &str = "Quantity";
const INVOICE_DATE: &str = "InvoiceDate";
const PRICE: &str = "Price";
const CUSTOMER_ID: &str = "Customer ID";
const TOTAL_PRICE: &str = "TotalPrice";

const MS_PER_DAY: i64 = 86_400_000;
const DAYS_PER_WEEK: f64 = 7.0;

/// How raw transactions are cleaned and aggregated
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningOptions {
    /// Cutoff date (`YYYY-MM-DD`) used to compute each customer's T
    pub analysis_date: String,
    /// `strftime` format of the `InvoiceDate` column
    pub date_format: String,
    /// Lower quantile for outlier thresholds
    pub lower_quantile: f64,
    /// Upper quantile for outlier thresholds
    pub upper_quantile: f64,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            analysis_date: "2011-12-11".to_string(),
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            lower_quantile: 0.01,
            upper_quantile: 0.99,
        }
    }
}

/// Linearly interpolated quantile of already sorted values
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Outlier limits `(low, up)` from the configured quantiles, widened by 1.5 × the
/// inter-quantile range
pub fn outlier_thresholds(values: &[f64], lower_q: f64, upper_q: f64) -> Option<(f64, f64)> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, lower_q)?;
    let q3 = quantile(&sorted, upper_q)?;
    let range = q3 - q1;
    Some((q1 - 1.5 * range, q3 + 1.5 * range))
}

fn capped(name: &str, low: f64, up: f64) -> Expr {
    when(col(name).lt(lit(low)))
        .then(lit(low))
        .when(col(name).gt(lit(up)))
        .then(lit(up))
        .otherwise(col(name))
        .alias(name)
}

fn f64_column(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = df
        .column(name)?
        .cast(&DataType::Float64)
        .with_context(|| format!("column {name} is not numeric"))?;
    Ok(series.f64()?.into_no_null_iter().collect())
}

fn i64_column(df: &DataFrame, name: &str) -> crate::Result<Vec<i64>> {
    let series = df
        .column(name)?
        .cast(&DataType::Int64)
        .with_context(|| format!("column {name} is not an integer"))?;
    Ok(series.i64()?.into_no_null_iter().collect())
}

/// Load a transaction CSV and aggregate it into per-customer summaries
///
/// # Arguments
/// * `file_path` - CSV with `Invoice, Quantity, InvoiceDate, Price, Customer ID` columns
/// * `options` - cleaning thresholds, date format and analysis date
///
/// # Returns
/// * `SummaryTable` of repeat customers with recency and T in weeks
pub fn load_transactions(file_path: &str, options: &CleaningOptions) -> crate::Result<SummaryTable> {
    let analysis_date = NaiveDate::parse_from_str(&options.analysis_date, "%Y-%m-%d")
        .with_context(|| format!("invalid analysis date '{}'", options.analysis_date))?;
    let cutoff_ms = analysis_date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();

    // Read everything as text so invoice numbers and ids keep their raw form
    let raw = LazyCsvReader::new(file_path)
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()
        .with_context(|| format!("failed to open {file_path}"))?;

    let date_options = StrptimeOptions {
        format: Some(options.date_format.as_str().into()),
        strict: false,
        ..Default::default()
    };

    let parsed = raw
        .select([
            col(INVOICE),
            col(QUANTITY).cast(DataType::Float64),
            col(PRICE).cast(DataType::Float64),
            col(CUSTOMER_ID)
                .cast(DataType::Float64)
                .cast(DataType::Int64)
                .alias(CUSTOMER_ID),
            col(INVOICE_DATE)
                .str()
                .strptime(
                    DataType::Datetime(TimeUnit::Milliseconds, None),
                    date_options,
                    lit("raise"),
                )
                .cast(DataType::Int64)
                .alias(INVOICE_DATE),
        ])
        .collect()
        .with_context(|| format!("failed to read transactions from {file_path}"))?;

    let total_rows = parsed.height();
    let valid = parsed
        .lazy()
        .drop_nulls(None)
        .filter(
            col(INVOICE)
                .str()
                .starts_with(lit("C"))
                .not()
                .and(col(QUANTITY).gt(lit(0.0)))
                .and(col(PRICE).gt(lit(0.0))),
        )
        .collect()?;

    if valid.height() == 0 {
        anyhow::bail!("No valid transactions found after filtering");
    }
    if valid.height() < total_rows {
        warn!(
            dropped = total_rows - valid.height(),
            kept = valid.height(),
            "dropped incomplete, cancelled or non-positive transactions"
        );
    }

    let mut capped_columns = Vec::new();
    for name in [QUANTITY, PRICE] {
        let values = f64_column(&valid, name)?;
        if let Some((low, up)) =
            outlier_thresholds(&values, options.lower_quantile, options.upper_quantile)
        {
            capped_columns.push(capped(name, low, up));
        }
    }

    let per_customer = valid
        .lazy()
        .with_columns(capped_columns)
        .with_column((col(QUANTITY) * col(PRICE)).alias(TOTAL_PRICE))
        .group_by([col(CUSTOMER_ID)])
        .agg([
            col(INVOICE_DATE).min().alias("first_purchase"),
            col(INVOICE_DATE).max().alias("last_purchase"),
            col(INVOICE).n_unique().alias("transactions"),
            col(TOTAL_PRICE).sum().alias("spend"),
        ])
        .sort([CUSTOMER_ID], SortMultipleOptions::default())
        .collect()?;

    build_summaries(&per_customer, cutoff_ms)
}

/// Turn the per-customer aggregate frame into validated summaries
fn build_summaries(per_customer: &DataFrame, cutoff_ms: i64) -> crate::Result<SummaryTable> {
    let ids = i64_column(per_customer, CUSTOMER_ID)?;
    let first = i64_column(per_customer, "first_purchase")?;
    let last = i64_column(per_customer, "last_purchase")?;
    let transactions = i64_column(per_customer, "transactions")?;
    let spend = f64_column(per_customer, "spend")?;

    let mut customer_ids = Vec::new();
    let mut summaries = Vec::new();
    let mut one_time = 0usize;
    for i in 0..ids.len() {
        if transactions[i] <= 1 {
            one_time += 1;
            continue;
        }
        if spend[i] <= 0.0 {
            warn!(customer = ids[i], spend = spend[i], "skipping customer without spend");
            continue;
        }
        if first[i] > cutoff_ms {
            anyhow::bail!(
                "customer {} first purchased after the analysis date",
                ids[i]
            );
        }

        let recency_days = (last[i] - first[i]) / MS_PER_DAY;
        let age_days = (cutoff_ms - first[i]) / MS_PER_DAY;
        let frequency = u32::try_from(transactions[i] - 1)
            .with_context(|| format!("customer {} has too many transactions", ids[i]))?;
        let summary = CustomerSummary::new(
            frequency,
            recency_days as f64 / DAYS_PER_WEEK,
            age_days as f64 / DAYS_PER_WEEK,
            spend[i] / transactions[i] as f64,
        )
        .with_context(|| format!("invalid summary for customer {}", ids[i]))?;

        customer_ids.push(ids[i]);
        summaries.push(summary);
    }

    if summaries.is_empty() {
        anyhow::bail!("No repeat customers found after aggregation");
    }
    info!(
        customers = summaries.len(),
        one_time_buyers = one_time,
        "aggregated transactions into customer summaries"
    );

    Ok(SummaryTable::new(customer_ids, summaries)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country").unwrap();
        // Customer 17850: two invoices three weeks apart
        writeln!(file, "536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,2011-11-06 08:26:00,2.50,17850,United Kingdom").unwrap();
        writeln!(file, "536365,71053,WHITE METAL LANTERN,5,2011-11-06 08:26:00,3.00,17850,United Kingdom").unwrap();
        writeln!(file, "536366,22633,HAND WARMER UNION JACK,4,2011-11-27 09:00:00,2.50,17850.0,United Kingdom").unwrap();
        // Customer 13047: one invoice plus a cancellation
        writeln!(file, "536367,84406B,CREAM CUPID HEARTS COAT HANGER,8,2011-11-20 08:34:00,2.75,13047,United Kingdom").unwrap();
        writeln!(file, "C536368,84406B,CREAM CUPID HEARTS COAT HANGER,-8,2011-11-21 08:34:00,2.75,13047,United Kingdom").unwrap();
        // Row without a customer id
        writeln!(file, "536369,22752,SET 7 BABUSHKA NESTING BOXES,2,2011-11-22 10:15:00,7.65,,United Kingdom").unwrap();
        file
    }

    #[test]
    fn test_load_transactions() {
        let test_file = create_test_csv();
        let file_path = test_file.path().to_str().unwrap();

        let table = load_transactions(file_path, &CleaningOptions::default()).unwrap();
        assert_eq!(table.customer_ids, vec![17850]);

        let summary = table.summaries[0];
        assert_eq!(summary.frequency, 1);
        assert_relative_eq!(summary.recency, 3.0);
        // 2011-11-06 08:26 to 2011-12-11 00:00 is 34 whole days
        assert_relative_eq!(summary.age, 34.0 / 7.0);
        // (15 + 15 + 10) / 2 invoices
        assert_relative_eq!(summary.monetary, 20.0);
    }

    #[test]
    fn test_missing_file() {
        let result = load_transactions("does/not/exist.csv", &CleaningOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_analysis_date() {
        let test_file = create_test_csv();
        let options = CleaningOptions {
            analysis_date: "11/12/2011".to_string(),
            ..CleaningOptions::default()
        };
        assert!(load_transactions(test_file.path().to_str().unwrap(), &options).is_err());
    }

    #[test]
    fn test_outlier_thresholds() {
        let values: Vec<f64> = (1..=101).map(f64::from).collect();
        let (low, up) = outlier_thresholds(&values, 0.01, 0.99).unwrap();
        // q01 = 2, q99 = 100, range = 98
        assert_relative_eq!(low, 2.0 - 147.0);
        assert_relative_eq!(up, 100.0 + 147.0);
        assert!(outlier_thresholds(&[], 0.01, 0.99).is_none());
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&sorted, 0.0), Some(1.0));
        assert_eq!(quantile(&sorted, 1.0), Some(5.0));
        assert_relative_eq!(quantile(&sorted, 0.1).unwrap(), 1.4);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&sorted, 1.5), None);
    }
}
