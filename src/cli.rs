//! Command-line interface definitions and argument parsing

use clap::Parser;

use crate::cltv::PeriodUnit;
use crate::data::CleaningOptions;
use crate::optimize::{FitOptions, OptimizerConfig};
use crate::summary::CustomerSummary;

/// Customer lifetime value CLI using BG/NBD and Gamma-Gamma models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input transactions CSV file
    #[arg(short, long, default_value = "online_retail_II.csv")]
    pub input: String,

    /// Output path for the scored customer table
    #[arg(short, long, default_value = "cltv.csv")]
    pub output: String,

    /// Optional path for the segment plot (PNG)
    #[arg(long)]
    pub plot: Option<String>,

    /// Analysis cutoff date (YYYY-MM-DD)
    #[arg(long, default_value = "2011-12-11")]
    pub analysis_date: String,

    /// Format of the InvoiceDate column
    #[arg(long, default_value = "%Y-%m-%d %H:%M:%S")]
    pub date_format: String,

    /// L2 penalizer for the BG/NBD fit
    #[arg(long, default_value = "0.001")]
    pub bgnbd_penalizer: f64,

    /// L2 penalizer for the Gamma-Gamma fit
    #[arg(long, default_value = "0.01")]
    pub gamma_gamma_penalizer: f64,

    /// CLV horizon in months
    #[arg(long, default_value = "3")]
    pub months: u32,

    /// Time unit of recency and T
    #[arg(long, default_value = "week")]
    pub period_unit: PeriodUnit,

    /// Monthly discount rate
    #[arg(long, default_value = "0.01")]
    pub discount_rate: f64,

    /// Number of CLV segments
    #[arg(short = 'k', long, default_value = "4")]
    pub tiers: usize,

    /// How many customers to list in each ranking
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Maximum optimizer iterations
    #[arg(long, default_value = "1000")]
    pub max_iters: usize,

    /// Optimizer gradient tolerance
    #[arg(long, default_value = "1e-7")]
    pub tolerance: f64,

    /// Prediction mode: score one customer given "frequency,recency,T,monetary"
    /// Example: --predict "5,20.5,30,45.0"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn cleaning_options(&self) -> CleaningOptions {
        CleaningOptions {
            analysis_date: self.analysis_date.clone(),
            date_format: self.date_format.clone(),
            ..CleaningOptions::default()
        }
    }

    fn optimizer(&self) -> OptimizerConfig {
        OptimizerConfig {
            max_iters: self.max_iters,
            gradient_tolerance: self.tolerance,
            ..OptimizerConfig::default()
        }
    }

    pub fn bgnbd_options(&self) -> FitOptions {
        FitOptions {
            penalizer_coef: self.bgnbd_penalizer,
            optimizer: self.optimizer(),
            ..FitOptions::default()
        }
    }

    pub fn gamma_gamma_options(&self) -> FitOptions {
        FitOptions {
            penalizer_coef: self.gamma_gamma_penalizer,
            optimizer: self.optimizer(),
            ..FitOptions::default()
        }
    }

    /// Parse the customer from the predict string
    /// Expected format: "frequency,recency,T,monetary"
    pub fn parse_predict_values(&self) -> crate::Result<Option<CustomerSummary>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            anyhow::bail!("Predict values must be in format 'frequency,recency,T,monetary'");
        }

        let frequency: u32 = parts[0]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid frequency value: {}", parts[0]))?;
        let recency: f64 = parts[1]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid recency value: {}", parts[1]))?;
        let age: f64 = parts[2]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid T value: {}", parts[2]))?;
        let monetary: f64 = parts[3]
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid monetary value: {}", parts[3]))?;

        Ok(Some(CustomerSummary::new(frequency, recency, age, monetary)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predict_values() {
        let mut args = Args::parse_from(["lifeforge", "--predict", "5, 20.5, 30, 45.0"]);

        let result = args.parse_predict_values().unwrap();
        assert_eq!(result, Some(CustomerSummary::new(5, 20.5, 30.0, 45.0).unwrap()));

        args.predict = None;
        assert_eq!(args.parse_predict_values().unwrap(), None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_predict_values().is_err());

        // recency beyond T
        args.predict = Some("5,40,30,45".to_string());
        assert!(args.parse_predict_values().is_err());
    }

    #[test]
    fn test_defaults_follow_analysis_setup() {
        let args = Args::parse_from(["lifeforge"]);
        assert_eq!(args.period_unit, PeriodUnit::Week);
        assert_eq!(args.months, 3);
        assert_eq!(args.tiers, 4);
        assert_eq!(args.bgnbd_options().penalizer_coef, 0.001);
        assert_eq!(args.gamma_gamma_options().penalizer_coef, 0.01);
        assert_eq!(args.cleaning_options().analysis_date, "2011-12-11");
    }
}
