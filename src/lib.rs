//! Lifeforge: customer lifetime value estimation
//!
//! Fits a BG/NBD purchase-timing model and a Gamma-Gamma spend model to per-customer
//! (frequency, recency, T, monetary) summaries, combines them into a discounted CLV
//! and splits customers into quantile tiers.

pub mod bgnbd;
pub mod cli;
pub mod cltv;
pub mod data;
pub mod error;
pub mod gamma_gamma;
pub mod optimize;
pub mod report;
pub mod segment;
pub mod special;
pub mod summary;
pub mod viz;

// Re-export public items for easier access
pub use bgnbd::{BgNbdModel, BgNbdParameters};
pub use cli::Args;
pub use cltv::{CltvCalculator, CltvResult, PeriodUnit};
pub use data::{load_transactions, CleaningOptions};
pub use error::{CltvError, ModelResult};
pub use gamma_gamma::{GammaGammaModel, GammaGammaParameters};
pub use optimize::{FitOptions, FitReport, OptimizerConfig};
pub use report::CltvReport;
pub use segment::{segment, Segment, Segmentation};
pub use summary::{CustomerSummary, SummaryTable};

/// Common result type used by the application layer
pub type Result<T> = anyhow::Result<T>;
