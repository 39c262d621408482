//! Lifeforge: customer lifetime value CLI built on BG/NBD and Gamma-Gamma models
//!
//! This is the main entrypoint that orchestrates data loading, model fitting,
//! CLV scoring, segmentation and reporting.

use anyhow::Result;
use clap::Parser;
use lifeforge::{
    cltv::CltvCalculator,
    load_transactions,
    report::{fit_models, top_expected_purchases},
    viz, Args, CltvReport, CustomerSummary,
};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Horizons, in weeks, for the expected-purchase rankings
const PURCHASE_HORIZONS: [(f64, &str); 3] = [(1.0, "1 week"), (4.0, "1 month"), (12.0, "3 months")];

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.verbose {
        println!("Lifeforge - Customer Lifetime Value with BG/NBD and Gamma-Gamma");
        println!("================================================================\n");
    }

    // Check if in prediction mode
    if let Some(customer) = args.parse_predict_values()? {
        run_prediction_mode(&args, customer)?;
    } else {
        run_full_pipeline(&args)?;
    }

    Ok(())
}

/// Score a single customer against models fitted on the input data
fn run_prediction_mode(args: &Args, customer: CustomerSummary) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input: frequency={}, recency={}, T={}, monetary={}",
        customer.frequency, customer.recency, customer.age, customer.monetary
    );

    let start_time = Instant::now();

    if args.verbose {
        println!("\nLoading training data from: {}", args.input);
    }
    let table = load_transactions(&args.input, &args.cleaning_options())?;
    let (bgnbd, gamma_gamma) = fit_models(&table, &args.bgnbd_options(), &args.gamma_gamma_options())?;

    let calculator = CltvCalculator::new(args.months, args.period_unit, args.discount_rate)?;
    let result = calculator.compute(&bgnbd, &gamma_gamma, &customer)?;
    let alive = bgnbd.probability_alive(customer.frequency, customer.recency, customer.age);

    println!("\n✓ Probability alive: {:.3}", alive);
    for (weeks, name) in PURCHASE_HORIZONS {
        let horizon = weeks * args.period_unit.periods_per_week();
        println!(
            "  Expected purchases ({}): {:.3}",
            name,
            bgnbd.predict(horizon, customer.frequency, customer.recency, customer.age)
        );
    }
    println!("  Expected average value: {:.2}", result.expected_average_value);
    println!("  CLV ({} months): {:.2}", args.months, result.present_value);
    println!("  Processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

/// Run the full CLV pipeline
fn run_full_pipeline(args: &Args) -> Result<()> {
    println!("=== Full CLV Pipeline ===\n");

    let start_time = Instant::now();

    // Step 1: Load and aggregate transactions
    if args.verbose {
        println!("Step 1: Loading and processing data");
        println!("  Input file: {}", args.input);
    }
    let table = load_transactions(&args.input, &args.cleaning_options())?;
    println!("✓ Data loaded: {} repeat customers", table.len());

    // Step 2: Fit both models
    let fit_start = Instant::now();
    let (bgnbd, gamma_gamma) = fit_models(&table, &args.bgnbd_options(), &args.gamma_gamma_options())?;
    let p = bgnbd.params();
    let g = gamma_gamma.params();
    println!("✓ BG/NBD fitted: r={:.4}, alpha={:.4}, a={:.4}, b={:.4}", p.r, p.alpha, p.a, p.b);
    println!("✓ Gamma-Gamma fitted: p={:.4}, q={:.4}, v={:.4}", g.p, g.q, g.v);
    if args.verbose {
        println!("  Fitting time: {:.2}s", fit_start.elapsed().as_secs_f64());
    }

    // Step 3: Expected purchases per horizon
    for (weeks, name) in PURCHASE_HORIZONS {
        let horizon = weeks * args.period_unit.periods_per_week();
        let (top, total) = top_expected_purchases(&bgnbd, &table, horizon, args.top);
        println!("\n=== Top {} expected purchases ({}) ===", args.top, name);
        for (customer_id, expected) in top {
            println!("  {:8} | {:8.3}", customer_id, expected);
        }
        println!("  Total expected purchases: {:.1}", total);
    }

    // Step 4: CLV and segments
    let calculator = CltvCalculator::new(args.months, args.period_unit, args.discount_rate)?;
    let report = CltvReport::build(&table, &bgnbd, &gamma_gamma, &calculator, args.tiers)?;
    report.print_top_by_average_value(args.top);
    report.print_top_customers(args.top);
    report.print_segment_table();

    report.write_csv(&args.output)?;
    println!("\n✓ Scored table saved to: {}", args.output);

    if let Some(plot_path) = &args.plot {
        viz::generate_visualization_report(&report, &bgnbd, plot_path)?;
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}
