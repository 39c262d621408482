//! Visualization of CLV segments using Plotters

use plotters::prelude::*;

use crate::bgnbd::BgNbdModel;
use crate::report::CltvReport;

/// Color palette for tiers, top tier first
const SEGMENT_COLORS: [RGBColor; 5] = [GREEN, BLUE, MAGENTA, RED, CYAN];

/// Repeat-purchase buckets in the period transactions chart; the last collects the rest
const PERIOD_TRANSACTION_BUCKETS: u32 = 7;

/// Color for a tier, counting down from the top tier
fn segment_color(rank: usize, num_tiers: usize) -> RGBColor {
    let from_top = num_tiers.saturating_sub(rank + 1);
    SEGMENT_COLORS
        .get(from_top)
        .copied()
        .unwrap_or(BLACK)
}

/// Padded `(min, max)` of `values`, never a zero-width range
fn padded_range(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.05).max(0.5);
    (min - pad, max + pad)
}

/// Scatter plot of CLV against repeat purchases, colored by segment
///
/// # Arguments
/// * `report` - Scored and segmented customers
/// * `output_path` - Path to save the PNG plot
/// * `plot_title` - Title for the plot
pub fn create_segment_visualization(
    report: &CltvReport,
    output_path: &str,
    plot_title: Option<&str>,
) -> crate::Result<()> {
    let title = plot_title.unwrap_or("Customer Lifetime Value by Frequency (Colored by Segment)");
    let num_tiers = report.segmentation.num_tiers();

    let frequencies: Vec<f64> = report
        .rows
        .iter()
        .map(|r| f64::from(r.summary.frequency))
        .collect();
    let scores = report.scores();
    let (freq_min, freq_max) = padded_range(&frequencies);
    let (clv_min, clv_max) = padded_range(&scores);

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(freq_min..freq_max, clv_min..clv_max)?;

    chart
        .configure_mesh()
        .x_desc("Repeat purchases")
        .y_desc("CLV")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for rank in (0..num_tiers).rev() {
        let color = segment_color(rank, num_tiers);
        let points: Vec<(f64, f64)> = report
            .rows
            .iter()
            .filter(|r| r.segment.rank() == rank)
            .map(|r| (f64::from(r.summary.frequency), r.clv))
            .collect();
        let label = report
            .rows
            .iter()
            .find(|r| r.segment.rank() == rank)
            .map(|r| r.segment.label())
            .unwrap_or_default();

        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 4, color.filled())))?
            .label(format!("Segment {label}"))
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    println!("Segment visualization saved to: {}", output_path);

    Ok(())
}

/// Bar chart of customers per segment
pub fn create_segment_size_chart(report: &CltvReport, output_path: &str) -> crate::Result<()> {
    let sizes = report.segmentation.sizes();
    let num_tiers = sizes.len();
    let max_size = sizes.iter().copied().max().unwrap_or(1) as f64;

    let root = BitMapBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Segment Sizes", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(num_tiers as f64 - 0.5), 0f64..(max_size * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Segment rank (0 = lowest)")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (rank, &size) in sizes.iter().enumerate() {
        let color = segment_color(rank, num_tiers);
        chart.draw_series(std::iter::once(Rectangle::new(
            [(rank as f64 - 0.4, 0.0), (rank as f64 + 0.4, size as f64)],
            color.filled(),
        )))?;
    }

    root.present()?;
    println!("Segment size chart saved to: {}", output_path);

    Ok(())
}

/// Customers per repeat-purchase count, with `max_frequency` and above in the last bucket
fn observed_frequency_counts(frequencies: impl IntoIterator<Item = u32>, max_frequency: u32) -> Vec<f64> {
    let mut counts = vec![0.0; max_frequency as usize + 1];
    for frequency in frequencies {
        counts[frequency.min(max_frequency) as usize] += 1.0;
    }
    counts
}

/// Observed against model-expected customers per repeat-purchase count
///
/// # Arguments
/// * `report` - Scored customers, providing each frequency and observation length
/// * `bgnbd` - Fitted purchase model
/// * `output_path` - Path to save the PNG chart
pub fn create_period_transactions_chart(
    report: &CltvReport,
    bgnbd: &BgNbdModel,
    output_path: &str,
) -> crate::Result<()> {
    let max_frequency = PERIOD_TRANSACTION_BUCKETS;
    let actual = observed_frequency_counts(report.rows.iter().map(|r| r.summary.frequency), max_frequency);
    let ages: Vec<f64> = report.rows.iter().map(|r| r.summary.age).collect();
    let expected = bgnbd.expected_frequency_counts(&ages, max_frequency);

    let y_max = actual
        .iter()
        .chain(&expected)
        .copied()
        .fold(1.0, f64::max);

    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Frequency of Repeat Transactions", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(max_frequency as f64 + 0.5), 0f64..(y_max * 1.1))?;

    chart
        .configure_mesh()
        .x_desc(format!("Number of repeat purchases (last bucket: {max_frequency}+)"))
        .y_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (series, counts, offset, color) in [("Actual", &actual, -0.4, BLUE), ("Model", &expected, 0.0, RED)] {
        chart
            .draw_series(counts.iter().enumerate().map(|(x, &count)| {
                let left = x as f64 + offset;
                Rectangle::new([(left, 0.0), (left + 0.4, count)], color.filled())
            }))?
            .label(series)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    println!("Period transactions chart saved to: {}", output_path);

    Ok(())
}

/// Generate the scatter plot, the size chart and the period transactions chart
pub fn generate_visualization_report(
    report: &CltvReport,
    bgnbd: &BgNbdModel,
    base_output_path: &str,
) -> crate::Result<()> {
    create_segment_visualization(report, base_output_path, None)?;

    let size_chart_path = base_output_path.replace(".png", "_sizes.png");
    create_segment_size_chart(report, &size_chart_path)?;

    let period_chart_path = base_output_path.replace(".png", "_period_transactions.png");
    create_period_transactions_chart(report, bgnbd, &period_chart_path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(color: RGBColor) -> (u8, u8, u8) {
        (color.0, color.1, color.2)
    }

    #[test]
    fn test_segment_colors_count_from_top() {
        assert_eq!(rgb(segment_color(3, 4)), rgb(GREEN));
        assert_eq!(rgb(segment_color(0, 4)), rgb(RED));
        assert_eq!(rgb(segment_color(0, 9)), rgb(BLACK));
    }

    #[test]
    fn test_observed_frequency_counts() {
        let counts = observed_frequency_counts([1, 1, 3, 7, 12, 0], 7);
        assert_eq!(counts, vec![1.0, 2.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_padded_range() {
        let (lo, hi) = padded_range(&[10.0, 110.0]);
        assert_eq!((lo, hi), (5.0, 115.0));

        let (lo, hi) = padded_range(&[3.0]);
        assert!(lo < 3.0 && hi > 3.0);

        assert_eq!(padded_range(&[]), (0.0, 1.0));
    }
}
