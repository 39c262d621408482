//! Quantile tiers over CLV scores

use std::cmp::Ordering;
use std::fmt;

use crate::error::{CltvError, ModelResult};

/// Ordinal tier; `rank` 0 is the lowest-value tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    rank: usize,
    tiers: usize,
}

impl Segment {
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Letter label with `A` for the top tier (`D`, `C`, `B`, `A` for quartiles).
    /// Falls back to the 1-based rank when there are more tiers than letters.
    pub fn label(&self) -> String {
        if self.tiers <= 26 {
            let offset = (self.tiers - 1 - self.rank) as u8;
            char::from(b'A' + offset).to_string()
        } else {
            (self.rank + 1).to_string()
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Tier assignment for every score, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    /// Smallest score in each tier, lowest tier first
    pub lower_bounds: Vec<f64>,
}

/// Count, mean and sum of scores within one tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierSummary {
    pub segment: Segment,
    pub count: usize,
    pub mean: f64,
    pub sum: f64,
}

impl Segmentation {
    pub fn num_tiers(&self) -> usize {
        self.lower_bounds.len()
    }

    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_tiers()];
        for segment in &self.segments {
            sizes[segment.rank] += 1;
        }
        sizes
    }

    /// Per-tier aggregates, highest tier first
    pub fn summarize(&self, scores: &[f64]) -> Vec<TierSummary> {
        let tiers = self.num_tiers();
        let mut sums = vec![0.0; tiers];
        let mut counts = vec![0usize; tiers];
        for (segment, score) in self.segments.iter().zip(scores) {
            sums[segment.rank] += score;
            counts[segment.rank] += 1;
        }
        (0..tiers)
            .rev()
            .map(|rank| TierSummary {
                segment: Segment { rank, tiers },
                count: counts[rank],
                mean: if counts[rank] > 0 {
                    sums[rank] / counts[rank] as f64
                } else {
                    0.0
                },
                sum: sums[rank],
            })
            .collect()
    }
}

/// Split `scores` into `num_tiers` equal-frequency tiers.
///
/// Customers are ranked by score (ties keep input order) and the rank range is cut at
/// the `k / num_tiers` quantiles, so tier sizes differ by at most one and every member
/// of a higher tier scores at least as much as every member of a lower one.
pub fn segment(scores: &[f64], num_tiers: usize) -> ModelResult<Segmentation> {
    if num_tiers == 0 {
        return Err(CltvError::invalid("segmentation", "at least one tier is required"));
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(CltvError::invalid(
            format!("score at row {i}"),
            format!("score must be finite, got {}", scores[i]),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let distinct = 1 + order
        .windows(2)
        .filter(|w| scores[w[0]] != scores[w[1]])
        .count();
    let distinct = if scores.is_empty() { 0 } else { distinct };
    if distinct < num_tiers {
        return Err(CltvError::InsufficientData {
            distinct,
            requested: num_tiers,
        });
    }

    let n = scores.len();
    let mut segments = vec![Segment { rank: 0, tiers: num_tiers }; n];
    let mut lower_bounds = vec![f64::INFINITY; num_tiers];
    for (position, &index) in order.iter().enumerate() {
        let rank = position * num_tiers / n;
        segments[index] = Segment { rank, tiers: num_tiers };
        lower_bounds[rank] = lower_bounds[rank].min(scores[index]);
    }

    Ok(Segmentation {
        segments,
        lower_bounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quartiles_are_balanced_and_ordered() {
        let scores: Vec<f64> = (0..10).map(|i| f64::from((i * 7) % 10) * 3.5).collect();
        let result = segment(&scores, 4).unwrap();

        let sizes = result.sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);

        for (i, a) in scores.iter().enumerate() {
            for (j, b) in scores.iter().enumerate() {
                if result.segments[i].rank() > result.segments[j].rank() {
                    assert!(a >= b, "{a} in higher tier than {b}");
                }
            }
        }
    }

    #[test]
    fn test_labels_put_a_on_top() {
        let scores = [1.0, 4.0, 2.0, 3.0];
        let result = segment(&scores, 4).unwrap();
        let labels: Vec<String> = result.segments.iter().map(|s| s.label()).collect();
        assert_eq!(labels, vec!["D", "A", "C", "B"]);
        assert_eq!(result.lower_bounds, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_ties_broken_by_input_order() {
        let scores = [5.0, 1.0, 5.0, 5.0, 9.0, 1.0];
        let result = segment(&scores, 3).unwrap();
        let ranks: Vec<usize> = result.segments.iter().map(|s| s.rank()).collect();
        // Sorted stably: 1(1) 1(5) 5(0) 5(2) 5(3) 9(4)
        assert_eq!(ranks, vec![1, 0, 1, 2, 2, 0]);
    }

    #[test]
    fn test_insufficient_distinct_scores() {
        let err = segment(&[1.0, 1.0, 2.0, 2.0], 4).unwrap_err();
        assert_eq!(
            err,
            CltvError::InsufficientData {
                distinct: 2,
                requested: 4
            }
        );
        assert!(segment(&[], 1).is_err());
        assert!(segment(&[1.0, 2.0], 0).is_err());
        assert!(segment(&[1.0, f64::NAN], 1).is_err());
    }

    #[test]
    fn test_summarize_tiers() {
        let scores = [10.0, 20.0, 30.0, 40.0];
        let result = segment(&scores, 2).unwrap();
        let summary = result.summarize(&scores);
        assert_eq!(summary[0].segment.label(), "A");
        assert_eq!(summary[0].count, 2);
        assert_relative_eq!(summary[0].mean, 35.0);
        assert_relative_eq!(summary[1].sum, 30.0);
    }
}
