//! Correlation and per-taxon summary statistics.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::ports::TaxonMembership;

/// Pearson correlation of two equal-length vectors.
///
/// Returns `NaN` when either vector is constant, the lengths differ, or
/// fewer than two samples are present.
///
/// # Examples
/// ```
/// use lesion_bank::domain::decode::pearson;
///
/// assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
/// assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
/// ```
#[expect(
    clippy::cast_precision_loss,
    reason = "masked vectors hold far fewer than 2^52 voxels"
)]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return f64::NAN;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

/// One-sample t-test summary for one taxon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonStatistics {
    /// Taxon name.
    pub taxonomy_item: String,
    /// Mean correlation of member subjects.
    pub mean_correlation: f64,
    /// Sample standard deviation; undefined for a single member.
    pub std_correlation: Option<f64>,
    /// t statistic against a zero mean; undefined without spread.
    pub t_statistic: Option<f64>,
    /// Number of member subjects.
    pub n_subjects: usize,
    /// Largest member correlation.
    pub max_correlation: f64,
    /// Smallest member correlation.
    pub min_correlation: f64,
}

/// Summarise `values` for `taxon`. Returns `None` for an empty group.
#[expect(
    clippy::cast_precision_loss,
    reason = "group sizes are bounded by the corpus subject count"
)]
pub fn summarize(taxon: &str, values: &[f64]) -> Option<TaxonStatistics> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.len() > 1).then(|| {
        let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        (ss / (n - 1.0)).sqrt()
    });
    let t_statistic = std
        .filter(|s| *s > 0.0)
        .map(|s| mean / (s / n.sqrt()))
        .filter(|t| t.is_finite());

    Some(TaxonStatistics {
        taxonomy_item: taxon.to_owned(),
        mean_correlation: mean,
        std_correlation: std,
        t_statistic,
        n_subjects: values.len(),
        max_correlation: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        min_correlation: values.iter().copied().fold(f64::INFINITY, f64::min),
    })
}

/// Sort by mean correlation, largest first, with `NaN` last.
pub fn sort_by_mean_descending(stats: &mut [TaxonStatistics]) {
    stats.sort_by(|a, b| match (a.mean_correlation.is_nan(), b.mean_correlation.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.mean_correlation.total_cmp(&a.mean_correlation),
    });
}

/// Group subject correlations by taxon, counting each subject once per taxon.
pub fn group_by_taxon(
    correlations: &BTreeMap<i64, f64>,
    memberships: &[TaxonMembership],
) -> BTreeMap<String, Vec<f64>> {
    let mut members: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    for membership in memberships {
        if correlations.contains_key(&membership.subject_id) {
            members
                .entry(membership.taxon.as_str())
                .or_default()
                .insert(membership.subject_id);
        }
    }
    members
        .into_iter()
        .map(|(taxon, subjects)| {
            let values = subjects
                .iter()
                .filter_map(|subject| correlations.get(subject).copied())
                .collect();
            (taxon.to_owned(), values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn membership(subject_id: i64, taxon: &str) -> TaxonMembership {
        TaxonMembership {
            subject_id,
            taxon: taxon.to_owned(),
        }
    }

    #[rstest]
    fn anticorrelated_vectors_give_minus_one() {
        let r = pearson(&[1.0, 2.0, 3.0, 4.0], &[4.0, 3.0, 2.0, 1.0]);
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[rstest]
    #[case(&[1.0], &[2.0])]
    #[case(&[1.0, 2.0], &[1.0, 2.0, 3.0])]
    #[case(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.0])]
    fn degenerate_inputs_give_nan(#[case] a: &[f64], #[case] b: &[f64]) {
        assert!(pearson(a, b).is_nan());
    }

    #[rstest]
    fn two_member_taxon_matches_hand_computation() {
        let correlations = BTreeMap::from([(1, 0.5), (2, 0.6), (3, -0.1)]);
        let memberships = [membership(1, "A"), membership(2, "A"), membership(3, "B")];

        let groups = group_by_taxon(&correlations, &memberships);
        let stats = summarize("A", &groups["A"]).expect("non-empty group");

        assert_eq!(stats.n_subjects, 2);
        assert!((stats.mean_correlation - 0.55).abs() < 1e-12);
        let std = stats.std_correlation.expect("two members have spread");
        assert!((std - 0.070_710_678_118_654_76).abs() < 1e-12);
        let t = stats.t_statistic.expect("defined t");
        assert!((t - 11.0).abs() < 1e-9);
        assert_eq!(stats.max_correlation, 0.6);
        assert_eq!(stats.min_correlation, 0.5);
    }

    #[rstest]
    fn single_member_has_undefined_spread() {
        let stats = summarize("B", &[-0.1]).expect("non-empty group");
        assert_eq!(stats.std_correlation, None);
        assert_eq!(stats.t_statistic, None);
        let json = serde_json::to_value(&stats).expect("serialize");
        assert!(json["std_correlation"].is_null());
        assert!(json["t_statistic"].is_null());
    }

    #[rstest]
    fn duplicate_memberships_count_once() {
        let correlations = BTreeMap::from([(1, 0.2)]);
        let memberships = [membership(1, "A"), membership(1, "A")];
        let groups = group_by_taxon(&correlations, &memberships);
        assert_eq!(groups["A"], vec![0.2]);
    }

    #[rstest]
    fn failed_subjects_are_excluded_from_groups() {
        let correlations = BTreeMap::from([(1, 0.2)]);
        let memberships = [membership(1, "A"), membership(2, "A"), membership(2, "C")];
        let groups = group_by_taxon(&correlations, &memberships);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["A"], vec![0.2]);
    }

    #[rstest]
    fn sorts_by_mean_descending_with_nan_last() {
        let mut stats = ["low", "nan", "high"]
            .iter()
            .zip([0.1, f64::NAN, 0.9])
            .map(|(name, mean)| TaxonStatistics {
                taxonomy_item: (*name).to_owned(),
                mean_correlation: mean,
                std_correlation: None,
                t_statistic: None,
                n_subjects: 1,
                max_correlation: mean,
                min_correlation: mean,
            })
            .collect::<Vec<_>>();

        sort_by_mean_descending(&mut stats);

        let order = stats
            .iter()
            .map(|s| s.taxonomy_item.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["high", "low", "nan"]);
    }
}
