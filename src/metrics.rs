// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Scoring engine for hard and soft classification artifacts.
//!
//! Implements:
//! - Per-class and macro-averaged Precision, Recall, F-measure
//! - Cross entropy over soft labels
//! - The information-contrast family (ICM, ICM norm, soft variants)
//!   parameterized by a category hierarchy
//!
//! Results land in a nested [`MetricReport`]; callers that need flat values
//! go through the extractor in `evaluate` rather than reaching into the
//! report shape.

use crate::labels::{HardRecord, SoftLabel, SoftRecord};
use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

const PROB_FLOOR: f64 = 1e-12;

/// Metrics the engine can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    FMeasure,
    Precision,
    Recall,
    CrossEntropy,
    Icm,
    IcmNorm,
    IcmSoft,
    IcmSoftNorm,
}

impl MetricKind {
    /// Name under which results land in the report.
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::FMeasure => "FMeasure",
            MetricKind::Precision => "Precision",
            MetricKind::Recall => "Recall",
            MetricKind::CrossEntropy => "CrossEntropy",
            MetricKind::Icm => "ICM",
            MetricKind::IcmNorm => "ICMNorm",
            MetricKind::IcmSoft => "ICMSoft",
            MetricKind::IcmSoftNorm => "ICMSoftNorm",
        }
    }
}

/// Category tree. Nodes never listed as a child hang off an implicit root.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    parent: BTreeMap<String, String>,
}

impl Hierarchy {
    /// Build from (parent, children) pairs.
    pub fn from_children<'a>(edges: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let mut parent = BTreeMap::new();
        for (node, children) in edges {
            for child in children {
                parent.insert(child.to_string(), node.to_string());
            }
        }
        Self { parent }
    }

    pub fn parent(&self, category: &str) -> Option<&str> {
        self.parent.get(category).map(String::as_str)
    }

    /// Path from `category` up to (excluding) the root, starting at the
    /// category itself.
    fn chain<'a>(&'a self, category: &'a str) -> Vec<&'a str> {
        let mut chain = vec![category];
        let mut current = category;
        while chain.len() <= self.parent.len() {
            match self.parent.get(current) {
                Some(parent) => {
                    chain.push(parent.as_str());
                    current = parent.as_str();
                }
                None => break,
            }
        }
        chain
    }

    /// Deepest category that is an ancestor-or-self of both arguments;
    /// `None` means they only meet at the root.
    pub fn lowest_common_ancestor<'a>(&'a self, a: &'a str, b: &'a str) -> Option<&'a str> {
        let b_chain: BTreeSet<&str> = self.chain(b).into_iter().collect();
        self.chain(a).into_iter().find(|c| b_chain.contains(c))
    }
}

/// Information content per category, estimated from the gold distribution:
/// IC(c) = -log2 of the smoothed subtree probability. Deeper categories
/// carry at least as much information as their ancestors; the root carries
/// none.
struct InfoModel {
    ic: BTreeMap<String, f64>,
    floor_ic: f64,
}

impl InfoModel {
    fn from_gold_mass(mass: &BTreeMap<String, f64>, n_items: f64, hierarchy: &Hierarchy) -> Self {
        let mut subtree: BTreeMap<String, f64> = BTreeMap::new();
        for (category, weight) in mass {
            for node in hierarchy.chain(category) {
                *subtree.entry(node.to_string()).or_insert(0.0) += weight;
            }
        }

        let smoothed_ic = |m: f64| -((m + 0.5) / (n_items + 1.0)).log2();
        let ic = subtree
            .into_iter()
            .map(|(node, m)| (node, smoothed_ic(m)))
            .collect();

        Self {
            ic,
            floor_ic: smoothed_ic(0.0),
        }
    }

    fn ic(&self, category: &str) -> f64 {
        self.ic.get(category).copied().unwrap_or(self.floor_ic)
    }

    /// Information added by `category` over its parent.
    fn edge_ic(&self, category: &str, hierarchy: &Hierarchy) -> f64 {
        let parent_ic = hierarchy.parent(category).map_or(0.0, |p| self.ic(p));
        (self.ic(category) - parent_ic).max(0.0)
    }
}

/// Nested evaluation report: metric name -> scope -> scalar(s).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricReport {
    results: BTreeMap<String, MetricResult>,
}

/// One metric's scopes: the test-case average and, for class-scoped
/// metrics, the per-class breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricResult {
    pub average: f64,
    pub per_class: BTreeMap<String, f64>,
}

impl MetricReport {
    fn insert(&mut self, metric: MetricKind, result: MetricResult) {
        self.results.insert(metric.label().to_string(), result);
    }

    /// Average-scope value for a metric.
    pub fn average(&self, metric: &str) -> Option<f64> {
        self.results.get(metric).map(|r| r.average)
    }

    /// Per-class-scope value for a metric.
    pub fn per_class(&self, metric: &str, class: &str) -> Option<f64> {
        self.results.get(metric).and_then(|r| r.per_class.get(class)).copied()
    }
}

/// One-vs-rest confusion counts for a single category.
#[derive(Debug, Clone, Copy, Default)]
struct ClassCounts {
    tp: usize,
    fp: usize,
    fn_: usize,
}

impl ClassCounts {
    fn precision(&self) -> f64 {
        let denom = self.tp + self.fp;
        if denom == 0 {
            return 0.0;
        }
        self.tp as f64 / denom as f64
    }

    fn recall(&self) -> f64 {
        let denom = self.tp + self.fn_;
        if denom == 0 {
            return 0.0;
        }
        self.tp as f64 / denom as f64
    }

    fn f1(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        let denom = precision + recall;
        if denom == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / denom
    }
}

fn class_counts<'a>(pairs: &[(&'a str, &'a str)]) -> BTreeMap<&'a str, ClassCounts> {
    let mut counts: BTreeMap<&str, ClassCounts> = BTreeMap::new();
    for &(pred, gold) in pairs {
        if pred == gold {
            counts.entry(gold).or_default().tp += 1;
        } else {
            counts.entry(pred).or_default().fp += 1;
            counts.entry(gold).or_default().fn_ += 1;
        }
    }
    counts
}

fn prf_result(
    counts: &BTreeMap<&str, ClassCounts>,
    value: impl Fn(&ClassCounts) -> f64,
) -> MetricResult {
    let per_class: BTreeMap<String, f64> = counts
        .iter()
        .map(|(class, c)| (class.to_string(), value(c)))
        .collect();
    let average = if per_class.is_empty() {
        0.0
    } else {
        per_class.values().sum::<f64>() / per_class.len() as f64
    };
    MetricResult { average, per_class }
}

fn hard_icm(pairs: &[(&str, &str)], hierarchy: &Hierarchy) -> (f64, f64) {
    let mut gold_mass: BTreeMap<String, f64> = BTreeMap::new();
    for &(_, gold) in pairs {
        *gold_mass.entry(gold.to_string()).or_insert(0.0) += 1.0;
    }
    let info = InfoModel::from_gold_mass(&gold_mass, pairs.len() as f64, hierarchy);

    let mut system = 0.0;
    let mut self_score = 0.0;
    for &(pred, gold) in pairs {
        system += hierarchy
            .lowest_common_ancestor(pred, gold)
            .map_or(0.0, |lca| info.ic(lca));
        self_score += info.ic(gold);
    }
    system /= pairs.len() as f64;
    self_score /= pairs.len() as f64;

    let norm = if self_score > 0.0 {
        (system / self_score).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (system, norm)
}

/// Normalized per-node mass of a soft label, propagated up the tree.
fn node_mass(label: &SoftLabel, hierarchy: &Hierarchy) -> BTreeMap<String, f64> {
    let total: f64 = label.iter().map(|(_, w)| w).sum();
    let mut mass = BTreeMap::new();
    if total <= 0.0 {
        return mass;
    }
    for (category, weight) in label.iter() {
        for node in hierarchy.chain(category) {
            *mass.entry(node.to_string()).or_insert(0.0) += weight / total;
        }
    }
    mass
}

fn soft_icm(pairs: &[(&SoftLabel, &SoftLabel)], hierarchy: &Hierarchy) -> (f64, f64) {
    let mut gold_mass: BTreeMap<String, f64> = BTreeMap::new();
    for (_, gold) in pairs {
        let total: f64 = gold.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            continue;
        }
        for (category, weight) in gold.iter() {
            *gold_mass.entry(category.to_string()).or_insert(0.0) += weight / total;
        }
    }
    let info = InfoModel::from_gold_mass(&gold_mass, pairs.len() as f64, hierarchy);

    let mut system = 0.0;
    let mut self_score = 0.0;
    for (pred, gold) in pairs {
        let pred_nodes = node_mass(pred, hierarchy);
        let gold_nodes = node_mass(gold, hierarchy);
        for (node, gold_weight) in &gold_nodes {
            let edge = info.edge_ic(node, hierarchy);
            let pred_weight = pred_nodes.get(node).copied().unwrap_or(0.0);
            system += edge * pred_weight.min(*gold_weight);
            self_score += edge * gold_weight;
        }
    }
    system /= pairs.len() as f64;
    self_score /= pairs.len() as f64;

    let norm = if self_score > 0.0 {
        (system / self_score).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (system, norm)
}

fn cross_entropy(pairs: &[(&SoftLabel, &SoftLabel)]) -> f64 {
    let mut total = 0.0;
    for (pred, gold) in pairs {
        let gold_total: f64 = gold.iter().map(|(_, w)| w).sum();
        let pred_total: f64 = pred.iter().map(|(_, w)| w).sum();
        for (category, gold_weight) in gold.iter() {
            if gold_weight <= 0.0 {
                continue;
            }
            let gold_prob = gold_weight / gold_total;
            let pred_prob = if pred_total > 0.0 {
                (pred.weight(category) / pred_total).max(PROB_FLOOR)
            } else {
                PROB_FLOOR
            };
            total -= gold_prob * pred_prob.ln();
        }
    }
    total / pairs.len() as f64
}

fn align_hard<'a>(
    pred: &'a [HardRecord],
    gold: &'a [HardRecord],
) -> Result<Vec<(&'a str, &'a str)>> {
    ensure!(
        pred.len() == gold.len(),
        "prediction count {} does not match gold count {}",
        pred.len(),
        gold.len()
    );
    ensure!(!gold.is_empty(), "cannot evaluate an empty gold set");

    let gold_by_id: BTreeMap<&str, &str> = gold
        .iter()
        .map(|record| (record.id.as_str(), record.value.as_str()))
        .collect();
    pred.iter()
        .map(|record| {
            let gold_value = gold_by_id
                .get(record.id.as_str())
                .with_context(|| format!("prediction id {:?} is missing from gold", record.id))?;
            Ok((record.value.as_str(), *gold_value))
        })
        .collect()
}

fn align_soft<'a>(
    pred: &'a [SoftRecord],
    gold: &'a [SoftRecord],
) -> Result<Vec<(&'a SoftLabel, &'a SoftLabel)>> {
    ensure!(
        pred.len() == gold.len(),
        "prediction count {} does not match gold count {}",
        pred.len(),
        gold.len()
    );
    ensure!(!gold.is_empty(), "cannot evaluate an empty gold set");

    let gold_by_id: BTreeMap<&str, &SoftLabel> = gold
        .iter()
        .map(|record| (record.id.as_str(), &record.value))
        .collect();
    pred.iter()
        .map(|record| {
            let gold_value = gold_by_id
                .get(record.id.as_str())
                .with_context(|| format!("prediction id {:?} is missing from gold", record.id))?;
            Ok((&record.value, *gold_value))
        })
        .collect()
}

/// Score hard predictions against hard gold labels.
pub fn score_hard(
    pred: &[HardRecord],
    gold: &[HardRecord],
    metrics: &[MetricKind],
    hierarchy: Option<&Hierarchy>,
) -> Result<MetricReport> {
    let pairs = align_hard(pred, gold)?;
    let flat = Hierarchy::default();
    let tree = hierarchy.unwrap_or(&flat);

    let mut report = MetricReport::default();
    let mut counts = None;
    let mut icm = None;

    for metric in metrics {
        match metric {
            MetricKind::Precision | MetricKind::Recall | MetricKind::FMeasure => {
                let counts = counts.get_or_insert_with(|| class_counts(&pairs));
                let result = match metric {
                    MetricKind::Precision => prf_result(counts, ClassCounts::precision),
                    MetricKind::Recall => prf_result(counts, ClassCounts::recall),
                    _ => prf_result(counts, ClassCounts::f1),
                };
                report.insert(*metric, result);
            }
            MetricKind::Icm | MetricKind::IcmNorm => {
                let (system, norm) = *icm.get_or_insert_with(|| hard_icm(&pairs, tree));
                let average = if *metric == MetricKind::Icm { system } else { norm };
                report.insert(
                    *metric,
                    MetricResult {
                        average,
                        per_class: BTreeMap::new(),
                    },
                );
            }
            other => bail!("metric {} requires soft labels", other.label()),
        }
    }

    Ok(report)
}

/// Score soft predictions against soft gold labels.
pub fn score_soft(
    pred: &[SoftRecord],
    gold: &[SoftRecord],
    metrics: &[MetricKind],
    hierarchy: Option<&Hierarchy>,
) -> Result<MetricReport> {
    let pairs = align_soft(pred, gold)?;
    let flat = Hierarchy::default();
    let tree = hierarchy.unwrap_or(&flat);

    let mut report = MetricReport::default();
    let mut icm = None;

    for metric in metrics {
        match metric {
            MetricKind::CrossEntropy => {
                report.insert(
                    *metric,
                    MetricResult {
                        average: cross_entropy(&pairs),
                        per_class: BTreeMap::new(),
                    },
                );
            }
            MetricKind::IcmSoft | MetricKind::IcmSoftNorm => {
                let (system, norm) = *icm.get_or_insert_with(|| soft_icm(&pairs, tree));
                let average = if *metric == MetricKind::IcmSoft { system } else { norm };
                report.insert(
                    *metric,
                    MetricResult {
                        average,
                        per_class: BTreeMap::new(),
                    },
                );
            }
            other => bail!("metric {} requires hard labels", other.label()),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{EXPLICIT, IMPLICIT, NO_STEREOTYPE};

    fn stereotype_tree() -> Hierarchy {
        Hierarchy::from_children([
            ("Stereotype", [IMPLICIT, EXPLICIT].as_slice()),
            (NO_STEREOTYPE, [].as_slice()),
        ])
    }

    fn hard(records: &[(&str, &str)]) -> Vec<HardRecord> {
        records
            .iter()
            .map(|(id, value)| HardRecord {
                id: id.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_lowest_common_ancestor() {
        let tree = stereotype_tree();

        assert_eq!(tree.lowest_common_ancestor(IMPLICIT, IMPLICIT), Some(IMPLICIT));
        assert_eq!(
            tree.lowest_common_ancestor(IMPLICIT, EXPLICIT),
            Some("Stereotype")
        );
        assert_eq!(tree.lowest_common_ancestor(IMPLICIT, NO_STEREOTYPE), None);
        assert_eq!(
            tree.lowest_common_ancestor("Stereotype", EXPLICIT),
            Some("Stereotype")
        );
    }

    #[test]
    fn test_per_class_precision_recall() {
        let gold = hard(&[("1", IMPLICIT), ("2", IMPLICIT), ("3", EXPLICIT), ("4", NO_STEREOTYPE)]);
        let pred = hard(&[("1", IMPLICIT), ("2", EXPLICIT), ("3", EXPLICIT), ("4", NO_STEREOTYPE)]);

        let report = score_hard(
            &pred,
            &gold,
            &[MetricKind::Precision, MetricKind::Recall],
            Some(&stereotype_tree()),
        )
        .unwrap();

        // Implicit: 1 TP, 0 FP, 1 FN.
        assert_eq!(report.per_class("Precision", IMPLICIT), Some(1.0));
        assert_eq!(report.per_class("Recall", IMPLICIT), Some(0.5));
        // Explicit: 1 TP, 1 FP, 0 FN.
        assert_eq!(report.per_class("Precision", EXPLICIT), Some(0.5));
        assert_eq!(report.per_class("Recall", EXPLICIT), Some(1.0));
    }

    #[test]
    fn test_f_measure_perfect_and_macro_average() {
        let gold = hard(&[("1", "1"), ("2", "0"), ("3", "1"), ("4", "0")]);

        let report =
            score_hard(&gold, &gold, &[MetricKind::FMeasure], None).unwrap();
        assert!((report.average("FMeasure").unwrap() - 1.0).abs() < 1e-9);

        let pred = hard(&[("1", "0"), ("2", "1"), ("3", "0"), ("4", "1")]);
        let inverted = score_hard(&pred, &gold, &[MetricKind::FMeasure], None).unwrap();
        assert!(inverted.average("FMeasure").unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_icm_orders_error_kinds() {
        let tree = stereotype_tree();
        let gold = hard(&[
            ("1", IMPLICIT),
            ("2", IMPLICIT),
            ("3", EXPLICIT),
            ("4", NO_STEREOTYPE),
            ("5", NO_STEREOTYPE),
            ("6", NO_STEREOTYPE),
        ]);

        let perfect = score_hard(&gold, &gold, &[MetricKind::Icm, MetricKind::IcmNorm], Some(&tree))
            .unwrap();

        // One within-branch confusion on id 1.
        let within = hard(&[
            ("1", EXPLICIT),
            ("2", IMPLICIT),
            ("3", EXPLICIT),
            ("4", NO_STEREOTYPE),
            ("5", NO_STEREOTYPE),
            ("6", NO_STEREOTYPE),
        ]);
        let within_report =
            score_hard(&within, &gold, &[MetricKind::Icm], Some(&tree)).unwrap();

        // One cross-branch confusion on id 1.
        let cross = hard(&[
            ("1", NO_STEREOTYPE),
            ("2", IMPLICIT),
            ("3", EXPLICIT),
            ("4", NO_STEREOTYPE),
            ("5", NO_STEREOTYPE),
            ("6", NO_STEREOTYPE),
        ]);
        let cross_report = score_hard(&cross, &gold, &[MetricKind::Icm], Some(&tree)).unwrap();

        let perfect_icm = perfect.average("ICM").unwrap();
        let within_icm = within_report.average("ICM").unwrap();
        let cross_icm = cross_report.average("ICM").unwrap();

        assert!(perfect_icm > within_icm, "{} vs {}", perfect_icm, within_icm);
        assert!(within_icm > cross_icm, "{} vs {}", within_icm, cross_icm);
        assert!((perfect.average("ICMNorm").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_icm_norm_bounds() {
        let tree = stereotype_tree();
        let gold = hard(&[("1", IMPLICIT), ("2", EXPLICIT), ("3", NO_STEREOTYPE)]);
        let worst = hard(&[("1", NO_STEREOTYPE), ("2", NO_STEREOTYPE), ("3", IMPLICIT)]);

        let report =
            score_hard(&worst, &gold, &[MetricKind::IcmNorm], Some(&tree)).unwrap();
        let norm = report.average("ICMNorm").unwrap();
        assert!((0.0..=1.0).contains(&norm));
    }

    #[test]
    fn test_cross_entropy_prefers_better_predictions() {
        let gold = vec![SoftRecord {
            id: "1".to_string(),
            value: SoftLabel::from_pairs([("Positive", 1.0), ("Negative", 0.0)]),
        }];
        let good = vec![SoftRecord {
            id: "1".to_string(),
            value: SoftLabel::from_pairs([("Positive", 0.9), ("Negative", 0.1)]),
        }];
        let bad = vec![SoftRecord {
            id: "1".to_string(),
            value: SoftLabel::from_pairs([("Positive", 0.2), ("Negative", 0.8)]),
        }];

        let good_ce = score_soft(&good, &gold, &[MetricKind::CrossEntropy], None)
            .unwrap()
            .average("CrossEntropy")
            .unwrap();
        let bad_ce = score_soft(&bad, &gold, &[MetricKind::CrossEntropy], None)
            .unwrap()
            .average("CrossEntropy")
            .unwrap();

        assert!(good_ce < bad_ce, "{} vs {}", good_ce, bad_ce);
        assert!((good_ce - (-(0.9f64.ln()))).abs() < 1e-9);
    }

    #[test]
    fn test_soft_icm_perfect_normalizes_to_one() {
        let tree = stereotype_tree();
        let gold = vec![
            SoftRecord {
                id: "1".to_string(),
                value: SoftLabel::from_pairs([
                    (NO_STEREOTYPE, 0.2),
                    (IMPLICIT, 0.5),
                    (EXPLICIT, 0.3),
                ]),
            },
            SoftRecord {
                id: "2".to_string(),
                value: SoftLabel::from_pairs([
                    (NO_STEREOTYPE, 0.8),
                    (IMPLICIT, 0.1),
                    (EXPLICIT, 0.1),
                ]),
            },
        ];

        let report = score_soft(
            &gold,
            &gold,
            &[MetricKind::IcmSoft, MetricKind::IcmSoftNorm],
            Some(&tree),
        )
        .unwrap();

        assert!(report.average("ICMSoft").unwrap() > 0.0);
        assert!((report.average("ICMSoftNorm").unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_soft_icm_degrades_with_divergence() {
        let tree = stereotype_tree();
        let gold = vec![SoftRecord {
            id: "1".to_string(),
            value: SoftLabel::from_pairs([(NO_STEREOTYPE, 0.1), (IMPLICIT, 0.9)]),
        }];
        let diverged = vec![SoftRecord {
            id: "1".to_string(),
            value: SoftLabel::from_pairs([(NO_STEREOTYPE, 0.9), (IMPLICIT, 0.1)]),
        }];

        let self_score = score_soft(&gold, &gold, &[MetricKind::IcmSoft], Some(&tree))
            .unwrap()
            .average("ICMSoft")
            .unwrap();
        let diverged_score = score_soft(&diverged, &gold, &[MetricKind::IcmSoft], Some(&tree))
            .unwrap()
            .average("ICMSoft")
            .unwrap();

        assert!(diverged_score < self_score);
    }

    #[test]
    fn test_alignment_rejects_unknown_ids() {
        let gold = hard(&[("1", "1")]);
        let pred = hard(&[("2", "1")]);
        assert!(score_hard(&pred, &gold, &[MetricKind::Precision], None).is_err());
    }

    #[test]
    fn test_soft_metric_on_hard_call_is_rejected() {
        let gold = hard(&[("1", "1")]);
        assert!(score_hard(&gold, &gold, &[MetricKind::CrossEntropy], None).is_err());
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let tree = stereotype_tree();
        let gold = hard(&[("1", IMPLICIT), ("2", EXPLICIT), ("3", NO_STEREOTYPE)]);
        let pred = hard(&[("1", EXPLICIT), ("2", EXPLICIT), ("3", NO_STEREOTYPE)]);
        let metrics = [
            MetricKind::Icm,
            MetricKind::IcmNorm,
            MetricKind::Precision,
            MetricKind::Recall,
        ];

        let first = score_hard(&pred, &gold, &metrics, Some(&tree)).unwrap();
        let second = score_hard(&pred, &gold, &metrics, Some(&tree)).unwrap();
        assert_eq!(first, second);
    }
}
