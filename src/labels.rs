// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Soft and hard label handling.
//!
//! A soft label distributes weight over category names; a hard label is a
//! single category. Artifacts are JSON arrays of `{id, value}` records where
//! `value` is the weight map (soft) or a category string (hard), named
//! `<model>_t<digit>_<soft|hard>.json`.

use crate::io::write_atomic;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Category name for texts without a stereotype.
pub const NO_STEREOTYPE: &str = "NoStereotype";
/// Category name for implicit stereotypes.
pub const IMPLICIT: &str = "Implicit";
/// Category name for explicit stereotypes.
pub const EXPLICIT: &str = "Explicit";

/// Tie-break policy for equal-weight categories.
///
/// A plain argmax over equal weights has no canonical winner, so the choice
/// is an explicit policy rather than an accident of map iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The lexicographically smallest category name wins.
    #[default]
    Lexicographic,
    /// The category listed first in the soft label wins. This is where the
    /// ambiguity of a plain scan lives; only use it to reproduce outputs of
    /// tools that scan in source order.
    FirstListed,
}

/// A distribution of weight over category names.
///
/// Weights are non-negative but not necessarily normalized; no consumer may
/// assume they sum to one. Insertion order is preserved so
/// [`TieBreak::FirstListed`] is well defined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoftLabel(IndexMap<String, f64>);

impl SoftLabel {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weight assigned to `category`, 0.0 when absent.
    pub fn weight(&self, category: &str) -> f64 {
        self.0.get(category).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Check the weight invariant: every value finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        for (category, weight) in self.iter() {
            if !weight.is_finite() || weight < 0.0 {
                bail!("category {:?} has invalid weight {}", category, weight);
            }
        }
        Ok(())
    }

    /// Collapse the distribution to a single category.
    ///
    /// The winner is the maximum-weight category, except that a combined
    /// Implicit + Explicit mass beating NoStereotype forces the verdict into
    /// the stereotype branch, where the sub-label is the local argmax.
    /// Without that rule a NoStereotype plurality would win whenever the
    /// stereotype mass is split across the two sub-categories.
    pub fn to_hard(&self, tie: TieBreak) -> Result<String> {
        if self.0.is_empty() {
            bail!("cannot collapse an empty soft label");
        }

        if let (Some(&implicit), Some(&explicit)) = (self.0.get(IMPLICIT), self.0.get(EXPLICIT)) {
            if implicit + explicit > self.weight(NO_STEREOTYPE) {
                let winner = argmax([(IMPLICIT, implicit), (EXPLICIT, explicit)], tie)
                    .context("stereotype branch has no categories")?;
                return Ok(winner.to_string());
            }
        }

        let winner = argmax(self.iter(), tie).context("soft label has no categories")?;
        Ok(winner.to_string())
    }
}

fn argmax<'a>(entries: impl IntoIterator<Item = (&'a str, f64)>, tie: TieBreak) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for (name, weight) in entries {
        let better = match best {
            None => true,
            Some((best_name, best_weight)) => {
                weight > best_weight
                    || (tie == TieBreak::Lexicographic
                        && weight == best_weight
                        && name < best_name)
            }
        };
        if better {
            best = Some((name, weight));
        }
    }
    best.map(|(name, _)| name)
}

/// One row of a soft artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftRecord {
    pub id: String,
    pub value: SoftLabel,
}

/// One row of a hard artifact: same shape with the weight map collapsed to a
/// category string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardRecord {
    pub id: String,
    pub value: String,
}

/// Read and validate a soft artifact.
pub fn read_soft_records(path: &Path) -> Result<Vec<SoftRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read soft artifact: {}", path.display()))?;
    let records: Vec<SoftRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse soft artifact: {}", path.display()))?;
    for record in &records {
        record
            .value
            .validate()
            .with_context(|| format!("invalid soft label for id {:?}", record.id))?;
    }
    Ok(records)
}

/// Read a hard artifact.
pub fn read_hard_records(path: &Path) -> Result<Vec<HardRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hard artifact: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse hard artifact: {}", path.display()))
}

/// Write a hard artifact atomically.
pub fn write_hard_records(records: &[HardRecord], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    write_atomic(path, json.as_bytes())
}

/// Replace the trailing label-type token of an artifact file name, e.g.
/// `runs/model_t2_soft.json` -> `runs/model_t2_hard.json`.
pub fn with_label_token(path: &Path, token: &str) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("artifact path {} has no usable file name", path.display()))?;
    let (base, _) = stem
        .rsplit_once('_')
        .with_context(|| format!("artifact name {:?} has no label-type suffix", stem))?;
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", base, token, ext),
        None => format!("{}_{}", base, token),
    };
    Ok(path.with_file_name(name))
}

/// Materialize the hard form of a soft artifact next to it.
///
/// Reads `<base>_soft.json`, collapses every record, and writes
/// `<base>_hard.json`. The soft source is never modified; running the
/// transform twice yields byte-identical hard artifacts.
pub fn soft_to_hard_file(soft_path: &Path, tie: TieBreak) -> Result<PathBuf> {
    tracing::info!(
        "Transforming soft labels into hard labels for {}",
        soft_path.display()
    );

    let soft = read_soft_records(soft_path)?;
    let hard = soft
        .iter()
        .map(|record| {
            let value = record
                .value
                .to_hard(tie)
                .with_context(|| format!("failed to collapse soft label for id {:?}", record.id))?;
            Ok(HardRecord {
                id: record.id.clone(),
                value,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let hard_path = with_label_token(soft_path, "hard")?;
    write_hard_records(&hard, &hard_path)?;
    Ok(hard_path)
}
