// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation orchestration.
//!
//! Resolves task number and label type from artifact names, materializes
//! missing hard artifacts from their soft siblings, selects the metric set
//! per task, and flattens the engine's nested report into the stable
//! key/value mapping downstream tooling consumes.

use crate::labels::{
    self, read_hard_records, read_soft_records, HardRecord, SoftRecord, TieBreak, EXPLICIT,
    IMPLICIT, NO_STEREOTYPE,
};
use crate::metrics::{score_hard, score_soft, Hierarchy, MetricKind, MetricReport};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors that signal caller bugs or missing inputs; fatal, never retried.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid task {0}: only tasks 1 and 2 exist")]
    InvalidTask(u8),
    #[error("invalid label type {0:?}: must be either \"soft\" or \"hard\"")]
    InvalidLabelType(String),
    #[error("artifact {} was not found and no soft sibling exists to derive it from", .0.display())]
    ArtifactNotFound(PathBuf),
    #[error("artifact name {0:?} does not match <model>_t<digit>_<soft|hard>.<ext>")]
    MalformedName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Soft,
    Hard,
}

impl LabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelType::Soft => "soft",
            LabelType::Hard => "hard",
        }
    }
}

impl FromStr for LabelType {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "soft" => Ok(LabelType::Soft),
            "hard" => Ok(LabelType::Hard),
            other => Err(EvalError::InvalidLabelType(other.to_string())),
        }
    }
}

/// Parsed artifact file name.
///
/// Grammar: `<model> "_t" <digit> "_" ("soft" | "hard") "." <ext>`.
/// `<model>` may itself contain underscores; the task and label-type tokens
/// are anchored at the end of the stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    pub model: String,
    pub task: u8,
    pub label_type: LabelType,
}

impl ArtifactName {
    pub fn parse(path: &Path) -> Result<Self, EvalError> {
        let malformed = || EvalError::MalformedName(path.display().to_string());

        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(malformed)?;
        let (rest, label_token) = stem.rsplit_once('_').ok_or_else(malformed)?;
        let label_type = label_token.parse()?;

        let (model, task_token) = rest.rsplit_once('_').ok_or_else(malformed)?;
        let digit = task_token
            .strip_prefix('t')
            .filter(|d| d.len() == 1)
            .and_then(|d| d.chars().next())
            .filter(char::is_ascii_digit)
            .ok_or_else(malformed)?;
        if model.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            model: model.to_string(),
            task: digit as u8 - b'0',
            label_type,
        })
    }
}

/// Category tree used for the implicit/explicit sub-classification task.
fn stereotype_hierarchy() -> Hierarchy {
    Hierarchy::from_children([
        ("Stereotype", [IMPLICIT, EXPLICIT].as_slice()),
        (NO_STEREOTYPE, [].as_slice()),
    ])
}

/// Metric set and hierarchy per (task, label type).
fn metric_set(
    task: u8,
    label_type: LabelType,
) -> Result<(Vec<MetricKind>, Option<Hierarchy>), EvalError> {
    let metrics = match (task, label_type) {
        (1, LabelType::Hard) => vec![
            MetricKind::FMeasure,
            MetricKind::Precision,
            MetricKind::Recall,
        ],
        (1, LabelType::Soft) => vec![MetricKind::CrossEntropy],
        (2, LabelType::Hard) => vec![
            MetricKind::Icm,
            MetricKind::IcmNorm,
            MetricKind::Precision,
            MetricKind::Recall,
        ],
        (2, LabelType::Soft) => vec![MetricKind::IcmSoft, MetricKind::IcmSoftNorm],
        (other, _) => return Err(EvalError::InvalidTask(other)),
    };
    let hierarchy = (task == 2).then(stereotype_hierarchy);
    Ok((metrics, hierarchy))
}

/// Predictions to evaluate: an artifact on disk or in-memory records.
/// Equivalent content must produce identical metrics either way.
#[derive(Debug, Clone)]
pub enum Predictions {
    Path(PathBuf),
    Hard(Vec<HardRecord>),
    Soft(Vec<SoftRecord>),
}

impl From<&Path> for Predictions {
    fn from(path: &Path) -> Self {
        Predictions::Path(path.to_path_buf())
    }
}

/// Evaluate predictions against a gold artifact for a fixed task and label
/// type, returning the flat metric mapping.
pub fn evaluate(
    pred: &Predictions,
    gold_path: &Path,
    task: u8,
    label_type: LabelType,
) -> Result<BTreeMap<String, f64>> {
    let (metrics, hierarchy) = metric_set(task, label_type)?;

    let report = match label_type {
        LabelType::Hard => {
            let pred_records = match pred {
                Predictions::Path(path) => read_hard_records(path)?,
                Predictions::Hard(records) => records.clone(),
                Predictions::Soft(_) => {
                    bail!("got soft prediction records for a hard evaluation")
                }
            };
            let gold_records = read_hard_records(gold_path)?;
            score_hard(&pred_records, &gold_records, &metrics, hierarchy.as_ref())?
        }
        LabelType::Soft => {
            let pred_records = match pred {
                Predictions::Path(path) => read_soft_records(path)?,
                Predictions::Soft(records) => records.clone(),
                Predictions::Hard(_) => {
                    bail!("got hard prediction records for a soft evaluation")
                }
            };
            let gold_records = read_soft_records(gold_path)?;
            score_soft(&pred_records, &gold_records, &metrics, hierarchy.as_ref())?
        }
    };

    flatten(&report, task, label_type)
}

/// Collapse the nested report into the fixed flat key set for the task.
/// This mapping is the stable public output; the nested shape is not.
fn flatten(
    report: &MetricReport,
    task: u8,
    label_type: LabelType,
) -> Result<BTreeMap<String, f64>> {
    let average = |metric: MetricKind| {
        report
            .average(metric.label())
            .with_context(|| format!("metric {} missing from report", metric.label()))
    };
    let per_class = |metric: MetricKind, class: &str| {
        report.per_class(metric.label(), class).unwrap_or(0.0)
    };

    let mut flat = BTreeMap::new();
    match (task, label_type) {
        (1, LabelType::Hard) => {
            flat.insert("F1".to_string(), average(MetricKind::FMeasure)?);
            flat.insert("Precision".to_string(), average(MetricKind::Precision)?);
            flat.insert("Recall".to_string(), average(MetricKind::Recall)?);
        }
        (1, LabelType::Soft) => {
            flat.insert("Cross Entropy".to_string(), average(MetricKind::CrossEntropy)?);
        }
        (2, LabelType::Hard) => {
            flat.insert("ICM".to_string(), average(MetricKind::Icm)?);
            flat.insert("ICM Norm".to_string(), average(MetricKind::IcmNorm)?);
            flat.insert(
                "PrecisionImplicit".to_string(),
                per_class(MetricKind::Precision, IMPLICIT),
            );
            flat.insert(
                "PrecisionExplicit".to_string(),
                per_class(MetricKind::Precision, EXPLICIT),
            );
            flat.insert(
                "RecallImplicit".to_string(),
                per_class(MetricKind::Recall, IMPLICIT),
            );
            flat.insert(
                "RecallExplicit".to_string(),
                per_class(MetricKind::Recall, EXPLICIT),
            );
        }
        (2, LabelType::Soft) => {
            flat.insert("ICM Soft".to_string(), average(MetricKind::IcmSoft)?);
            flat.insert("ICM Soft Norm".to_string(), average(MetricKind::IcmSoftNorm)?);
        }
        (other, _) => return Err(EvalError::InvalidTask(other).into()),
    }
    Ok(flat)
}

/// When a hard artifact is missing, derive it from its soft sibling; error
/// out naming the missing hard path when no sibling exists either.
fn ensure_hard_artifact(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    let soft = labels::with_label_token(path, "soft")?;
    if soft.is_file() {
        labels::soft_to_hard_file(&soft, TieBreak::default())?;
        Ok(())
    } else {
        Err(EvalError::ArtifactNotFound(path.to_path_buf()).into())
    }
}

/// Evaluate a prediction artifact against a gold artifact, deriving task
/// and label type from the gold file name.
///
/// Naming discipline stands in for explicit parameters here; the derivation
/// must stay compatible with existing artifact names.
pub fn resolve_and_evaluate(pred_path: &Path, gold_path: &Path) -> Result<BTreeMap<String, f64>> {
    let name = ArtifactName::parse(gold_path)?;
    tracing::info!(
        "Evaluating task {} ({} labels) against {}",
        name.task,
        name.label_type.as_str(),
        gold_path.display()
    );

    if name.label_type == LabelType::Hard {
        ensure_hard_artifact(pred_path)?;
        ensure_hard_artifact(gold_path)?;
    }

    evaluate(
        &Predictions::from(pred_path),
        gold_path,
        name.task,
        name.label_type,
    )
}
