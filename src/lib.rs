// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Baselines and evaluation for two-stage stereotype detection.
//!
//! This crate provides:
//! - Dataset loading for train/test CSV splits
//! - Soft/hard label artifacts and soft-to-hard conversion
//! - Baseline models behind a single `fit_predict` capability
//! - A cascading two-stage predictor (detection, then implicit/explicit)
//! - A scoring engine with hierarchy-aware information-contrast metrics
//! - Evaluation orchestration driven by artifact naming conventions

pub mod cascade;
pub mod datasets;
pub mod evaluate;
mod io;
pub mod labels;
pub mod metrics;
pub mod models;

pub use cascade::{run_cascade, PredictionRow, PredictionTable};
pub use datasets::{load_test, load_train, TestRecord, TrainRecord};
pub use evaluate::{resolve_and_evaluate, ArtifactName, EvalError, LabelType, Predictions};
pub use labels::{soft_to_hard_file, HardRecord, SoftLabel, SoftRecord, TieBreak};
pub use metrics::{Hierarchy, MetricKind, MetricReport};
pub use models::{build_variants, ModelVariant, TextClassifier};
