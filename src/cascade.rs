// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Two-stage cascading prediction.
//!
//! Stage 1 scores every test text for stereotype presence. Only rows it
//! flags positive are forwarded to stage 2, which decides implicit vs
//! explicit; every other row keeps the default sub-label 0. The result is
//! always a full-size table aligned with the test set.

use crate::datasets::{task2_training_rows, TestRecord, TrainRecord};
use crate::io::write_atomic;
use crate::models::TextClassifier;
use anyhow::{ensure, Context, Result};
use serde::Serialize;
use std::path::Path;

/// Decision threshold shared by both stages.
pub const POSITIVE_THRESHOLD: f64 = 0.5;

/// One test row with both task decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionRow {
    pub id: String,
    pub stereotype: u8,
    /// Only meaningful where `stereotype = 1`; 0 otherwise.
    pub implicit: u8,
}

/// Full-size result table: one row per test sample, same ids, same order.
#[derive(Debug, Clone, Default)]
pub struct PredictionTable {
    rows: Vec<PredictionRow>,
}

impl PredictionTable {
    pub fn rows(&self) -> &[PredictionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run the two-stage cascade.
///
/// Stage 2 only ever sees the test rows stage 1 flagged positive. An empty
/// mask is a valid empty result: stage 2 is skipped and every row keeps its
/// default sub-label.
pub fn run_cascade(
    train: &[TrainRecord],
    test: &[TestRecord],
    stage1: &mut dyn TextClassifier,
    stage2: &mut dyn TextClassifier,
) -> Result<PredictionTable> {
    let train_texts: Vec<&str> = train.iter().map(|r| r.text.as_str()).collect();
    let train_labels: Vec<u8> = train.iter().map(|r| r.stereotype).collect();
    let test_texts: Vec<&str> = test.iter().map(|r| r.text.as_str()).collect();

    let scores1 = stage1
        .fit_predict(&train_texts, &train_labels, &test_texts)
        .with_context(|| format!("stage-1 classifier {:?} failed", stage1.name()))?;
    ensure!(
        scores1.len() == test.len(),
        "stage 1 returned {} scores for {} test rows",
        scores1.len(),
        test.len()
    );

    let mut rows: Vec<PredictionRow> = test
        .iter()
        .zip(&scores1)
        .map(|(record, &score)| PredictionRow {
            id: record.id.clone(),
            stereotype: u8::from(score > POSITIVE_THRESHOLD),
            implicit: 0,
        })
        .collect();

    let masked: Vec<usize> = scores1
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > POSITIVE_THRESHOLD)
        .map(|(index, _)| index)
        .collect();

    if masked.is_empty() {
        tracing::info!("stage 1 flagged no rows; skipping stage 2");
        return Ok(PredictionTable { rows });
    }

    let (train2_texts, train2_labels): (Vec<&str>, Vec<u8>) =
        task2_training_rows(train).into_iter().unzip();
    let masked_texts: Vec<&str> = masked.iter().map(|&i| test[i].text.as_str()).collect();

    tracing::info!(
        "stage 2 runs on {} of {} test rows with {} training rows",
        masked.len(),
        test.len(),
        train2_texts.len()
    );

    let scores2 = stage2
        .fit_predict(&train2_texts, &train2_labels, &masked_texts)
        .with_context(|| format!("stage-2 classifier {:?} failed", stage2.name()))?;
    ensure!(
        scores2.len() == masked.len(),
        "stage 2 returned {} scores for {} masked rows",
        scores2.len(),
        masked.len()
    );

    for (&row_index, &score) in masked.iter().zip(&scores2) {
        rows[row_index].implicit = u8::from(score > POSITIVE_THRESHOLD);
    }

    Ok(PredictionTable { rows })
}

/// Write the `id,stereotype` artifact.
pub fn write_task1_csv(table: &PredictionTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["id", "stereotype"])?;
    for row in &table.rows {
        writer.write_record([row.id.as_str(), &row.stereotype.to_string()])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush csv writer: {}", e))?;
    write_atomic(path, &bytes)
}

/// Write the `id,stereotype,implicit` artifact.
pub fn write_task2_csv(table: &PredictionTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["id", "stereotype", "implicit"])?;
    for row in &table.rows {
        writer.write_record([
            row.id.as_str(),
            &row.stereotype.to_string(),
            &row.implicit.to_string(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush csv writer: {}", e))?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a fixed score per call and records the test sizes it saw.
    struct ScriptedClassifier {
        scores: Vec<f64>,
        seen_test_sizes: Vec<usize>,
        seen_train_sizes: Vec<usize>,
    }

    impl ScriptedClassifier {
        fn new(scores: Vec<f64>) -> Self {
            Self {
                scores,
                seen_test_sizes: Vec::new(),
                seen_train_sizes: Vec::new(),
            }
        }
    }

    impl TextClassifier for ScriptedClassifier {
        fn fit_predict(
            &mut self,
            train_texts: &[&str],
            _train_labels: &[u8],
            test_texts: &[&str],
        ) -> Result<Vec<f64>> {
            self.seen_train_sizes.push(train_texts.len());
            self.seen_test_sizes.push(test_texts.len());
            Ok(self.scores[..test_texts.len()].to_vec())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn fixture() -> (Vec<TrainRecord>, Vec<TestRecord>) {
        let train = vec![
            TrainRecord {
                id: "tr1".into(),
                text: "stereotyped one".into(),
                stereotype: 1,
                implicit: Some(1),
            },
            TrainRecord {
                id: "tr2".into(),
                text: "stereotyped two".into(),
                stereotype: 1,
                implicit: Some(0),
            },
            TrainRecord {
                id: "tr3".into(),
                text: "neutral".into(),
                stereotype: 0,
                implicit: None,
            },
        ];
        let test = (0..10)
            .map(|i| TestRecord {
                id: format!("te{}", i),
                text: format!("test text {}", i),
            })
            .collect();
        (train, test)
    }

    #[test]
    fn test_only_masked_rows_reach_stage_two() {
        let (train, test) = fixture();
        let mut stage1 =
            ScriptedClassifier::new(vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        // Stage 2 would say "implicit" for everything it is shown.
        let mut stage2 = ScriptedClassifier::new(vec![1.0; 10]);

        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        assert_eq!(table.len(), 10);
        assert_eq!(stage2.seen_test_sizes, vec![2]);
        // Only the two stereotype-annotated rows are usable for training.
        assert_eq!(stage2.seen_train_sizes, vec![2]);

        let rows = table.rows();
        assert_eq!(rows[0].stereotype, 1);
        assert_eq!(rows[0].implicit, 1);
        assert_eq!(rows[2].stereotype, 1);
        assert_eq!(rows[2].implicit, 1);

        // The other eight rows keep the default regardless of what stage 2
        // would have predicted for them.
        for row in rows.iter().enumerate().filter(|(i, _)| *i != 0 && *i != 2) {
            assert_eq!(row.1.stereotype, 0);
            assert_eq!(row.1.implicit, 0);
        }
    }

    #[test]
    fn test_ids_and_order_match_test_set() {
        let (train, test) = fixture();
        let mut stage1 = ScriptedClassifier::new(vec![0.9; 10]);
        let mut stage2 = ScriptedClassifier::new(vec![0.2; 10]);

        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        let ids: Vec<_> = table.rows().iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<_> = test.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_empty_mask_skips_stage_two() {
        let (train, test) = fixture();
        let mut stage1 = ScriptedClassifier::new(vec![0.0; 10]);
        let mut stage2 = ScriptedClassifier::new(vec![1.0; 10]);

        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        assert_eq!(table.len(), 10);
        assert!(stage2.seen_test_sizes.is_empty(), "stage 2 must not run");
        assert!(table.rows().iter().all(|r| r.stereotype == 0 && r.implicit == 0));
    }

    #[test]
    fn test_threshold_is_strict() {
        let (train, test) = fixture();
        // Exactly 0.5 is not positive.
        let mut scores = vec![0.5; 10];
        scores[3] = 0.51;
        let mut stage1 = ScriptedClassifier::new(scores);
        let mut stage2 = ScriptedClassifier::new(vec![1.0; 10]);

        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        let positives: Vec<_> = table
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.stereotype == 1)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positives, vec![3]);
    }

    #[test]
    fn test_stage_one_length_mismatch_is_rejected() {
        let (train, test) = fixture();

        struct Short;
        impl TextClassifier for Short {
            fn fit_predict(&mut self, _: &[&str], _: &[u8], _: &[&str]) -> Result<Vec<f64>> {
                Ok(vec![1.0])
            }
            fn name(&self) -> &str {
                "short"
            }
        }

        let mut stage1 = Short;
        let mut stage2 = ScriptedClassifier::new(vec![1.0; 10]);
        assert!(run_cascade(&train, &test, &mut stage1, &mut stage2).is_err());
    }

    #[test]
    fn test_cascade_with_real_models_on_synthetic_corpus() {
        let (train, test) = crate::datasets::synthetic(200, 40, 42);
        let mut stage1 = crate::models::TfidfCentroidClassifier::default();
        let mut stage2 = crate::models::TfidfCentroidClassifier::default();

        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        assert_eq!(table.len(), 40);
        for row in table.rows() {
            if row.stereotype == 0 {
                assert_eq!(row.implicit, 0);
            }
        }
    }

    #[test]
    fn test_csv_artifacts() {
        let (train, test) = fixture();
        let mut stage1 =
            ScriptedClassifier::new(vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let mut stage2 = ScriptedClassifier::new(vec![1.0, 0.0]);
        let table = run_cascade(&train, &test, &mut stage1, &mut stage2).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let t1 = dir.path().join("model_t1_hard.csv");
        let t2 = dir.path().join("model_t2_hard.csv");
        write_task1_csv(&table, &t1).unwrap();
        write_task2_csv(&table, &t2).unwrap();

        let t1_content = std::fs::read_to_string(&t1).unwrap();
        assert!(t1_content.starts_with("id,stereotype\n"));
        assert!(t1_content.contains("te0,1"));
        assert_eq!(t1_content.lines().count(), 11);

        let t2_content = std::fs::read_to_string(&t2).unwrap();
        assert!(t2_content.starts_with("id,stereotype,implicit\n"));
        assert!(t2_content.contains("te0,1,1"));
        assert!(t2_content.contains("te2,1,0"));
    }
}
