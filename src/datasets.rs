// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading for stereotype detection.
//!
//! Train files are CSV with columns `id,text,stereotype[,implicit]`; test
//! files carry `id,text` only. The `implicit` column is meaningful only for
//! rows flagged `stereotype = 1`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One annotated training sample. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRecord {
    /// Unique identifier
    pub id: String,
    /// Text content to classify
    pub text: String,
    /// Whether the text contains a stereotype (0 or 1)
    pub stereotype: u8,
    /// Whether the stereotype is implicit (1) or explicit (0); only
    /// annotated for stereotype-positive rows
    #[serde(default)]
    pub implicit: Option<u8>,
}

/// One unlabeled test sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: String,
    pub text: String,
}

/// Load the training split from a CSV file.
pub fn load_train(path: &Path) -> Result<Vec<TrainRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open train file: {}", path.display()))?;
    train_from_reader(file, &path.display().to_string())
}

/// Load the test split from a CSV file.
pub fn load_test(path: &Path) -> Result<Vec<TestRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open test file: {}", path.display()))?;
    test_from_reader(file, &path.display().to_string())
}

fn train_from_reader<R: Read>(reader: R, origin: &str) -> Result<Vec<TrainRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize().enumerate() {
        let record: TrainRecord =
            row.with_context(|| format!("Failed to read record {} in {}", idx, origin))?;
        records.push(record);
    }
    Ok(records)
}

fn test_from_reader<R: Read>(reader: R, origin: &str) -> Result<Vec<TestRecord>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut records = Vec::new();
    for (idx, row) in reader.deserialize().enumerate() {
        let record: TestRecord =
            row.with_context(|| format!("Failed to read record {} in {}", idx, origin))?;
        records.push(record);
    }
    Ok(records)
}

/// Training rows usable for the implicit/explicit stage: flagged as
/// stereotype and carrying the sub-annotation. Flagged rows without an
/// annotation are skipped with a warning.
pub fn task2_training_rows(train: &[TrainRecord]) -> Vec<(&str, u8)> {
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for record in train {
        if record.stereotype != 1 {
            continue;
        }
        match record.implicit {
            Some(implicit) => rows.push((record.text.as_str(), implicit)),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(
            "{} stereotype-positive rows lack an implicit annotation and were skipped",
            dropped
        );
    }
    rows
}

/// Count occurrences of each label value.
pub fn label_distribution(labels: &[u8]) -> HashMap<u8, usize> {
    let mut dist = HashMap::new();
    for label in labels {
        *dist.entry(*label).or_insert(0) += 1;
    }
    dist
}

/// Generate a synthetic corpus for development and testing.
pub fn synthetic(n_train: usize, n_test: usize, seed: u64) -> (Vec<TrainRecord>, Vec<TestRecord>) {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    let explicit_phrases = [
        "Those people are all lazy and everyone knows it",
        "You can never trust anyone from that neighbourhood",
        "They only come here to live off our benefits",
        "That group is simply incapable of honest work",
    ];

    let implicit_phrases = [
        "People like that never really fit in around here",
        "It makes you wonder why they always stick to their own",
        "Funny how the street got louder when they moved in",
        "Of course the new family has so many children",
    ];

    let neutral_phrases = [
        "The council approved the new budget on Tuesday",
        "Rain is expected across the region this weekend",
        "The bakery on the corner extended its opening hours",
        "Researchers published the survey results this morning",
    ];

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let sample_text = |rng: &mut ChaCha8Rng, i: usize| -> (String, u8, Option<u8>) {
        if rng.gen_bool(0.5) {
            let implicit = rng.gen_bool(0.5);
            let pool = if implicit { &implicit_phrases } else { &explicit_phrases };
            let phrase = pool[rng.gen_range(0..pool.len())];
            (format!("{} - sample {}", phrase, i), 1, Some(u8::from(implicit)))
        } else {
            let phrase = neutral_phrases[rng.gen_range(0..neutral_phrases.len())];
            (format!("{} - sample {}", phrase, i), 0, None)
        }
    };

    let train = (0..n_train)
        .map(|i| {
            let (text, stereotype, implicit) = sample_text(&mut rng, i);
            TrainRecord {
                id: format!("train_{}", i),
                text,
                stereotype,
                implicit,
            }
        })
        .collect();

    let test = (0..n_test)
        .map(|i| {
            let (text, _, _) = sample_text(&mut rng, i);
            TestRecord {
                id: format!("test_{}", i),
                text,
            }
        })
        .collect();

    (train, test)
}
