// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Baseline scoring models.
//!
//! Implements:
//! - Constant classifiers (all zeros, all ones)
//! - Weighted random classifier (draws from the training label distribution)
//! - TF-IDF + nearest class centroid
//! - Hashed character n-gram embedding + nearest class centroid
//!
//! Everything sits behind [`TextClassifier`], the single capability the
//! cascading predictor depends on.

use anyhow::{ensure, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// A scoring backend: fit on labeled texts, score unlabeled ones.
///
/// Scores are interpreted as positive iff > 0.5, which covers both hard 0/1
/// classifiers and continuous ones under a single threshold rule.
pub trait TextClassifier {
    fn fit_predict(
        &mut self,
        train_texts: &[&str],
        train_labels: &[u8],
        test_texts: &[&str],
    ) -> Result<Vec<f64>>;

    fn name(&self) -> &str;
}

/// Predicts the same score for every text.
#[derive(Debug, Clone)]
pub struct ConstantClassifier {
    score: f64,
    name: &'static str,
}

impl ConstantClassifier {
    pub fn zeros() -> Self {
        Self {
            score: 0.0,
            name: "zeros",
        }
    }

    pub fn ones() -> Self {
        Self {
            score: 1.0,
            name: "ones",
        }
    }
}

impl TextClassifier for ConstantClassifier {
    fn fit_predict(
        &mut self,
        _train_texts: &[&str],
        _train_labels: &[u8],
        test_texts: &[&str],
    ) -> Result<Vec<f64>> {
        Ok(vec![self.score; test_texts.len()])
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Draws labels at random, weighted by the empirical training distribution.
#[derive(Debug, Clone)]
pub struct WeightedRandomClassifier {
    seed: u64,
}

impl WeightedRandomClassifier {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl TextClassifier for WeightedRandomClassifier {
    fn fit_predict(
        &mut self,
        _train_texts: &[&str],
        train_labels: &[u8],
        test_texts: &[&str],
    ) -> Result<Vec<f64>> {
        ensure!(
            !train_labels.is_empty(),
            "weighted random classifier needs at least one training label"
        );

        let positives = train_labels.iter().filter(|&&l| l == 1).count();
        let p_positive = positives as f64 / train_labels.len() as f64;

        // Reseed per call so repeated runs are reproducible.
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(test_texts
            .iter()
            .map(|_| if rng.gen::<f64>() < p_positive { 1.0 } else { 0.0 })
            .collect())
    }

    fn name(&self) -> &str {
        "random"
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 2)
        .map(|s| s.to_string())
        .collect()
}

/// Word n-grams up to `max_n`, joined by a space.
fn word_ngrams(text: &str, max_n: usize) -> Vec<String> {
    let tokens = tokenize(text);
    let mut features = Vec::new();
    for n in 1..=max_n {
        for window in tokens.windows(n) {
            features.push(window.join(" "));
        }
    }
    features
}

fn l2_normalize(vector: &mut HashMap<usize, f64>) {
    let norm: f64 = vector.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in vector.values_mut() {
            *value /= norm;
        }
    }
}

/// Score test vectors by cosine similarity to the two class centroids,
/// mapped into (0, 1) so the 0.5 threshold separates the classes.
fn nearest_centroid_scores(
    train: &[HashMap<usize, f64>],
    train_labels: &[u8],
    test: &[HashMap<usize, f64>],
    dim: usize,
) -> Vec<f64> {
    let mut centroids = [vec![0.0f64; dim], vec![0.0f64; dim]];
    for (vector, &label) in train.iter().zip(train_labels) {
        let centroid = &mut centroids[usize::from(label == 1)];
        for (&index, &value) in vector {
            centroid[index] += value;
        }
    }
    for centroid in &mut centroids {
        let norm: f64 = centroid.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for value in centroid.iter_mut() {
                *value /= norm;
            }
        }
    }

    test.iter()
        .map(|vector| {
            let mut sims = [0.0f64; 2];
            for (&index, &value) in vector {
                sims[0] += value * centroids[0][index];
                sims[1] += value * centroids[1][index];
            }
            let total = sims[0] + sims[1];
            if total > 0.0 {
                sims[1] / total
            } else {
                0.5
            }
        })
        .collect()
}

/// TF-IDF vectors over word n-grams, nearest class centroid by cosine.
#[derive(Debug, Clone)]
pub struct TfidfCentroidClassifier {
    max_ngram: usize,
    max_features: usize,
}

impl TfidfCentroidClassifier {
    pub fn new(max_ngram: usize, max_features: usize) -> Self {
        Self {
            max_ngram,
            max_features,
        }
    }

    fn vectorize(
        &self,
        features: &[Vec<String>],
        vocab: &HashMap<String, usize>,
        idf: &[f64],
    ) -> Vec<HashMap<usize, f64>> {
        features
            .iter()
            .map(|doc| {
                let mut counts: HashMap<usize, usize> = HashMap::new();
                for feature in doc {
                    if let Some(&index) = vocab.get(feature) {
                        *counts.entry(index).or_insert(0) += 1;
                    }
                }
                let doc_len = doc.len().max(1) as f64;
                let mut vector: HashMap<usize, f64> = counts
                    .into_iter()
                    .map(|(index, count)| (index, count as f64 / doc_len * idf[index]))
                    .collect();
                l2_normalize(&mut vector);
                vector
            })
            .collect()
    }
}

impl Default for TfidfCentroidClassifier {
    fn default() -> Self {
        Self::new(3, 10_000)
    }
}

impl TextClassifier for TfidfCentroidClassifier {
    fn fit_predict(
        &mut self,
        train_texts: &[&str],
        train_labels: &[u8],
        test_texts: &[&str],
    ) -> Result<Vec<f64>> {
        ensure!(
            train_texts.len() == train_labels.len(),
            "got {} training texts but {} labels",
            train_texts.len(),
            train_labels.len()
        );
        ensure!(!train_texts.is_empty(), "tfidf classifier needs training texts");

        let train_features: Vec<Vec<String>> = train_texts
            .iter()
            .map(|text| word_ngrams(text, self.max_ngram))
            .collect();

        // Document frequencies over the training split.
        let mut df: HashMap<String, usize> = HashMap::new();
        for doc in &train_features {
            let unique: HashSet<&String> = doc.iter().collect();
            for feature in unique {
                *df.entry(feature.clone()).or_insert(0) += 1;
            }
        }

        // Keep the most frequent features; ties resolved by term so the
        // vocabulary is deterministic.
        let mut ranked: Vec<(String, usize)> = df.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.max_features);

        let n_docs = train_features.len() as f64;
        let vocab: HashMap<String, usize> = ranked
            .iter()
            .enumerate()
            .map(|(index, (term, _))| (term.clone(), index))
            .collect();
        let idf: Vec<f64> = ranked
            .iter()
            .map(|(_, count)| (n_docs / *count as f64).ln() + 1.0)
            .collect();

        let test_features: Vec<Vec<String>> = test_texts
            .iter()
            .map(|text| word_ngrams(text, self.max_ngram))
            .collect();

        let train_vectors = self.vectorize(&train_features, &vocab, &idf);
        let test_vectors = self.vectorize(&test_features, &vocab, &idf);

        Ok(nearest_centroid_scores(
            &train_vectors,
            train_labels,
            &test_vectors,
            vocab.len(),
        ))
    }

    fn name(&self) -> &str {
        "tfidf"
    }
}

/// Bag of hashed character n-grams as a cheap text embedding, nearest class
/// centroid by cosine.
#[derive(Debug, Clone)]
pub struct HashedNgramClassifier {
    dim: usize,
    min_n: usize,
    max_n: usize,
}

impl HashedNgramClassifier {
    pub fn new(dim: usize, min_n: usize, max_n: usize) -> Self {
        Self { dim, min_n, max_n }
    }

    fn embed(&self, text: &str) -> HashMap<usize, f64> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let mut vector: HashMap<usize, f64> = HashMap::new();
        for n in self.min_n..=self.max_n {
            for window in chars.windows(n) {
                let mut hasher = DefaultHasher::new();
                window.hash(&mut hasher);
                let bucket = (hasher.finish() % self.dim as u64) as usize;
                *vector.entry(bucket).or_insert(0.0) += 1.0;
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashedNgramClassifier {
    fn default() -> Self {
        Self::new(512, 3, 5)
    }
}

impl TextClassifier for HashedNgramClassifier {
    fn fit_predict(
        &mut self,
        train_texts: &[&str],
        train_labels: &[u8],
        test_texts: &[&str],
    ) -> Result<Vec<f64>> {
        ensure!(
            train_texts.len() == train_labels.len(),
            "got {} training texts but {} labels",
            train_texts.len(),
            train_labels.len()
        );
        ensure!(!train_texts.is_empty(), "embedding classifier needs training texts");

        let train_vectors: Vec<_> = train_texts.iter().map(|text| self.embed(text)).collect();
        let test_vectors: Vec<_> = test_texts.iter().map(|text| self.embed(text)).collect();

        Ok(nearest_centroid_scores(
            &train_vectors,
            train_labels,
            &test_vectors,
            self.dim,
        ))
    }

    fn name(&self) -> &str {
        "fasttext"
    }
}

/// A named pair of stage classifiers for one pipeline run.
pub struct ModelVariant {
    /// Slug used in artifact file names.
    pub slug: &'static str,
    pub stage1: Box<dyn TextClassifier>,
    pub stage2: Box<dyn TextClassifier>,
}

/// Build the variants selected by `model`, mirroring the command surface:
/// one of `all`, `zeros`, `ones`, `random`, `tfidf`, `fast`.
pub fn build_variants(model: &str, seed: u64) -> Result<Vec<ModelVariant>> {
    let mut variants: Vec<ModelVariant> = Vec::new();
    let all = model == "all";

    if all || model == "zeros" {
        variants.push(ModelVariant {
            slug: "all_zeros",
            stage1: Box::new(ConstantClassifier::zeros()),
            stage2: Box::new(ConstantClassifier::zeros()),
        });
    }
    if all || model == "ones" {
        variants.push(ModelVariant {
            slug: "all_ones",
            stage1: Box::new(ConstantClassifier::ones()),
            stage2: Box::new(ConstantClassifier::ones()),
        });
    }
    if all || model == "random" {
        variants.push(ModelVariant {
            slug: "random_classifier",
            stage1: Box::new(WeightedRandomClassifier::new(seed)),
            stage2: Box::new(WeightedRandomClassifier::new(seed)),
        });
    }
    if all || model == "tfidf" {
        variants.push(ModelVariant {
            slug: "tfidf_centroid",
            stage1: Box::new(TfidfCentroidClassifier::default()),
            stage2: Box::new(TfidfCentroidClassifier::default()),
        });
    }
    if all || model == "fast" {
        variants.push(ModelVariant {
            slug: "fasttext_centroid",
            stage1: Box::new(HashedNgramClassifier::default()),
            stage2: Box::new(HashedNgramClassifier::default()),
        });
    }

    ensure!(
        !variants.is_empty(),
        "unknown model {:?}: expected one of all, zeros, ones, random, tfidf, fast",
        model
    );
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_corpus() -> (Vec<&'static str>, Vec<u8>) {
        (
            vec![
                "those people are all lazy and dishonest",
                "they are all criminals every single one",
                "the council approved the budget on tuesday",
                "rain is expected across the region today",
            ],
            vec![1, 1, 0, 0],
        )
    }

    #[test]
    fn test_constant_classifiers() {
        let (train, labels) = toy_corpus();
        let test = ["anything at all", "more text"];

        let mut zeros = ConstantClassifier::zeros();
        assert_eq!(zeros.fit_predict(&train, &labels, &test).unwrap(), vec![0.0, 0.0]);

        let mut ones = ConstantClassifier::ones();
        assert_eq!(ones.fit_predict(&train, &labels, &test).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_weighted_random_is_seed_deterministic() {
        let (train, labels) = toy_corpus();
        let test = vec!["a"; 20];

        let mut a = WeightedRandomClassifier::new(42);
        let mut b = WeightedRandomClassifier::new(42);
        let first = a.fit_predict(&train, &labels, &test).unwrap();
        let second = b.fit_predict(&train, &labels, &test).unwrap();

        assert_eq!(first, second);
        assert!(first.iter().all(|&s| s == 0.0 || s == 1.0));
    }

    #[test]
    fn test_weighted_random_requires_training_labels() {
        let mut model = WeightedRandomClassifier::new(42);
        assert!(model.fit_predict(&[], &[], &["x"]).is_err());
    }

    #[test]
    fn test_tfidf_separates_toy_classes() {
        let (train, labels) = toy_corpus();
        let test = [
            "those people are lazy criminals",
            "the council expected rain on tuesday",
        ];

        let mut model = TfidfCentroidClassifier::default();
        let scores = model.fit_predict(&train, &labels, &test).unwrap();

        assert!(scores[0] > 0.5, "stereotyped text scored {}", scores[0]);
        assert!(scores[1] < 0.5, "neutral text scored {}", scores[1]);
    }

    #[test]
    fn test_hashed_ngram_separates_toy_classes() {
        let (train, labels) = toy_corpus();
        let test = [
            "they are all lazy dishonest criminals",
            "the council approved rain on tuesday",
        ];

        let mut model = HashedNgramClassifier::default();
        let scores = model.fit_predict(&train, &labels, &test).unwrap();

        assert!(scores[0] > 0.5, "stereotyped text scored {}", scores[0]);
        assert!(scores[1] < 0.5, "neutral text scored {}", scores[1]);
    }

    #[test]
    fn test_fit_predict_handles_empty_test_set() {
        let (train, labels) = toy_corpus();

        let mut tfidf = TfidfCentroidClassifier::default();
        assert!(tfidf.fit_predict(&train, &labels, &[]).unwrap().is_empty());

        let mut random = WeightedRandomClassifier::new(42);
        assert!(random.fit_predict(&train, &labels, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_build_variants() {
        let all = build_variants("all", 42).unwrap();
        assert_eq!(all.len(), 5);
        let slugs: Vec<_> = all.iter().map(|v| v.slug).collect();
        assert!(slugs.contains(&"all_zeros"));
        assert!(slugs.contains(&"tfidf_centroid"));

        let one = build_variants("random", 42).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].slug, "random_classifier");

        assert!(build_variants("svm", 42).is_err());
    }
}
