// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Baseline prediction CLI.
//!
//! Usage:
//!   run-baselines --train data/train.csv --test data/test.csv --model all
//!   run-baselines --model tfidf --folder baselines

use anyhow::Result;
use clap::Parser;
use detests_eval::cascade::{run_cascade, write_task1_csv, write_task2_csv};
use detests_eval::datasets;
use detests_eval::models::build_variants;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "run-baselines")]
#[command(about = "Create baseline predictions for both detection tasks")]
#[command(version)]
struct Args {
    /// Train file
    #[arg(long, default_value = "data/train.csv")]
    train: PathBuf,

    /// Test file
    #[arg(long, default_value = "data/test.csv")]
    test: PathBuf,

    /// Folder for saving the predictions
    #[arg(long, default_value = "baselines")]
    folder: PathBuf,

    /// Model to run (all, zeros, ones, random, tfidf, fast)
    #[arg(long, default_value = "all")]
    model: String,

    /// Random seed for reproducibility
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let started = chrono::Utc::now();

    tracing::info!("Stereotype detection baselines");
    tracing::info!("Train: {}", args.train.display());
    tracing::info!("Test: {}", args.test.display());
    tracing::info!("Model: {}, seed: {}", args.model, args.seed);

    let train = datasets::load_train(&args.train)?;
    let test = datasets::load_test(&args.test)?;

    let stereotype_labels: Vec<u8> = train.iter().map(|r| r.stereotype).collect();
    let dist = datasets::label_distribution(&stereotype_labels);
    tracing::info!(
        "Loaded {} train rows ({} stereotype-positive) and {} test rows",
        train.len(),
        dist.get(&1).copied().unwrap_or(0),
        test.len()
    );

    let mut summary = Vec::new();
    for mut variant in build_variants(&args.model, args.seed)? {
        tracing::info!("Running variant: {}", variant.slug);
        let table = run_cascade(
            &train,
            &test,
            variant.stage1.as_mut(),
            variant.stage2.as_mut(),
        )?;

        let task1_path = args.folder.join(format!("{}_t1_hard.csv", variant.slug));
        let task2_path = args.folder.join(format!("{}_t2_hard.csv", variant.slug));
        write_task1_csv(&table, &task1_path)?;
        write_task2_csv(&table, &task2_path)?;
        tracing::info!(
            "Saved {} and {}",
            task1_path.display(),
            task2_path.display()
        );

        let stereotypes = table.rows().iter().filter(|r| r.stereotype == 1).count();
        let implicits = table.rows().iter().filter(|r| r.implicit == 1).count();
        summary.push((variant.slug, table.len(), stereotypes, implicits));
    }

    println!("\n{}", "=".repeat(60));
    println!("BASELINE SUMMARY");
    println!("{}", "=".repeat(60));
    println!(
        "{:<20} {:>8} {:>12} {:>10}",
        "Model", "Rows", "Stereotype", "Implicit"
    );
    println!("{:-<60}", "");
    for (slug, rows, stereotypes, implicits) in &summary {
        println!(
            "{:<20} {:>8} {:>12} {:>10}",
            slug, rows, stereotypes, implicits
        );
    }
    println!("{:-<60}", "");
    println!(
        "Predictions saved to {} ({} variants, started {})",
        args.folder.display(),
        summary.len(),
        started.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}
