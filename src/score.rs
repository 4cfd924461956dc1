// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Scoring CLI.
//!
//! Evaluates a prediction artifact against a gold artifact; task number and
//! label type are derived from the gold file name
//! (`<model>_t<digit>_<soft|hard>.<ext>`). Missing hard artifacts are
//! derived from their soft siblings on the fly.

use anyhow::Result;
use clap::Parser;
use detests_eval::evaluate::resolve_and_evaluate;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "score")]
#[command(about = "Evaluate predictions against gold labels")]
#[command(version)]
struct Args {
    /// Prediction artifact
    pred: PathBuf,

    /// Gold artifact; its name determines the task and label type
    gold: PathBuf,

    /// Print the metrics as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let metrics = resolve_and_evaluate(&args.pred, &args.gold)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(40));
    println!("EVALUATION RESULTS");
    println!("{}", "=".repeat(40));
    for (name, value) in &metrics {
        println!("{:<24} {:>12.4}", name, value);
    }
    println!("{}", "-".repeat(40));

    Ok(())
}
