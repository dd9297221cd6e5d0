#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::process;

use sbp::data::{Cohort, PhenotypeColumns, load_cohort};
use sbp::hitmiss::HitMissStrategy;
use sbp::model::TrainedPipeline;
use sbp::pipeline::{SbpConfig, SubtypePipeline};
use sbp::stats::classifier::ClassifierKind;
use sbp::two_level::TwoLevelPrediction;
use sbp::validation::{LooScores, estimate_accuracy, estimate_accuracy_parallel};

#[derive(Clone, Copy, ValueEnum)]
pub enum ClassifierCli {
    Logit,
    Svm,
}

impl From<ClassifierCli> for ClassifierKind {
    fn from(value: ClassifierCli) -> Self {
        match value {
            ClassifierCli::Logit => ClassifierKind::Logit,
            ClassifierCli::Svm => ClassifierKind::LinearSvm,
        }
    }
}

/// Input tables shared by every command.
#[derive(Args)]
pub struct CohortArgs {
    /// TSV with an optional sample_id column followed by the connectivity values
    pub connectomes: String,

    /// TSV with sample_id, label, confound and covariate columns
    pub phenotypes: String,

    /// Number of networks the connectivity columns are split into
    #[arg(long, default_value = "1")]
    pub networks: usize,

    /// Comma-separated confound columns (default: every numeric column except label and extras)
    #[arg(long, value_delimiter = ',')]
    pub confounds: Option<Vec<String>>,

    /// Comma-separated covariate columns appended to the subtype weights
    #[arg(long, value_delimiter = ',')]
    pub extra: Vec<String>,
}

impl CohortArgs {
    fn columns(&self) -> PhenotypeColumns {
        PhenotypeColumns {
            confounds: self.confounds.clone(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Args)]
pub struct PipelineArgs {
    /// Number of subtypes per network
    #[arg(long, default_value = "10")]
    pub subtypes: usize,

    /// Use every subtype weight instead of GLM/FDR selection
    #[arg(long)]
    pub no_feature_selection: bool,

    /// False discovery rate threshold of the feature selection
    #[arg(long, default_value = "0.01")]
    pub fdr_alpha: f64,

    /// Weights kept when too few survive the FDR threshold
    #[arg(long, default_value = "10")]
    pub min_features: usize,

    /// Level-one classifier
    #[arg(long, value_enum, default_value_t = ClassifierCli::Logit)]
    pub classifier: ClassifierCli,

    /// Stratified folds used for the penalty grid search
    #[arg(long, default_value = "10")]
    pub grid_folds: usize,

    /// Re-estimate hit/miss over this many stratified shuffle splits instead of leave-one-out
    #[arg(long, value_name = "N")]
    pub shuffle_splits: Option<usize>,

    /// Test fraction of each shuffle split
    #[arg(long, default_value = "0.2", requires = "shuffle_splits")]
    pub shuffle_test_fraction: f64,

    /// Seed of the shuffle splits
    #[arg(long, default_value = "0", requires = "shuffle_splits")]
    pub seed: u32,
}

impl PipelineArgs {
    fn config(&self) -> SbpConfig {
        let hit_miss = match self.shuffle_splits {
            Some(n_iter) => HitMissStrategy::Shuffle {
                n_iter,
                test_fraction: self.shuffle_test_fraction,
                seed: self.seed,
            },
            None => HitMissStrategy::LeaveOneOut,
        };
        SbpConfig {
            n_subtypes: self.subtypes,
            feature_selection: !self.no_feature_selection,
            fdr_alpha: self.fdr_alpha,
            min_features: self.min_features,
            classifier: self.classifier.into(),
            grid_folds: self.grid_folds,
            hit_miss,
        }
    }
}

#[derive(Args)]
pub struct TrainArgs {
    #[command(flatten)]
    pub cohort: CohortArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Where to write the trained model
    #[arg(long, default_value = "sbp_model.toml")]
    pub model: String,
}

#[derive(Args)]
pub struct PredictArgs {
    /// TSV with an optional sample_id column followed by the connectivity values
    pub connectomes: String,

    /// TSV with the confound and covariate columns used in training
    pub phenotypes: String,

    /// Path to trained model file (.toml)
    #[arg(long, default_value = "sbp_model.toml")]
    pub model: String,

    /// Where to write the predictions
    #[arg(long, default_value = "predictions.tsv")]
    pub output: String,
}

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub cohort: CohortArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Run folds one at a time instead of on a thread pool
    #[arg(long)]
    pub sequential: bool,

    /// Where to write the per-subject leave-one-out scores
    #[arg(long, default_value = "loo_scores.tsv")]
    pub output: String,
}

#[derive(Parser)]
#[command(
    name = "sbp",
    about = "Subtype base prediction from functional connectivity",
    long_about = "Clusters connectivity maps into subtypes, selects subtype weights associated \
                 with a binary label, and trains a two-level predictor that reports both a \
                 label and a per-subject hit score."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the full pipeline on a labelled cohort
    #[command(about = "Train a subtype base prediction model (outputs: sbp_model.toml)")]
    Train(TrainArgs),

    /// Apply a trained model to new subjects
    #[command(about = "Predict labels and hit scores (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    /// Estimate accuracy by leave-one-out cross-validation
    #[command(about = "Leave-one-out validation (outputs: loo_scores.tsv)")]
    Validate(ValidateArgs),
}

fn load_labelled(args: &CohortArgs) -> Result<(Cohort, Vec<usize>), Box<dyn std::error::Error>> {
    println!("Loading connectomes from: {}", args.connectomes);
    println!("Loading phenotypes from: {}", args.phenotypes);
    let cohort = load_cohort(
        &args.connectomes,
        &args.phenotypes,
        args.networks,
        &args.columns(),
        true,
    )?;
    let labels = cohort.require_labels()?.to_vec();
    let positives = labels.iter().filter(|&&l| l == 1).count();
    println!(
        "Loaded {} subjects ({} with label 1, {} with label 0)",
        cohort.len(),
        positives,
        cohort.len() - positives
    );
    Ok((cohort, labels))
}

pub fn train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (cohort, labels) = load_labelled(&args.cohort)?;
    let config = args.pipeline.config();

    let pipeline = SubtypePipeline::fit(&cohort.subjects(), &labels, &config)?;
    println!(
        "Selected {} subtype weight(s); training hit rate {:.3}",
        pipeline.selection.indices.len(),
        pipeline.predictor.training_hit_rate
    );

    let model = TrainedPipeline::new(pipeline, &cohort);
    model.save(&args.model)?;
    println!("Model saved to: {}", args.model);
    Ok(())
}

fn save_predictions(
    sample_ids: &[String],
    prediction: &TwoLevelPrediction,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(output_path)?;
    writer.write_record(["sample_id", "prediction", "hit_score"])?;
    for (id, row) in sample_ids.iter().zip(prediction.to_matrix().rows()) {
        writer.write_record([
            id.clone(),
            (row[0] as usize).to_string(),
            row[1].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let model = TrainedPipeline::load(&args.model)?;

    let cohort = load_cohort(
        &args.connectomes,
        &args.phenotypes,
        model.networks,
        &model.phenotype_columns(),
        false,
    )?;
    println!("Loaded {} subjects for prediction", cohort.len());

    let prediction = model.predict(&cohort.subjects())?;
    save_predictions(&cohort.sample_ids, &prediction, &args.output)?;

    let confident = prediction.hit_scores.iter().filter(|&&s| s > 0.0).count();
    println!(
        "Predictions saved to: {} ({} of {} subjects with a positive hit score)",
        args.output,
        confident,
        prediction.len()
    );
    Ok(())
}

fn save_loo_scores(
    sample_ids: &[String],
    scores: &LooScores,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(output_path)?;
    writer.write_record(["sample_id", "label", "prediction", "hit_score"])?;
    for (id, row) in sample_ids.iter().zip(scores.rows.rows()) {
        writer.write_record([
            id.clone(),
            (row[0] as usize).to_string(),
            (row[1] as usize).to_string(),
            row[2].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn validate(args: ValidateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (cohort, labels) = load_labelled(&args.cohort)?;
    let config = args.pipeline.config();

    let scores = if args.sequential {
        estimate_accuracy(&cohort.subjects(), &labels, &config)?
    } else {
        estimate_accuracy_parallel(&cohort.subjects(), &labels, &config)?
    };
    save_loo_scores(&cohort.sample_ids, &scores, &args.output)?;

    let report = scores.report();
    println!("Leave-one-out accuracy: {:.3}", report.accuracy);
    match report.confident_accuracy {
        Some(accuracy) => println!(
            "Accuracy with positive hit score: {:.3} (coverage {:.3})",
            accuracy, report.confident_coverage
        ),
        None => println!("No subject received a positive hit score"),
    }
    println!("Scores saved to: {}", args.output);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Validate(args)) => validate(args),
        None => match Cli::command().print_help() {
            Ok(()) => {
                println!();
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_must_fit_in_u32() {
        let accepted = Cli::try_parse_from([
            "sbp", "train", "c.tsv", "p.tsv", "--shuffle-splits", "10", "--seed", "4294967295",
        ]);
        let Ok(Cli {
            command: Some(Commands::Train(args)),
        }) = accepted
        else {
            panic!("maximal seed should parse");
        };
        assert!(matches!(
            args.pipeline.config().hit_miss,
            HitMissStrategy::Shuffle { seed: u32::MAX, .. }
        ));

        let rejected = Cli::try_parse_from([
            "sbp", "train", "c.tsv", "p.tsv", "--shuffle-splits", "10", "--seed", "9223372036854775808",
        ]);
        assert!(rejected.is_err());
    }
}
