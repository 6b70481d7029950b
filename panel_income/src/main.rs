use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use panel_income::{generate_panel, IncomeStudyBuilder, ModelKind, PolicyScenario};
use polars::prelude::*;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run_args: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a panel and run the full model study (the default)
    Run(RunArgs),
    /// Generate a panel and print its first rows or write it to CSV
    Generate(GenerateArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Seed for panel generation, the models and the attribution sampler
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Seed for the train/test split
    #[arg(long, default_value_t = 0)]
    split_seed: u64,

    /// Number of simulated cities
    #[arg(long, default_value_t = 100)]
    cities: usize,

    /// Share of rows held out for testing
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    /// Comma-separated models to benchmark [choices: ridge, random-forest, level-wise, leaf-wise]
    #[arg(long, value_delimiter = ',', default_values_t = ModelKind::ALL.to_vec())]
    models: Vec<ModelKind>,

    /// Sampled feature orderings per explained row
    #[arg(long, default_value_t = 32)]
    permutations: usize,

    /// Amount added to policy_index in the counterfactual scenario
    #[arg(long, default_value_t = 0.2, allow_negative_numbers = true)]
    policy_delta: f64,

    /// Model used for attribution and the policy scenario
    #[arg(long, default_value_t = ModelKind::RandomForest)]
    explain_model: ModelKind,

    /// Seed for the per-region splits; unseeded when omitted
    #[arg(long)]
    regional_seed: Option<u64>,

    /// Skip the per-region models
    #[arg(long)]
    skip_regional: bool,

    /// Path to write the attribution bar chart (SVG)
    #[arg(long)]
    chart: Option<PathBuf>,

    /// Path to export results as JSON
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Path to export results as Markdown
    #[arg(long)]
    output_markdown: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 100)]
    cities: usize,

    /// Write the panel to this CSV file instead of printing it
    #[arg(long)]
    output: Option<PathBuf>,
}

fn run_study(args: RunArgs) -> Result<()> {
    let df = generate_panel(args.seed, args.cities, 2018..=2022)
        .context("failed to generate the panel")?;

    let mut builder = IncomeStudyBuilder::new(df);
    builder
        .split_seed(args.split_seed)
        .model_seed(args.seed)
        .test_fraction(args.test_fraction)
        .models(&args.models)
        .permutations(args.permutations)
        .attribution_model(args.explain_model)
        .policy_model(args.explain_model)
        .policy_scenario(PolicyScenario::new("policy_index", args.policy_delta))
        .skip_regional(args.skip_regional);
    if let Some(seed) = args.regional_seed {
        builder.regional_seed(seed);
    }
    let results = builder.run()?;
    results.summary();

    if let Some(path) = args.chart {
        write_chart(&results, &path)?;
    }
    if let Some(path) = args.output_json {
        std::fs::write(&path, results.to_json()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote JSON results");
    }
    if let Some(path) = args.output_markdown {
        std::fs::write(&path, results.to_markdown())
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote Markdown results");
    }
    Ok(())
}

#[cfg(feature = "plot")]
fn write_chart(results: &panel_income::StudyResults, path: &std::path::Path) -> Result<()> {
    results.attribution().render_chart(path)?;
    Ok(())
}

#[cfg(not(feature = "plot"))]
fn write_chart(_results: &panel_income::StudyResults, _path: &std::path::Path) -> Result<()> {
    Err(panel_income::PanelError::MissingDependency(
        "--chart requires the `plot` feature of panel_income".to_string(),
    )
    .into())
}

fn generate(args: GenerateArgs) -> Result<()> {
    let mut df = generate_panel(args.seed, args.cities, 2018..=2022)?;
    match args.output {
        Some(path) => {
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            CsvWriter::new(&mut file)
                .include_header(true)
                .finish(&mut df)?;
            info!(rows = df.height(), path = %path.display(), "wrote panel");
        }
        None => println!("{}", df.head(Some(10))),
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Run(args)) => run_study(args),
        Some(Commands::Generate(args)) => generate(args),
        None => run_study(cli.run_args),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
