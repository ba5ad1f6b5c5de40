use anyhow::{Context, Result};
use canopy_pipeline::calibration::CalibrationFactorSet;
use canopy_pipeline::stages::{
    run_aggregate_stage, run_all, run_report_stage, run_validate_stage, ReportStageInputs,
};
use canopy_pipeline::utils::{current_year, today};
use canopy_pipeline::{ArtifactPaths, ImportContract, PriceSheet, ReportConfig, RunConfig, StageReport};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "canopy",
    version,
    about = "Timber cruise validation, stand aggregation and harvest cashflow reports"
)]
struct Cli {
    #[arg(long, global = true, help = "Print stage reports as JSON")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize, validate and remap a raw TreeSum CSV
    Validate {
        tree_table: PathBuf,
        output_prefix: String,
        #[arg(long, help = "Import contract JSON (defaults to the bundled TreeSum contract)")]
        contract: Option<PathBuf>,
    },
    /// Aggregate canonical tree rows into stand summaries
    Aggregate {
        canonical: PathBuf,
        output_prefix: String,
        #[arg(help = "Plot or Point")]
        cruise_type: String,
        #[arg(help = "Plot size in acres (Plot) or BAF (Point)", allow_negative_numbers = true)]
        size_value: f64,
        #[arg(long)]
        calibration: Option<PathBuf>,
        #[arg(long, help = "Canonical column selecting each stand's calibration group")]
        group_column: Option<String>,
    },
    /// Build the harvest schedule, cashflows and chart series
    Report {
        stand_summary: PathBuf,
        prices: PathBuf,
        output_prefix: String,
        #[arg(long, help = "Supplied harvest events CSV (disables auto-scheduling)")]
        events: Option<PathBuf>,
        #[arg(long, default_value = "Owner")]
        owner: String,
        #[arg(long, default_value = "Tract")]
        tract: String,
        #[arg(long, default_value_t = 5.0, help = "Discount rate in percent")]
        discount_pct: f64,
        #[arg(long)]
        calibration: Option<PathBuf>,
        #[arg(long, env = "CANOPY_CURRENT_YEAR")]
        current_year: Option<i32>,
    },
    /// Run all three stages from a run configuration JSON
    Run {
        config: PathBuf,
        #[arg(long, env = "CANOPY_CURRENT_YEAR", help = "Overrides the config's current_year")]
        current_year: Option<i32>,
    },
    /// Print the JSON schema of an input document
    Schema {
        #[arg(value_enum)]
        document: SchemaDocument,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SchemaDocument {
    Contract,
    Prices,
    Calibration,
    Run,
}

fn main() -> Result<ExitCode> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let reports = match cli.command {
        Commands::Validate {
            tree_table,
            output_prefix,
            contract,
        } => vec![run_validate_stage(
            &tree_table,
            contract.as_deref(),
            &ArtifactPaths::new(output_prefix),
        )],
        Commands::Aggregate {
            canonical,
            output_prefix,
            cruise_type,
            size_value,
            calibration,
            group_column,
        } => vec![run_aggregate_stage(
            &canonical,
            &cruise_type,
            size_value,
            calibration.as_deref(),
            group_column.as_deref(),
            &ArtifactPaths::new(output_prefix),
        )],
        Commands::Report {
            stand_summary,
            prices,
            output_prefix,
            events,
            owner,
            tract,
            discount_pct,
            calibration,
            current_year: year,
        } => {
            let inputs = ReportStageInputs {
                stand_summary: &stand_summary,
                prices: &prices,
                events: events.as_deref(),
                calibration: calibration.as_deref(),
                config: ReportConfig {
                    owner_name: owner,
                    tract_name: tract,
                    discount_rate: discount_pct / 100.0,
                    current_year: year.unwrap_or_else(current_year),
                    generated_on: today(),
                },
            };
            vec![run_report_stage(&inputs, &ArtifactPaths::new(output_prefix))]
        }
        Commands::Run {
            config,
            current_year: year,
        } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("reading run config {}", config.display()))?;
            let run: RunConfig = serde_json::from_str(&text)
                .with_context(|| format!("parsing run config {}", config.display()))?;
            run_all(&run.with_current_year(year))
        }
        Commands::Schema { document } => {
            let schema = match document {
                SchemaDocument::Contract => ImportContract::generate_json_schema(),
                SchemaDocument::Prices => PriceSheet::generate_json_schema(),
                SchemaDocument::Calibration => CalibrationFactorSet::generate_json_schema(),
                SchemaDocument::Run => RunConfig::generate_json_schema(),
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    print_reports(&reports, cli.json)?;

    if reports.iter().all(|r| r.succeeded) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_reports(reports: &[StageReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        if report.succeeded {
            println!("{}", report.render());
        } else {
            eprintln!("{} failed", report.stage);
            eprintln!("{}", report.render());
        }
    }
    Ok(())
}
