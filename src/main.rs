// src/main.rs

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use placefeed::config::PipelinePaths;
use placefeed::error::Result;
use placefeed::lifecycle;
use placefeed::service::AnalysisReport;
use placefeed::storage::convert;
use placefeed::workflow::{Step, Workflow};

#[derive(Parser)]
#[command(
    name = "placefeed",
    about = "Location-based Weibo post collection pipeline",
    version,
    after_help = "Run with no command to enter the interactive workflow menu."
)]
struct Cli {
    /// Root directory for pipeline inputs and outputs
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    /// Show the browser window during browser-driven stages
    #[arg(long, global = true)]
    headful: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve coordinates for every location name (stage 1)
    Geocode,
    /// Derive feed API endpoints from resolved coordinates (stage 2)
    Endpoints,
    /// Collect posts page by page through the feed API (stage 3)
    Collect,
    /// Run all three stages in order
    Run,
    /// Analyze a collected posts file and print the report
    Analyze {
        /// Posts CSV to analyze (defaults to the pipeline output)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Convert or check coordinate files
    Convert {
        #[command(subcommand)]
        action: ConvertAction,
    },
}

#[derive(Subcommand)]
enum ConvertAction {
    /// Rewrite a coordinates file into the standard Location,Coordinates shape
    Coordinates {
        input: PathBuf,
        /// Output path (defaults to the intermediate coordinates file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Extract a locations file from any CSV with a Location column
    Locations {
        input: PathBuf,
        /// Output path (defaults to the stage-1 input file)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check that a coordinates file is in the standard shape
    Validate {
        /// File to check (defaults to the intermediate coordinates file)
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    lifecycle::init_logging();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = PipelinePaths::new(&cli.data_dir);
    lifecycle::ensure_data_layout(&paths)?;

    let workflow = Workflow::new(paths.clone(), !cli.headful);

    match cli.command {
        None => workflow.interactive().await,
        Some(Commands::Run) => {
            workflow.run_complete().await;
            Ok(())
        }
        Some(Commands::Geocode) => run_stage(&workflow, Step::Geocode).await,
        Some(Commands::Endpoints) => run_stage(&workflow, Step::Endpoints).await,
        Some(Commands::Collect) => run_stage(&workflow, Step::Collect).await,
        Some(Commands::Analyze { input }) => {
            let path = input.unwrap_or_else(|| paths.posts_csv());
            let report = AnalysisReport::from_file(&path)?;
            println!("{}", report.render());
            Ok(())
        }
        Some(Commands::Convert { action }) => match action {
            ConvertAction::Coordinates { input, output } => {
                let output = output.unwrap_or_else(|| paths.coordinates_csv());
                convert::convert_coordinates_to_standard_format(&input, &output)?;
                println!("Wrote {}", output.display());
                Ok(())
            }
            ConvertAction::Locations { input, output } => {
                let output = output.unwrap_or_else(|| paths.locations_csv());
                convert::create_locations_from_coordinates(&input, &output)?;
                println!("Wrote {}", output.display());
                Ok(())
            }
            ConvertAction::Validate { input } => {
                let path = input.unwrap_or_else(|| paths.coordinates_csv());
                convert::validate_coordinates_file(&path)?;
                println!("{} is valid", path.display());
                Ok(())
            }
        },
    }
}

/// Runs one stage for a scripted invocation. A stage that declines to run
/// (missing prerequisite file) exits nonzero.
async fn run_stage(workflow: &Workflow, step: Step) -> Result<()> {
    let completed = match step {
        Step::Geocode => workflow.step_geocode().await?,
        Step::Endpoints => workflow.step_endpoints().await?,
        Step::Collect => workflow.step_collect().await?,
    };
    if !completed {
        std::process::exit(1);
    }
    Ok(())
}
