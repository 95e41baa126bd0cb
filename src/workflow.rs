//! Interactive sequencing of the three pipeline stages.
//!
//! The menu is file-existence driven: options that would start mid-pipeline
//! only appear when the artifact they resume from is already on disk. Menu
//! prompts and status lines go to stdout; the stages themselves keep
//! reporting through the log.

use std::collections::HashSet;
use std::io::{self, Write as _};
use std::path::Path;

use tracing::{error, info, warn};

use crate::config::{CollectorSettings, EndpointSettings, GeocoderSettings, PipelinePaths};
use crate::domain::models::LocationRecord;
use crate::error::Result;
use crate::service::{
    AnalysisReport, ChromeSession, CoordinateResolver, EndpointGenerator, PostCollector,
};
use crate::storage;

/// Seed locations written into a freshly created `locations.csv`.
pub const TEMPLATE_LOCATIONS: [&str; 5] =
    ["北京大学", "清华大学", "复旦大学", "中山大学", "浙江大学"];

/// One of the three pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Geocode,
    Endpoints,
    Collect,
}

impl Step {
    fn label(&self) -> &'static str {
        match self {
            Step::Geocode => "Coordinate collection",
            Step::Endpoints => "URL generation",
            Step::Collect => "Data collection",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ExistingFiles {
    coordinates: bool,
    endpoints: bool,
}

/// Sequences the pipeline stages over a fixed [`PipelinePaths`] layout.
pub struct Workflow {
    paths: PipelinePaths,
    geocoder: GeocoderSettings,
    endpoints: EndpointSettings,
    collector: CollectorSettings,
}

impl Workflow {
    /// `headless` controls both browser-driven stages.
    pub fn new(paths: PipelinePaths, headless: bool) -> Self {
        Self {
            paths,
            geocoder: GeocoderSettings {
                headless,
                ..GeocoderSettings::default()
            },
            endpoints: EndpointSettings::default(),
            collector: CollectorSettings::default(),
        }
    }

    /// Shows the status report and the main menu, then dispatches on the
    /// user's choice. Stage failures are reported and return to the prompt
    /// flow instead of aborting the program.
    pub async fn interactive(&self) -> Result<()> {
        println!("Weibo Data Collection - Complete Workflow");
        println!("{}", "=".repeat(60));

        println!("\nCurrent Status:");
        self.print_status();

        let mut existing = self.existing_files();
        self.print_menu(existing);

        loop {
            let choice = prompt("\nEnter your choice: ")?;
            match choice.as_str() {
                "1" => {
                    println!("\nRunning complete workflow...");
                    self.run_complete().await;
                    println!("\nWorkflow completed!");
                    break;
                }
                "2" if existing.coordinates => {
                    println!("\n{}", banner("WORKFLOW: STARTING FROM COORDINATES"));
                    if self.run_step(Step::Endpoints).await {
                        self.run_step(Step::Collect).await;
                    }
                    println!("\nWorkflow completed!");
                    break;
                }
                "3" if existing.endpoints => {
                    println!("\n{}", banner("WORKFLOW: STARTING FROM API URLS"));
                    self.run_step(Step::Collect).await;
                    println!("\nWorkflow completed!");
                    break;
                }
                "4" => {
                    self.individual_steps_menu().await?;
                    existing = self.existing_files();
                    self.print_menu(existing);
                }
                "5" => {
                    self.print_status();
                    break;
                }
                "6" => {
                    println!("Goodbye!");
                    break;
                }
                _ => println!("Invalid choice. Please enter a valid option."),
            }
        }

        Ok(())
    }

    /// Runs steps 1 through 3, stopping at the first one that does not
    /// complete.
    pub async fn run_complete(&self) {
        if self.run_step(Step::Geocode).await && self.run_step(Step::Endpoints).await {
            self.run_step(Step::Collect).await;
        }
    }

    /// Runs one stage, reporting failure instead of propagating it. Returns
    /// whether the stage completed, so callers can chain onto the next one.
    pub async fn run_step(&self, step: Step) -> bool {
        let result = match step {
            Step::Geocode => self.step_geocode().await,
            Step::Endpoints => self.step_endpoints().await,
            Step::Collect => self.step_collect().await,
        };
        match result {
            Ok(completed) => completed,
            Err(e) => {
                error!("{} failed: {e}", step.label());
                false
            }
        }
    }

    /// Step 1: resolve coordinates for every location name. When the input
    /// file is missing a template is created instead and the step reports
    /// not-completed so the user can edit it first.
    pub async fn step_geocode(&self) -> Result<bool> {
        println!("\n{}", banner("STEP 1: COLLECT COORDINATES"));

        let input = self.paths.locations_csv();
        let output = self.paths.coordinates_csv();

        if !input.exists() {
            info!("{} not found, creating a template", input.display());
            self.write_locations_template()?;
            println!("Template created: {}", input.display());
            println!("Please edit this file with your location names and run again.");
            return Ok(false);
        }

        info!("Input file: {}", input.display());
        info!("Output file: {}", output.display());

        let mut session = ChromeSession::launch(self.geocoder.headless).await?;
        let mut resolver = CoordinateResolver::new(self.geocoder.clone());
        let result = resolver.collect_from_csv(&session, &input, &output).await;
        if let Err(e) = session.close().await {
            warn!("Browser shutdown failed: {e}");
        }
        result?;
        Ok(true)
    }

    /// Step 2: derive one feed endpoint per resolved location.
    pub async fn step_endpoints(&self) -> Result<bool> {
        println!("\n{}", banner("STEP 2: GENERATE API URLS"));

        let input = self.paths.coordinates_csv();
        let output = self.paths.endpoints_csv();

        if !input.exists() {
            println!("{} not found!", input.display());
            println!("Please run Step 1 first.");
            return Ok(false);
        }

        info!("Input file: {}", input.display());
        info!("Output file: {}", output.display());

        let mut session = ChromeSession::launch(self.geocoder.headless).await?;
        let generator = EndpointGenerator::new(self.endpoints.clone());
        let result = generator.generate_from_csv(&session, &input, &output).await;
        if let Err(e) = session.close().await {
            warn!("Browser shutdown failed: {e}");
        }
        result?;
        Ok(true)
    }

    /// Step 3: collect posts page by page, then analyze whatever was
    /// written. Refuses to start without a cookie file.
    pub async fn step_collect(&self) -> Result<bool> {
        println!("\n{}", banner("STEP 3: COLLECT WEIBO DATA"));

        let input = self.paths.endpoints_csv();
        let cookies = self.paths.cookies_txt();

        if !input.exists() {
            println!("{} not found!", input.display());
            println!("Please run Step 2 first.");
            return Ok(false);
        }
        if !cookies.exists() {
            println!("{} not found!", cookies.display());
            println!("Please create it with your Weibo cookies.");
            return Ok(false);
        }

        info!("Input file: {}", input.display());
        info!("Cookie file: {}", cookies.display());

        let mut collector = PostCollector::new(self.collector.clone());
        let outcome = collector
            .collect_from_csv(&input, &cookies, &self.paths.posts_csv())
            .await?;

        let report = AnalysisReport::from_file(&outcome.output_path)?;
        println!("{}", report.render());
        Ok(true)
    }

    /// One line per pipeline artifact: distinct location count for CSVs
    /// that carry a `Location` column, row count otherwise.
    pub fn print_status(&self) {
        println!("\n{}", banner("COLLECTION SUMMARY"));

        let artifacts = [
            (self.paths.locations_csv(), "Location names"),
            (self.paths.coordinates_csv(), "Coordinates"),
            (self.paths.endpoints_csv(), "API URLs"),
            (self.paths.posts_csv(), "Collected data"),
        ];
        for (path, label) in &artifacts {
            println!("{}", describe_artifact(path, label));
        }
    }

    async fn individual_steps_menu(&self) -> Result<()> {
        println!("\n{}", banner("INDIVIDUAL STEPS"));
        println!("1. Step 1: Collect coordinates");
        println!("2. Step 2: Generate API URLs");
        println!("3. Step 3: Collect Weibo data");
        println!("4. Back to main menu");

        loop {
            let choice = prompt("\nEnter your choice (1-4): ")?;
            match choice.as_str() {
                "1" => {
                    self.run_step(Step::Geocode).await;
                    break;
                }
                "2" => {
                    self.run_step(Step::Endpoints).await;
                    break;
                }
                "3" => {
                    self.run_step(Step::Collect).await;
                    break;
                }
                "4" => break,
                _ => println!("Invalid choice. Please enter 1-4."),
            }
        }
        Ok(())
    }

    fn print_menu(&self, existing: ExistingFiles) {
        println!("\n{}", banner("WORKFLOW OPTIONS"));
        println!("1. Run complete workflow (all steps)");
        if existing.coordinates {
            println!("2. Start from coordinates (skip coordinate collection)");
        }
        if existing.endpoints {
            println!("3. Start from API URLs (skip to data collection)");
        }
        println!("4. Run individual steps");
        println!("5. Show current status");
        println!("6. Exit");
    }

    fn existing_files(&self) -> ExistingFiles {
        ExistingFiles {
            coordinates: self.paths.coordinates_csv().exists(),
            endpoints: self.paths.endpoints_csv().exists(),
        }
    }

    fn write_locations_template(&self) -> Result<()> {
        let rows: Vec<LocationRecord> = TEMPLATE_LOCATIONS
            .iter()
            .map(|name| LocationRecord {
                location: name.to_string(),
            })
            .collect();
        storage::write_locations(&self.paths.locations_csv(), &rows)
    }
}

fn banner(title: &str) -> String {
    let rule = "=".repeat(50);
    format!("{rule}\n{title}\n{rule}")
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn describe_artifact(path: &Path, label: &str) -> String {
    if !path.exists() {
        return format!("{label}: Not found");
    }
    match summarize_csv(path) {
        Ok((Some(locations), _)) => format!("{label}: {locations} locations"),
        Ok((None, rows)) => format!("{label}: {rows} rows"),
        Err(_) => format!("{label}: File exists"),
    }
}

/// Distinct `Location` values when the column is present, plus the total
/// row count.
fn summarize_csv(path: &Path) -> Result<(Option<usize>, usize)> {
    let mut reader = csv::Reader::from_path(path)?;
    let location_idx = reader.headers()?.iter().position(|h| h == "Location");

    let mut rows = 0usize;
    let mut locations = HashSet::new();
    for record in reader.records() {
        let record = record?;
        rows += 1;
        if let Some(idx) = location_idx {
            if let Some(value) = record.get(idx) {
                locations.insert(value.to_string());
            }
        }
    }
    Ok((location_idx.map(|_| locations.len()), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_workflow() -> (tempfile::TempDir, Workflow) {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow::new(PipelinePaths::new(dir.path()), true);
        (dir, workflow)
    }

    #[tokio::test]
    async fn test_geocode_step_creates_template_when_input_missing() {
        let (_dir, workflow) = temp_workflow();

        let completed = workflow.step_geocode().await.unwrap();

        assert!(!completed, "Template creation stops the step");
        let body = fs::read_to_string(workflow.paths.locations_csv()).unwrap();
        assert!(body.starts_with("Location\n"));
        for name in TEMPLATE_LOCATIONS {
            assert!(body.contains(name), "Template lists {name}");
        }
    }

    #[tokio::test]
    async fn test_endpoints_step_requires_coordinates_file() {
        let (_dir, workflow) = temp_workflow();

        let completed = workflow.step_endpoints().await.unwrap();
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_collect_step_requires_cookie_file() {
        let (_dir, workflow) = temp_workflow();
        fs::create_dir_all(workflow.paths.intermediate_dir()).unwrap();
        fs::write(
            workflow.paths.endpoints_csv(),
            "Location,URL_Type,API_URL,Page,Coordinates,Cardlist_URL,Place_URL\n",
        )
        .unwrap();

        let completed = workflow.step_collect().await.unwrap();
        assert!(!completed, "Collection must not start without cookies");
    }

    #[test]
    fn test_status_counts_distinct_locations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.csv");
        fs::write(
            &path,
            "Location,Coordinates\n北京大学,\"116.31,39.99\"\n北京大学,\"116.31,39.99\"\n清华大学,\"116.33,40.00\"\n",
        )
        .unwrap();

        assert_eq!(describe_artifact(&path, "Coordinates"), "Coordinates: 2 locations");
    }

    #[test]
    fn test_status_falls_back_to_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.csv");
        fs::write(&path, "mid,text,location\n1,hello,北京大学\n2,hi,清华大学\n").unwrap();

        assert_eq!(describe_artifact(&path, "Collected data"), "Collected data: 2 rows");
    }

    #[test]
    fn test_status_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");

        assert_eq!(describe_artifact(&path, "Location names"), "Location names: Not found");
    }
}
