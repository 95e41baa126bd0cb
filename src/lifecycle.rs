//! Process lifecycle management.
//!
//! Handles logging setup and creation of the on-disk data layout before any
//! stage runs.

use crate::config::PipelinePaths;
use crate::error::Result;

/// Initialize logging with tracing_subscriber.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("placefeed=debug".parse().unwrap())
                .add_directive("chromiumoxide=warn".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .compact()
        .with_target(false)
        .with_ansi(true)
        .init();
}

/// Create the input/intermediate/output directories if they are missing.
///
/// Stages assume the layout exists; this runs once at startup so individual
/// writers only have to care about their own file.
pub fn ensure_data_layout(paths: &PipelinePaths) -> Result<()> {
    std::fs::create_dir_all(paths.input_dir())?;
    std::fs::create_dir_all(paths.intermediate_dir())?;
    std::fs::create_dir_all(paths.output_dir())?;
    Ok(())
}
