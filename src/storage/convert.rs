//! Conversions between external coordinate file shapes and the standard
//! `Location,Coordinates` format the pipeline consumes. Input files come
//! from other tools with their own column conventions, so everything here
//! works on raw records rather than the typed row structs.

use std::path::Path;
use std::sync::OnceLock;

use csv::StringRecord;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::storage::csv_store::ensure_parent_dir;

fn re_coordinate() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+\.?\d*,-?\d+\.?\d*$").unwrap())
}

/// Rewrites a coordinates file into the standard format. A file that
/// already has a `Coordinates` column is copied through unchanged; a file
/// with separate latitude/longitude columns (matched case-insensitively on
/// `lat` and `lng`/`lon`) gets them joined into `lng,lat` strings, keeping
/// only the two standard columns.
pub fn convert_coordinates_to_standard_format(input: &Path, output: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(input)?;
    let headers = reader.headers()?.clone();
    let columns: Vec<String> = headers.iter().map(|h| h.to_string()).collect();

    let Some(location_idx) = columns.iter().position(|c| c == "Location") else {
        return Err(AppError::missing_column(
            input.display().to_string(),
            "Location",
        ));
    };

    if columns.iter().any(|c| c == "Coordinates") {
        return copy_csv(reader, &headers, output);
    }

    let lat_idx = columns
        .iter()
        .position(|c| c.to_lowercase().contains("lat"));
    let lng_idx = columns.iter().position(|c| {
        let lower = c.to_lowercase();
        lower.contains("lng") || lower.contains("lon")
    });

    let (Some(lat_idx), Some(lng_idx)) = (lat_idx, lng_idx) else {
        return Err(AppError::parse(format!(
            "Could not determine coordinate format in {}; available columns: {:?}",
            input.display(),
            columns
        )));
    };

    ensure_parent_dir(output)?;
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(["Location", "Coordinates"])?;
    for record in reader.records() {
        let record = record?;
        let location = record.get(location_idx).unwrap_or("");
        let coordinates = format!(
            "{},{}",
            record.get(lng_idx).unwrap_or(""),
            record.get(lat_idx).unwrap_or("")
        );
        writer.write_record([location, coordinates.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Checks that a file is in the standard format and every coordinate cell
/// parses as `lng,lat`. The first offending row fails the whole file, with
/// its 1-based data row number in the error.
pub fn validate_coordinates_file(path: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    if !headers.iter().any(|h| h == "Location") {
        return Err(AppError::missing_column(
            path.display().to_string(),
            "Location",
        ));
    }
    let Some(coordinates_idx) = headers.iter().position(|h| h == "Coordinates") else {
        return Err(AppError::missing_column(
            path.display().to_string(),
            "Coordinates",
        ));
    };

    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let coordinates = record.get(coordinates_idx).unwrap_or("");
        if !re_coordinate().is_match(coordinates) {
            return Err(AppError::parse(format!(
                "Invalid coordinate format at row {}: {}",
                idx + 1,
                coordinates
            )));
        }
    }

    Ok(())
}

/// Extracts just the `Location` column, producing a stage-1 input file
/// from any file that carries location names.
pub fn create_locations_from_coordinates(input: &Path, output: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(input)?;
    let Some(location_idx) = reader.headers()?.iter().position(|h| h == "Location") else {
        return Err(AppError::missing_column(
            input.display().to_string(),
            "Location",
        ));
    };

    ensure_parent_dir(output)?;
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(["Location"])?;
    for record in reader.records() {
        let record = record?;
        writer.write_record([record.get(location_idx).unwrap_or("")])?;
    }
    writer.flush()?;
    Ok(())
}

fn copy_csv(
    mut reader: csv::Reader<std::fs::File>,
    headers: &StringRecord,
    output: &Path,
) -> Result<()> {
    ensure_parent_dir(output)?;
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record(headers)?;
    for record in reader.records() {
        writer.write_record(&record?)?;
    }
    writer.flush()?;
    Ok(())
}
