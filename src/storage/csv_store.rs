//! Typed readers and writers for the pipeline's CSV handoff files. Each
//! stage consumes the previous stage's file, so the schemas here are the
//! contract between stages.

use std::fs;
use std::path::Path;

use csv::StringRecord;

use crate::domain::models::{CoordinateRecord, EndpointRecord, LocationRecord, Post};
use crate::error::{AppError, Result};

const LOCATION_HEADERS: [&str; 1] = ["Location"];
const COORDINATE_HEADERS: [&str; 4] = ["Location", "Latitude", "Longitude", "Coordinates"];
const ENDPOINT_HEADERS: [&str; 7] = [
    "Location",
    "URL_Type",
    "API_URL",
    "Page",
    "Coordinates",
    "Cardlist_URL",
    "Place_URL",
];

pub fn read_locations(path: &Path) -> Result<Vec<LocationRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    require_column(path, reader.headers()?, "Location")?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let record: LocationRecord = record?;
        rows.push(record);
    }
    Ok(rows)
}

pub fn write_locations(path: &Path, records: &[LocationRecord]) -> Result<()> {
    write_records(path, records, &LOCATION_HEADERS)
}

pub fn read_coordinates(path: &Path) -> Result<Vec<CoordinateRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    require_column(path, reader.headers()?, "Location")?;
    require_column(path, reader.headers()?, "Coordinates")?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let record: CoordinateRecord = record?;
        rows.push(record);
    }
    Ok(rows)
}

pub fn write_coordinates(path: &Path, records: &[CoordinateRecord]) -> Result<()> {
    write_records(path, records, &COORDINATE_HEADERS)
}

pub fn read_endpoints(path: &Path) -> Result<Vec<EndpointRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    require_column(path, reader.headers()?, "Location")?;
    require_column(path, reader.headers()?, "API_URL")?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let record: EndpointRecord = record?;
        rows.push(record);
    }
    Ok(rows)
}

pub fn write_endpoints(path: &Path, records: &[EndpointRecord]) -> Result<()> {
    write_records(path, records, &ENDPOINT_HEADERS)
}

pub fn read_posts(path: &Path) -> Result<Vec<Post>> {
    let mut reader = csv::Reader::from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let record: Post = record?;
        rows.push(record);
    }
    Ok(rows)
}

pub fn write_posts(path: &Path, records: &[Post]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Serializes records, writing the header row even when there are no
/// records. An empty file with a header is distinguishable from a stage
/// that never ran.
fn write_records<T: serde::Serialize>(
    path: &Path,
    records: &[T],
    headers: &[&str],
) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    if records.is_empty() {
        writer.write_record(headers)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn require_column(path: &Path, headers: &StringRecord, column: &'static str) -> Result<()> {
    if headers.iter().any(|h| h == column) {
        Ok(())
    } else {
        Err(AppError::missing_column(path.display().to_string(), column))
    }
}
