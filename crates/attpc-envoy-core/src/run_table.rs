//! Per-experiment CSV log of completed runs.
//!
//! The custom run-log fields share one cell, encoded as a JSON object so a
//! row can be read back without guessing at separators.

use crate::config::EnvoyConfig;
use crate::error::RunTableError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TABLE_HEADER: [&str; 14] = [
    "Run",
    "Duration(s)",
    "Note",
    "Gas",
    "Beam",
    "Energy(MeV/U)",
    "Pressure(Torr)",
    "B-Field(T)",
    "V_THGEM(V)",
    "V_MM(V)",
    "V_Cathode(kV)",
    "E-Drift(V)",
    "E-Trans(V)",
    "Fields",
];

/// Path of the run table for the configured experiment
pub fn table_path(config: &EnvoyConfig) -> PathBuf {
    config
        .paths
        .tables_dir
        .join(format!("{}.csv", config.experiment))
}

/// Append a row describing the run that just ended. The table and its
/// directory are created on first use.
pub fn write_run_row(config: &EnvoyConfig, duration: Duration) -> Result<PathBuf, RunTableError> {
    let path = table_path(config);
    let is_new = !path.exists();
    if is_new {
        create_parent(&path)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(TABLE_HEADER)?;
    }
    writer.write_record(format_row(config, duration)?)?;
    writer.flush()?;
    Ok(path)
}

fn create_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn format_row(config: &EnvoyConfig, duration: Duration) -> Result<Vec<String>, serde_json::Error> {
    let floats = [
        config.energy,
        config.pressure,
        config.magnetic_field,
        config.v_thgem,
        config.v_mm,
        config.v_cathode,
        config.e_drift,
        config.e_trans,
    ];
    let mut row = vec![
        config.run_number.to_string(),
        duration.as_secs().to_string(),
        config.description.clone(),
        config.gas.clone(),
        config.beam.clone(),
    ];
    row.extend(floats.iter().map(|v| format!("{v:.2}")));
    row.push(serde_json::to_string(&config.fields)?);
    Ok(row)
}
