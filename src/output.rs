use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use csv::Writer;
use serde::Serialize;

use crate::envelope::EnvelopeResult;
use crate::EnvelopeError;

/// One distance of an envelope plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandRow {
    pub r: f64,
    pub obs: f64,
    pub central: f64,
    pub lo: f64,
    pub hi: f64,
    pub outside: bool,
}

pub fn band_rows(result: &EnvelopeResult) -> Vec<BandRow> {
    (0..result.r.len())
        .map(|i| BandRow {
            r: result.r[i],
            obs: result.obs[i],
            central: result.central[i],
            lo: result.lo[i],
            hi: result.hi[i],
            outside: result.outside[i],
        })
        .collect()
}

pub fn create_timestamped_output_dir(root: &Path) -> Result<PathBuf, EnvelopeError> {
    fs::create_dir_all(root)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut output_dir = root.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = root.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), EnvelopeError> {
    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_band_csv(path: &Path, rows: &[BandRow]) -> Result<(), EnvelopeError> {
    write_csv(path, rows)
}

/// Pretty-printed JSON of any serializable result.
pub fn write_summary_json<T: Serialize>(path: &Path, summary: &T) -> Result<(), EnvelopeError> {
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}
