use std::io::{Read, Write};

use anyhow::{Context, Result};
use tracker_core::models::Activity;

/// Write activities as CSV, newest first.
pub fn write_csv<W: Write>(activities: &[Activity], writer: W) -> Result<()> {
    let mut sorted = activities.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    let mut writer = csv::Writer::from_writer(writer);
    for activity in sorted {
        writer.serialize(activity).context("Failed to write CSV row")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<Activity>> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Invalid CSV row {}", i + 1)))
        .collect()
}
