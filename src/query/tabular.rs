use anyhow::{Context, Result};
use csv::ReaderBuilder;

/// Splits CSV text into raw records, header row included. Rows may have
/// differing lengths; blank and whitespace-only lines are skipped.
pub(super) fn parse_records(input: &str) -> Result<Vec<Vec<String>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input.as_bytes());

    let mut records = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading CSV record {}", index + 1))?;
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.len() == 1 && row[0].trim().is_empty() {
            continue;
        }
        records.push(row);
    }
    Ok(records)
}
