//! Inspect command implementation.

use super::{load_header, CliError};
use crate::OutputFormat;
use catalogdb_core::{CatalogHeader, HEADER_FILE};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Catalog inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Catalog directory.
    pub path: String,
    /// Catalog name.
    pub name: String,
    /// Lifecycle state.
    pub state: String,
    /// Catalog version of the stored header.
    pub version: u64,
    /// Header format version.
    pub format_version: u32,
    /// Last transaction the header includes.
    pub last_committed_transaction_id: u64,
    /// Header log size in bytes.
    pub header_log_size: u64,
    /// Total size of the header log and collection files in bytes.
    pub total_size: u64,
    /// One entry per entity collection.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Entity type.
    pub entity_type: String,
    /// Storage file id.
    pub collection_id: u32,
    /// Storage file name.
    pub file: String,
    /// Collection version.
    pub version: u64,
    /// Number of entities.
    pub entity_count: u64,
    /// Storage file size in bytes.
    pub file_size: u64,
    /// Version of the stored key table.
    pub key_table_version: u64,
    /// Version of the stored schema.
    pub schema_version: u64,
    /// Number of reduced entity indexes.
    pub reduced_indexes: usize,
    /// Transaction that last flushed the collection.
    pub last_transaction_id: u64,
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map_or(0, |meta| meta.len())
}

/// Builds the inspection result for the catalog at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, CliError> {
    let header = load_header(path)?;
    Ok(summarize(path, &header))
}

fn summarize(path: &Path, header: &CatalogHeader) -> InspectResult {
    let collections: Vec<CollectionStats> = header
        .collections
        .values()
        .map(|collection| {
            let file = collection.collection_id.file_name();
            CollectionStats {
                entity_type: collection.entity_type.clone(),
                collection_id: collection.collection_id.as_u32(),
                file_size: file_size(&path.join(&file)),
                file,
                version: collection.version,
                entity_count: collection.record_count,
                key_table_version: collection.key_table_version,
                schema_version: collection.schema_version,
                reduced_indexes: collection.reduced_index_ids.len(),
                last_transaction_id: collection.last_transaction_id,
            }
        })
        .collect();
    let header_log_size = file_size(&path.join(HEADER_FILE));
    InspectResult {
        path: path.display().to_string(),
        name: header.name.clone(),
        state: header.state.to_string(),
        version: header.version,
        format_version: header.format_version,
        last_committed_transaction_id: header.last_committed_transaction_id,
        header_log_size,
        total_size: header_log_size + collections.iter().map(|c| c.file_size).sum::<u64>(),
        collections,
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let result = inspect(path)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("CatalogDB Catalog Inspection");
    println!("============================");
    println!();
    println!("Path:    {}", result.path);
    println!("Catalog: {}", result.name);
    println!("State:   {}", result.state);
    println!("Version: {}", result.version);
    println!("Format:  {}", result.format_version);
    println!(
        "Last committed transaction: {}",
        result.last_committed_transaction_id
    );
    println!();
    println!("Storage:");
    println!("  Header log: {}", format_size(result.header_log_size));
    println!("  Total:      {}", format_size(result.total_size));

    println!();
    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (none)");
    }
    for col in &result.collections {
        println!(
            "  [{}] {} v{}: {} entities, {} in {}, {} reduced indexes",
            col.collection_id,
            col.entity_type,
            col.version,
            col.entity_count,
            format_size(col.file_size),
            col.file,
            col.reduced_indexes
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::create_catalog;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_collections() {
        let temp = tempdir().unwrap();
        create_catalog(temp.path());

        let result = inspect(temp.path()).unwrap();
        assert_eq!(result.name, "shop");
        assert_eq!(result.collections.len(), 1);
        let products = &result.collections[0];
        assert_eq!(products.entity_type, "product");
        assert_eq!(products.entity_count, 2);
        assert!(products.file_size > 0);
        assert!(result.total_size > result.header_log_size);
    }

    #[test]
    fn inspect_result_serializes_to_json() {
        let temp = tempdir().unwrap();
        create_catalog(temp.path());

        let json = serde_json::to_value(inspect(temp.path()).unwrap()).unwrap();
        assert_eq!(json["collections"][0]["entity_type"], "product");
    }

    #[test]
    fn missing_catalog_is_reported() {
        let temp = tempdir().unwrap();
        assert!(matches!(inspect(temp.path()), Err(CliError::NotFound(_))));
    }

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
