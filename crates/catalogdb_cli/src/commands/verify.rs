//! Verify command implementation.

use super::{load_header, CliError};
use catalogdb_core::CollectionHeader;
use catalogdb_storage::{read_key_table, verify_records, FileBackend, VerifyReport};
use std::path::Path;

/// Outcome of verifying one collection file.
#[derive(Debug)]
pub struct CollectionCheck {
    /// Entity type.
    pub entity_type: String,
    /// Storage file name.
    pub file: String,
    /// Records checked and problems found; `None` if nothing was flushed.
    pub report: Option<VerifyReport>,
}

impl CollectionCheck {
    fn problems(&self) -> usize {
        self.report.as_ref().map_or(0, |report| report.problems.len())
    }
}

fn failed(entity_type: &str, file: String, problem: String) -> CollectionCheck {
    CollectionCheck {
        entity_type: entity_type.to_string(),
        file,
        report: Some(VerifyReport {
            problems: vec![problem],
            ..VerifyReport::default()
        }),
    }
}

fn check_collection(path: &Path, collection: &CollectionHeader) -> CollectionCheck {
    let file = collection.collection_id.file_name();
    let Some(location) = collection.storage_location else {
        return CollectionCheck {
            entity_type: collection.entity_type.clone(),
            file,
            report: None,
        };
    };
    let file_path = path.join(&file);
    if !file_path.is_file() {
        return failed(&collection.entity_type, file, "file is missing".into());
    }
    let backend = match FileBackend::open(&file_path) {
        Ok(backend) => backend,
        Err(err) => return failed(&collection.entity_type, file, format!("cannot open: {err}")),
    };
    let table = match read_key_table(&backend, location) {
        Ok(table) => table,
        Err(err) => {
            return failed(
                &collection.entity_type,
                file,
                format!("key table at {}: {err}", location.offset),
            )
        }
    };
    let mut report = match verify_records(&backend, &table) {
        Ok(report) => report,
        Err(err) => return failed(&collection.entity_type, file, err.to_string()),
    };
    if table.version() != collection.key_table_version {
        report.problems.push(format!(
            "key table version {} but header expects {}",
            table.version(),
            collection.key_table_version
        ));
    }
    if report.last_transaction_id > collection.last_transaction_id {
        report.problems.push(format!(
            "record from transaction {} is newer than the header's {}",
            report.last_transaction_id, collection.last_transaction_id
        ));
    }
    CollectionCheck {
        entity_type: collection.entity_type.clone(),
        file,
        report: Some(report),
    }
}

/// Checks every collection the catalog at `path` references.
pub fn verify(path: &Path) -> Result<Vec<CollectionCheck>, CliError> {
    let header = load_header(path)?;
    tracing::debug!(
        catalog = %header.name,
        collections = header.collections.len(),
        "verifying catalog"
    );
    Ok(header
        .collections
        .values()
        .map(|collection| check_collection(path, collection))
        .collect())
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying catalog at: {}", path.display());
    println!();

    let checks = verify(path)?;
    let mut problems = 0;
    for check in &checks {
        match &check.report {
            None => println!("  {} ({}): never flushed", check.entity_type, check.file),
            Some(report) if report.problems.is_empty() => println!(
                "  {} ({}): {} records OK",
                check.entity_type, check.file, report.records
            ),
            Some(report) => {
                println!(
                    "  {} ({}): {} problem(s)",
                    check.entity_type,
                    check.file,
                    report.problems.len()
                );
                for problem in &report.problems {
                    println!("    - {problem}");
                }
            }
        }
        problems += check.problems();
    }

    println!();
    if problems > 0 {
        println!("Verification FAILED");
        return Err(CliError::VerificationFailed(problems));
    }
    println!("Verification PASSED");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::create_catalog;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn fresh_catalog_passes() {
        let temp = tempdir().unwrap();
        create_catalog(temp.path());

        let checks = verify(temp.path()).unwrap();
        assert_eq!(checks.len(), 1);
        let report = checks[0].report.as_ref().unwrap();
        assert!(report.records >= 2);
        assert!(report.problems.is_empty());
        let header = load_header(temp.path()).unwrap();
        assert_eq!(
            report.last_transaction_id,
            header.collections["product"].last_transaction_id
        );
        run(temp.path()).unwrap();
    }

    #[test]
    fn corrupted_record_fails() {
        let temp = tempdir().unwrap();
        create_catalog(temp.path());

        let header = load_header(temp.path()).unwrap();
        let collection = &header.collections["product"];
        let file_path = temp.path().join(collection.collection_id.file_name());
        let backend = FileBackend::open(&file_path).unwrap();
        let table = read_key_table(&backend, collection.storage_location.unwrap()).unwrap();
        let (_, _, location) = table.entries().next().unwrap();
        drop(backend);

        let mut data = fs::read(&file_path).unwrap();
        let at = (location.offset + u64::from(location.length) - 1) as usize;
        data[at] ^= 0xFF;
        fs::write(&file_path, data).unwrap();

        let checks = verify(temp.path()).unwrap();
        assert_eq!(checks[0].problems(), 1);
        assert!(matches!(
            run(temp.path()),
            Err(CliError::VerificationFailed(1))
        ));
    }

    #[test]
    fn missing_collection_file_fails() {
        let temp = tempdir().unwrap();
        create_catalog(temp.path());
        let header = load_header(temp.path()).unwrap();
        let collection = &header.collections["product"];
        fs::remove_file(temp.path().join(collection.collection_id.file_name())).unwrap();

        assert!(matches!(
            run(temp.path()),
            Err(CliError::VerificationFailed(1))
        ));
    }
}
