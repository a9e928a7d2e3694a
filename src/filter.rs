// ========================================================================================
//
//                          COHORT EXCLUSION FILTERING
//
// ========================================================================================
//
// Removes governance-disqualified samples (consent withdrawals, gender
// mismatches, failed QC) from the cohort list before any genotype touches the
// delivery. A withdrawn participant must never appear downstream, so this runs
// first and the merge engine only ever sees the filtered keep-list.

use crate::fileset;
use log::info;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("cohort file not found: {0}")]
    CohortNotFound(PathBuf),
    #[error("exclusion file not found: {0}")]
    ExclusionNotFound(PathBuf),
    #[error("parsing exclusion file {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Fileset(#[from] fileset::FilesetError),
}

/// Summary of one filtering run.
#[derive(Debug, Clone)]
pub struct FilterReport {
    pub original_count: usize,
    pub exclusion_count: usize,
    pub final_count: usize,
}

impl FilterReport {
    pub fn removed_count(&self) -> usize {
        self.original_count - self.final_count
    }
}

/// How an exclusion CSV/TSV is laid out. The defaults match the governance
/// exports: comma-delimited, header row, identifier in the first column.
#[derive(Debug, Clone)]
pub struct ExclusionFormat {
    pub id_column: usize,
    pub has_header: bool,
    pub delimiter: u8,
}

impl Default for ExclusionFormat {
    fn default() -> Self {
        Self {
            id_column: 0,
            has_header: true,
            delimiter: b',',
        }
    }
}

/// Reads one exclusion file into a set of sample identifiers.
pub fn load_exclusion_set(
    path: &Path,
    format: &ExclusionFormat,
) -> Result<HashSet<String>, FilterError> {
    let mut ids = HashSet::new();
    for_each_exclusion_row(path, format, |record| {
        if let Some(id) = record.get(format.id_column) {
            let id = id.trim();
            if !id.is_empty() {
                ids.insert(id.to_string());
            }
        }
    })?;
    Ok(ids)
}

/// Reads one exclusion file into an identifier-to-reason map (reason taken
/// from the column after the identifier). Used for audit summaries.
pub fn load_exclusion_reasons(
    path: &Path,
    format: &ExclusionFormat,
) -> Result<HashMap<String, String>, FilterError> {
    let mut reasons = HashMap::new();
    for_each_exclusion_row(path, format, |record| {
        if let (Some(id), Some(reason)) = (
            record.get(format.id_column),
            record.get(format.id_column + 1),
        ) {
            let id = id.trim();
            if !id.is_empty() {
                reasons.insert(id.to_string(), reason.trim().to_string());
            }
        }
    })?;
    Ok(reasons)
}

fn for_each_exclusion_row(
    path: &Path,
    format: &ExclusionFormat,
    mut visit: impl FnMut(&csv::StringRecord),
) -> Result<(), FilterError> {
    if !path.is_file() {
        return Err(FilterError::ExclusionNotFound(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(format.has_header)
        .delimiter(format.delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|source| FilterError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    for record in reader.records() {
        let record = record.map_err(|source| FilterError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        visit(&record);
    }
    Ok(())
}

/// Applies the union of all exclusion lists to the cohort sample list and
/// writes the surviving identifiers, one per line, to `output_path`. Cohort
/// order is preserved.
pub fn apply(
    cohort_path: &Path,
    exclusion_paths: &[PathBuf],
    output_path: &Path,
) -> Result<FilterReport, FilterError> {
    if !cohort_path.is_file() {
        return Err(FilterError::CohortNotFound(cohort_path.to_path_buf()));
    }

    let format = ExclusionFormat::default();
    let mut to_exclude: HashSet<String> = HashSet::new();
    for path in exclusion_paths {
        to_exclude.extend(load_exclusion_set(path, &format)?);
    }

    let original_ids = fileset::read_sample_ids(cohort_path)?;
    let filtered: Vec<&String> = original_ids
        .iter()
        .filter(|id| !to_exclude.contains(id.as_str()))
        .collect();

    let report = FilterReport {
        original_count: original_ids.len(),
        exclusion_count: to_exclude.len(),
        final_count: filtered.len(),
    };

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FilterError::Io {
            context: format!("creating {}", parent.display()),
            source,
        })?;
    }
    let mut contents = filtered
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    contents.push('\n');
    std::fs::write(output_path, contents).map_err(|source| FilterError::Io {
        context: format!("writing {}", output_path.display()),
        source,
    })?;

    info!(
        "filtered cohort: {} -> {} samples ({} identifiers excluded)",
        report.original_count, report.final_count, report.exclusion_count
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn apply_removes_union_of_exclusions_preserving_order() {
        let dir = TempDir::new().unwrap();
        let cohort = write(&dir, "cohort.txt", "s1 s1\ns2 s2\ns3 s3\ns4 s4\n");
        let ex1 = write(&dir, "ex1.csv", "sample_id,reason\ns2,withdrawn\n");
        let ex2 = write(&dir, "ex2.csv", "sample_id,reason\ns4,failed_qc\ns2,dup\n");
        let out = dir.path().join("filtered.txt");

        let report = apply(&cohort, &[ex1, ex2], &out).unwrap();
        assert_eq!(report.original_count, 4);
        assert_eq!(report.exclusion_count, 2);
        assert_eq!(report.final_count, 2);
        assert_eq!(report.removed_count(), 2);
        assert_eq!(fs::read_to_string(&out).unwrap(), "s1\ns3\n");
    }

    #[test]
    fn apply_with_no_exclusions_is_a_passthrough() {
        let dir = TempDir::new().unwrap();
        let cohort = write(&dir, "cohort.txt", "s1\ns2\n");
        let out = dir.path().join("filtered.txt");

        let report = apply(&cohort, &[], &out).unwrap();
        assert_eq!(report.final_count, 2);
        assert_eq!(report.removed_count(), 0);
    }

    #[test]
    fn missing_cohort_fails_fast() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("filtered.txt");
        let err = apply(&dir.path().join("absent.txt"), &[], &out).unwrap_err();
        assert!(matches!(err, FilterError::CohortNotFound(_)));
        assert!(!out.exists());
    }

    #[test]
    fn missing_exclusion_fails_fast() {
        let dir = TempDir::new().unwrap();
        let cohort = write(&dir, "cohort.txt", "s1\n");
        let out = dir.path().join("filtered.txt");
        let err = apply(&cohort, &[dir.path().join("absent.csv")], &out).unwrap_err();
        assert!(matches!(err, FilterError::ExclusionNotFound(_)));
    }

    #[test]
    fn exclusion_reasons_map_id_to_reason() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "ex.csv",
            "sample_id,reason\ns1,withdrawn\ns9,gender_mismatch\n",
        );
        let reasons = load_exclusion_reasons(&path, &ExclusionFormat::default()).unwrap();
        assert_eq!(reasons.get("s1").map(String::as_str), Some("withdrawn"));
        assert_eq!(
            reasons.get("s9").map(String::as_str),
            Some("gender_mismatch")
        );
    }
}
