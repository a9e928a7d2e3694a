// ========================================================================================
//
//                          PLINK FILESET HELPERS
//
// ========================================================================================
//
// Small, line-oriented utilities over the on-disk representation of a genotype
// batch: a PLINK binary fileset (`.bed`/`.bim`/`.fam`) addressed by a shared
// path prefix, plus the whitespace-delimited sample lists that accompany it.
//
// Everything here reads what was *persisted*, never what a caller intended to
// write. Downstream report assembly leans on that property to catch silent
// truncation.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The three extensions that must all resolve for a prefix to name a dataset.
pub const FILESET_EXTENSIONS: [&str; 3] = ["bed", "bim", "fam"];

#[derive(Debug, Error)]
pub enum FilesetError {
    #[error("no PLINK fileset at prefix {prefix} (missing {missing})")]
    Incomplete { prefix: PathBuf, missing: String },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Appends a suffix to the final path component, leaving any dots in the
/// prefix alone. PLINK prefixes routinely contain dots, so
/// `Path::with_extension` would mangle them.
pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    prefix.with_file_name(name)
}

/// Path of one member file of the fileset, e.g. `fileset_path(p, "fam")`.
pub fn fileset_path(prefix: &Path, extension: &str) -> PathBuf {
    with_suffix(prefix, &format!(".{extension}"))
}

/// Verifies that `.bed`, `.bim` and `.fam` all exist for the prefix.
pub fn require_fileset(prefix: &Path) -> Result<(), FilesetError> {
    for ext in FILESET_EXTENSIONS {
        let member = fileset_path(prefix, ext);
        if !member.is_file() {
            return Err(FilesetError::Incomplete {
                prefix: prefix.to_path_buf(),
                missing: format!(".{ext}"),
            });
        }
    }
    Ok(())
}

/// Counts non-empty lines, the unit of "one sample" (`.fam`) or "one marker"
/// (`.bim`).
pub fn count_lines(path: &Path) -> Result<usize, FilesetError> {
    let file = File::open(path).map_err(|source| FilesetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| FilesetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Counts lines of a file a stage may or may not have written. A missing file
/// reads as zero so reports audit exactly what landed on disk.
pub fn count_lines_or_zero(path: &Path) -> Result<usize, FilesetError> {
    if path.is_file() {
        count_lines(path)
    } else {
        Ok(0)
    }
}

/// Reads sample identifiers from a keep-list or `.fam` file: one identifier
/// per line, first whitespace-delimited token used (so `FID IID` pair files
/// parse the same as bare-ID files).
pub fn read_sample_ids(path: &Path) -> Result<Vec<String>, FilesetError> {
    let file = File::open(path).map_err(|source| FilesetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut ids = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| FilesetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(first) = line.split_whitespace().next() {
            ids.push(first.to_string());
        }
    }
    Ok(ids)
}

/// Moves one file, falling back to copy-and-delete when the source and
/// destination live on different filesystems (work dirs are often tmpfs).
pub fn move_file(src: &Path, dst: &Path) -> Result<(), FilesetError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst).map_err(|source| FilesetError::Read {
        path: src.to_path_buf(),
        source,
    })?;
    std::fs::remove_file(src).map_err(|source| FilesetError::Read {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn with_suffix_preserves_dots_in_prefix() {
        let p = Path::new("/data/NBR030.final");
        assert_eq!(
            with_suffix(p, ".fam"),
            PathBuf::from("/data/NBR030.final.fam")
        );
        assert_eq!(
            with_suffix(p, "_subset"),
            PathBuf::from("/data/NBR030.final_subset")
        );
    }

    #[test]
    fn require_fileset_reports_the_missing_member() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("batch_01");
        fs::write(fileset_path(&prefix, "bed"), b"x").unwrap();
        fs::write(fileset_path(&prefix, "fam"), b"s1\n").unwrap();

        let err = require_fileset(&prefix).unwrap_err();
        assert!(err.to_string().contains(".bim"));

        fs::write(fileset_path(&prefix, "bim"), b"m1\tA\tG\n").unwrap();
        assert!(require_fileset(&prefix).is_ok());
    }

    #[test]
    fn count_lines_skips_blanks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cohort.fam");
        fs::write(&path, "s1 s1\ns2 s2\n\ns3 s3\n").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);
    }

    #[test]
    fn count_lines_or_zero_tolerates_missing_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            count_lines_or_zero(&dir.path().join("absent.bim")).unwrap(),
            0
        );
    }

    #[test]
    fn read_sample_ids_takes_first_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keep.txt");
        fs::write(&path, "FID1 IID1\nSAMPLE2\n  \nFID3\tIID3\n").unwrap();
        assert_eq!(read_sample_ids(&path).unwrap(), vec!["FID1", "SAMPLE2", "FID3"]);
    }
}
