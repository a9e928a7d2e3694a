// ========================================================================================
//
//                          DELIVERY MANIFEST GENERATION
//
// ========================================================================================
//
// Produces the integrity record shipped alongside every delivery: a per-file
// SHA-256 manifest plus a status summary, both tab-separated. Files whose
// names carry a reserved token (the manifest and summary themselves) are
// skipped so the manifest never tries to describe its own bytes.

use chrono::Local;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename tokens excluded from manifest generation.
pub const RESERVED_TOKENS: [&str; 2] = ["MANIFEST", "STATUS"];

const HASH_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Checksum record for a single delivered file.
#[derive(Debug, Clone)]
pub struct FileChecksum {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Complete manifest for one delivery directory.
#[derive(Debug, Clone)]
pub struct DeliveryManifest {
    pub project_id: String,
    pub delivery_date: String,
    pub files: Vec<FileChecksum>,
}

impl DeliveryManifest {
    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn file_sha256(path: &Path) -> Result<String, ManifestError> {
    let mut file = File::open(path).map_err(|source| ManifestError::Io {
        context: format!("opening {}", path.display()),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut chunk).map_err(|source| ManifestError::Io {
            context: format!("reading {}", path.display()),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn checksum_entry(path: &Path) -> Result<FileChecksum, ManifestError> {
    let metadata = path.metadata().map_err(|source| ManifestError::Io {
        context: format!("stat {}", path.display()),
        source,
    })?;
    Ok(FileChecksum {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size_bytes: metadata.len(),
        sha256: file_sha256(path)?,
    })
}

fn is_reserved(name: &str) -> bool {
    RESERVED_TOKENS.iter().any(|token| name.contains(token))
}

/// Walks the regular files of `delivery_dir` (sorted by name) and computes a
/// checksum entry for each one that is not reserved.
pub fn generate(delivery_dir: &Path, project_id: &str) -> Result<DeliveryManifest, ManifestError> {
    if !delivery_dir.is_dir() {
        return Err(ManifestError::NotADirectory(delivery_dir.to_path_buf()));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(delivery_dir)
        .map_err(|source| ManifestError::Io {
            context: format!("listing {}", delivery_dir.display()),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_reserved(&name) {
            continue;
        }
        files.push(checksum_entry(&path)?);
    }

    Ok(DeliveryManifest {
        project_id: project_id.to_string(),
        delivery_date: Local::now().format("%Y-%m-%d").to_string(),
        files,
    })
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>, ManifestError> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|source| ManifestError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes the per-file checksum table.
pub fn write_manifest(manifest: &DeliveryManifest, path: &Path) -> Result<(), ManifestError> {
    let mut writer = tsv_writer(path)?;
    let write_err = |source| ManifestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    writer
        .write_record(["Filename", "Size_Bytes", "SHA256"])
        .map_err(write_err)?;
    for entry in &manifest.files {
        let size = entry.size_bytes.to_string();
        writer
            .write_record([entry.filename.as_str(), size.as_str(), entry.sha256.as_str()])
            .map_err(write_err)?;
    }
    writer.flush().map_err(|source| ManifestError::Io {
        context: format!("flushing {}", path.display()),
        source,
    })?;
    Ok(())
}

/// Writes the metric/value status summary.
pub fn write_status_summary(
    manifest: &DeliveryManifest,
    path: &Path,
) -> Result<(), ManifestError> {
    let mut writer = tsv_writer(path)?;
    let write_err = |source| ManifestError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let rows = [
        ("Project_ID", manifest.project_id.clone()),
        ("Delivery_Date", manifest.delivery_date.clone()),
        ("Total_Files", manifest.total_files().to_string()),
        ("Total_Size_Bytes", manifest.total_size_bytes().to_string()),
        ("Integrity_Check", "PASS".to_string()),
    ];
    writer.write_record(["Metric", "Value"]).map_err(write_err)?;
    for (metric, value) in rows {
        writer.write_record([metric, value.as_str()]).map_err(write_err)?;
    }
    writer.flush().map_err(|source| ManifestError::Io {
        context: format!("flushing {}", path.display()),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // SHA-256 of the ASCII bytes "abc".
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn file_sha256_matches_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(file_sha256(&path).unwrap(), ABC_SHA256);
    }

    #[test]
    fn generate_skips_reserved_names_and_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("genotypes.bed"), b"data").unwrap();
        fs::write(dir.path().join("MANIFEST.tsv"), b"old").unwrap();
        fs::write(dir.path().join("STATUS_SUMMARY.tsv"), b"old").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let manifest = generate(dir.path(), "NBR030").unwrap();
        assert_eq!(manifest.total_files(), 1);
        assert_eq!(manifest.files[0].filename, "genotypes.bed");
        assert_eq!(manifest.files[0].size_bytes, 4);
        assert_eq!(manifest.total_size_bytes(), 4);
    }

    #[test]
    fn generate_rejects_non_directories() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            generate(&file, "P").unwrap_err(),
            ManifestError::NotADirectory(_)
        ));
    }

    #[test]
    fn manifest_tsv_has_header_and_one_row_per_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"abc").unwrap();
        fs::write(dir.path().join("b.txt"), b"defg").unwrap();

        let manifest = generate(dir.path(), "NBR030").unwrap();
        let out = dir.path().join("MANIFEST.tsv");
        write_manifest(&manifest, &out).unwrap();

        let contents = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Filename\tSize_Bytes\tSHA256");
        assert!(lines[1].starts_with("a.txt\t3\t"));
        assert!(lines[1].ends_with(ABC_SHA256));
    }

    #[test]
    fn status_summary_reports_totals() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"abc").unwrap();

        let manifest = generate(dir.path(), "NBR030").unwrap();
        let out = dir.path().join("STATUS_SUMMARY.tsv");
        write_status_summary(&manifest, &out).unwrap();

        let contents = fs::read_to_string(&out).unwrap();
        assert!(contents.contains("Project_ID\tNBR030"));
        assert!(contents.contains("Total_Files\t1"));
        assert!(contents.contains("Integrity_Check\tPASS"));
    }
}
