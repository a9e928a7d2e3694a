// ========================================================================================
//
//                          STAGING TRANSFER & VERIFICATION
//
// ========================================================================================
//
// Ships the finished delivery directory to a dated destination under the
// researcher staging root, either by plain copy or by rsync with permission
// control. Verification compares both regular-file counts and per-file
// SHA-256 digests; a mismatch is recorded in the report, not raised, and the
// caller decides whether to treat an unverified transfer as fatal.

use crate::manifest::{self, ManifestError};
use chrono::Local;
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer source is not a directory: {0}")]
    SourceNotADirectory(PathBuf),
    #[error("failed to launch rsync: {0}")]
    RsyncLaunch(#[source] io::Error),
    #[error("rsync exited with {status}: {stderr}")]
    RsyncFailed { status: ExitStatus, stderr: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Checksum(#[from] ManifestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Copy,
    Rsync,
}

impl Default for TransferMethod {
    fn default() -> Self {
        TransferMethod::Rsync
    }
}

/// rsync `--chmod` strings applied during a sync-mode transfer.
#[derive(Debug, Clone)]
pub struct RsyncPermissions {
    pub dirs: String,
    pub files: String,
}

impl Default for RsyncPermissions {
    fn default() -> Self {
        Self {
            dirs: "Du=rwx,Dgo=rx".to_string(),
            files: "Fu=rw,Fgo=r".to_string(),
        }
    }
}

/// Summary of one transfer operation.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
    pub verified: bool,
    pub method: TransferMethod,
}

/// Destination directory for a project transfer: `<root>/<id>_Delivery_<YYYYMMDD>`.
pub fn destination_for(dest_root: &Path, project_id: &str) -> PathBuf {
    let datestamp = Local::now().format("%Y%m%d");
    dest_root.join(format!("{project_id}_Delivery_{datestamp}"))
}

/// Copies or syncs `source_dir` into the dated destination and verifies the
/// result. Returns the report; only I/O-level failures are errors.
pub fn send(
    source_dir: &Path,
    dest_root: &Path,
    project_id: &str,
    method: TransferMethod,
    permissions: &RsyncPermissions,
) -> Result<TransferReport, TransferError> {
    if !source_dir.is_dir() {
        return Err(TransferError::SourceNotADirectory(source_dir.to_path_buf()));
    }

    let dest = destination_for(dest_root, project_id);
    std::fs::create_dir_all(&dest).map_err(|source| TransferError::Io {
        context: format!("creating {}", dest.display()),
        source,
    })?;

    match method {
        TransferMethod::Rsync => rsync(source_dir, &dest, permissions)?,
        TransferMethod::Copy => copy_files(source_dir, &dest)?,
    }

    let verified = verify(source_dir, &dest)?;
    if !verified {
        warn!(
            "transfer verification failed: {} does not match {}",
            source_dir.display(),
            dest.display()
        );
    }

    let dest_files = regular_files(&dest)?;
    let mut total_bytes = 0u64;
    for path in &dest_files {
        total_bytes += path
            .metadata()
            .map_err(|source| TransferError::Io {
                context: format!("stat {}", path.display()),
                source,
            })?
            .len();
    }

    info!(
        "transfer complete: {} files ({} bytes) at {}, verified={}",
        dest_files.len(),
        total_bytes,
        dest.display(),
        verified
    );

    Ok(TransferReport {
        source_dir: source_dir.to_path_buf(),
        destination_dir: dest,
        file_count: dest_files.len(),
        total_bytes,
        verified,
        method,
    })
}

/// Compares source and destination: regular-file counts must match and every
/// source file must have a destination counterpart with an identical SHA-256.
pub fn verify(source_dir: &Path, dest_dir: &Path) -> Result<bool, TransferError> {
    let src_files = regular_files(source_dir)?;
    let dst_files = regular_files(dest_dir)?;
    if src_files.len() != dst_files.len() {
        warn!(
            "file count mismatch: source={}, dest={}",
            src_files.len(),
            dst_files.len()
        );
        return Ok(false);
    }
    for src in &src_files {
        let name = match src.file_name() {
            Some(name) => name,
            None => continue,
        };
        let counterpart = dest_dir.join(name);
        if !counterpart.is_file() {
            return Ok(false);
        }
        if manifest::file_sha256(src)? != manifest::file_sha256(&counterpart)? {
            warn!("checksum mismatch for {}", counterpart.display());
            return Ok(false);
        }
    }
    Ok(true)
}

fn regular_files(dir: &Path) -> Result<Vec<PathBuf>, TransferError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| TransferError::Io {
            context: format!("listing {}", dir.display()),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn rsync(src: &Path, dest: &Path, permissions: &RsyncPermissions) -> Result<(), TransferError> {
    let chmod = format!("--chmod={},{}", permissions.dirs, permissions.files);
    // Trailing slashes: copy directory contents, not the directory itself.
    let src_arg = format!("{}/", src.display());
    let dest_arg = format!("{}/", dest.display());
    debug!("running: rsync -a {chmod} {src_arg} {dest_arg}");

    let output = Command::new("rsync")
        .args(["-a", &chmod, &src_arg, &dest_arg])
        .output()
        .map_err(TransferError::RsyncLaunch)?;
    if !output.status.success() {
        return Err(TransferError::RsyncFailed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

fn copy_files(src: &Path, dest: &Path) -> Result<(), TransferError> {
    for path in regular_files(src)? {
        if let Some(name) = path.file_name() {
            std::fs::copy(&path, dest.join(name)).map_err(|source| TransferError::Io {
                context: format!("copying {}", path.display()),
                source,
            })?;
        }
    }
    Ok(())
}
