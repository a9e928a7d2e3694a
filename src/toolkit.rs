// ========================================================================================
//
//                      EXTERNAL GENOTYPE-TOOLKIT ADAPTER
//
// ========================================================================================
//
// The merge engine drives an external genotype toolkit (PLINK) for the heavy
// lifting: subsetting binary filesets, merging them, and recoding to VCF.
// PLINK signals a merge conflict not through its exit status but through a
// side-effect file named `<out>-merge.missnp`. That naming convention is a
// fragile coupling, so it is confined to this module: callers only ever see
// the typed `MergeOutcome` below, and the control-flow logic in `merge.rs`
// stays independent of how the tool spells its side channel.
//
// `GenotypeToolkit` is the seam. Production code uses `PlinkToolkit`, which
// shells out; tests substitute a pure-Rust fake that honors the same
// contract over plain-text filesets.

use crate::fileset::with_suffix;
use itertools::Itertools;
use log::debug;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Suffix PLINK appends to the output prefix when it writes the list of
/// markers it refused to merge.
pub const CONFLICT_FILE_SUFFIX: &str = "-merge.missnp";

/// The typed result of a merge invocation. Conflict is an expected
/// control-flow outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// All batches merged; the output fileset was written.
    Clean,
    /// The batches disagree on allele coding or strand orientation for these
    /// markers. Ordered, de-duplicated, identifiers opaque. No output fileset
    /// was written.
    Conflict(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status} running `{command}`: {stderr}")]
    CommandFailed {
        program: String,
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("reading conflict marker file {path}: {source}")]
    ConflictFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The operations the merge engine needs from a genotype toolkit.
pub trait GenotypeToolkit {
    /// Writes a new fileset at `out` containing only the samples of `bfile`
    /// listed in `keep`, minus any markers listed in `exclude`.
    fn subset(
        &self,
        bfile: &Path,
        keep: &Path,
        exclude: Option<&Path>,
        out: &Path,
    ) -> Result<(), ToolkitError>;

    /// Merges the filesets listed (one prefix per line) in `merge_list` into
    /// `base`, writing the result at `out` on success.
    fn merge(&self, base: &Path, merge_list: &Path, out: &Path)
        -> Result<MergeOutcome, ToolkitError>;

    /// Recodes the fileset at `bfile` to a bgzipped VCF alongside it.
    fn export_vcf(&self, bfile: &Path) -> Result<(), ToolkitError>;
}

// Borrowed toolkits satisfy the same contract, so engines can be generic over
// `T: GenotypeToolkit` while callers keep ownership.
impl<T: GenotypeToolkit + ?Sized> GenotypeToolkit for &T {
    fn subset(
        &self,
        bfile: &Path,
        keep: &Path,
        exclude: Option<&Path>,
        out: &Path,
    ) -> Result<(), ToolkitError> {
        (**self).subset(bfile, keep, exclude, out)
    }

    fn merge(
        &self,
        base: &Path,
        merge_list: &Path,
        out: &Path,
    ) -> Result<MergeOutcome, ToolkitError> {
        (**self).merge(base, merge_list, out)
    }

    fn export_vcf(&self, bfile: &Path) -> Result<(), ToolkitError> {
        (**self).export_vcf(bfile)
    }
}

/// Location of the conflict side file for a merge output prefix.
pub fn conflict_marker_path(out_prefix: &Path) -> PathBuf {
    with_suffix(out_prefix, CONFLICT_FILE_SUFFIX)
}

/// Parses a conflict marker file into an ordered, de-duplicated identifier
/// list. Returns `None` when the file is missing or empty (clean merge).
pub fn read_conflict_markers(out_prefix: &Path) -> Result<Option<Vec<String>>, ToolkitError> {
    let path = conflict_marker_path(out_prefix);
    if !path.is_file() {
        return Ok(None);
    }
    let file = File::open(&path).map_err(|source| ToolkitError::ConflictFile {
        path: path.clone(),
        source,
    })?;
    let mut markers = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| ToolkitError::ConflictFile {
            path: path.clone(),
            source,
        })?;
        let id = line.trim();
        if !id.is_empty() {
            markers.push(id.to_string());
        }
    }
    let markers: Vec<String> = markers.into_iter().unique().collect();
    if markers.is_empty() {
        Ok(None)
    } else {
        Ok(Some(markers))
    }
}

/// Subprocess-backed PLINK implementation.
#[derive(Debug, Clone)]
pub struct PlinkToolkit {
    exec: PathBuf,
}

impl PlinkToolkit {
    pub fn new(exec: PathBuf) -> Self {
        Self { exec }
    }

    fn run(&self, args: Vec<OsString>, check: bool) -> Result<ExitStatus, ToolkitError> {
        let program = self.exec.display().to_string();
        let rendered = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .join(" ");
        debug!("running: {program} {rendered}");

        let output = Command::new(&self.exec)
            .args(&args)
            .output()
            .map_err(|source| ToolkitError::Launch {
                program: program.clone(),
                source,
            })?;

        if check && !output.status.success() {
            return Err(ToolkitError::CommandFailed {
                program,
                command: rendered,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.status)
    }
}

impl GenotypeToolkit for PlinkToolkit {
    fn subset(
        &self,
        bfile: &Path,
        keep: &Path,
        exclude: Option<&Path>,
        out: &Path,
    ) -> Result<(), ToolkitError> {
        let mut args: Vec<OsString> = vec![
            "--bfile".into(),
            bfile.into(),
            "--keep".into(),
            keep.into(),
            "--make-bed".into(),
            "--out".into(),
            out.into(),
        ];
        if let Some(exclude) = exclude {
            args.push("--exclude".into());
            args.push(exclude.into());
        }
        self.run(args, true)?;
        Ok(())
    }

    fn merge(
        &self,
        base: &Path,
        merge_list: &Path,
        out: &Path,
    ) -> Result<MergeOutcome, ToolkitError> {
        let args: Vec<OsString> = vec![
            "--bfile".into(),
            base.into(),
            "--merge-list".into(),
            merge_list.into(),
            "--make-bed".into(),
            "--out".into(),
            out.into(),
        ];
        // A retained work dir can hold a conflict file from a prior run, and
        // a leftover would be misread as a conflict on a clean merge.
        let stale = conflict_marker_path(out);
        if stale.is_file() {
            std::fs::remove_file(&stale).map_err(|source| ToolkitError::ConflictFile {
                path: stale.clone(),
                source,
            })?;
        }

        // Unchecked on purpose: a conflicted merge exits nonzero, and the
        // side file decides whether that was a conflict or a crash.
        let status = self.run(args, false)?;

        if let Some(markers) = read_conflict_markers(out)? {
            return Ok(MergeOutcome::Conflict(markers));
        }
        if !status.success() {
            return Err(ToolkitError::CommandFailed {
                program: self.exec.display().to_string(),
                command: format!(
                    "--bfile {} --merge-list {} --make-bed --out {}",
                    base.display(),
                    merge_list.display(),
                    out.display()
                ),
                status,
                stderr: String::from("merge failed without writing a conflict marker file"),
            });
        }
        Ok(MergeOutcome::Clean)
    }

    fn export_vcf(&self, bfile: &Path) -> Result<(), ToolkitError> {
        let args: Vec<OsString> = vec![
            "--bfile".into(),
            bfile.into(),
            "--recode".into(),
            "vcf".into(),
            "bgz".into(),
            "--out".into(),
            bfile.into(),
        ];
        self.run(args, true)?;
        Ok(())
    }
}
