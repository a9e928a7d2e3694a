// ========================================================================================
//
//               THE MULTI-BATCH MERGE & CONFLICT-RESOLUTION ENGINE
//
// ========================================================================================
//
// This module is the core of the delivery pipeline. It assembles one cohort
// dataset from N independently-genotyped batches:
//
//   1. Subset every batch to the keep-list.
//   2. Attempt a merge across all subsets.
//   3. On structural conflict (allele coding / strand disagreement), exclude
//      the conflicting markers from EVERY batch and re-merge. Exactly once.
//   4. Optionally recode the final fileset to bgzipped VCF.
//
// The retry bound is deliberate: unbounded retry risks excluding an unbounded
// fraction of markers, so the engine performs one auditable correction round
// and reports whatever that round produced.
//
// Report counts are read back from the files each stage persisted, never from
// in-memory state, so the report audits what landed on disk and a silent
// truncation cannot hide behind an intended count.

use crate::fileset::{self, FilesetError};
use crate::toolkit::{GenotypeToolkit, MergeOutcome, ToolkitError};
use crate::workspace::Workspace;
use log::{info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no batches supplied to merge")]
    NoBatches,
    #[error("dataset not found: {0}")]
    DatasetNotFound(#[source] FilesetError),
    #[error("no samples remaining after subsetting {batch} against the keep-list")]
    NoSamplesRemaining { batch: PathBuf },
    #[error(transparent)]
    Toolkit(#[from] ToolkitError),
    #[error(transparent)]
    Fileset(#[from] FilesetError),
    #[error("VCF export failed for {prefix}")]
    ExportFailed {
        prefix: PathBuf,
        #[source]
        source: ToolkitError,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Final, externally-visible record of one merge run. Immutable once built.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub batch_count: usize,
    pub conflict_marker_count: usize,
    pub correction_applied: bool,
    pub final_sample_count: usize,
    pub final_marker_count: usize,
    pub output_prefix: PathBuf,
}

/// Terminal outcome of the merge attempts: which markers were excluded and
/// whether a correction round ran.
#[derive(Debug)]
struct Resolution {
    conflict_markers: Vec<String>,
    correction_applied: bool,
}

/// Merges multi-batch PLINK filesets with bounded automatic conflict
/// resolution, generic over the toolkit that does the heavy lifting.
#[derive(Debug)]
pub struct GenotypeMerger<T: GenotypeToolkit> {
    toolkit: T,
}

impl<T: GenotypeToolkit> GenotypeMerger<T> {
    pub fn new(toolkit: T) -> Self {
        Self { toolkit }
    }

    /// Runs the full subset / merge / correct / export sequence.
    ///
    /// `batch_prefixes` name the immutable input filesets; `keep_list` is the
    /// filtered sample list applied to every batch; intermediates land in
    /// `workspace`; the final fileset lands at `output_prefix`.
    pub fn merge(
        &self,
        batch_prefixes: &[PathBuf],
        keep_list: &Path,
        output_prefix: &Path,
        workspace: &Workspace,
        convert_to_vcf: bool,
    ) -> Result<MergeReport, MergeError> {
        if batch_prefixes.is_empty() {
            return Err(MergeError::NoBatches);
        }

        // Stage 1: subset every batch. No data dependency between batches;
        // they are processed sequentially and each writes a distinct prefix.
        let subset_prefixes = self.subset_all(batch_prefixes, keep_list, workspace, None, "subset")?;

        let resolution = if subset_prefixes.len() < 2 {
            info!("single batch supplied; merge is a no-op");
            promote_fileset(&subset_prefixes[0], output_prefix)?;
            Resolution {
                conflict_markers: Vec::new(),
                correction_applied: false,
            }
        } else {
            self.run_correction_loop(
                batch_prefixes,
                &subset_prefixes,
                keep_list,
                output_prefix,
                workspace,
            )?
        };

        // Counts come from the persisted fileset, not from what we meant to
        // write. A prefix with no .fam on disk reports zero samples.
        let final_sample_count =
            fileset::count_lines_or_zero(&fileset::fileset_path(output_prefix, "fam"))?;
        let final_marker_count =
            fileset::count_lines_or_zero(&fileset::fileset_path(output_prefix, "bim"))?;

        if convert_to_vcf {
            info!("exporting {} to bgzipped VCF", output_prefix.display());
            self.toolkit
                .export_vcf(output_prefix)
                .map_err(|source| MergeError::ExportFailed {
                    prefix: output_prefix.to_path_buf(),
                    source,
                })?;
        }

        let report = MergeReport {
            batch_count: batch_prefixes.len(),
            conflict_marker_count: resolution.conflict_markers.len(),
            correction_applied: resolution.correction_applied,
            final_sample_count,
            final_marker_count,
            output_prefix: output_prefix.to_path_buf(),
        };
        info!(
            "merge complete: {} batches, {} samples, {} markers, {} conflicts, correction_applied={}",
            report.batch_count,
            report.final_sample_count,
            report.final_marker_count,
            report.conflict_marker_count,
            report.correction_applied
        );
        Ok(report)
    }

    /// One merge attempt plus at most one correction round.
    fn run_correction_loop(
        &self,
        batch_prefixes: &[PathBuf],
        subset_prefixes: &[PathBuf],
        keep_list: &Path,
        output_prefix: &Path,
        workspace: &Workspace,
    ) -> Result<Resolution, MergeError> {
        let merge_list = workspace.path("merge_list.txt");
        write_merge_list(&merge_list, &subset_prefixes[1..])?;

        let attempt_prefix = workspace.path("merge_attempt");
        let outcome = self
            .toolkit
            .merge(&subset_prefixes[0], &merge_list, &attempt_prefix)?;

        match outcome {
            MergeOutcome::Clean => {
                promote_fileset(&attempt_prefix, output_prefix)?;
                Ok(Resolution {
                    conflict_markers: Vec::new(),
                    correction_applied: false,
                })
            }
            MergeOutcome::Conflict(markers) => {
                warn!(
                    "detected {} conflicting markers; re-subsetting all batches with exclusions",
                    markers.len()
                );

                // The exclusion set is applied uniformly: every batch is
                // re-subsetted against the full conflict list.
                let exclude_path = workspace.path("conflict_markers.txt");
                write_marker_list(&exclude_path, &markers)?;

                let corrected_prefixes = self.subset_all(
                    batch_prefixes,
                    keep_list,
                    workspace,
                    Some(&exclude_path),
                    "corrected",
                )?;

                let corrected_list = workspace.path("merge_list_corrected.txt");
                write_merge_list(&corrected_list, &corrected_prefixes[1..])?;

                // Second and final merge, straight to the output prefix. A
                // residual conflict here is not retried: the caller reads the
                // report's counts and correction flag.
                match self
                    .toolkit
                    .merge(&corrected_prefixes[0], &corrected_list, output_prefix)?
                {
                    MergeOutcome::Clean => {}
                    MergeOutcome::Conflict(residual) => {
                        warn!(
                            "{} markers still conflict after the correction round; retry bound reached",
                            residual.len()
                        );
                    }
                }

                Ok(Resolution {
                    conflict_markers: markers,
                    correction_applied: true,
                })
            }
        }
    }

    /// Subsets every batch to the keep-list (minus `exclude` markers when the
    /// correction round supplies them), writing `<batch>_<stage>` prefixes in
    /// the workspace.
    fn subset_all(
        &self,
        batch_prefixes: &[PathBuf],
        keep_list: &Path,
        workspace: &Workspace,
        exclude: Option<&Path>,
        stage: &str,
    ) -> Result<Vec<PathBuf>, MergeError> {
        let mut outputs = Vec::with_capacity(batch_prefixes.len());
        for batch in batch_prefixes {
            let name = batch
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "batch".to_string());
            let out = workspace.path(&format!("{name}_{stage}"));
            self.subset_batch(batch, keep_list, exclude, &out)?;
            outputs.push(out);
        }
        Ok(outputs)
    }

    /// Subsets one batch. The input fileset is never mutated; a new fileset
    /// is materialized at `out`.
    fn subset_batch(
        &self,
        batch: &Path,
        keep_list: &Path,
        exclude: Option<&Path>,
        out: &Path,
    ) -> Result<(), MergeError> {
        fileset::require_fileset(batch).map_err(MergeError::DatasetNotFound)?;

        self.toolkit.subset(batch, keep_list, exclude, out)?;

        // An empty subset would silently corrupt the merge, so it is a hard
        // error rather than an empty dataset.
        let samples = fileset::count_lines_or_zero(&fileset::fileset_path(out, "fam"))?;
        if samples == 0 {
            return Err(MergeError::NoSamplesRemaining {
                batch: batch.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Renames a fileset (plus the tool's log, when present) from one prefix to
/// another. Used to promote a clean first attempt to the final output.
fn promote_fileset(from: &Path, to: &Path) -> Result<(), MergeError> {
    for ext in ["bed", "bim", "fam", "log"] {
        let src = fileset::fileset_path(from, ext);
        if src.is_file() {
            fileset::move_file(&src, &fileset::fileset_path(to, ext))?;
        }
    }
    Ok(())
}

fn write_merge_list(path: &Path, prefixes: &[PathBuf]) -> Result<(), MergeError> {
    let mut contents = prefixes
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    contents.push('\n');
    std::fs::write(path, contents).map_err(|source| MergeError::Io {
        context: format!("writing merge list {}", path.display()),
        source,
    })
}

fn write_marker_list(path: &Path, markers: &[String]) -> Result<(), MergeError> {
    let mut contents = markers.join("\n");
    contents.push('\n');
    std::fs::write(path, contents).map_err(|source| MergeError::Io {
        context: format!("writing marker exclusion list {}", path.display()),
        source,
    })
}
