// ========================================================================================
//
//                          END-TO-END DELIVERY ORCHESTRATION
//
// ========================================================================================
//
// Sequences the four stages of a cohort delivery:
//
//   filter  -> merge  -> manifest -> transfer
//
// Each stage blocks until complete. The pipeline stops at the first hard
// failure and surfaces it with stage context; recoverable merge conflicts are
// handled inside the merge engine and never halt the run.

use crate::filter::{self, FilterReport};
use crate::manifest::{self, DeliveryManifest, ManifestError};
use crate::merge::{GenotypeMerger, MergeError, MergeReport};
use crate::toolkit::{GenotypeToolkit, PlinkToolkit};
use crate::transfer::{self, RsyncPermissions, TransferMethod, TransferReport};
use crate::workspace::Workspace;
use log::{info, warn};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("loading config {path}: {message}")]
    Config { path: PathBuf, message: String },
    #[error("filter stage failed: {0}")]
    Filter(#[from] filter::FilterError),
    #[error("merge stage failed: {0}")]
    Merge(#[from] MergeError),
    #[error("manifest stage failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("transfer stage failed: {0}")]
    Transfer(#[from] transfer::TransferError),
    #[error("preparing {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn default_plink_exec() -> PathBuf {
    PathBuf::from("plink")
}

fn default_convert_to_vcf() -> bool {
    true
}

/// Configuration for one end-to-end delivery run. Deserializable from a TOML
/// file; the CLI may override individual fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub project_id: String,
    pub cohort_file: PathBuf,
    #[serde(default)]
    pub exclusion_files: Vec<PathBuf>,
    #[serde(default)]
    pub batch_prefixes: Vec<PathBuf>,
    /// Working directory for intermediates. When unset, an ephemeral
    /// directory is used and cleaned up after the run.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    pub delivery_dir: PathBuf,
    pub staging_root: PathBuf,
    #[serde(default = "default_plink_exec")]
    pub plink_exec: PathBuf,
    #[serde(default = "default_convert_to_vcf")]
    pub convert_to_vcf: bool,
    #[serde(default)]
    pub transfer_method: TransferMethod,
}

impl PipelineConfig {
    pub fn from_toml(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Aggregated output of a full pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    pub filter_report: FilterReport,
    pub merge_report: Option<MergeReport>,
    pub manifest: DeliveryManifest,
    pub transfer_report: TransferReport,
}

/// Runs the pipeline with the standard subprocess-backed PLINK toolkit.
pub fn run(config: &PipelineConfig) -> Result<PipelineResult, PipelineError> {
    let toolkit = PlinkToolkit::new(config.plink_exec.clone());
    run_with_toolkit(config, &toolkit)
}

/// Runs the pipeline against any toolkit implementation. Exposed so the merge
/// stages can be exercised without the external binary.
pub fn run_with_toolkit<T: GenotypeToolkit>(
    config: &PipelineConfig,
    toolkit: T,
) -> Result<PipelineResult, PipelineError> {
    let workspace = match &config.work_dir {
        Some(dir) => Workspace::at(dir),
        None => Workspace::ephemeral(),
    }
    .map_err(|source| PipelineError::Io {
        context: "workspace".to_string(),
        source,
    })?;

    std::fs::create_dir_all(&config.delivery_dir).map_err(|source| PipelineError::Io {
        context: format!("delivery directory {}", config.delivery_dir.display()),
        source,
    })?;

    // Stage 1: governance filtering. The merge only ever sees the result.
    info!("stage 1: filtering cohort for project {}", config.project_id);
    let keep_list = workspace.path("cohort_filtered.txt");
    let filter_report = filter::apply(&config.cohort_file, &config.exclusion_files, &keep_list)?;

    // Stage 2: subset, merge, correct.
    let merge_report = if config.batch_prefixes.is_empty() {
        warn!("no batch prefixes configured; skipping genotype merge");
        None
    } else {
        info!("stage 2: merging {} batches", config.batch_prefixes.len());
        let output_prefix = config
            .delivery_dir
            .join(format!("{}_final_genotypes", config.project_id));
        let merger = GenotypeMerger::new(toolkit);
        Some(merger.merge(
            &config.batch_prefixes,
            &keep_list,
            &output_prefix,
            &workspace,
            config.convert_to_vcf,
        )?)
    };

    // Stage 3: integrity manifest over everything the delivery contains.
    info!("stage 3: generating delivery manifest");
    let delivery_manifest = manifest::generate(&config.delivery_dir, &config.project_id)?;
    manifest::write_manifest(&delivery_manifest, &config.delivery_dir.join("MANIFEST.tsv"))?;
    manifest::write_status_summary(
        &delivery_manifest,
        &config.delivery_dir.join("STATUS_SUMMARY.tsv"),
    )?;

    // Stage 4: ship to staging and verify what arrived.
    info!("stage 4: transfer to staging");
    let transfer_report = transfer::send(
        &config.delivery_dir,
        &config.staging_root,
        &config.project_id,
        config.transfer_method,
        &RsyncPermissions::default(),
    )?;

    Ok(PipelineResult {
        filter_report,
        merge_report,
        manifest: delivery_manifest,
        transfer_report,
    })
}
