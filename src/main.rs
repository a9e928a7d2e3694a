// ========================================================================================
//
//                          COHORT DELIVERY ORCHESTRATOR CLI
//
// ========================================================================================
//
// Thin command-line front end over `pipeline::run`. Configuration comes from
// an optional TOML file, with every field overridable by a flag; the binary
// validates the assembled config, runs the pipeline, and prints a summary of
// the stage reports. Hard failures exit nonzero with the failing stage's
// context; an unverified transfer is reported but left to the operator.

use clap::Parser;
use cohort_delivery::pipeline::{self, PipelineConfig};
use cohort_delivery::transfer::TransferMethod;
use log::error;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "cohort-delivery",
    version,
    about = "Assemble, merge, and deliver a multi-batch genotype cohort."
)]
struct Args {
    /// Optional TOML config file; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project identifier (used in output and staging directory names).
    #[arg(long)]
    project_id: Option<String>,

    /// Cohort sample list (one ID per line, or FID/IID pairs).
    #[arg(long)]
    cohort: Option<PathBuf>,

    /// Exclusion CSV; repeatable.
    #[arg(long = "exclusion")]
    exclusions: Vec<PathBuf>,

    /// PLINK fileset prefix for one batch; repeatable.
    #[arg(long = "batch")]
    batches: Vec<PathBuf>,

    /// Retained working directory for intermediates (default: ephemeral).
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Directory assembled for delivery.
    #[arg(long)]
    delivery_dir: Option<PathBuf>,

    /// Root of the researcher staging area.
    #[arg(long)]
    staging_root: Option<PathBuf>,

    /// Path to the PLINK executable.
    #[arg(long)]
    plink_exec: Option<PathBuf>,

    /// Skip the final VCF export.
    #[arg(long)]
    no_vcf: bool,

    /// Transfer method for the staging hand-off.
    #[arg(long, value_enum)]
    transfer_method: Option<TransferMethod>,
}

impl Args {
    /// Builds the effective config: TOML file (when given) as the base,
    /// flags layered on top, then completeness checks.
    fn resolve(self) -> Result<PipelineConfig, String> {
        let mut config = match &self.config {
            Some(path) => pipeline::PipelineConfig::from_toml(path).map_err(|e| e.to_string())?,
            None => PipelineConfig {
                project_id: String::new(),
                cohort_file: PathBuf::new(),
                exclusion_files: Vec::new(),
                batch_prefixes: Vec::new(),
                work_dir: None,
                delivery_dir: PathBuf::new(),
                staging_root: PathBuf::new(),
                plink_exec: PathBuf::from("plink"),
                convert_to_vcf: true,
                transfer_method: TransferMethod::default(),
            },
        };

        if let Some(project_id) = self.project_id {
            config.project_id = project_id;
        }
        if let Some(cohort) = self.cohort {
            config.cohort_file = cohort;
        }
        if !self.exclusions.is_empty() {
            config.exclusion_files = self.exclusions;
        }
        if !self.batches.is_empty() {
            config.batch_prefixes = self.batches;
        }
        if let Some(work_dir) = self.work_dir {
            config.work_dir = Some(work_dir);
        }
        if let Some(delivery_dir) = self.delivery_dir {
            config.delivery_dir = delivery_dir;
        }
        if let Some(staging_root) = self.staging_root {
            config.staging_root = staging_root;
        }
        if let Some(plink_exec) = self.plink_exec {
            config.plink_exec = plink_exec;
        }
        if self.no_vcf {
            config.convert_to_vcf = false;
        }
        if let Some(method) = self.transfer_method {
            config.transfer_method = method;
        }

        if config.project_id.is_empty() {
            return Err("missing --project-id (or project_id in config)".to_string());
        }
        if config.cohort_file.as_os_str().is_empty() {
            return Err("missing --cohort (or cohort_file in config)".to_string());
        }
        if config.delivery_dir.as_os_str().is_empty() {
            return Err("missing --delivery-dir (or delivery_dir in config)".to_string());
        }
        if config.staging_root.as_os_str().is_empty() {
            return Err("missing --staging-root (or staging_root in config)".to_string());
        }
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Args::parse().resolve() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            process::exit(2);
        }
    };

    let result = match pipeline::run(&config) {
        Ok(result) => result,
        Err(e) => {
            error!("{e}");
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    println!("Delivery complete for project {}", config.project_id);
    println!(
        "  filter:   {} -> {} samples ({} excluded identifiers)",
        result.filter_report.original_count,
        result.filter_report.final_count,
        result.filter_report.exclusion_count
    );
    match &result.merge_report {
        Some(merge) => println!(
            "  merge:    {} batches, {} samples, {} markers, {} conflicts, correction_applied={}",
            merge.batch_count,
            merge.final_sample_count,
            merge.final_marker_count,
            merge.conflict_marker_count,
            merge.correction_applied
        ),
        None => println!("  merge:    skipped (no batches configured)"),
    }
    println!(
        "  manifest: {} files, {} bytes",
        result.manifest.total_files(),
        result.manifest.total_size_bytes()
    );
    println!(
        "  transfer: {} files at {}, verified={}",
        result.transfer_report.file_count,
        result.transfer_report.destination_dir.display(),
        result.transfer_report.verified
    );

    if !result.transfer_report.verified {
        eprintln!("Warning: transfer verification failed; inspect the staging copy before release.");
        process::exit(3);
    }
}
