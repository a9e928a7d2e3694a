//! Shared test support: a pure-Rust `GenotypeToolkit` that honors the adapter
//! contract over plain-text filesets, so the correction loop and report
//! assembly can be exercised without the external PLINK binary.
//!
//! Text conventions: `.fam` holds one sample identifier per line, `.bim`
//! holds `marker<TAB>allele1<TAB>allele2` lines, `.bed` is an opaque stub.

// Not every test binary uses every helper.
#![allow(dead_code)]

use cohort_delivery::toolkit::{self, GenotypeToolkit, MergeOutcome, ToolkitError};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct FakeToolkit;

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut contents = lines.join("\n");
    contents.push('\n');
    fs::write(path, contents).unwrap_or_else(|e| panic!("writing {}: {e}", path.display()));
}

fn member(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = prefix.file_name().unwrap().to_os_string();
    name.push(format!(".{ext}"));
    prefix.with_file_name(name)
}

fn first_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

fn bim_fields(line: &str) -> (String, String, String) {
    let mut parts = line.split_whitespace();
    let id = parts.next().unwrap_or("").to_string();
    let a1 = parts.next().unwrap_or("").to_string();
    let a2 = parts.next().unwrap_or("").to_string();
    (id, a1, a2)
}

impl GenotypeToolkit for FakeToolkit {
    fn subset(
        &self,
        bfile: &Path,
        keep: &Path,
        exclude: Option<&Path>,
        out: &Path,
    ) -> Result<(), ToolkitError> {
        let keep_ids: HashSet<String> = read_lines(keep)
            .iter()
            .map(|l| first_token(l).to_string())
            .collect();
        let excluded: HashSet<String> = match exclude {
            Some(path) => read_lines(path).into_iter().collect(),
            None => HashSet::new(),
        };

        let samples: Vec<String> = read_lines(&member(bfile, "fam"))
            .into_iter()
            .filter(|l| keep_ids.contains(first_token(l)))
            .collect();
        let markers: Vec<String> = read_lines(&member(bfile, "bim"))
            .into_iter()
            .filter(|l| !excluded.contains(&bim_fields(l).0))
            .collect();

        write_lines(&member(out, "fam"), &samples);
        write_lines(&member(out, "bim"), &markers);
        fs::write(member(out, "bed"), b"BEDSTUB").unwrap();
        Ok(())
    }

    fn merge(
        &self,
        base: &Path,
        merge_list: &Path,
        out: &Path,
    ) -> Result<MergeOutcome, ToolkitError> {
        let mut samples = read_lines(&member(base, "fam"));
        let mut seen_samples: HashSet<String> = samples.iter().cloned().collect();
        let mut markers: Vec<String> = Vec::new();
        let mut alleles: HashMap<String, (String, String)> = HashMap::new();
        for line in read_lines(&member(base, "bim")) {
            let (id, a1, a2) = bim_fields(&line);
            alleles.insert(id.clone(), (a1, a2));
            markers.push(line);
        }

        let mut conflicts: Vec<String> = Vec::new();
        let mut conflicted: HashSet<String> = HashSet::new();
        for prefix in read_lines(merge_list) {
            let prefix = PathBuf::from(prefix);
            for sample in read_lines(&member(&prefix, "fam")) {
                if seen_samples.insert(sample.clone()) {
                    samples.push(sample);
                }
            }
            for line in read_lines(&member(&prefix, "bim")) {
                let (id, a1, a2) = bim_fields(&line);
                match alleles.get(&id) {
                    Some(existing) if *existing != (a1.clone(), a2.clone()) => {
                        if conflicted.insert(id.clone()) {
                            conflicts.push(id);
                        }
                    }
                    Some(_) => {}
                    None => {
                        alleles.insert(id.clone(), (a1, a2));
                        markers.push(line);
                    }
                }
            }
        }

        if !conflicts.is_empty() {
            // Mirror PLINK: write the side file, produce no merged fileset.
            write_lines(&toolkit::conflict_marker_path(out), &conflicts);
            return Ok(MergeOutcome::Conflict(conflicts));
        }

        write_lines(&member(out, "fam"), &samples);
        write_lines(&member(out, "bim"), &markers);
        fs::write(member(out, "bed"), b"MERGEDBED").unwrap();
        fs::write(member(out, "log"), b"fake merge log\n").unwrap();
        Ok(MergeOutcome::Clean)
    }

    fn export_vcf(&self, bfile: &Path) -> Result<(), ToolkitError> {
        // Deterministic recode of the text fileset, so repeated exports are
        // byte-identical.
        let samples = read_lines(&member(bfile, "fam"));
        let markers = read_lines(&member(bfile, "bim"));
        let mut vcf = String::from("##fileformat=VCFv4.2\n");
        vcf.push_str(&format!("#SAMPLES\t{}\n", samples.join("\t")));
        for line in markers {
            vcf.push_str(&format!("{line}\n"));
        }
        fs::write(member(bfile, "vcf.gz"), vcf).unwrap();
        Ok(())
    }
}

/// Writes a text fileset for one batch and returns its prefix.
pub fn write_fileset(
    dir: &Path,
    name: &str,
    samples: &[&str],
    markers: &[(&str, &str, &str)],
) -> PathBuf {
    let prefix = dir.join(name);
    let sample_lines: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
    let marker_lines: Vec<String> = markers
        .iter()
        .map(|(id, a1, a2)| format!("{id}\t{a1}\t{a2}"))
        .collect();
    write_lines(&member(&prefix, "fam"), &sample_lines);
    write_lines(&member(&prefix, "bim"), &marker_lines);
    fs::write(member(&prefix, "bed"), b"BEDSTUB").unwrap();
    prefix
}

/// Writes a keep-list (one identifier per line) and returns its path.
pub fn write_keep_list(dir: &Path, name: &str, ids: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let lines: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    write_lines(&path, &lines);
    path
}

/// Reads the first token of each non-empty line, for asserting on `.fam` and
/// `.bim` contents.
pub fn read_first_tokens(path: &Path) -> Vec<String> {
    read_lines(path)
        .iter()
        .map(|l| first_token(l).to_string())
        .collect()
}

pub fn fileset_member(prefix: &Path, ext: &str) -> PathBuf {
    member(prefix, ext)
}
