//! Aligning diff fragments against VCF fragments
//!
//! The [`Aligner`] trait is the seam between the verifier and the external
//! mapper. [`BwaMemAligner`] shells out to `bwa index` + `bwa mem -a -Y` and
//! reads the SAM back with rust-htslib; tests plug in their own aligners.

use anyhow::{Context, Result};
use log::{debug, info};
use rust_htslib::bam::{self, record::Aux, record::Cigar, Read};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::VerifyError;
use crate::flank::{FragmentId, FragmentSet};

/// Side files written by `bwa index`
const BWA_INDEX_SUFFIXES: [&str; 5] = ["amb", "ann", "bwt", "pac", "sa"];

// ============================================================================
// Data Structures
// ============================================================================

/// One alignment of a query fragment, names already resolved to ids
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub query: FragmentId,
    /// `None` when unmapped
    pub target: Option<FragmentId>,
    pub is_unmapped: bool,
    /// 0-based leftmost position on the target
    pub target_start: usize,
    pub cigar: Vec<Cigar>,
    pub query_sequence: Vec<u8>,
    /// NM tag, if present
    pub mismatches: Option<u32>,
}

impl AlignmentRecord {
    /// Record for a query that did not align anywhere
    pub fn unmapped(query: FragmentId, query_sequence: Vec<u8>) -> Self {
        AlignmentRecord {
            query,
            target: None,
            is_unmapped: true,
            target_start: 0,
            cigar: Vec::new(),
            query_sequence,
            mismatches: None,
        }
    }
}

/// Inputs for one alignment run
///
/// Both fragment sets are already written to their FASTA paths.
pub struct AlignmentJob<'a> {
    pub targets: &'a FragmentSet,
    pub queries: &'a FragmentSet,
    pub targets_fasta: &'a Path,
    pub queries_fasta: &'a Path,
    pub sam_out: &'a Path,
}

/// Aligns query fragments to target fragments.
///
/// Records come back in output order; a query may appear more than once
/// (secondary hits) and the first record for each query is the primary.
pub trait Aligner {
    fn align(&self, job: &AlignmentJob<'_>) -> Result<Vec<AlignmentRecord>>;
}

// ============================================================================
// bwa mem
// ============================================================================

#[derive(Debug, Clone)]
pub struct BwaMemAligner {
    pub binary: PathBuf,
}

impl Default for BwaMemAligner {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("bwa"),
        }
    }
}

impl BwaMemAligner {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn index(&self, targets_fasta: &Path) -> Result<()> {
        let mut command = Command::new(&self.binary);
        command.arg("index").arg(targets_fasta);
        run_command(command, None)
    }

    fn mem(&self, targets_fasta: &Path, queries_fasta: &Path, sam_out: &Path) -> Result<()> {
        let sam_file = File::create(sam_out)
            .with_context(|| format!("Failed to create SAM file {}", sam_out.display()))?;
        let mut command = Command::new(&self.binary);
        command
            .arg("mem")
            .arg("-a") // report all alignments
            .arg("-Y") // soft clip supplementary alignments
            .arg(targets_fasta)
            .arg(queries_fasta);
        run_command(command, Some(sam_file))
    }
}

impl Aligner for BwaMemAligner {
    fn align(&self, job: &AlignmentJob<'_>) -> Result<Vec<AlignmentRecord>> {
        if job.targets.is_empty() {
            info!(
                "No target fragments in {}, reporting {} queries unmapped",
                job.targets_fasta.display(),
                job.queries.len()
            );
            return Ok(job
                .queries
                .iter()
                .map(|q| AlignmentRecord::unmapped(q.id.clone(), q.seq.clone()))
                .collect());
        }

        self.index(job.targets_fasta)?;
        let mapped = self.mem(job.targets_fasta, job.queries_fasta, job.sam_out);
        remove_bwa_index(job.targets_fasta);
        mapped?;

        read_sam_records(job.sam_out, job.targets, job.queries)
    }
}

fn run_command(mut command: Command, stdout: Option<File>) -> Result<()> {
    let description = format!("{:?}", command);
    debug!("Running {}", description);

    command.stderr(Stdio::piped());
    if let Some(file) = stdout {
        command.stdout(Stdio::from(file));
    }

    let output = command
        .output()
        .with_context(|| format!("Failed to execute {}", description))?;

    if !output.status.success() {
        return Err(VerifyError::ExternalTool {
            command: description,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(())
}

fn remove_bwa_index(targets_fasta: &Path) {
    for suffix in BWA_INDEX_SUFFIXES {
        let mut name = targets_fasta.as_os_str().to_owned();
        name.push(".");
        name.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(name));
    }
}

// ============================================================================
// SAM parsing
// ============================================================================

/// Read every record of a SAM/BAM file, resolving fragment names.
///
/// A query or target name that is not in its fragment set is fatal.
pub fn read_sam_records<P: AsRef<Path>>(
    path: P,
    targets: &FragmentSet,
    queries: &FragmentSet,
) -> Result<Vec<AlignmentRecord>> {
    let path = path.as_ref();
    let mut reader = bam::Reader::from_path(path)
        .with_context(|| format!("Failed to open alignment file {}", path.display()))?;
    let header = reader.header().clone();

    let mut records = Vec::new();
    for result in reader.records() {
        let rec = result?;

        let qname = String::from_utf8_lossy(rec.qname()).to_string();
        let query = queries
            .by_name(&qname)
            .ok_or_else(|| VerifyError::UnknownFragment(qname.clone()))?
            .id
            .clone();

        if rec.is_unmapped() || rec.tid() < 0 {
            records.push(AlignmentRecord::unmapped(query, rec.seq().as_bytes()));
            continue;
        }

        let tname = String::from_utf8_lossy(header.tid2name(rec.tid() as u32)).to_string();
        let target = targets
            .by_name(&tname)
            .ok_or_else(|| VerifyError::UnknownFragment(tname.clone()))?
            .id
            .clone();

        records.push(AlignmentRecord {
            query,
            target: Some(target),
            is_unmapped: false,
            target_start: rec.pos().max(0) as usize,
            cigar: rec.cigar().iter().cloned().collect(),
            query_sequence: rec.seq().as_bytes(),
            mismatches: mismatch_tag(&rec),
        });
    }

    debug!("Read {} alignment records from {}", records.len(), path.display());
    Ok(records)
}

fn mismatch_tag(rec: &bam::Record) -> Option<u32> {
    match rec.aux(b"NM") {
        Ok(Aux::U8(v)) => Some(v as u32),
        Ok(Aux::U16(v)) => Some(v as u32),
        Ok(Aux::U32(v)) => Some(v),
        Ok(Aux::I8(v)) => Some(v.max(0) as u32),
        Ok(Aux::I16(v)) => Some(v.max(0) as u32),
        Ok(Aux::I32(v)) => Some(v.max(0) as u32),
        _ => None,
    }
}
