//! Run configuration, input files and derived output paths

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for one verification run
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Bases of context on each side of a variant
    pub flank_length: usize,
    /// Clustering distance (None = use `flank_length`)
    pub merge_length: Option<usize>,
    /// Filter and cluster both VCFs before building fragments
    pub filter_and_cluster_vcf: bool,
    /// Drop 0/0 calls while filtering
    pub discard_ref_calls: bool,
    /// Tolerate mismatches in the flanks of a fragment alignment
    pub allow_flank_mismatches: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            flank_length: 31,
            merge_length: None,
            filter_and_cluster_vcf: true,
            discard_ref_calls: true,
            allow_flank_mismatches: true,
        }
    }
}

impl VerifierConfig {
    pub fn effective_merge_length(&self) -> usize {
        self.merge_length.unwrap_or(self.flank_length)
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Input files
#[derive(Debug, Clone)]
pub struct VerifierInputs {
    /// dnadiff SNPs report
    pub dnadiff_snps: PathBuf,
    /// Reference assembly given to dnadiff
    pub dnadiff_ref: PathBuf,
    /// Query assembly given to dnadiff
    pub dnadiff_query: PathBuf,
    /// Calls to check against the reference assembly
    pub vcf_ref: PathBuf,
    /// Calls to check against the query assembly
    pub vcf_query: PathBuf,
    /// Reference genome both VCFs were called against
    pub vcf_reference: PathBuf,
}

impl VerifierInputs {
    /// Same inputs with every path made absolute.
    pub fn absolute(&self) -> Result<Self> {
        Ok(Self {
            dnadiff_snps: absolute_path(&self.dnadiff_snps)?,
            dnadiff_ref: absolute_path(&self.dnadiff_ref)?,
            dnadiff_query: absolute_path(&self.dnadiff_query)?,
            vcf_ref: absolute_path(&self.vcf_ref)?,
            vcf_query: absolute_path(&self.vcf_query)?,
            vcf_reference: absolute_path(&self.vcf_reference)?,
        })
    }
}

/// Every file a run writes, named `<outprefix><suffix>`
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub sam1: PathBuf,
    pub sam2: PathBuf,
    pub dnadiff_fasta1: PathBuf,
    pub dnadiff_fasta2: PathBuf,
    pub filtered_vcf1: PathBuf,
    pub filtered_vcf2: PathBuf,
    pub clustered_vcf1: PathBuf,
    pub clustered_vcf2: PathBuf,
    pub vcf_fasta1: PathBuf,
    pub vcf_fasta2: PathBuf,
    pub summary: PathBuf,
    pub stats: PathBuf,
    pub gt_conf_hist: PathBuf,
}

impl OutputPaths {
    pub fn from_prefix<P: AsRef<Path>>(outprefix: P) -> Result<Self> {
        let prefix = absolute_path(outprefix.as_ref())?;
        let with = |suffix: &str| {
            let mut name = OsString::from(prefix.as_os_str());
            name.push(suffix);
            PathBuf::from(name)
        };

        Ok(Self {
            sam1: with(".1.sam"),
            sam2: with(".2.sam"),
            dnadiff_fasta1: with(".dnadiff1.fa"),
            dnadiff_fasta2: with(".dnadiff2.fa"),
            filtered_vcf1: with(".1.filter.vcf"),
            filtered_vcf2: with(".2.filter.vcf"),
            clustered_vcf1: with(".1.filter.cluster.vcf"),
            clustered_vcf2: with(".2.filter.cluster.vcf"),
            vcf_fasta1: with(".vcf1.fa"),
            vcf_fasta2: with(".vcf2.fa"),
            summary: with(".summary.tsv"),
            stats: with(".stats.tsv"),
            gt_conf_hist: with(".gt_conf_hist.tsv"),
        })
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}
