//! Fatal error kinds raised while verifying a call set.
//!
//! Everything here aborts the run. Degenerate inputs that are merely
//! skipped (heterozygous calls, missing genotypes, truncated flanks) never
//! surface as errors.

use crate::flank::FragmentId;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Bad genotype index in VCF record: {0}")]
    MalformedGenotype(String),

    #[error("Bad GL values in VCF record: {0}")]
    MalformedLikelihoods(String),

    #[error("Malformed VCF record {record}: {reason}")]
    MalformedVcfRecord { record: String, reason: String },

    #[error("Malformed dnadiff line {line_number}: {reason}")]
    MalformedDiffLine { line_number: usize, reason: String },

    #[error("No NM tag found in alignment record for {0}")]
    MissingMismatchTag(FragmentId),

    #[error("Mapped alignment record for {0} has no known target fragment")]
    MissingTarget(FragmentId),

    #[error("No aligned positions to compare for {0}")]
    EmptyComparisonWindow(FragmentId),

    #[error("Unknown fragment name in alignment output: {0}")]
    UnknownFragment(String),

    #[error("Command failed ({status}): {command}\n{stderr}")]
    ExternalTool {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("No sequences found in FASTA file {0}")]
    EmptyFasta(String),
}
