//! Mapping-based verification of VCF calls against a dnadiff report.
//!
//! Each difference between two assemblies is cut out with flanking sequence
//! and aligned against flanked alleles of the calls in two VCF files, one per
//! assembly. A difference is found when an alignment genuinely matches and
//! the VCF record behind it is a homozygous call of that allele.
//!
//! ```no_run
//! use dnadiff_verifier::{DnadiffVerifier, VerifierConfig, VerifierInputs};
//!
//! # fn main() -> anyhow::Result<()> {
//! let inputs = VerifierInputs {
//!     dnadiff_snps: "out.snps".into(),
//!     dnadiff_ref: "assembly1.fa".into(),
//!     dnadiff_query: "assembly2.fa".into(),
//!     vcf_ref: "calls1.vcf".into(),
//!     vcf_query: "calls2.vcf".into(),
//!     vcf_reference: "reference.fa".into(),
//! };
//! let verifier = DnadiffVerifier::new(inputs, "verify", VerifierConfig::default())?;
//! let (stats, _hist) = verifier.run()?;
//! println!("{} of {} found", stats.found_vars, stats.total);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod alignment;
pub mod cigar_utils;
pub mod config;
pub mod dnadiff;
pub mod error;
pub mod flank;
pub mod mapping_filter; // Match judge for fragment alignments
pub mod vcf;
pub mod vcf_cluster;
pub mod vcf_filter;
pub mod verifier;

#[cfg(feature = "python")]
mod python;

pub use aggregate::{ConfidenceHistogram, SideResult, Stats, SummaryRow};
pub use alignment::{Aligner, AlignmentJob, AlignmentRecord, BwaMemAligner};
pub use config::{OutputPaths, VerifierConfig, VerifierInputs};
pub use error::VerifyError;
pub use flank::{Fragment, FragmentId, FragmentSet};
pub use mapping_filter::check_if_alignment_is_good;
pub use vcf_cluster::{MergeMethod, SimpleClusterer, VcfClusterer};
pub use verifier::DnadiffVerifier;
