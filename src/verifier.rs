//! End-to-end verification run
//!
//! # Pipeline
//! 1. Flanked fragments for both sides of every dnadiff record
//! 2. Optional filter + cluster of both VCFs
//! 3. Flanked fragments for every allele of every VCF record
//! 4. Side 1: reference assembly fragments aligned to first VCF fragments,
//!    side 2: query assembly fragments aligned to second VCF fragments
//! 5. Verdicts joined into the summary table, stats and GT_CONF histogram
//!
//! All intermediate files live next to the output prefix. Fragment FASTAs
//! are removed once aligned; the SAM files and filtered VCFs are kept.
//! Runs sharing an output prefix must not overlap.

use anyhow::Result;
use log::{debug, info};
use std::path::Path;

use crate::aggregate::{
    build_summary, gather_stats, parse_alignments_against_vcf, write_histogram, write_stats,
    write_summary, ConfidenceHistogram, Stats,
};
use crate::alignment::{Aligner, AlignmentJob, AlignmentRecord, BwaMemAligner};
use crate::config::{OutputPaths, VerifierConfig, VerifierInputs};
use crate::dnadiff::{load_first_sequence, load_sequences, parse_dnadiff_report};
use crate::flank::{diff_fragments, vcf_fragments, FragmentSet};
use crate::vcf::{read_vcf_file, VcfReadOptions};
use crate::vcf_cluster::{MergeMethod, SimpleClusterer, VcfClusterer};
use crate::vcf_filter::filter_vcf_for_clustering;

pub struct DnadiffVerifier {
    inputs: VerifierInputs,
    outputs: OutputPaths,
    config: VerifierConfig,
    aligner: Box<dyn Aligner>,
}

impl DnadiffVerifier {
    /// Resolve all paths and use `bwa` from the search path.
    pub fn new<P: AsRef<Path>>(
        inputs: VerifierInputs,
        outprefix: P,
        config: VerifierConfig,
    ) -> Result<Self> {
        Ok(Self {
            inputs: inputs.absolute()?,
            outputs: OutputPaths::from_prefix(outprefix)?,
            config,
            aligner: Box::new(BwaMemAligner::default()),
        })
    }

    pub fn with_aligner<A: Aligner + 'static>(mut self, aligner: A) -> Self {
        self.aligner = Box::new(aligner);
        self
    }

    pub fn outputs(&self) -> &OutputPaths {
        &self.outputs
    }

    /// VCFs whose records the fragments are built from
    fn vcfs_to_check(&self) -> (&Path, &Path) {
        if self.config.filter_and_cluster_vcf {
            (
                self.outputs.clustered_vcf1.as_path(),
                self.outputs.clustered_vcf2.as_path(),
            )
        } else {
            (self.inputs.vcf_ref.as_path(), self.inputs.vcf_query.as_path())
        }
    }

    fn filter_and_cluster(&self) -> Result<()> {
        let discard = self.config.discard_ref_calls;
        filter_vcf_for_clustering(&self.inputs.vcf_ref, &self.outputs.filtered_vcf1, discard)?;
        filter_vcf_for_clustering(&self.inputs.vcf_query, &self.outputs.filtered_vcf2, discard)?;

        let merge_method = if discard {
            MergeMethod::Simple
        } else {
            MergeMethod::GtAware
        };
        let clusterer = SimpleClusterer::new(merge_method, self.config.effective_merge_length());
        clusterer.cluster(
            &self.outputs.filtered_vcf1,
            &self.inputs.vcf_reference,
            &self.outputs.clustered_vcf1,
        )?;
        clusterer.cluster(
            &self.outputs.filtered_vcf2,
            &self.inputs.vcf_reference,
            &self.outputs.clustered_vcf2,
        )?;
        Ok(())
    }

    fn align_both_sides(
        &self,
        dnadiff1: &FragmentSet,
        dnadiff2: &FragmentSet,
        vcf1: &FragmentSet,
        vcf2: &FragmentSet,
    ) -> Result<(Vec<AlignmentRecord>, Vec<AlignmentRecord>)> {
        let side1 = self.aligner.align(&AlignmentJob {
            targets: vcf1,
            queries: dnadiff1,
            targets_fasta: &self.outputs.vcf_fasta1,
            queries_fasta: &self.outputs.dnadiff_fasta1,
            sam_out: &self.outputs.sam1,
        })?;
        let side2 = self.aligner.align(&AlignmentJob {
            targets: vcf2,
            queries: dnadiff2,
            targets_fasta: &self.outputs.vcf_fasta2,
            queries_fasta: &self.outputs.dnadiff_fasta2,
            sam_out: &self.outputs.sam2,
        })?;
        Ok((side1, side2))
    }

    /// Run the whole pipeline and write summary, stats and histogram.
    pub fn run(&self) -> Result<(Stats, ConfidenceHistogram)> {
        let flank_length = self.config.flank_length;

        let diffs = parse_dnadiff_report(&self.inputs.dnadiff_snps)?;
        let assembly1 = load_first_sequence(&self.inputs.dnadiff_ref)?;
        let assembly2 = load_first_sequence(&self.inputs.dnadiff_query)?;
        let (dnadiff1, dnadiff2) = diff_fragments(&diffs, &assembly1, &assembly2, flank_length);
        let fastas = FragmentFastas(&self.outputs);
        dnadiff1.write_fasta(&self.outputs.dnadiff_fasta1)?;
        dnadiff2.write_fasta(&self.outputs.dnadiff_fasta2)?;
        info!("Built fragments for {} dnadiff records", diffs.len());

        if self.config.filter_and_cluster_vcf {
            self.filter_and_cluster()?;
        }

        let (vcf_path1, vcf_path2) = self.vcfs_to_check();
        let read_options = VcfReadOptions::default();
        let vcf_records1 = read_vcf_file(vcf_path1, &read_options)?;
        let vcf_records2 = read_vcf_file(vcf_path2, &read_options)?;
        let ref_seqs = load_sequences(&self.inputs.vcf_reference)?;

        let vcf1 = vcf_fragments(&vcf_records1, &ref_seqs, flank_length);
        let vcf2 = vcf_fragments(&vcf_records2, &ref_seqs, flank_length);
        vcf1.write_fasta(&self.outputs.vcf_fasta1)?;
        vcf2.write_fasta(&self.outputs.vcf_fasta2)?;
        info!(
            "Built {} and {} VCF allele fragments",
            vcf1.len(),
            vcf2.len()
        );

        let aligned = self.align_both_sides(&dnadiff1, &dnadiff2, &vcf1, &vcf2);
        drop(fastas);
        let (side1, side2) = aligned?;

        let allow_mismatches = self.config.allow_flank_mismatches;
        let ref_results = parse_alignments_against_vcf(
            &side1,
            &vcf1,
            &vcf_records1,
            diffs.len(),
            flank_length,
            allow_mismatches,
        )?;
        let query_results = parse_alignments_against_vcf(
            &side2,
            &vcf2,
            &vcf_records2,
            diffs.len(),
            flank_length,
            allow_mismatches,
        )?;

        let rows = build_summary(&diffs, ref_results, query_results);
        write_summary(&self.outputs.summary, &rows)?;
        let (stats, hist) = gather_stats(&rows);
        write_stats(&self.outputs.stats, &stats)?;
        write_histogram(&self.outputs.gt_conf_hist, &hist)?;

        info!(
            "Verified {} differences: {} found, {} missed",
            stats.total, stats.found_vars, stats.missed_vars
        );
        Ok((stats, hist))
    }
}

/// Removes the fragment FASTAs when dropped, whichever step failed.
struct FragmentFastas<'a>(&'a OutputPaths);

impl Drop for FragmentFastas<'_> {
    fn drop(&mut self) {
        let outputs = self.0;
        for path in [
            &outputs.dnadiff_fasta1,
            &outputs.dnadiff_fasta2,
            &outputs.vcf_fasta1,
            &outputs.vcf_fasta2,
        ] {
            if std::fs::remove_file(path).is_ok() {
                debug!("Removed {}", path.display());
            }
        }
    }
}
