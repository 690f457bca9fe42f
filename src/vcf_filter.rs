//! VCF pre-filter: normalize calls before clustering
//!
//! Keeps only homozygous, non-missing calls with a single ALT allele and
//! fills in `GT_CONF` when the caller did not write one. Output records keep
//! the input header and every field the filter does not touch, so the result
//! is still a valid VCF for the clusterer.

use anyhow::{Context, Result};
use log::{info, warn};
use rust_htslib::bcf::Read;
use std::path::Path;

use crate::error::VerifyError;
use crate::vcf::{
    create_vcf_writer, output_header, python_float_string, read_bcf_records, VcfRecord,
};

/// FILTER value marking calls that could not be placed on the reference
const UNPLACEABLE_FILTER: &str = "MISMAPPED_UNPLACEABLE";

/// Counts from one pre-filter pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilterStats {
    pub records_in: usize,
    pub records_kept: usize,
}

/// Decide the fate of one record.
///
/// Returns `Ok(None)` for records that are skipped, `Ok(Some(record))` with
/// the rewritten record otherwise. A genotype that points at a non-existent
/// ALT is fatal.
pub fn filter_record(
    mut record: VcfRecord,
    discard_ref_calls: bool,
) -> Result<Option<VcfRecord>, VerifyError> {
    if record.is_filtered(UNPLACEABLE_FILTER) {
        return Ok(None);
    }
    if record.genotype.is_none() {
        warn!("No GT in vcf record: {}", record);
        return Ok(None);
    }
    if record.ref_bases.is_empty() || record.ref_bases == "." {
        return Ok(None);
    }

    let Some(called) = record.homozygous_allele() else {
        return Ok(None);
    };
    if discard_ref_calls && called == 0 {
        return Ok(None);
    }
    let is_ref_call = called == 0;

    if record.alt.len() > 1 {
        if is_ref_call {
            record.genotype = Some(vec![Some(0), Some(0)]);
            record.alt.truncate(1);
        } else {
            let alt = (called as usize)
                .checked_sub(1)
                .and_then(|i| record.alt.get(i).cloned())
                .ok_or_else(|| VerifyError::MalformedGenotype(record.to_string()))?;
            record.genotype = Some(vec![Some(1), Some(1)]);
            record.alt = vec![alt];
        }
    }

    match record.alt.first() {
        Some(alt) if !alt.is_empty() && alt != "." => {}
        _ => return Ok(None),
    }

    if let Some(genotype) = &mut record.genotype {
        if genotype.len() == 1 {
            genotype.push(genotype[0]);
        }
    }

    if record.gt_conf.is_none() {
        if let Some(conf) = derive_gt_conf(&record, called, is_ref_call)? {
            record.gt_conf = Some(python_float_string(conf));
        }
    }

    Ok(Some(record))
}

/// Genotype confidence from GL, falling back to `SupportFraction`.
///
/// `called` is the allele index from the genotype as written in the input,
/// before any multi-allelic collapse.
fn derive_gt_conf(
    record: &VcfRecord,
    called: u32,
    is_ref_call: bool,
) -> Result<Option<f64>, VerifyError> {
    if let Some(gl) = &record.likelihoods {
        let bad = || VerifyError::MalformedLikelihoods(record.to_string());
        let likelihoods: Vec<f64> = gl.iter().copied().collect::<Option<_>>().ok_or_else(bad)?;
        if likelihoods.len() < 3 {
            return Err(bad());
        }

        let conf = if is_ref_call {
            likelihoods[0] - likelihoods[1]
        } else {
            let called_gl = likelihoods.get(called as usize).ok_or_else(bad)?;
            called_gl - likelihoods[0]
        };
        return Ok(Some(conf));
    }

    Ok(record.support_fraction.map(|fraction| fraction * 100.0))
}

/// Filter a whole VCF file into `outfile`.
pub fn filter_vcf_for_clustering<P: AsRef<Path>, Q: AsRef<Path>>(
    infile: P,
    outfile: Q,
    discard_ref_calls: bool,
) -> Result<FilterStats> {
    let infile = infile.as_ref();
    let outfile = outfile.as_ref();

    let (reader, records) = read_bcf_records(infile)?;
    let header = output_header(reader.header())?;
    let mut writer = create_vcf_writer(outfile, &header)?;

    let mut stats = FilterStats::default();
    for mut record in records {
        stats.records_in += 1;

        let mut call = VcfRecord::from_bcf(&record)
            .with_context(|| format!("Bad record in VCF file {}", infile.display()))?;
        call.remove_asterisk_alts();
        call.remove_useless_start_nucleotides();

        let kept = filter_record(call, discard_ref_calls)
            .with_context(|| format!("Cannot filter VCF file {}", infile.display()))?;
        if let Some(kept) = kept {
            writer.translate(&mut record);
            writer.subset(&mut record);
            kept.apply_to(&mut record)?;
            writer
                .write(&record)
                .with_context(|| format!("Failed to write filtered VCF {}", outfile.display()))?;
            stats.records_kept += 1;
        }
    }

    info!(
        "Filtered {}: kept {} of {} records",
        infile.display(),
        stats.records_kept,
        stats.records_in
    );
    Ok(stats)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcf::testing::{parse_record, record_lines, write_vcf};
    use crate::vcf::{read_vcf_file, VcfReadOptions};

    fn run(line: &str, discard_ref_calls: bool) -> Option<VcfRecord> {
        filter_record(parse_record(line), discard_ref_calls).unwrap()
    }

    fn gt(record: &VcfRecord) -> Vec<Option<u32>> {
        record.genotype.clone().unwrap()
    }

    #[test]
    fn test_rejects_unplaceable_and_missing_gt() {
        assert!(run("r\t5\t.\tA\tG\t.\tMISMAPPED_UNPLACEABLE\t.\tGT\t1/1", true).is_none());
        assert!(run("r\t5\t.\tA\tG\t.\tPASS\t.\tDP\t10", true).is_none());
    }

    #[test]
    fn test_rejects_het_missing_and_ref_calls() {
        assert!(run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0/1", true).is_none());
        assert!(run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t./.", true).is_none());
        assert!(run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0/0", true).is_none());
        assert!(run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0|1", true).is_none());

        let kept = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0/0", false).unwrap();
        assert_eq!(gt(&kept), vec![Some(0), Some(0)]);
        assert_eq!(kept.alt, vec!["G"]);
    }

    #[test]
    fn test_multiallelic_collapse() {
        let alt_call = run("r\t5\t.\tA\tG,T\t.\tPASS\t.\tGT:GT_CONF\t2/2:7", true).unwrap();
        assert_eq!(alt_call.alt, vec!["T"]);
        assert_eq!(gt(&alt_call), vec![Some(1), Some(1)]);
        assert_eq!(alt_call.gt_conf.as_deref(), Some("7"));

        let ref_call = run("r\t5\t.\tA\tG,T\t.\tPASS\t.\tGT:GT_CONF\t0/0:7", false).unwrap();
        assert_eq!(ref_call.alt, vec!["G"]);
        assert_eq!(gt(&ref_call), vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_multiallelic_bad_index_is_fatal() {
        let rec = parse_record("r\t5\t.\tA\tG,T\t.\tPASS\t.\tGT\t3/3");
        let err = filter_record(rec, true).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedGenotype(_)));
    }

    #[test]
    fn test_rejects_placeholder_alt() {
        assert!(run("r\t5\t.\tA\t.\t.\tPASS\t.\tGT\t1/1", true).is_none());
    }

    #[test]
    fn test_haploid_genotypes_become_diploid() {
        let alt = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t1", true).unwrap();
        assert_eq!(gt(&alt), vec![Some(1), Some(1)]);
        let reference = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0", false).unwrap();
        assert_eq!(gt(&reference), vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_gt_conf_from_likelihoods() {
        let alt = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT:GL\t1/1:-5,-1,-3", true).unwrap();
        assert_eq!(alt.gt_conf.as_deref(), Some("4.0"));
        let reference = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT:GL\t0/0:-1,-6,-9", false).unwrap();
        assert_eq!(reference.gt_conf.as_deref(), Some("5.0"));
    }

    #[test]
    fn test_gt_conf_from_likelihoods_too_few_values() {
        let rec = parse_record("r\t5\t.\tA\tG\t.\tPASS\t.\tGT:GL\t1/1:-5,-1");
        let err = filter_record(rec, true).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedLikelihoods(_)));
    }

    #[test]
    fn test_gt_conf_from_support_fraction() {
        let rec = run("r\t5\t.\tA\tG\t.\tPASS\tSupportFraction=0.25\tGT\t1/1", true).unwrap();
        assert_eq!(rec.gt_conf.as_deref(), Some("25.0"));
    }

    #[test]
    fn test_existing_gt_conf_is_kept() {
        let rec = run("r\t5\t.\tA\tG\t.\tPASS\t.\tGT:GL:GT_CONF\t1/1:-5,-1,-3:9", true).unwrap();
        assert_eq!(rec.gt_conf.as_deref(), Some("9"));
    }

    #[test]
    fn test_filter_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_vcf(
            &dir.path().join("in.vcf"),
            &[
                "r\t40\t.\tA\tG,T\t.\tPASS\t.\tGT:GL\t2/2:-9,-8,-7,-6,-5,-1",
                "r\t10\t.\tACG\tAC\t.\tPASS\t.\tGT\t1",
                "r\t20\t.\tA\tG\t.\tPASS\t.\tGT\t0/1",
                "r\t30\t.\tA\tG,*\t.\tPASS\tSupportFraction=0.5\tGT\t1/1",
            ],
        );
        let first = dir.path().join("first.vcf");
        let second = dir.path().join("second.vcf");

        let stats = filter_vcf_for_clustering(&input, &first, true).unwrap();
        assert_eq!(stats, FilterStats { records_in: 4, records_kept: 3 });

        let stats = filter_vcf_for_clustering(&first, &second, true).unwrap();
        assert_eq!(stats, FilterStats { records_in: 3, records_kept: 3 });
        assert_eq!(record_lines(&first), record_lines(&second));

        let options = VcfReadOptions {
            remove_asterisk_alts: false,
            remove_useless_start_nucleotides: false,
        };
        let kept = read_vcf_file(&first, &options).unwrap();
        let records = kept.get("r");
        assert_eq!(records.len(), 3);

        // Deletion trimmed down to one anchor base
        assert_eq!(records[0].pos, 10);
        assert_eq!(records[0].ref_bases, "CG");
        assert_eq!(records[0].alt, vec!["C"]);
        assert_eq!(records[0].genotype, Some(vec![Some(1), Some(1)]));

        assert_eq!(records[1].alt, vec!["G"]);
        assert_eq!(records[1].gt_conf.as_deref(), Some("50"));

        assert_eq!(records[2].alt, vec!["T"]);
        assert_eq!(records[2].gt_conf.as_deref(), Some("2"));
    }

    #[test]
    fn test_filter_file_bad_genotype_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_vcf(
            &dir.path().join("in.vcf"),
            &["r\t5\t.\tA\tG,T\t.\tPASS\t.\tGT\t3/3"],
        );
        let out = dir.path().join("out.vcf");
        assert!(filter_vcf_for_clustering(&input, &out, true).is_err());
    }
}
