//! Turning alignment verdicts into per-difference results
//!
//! Each side (reference assembly vs first VCF, query assembly vs second VCF)
//! yields one [`SideResult`] per dnadiff record. A side finds a record when
//! its diff fragment genuinely matches a VCF allele fragment and the VCF
//! record behind that fragment is a homozygous call of exactly that allele.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::alignment::AlignmentRecord;
use crate::dnadiff::DiffRecord;
use crate::error::VerifyError;
use crate::flank::{FragmentId, FragmentSet};
use crate::mapping_filter::check_if_alignment_is_good;
use crate::vcf::VcfRecords;

/// Count of difference records per floored GT_CONF, ascending
pub type ConfidenceHistogram = BTreeMap<i64, usize>;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideResult {
    pub found: bool,
    /// GT_CONF of the matching call, as written in the VCF
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
    pub ref_side: SideResult,
    pub query_side: SideResult,
}

impl SummaryRow {
    pub fn found(&self) -> bool {
        self.ref_side.found || self.query_side.found
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub total: usize,
    pub found_vars: usize,
    pub missed_vars: usize,
}

impl Stats {
    /// `(total, found_vars, missed_vars)`, the column order of the stats file
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.total, self.found_vars, self.missed_vars)
    }
}

// ============================================================================
// Per-side results
// ============================================================================

/// Results for one side, indexed by dnadiff record.
///
/// Only the first alignment record of each query fragment is judged. Diff
/// records without any alignment record are not found.
pub fn parse_alignments_against_vcf(
    records: &[AlignmentRecord],
    targets: &FragmentSet,
    vcf: &VcfRecords,
    num_diff_records: usize,
    flank_length: usize,
    allow_mismatches: bool,
) -> Result<Vec<SideResult>> {
    let mut results = vec![SideResult::default(); num_diff_records];
    let mut seen: FxHashSet<&FragmentId> = FxHashSet::default();

    for record in records {
        if !seen.insert(&record.query) {
            continue;
        }

        let diff_index = match record.query {
            FragmentId::Diff { record_index, .. } if record_index < num_diff_records => record_index,
            _ => return Err(VerifyError::UnknownFragment(record.query.to_string()).into()),
        };

        if !check_if_alignment_is_good(record, targets, flank_length, allow_mismatches)? {
            debug!("{}: no genuine match", record.query);
            continue;
        }

        let Some(target) = &record.target else {
            continue;
        };
        let FragmentId::Vcf {
            ref_name,
            start,
            record_index,
            allele_index,
        } = target
        else {
            continue;
        };

        match confirm_called_allele(vcf, ref_name, *start, *record_index, *allele_index, flank_length) {
            Some(result) => {
                debug!("{}: found as {}", record.query, target);
                results[diff_index] = result;
            }
            None => debug!("{}: matched {} but the call disagrees", record.query, target),
        }
    }

    let found = results.iter().filter(|r| r.found).count();
    info!("Found {} of {} differences", found, num_diff_records);
    Ok(results)
}

/// Check the VCF record a matched fragment was built from.
///
/// `start` is the fragment's 1-based left flank start. Records of `ref_name`
/// overlapping the 0-based closed window `[start + L - 2, start + L + 1]` are
/// scanned for the one at `record_index`; it must be a homozygous call of
/// `allele_index`. A left flank cut short by the sequence start pushes the
/// window past its own record, so such records are never confirmed.
/// `record_index` counts every record of `ref_name`, not only those in the window.
fn confirm_called_allele(
    vcf: &VcfRecords,
    ref_name: &str,
    start: usize,
    record_index: usize,
    allele_index: usize,
    flank_length: usize,
) -> Option<SideResult> {
    let window_start = (start + flank_length).saturating_sub(2);
    let window_end = start + flank_length + 1;

    let (_, record) = vcf
        .get(ref_name)
        .iter()
        .enumerate()
        .filter(|(_, r)| r.intersects(window_start, window_end))
        .find(|(i, _)| *i == record_index)?;

    if record.homozygous_allele()? != allele_index as u32 {
        return None;
    }

    Some(SideResult {
        found: true,
        confidence: record.gt_conf.clone(),
    })
}

// ============================================================================
// Summary and statistics
// ============================================================================

/// Join both sides' results with the dnadiff records.
pub fn build_summary(
    diffs: &[DiffRecord],
    ref_results: Vec<SideResult>,
    query_results: Vec<SideResult>,
) -> Vec<SummaryRow> {
    diffs
        .iter()
        .zip(ref_results.into_iter().zip(query_results))
        .map(|(diff, (ref_side, query_side))| SummaryRow {
            id: diff.id.clone(),
            ref_allele: diff.ref_allele.clone(),
            alt_allele: diff.query_allele.clone(),
            ref_side,
            query_side,
        })
        .collect()
}

/// Found/missed counts and the histogram of floored best confidence.
///
/// A found record contributes to the histogram only when at least one side
/// reported a finite confidence; the larger one is used.
pub fn gather_stats(rows: &[SummaryRow]) -> (Stats, ConfidenceHistogram) {
    let mut stats = Stats::default();
    let mut hist = ConfidenceHistogram::new();

    for row in rows {
        stats.total += 1;
        if !row.found() {
            stats.missed_vars += 1;
            continue;
        }
        stats.found_vars += 1;

        let best = [&row.ref_side.confidence, &row.query_side.confidence]
            .into_iter()
            .flatten()
            .filter_map(|conf| match conf.parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ => {
                    warn!("Ignoring unusable GT_CONF '{}' for difference {}", conf, row.id);
                    None
                }
            })
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

        if let Some(best) = best {
            *hist.entry(best.floor() as i64).or_insert(0) += 1;
        }
    }

    (stats, hist)
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Tab-separated summary table, one row per dnadiff record.
pub fn write_summary<P: AsRef<Path>>(path: P, rows: &[SummaryRow]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_writer(path)?;
    writeln!(
        writer,
        "index\tid\tref\talt\tref_found\tref_conf\tquery_found\tquery_conf"
    )?;

    let flag = |found: bool| if found { "1" } else { "0" };
    for (i, row) in rows.iter().enumerate() {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            i,
            row.id,
            row.ref_allele,
            row.alt_allele,
            flag(row.ref_side.found),
            row.ref_side.confidence.as_deref().unwrap_or(""),
            flag(row.query_side.found),
            row.query_side.confidence.as_deref().unwrap_or(""),
        )?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write summary {}", path.display()))?;
    Ok(())
}

pub fn write_stats<P: AsRef<Path>>(path: P, stats: &Stats) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_writer(path)?;
    writeln!(writer, "total\tfound_vars\tmissed_vars")?;
    writeln!(
        writer,
        "{}\t{}\t{}",
        stats.total, stats.found_vars, stats.missed_vars
    )?;
    writer
        .flush()
        .with_context(|| format!("Failed to write stats {}", path.display()))?;
    Ok(())
}

pub fn write_histogram<P: AsRef<Path>>(path: P, hist: &ConfidenceHistogram) -> Result<()> {
    let path = path.as_ref();
    let mut writer = create_writer(path)?;
    writeln!(writer, "GT_CONF\tCount")?;
    for (conf, count) in hist {
        writeln!(writer, "{}\t{}", conf, count)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write histogram {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flank::{vcf_fragments, Fragment};
    use crate::vcf::testing::load_records;
    use rust_htslib::bam::record::Cigar;
    use rustc_hash::FxHashMap;

    const FLANK: usize = 3;

    fn side(found: bool, conf: Option<&str>) -> SideResult {
        SideResult {
            found,
            confidence: conf.map(|s| s.to_string()),
        }
    }

    fn row(ref_side: SideResult, query_side: SideResult) -> SummaryRow {
        SummaryRow {
            id: "1".to_string(),
            ref_allele: "A".to_string(),
            alt_allele: "T".to_string(),
            ref_side,
            query_side,
        }
    }

    /// One SNP call at 1-based position 5 of `chr1` with the given GT
    fn setup(gt: &str) -> (VcfRecords, FragmentSet) {
        let vcf = load_records(&[&format!(
            "chr1\t5\t.\tA\tT\t.\tPASS\t.\tGT:GT_CONF\t{}:42.5",
            gt
        )]);
        let mut ref_seqs = FxHashMap::default();
        ref_seqs.insert("chr1".to_string(), b"CCGGAGGCC".to_vec());
        let targets = vcf_fragments(&vcf, &ref_seqs, FLANK);
        (vcf, targets)
    }

    fn hit(diff_index: usize, target: &Fragment) -> AlignmentRecord {
        AlignmentRecord {
            query: FragmentId::Diff {
                record_index: diff_index,
                start: 5,
            },
            target: Some(target.id.clone()),
            is_unmapped: false,
            target_start: 0,
            cigar: vec![Cigar::Match(target.seq.len() as u32)],
            query_sequence: target.seq.clone(),
            mismatches: Some(0),
        }
    }

    #[test]
    fn test_found_homozygous_alt() {
        let (vcf, targets) = setup("1/1");
        let alt = targets.by_name("chr1.2.0.1").unwrap();
        let results =
            parse_alignments_against_vcf(&[hit(0, alt)], &targets, &vcf, 2, FLANK, true).unwrap();
        assert_eq!(results[0], side(true, Some("42.5")));
        // No alignment at all for the second record
        assert_eq!(results[1], side(false, None));
    }

    #[test]
    fn test_wrong_allele_not_found() {
        let (vcf, targets) = setup("0/0");
        let alt = targets.by_name("chr1.2.0.1").unwrap();
        let results =
            parse_alignments_against_vcf(&[hit(0, alt)], &targets, &vcf, 1, FLANK, true).unwrap();
        assert_eq!(results[0], side(false, None));

        let reference = targets.by_name("chr1.2.0.0").unwrap();
        let results =
            parse_alignments_against_vcf(&[hit(0, reference)], &targets, &vcf, 1, FLANK, true)
                .unwrap();
        assert_eq!(results[0], side(true, Some("42.5")));
    }

    #[test]
    fn test_heterozygous_not_found() {
        let (vcf, targets) = setup("0/1");
        let alt = targets.by_name("chr1.2.0.1").unwrap();
        let results =
            parse_alignments_against_vcf(&[hit(0, alt)], &targets, &vcf, 1, FLANK, true).unwrap();
        assert!(!results[0].found);
    }

    #[test]
    fn test_first_record_per_query_wins() {
        let (vcf, targets) = setup("1/1");
        let alt = targets.by_name("chr1.2.0.1").unwrap();
        let mut primary = hit(0, alt);
        primary.is_unmapped = true;
        primary.target = None;
        let secondary = hit(0, alt);

        let results =
            parse_alignments_against_vcf(&[primary, secondary], &targets, &vcf, 1, FLANK, true)
                .unwrap();
        assert!(!results[0].found);
    }

    #[test]
    fn test_query_outside_report_is_fatal() {
        let (vcf, targets) = setup("1/1");
        let alt = targets.by_name("chr1.2.0.1").unwrap();
        assert!(parse_alignments_against_vcf(&[hit(3, alt)], &targets, &vcf, 1, FLANK, true).is_err());
    }

    fn confirmed(vcf: &VcfRecords, start: usize) -> bool {
        confirm_called_allele(vcf, "chr1", start, 0, 1, FLANK).is_some()
    }

    #[test]
    fn test_window_edges() {
        // SNP at 0-based 10; window for fragment start s is [s + 1, s + 4]
        let vcf = load_records(&["chr1\t11\t.\tA\tT\t.\tPASS\t.\tGT\t1/1"]);
        assert!(confirmed(&vcf, 9));
        assert!(!confirmed(&vcf, 10));
        assert!(confirmed(&vcf, 6));
        assert!(!confirmed(&vcf, 5));
    }

    #[test]
    fn test_window_catches_deletion_end() {
        // REF spans 0-based 8..=10
        let vcf = load_records(&["chr1\t9\t.\tACG\tA\t.\tPASS\t.\tGT\t1/1"]);
        assert!(confirmed(&vcf, 9));
        assert!(!confirmed(&vcf, 10));
    }

    #[test]
    fn test_clamped_left_flank_not_found() {
        let vcf = load_records(&["chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT:GT_CONF\t1/1:9"]);
        let mut ref_seqs = FxHashMap::default();
        ref_seqs.insert("chr1".to_string(), b"ACGTACGTAC".to_vec());
        let targets = vcf_fragments(&vcf, &ref_seqs, FLANK);
        let alt = targets.by_name("chr1.1.0.1").unwrap();
        assert_eq!(alt.seq, b"ATGTA".to_vec());
        assert!(check_if_alignment_is_good(&hit(0, alt), &targets, FLANK, true).unwrap());

        let results =
            parse_alignments_against_vcf(&[hit(0, alt)], &targets, &vcf, 1, FLANK, true).unwrap();
        assert_eq!(results[0], side(false, None));
    }

    #[test]
    fn test_record_index_counts_whole_sequence() {
        let vcf = load_records(&[
            "chr1\t3\t.\tA\tT\t.\tPASS\t.\tGT\t1/1",
            "chr1\t11\t.\tA\tT\t.\tPASS\t.\tGT\t1/1",
        ]);
        assert!(confirm_called_allele(&vcf, "chr1", 8, 1, 1, FLANK).is_some());
        assert!(confirm_called_allele(&vcf, "chr1", 8, 0, 1, FLANK).is_none());
    }

    #[test]
    fn test_gather_stats() {
        let rows = vec![
            row(side(true, Some("50")), side(true, Some("50"))),
            row(side(true, Some("12.7")), side(false, None)),
            row(side(false, None), side(true, Some("30.2"))),
            row(side(true, Some("3.9")), side(true, Some("12.1"))),
            row(side(false, None), side(false, None)),
            row(side(true, None), side(false, None)),
        ];
        let (stats, hist) = gather_stats(&rows);
        assert_eq!(
            stats,
            Stats {
                total: 6,
                found_vars: 5,
                missed_vars: 1,
            }
        );
        assert_eq!(stats.counts(), (6, 5, 1));
        let expected: ConfidenceHistogram = [(12, 2), (30, 1), (50, 1)].into_iter().collect();
        assert_eq!(hist, expected);
    }

    #[test]
    fn test_non_finite_confidence_ignored() {
        let rows = vec![
            row(side(true, Some("nan")), side(false, None)),
            row(side(true, Some("inf")), side(true, Some("7.5"))),
        ];
        let (stats, hist) = gather_stats(&rows);
        assert_eq!(stats.found_vars, 2);
        let expected: ConfidenceHistogram = [(7, 1)].into_iter().collect();
        assert_eq!(hist, expected);
    }

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let diffs = vec![DiffRecord {
            id: "1".to_string(),
            ref_pos: 100,
            ref_allele: "A".to_string(),
            query_allele: "T".to_string(),
            query_pos: 100,
        }];
        let rows = build_summary(
            &diffs,
            vec![side(true, Some("50"))],
            vec![side(false, None)],
        );
        let (stats, hist) = gather_stats(&rows);

        let summary = dir.path().join("out.summary.tsv");
        let stats_path = dir.path().join("out.stats.tsv");
        let hist_path = dir.path().join("out.gt_conf_hist.tsv");
        write_summary(&summary, &rows).unwrap();
        write_stats(&stats_path, &stats).unwrap();
        write_histogram(&hist_path, &hist).unwrap();

        assert_eq!(
            std::fs::read_to_string(&summary).unwrap(),
            "index\tid\tref\talt\tref_found\tref_conf\tquery_found\tquery_conf\n\
             0\t1\tA\tT\t1\t50\t0\t\n"
        );
        assert_eq!(
            std::fs::read_to_string(&stats_path).unwrap(),
            "total\tfound_vars\tmissed_vars\n1\t1\t0\n"
        );
        assert_eq!(
            std::fs::read_to_string(&hist_path).unwrap(),
            "GT_CONF\tCount\n50\t1\n"
        );
    }
}
