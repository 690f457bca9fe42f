//! Merging nearby VCF records
//!
//! Calls close enough to share a fragment would otherwise each be embedded
//! in reference flanks that lack their neighbours, and the diff fragment
//! carrying both differences would match neither. Clustering rewrites such
//! groups as one record spanning all of them.

use anyhow::{Context, Result};
use log::{info, warn};
use rust_htslib::bcf::{self, record::Numeric, Read};
use std::ops::Range;
use std::path::Path;

use crate::dnadiff::load_sequences;
use crate::vcf::{create_vcf_writer, output_header, read_bcf_records, write_passthrough, VcfRecord};

/// How the ALT of a merged record is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    /// Apply every member's ALT
    Simple,
    /// Apply only members called homozygous ALT
    GtAware,
}

/// Clusters the records of one VCF file against its reference.
pub trait VcfClusterer {
    fn cluster(&self, input: &Path, reference: &Path, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleClusterer {
    pub merge_method: MergeMethod,
    /// Largest gap between one record's REF end and the next record's start
    pub max_distance: usize,
}

impl SimpleClusterer {
    pub fn new(merge_method: MergeMethod, max_distance: usize) -> Self {
        Self {
            merge_method,
            max_distance,
        }
    }

    /// Group position-sorted records of one reference sequence.
    pub fn group(&self, records: &[VcfRecord]) -> Vec<Range<usize>> {
        let mut groups = Vec::new();
        let mut start = 0;
        let mut cluster_end = 0;

        for (i, record) in records.iter().enumerate() {
            if i > start && record.pos > cluster_end + self.max_distance {
                groups.push(start..i);
                start = i;
                cluster_end = 0;
            }
            cluster_end = cluster_end.max(record.ref_end_pos());
        }
        if start < records.len() {
            groups.push(start..records.len());
        }

        groups
    }

    /// The merged record for one cluster, or `None` to keep its records as they are.
    pub fn merge(&self, cluster: &[VcfRecord], ref_seq: &[u8]) -> Option<VcfRecord> {
        if cluster.len() < 2 || has_overlaps(cluster) {
            return None;
        }

        let start = cluster[0].pos;
        let end = cluster
            .iter()
            .map(|r| r.ref_end_pos())
            .max()
            .unwrap_or(start);
        if end >= ref_seq.len() {
            warn!(
                "Cluster at {}:{} runs past the end of the reference, left unmerged",
                cluster[0].chrom,
                start + 1
            );
            return None;
        }

        let alt_called: Vec<bool> = cluster.iter().map(|r| called_alt(r).is_some()).collect();
        let any_alt_called = alt_called.iter().any(|&c| c);
        let apply: Vec<bool> = match self.merge_method {
            MergeMethod::Simple => vec![true; cluster.len()],
            MergeMethod::GtAware if any_alt_called => alt_called,
            MergeMethod::GtAware => vec![true; cluster.len()],
        };
        let genotype = if self.merge_method == MergeMethod::GtAware && !any_alt_called {
            0
        } else {
            1
        };

        let mut alt = Vec::with_capacity(end + 1 - start);
        let mut cursor = start;
        for (record, _) in cluster.iter().zip(&apply).filter(|(_, applied)| **applied) {
            let allele = called_alt(record)
                .or_else(|| record.alt.first().map(|s| s.as_str()))
                .unwrap_or("");
            alt.extend_from_slice(&ref_seq[cursor..record.pos]);
            alt.extend_from_slice(allele.as_bytes());
            cursor = record.ref_end_pos() + 1;
        }
        alt.extend_from_slice(&ref_seq[cursor..=end]);

        Some(VcfRecord {
            chrom: cluster[0].chrom.clone(),
            pos: start,
            id: ".".to_string(),
            ref_bases: String::from_utf8_lossy(&ref_seq[start..=end]).to_string(),
            alt: vec![String::from_utf8_lossy(&alt).to_string()],
            filters: vec!["PASS".to_string()],
            genotype: Some(vec![Some(genotype), Some(genotype)]),
            gt_conf: min_gt_conf(cluster).map(|s| s.to_string()),
            likelihoods: None,
            support_fraction: None,
        })
    }
}

impl VcfClusterer for SimpleClusterer {
    fn cluster(&self, input: &Path, reference: &Path, output: &Path) -> Result<()> {
        let (reader, mut raw) = read_bcf_records(input)?;
        let calls = raw
            .iter()
            .map(VcfRecord::from_bcf)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Bad record in VCF file {}", input.display()))?;
        let ref_seqs = load_sequences(reference)?;

        let header = output_header(reader.header())?;
        let mut writer = create_vcf_writer(output, &header)?;

        let mut clusters = 0;
        let mut written = 0;
        let mut chrom_start = 0;
        while chrom_start < calls.len() {
            let chrom = calls[chrom_start].chrom.as_str();
            let chrom_end = chrom_start
                + calls[chrom_start..]
                    .iter()
                    .take_while(|c| c.chrom == chrom)
                    .count();

            let ref_seq = ref_seqs.get(chrom).map(|s| s.as_slice());
            if ref_seq.is_none() {
                warn!("Reference sequence {} not found, its records are not clustered", chrom);
            }

            for group in self.group(&calls[chrom_start..chrom_end]) {
                clusters += 1;
                let members = chrom_start + group.start..chrom_start + group.end;
                let merged = ref_seq.and_then(|seq| self.merge(&calls[members.clone()], seq));
                match merged {
                    Some(merged) => {
                        write_merged(&mut writer, &merged)?;
                        written += 1;
                    }
                    None => {
                        for record in &mut raw[members] {
                            write_passthrough(&mut writer, record)?;
                            written += 1;
                        }
                    }
                }
            }
            chrom_start = chrom_end;
        }

        info!(
            "Clustered {} records from {} into {} clusters, {} records written to {}",
            calls.len(),
            input.display(),
            clusters,
            written,
            output.display()
        );
        Ok(())
    }
}

fn write_merged(writer: &mut bcf::Writer, merged: &VcfRecord) -> Result<()> {
    let rid = writer.header().name2rid(merged.chrom.as_bytes())?;
    let mut record = writer.empty_record();
    record.set_rid(Some(rid));
    record.set_qual(f32::missing());
    record.push_filter("PASS".as_bytes())?;
    record.push_info_string(b"SVTYPE", &[b"MERGED".as_slice()])?;
    merged.apply_to(&mut record)?;
    writer.write(&record)?;
    Ok(())
}

fn has_overlaps(cluster: &[VcfRecord]) -> bool {
    let mut end = cluster[0].ref_end_pos();
    for record in &cluster[1..] {
        if record.pos <= end {
            return true;
        }
        end = end.max(record.ref_end_pos());
    }
    false
}

/// ALT allele of a homozygous non-reference call
fn called_alt(record: &VcfRecord) -> Option<&str> {
    let index = record.homozygous_allele()? as usize;
    if index == 0 {
        return None;
    }
    record.alt.get(index - 1).map(|s| s.as_str())
}

/// Smallest member GT_CONF, kept as written; `None` unless every member has one.
fn min_gt_conf(cluster: &[VcfRecord]) -> Option<&str> {
    let mut best: Option<(f64, &str)> = None;
    for record in cluster {
        let raw = record.gt_conf.as_deref()?;
        let value: f64 = raw.parse().ok()?;
        if best.map_or(true, |(b, _)| value < b) {
            best = Some((value, raw));
        }
    }
    best.map(|(_, raw)| raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcf::testing::{parse_records, record_lines, write_vcf};
    use crate::vcf::{read_vcf_file, VcfReadOptions};
    use tempfile::tempdir;

    const REF: &[u8] = b"ACGTACGTACGTACGTACGTACGTA";

    #[test]
    fn test_group_by_distance() {
        let records = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT\t1/1",
            "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT\t1/1",
            "chr1\t20\t.\tT\tA\t.\tPASS\t.\tGT\t1/1",
        ]);
        let clusterer = SimpleClusterer::new(MergeMethod::Simple, 3);
        assert_eq!(clusterer.group(&records), vec![0..2, 2..3]);

        let clusterer = SimpleClusterer::new(MergeMethod::Simple, 2);
        assert_eq!(clusterer.group(&records).len(), 3);
    }

    #[test]
    fn test_merge_two_snps() {
        let cluster = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT:GT_CONF\t1/1:50",
            "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT:GT_CONF\t1/1:20.5",
        ]);
        let m = SimpleClusterer::new(MergeMethod::Simple, 31)
            .merge(&cluster, REF)
            .unwrap();
        assert_eq!(m.pos, 1);
        assert_eq!(m.ref_bases, "CGTA");
        assert_eq!(m.alt, vec!["TGTG".to_string()]);
        assert_eq!(m.genotype, Some(vec![Some(1), Some(1)]));
        assert_eq!(m.gt_conf.as_deref(), Some("20.5"));
    }

    #[test]
    fn test_merge_without_full_gt_conf() {
        let cluster = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT:GT_CONF\t1/1:50",
            "chr1\t5\t.\tA\tGG\t.\tPASS\t.\tGT\t1/1",
        ]);
        let m = SimpleClusterer::new(MergeMethod::Simple, 31)
            .merge(&cluster, REF)
            .unwrap();
        assert_eq!(m.alt, vec!["TGTGG".to_string()]);
        assert!(m.gt_conf.is_none());
    }

    #[test]
    fn test_gt_aware_skips_ref_calls() {
        let cluster = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT\t0/0",
            "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT\t1/1",
        ]);
        let m = SimpleClusterer::new(MergeMethod::GtAware, 31)
            .merge(&cluster, REF)
            .unwrap();
        assert_eq!(m.ref_bases, "CGTA");
        assert_eq!(m.alt, vec!["CGTG".to_string()]);
        assert_eq!(m.genotype, Some(vec![Some(1), Some(1)]));

        let all_ref = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT\t0/0",
            "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT\t0/0",
        ]);
        let m = SimpleClusterer::new(MergeMethod::GtAware, 31)
            .merge(&all_ref, REF)
            .unwrap();
        assert_eq!(m.alt, vec!["TGTG".to_string()]);
        assert_eq!(m.genotype, Some(vec![Some(0), Some(0)]));
    }

    #[test]
    fn test_overlapping_records_left_alone() {
        let cluster = parse_records(&[
            "chr1\t2\t.\tCGT\tC\t.\tPASS\t.\tGT\t1/1",
            "chr1\t3\t.\tG\tA\t.\tPASS\t.\tGT\t1/1",
        ]);
        assert!(SimpleClusterer::new(MergeMethod::Simple, 31)
            .merge(&cluster, REF)
            .is_none());
    }

    #[test]
    fn test_cluster_past_reference_end_left_alone() {
        let cluster = parse_records(&[
            "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT\t1/1",
            "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT\t1/1",
        ]);
        assert!(SimpleClusterer::new(MergeMethod::Simple, 31)
            .merge(&cluster, b"ACGT")
            .is_none());
    }

    #[test]
    fn test_cluster_file() {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("ref.fa");
        let out = dir.path().join("out.vcf");
        std::fs::write(&fasta, format!(">chr1\n{}\n", std::str::from_utf8(REF).unwrap())).unwrap();
        let vcf = write_vcf(
            &dir.path().join("in.vcf"),
            &[
                "chr1\t2\t.\tC\tT\t.\tPASS\t.\tGT:GT_CONF\t1/1:40",
                "chr1\t5\t.\tA\tG\t.\tPASS\t.\tGT:GT_CONF\t1/1:60",
                "chr1\t20\t.\tT\tA\t.\tPASS\t.\tGT:DP\t1/1:12",
                "chr7\t3\t.\tG\tC\t.\tPASS\t.\tGT\t1/1",
            ],
        );

        SimpleClusterer::new(MergeMethod::Simple, 5)
            .cluster(&vcf, &fasta, &out)
            .unwrap();

        let lines = record_lines(&out);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("SVTYPE=MERGED"));
        // Unmerged records pass through with their other fields
        assert!(lines[1].contains("DP"));

        let clustered = read_vcf_file(&out, &VcfReadOptions::default()).unwrap();
        let records = clustered.get("chr1");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ref_bases, "CGTA");
        assert_eq!(records[0].alt, vec!["TGTG".to_string()]);
        assert_eq!(records[0].gt_conf.as_deref(), Some("40"));
        assert_eq!(records[1].pos, 19);
        assert_eq!(records[1].alt, vec!["A".to_string()]);

        // No reference sequence: written unclustered
        assert_eq!(clustered.get("chr7").len(), 1);
    }
}
