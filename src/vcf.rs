//! VCF records read and written through rust-htslib
//!
//! Files are opened with `bcf::Reader` (plain, gzip or bgzip) and rewritten
//! with `bcf::Writer` from a copy of the input header. [`VcfRecord`] is an
//! owned snapshot of the fields the verifier looks at, taken from the first
//! sample: position, alleles, FILTER, GT, GT_CONF, GL and the
//! `SupportFraction` INFO value. Changes made to a snapshot are copied back
//! onto the htslib record with [`VcfRecord::apply_to`], so every other field
//! passes through untouched.
//!
//! Positions are 0-based throughout.

use anyhow::{Context, Result};
use rust_htslib::bcf::{
    self,
    header::{HeaderView, TagType},
    record::{GenotypeAllele, Numeric},
    Read,
};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;

use crate::error::VerifyError;

const GT_HEADER: &[u8] = br#"##FORMAT=<ID=GT,Number=1,Type=String,Description="Genotype">"#;
const GT_CONF_HEADER: &[u8] =
    br#"##FORMAT=<ID=GT_CONF,Number=1,Type=Float,Description="Genotype confidence">"#;
const SVTYPE_HEADER: &[u8] =
    br#"##INFO=<ID=SVTYPE,Number=1,Type=String,Description="Type of variant">"#;

// ============================================================================
// Record snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VcfRecord {
    pub chrom: String,
    /// 0-based position of the first REF base
    pub pos: usize,
    pub id: String,
    pub ref_bases: String,
    /// ALT alleles; empty when the file has `.`
    pub alt: Vec<String>,
    pub filters: Vec<String>,
    /// GT allele indices of the first sample, `None` for `.`
    pub genotype: Option<Vec<Option<u32>>>,
    /// GT_CONF of the first sample as text
    pub gt_conf: Option<String>,
    /// GL of the first sample; `None` entries are missing or unparsable
    pub likelihoods: Option<Vec<Option<f64>>>,
    pub support_fraction: Option<f64>,
}

impl VcfRecord {
    /// Snapshot of an htslib record.
    pub fn from_bcf(record: &bcf::Record) -> Result<Self> {
        let header = record.header();
        let malformed = |reason: &str| VerifyError::MalformedVcfRecord {
            record: format!("at position {}", record.pos() + 1),
            reason: reason.to_string(),
        };

        let rid = record.rid().ok_or_else(|| malformed("no CHROM"))?;
        let chrom = String::from_utf8_lossy(header.rid2name(rid)?).into_owned();
        let pos = usize::try_from(record.pos()).map_err(|_| malformed("negative POS"))?;

        let alleles = record.alleles();
        let ref_bases = alleles
            .first()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .unwrap_or_default();
        let alt = alleles
            .iter()
            .skip(1)
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .filter(|a| a != ".")
            .collect();

        let filters = record
            .filters()
            .map(|id| String::from_utf8_lossy(&header.id_to_name(id)).into_owned())
            .collect();

        Ok(Self {
            chrom,
            pos,
            id: String::from_utf8_lossy(&record.id()).into_owned(),
            ref_bases,
            alt,
            filters,
            genotype: first_sample_genotype(record),
            gt_conf: format_text(record, b"GT_CONF"),
            likelihoods: format_floats(record, b"GL"),
            support_fraction: info_float(record, b"SupportFraction"),
        })
    }

    /// Copy position, alleles, GT and GT_CONF onto `record`.
    ///
    /// GT_CONF is only written when it differs from the record's own value,
    /// using whatever type the record's header declares for it.
    pub fn apply_to(&self, record: &mut bcf::Record) -> Result<()> {
        record.set_pos(self.pos as i64);

        let mut alleles: Vec<&[u8]> = vec![self.ref_bases.as_bytes()];
        alleles.extend(self.alt.iter().map(|a| a.as_bytes()));
        record.set_alleles(&alleles)?;

        if let Some(genotype) = &self.genotype {
            let gt: Vec<GenotypeAllele> = genotype
                .iter()
                .map(|allele| match allele {
                    Some(i) => GenotypeAllele::Unphased(*i as i32),
                    None => GenotypeAllele::UnphasedMissing,
                })
                .collect();
            record.push_genotypes(&gt)?;
        }

        if let Some(conf) = &self.gt_conf {
            if format_text(record, b"GT_CONF").as_ref() != Some(conf) {
                push_gt_conf(record, conf)?;
            }
        }
        Ok(())
    }

    /// 0-based position of the last REF base
    pub fn ref_end_pos(&self) -> usize {
        (self.pos + self.ref_bases.len()).saturating_sub(1)
    }

    /// True if the REF span intersects the 0-based closed interval `[start, end]`
    pub fn intersects(&self, start: usize, end: usize) -> bool {
        self.pos <= end && self.ref_end_pos() >= start
    }

    pub fn is_filtered(&self, filter: &str) -> bool {
        self.filters.iter().any(|f| f == filter)
    }

    /// The called allele when every GT allele is the same non-missing one.
    pub fn homozygous_allele(&self) -> Option<u32> {
        let genotype = self.genotype.as_ref()?;
        let first = (*genotype.first()?)?;
        genotype
            .iter()
            .all(|a| *a == Some(first))
            .then_some(first)
    }

    /// Drop `*` alleles (spanning deletions).
    pub fn remove_asterisk_alts(&mut self) {
        self.alt.retain(|a| a != "*");
    }

    /// Trim leading bases shared by REF and the single ALT down to one
    /// anchor base, and shift the position to match.
    pub fn remove_useless_start_nucleotides(&mut self) {
        if self.ref_bases.len() <= 1 || self.alt.len() != 1 {
            return;
        }

        let shared = self
            .ref_bases
            .bytes()
            .zip(self.alt[0].bytes())
            .take_while(|(r, a)| r == a)
            .count();

        if shared > 1 {
            let trim = shared - 1;
            self.ref_bases.drain(..trim);
            self.alt[0].drain(..trim);
            self.pos += trim;
        }
    }

    /// Every allele of this record embedded in the same reference flanks.
    ///
    /// Returns the 0-based start of the left flank and one sequence per
    /// allele, REF first. Flanks are cut short at either end of `ref_seq`.
    pub fn inferred_var_seqs_plus_flanks(
        &self,
        ref_seq: &[u8],
        flank_length: usize,
    ) -> (usize, Vec<Vec<u8>>) {
        let flank_start = self.pos.saturating_sub(flank_length);
        let flank_end = (self.ref_end_pos() + flank_length).min(ref_seq.len().saturating_sub(1));

        let left = clamped(ref_seq, flank_start, self.pos);
        let right = clamped(ref_seq, self.ref_end_pos() + 1, flank_end + 1);

        let seqs = std::iter::once(&self.ref_bases)
            .chain(self.alt.iter())
            .map(|allele| {
                let mut seq = Vec::with_capacity(left.len() + allele.len() + right.len());
                seq.extend_from_slice(left);
                seq.extend_from_slice(allele.as_bytes());
                seq.extend_from_slice(right);
                seq
            })
            .collect();

        (flank_start, seqs)
    }
}

impl fmt::Display for VcfRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alt = if self.alt.is_empty() {
            ".".to_string()
        } else {
            self.alt.join(",")
        };
        write!(f, "{}:{} {}>{}", self.chrom, self.pos + 1, self.ref_bases, alt)
    }
}

/// `seq[start..end]` with both ends clamped to the sequence
pub(crate) fn clamped(seq: &[u8], start: usize, end: usize) -> &[u8] {
    let end = end.min(seq.len());
    let start = start.min(end);
    &seq[start..end]
}

// ============================================================================
// Field access on htslib records
// ============================================================================

fn first_sample_genotype(record: &bcf::Record) -> Option<Vec<Option<u32>>> {
    if record.sample_count() == 0 {
        return None;
    }
    let genotypes = record.genotypes().ok()?;
    let alleles: Vec<Option<u32>> = genotypes.get(0).iter().map(|a| a.index()).collect();
    (!alleles.is_empty()).then_some(alleles)
}

/// First-sample FORMAT value as text, whatever its declared type
fn format_text(record: &bcf::Record, tag: &[u8]) -> Option<String> {
    if let Ok(values) = record.format(tag).float() {
        let value = *values.first()?.first()?;
        return (!value.is_missing() && !value.is_nan()).then(|| value.to_string());
    }
    if let Ok(values) = record.format(tag).integer() {
        let value = *values.first()?.first()?;
        return (!value.is_missing()).then(|| value.to_string());
    }
    let values = record.format(tag).string().ok()?;
    let text = String::from_utf8_lossy(values.first()?).into_owned();
    (!text.is_empty() && text != ".").then_some(text)
}

fn format_floats(record: &bcf::Record, tag: &[u8]) -> Option<Vec<Option<f64>>> {
    if let Ok(values) = record.format(tag).float() {
        let sample = values.first()?;
        return Some(
            sample
                .iter()
                .map(|v| (!v.is_nan()).then_some(*v as f64))
                .collect(),
        );
    }
    let values = record.format(tag).string().ok()?;
    let text = String::from_utf8_lossy(values.first()?).into_owned();
    Some(text.split(',').map(|v| v.trim().parse().ok()).collect())
}

fn info_float(record: &bcf::Record, tag: &[u8]) -> Option<f64> {
    if let Ok(Some(values)) = record.info(tag).float() {
        return values
            .first()
            .filter(|v| !v.is_missing())
            .map(|v| *v as f64);
    }
    let values = record.info(tag).string().ok()??;
    String::from_utf8_lossy(values.first()?).parse().ok()
}

fn push_gt_conf(record: &mut bcf::Record, conf: &str) -> Result<()> {
    let (tag_type, _) = record.header().format_type(b"GT_CONF")?;
    match tag_type {
        TagType::String => record.push_format_string(b"GT_CONF", &[conf.as_bytes()])?,
        _ => {
            let value: f32 = conf
                .parse()
                .with_context(|| format!("GT_CONF '{}' is not a number", conf))?;
            record.push_format_float(b"GT_CONF", &[value])?
        }
    }
    Ok(())
}

// ============================================================================
// Files
// ============================================================================

/// Every record of a VCF file, grouped per reference sequence in
/// first-appearance order and sorted by position within each group.
///
/// The reader is returned alongside so its header can seed a writer.
pub fn read_bcf_records<P: AsRef<Path>>(path: P) -> Result<(bcf::Reader, Vec<bcf::Record>)> {
    let path = path.as_ref();
    let mut reader = bcf::Reader::from_path(path)
        .with_context(|| format!("Failed to open VCF file {}", path.display()))?;

    let mut records = Vec::new();
    for result in reader.records() {
        records.push(result.with_context(|| format!("Bad record in VCF file {}", path.display()))?);
    }

    let mut rank: FxHashMap<Option<u32>, usize> = FxHashMap::default();
    for record in &records {
        let next = rank.len();
        rank.entry(record.rid()).or_insert(next);
    }
    records.sort_by_key(|r| (rank.get(&r.rid()).copied().unwrap_or(usize::MAX), r.pos()));

    Ok((reader, records))
}

/// Header for a rewritten copy of a VCF.
///
/// Keeps the first sample only and declares the GT, GT_CONF and SVTYPE keys
/// rewritten records may gain.
pub fn output_header(template: &HeaderView) -> Result<bcf::Header> {
    let mut header = if template.sample_count() > 1 {
        let samples = template.samples();
        bcf::Header::from_template_subset(template, &samples[..1])?
    } else {
        bcf::Header::from_template(template)
    };

    if template.format_type(b"GT").is_err() {
        header.push_record(GT_HEADER);
    }
    if template.format_type(b"GT_CONF").is_err() {
        header.push_record(GT_CONF_HEADER);
    }
    if template.info_type(b"SVTYPE").is_err() {
        header.push_record(SVTYPE_HEADER);
    }
    Ok(header)
}

/// Open an uncompressed VCF writer.
pub fn create_vcf_writer(path: &Path, header: &bcf::Header) -> Result<bcf::Writer> {
    bcf::Writer::from_path(path, header, true, bcf::Format::Vcf)
        .with_context(|| format!("Failed to create VCF file {}", path.display()))
}

/// Write `record` unchanged apart from header translation and sample subsetting.
pub fn write_passthrough(writer: &mut bcf::Writer, record: &mut bcf::Record) -> Result<()> {
    writer.translate(record);
    writer.subset(record);
    writer.write(record)?;
    Ok(())
}

/// Normalizations applied while loading a VCF file
#[derive(Debug, Clone, Copy)]
pub struct VcfReadOptions {
    pub remove_asterisk_alts: bool,
    pub remove_useless_start_nucleotides: bool,
}

impl Default for VcfReadOptions {
    fn default() -> Self {
        Self {
            remove_asterisk_alts: false,
            remove_useless_start_nucleotides: true,
        }
    }
}

/// Records grouped per reference sequence, each group sorted by position.
/// Reference names keep their first-appearance order.
#[derive(Debug, Clone, Default)]
pub struct VcfRecords {
    names: Vec<String>,
    records: FxHashMap<String, Vec<VcfRecord>>,
}

impl VcfRecords {
    pub fn push(&mut self, record: VcfRecord) {
        if !self.records.contains_key(&record.chrom) {
            self.names.push(record.chrom.clone());
        }
        self.records
            .entry(record.chrom.clone())
            .or_default()
            .push(record);
    }

    pub fn sort(&mut self) {
        for records in self.records.values_mut() {
            records.sort_by_key(|r| r.pos);
        }
    }

    /// Records of one reference sequence (empty if unknown)
    pub fn get(&self, chrom: &str) -> &[VcfRecord] {
        self.records.get(chrom).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Reference names in first-appearance order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Reference names in lexical order
    pub fn sorted_names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.names.iter().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[VcfRecord])> {
        self.names
            .iter()
            .map(move |name| (name.as_str(), self.get(name)))
    }

    pub fn len(&self) -> usize {
        self.records.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Load a VCF file, sorted per reference sequence.
pub fn read_vcf_file<P: AsRef<Path>>(path: P, options: &VcfReadOptions) -> Result<VcfRecords> {
    let path = path.as_ref();
    let (_reader, records) = read_bcf_records(path)?;
    let mut out = VcfRecords::default();

    for raw in &records {
        let mut record = VcfRecord::from_bcf(raw)
            .with_context(|| format!("Bad record in VCF file {}", path.display()))?;
        if options.remove_asterisk_alts {
            record.remove_asterisk_alts();
        }
        if options.remove_useless_start_nucleotides {
            record.remove_useless_start_nucleotides();
        }
        out.push(record);
    }

    out.sort();
    Ok(out)
}

/// Format a float the way Python's `str(float)` does for ordinary values
/// (`4.0`, `12.5`, `-0.25`).
pub fn python_float_string(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

// ============================================================================
// Test helpers
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
