//! Flanked sequence fragments
//!
//! A fragment is a variant plus `flank_length` bases of context on each
//! side. Fragments from the dnadiff report are mapped against fragments built
//! from VCF alleles, so a call is matched by sequence rather than by
//! coordinate.
//!
//! Every fragment carries a structured [`FragmentId`]. Its `Display` form is
//! only used as the FASTA/SAM name and is resolved back through the owning
//! [`FragmentSet`], never parsed.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::dnadiff::DiffRecord;
use crate::vcf::{clamped, VcfRecords};

// ============================================================================
// Data Structures
// ============================================================================

/// Where a fragment came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FragmentId {
    /// Built from one side of a dnadiff record
    Diff {
        /// Index of the record in the report
        record_index: usize,
        /// 1-based position of the difference on this side
        start: usize,
    },
    /// Built from one allele of a VCF record
    Vcf {
        ref_name: String,
        /// 1-based position of the first fragment base on the reference
        start: usize,
        /// Index of the record among the sorted records of `ref_name`
        record_index: usize,
        /// 0 = REF, then ALTs in VCF order
        allele_index: usize,
    },
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentId::Diff {
                record_index,
                start,
            } => write!(f, "{}.{}", record_index, start),
            FragmentId::Vcf {
                ref_name,
                start,
                record_index,
                allele_index,
            } => write!(f, "{}.{}.{}.{}", ref_name, start, record_index, allele_index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: FragmentId,
    pub seq: Vec<u8>,
}

/// Ordered fragments with lookup by written name
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    fragments: Vec<Fragment>,
    by_name: FxHashMap<String, usize>,
}

impl FragmentSet {
    pub fn push(&mut self, fragment: Fragment) {
        self.by_name
            .insert(fragment.id.to_string(), self.fragments.len());
        self.fragments.push(fragment);
    }

    /// Resolve a FASTA/SAM name back to its fragment.
    pub fn by_name(&self, name: &str) -> Option<&Fragment> {
        self.by_name.get(name).map(|&i| &self.fragments[i])
    }

    /// Sequence of the fragment with this id
    pub fn sequence(&self, id: &FragmentId) -> Option<&[u8]> {
        self.by_name(&id.to_string()).map(|f| f.seq.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Write as FASTA, one unwrapped sequence line per fragment.
    pub fn write_fasta<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create fragment FASTA {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        for fragment in &self.fragments {
            writeln!(writer, ">{}", fragment.id)?;
            writer.write_all(&fragment.seq)?;
            writer.write_all(b"\n")?;
        }

        writer
            .flush()
            .with_context(|| format!("Failed to write fragment FASTA {}", path.display()))?;
        Ok(())
    }
}

// ============================================================================
// dnadiff fragments
// ============================================================================

/// Fragment of `seq` around a 1-based dnadiff position.
///
/// The 0-based window is `[pos - L - c, pos + L)` where `c` is 0 when the
/// allele on this side is the gap marker and 1 otherwise, so a SNP base lands
/// at index `L`. Both ends are clamped to the sequence.
pub fn diff_flanked_seq(seq: &[u8], pos: usize, is_gap: bool, flank_length: usize) -> &[u8] {
    let correction = if is_gap { 0 } else { 1 };
    let start = pos.saturating_sub(flank_length + correction);
    clamped(seq, start, pos + flank_length)
}

/// Fragments for both sides of every dnadiff record.
///
/// Returns `(ref_side, query_side)`: reference-assembly fragments use
/// `ref_pos` and the reference allele column, query-assembly fragments use
/// `query_pos` and the query allele column.
pub fn diff_fragments(
    records: &[DiffRecord],
    ref_seq: &[u8],
    query_seq: &[u8],
    flank_length: usize,
) -> (FragmentSet, FragmentSet) {
    let mut ref_side = FragmentSet::default();
    let mut query_side = FragmentSet::default();

    for (i, record) in records.iter().enumerate() {
        ref_side.push(Fragment {
            id: FragmentId::Diff {
                record_index: i,
                start: record.ref_pos,
            },
            seq: diff_flanked_seq(ref_seq, record.ref_pos, record.ref_is_gap(), flank_length)
                .to_vec(),
        });
        query_side.push(Fragment {
            id: FragmentId::Diff {
                record_index: i,
                start: record.query_pos,
            },
            seq: diff_flanked_seq(
                query_seq,
                record.query_pos,
                record.query_is_gap(),
                flank_length,
            )
            .to_vec(),
        });
    }

    (ref_side, query_side)
}

// ============================================================================
// VCF fragments
// ============================================================================

/// One fragment per allele of every VCF record.
///
/// All alleles of a record share the same flanks, so fragments of one record
/// differ only in the embedded allele. Records whose reference sequence is
/// missing from `ref_seqs` are skipped.
pub fn vcf_fragments(
    records: &VcfRecords,
    ref_seqs: &FxHashMap<String, Vec<u8>>,
    flank_length: usize,
) -> FragmentSet {
    let mut fragments = FragmentSet::default();

    for ref_name in records.sorted_names() {
        let Some(ref_seq) = ref_seqs.get(ref_name.as_str()) else {
            log::warn!("Reference sequence {} not found, skipping its VCF records", ref_name);
            continue;
        };

        for (record_index, record) in records.get(ref_name).iter().enumerate() {
            let (flank_start, alleles) = record.inferred_var_seqs_plus_flanks(ref_seq, flank_length);
            for (allele_index, seq) in alleles.into_iter().enumerate() {
                fragments.push(Fragment {
                    id: FragmentId::Vcf {
                        ref_name: ref_name.clone(),
                        start: flank_start + 1,
                        record_index,
                        allele_index,
                    },
                    seq,
                });
            }
        }
    }

    fragments
}

// ============================================================================
// Tests
// ============================================================================
