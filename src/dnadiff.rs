//! dnadiff difference report and assembly sequence input
//!
//! # Report Format
//! ```text
//! id  ref_pos  ref_allele  query_allele  query_pos
//! 1   100      A           T             100
//! 2   250      .           G             251
//! ```
//! Positions are 1-based. `.` marks a gap (the base is absent on that side).
//! Columns past the fifth are ignored.

use anyhow::{Context, Result};
use bio::io::fasta;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::VerifyError;

/// Gap marker used by dnadiff for an absent allele
pub const GAP: &str = ".";

/// One difference between the two assemblies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub id: String,
    /// 1-based position in the reference assembly
    pub ref_pos: usize,
    pub ref_allele: String,
    pub query_allele: String,
    /// 1-based position in the query assembly
    pub query_pos: usize,
}

impl DiffRecord {
    pub fn ref_is_gap(&self) -> bool {
        self.ref_allele == GAP
    }

    pub fn query_is_gap(&self) -> bool {
        self.query_allele == GAP
    }
}

/// Parse a dnadiff report into records, in file order.
pub fn parse_dnadiff_report<P: AsRef<Path>>(path: P) -> Result<Vec<DiffRecord>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open dnadiff report {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_diff_line(&line, i + 1)?);
    }

    Ok(records)
}

fn parse_diff_line(line: &str, line_number: usize) -> Result<DiffRecord, VerifyError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return Err(VerifyError::MalformedDiffLine {
            line_number,
            reason: format!("expected at least 5 columns, found {}", fields.len()),
        });
    }

    let parse_pos = |field: &str, name: &str| -> Result<usize, VerifyError> {
        field
            .trim()
            .parse::<usize>()
            .map_err(|_| VerifyError::MalformedDiffLine {
                line_number,
                reason: format!("invalid {} '{}'", name, field),
            })
    };

    Ok(DiffRecord {
        id: fields[0].trim().to_string(),
        ref_pos: parse_pos(fields[1], "ref_pos")?,
        ref_allele: fields[2].trim().to_string(),
        query_allele: fields[3].trim().to_string(),
        query_pos: parse_pos(fields[4], "query_pos")?,
    })
}

/// Sequence of the first record in a FASTA file.
///
/// Assemblies handed to dnadiff are single-sequence files; anything after the
/// first record is ignored.
pub fn load_first_sequence<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open FASTA {}", path.display()))?;
    let reader = fasta::Reader::new(file);

    match reader.records().next() {
        Some(record) => {
            let record = record
                .with_context(|| format!("Failed to read FASTA record from {}", path.display()))?;
            Ok(record.seq().to_vec())
        }
        None => Err(VerifyError::EmptyFasta(path.display().to_string()).into()),
    }
}

/// All sequences of a FASTA file keyed by record id.
pub fn load_sequences<P: AsRef<Path>>(path: P) -> Result<FxHashMap<String, Vec<u8>>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open FASTA {}", path.display()))?;
    let reader = fasta::Reader::new(file);

    let mut seqs = FxHashMap::default();
    for record in reader.records() {
        let record = record
            .with_context(|| format!("Failed to read FASTA record from {}", path.display()))?;
        seqs.insert(record.id().to_string(), record.seq().to_vec());
    }

    Ok(seqs)
}
