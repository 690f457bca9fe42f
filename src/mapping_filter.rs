//! Deciding whether an alignment is a genuine match
//!
//! A diff fragment aligned to a VCF fragment only counts when the bases
//! around the variant agree. Flank bases away from the variant may differ
//! (neighbouring variants, assembly errors) unless strict mode is on, in
//! which case the whole fragment must align end to end with no edits.

use rust_htslib::bam::record::Cigar;

use crate::alignment::AlignmentRecord;
use crate::cigar_utils::{aligned_pairs, leading_soft_clip, query_alignment_start, trailing_soft_clip};
use crate::error::VerifyError;
use crate::flank::FragmentSet;

/// Longest soft clip allowed at either end of a tolerant match
pub const MAX_END_SOFT_CLIP: u32 = 3;

/// Below this query alignment start a short query is assumed to be
/// truncated on its left
const SHORT_QUERY_LEFT_CLIP: usize = 5;

/// 0-based query window `[start, end]` that must match the target.
///
/// For a full-length fragment (`2L + 1` or longer) this is everything
/// except the flanks. A shorter fragment was truncated at a sequence end;
/// which end is guessed from where the alignment starts on the query.
pub fn comparison_window(query_len: usize, flank_length: usize, alignment_start: usize) -> (i64, i64) {
    let qlen = query_len as i64;
    let flank = flank_length as i64;

    if qlen < 2 * flank + 1 {
        let length_diff = 2 * flank - qlen;
        if alignment_start < SHORT_QUERY_LEFT_CLIP {
            let end = qlen - flank - 1;
            (end.min(flank - length_diff), end)
        } else {
            let start = flank;
            (start, start.max(length_diff + qlen - flank - 1))
        }
    } else {
        (flank, qlen - flank - 1)
    }
}

/// Judge one alignment of a diff fragment against its target VCF fragment.
///
/// # Arguments
/// * `record` - Alignment, query and target names already resolved
/// * `targets` - Fragments the query was aligned against
/// * `flank_length` - Flank length used to build the fragments
/// * `allow_mismatches` - Tolerate edits in the flanks (default mode)
///
/// # Errors
/// Strict mode needs the NM tag. A mapped record whose target is not in
/// `targets`, or whose comparison window covers no aligned bases, is fatal.
pub fn check_if_alignment_is_good(
    record: &AlignmentRecord,
    targets: &FragmentSet,
    flank_length: usize,
    allow_mismatches: bool,
) -> Result<bool, VerifyError> {
    if record.is_unmapped {
        return Ok(false);
    }
    if record.cigar.is_empty() {
        return Ok(false);
    }

    if !allow_mismatches {
        let nm = record
            .mismatches
            .ok_or_else(|| VerifyError::MissingMismatchTag(record.query.clone()))?;
        let all_mapped = matches!(record.cigar.as_slice(), [Cigar::Match(_)]);
        return Ok(all_mapped && nm == 0);
    }

    if leading_soft_clip(&record.cigar) > MAX_END_SOFT_CLIP
        || trailing_soft_clip(&record.cigar) > MAX_END_SOFT_CLIP
    {
        return Ok(false);
    }

    let target_seq = record
        .target
        .as_ref()
        .and_then(|t| targets.sequence(t))
        .ok_or_else(|| VerifyError::MissingTarget(record.query.clone()))?;

    let query = &record.query_sequence;
    let (start, end) = comparison_window(
        query.len(),
        flank_length,
        query_alignment_start(&record.cigar),
    );
    let in_window = |pos: i64| start - 1 <= pos && pos <= end + 1;

    // Walk the first len(query) pairs; reference-only pairs belong to the
    // window when the last query position seen does.
    let pairs = aligned_pairs(&record.cigar, record.target_start);
    let mut wanted = Vec::new();
    let mut current_pos: i64 = 0;
    for pair in pairs.iter().take(query.len()) {
        match pair.0 {
            None => {
                if in_window(current_pos) {
                    wanted.push(*pair);
                }
            }
            Some(_) if current_pos > end => break,
            Some(q) => {
                current_pos = q as i64;
                if in_window(current_pos) {
                    wanted.push(*pair);
                }
            }
        }
    }

    if wanted.is_empty() {
        return Err(VerifyError::EmptyComparisonWindow(record.query.clone()));
    }

    for pair in wanted {
        let (Some(q), Some(r)) = pair else {
            return Ok(false);
        };
        match (query.get(q), target_seq.get(r)) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => {}
            _ => return Ok(false),
        }
    }

    Ok(true)
}

// ============================================================================
// Tests
// ============================================================================
