//! Python bindings (`python` feature)

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::{VerifierConfig, VerifierInputs};
use crate::verifier::DnadiffVerifier;

/// Verify two VCF files against a dnadiff report
///
/// Writes `<outprefix>.summary.tsv`, `.stats.tsv` and `.gt_conf_hist.tsv`.
///
/// # Returns
/// Tuple of (total, found_vars, missed_vars, {gt_conf: count})
///
/// # Example (Python)
/// ```python
/// import dnadiff_verifier
/// total, found_vars, missed_vars, hist = dnadiff_verifier.verify_dnadiff(
///     "out.snps", "asm1.fa", "asm2.fa", "calls1.vcf", "calls2.vcf", "ref.fa", "verify")
/// ```
#[pyfunction]
#[pyo3(signature = (
    dnadiff_snps,
    dnadiff_ref,
    dnadiff_query,
    vcf_ref,
    vcf_query,
    vcf_reference,
    outprefix,
    flank_length=31,
    merge_length=None,
    filter_and_cluster_vcf=true,
    discard_ref_calls=true,
    allow_flank_mismatches=true,
))]
#[allow(clippy::too_many_arguments)]
fn verify_dnadiff<'py>(
    py: Python<'py>,
    dnadiff_snps: &str,
    dnadiff_ref: &str,
    dnadiff_query: &str,
    vcf_ref: &str,
    vcf_query: &str,
    vcf_reference: &str,
    outprefix: &str,
    flank_length: usize,
    merge_length: Option<usize>,
    filter_and_cluster_vcf: bool,
    discard_ref_calls: bool,
    allow_flank_mismatches: bool,
) -> PyResult<(usize, usize, usize, Bound<'py, PyDict>)> {
    let inputs = VerifierInputs {
        dnadiff_snps: dnadiff_snps.into(),
        dnadiff_ref: dnadiff_ref.into(),
        dnadiff_query: dnadiff_query.into(),
        vcf_ref: vcf_ref.into(),
        vcf_query: vcf_query.into(),
        vcf_reference: vcf_reference.into(),
    };
    let config = VerifierConfig {
        flank_length,
        merge_length,
        filter_and_cluster_vcf,
        discard_ref_calls,
        allow_flank_mismatches,
    };
    let outprefix = outprefix.to_string();

    let (stats, hist) = py
        .allow_threads(move || DnadiffVerifier::new(inputs, outprefix, config)?.run())
        .map_err(|e| PyRuntimeError::new_err(format!("dnadiff verification failed: {:#}", e)))?;

    let py_hist = PyDict::new_bound(py);
    for (conf, count) in hist {
        py_hist.set_item(conf, count)?;
    }

    let (total, found_vars, missed_vars) = stats.counts();
    Ok((total, found_vars, missed_vars, py_hist))
}

#[pymodule]
fn dnadiff_verifier(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();
    m.add_function(wrap_pyfunction!(verify_dnadiff, m)?)?;
    Ok(())
}
