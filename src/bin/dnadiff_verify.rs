use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use dnadiff_verifier::{BwaMemAligner, DnadiffVerifier, VerifierConfig, VerifierInputs};

/// Check VCF calls against the differences dnadiff found between two assemblies
#[derive(Parser, Debug)]
#[command(name = "dnadiff-verify")]
#[command(version, about, long_about = None)]
struct Args {
    /// dnadiff SNPs report (id, ref_pos, ref, alt, query_pos, ...)
    #[arg(long)]
    dnadiff_snps: PathBuf,

    /// Reference assembly given to dnadiff
    #[arg(long)]
    dnadiff_ref: PathBuf,

    /// Query assembly given to dnadiff
    #[arg(long)]
    dnadiff_query: PathBuf,

    /// Calls for the reference assembly sample (plain or gzipped)
    #[arg(long)]
    vcf_ref: PathBuf,

    /// Calls for the query assembly sample (plain or gzipped)
    #[arg(long)]
    vcf_query: PathBuf,

    /// Reference genome both VCFs were called against
    #[arg(long)]
    vcf_reference: PathBuf,

    /// Prefix of all output files
    #[arg(short, long)]
    outprefix: PathBuf,

    /// Bases of flanking sequence on each side of a variant
    #[arg(long, default_value_t = 31)]
    flank_length: usize,

    /// Max distance between calls merged into one cluster [default: flank length]
    #[arg(long)]
    merge_length: Option<usize>,

    /// Use the VCFs as given, without filtering and clustering
    #[arg(long)]
    no_filter_and_cluster: bool,

    /// Keep 0/0 calls when filtering
    #[arg(long)]
    keep_ref_calls: bool,

    /// Require fragment alignments to have no edits at all
    #[arg(long)]
    strict_flanks: bool,

    /// bwa executable
    #[arg(long, default_value = "bwa")]
    bwa: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    info!("dnadiff-verify v{}", env!("CARGO_PKG_VERSION"));

    let inputs = VerifierInputs {
        dnadiff_snps: args.dnadiff_snps,
        dnadiff_ref: args.dnadiff_ref,
        dnadiff_query: args.dnadiff_query,
        vcf_ref: args.vcf_ref,
        vcf_query: args.vcf_query,
        vcf_reference: args.vcf_reference,
    };
    let config = VerifierConfig {
        flank_length: args.flank_length,
        merge_length: args.merge_length,
        filter_and_cluster_vcf: !args.no_filter_and_cluster,
        discard_ref_calls: !args.keep_ref_calls,
        allow_flank_mismatches: !args.strict_flanks,
    };

    let verifier = DnadiffVerifier::new(inputs, &args.outprefix, config)?
        .with_aligner(BwaMemAligner::new(args.bwa));
    let (stats, _) = verifier.run()?;

    println!("total\tfound_vars\tmissed_vars");
    println!("{}\t{}\t{}", stats.total, stats.found_vars, stats.missed_vars);
    Ok(())
}
