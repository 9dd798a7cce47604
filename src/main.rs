use clap::Parser;
use std::path::PathBuf;

use galign::config::Params;
use galign::pipeline;

/// Whole-genome alignment of two assemblies from their pre-built k-mer
/// and position indices.
#[derive(Parser)]
#[command(name = "galign")]
#[command(about = "Whole-genome aligner over adaptive seed matches", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose mode: report statistics as phases proceed
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Directory for temporary files
    #[arg(short = 'P', long, value_name = "DIR", default_value = "/tmp")]
    sort_path: PathBuf,

    /// Root name for the output .las file (default: <src1>.<src2>)
    #[arg(short = 'o', long, value_name = "NAME")]
    output: Option<String>,

    /// Adaptive seed count cutoff (mandatory)
    #[arg(short = 'f', long, value_name = "INT")]
    freq: usize,

    /// Minimum seed chain coverage in both genomes
    #[arg(short = 'c', long, value_name = "INT", default_value = "100")]
    chain_min: i64,

    /// Threshold for starting a new seed chain
    #[arg(short = 's', long, value_name = "INT", default_value = "500")]
    chain_break: i64,

    /// Minimum alignment length
    #[arg(short = 'a', long, value_name = "INT", default_value = "100")]
    align_min: i32,

    /// Minimum alignment similarity, in [0.6,1.0)
    #[arg(short = 'e', long, value_name = "FLOAT", default_value = "0.7")]
    align_rate: f64,

    /// First genome source root (.gdb with .ktab/.post/.bps companions)
    #[arg(value_name = "SRC1")]
    src1: PathBuf,

    /// Second genome source root
    #[arg(value_name = "SRC2")]
    src2: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let params = Params {
        verbose: cli.verbose,
        freq: cli.freq,
        chain_min: cli.chain_min,
        chain_break: cli.chain_break,
        align_min: cli.align_min,
        align_rate: cli.align_rate,
        sort_path: cli.sort_path,
        out_root: cli.output,
        src1: cli.src1,
        src2: cli.src2,
    };

    if let Err(e) = pipeline::run(&params) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
