//! CLI argument parsing and configuration

use crate::types::StemKind;
use clap::Parser;
use std::path::PathBuf;

/// musicroom - spectral stem separation
///
/// Splits a stereo WAV mixture into Vocal, Bass, Drums, Piano, Guitar and
/// Others stems whose sum reconstructs the mixture.
#[derive(Parser, Debug)]
#[command(name = "musicroom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Input WAV file (16-bit PCM or 32-bit float, mono or stereo)
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output directory for the stem WAV files
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,

    /// Model configuration JSON (defaults to builtin heuristics for all stems)
    #[arg(short, long, value_name = "FILE")]
    pub models: Option<PathBuf>,

    /// Number of Wiener refinement iterations
    #[arg(long, value_name = "N")]
    pub wiener_iters: Option<usize>,

    /// Stem that receives the residual (mixture minus all other stems)
    #[arg(long, value_name = "STEM")]
    pub residual: Option<StemKind>,

    /// Run the second waveform-domain refinement pass
    #[arg(long, default_value = "false")]
    pub second_pass: bool,

    /// Scale the mixture down to a 0.98 peak before separating
    #[arg(long, default_value = "false")]
    pub normalize: bool,

    /// Number of worker threads (defaults to CPU count - 1)
    #[arg(short = 'j', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress bar)
    #[arg(short, long, default_value = "false")]
    pub quiet: bool,
}

impl Cli {
    /// Get the log level based on verbosity flags
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
