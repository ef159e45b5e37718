//! CLI argument definitions

use clap::Parser;
use std::time::Duration;

use crate::config::{CaptureConfig, DEFAULT_MAX_DEPTH};
use crate::report::PointerWidth;

#[derive(Parser, Debug)]
#[command(
    name = "allstacks",
    about = "Print the call stack of every thread in this process",
    after_help = "\
EXAMPLES:
    allstacks                         Three busy workers, text output
    allstacks --workers 8 --json      Eight workers, JSON output
    RUST_LOG=debug allstacks          Show capture diagnostics"
)]
pub struct Args {
    /// Busy worker threads to spawn before capturing
    #[arg(short, long, default_value = "3")]
    pub workers: usize,

    /// Maximum frames captured per thread
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// How long to wait for each thread to pause, in milliseconds
    #[arg(long, value_name = "MS", default_value = "100")]
    pub timeout_ms: u64,

    /// Width of the address column
    #[arg(long, value_name = "BITS", value_parser = parse_pointer_width)]
    pub pointer_width: Option<PointerWidth>,

    /// Only use exported symbols from memory; skip reading .symtab from disk
    #[arg(long)]
    pub exports_only: bool,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn capture_config(&self) -> CaptureConfig {
        let config = CaptureConfig::default()
            .with_max_depth(self.max_depth)
            .with_suspend_timeout(Duration::from_millis(self.timeout_ms))
            .with_local_symbols(!self.exports_only);
        match self.pointer_width {
            Some(width) => config.with_pointer_width(width),
            None => config,
        }
    }
}

fn parse_pointer_width(value: &str) -> Result<PointerWidth, String> {
    value
        .parse::<u32>()
        .ok()
        .and_then(PointerWidth::from_bits)
        .ok_or_else(|| format!("expected 32 or 64, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["allstacks"]);
        assert_eq!(args.workers, 3);
        assert!(!args.json);
        assert_eq!(args.capture_config(), CaptureConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "allstacks",
            "--workers",
            "5",
            "--max-depth",
            "16",
            "--timeout-ms",
            "250",
            "--pointer-width",
            "32",
            "--exports-only",
        ]);
        let config = args.capture_config();
        assert_eq!(args.workers, 5);
        assert_eq!(config.max_depth, 16);
        assert_eq!(config.suspend_timeout, Duration::from_millis(250));
        assert_eq!(config.pointer_width, PointerWidth::Bits32);
        assert!(!config.include_local_symbols);
    }

    #[test]
    fn test_rejects_odd_pointer_width() {
        assert!(Args::try_parse_from(["allstacks", "--pointer-width", "16"]).is_err());
    }
}
