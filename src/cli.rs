//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use splitget_core::download::{DEFAULT_THREAD_COUNT, DEFAULT_TRY_LIMIT};

/// Download a single file over HTTP using concurrent byte-range chunks.
///
/// Splitget probes the server for range support, splits the resource across
/// worker connections, and merges the chunks into one output file. Servers
/// without range support degrade to a single connection automatically.
#[derive(Parser, Debug)]
#[command(name = "splitget")]
#[command(author, version, about)]
pub struct Args {
    /// URL of the resource to download
    pub url: String,

    /// Output file path (defaults to the last URL path segment)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Directory for chunk temp files (defaults to the output directory)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Directory the merge output is assembled in (defaults to the temp directory)
    #[arg(long)]
    pub merge_dir: Option<PathBuf>,

    /// Number of concurrent chunk connections (1-64)
    #[arg(short = 't', long, default_value_t = DEFAULT_THREAD_COUNT as u8, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub threads: u8,

    /// Attempt budget per chunk (0 = retry forever)
    #[arg(long, default_value_t = DEFAULT_TRY_LIMIT)]
    pub tries: u32,

    /// Buffer chunks in memory instead of temp files
    #[arg(long)]
    pub memory: bool,

    /// Download only this byte range, e.g. "0-1048575" or "1048576-"
    #[arg(long)]
    pub range: Option<String>,

    /// Extra request header, "Name: Value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Keep the finished file in the merge directory instead of the output path
    #[arg(long)]
    pub keep: bool,

    /// Progress update interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub update_interval: u64,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_minimal_invocation_parses() {
        let args = Args::try_parse_from(["splitget", "https://example.com/file.iso"]).unwrap();
        assert_eq!(args.url, "https://example.com/file.iso");
        assert!(args.output.is_none());
        assert_eq!(args.threads, 2); // DEFAULT_THREAD_COUNT
        assert_eq!(args.tries, 1); // DEFAULT_TRY_LIMIT
        assert!(!args.memory);
        assert!(!args.keep);
    }

    #[test]
    fn test_cli_requires_url() {
        let result = Args::try_parse_from(["splitget"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_output_flag() {
        let args =
            Args::try_parse_from(["splitget", "https://example.com/f", "-o", "/tmp/out.bin"])
                .unwrap();
        assert_eq!(args.output, Some(PathBuf::from("/tmp/out.bin")));
    }

    #[test]
    fn test_cli_threads_range_enforced() {
        let args =
            Args::try_parse_from(["splitget", "https://example.com/f", "-t", "8"]).unwrap();
        assert_eq!(args.threads, 8);

        assert!(Args::try_parse_from(["splitget", "https://example.com/f", "-t", "0"]).is_err());
        assert!(Args::try_parse_from(["splitget", "https://example.com/f", "-t", "65"]).is_err());
    }

    #[test]
    fn test_cli_tries_zero_means_infinite() {
        let args =
            Args::try_parse_from(["splitget", "https://example.com/f", "--tries", "0"]).unwrap();
        assert_eq!(args.tries, 0);
    }

    #[test]
    fn test_cli_repeatable_headers() {
        let args = Args::try_parse_from([
            "splitget",
            "https://example.com/f",
            "-H",
            "X-One: 1",
            "-H",
            "X-Two: 2",
        ])
        .unwrap();
        assert_eq!(args.headers, vec!["X-One: 1", "X-Two: 2"]);
    }

    #[test]
    fn test_cli_range_flag() {
        let args = Args::try_parse_from([
            "splitget",
            "https://example.com/f",
            "--range",
            "1024-2047",
        ])
        .unwrap();
        assert_eq!(args.range.as_deref(), Some("1024-2047"));
    }

    #[test]
    fn test_cli_verbose_and_quiet_flags() {
        let args = Args::try_parse_from(["splitget", "https://example.com/f", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["splitget", "https://example.com/f", "-q"]).unwrap();
        assert!(args.quiet);
    }
}
